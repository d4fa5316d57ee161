//! Download redemption over HTTP.

mod common;

use axum::http::{header, StatusCode};
use chrono::Duration;
use common::*;
use serde_json::json;

#[tokio::test]
async fn test_download_redirects_to_file() {
    let db = setup_test_db();
    create_test_book(&db.store, sellable_book("1"));
    let (_, token) = create_fulfilled_order(&db.store, "1", "cs_dl_redirect");
    let state = offline_state(&db.store);

    let response = send(&state, get(&format!("/download/{}", token.token))).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://files.example.com/ebooks/book-1.epub"
    );

    let stored = db.store.get_token(&token.token).unwrap().unwrap();
    assert_eq!(stored.download_count, 1);
    assert!(stored.last_used_at.is_some());
}

#[tokio::test]
async fn test_download_absolute_file_url_passes_through() {
    let db = setup_test_db();
    let mut book = sellable_book("1");
    book.ebook_file_ref = Some("https://cdn.example.com/signed/book-1.epub".to_string());
    create_test_book(&db.store, book);
    let (_, token) = create_fulfilled_order(&db.store, "1", "cs_dl_absolute");
    let state = offline_state(&db.store);

    let response = send(&state, get(&format!("/download/{}", token.token))).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://cdn.example.com/signed/book-1.epub"
    );
}

#[tokio::test]
async fn test_sixth_download_forbidden() {
    let db = setup_test_db();
    create_test_book(&db.store, sellable_book("1"));
    let (_, token) = create_fulfilled_order(&db.store, "1", "cs_dl_limit");
    let state = offline_state(&db.store);
    let uri = format!("/download/{}", token.token);

    for _ in 0..5 {
        let response = send(&state, get(&uri)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    let response = send(&state, get(&uri)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "download_limit_reached");
}

#[tokio::test]
async fn test_unknown_token_not_found() {
    let db = setup_test_db();
    let state = offline_state(&db.store);

    let response = send(&state, get("/download/0000000000000000")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "invalid_token");
}

#[tokio::test]
async fn test_expired_token_gone() {
    let db = setup_test_db();
    create_test_book(&db.store, sellable_book("1"));
    let (order, _) = db
        .store
        .insert_order_if_absent(&NewOrder {
            customer_email: "buyer@example.com".into(),
            customer_name: None,
            transaction_id: "cs_dl_expired".into(),
            provider: "stripe".into(),
            book_id: "1".into(),
            format_type: FormatType::Ebook,
            amount_cents: 999,
            currency: "usd".into(),
            status: OrderStatus::Completed,
        })
        .unwrap();
    let issued = book_fulfillment_backend::tokens::issue_token_at(
        &db.store,
        &order.id,
        "1",
        chrono::Utc::now() - Duration::days(31),
    )
    .unwrap();
    let state = offline_state(&db.store);

    let response = send(&state, get(&format!("/download/{}", issued.token.token))).await;

    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(body_json(response).await["error"], "token_expired");
}

#[tokio::test]
async fn test_pending_order_payment_required() {
    let db = setup_test_db();
    create_test_book(&db.store, sellable_book("1"));
    let (order, _) = db
        .store
        .insert_order_if_absent(&NewOrder {
            customer_email: "buyer@example.com".into(),
            customer_name: None,
            transaction_id: "cs_dl_pending".into(),
            provider: "paypal".into(),
            book_id: "1".into(),
            format_type: FormatType::Ebook,
            amount_cents: 999,
            currency: "usd".into(),
            status: OrderStatus::Pending,
        })
        .unwrap();
    let issued = book_fulfillment_backend::tokens::issue_token(&db.store, &order.id, "1").unwrap();
    let state = offline_state(&db.store);

    let response = send(&state, get(&format!("/download/{}", issued.token.token))).await;

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body_json(response).await["error"], "payment_not_completed");
}

#[tokio::test]
async fn test_missing_file_not_found() {
    let db = setup_test_db();
    let book = create_test_book(&db.store, sellable_book("1"));
    let (_, token) = create_fulfilled_order(&db.store, "1", "cs_dl_nofile");
    create_test_book(
        &db.store,
        Book {
            ebook_file_ref: Some("  ".to_string()),
            ..book
        },
    );
    let state = offline_state(&db.store);

    let response = send(&state, get(&format!("/download/{}", token.token))).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "file_unavailable");
}

#[tokio::test]
async fn test_status_endpoint_reports_usage() {
    let db = setup_test_db();
    create_test_book(&db.store, sellable_book("1"));
    let (_, token) = create_fulfilled_order(&db.store, "1", "cs_dl_status");
    let state = offline_state(&db.store);

    send(&state, get(&format!("/download/{}", token.token))).await;
    send(&state, get(&format!("/download/{}", token.token))).await;

    let response = send(&state, get(&format!("/api/download/{}", token.token))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["downloadCount"], 2);
    assert_eq!(body["maxDownloads"], 5);
    assert_eq!(body["remainingDownloads"], 3);
    assert_eq!(body["expired"], false);
    assert!(body["expiresAt"].is_string());

    assert_eq!(
        db.store.get_token(&token.token).unwrap().unwrap().download_count,
        2,
        "status lookups must not consume downloads"
    );
}

#[tokio::test]
async fn test_status_endpoint_unknown_token() {
    let db = setup_test_db();
    let state = offline_state(&db.store);

    let response = send(&state, get("/api/download/nope")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(response).await,
        json!({ "error": "invalid_token", "message": "This download link is not valid." })
    );
}

#[tokio::test]
async fn test_end_to_end_purchase_and_download() {
    let db = setup_test_db();
    create_test_book(&db.store, sellable_book("1"));
    let state = offline_state(&db.store);

    let response = send(&state, signed_stripe_request(&stripe_completed_event("cs_e2e", "1"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = db.store.get_order_by_transaction("cs_e2e").unwrap().unwrap();
    let token = db.store.get_token_for_order(&order.id).unwrap().unwrap();

    let response = send(&state, get(&format!("/download/{}", token.token))).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}
