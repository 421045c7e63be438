//! API Integration Tests
//!
//! Drives the assembled router end-to-end over in-memory adapters.

use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::util::ServiceExt;

use cart_service::domain::Cart;
use cart_service::persistence::CartRepository;

mod common;

use common::{body_bytes, body_json, empty_request, json_request, setup_test_app};

#[tokio::test]
async fn test_fresh_add_creates_cart() {
    let t = setup_test_app();

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 2, "unit_price": 500 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;

    assert_eq!(body["user_id"], "u1");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["subtotal"], 1000);
    // Fresh cart created at version 1, then mutated
    assert_eq!(body["version"], 2);
    assert_eq!(body["item_count"], 1);
    assert_eq!(body["total_quantity"], 2);
    assert_eq!(body["total_price"], 1000);

    assert_eq!(
        t.recorder.event_types(),
        vec!["cart.created", "cart.item_added"]
    );
}

#[tokio::test]
async fn test_adding_same_product_merges_lines() {
    let t = setup_test_app();

    t.router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 2, "unit_price": 500 }),
        ))
        .await
        .unwrap();

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 3, "unit_price": 600 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;

    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["quantity"], 5);
    assert_eq!(body["items"][0]["unit_price"], 600);
    assert_eq!(body["items"][0]["subtotal"], 3000);
}

#[tokio::test]
async fn test_version_checked_update_success() {
    let t = setup_test_app();

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 2, "unit_price": 500 }),
        ))
        .await
        .unwrap();
    let cart = body_json(response).await;
    let item_id = cart["items"][0]["item_id"].as_str().unwrap().to_string();
    let version = cart["version"].as_i64().unwrap();

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/v1/cart/u1/items/{item_id}"),
            &json!({ "quantity": 4, "version": version }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["items"][0]["quantity"], 4);
    assert_eq!(body["version"], version + 1);
}

#[tokio::test]
async fn test_version_checked_update_conflict() {
    let t = setup_test_app();

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 2, "unit_price": 500 }),
        ))
        .await
        .unwrap();
    let cart = body_json(response).await;
    let item_id = cart["items"][0]["item_id"].as_str().unwrap().to_string();
    let version = cart["version"].as_i64().unwrap();

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/v1/cart/u1/items/{item_id}"),
            &json!({ "quantity": 4, "version": version - 1 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(body["details"]["expected_version"], version - 1);
    assert_eq!(body["details"]["current_version"], version);
}

#[tokio::test]
async fn test_clear_cart_leaves_empty_cart() {
    let t = setup_test_app();

    t.router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 2, "unit_price": 500 }),
        ))
        .await
        .unwrap();

    let response = t
        .router
        .clone()
        .oneshot(empty_request("DELETE", "/v1/cart/u1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = t
        .router
        .clone()
        .oneshot(empty_request("GET", "/v1/cart/u1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 0);
    assert_eq!(body["total_price"], 0);
}

#[tokio::test]
async fn test_guest_merge_keeps_higher_quantity() {
    let t = setup_test_app();

    // Seed guest g1 with p1 qty 5, user u1 with p1 qty 2 and p2 qty 1
    t.router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/g1/items",
            &json!({ "product_id": "p1", "quantity": 5, "unit_price": 500 }),
        ))
        .await
        .unwrap();
    t.router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 2, "unit_price": 500 }),
        ))
        .await
        .unwrap();
    t.router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p2", "quantity": 1, "unit_price": 300 }),
        ))
        .await
        .unwrap();

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/merge",
            &json!({ "guest_id": "g1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);

    let quantity_of = |product: &str| {
        items
            .iter()
            .find(|item| item["product_id"] == product)
            .map(|item| item["quantity"].as_i64().unwrap())
    };
    // Max rule, not sum
    assert_eq!(quantity_of("p1"), Some(5));
    assert_eq!(quantity_of("p2"), Some(1));

    // Guest cart is gone
    let response = t
        .router
        .clone()
        .oneshot(empty_request("GET", "/v1/cart/g1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_remove_item_twice_returns_not_found() {
    let t = setup_test_app();

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 1, "unit_price": 100 }),
        ))
        .await
        .unwrap();
    let cart = body_json(response).await;
    let item_id = cart["items"][0]["item_id"].as_str().unwrap().to_string();

    let response = t
        .router
        .clone()
        .oneshot(empty_request(
            "DELETE",
            &format!("/v1/cart/u1/items/{item_id}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .router
        .clone()
        .oneshot(empty_request(
            "DELETE",
            &format!("/v1/cart/u1/items/{item_id}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "ITEM_NOT_FOUND");
}

#[tokio::test]
async fn test_get_missing_cart_returns_not_found() {
    let t = setup_test_app();

    let response = t
        .router
        .clone()
        .oneshot(empty_request("GET", "/v1/cart/nobody"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "CART_NOT_FOUND");
}

#[tokio::test]
async fn test_get_expired_cart_returns_gone() {
    let t = setup_test_app();

    let mut cart = Cart::new("u1");
    cart.expires_at = chrono::Utc::now() - chrono::Duration::hours(1);
    t.repo.save_cart(&cart).await.unwrap();

    let response = t
        .router
        .clone()
        .oneshot(empty_request("GET", "/v1/cart/u1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GONE);
    let body = body_json(response).await;
    assert_eq!(body["code"], "CART_EXPIRED");
}

#[tokio::test]
async fn test_quantity_boundaries() {
    let t = setup_test_app();

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 0, "unit_price": 100 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_QUANTITY");

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 100, "unit_price": 100 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["code"],
        "QUANTITY_LIMIT_EXCEEDED"
    );
}

#[tokio::test]
async fn test_unknown_fields_rejected() {
    let t = setup_test_app();

    let response = t
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/cart/u1/items",
            &json!({ "product_id": "p1", "quantity": 1, "unit_price": 100, "extra": true }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_invalid_user_id_rejected() {
    let t = setup_test_app();

    let response = t
        .router
        .clone()
        .oneshot(empty_request("GET", "/v1/cart/bad%20id%21"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_idempotent_replay_returns_identical_response() {
    let t = setup_test_app();
    let payload = json!({ "product_id": "p1", "quantity": 2, "unit_price": 500 });

    let request = |key: &str| {
        Request::builder()
            .method("POST")
            .uri("/v1/cart/u1/items")
            .header("content-type", "application/json")
            .header("x-user-id", "u1")
            .header("idempotency-key", key)
            .body(axum::body::Body::from(payload.to_string()))
            .unwrap()
    };

    let first = t.router.clone().oneshot(request("key-1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().get("x-idempotent-replayed").is_none());
    let first_body = body_bytes(first).await;

    let second = t.router.clone().oneshot(request("key-1")).await.unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(
        second.headers().get("x-idempotent-replayed").unwrap(),
        "true"
    );
    let second_body = body_bytes(second).await;

    // Byte-identical replay; the cart was not mutated twice
    assert_eq!(first_body, second_body);
    let cart = t.repo.get_cart("u1").await.unwrap();
    assert_eq!(cart.total_quantity(), 2);
}

#[tokio::test]
async fn test_idempotency_key_with_different_body_conflicts() {
    let t = setup_test_app();

    let request = |quantity: i64| {
        Request::builder()
            .method("POST")
            .uri("/v1/cart/u1/items")
            .header("content-type", "application/json")
            .header("x-user-id", "u1")
            .header("idempotency-key", "key-1")
            .body(axum::body::Body::from(
                json!({ "product_id": "p1", "quantity": quantity, "unit_price": 500 }).to_string(),
            ))
            .unwrap()
    };

    let first = t.router.clone().oneshot(request(2)).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = t.router.clone().oneshot(request(3)).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["code"], "IDEMPOTENCY_CONFLICT");
}

#[tokio::test]
async fn test_failed_responses_are_not_cached() {
    let t = setup_test_app();

    let request = |quantity: i64| {
        Request::builder()
            .method("POST")
            .uri("/v1/cart/u1/items")
            .header("content-type", "application/json")
            .header("x-user-id", "u1")
            .header("idempotency-key", "key-1")
            .body(axum::body::Body::from(
                json!({ "product_id": "p1", "quantity": quantity, "unit_price": 500 }).to_string(),
            ))
            .unwrap()
    };

    // Invalid request fails and must not be replayed
    let first = t.router.clone().oneshot(request(0)).await.unwrap();
    assert_eq!(first.status(), StatusCode::BAD_REQUEST);

    // A retry with a valid body under the same key goes through
    let second = t.router.clone().oneshot(request(2)).await.unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    assert!(second.headers().get("x-idempotent-replayed").is_none());
}

#[tokio::test]
async fn test_rate_limit_rejects_after_burst() {
    let mut config = common::test_config();
    config.rate_limit_rps = 1;
    config.rate_limit_burst = 2;
    let t = common::setup_test_app_with_config(config);

    let request = || {
        Request::builder()
            .method("GET")
            .uri("/v1/cart/u1")
            .header("x-user-id", "u1")
            .body(axum::body::Body::empty())
            .unwrap()
    };

    // Burst of 2 is admitted (404 since the cart does not exist)
    for _ in 0..2 {
        let response = t.router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let response = t.router.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("retry-after").unwrap(), "1");
    assert_eq!(body_json(response).await["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_request_id_echoed() {
    let t = setup_test_app();

    let request = Request::builder()
        .method("GET")
        .uri("/v1/cart/u1")
        .header("x-request-id", "req-42")
        .body(axum::body::Body::empty())
        .unwrap();

    let response = t.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");

    // Without the header one is issued
    let response = t
        .router
        .clone()
        .oneshot(empty_request("GET", "/v1/cart/u1"))
        .await
        .unwrap();
    assert!(response.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn test_health_and_readiness() {
    let t = setup_test_app();

    let response = t
        .router
        .clone()
        .oneshot(empty_request("GET", "/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    let response = t
        .router
        .clone()
        .oneshot(empty_request("GET", "/ready"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ready");

    // The container agrees with the endpoint
    t.app.readiness_check().await.unwrap();
}

#[tokio::test]
async fn test_event_metadata_carries_request_context() {
    let t = setup_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/v1/cart/u1/items")
        .header("content-type", "application/json")
        .header("x-request-id", "req-7")
        .header("x-user-id", "u1")
        .body(axum::body::Body::from(
            json!({ "product_id": "p1", "quantity": 1, "unit_price": 100 }).to_string(),
        ))
        .unwrap();

    let response = t.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let events = t.recorder.events();
    assert_eq!(events.len(), 2);
    for event in &events {
        assert_eq!(event.source, "cart-service");
        assert_eq!(event.data_version, "1.0");
        assert_eq!(event.metadata.user_id.as_deref(), Some("u1"));
        assert_eq!(event.metadata.correlation_id.as_deref(), Some("req-7"));
    }
}
