/// Integration tests for the BookHeaven API
///
/// These tests drive the full router:
/// - Authentication and admin checks
/// - Request validation
/// - Catalog management and image replacement
/// - Reviews, likes and shelves
/// - Checkout, payment webhooks and stock reservation
///
/// Tests that need PostgreSQL skip themselves without `DATABASE_URL`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bookheaven_shared::auth::middleware::Role;
use bookheaven_shared::models::order::{CartLine, Order};
use common::{checkout_event, token, unique_user, TestContext};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use tower::Service as _;
use uuid::Uuid;

fn id_of(body: &Value) -> String {
    body["id"].as_str().expect("response has an id").to_string()
}

/// Creates author, work and edition through the admin API
async fn seed_edition(ctx: &TestContext, admin: &str, stock: i32) -> String {
    let (status, author) = ctx
        .send(
            "POST",
            "/v1/authors",
            Some(admin),
            Some(json!({ "name": format!("Author {}", Uuid::new_v4().simple()) })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{author}");

    let (status, work) = ctx
        .send(
            "POST",
            "/v1/works",
            Some(admin),
            Some(json!({
                "title": format!("Work {}", Uuid::new_v4().simple()),
                "first_published_year": 1954,
                "author_ids": [id_of(&author)]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{work}");

    let (status, edition) = ctx
        .send(
            "POST",
            "/v1/editions",
            Some(admin),
            Some(json!({
                "work_id": id_of(&work),
                "format": "paperback",
                "language": "en",
                "price_cents": 1299,
                "stock": stock
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{edition}");

    id_of(&edition)
}

async fn stock_of(ctx: &TestContext, edition_id: &str) -> i64 {
    let (status, body) = ctx
        .send("GET", &format!("/v1/editions/{}", edition_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    body["stock"].as_i64().expect("edition has stock")
}

#[tokio::test]
async fn test_health_reports_degraded_without_database() {
    let ctx = TestContext::offline();

    let (status, body) = ctx.send("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], "disconnected");
    assert_eq!(body["redis"], "disabled");
}

#[tokio::test]
async fn test_me_requires_session() {
    let ctx = TestContext::offline();

    let (status, body) = ctx.send("GET", "/v1/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = ctx.send("GET", "/v1/me", Some("not-a-session"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_returns_session_role() {
    let ctx = TestContext::offline();
    let user = unique_user();

    let (status, body) = ctx
        .send("GET", "/v1/me", Some(&token(&user, Role::Admin)), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], user.as_str());
    assert_eq!(body["role"], "admin");
    assert!(body["profile"].is_null());
}

#[tokio::test]
async fn test_catalog_writes_require_admin() {
    let ctx = TestContext::offline();
    let customer = token(&unique_user(), Role::Customer);

    let (status, body) = ctx
        .send("POST", "/v1/authors", Some(&customer), Some(json!({ "name": "Ursula" })))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_invalid_bodies_rejected_before_database() {
    let ctx = TestContext::offline();
    let admin = token(&unique_user(), Role::Admin);

    let (status, body) = ctx
        .send("POST", "/v1/authors", Some(&admin), Some(json!({ "name": "" })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");

    let request = Request::builder()
        .method("POST")
        .uri("/v1/authors")
        .header("authorization", format!("Bearer {}", admin))
        .header("content-type", "application/json")
        .body(Body::from("{\"name\": "))
        .unwrap();
    let (status, _) = ctx.call(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_checkout_validation() {
    let ctx = TestContext::offline();
    let customer = token(&unique_user(), Role::Customer);

    let (status, _) = ctx
        .send("POST", "/v1/checkout", Some(&customer), Some(json!({ "items": [] })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = ctx
        .send(
            "POST",
            "/v1/checkout",
            Some(&customer),
            Some(json!({ "items": [{ "edition_id": Uuid::new_v4(), "quantity": 0 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_checkout_unavailable_without_payments() {
    let ctx = TestContext::offline_with(false);
    let customer = token(&unique_user(), Role::Customer);

    let (status, body) = ctx
        .send(
            "POST",
            "/v1/checkout",
            Some(&customer),
            Some(json!({ "items": [{ "edition_id": Uuid::new_v4(), "quantity": 1 }] })),
        )
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "service_unavailable");
}

#[tokio::test]
async fn test_webhook_signature_checks() {
    let ctx = TestContext::offline();
    let payload = json!({ "id": "evt_1", "type": "customer.created", "data": { "object": {} } });

    let request = Request::builder()
        .method("POST")
        .uri("/v1/webhooks/stripe")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, _) = ctx.call(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/webhooks/stripe")
        .header("stripe-signature", "t=1700000000,v1=deadbeef")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, _) = ctx.call(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = ctx.deliver_webhook(payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn test_security_headers_and_unknown_route() {
    let ctx = TestContext::offline();

    let request = Request::builder()
        .uri("/v1/does-not-exist")
        .body(Body::empty())
        .unwrap();
    let response = ctx.app.clone().call(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("content-security-policy"));
}

#[tokio::test]
async fn test_catalog_management() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);

    let edition_id = seed_edition(&ctx, &admin, 5).await;

    let (status, detail) = ctx
        .send("GET", &format!("/v1/editions/{}", edition_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["format"], "paperback");
    assert_eq!(detail["currency"], "usd");
    assert_eq!(detail["authors"].as_array().unwrap().len(), 1);
    assert_eq!(detail["rating"]["count"], 0);

    let (status, updated) = ctx
        .send(
            "PATCH",
            &format!("/v1/editions/{}", edition_id),
            Some(&admin),
            Some(json!({ "price_cents": 1499, "publisher": null })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["price_cents"], 1499);

    let (status, _) = ctx
        .send("GET", &format!("/v1/editions/{}", Uuid::new_v4()), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tag_names_are_case_insensitive() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);
    let name = format!("Fantasy {}", Uuid::new_v4().simple());

    let (status, first) = ctx
        .send("POST", "/v1/tags", Some(&admin), Some(json!({ "name": name })))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, second) = ctx
        .send(
            "POST",
            "/v1/tags",
            Some(&admin),
            Some(json!({ "name": name.to_uppercase() })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);
}

#[tokio::test]
async fn test_replacing_image_deletes_old_file() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);
    let edition_id = seed_edition(&ctx, &admin, 1).await;
    let uri = format!("/v1/editions/{}/image", edition_id);
    let first_key = format!("key_{}", Uuid::new_v4().simple());

    let (status, _) = ctx
        .send(
            "PUT",
            &uri,
            Some(&admin),
            Some(json!({ "file_key": first_key, "url": format!("https://utfs.io/f/{}", first_key) })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let second_key = format!("key_{}", Uuid::new_v4().simple());
    let (status, image) = ctx
        .send(
            "PUT",
            &uri,
            Some(&admin),
            Some(json!({ "file_key": second_key, "url": format!("https://utfs.io/f/{}", second_key) })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(image["file_key"], second_key.as_str());

    assert!(ctx.blobs.deleted.lock().unwrap().contains(&first_key));

    let (status, images) = ctx
        .send("GET", &format!("/v1/editions/{}/images", edition_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(images.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_review_flow() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);
    let edition_id = seed_edition(&ctx, &admin, 1).await;
    let author = token(&unique_user(), Role::Customer);
    let reader = token(&unique_user(), Role::Customer);
    let reviews_uri = format!("/v1/editions/{}/reviews", edition_id);

    let (status, review) = ctx
        .send(
            "POST",
            &reviews_uri,
            Some(&author),
            Some(json!({ "rating": 4, "body": "A quiet, careful book." })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let review_id = id_of(&review);

    let (status, _) = ctx
        .send("POST", &reviews_uri, Some(&author), Some(json!({ "rating": 2 })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = ctx
        .send(
            "PATCH",
            &format!("/v1/reviews/{}", review_id),
            Some(&reader),
            Some(json!({ "rating": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, like) = ctx
        .send("POST", &format!("/v1/reviews/{}/like", review_id), Some(&reader), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(like["liked"], true);
    assert_eq!(like["like_count"], 1);

    let (_, page) = ctx.send("GET", &reviews_uri, Some(&reader), None).await;
    assert_eq!(page["items"][0]["liked"], true);

    let (_, page) = ctx.send("GET", &reviews_uri, None, None).await;
    assert!(page["items"][0].get("liked").is_none());

    let (status, rating) = ctx
        .send("GET", &format!("/v1/editions/{}/rating", edition_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rating["count"], 1);
    assert_eq!(rating["average"], 4.0);
}

#[tokio::test]
async fn test_shelves() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let owner_id = unique_user();
    let owner = token(&owner_id, Role::Customer);
    let stranger = token(&unique_user(), Role::Customer);

    let (status, defaults) = ctx.send("GET", "/v1/me/shelves", Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(defaults.as_array().unwrap().len(), 3);

    // A deleted default is not recreated on the next listing
    let read = defaults
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "Read")
        .expect("default Read shelf");
    let (status, _) = ctx
        .send("DELETE", &format!("/v1/shelves/{}", id_of(read)), Some(&owner), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, mine) = ctx.send("GET", "/v1/me/shelves", Some(&owner), None).await;
    assert_eq!(mine.as_array().unwrap().len(), 2);

    let (status, private) = ctx
        .send(
            "POST",
            "/v1/shelves",
            Some(&owner),
            Some(json!({ "name": "Secret favourites", "is_public": false })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let shelf_uri = format!("/v1/shelves/{}", id_of(&private));

    let (status, _) = ctx.send("GET", &shelf_uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ctx.send("GET", &shelf_uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = ctx.send("DELETE", &shelf_uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = ctx
        .send(
            "POST",
            "/v1/shelves",
            Some(&owner),
            Some(json!({ "name": "Summer reading", "is_public": true })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Default shelves start private
    let users_uri = format!("/v1/users/{}/shelves", owner_id);
    let (status, listed) = ctx.send("GET", &users_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["name"], "Summer reading");

    let (_, listed) = ctx.send("GET", &users_uri, Some(&owner), None).await;
    assert_eq!(listed.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_checkout_and_payment() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);
    let edition_id = seed_edition(&ctx, &admin, 5).await;
    let customer = token(&unique_user(), Role::Customer);

    let (status, checkout) = ctx
        .send(
            "POST",
            "/v1/checkout",
            Some(&customer),
            Some(json!({ "items": [
                { "edition_id": edition_id, "quantity": 1 },
                { "edition_id": edition_id, "quantity": 1 }
            ] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{checkout}");
    assert_eq!(checkout["total_cents"], 2598);
    assert_eq!(stock_of(&ctx, &edition_id).await, 3);

    {
        let requests = ctx.gateway.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].lines.len(), 1);
        assert_eq!(requests[0].lines[0].quantity, 2);
    }

    let order_id: Uuid = checkout["order_id"].as_str().unwrap().parse().unwrap();
    let session_id = checkout["session_id"].as_str().unwrap();

    let (status, _) = ctx
        .deliver_webhook(checkout_event("checkout.session.completed", session_id, order_id, "paid"))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Redelivery is acknowledged without changing anything
    let (status, _) = ctx
        .deliver_webhook(checkout_event("checkout.session.completed", session_id, order_id, "paid"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let order_uri = format!("/v1/orders/{}", order_id);
    let (status, detail) = ctx.send("GET", &order_uri, Some(&customer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["status"], "paid");
    assert_eq!(detail["customer_email"], "reader@example.com");
    assert_eq!(detail["items"][0]["quantity"], 2);
    assert_eq!(stock_of(&ctx, &edition_id).await, 3);

    let other = token(&unique_user(), Role::Customer);
    let (status, _) = ctx.send("GET", &order_uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = ctx.send("GET", &order_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_checkout_succeeds_when_webhook_settles_first() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);
    let edition_id = seed_edition(&ctx, &admin, 5).await;
    let customer = token(&unique_user(), Role::Customer);
    *ctx.gateway.settle_early.lock().unwrap() = Some(ctx.db.clone());

    let (status, checkout) = ctx
        .send(
            "POST",
            "/v1/checkout",
            Some(&customer),
            Some(json!({ "items": [{ "edition_id": edition_id, "quantity": 1 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{checkout}");

    let order_uri = format!("/v1/orders/{}", checkout["order_id"].as_str().unwrap());
    let (_, detail) = ctx.send("GET", &order_uri, Some(&customer), None).await;
    assert_eq!(detail["status"], "paid");
    assert_eq!(detail["stripe_session_id"], checkout["session_id"]);
    assert_eq!(stock_of(&ctx, &edition_id).await, 4);
}

#[tokio::test]
async fn test_webhook_before_session_attached() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);
    let edition_id = seed_edition(&ctx, &admin, 3).await;
    let customer_id = unique_user();

    // Order exists but checkout has not stored its session id yet
    let pending = Order::create_pending(
        &ctx.db,
        &customer_id,
        &[CartLine {
            edition_id: edition_id.parse().unwrap(),
            quantity: 2,
        }],
    )
    .await
    .unwrap();
    let session_id = format!("cs_test_{}", Uuid::new_v4().simple());

    let (status, _) = ctx
        .deliver_webhook(checkout_event(
            "checkout.session.completed",
            &session_id,
            pending.order.id,
            "paid",
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let order = Order::find_by_id(&ctx.db, pending.order.id).await.unwrap().unwrap();
    assert_eq!(order.status.as_str(), "paid");
    assert_eq!(order.stripe_session_id.as_deref(), Some(session_id.as_str()));
    assert_eq!(stock_of(&ctx, &edition_id).await, 1);
}

#[tokio::test]
async fn test_redelivered_payment_after_admin_cancel() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);
    let edition_id = seed_edition(&ctx, &admin, 3).await;
    let customer = token(&unique_user(), Role::Customer);

    let (_, checkout) = ctx
        .send(
            "POST",
            "/v1/checkout",
            Some(&customer),
            Some(json!({ "items": [{ "edition_id": edition_id, "quantity": 2 }] })),
        )
        .await;
    let order_id: Uuid = checkout["order_id"].as_str().unwrap().parse().unwrap();
    let session_id = checkout["session_id"].as_str().unwrap();
    let completed = checkout_event("checkout.session.completed", session_id, order_id, "paid");

    let (status, _) = ctx.deliver_webhook(completed.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ctx
        .send(
            "PATCH",
            &format!("/v1/admin/orders/{}", order_id),
            Some(&admin),
            Some(json!({ "status": "cancelled" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock_of(&ctx, &edition_id).await, 3);

    let (status, _) = ctx.deliver_webhook(completed).await;
    assert_eq!(status, StatusCode::OK);

    let (_, detail) = ctx
        .send("GET", &format!("/v1/orders/{}", order_id), Some(&customer), None)
        .await;
    assert_eq!(detail["status"], "cancelled");
    assert_eq!(stock_of(&ctx, &edition_id).await, 3);
}

#[tokio::test]
async fn test_checkout_rejects_insufficient_stock() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);
    let edition_id = seed_edition(&ctx, &admin, 1).await;
    let customer = token(&unique_user(), Role::Customer);

    let (status, _) = ctx
        .send(
            "POST",
            "/v1/checkout",
            Some(&customer),
            Some(json!({ "items": [{ "edition_id": edition_id, "quantity": 2 }] })),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(stock_of(&ctx, &edition_id).await, 1);
    assert!(ctx.gateway.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_gateway_failure_releases_stock() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);
    let edition_id = seed_edition(&ctx, &admin, 4).await;
    let customer = token(&unique_user(), Role::Customer);
    ctx.gateway.fail.store(true, Ordering::SeqCst);

    let (status, body) = ctx
        .send(
            "POST",
            "/v1/checkout",
            Some(&customer),
            Some(json!({ "items": [{ "edition_id": edition_id, "quantity": 3 }] })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "bad_gateway");
    assert_eq!(stock_of(&ctx, &edition_id).await, 4);

    let (_, orders) = ctx.send("GET", "/v1/me/orders", Some(&customer), None).await;
    assert_eq!(orders["items"][0]["status"], "cancelled");
}

#[tokio::test]
async fn test_expired_session_cancels_order() {
    let Some(ctx) = TestContext::with_database().await else {
        return;
    };
    let admin = token(&unique_user(), Role::Admin);
    let edition_id = seed_edition(&ctx, &admin, 2).await;
    let customer = token(&unique_user(), Role::Customer);

    let (status, checkout) = ctx
        .send(
            "POST",
            "/v1/checkout",
            Some(&customer),
            Some(json!({ "items": [{ "edition_id": edition_id, "quantity": 2 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(stock_of(&ctx, &edition_id).await, 0);

    let order_id: Uuid = checkout["order_id"].as_str().unwrap().parse().unwrap();
    let session_id = checkout["session_id"].as_str().unwrap();

    let (status, _) = ctx
        .deliver_webhook(checkout_event("checkout.session.expired", session_id, order_id, "unpaid"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, detail) = ctx
        .send("GET", &format!("/v1/orders/{}", order_id), Some(&customer), None)
        .await;
    assert_eq!(detail["status"], "cancelled");
    assert_eq!(stock_of(&ctx, &edition_id).await, 2);
}
