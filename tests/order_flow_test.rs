mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use storefront_api::auth::Role;
use storefront_api::entities::user;
use uuid::Uuid;

fn order_payload(product_a: Uuid, product_b: Uuid) -> Value {
    json!({
        "items": [
            {
                "product_id": product_a,
                "name": "Trail Runner",
                "image": "/images/trail-runner.jpg",
                "unit_price": "24.99",
                "size": "42",
                "color": "black",
                "quantity": 1
            },
            {
                "product_id": product_b,
                "name": "Wool Socks",
                "image": "/images/wool-socks.jpg",
                "unit_price": "12.99",
                "size": "M",
                "color": "grey",
                "quantity": 1
            }
        ],
        "shipping_address": {
            "full_name": "Asha Rao",
            "phone": "+91-9000000000",
            "street": "12 Lake View Road",
            "city": "Bengaluru",
            "state": "Karnataka",
            "postal_code": "560001",
            "country": "IN"
        },
        "pricing": {
            "items_price": "37.98",
            "shipping_price": "0",
            "tax_price": "1.90",
            "discount": "0",
            "total_price": "39.88"
        }
    })
}

fn with_payment(mut payload: Value, app: &TestApp, gateway_order_id: &str, payment_id: &str) -> Value {
    let signature = app.signature_for(gateway_order_id, payment_id);
    let object = payload.as_object_mut().unwrap();
    object.insert("gateway_order_id".into(), json!(gateway_order_id));
    object.insert("gateway_payment_id".into(), json!(payment_id));
    object.insert("gateway_signature".into(), json!(signature));
    payload
}

#[tokio::test]
async fn gateway_order_is_persisted_as_paid() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("Asha Rao", "asha@example.com").await;
    let shoes = app.seed_product("trail-runner", dec!(24.99), 10).await;
    let socks = app.seed_product("wool-socks", dec!(12.99), 5).await;
    let token = app.token_for(user_id, Role::User);

    let payload = with_payment(order_payload(shoes, socks), &app, "order_abc", "pay_xyz");
    let (status, body) = app
        .request(Method::POST, "/api/v1/orders", Some(&token), Some(payload))
        .await;

    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert_eq!(body["is_paid"], json!(true));
    assert_eq!(body["payment_status"], json!("paid"));
    assert_eq!(body["delivery_status"], json!("processing"));
    assert_eq!(body["gateway_order_id"], json!("order_abc"));
    assert_eq!(body["gateway_payment_id"], json!("pay_xyz"));
    assert!(body["paid_at"].is_string());
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    // Stock decremented for each line item.
    assert_eq!(app.state.inventory_service.get_stock(shoes).await.unwrap(), 9);
    assert_eq!(app.state.inventory_service.get_stock(socks).await.unwrap(), 4);

    // The purchaser's history gained the order id.
    let purchaser = user::Entity::find_by_id(user_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let history: Vec<Uuid> = serde_json::from_value(purchaser.order_history).unwrap();
    let order_id: Uuid = serde_json::from_value(body["id"].clone()).unwrap();
    assert_eq!(history, vec![order_id]);
}

#[tokio::test]
async fn forged_signature_leaves_no_trace() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("Asha Rao", "asha@example.com").await;
    let shoes = app.seed_product("trail-runner", dec!(24.99), 10).await;
    let socks = app.seed_product("wool-socks", dec!(12.99), 5).await;
    let token = app.token_for(user_id, Role::User);

    let mut payload = with_payment(order_payload(shoes, socks), &app, "order_abc", "pay_xyz");
    payload["gateway_signature"] = json!("0".repeat(64));

    let (status, _) = app
        .request(Method::POST, "/api/v1/orders", Some(&token), Some(payload))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing was written: no orders, stock untouched.
    let (status, body) = app
        .request(Method::GET, "/api/v1/orders/mine", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);
    assert_eq!(app.state.inventory_service.get_stock(shoes).await.unwrap(), 10);
    assert_eq!(app.state.inventory_service.get_stock(socks).await.unwrap(), 5);
}

#[tokio::test]
async fn signature_binds_the_id_pair() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("Asha Rao", "asha@example.com").await;
    let shoes = app.seed_product("trail-runner", dec!(24.99), 10).await;
    let socks = app.seed_product("wool-socks", dec!(12.99), 5).await;
    let token = app.token_for(user_id, Role::User);

    // Genuine signature for one pair, replayed against a different order id.
    let mut payload = with_payment(order_payload(shoes, socks), &app, "order_abc", "pay_xyz");
    payload["gateway_order_id"] = json!("order_other");

    let (status, _) = app
        .request(Method::POST, "/api/v1/orders", Some(&token), Some(payload))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cod_order_is_persisted_unpaid() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("Asha Rao", "asha@example.com").await;
    let shoes = app.seed_product("trail-runner", dec!(24.99), 10).await;
    let socks = app.seed_product("wool-socks", dec!(12.99), 5).await;
    let token = app.token_for(user_id, Role::User);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders/cod",
            Some(&token),
            Some(order_payload(shoes, socks)),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert_eq!(body["is_paid"], json!(false));
    assert_eq!(body["payment_status"], json!("pending"));
    assert_eq!(body["payment_method"], json!("cash_on_delivery"));
    assert!(body["paid_at"].is_null());
    assert_eq!(app.state.inventory_service.get_stock(shoes).await.unwrap(), 9);
}

#[tokio::test]
async fn empty_order_is_rejected_on_both_paths() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("Asha Rao", "asha@example.com").await;
    let token = app.token_for(user_id, Role::User);

    let mut payload = order_payload(Uuid::new_v4(), Uuid::new_v4());
    payload["items"] = json!([]);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders/cod",
            Some(&token),
            Some(payload.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");

    let payload = with_payment(payload, &app, "order_abc", "pay_xyz");
    let (status, _) = app
        .request(Method::POST, "/api/v1/orders", Some(&token), Some(payload))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mismatched_pricing_is_rejected() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("Asha Rao", "asha@example.com").await;
    let shoes = app.seed_product("trail-runner", dec!(24.99), 10).await;
    let socks = app.seed_product("wool-socks", dec!(12.99), 5).await;
    let token = app.token_for(user_id, Role::User);

    let mut payload = order_payload(shoes, socks);
    payload["pricing"]["total_price"] = json!("50.00");

    let (status, _) = app
        .request(Method::POST, "/api/v1/orders/cod", Some(&token), Some(payload))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn insufficient_stock_rolls_back_the_whole_order() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("Asha Rao", "asha@example.com").await;
    let shoes = app.seed_product("trail-runner", dec!(24.99), 10).await;
    // Second line item cannot be satisfied.
    let socks = app.seed_product("wool-socks", dec!(12.99), 0).await;
    let token = app.token_for(user_id, Role::User);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/orders/cod",
            Some(&token),
            Some(order_payload(shoes, socks)),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // The first item's decrement was rolled back with everything else.
    assert_eq!(app.state.inventory_service.get_stock(shoes).await.unwrap(), 10);
    let (_, body) = app
        .request(Method::GET, "/api/v1/orders/mine", Some(&token), None)
        .await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn orders_are_private_to_owner_and_admin() {
    let app = TestApp::new().await;
    let owner = app.seed_user("Asha Rao", "asha@example.com").await;
    let other = app.seed_user("Ben Ortiz", "ben@example.com").await;
    let shoes = app.seed_product("trail-runner", dec!(24.99), 10).await;
    let socks = app.seed_product("wool-socks", dec!(12.99), 5).await;

    let owner_token = app.token_for(owner, Role::User);
    let (_, body) = app
        .request(
            Method::POST,
            "/api/v1/orders/cod",
            Some(&owner_token),
            Some(order_payload(shoes, socks)),
        )
        .await;
    let order_id = body["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/orders/{order_id}");

    // Owner sees it.
    let (status, _) = app.request(Method::GET, &uri, Some(&owner_token), None).await;
    assert_eq!(status, StatusCode::OK);

    // A different user does not.
    let other_token = app.token_for(other, Role::User);
    let (status, _) = app.request(Method::GET, &uri, Some(&other_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // An admin does.
    let admin_token = app.token_for(other, Role::Admin);
    let (status, _) = app.request(Method::GET, &uri, Some(&admin_token), None).await;
    assert_eq!(status, StatusCode::OK);

    // No token at all is unauthorized.
    let (status, _) = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_listing_filters_and_paginates() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("Asha Rao", "asha@example.com").await;
    let shoes = app.seed_product("trail-runner", dec!(24.99), 100).await;
    let socks = app.seed_product("wool-socks", dec!(12.99), 100).await;
    let token = app.token_for(user_id, Role::User);

    for _ in 0..3 {
        let (status, _) = app
            .request(
                Method::POST,
                "/api/v1/orders/cod",
                Some(&token),
                Some(order_payload(shoes, socks)),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // Regular users cannot list everything.
    let (status, _) = app
        .request(Method::GET, "/api/v1/orders", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin_token = app.token_for(user_id, Role::Admin);
    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/orders?page=1&per_page=2",
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(3));
    assert_eq!(body["orders"].as_array().unwrap().len(), 2);

    // No order has shipped yet.
    let (status, body) = app
        .request(
            Method::GET,
            "/api/v1/orders?status=shipped",
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(0));
}

#[tokio::test]
async fn delivery_lifecycle_and_delivered_stamp() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("Asha Rao", "asha@example.com").await;
    let shoes = app.seed_product("trail-runner", dec!(24.99), 10).await;
    let socks = app.seed_product("wool-socks", dec!(12.99), 5).await;
    let token = app.token_for(user_id, Role::User);
    let admin_token = app.token_for(user_id, Role::Admin);

    let (_, body) = app
        .request(
            Method::POST,
            "/api/v1/orders/cod",
            Some(&token),
            Some(order_payload(shoes, socks)),
        )
        .await;
    let order_id = body["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/orders/{order_id}/status");

    // Regular users cannot drive the lifecycle.
    let (status, _) = app
        .request(Method::PUT, &uri, Some(&token), Some(json!({"status": "confirmed"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Skipping ahead is rejected.
    let (status, _) = app
        .request(
            Method::PUT,
            &uri,
            Some(&admin_token),
            Some(json!({"status": "delivered"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for step in ["confirmed", "shipped", "out_for_delivery"] {
        let (status, body) = app
            .request(
                Method::PUT,
                &uri,
                Some(&admin_token),
                Some(json!({"status": step})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "step {step}: {body}");
        assert_eq!(body["is_delivered"], json!(false));
        assert!(body["delivered_at"].is_null());
    }

    let (status, body) = app
        .request(
            Method::PUT,
            &uri,
            Some(&admin_token),
            Some(json!({"status": "delivered"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_delivered"], json!(true));
    assert!(body["delivered_at"].is_string());
    let first_delivered_at = body["delivered_at"].clone();

    // Re-sending the current status is rejected without the override...
    let (status, _) = app
        .request(
            Method::PUT,
            &uri,
            Some(&admin_token),
            Some(json!({"status": "delivered"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // ...and is an idempotent no-op with it: the original stamp survives.
    let (status, body) = app
        .request(
            Method::PUT,
            &uri,
            Some(&admin_token),
            Some(json!({"status": "delivered", "force": true})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_delivered"], json!(true));
    assert_eq!(body["delivered_at"], first_delivered_at);

    // Rolling back out of delivered needs the explicit override.
    let (status, _) = app
        .request(
            Method::PUT,
            &uri,
            Some(&admin_token),
            Some(json!({"status": "shipped"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .request(
            Method::PUT,
            &uri,
            Some(&admin_token),
            Some(json!({"status": "shipped", "force": true})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delivery_status"], json!("shipped"));
}

#[tokio::test]
async fn my_orders_come_back_newest_first() {
    let app = TestApp::new().await;
    let user_id = app.seed_user("Asha Rao", "asha@example.com").await;
    let shoes = app.seed_product("trail-runner", dec!(24.99), 100).await;
    let socks = app.seed_product("wool-socks", dec!(12.99), 100).await;
    let token = app.token_for(user_id, Role::User);

    let mut ids = Vec::new();
    for _ in 0..2 {
        let (_, body) = app
            .request(
                Method::POST,
                "/api/v1/orders/cod",
                Some(&token),
                Some(order_payload(shoes, socks)),
            )
            .await;
        ids.push(body["id"].as_str().unwrap().to_string());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let (status, body) = app
        .request(Method::GET, "/api/v1/orders/mine", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<String> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(listed, vec![ids[1].clone(), ids[0].clone()]);
}
