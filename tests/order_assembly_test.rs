//! Order preview and creation over HTTP.

mod common;

use axum::http::Method;
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait, Set, ActiveModelTrait};
use serde_json::json;
use storefront_api::entities::{product, CartItem, Order};

#[tokio::test]
async fn discounted_cart_prices_into_order() {
    let app = TestApp::new().await;
    let buyer = app.seed_buyer("alice", 0).await;
    let item = app.seed_product("머그컵", 10_000, dec!(0.10), 10).await;
    app.add_to_cart(buyer.id, item.id, 2).await;

    let order = app.create_order(buyer.id, 0).await;

    assert_eq!(order["subtotal"], 18_000);
    assert_eq!(order["product_discount_amount"], 2_000);
    assert_eq!(order["discount_amount"], 0);
    assert_eq!(order["delivery_amount"], 3_500);
    assert_eq!(order["total_payment"], 21_500);
    assert_eq!(order["order_status"], "접수 완료");
    assert_eq!(order["delivery_status"], "배송 준비");

    let lines = order["order_products"].as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["price"], 9_000);
    assert_eq!(lines[0]["amount"], 2);
    assert_eq!(lines[0]["total_price"], 18_000);
    assert_eq!(lines[0]["product_name"], "머그컵");

    let stored = Order::find_by_id(order["id"].as_i64().unwrap() as i32)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.amounts_balance());

    // Creation neither reserves stock nor touches the cart.
    assert_eq!(app.product(item.id).await.product_stock, 10);
    assert_eq!(CartItem::find().count(&*app.state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn overlong_delivery_request_reports_the_field() {
    let app = TestApp::new().await;
    let buyer = app.seed_buyer("dana", 0).await;
    let item = app.seed_product("머그컵", 10_000, dec!(0), 10).await;
    app.add_to_cart(buyer.id, item.id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "used_point": 0, "delivery_request": "문".repeat(300) })),
            Some(buyer.id),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(
        body["details"]["delivery_request"][0],
        "배송 요청사항은 255자를 넘을 수 없습니다."
    );
    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn points_beyond_balance_create_nothing() {
    let app = TestApp::new().await;
    let buyer = app.seed_buyer("bob", 15_000).await;
    let item = app.seed_product("머그컵", 10_000, dec!(0.10), 10).await;
    app.add_to_cart(buyer.id, item.id, 2).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "used_point": 20_000 })),
            Some(buyer.id),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(
        body["details"]["used_point"][0],
        "보유 포인트(15000)보다 많이 사용할 수 없습니다."
    );

    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn points_below_threshold_are_rejected() {
    let app = TestApp::new().await;
    let buyer = app.seed_buyer("carol", 4_999).await;
    let item = app.seed_product("텀블러", 20_000, dec!(0), 10).await;
    app.add_to_cart(buyer.id, item.id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders/preview",
            Some(json!({ "used_point": 1_000 })),
            Some(buyer.id),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert!(body["details"]["used_point"].is_array());
}

#[tokio::test]
async fn free_delivery_starts_at_threshold() {
    let app = TestApp::new().await;
    let buyer = app.seed_buyer("dave", 0).await;
    let exact = app.seed_product("정확히", 50_000, dec!(0), 10).await;
    app.add_to_cart(buyer.id, exact.id, 1).await;

    let response = app
        .request(Method::POST, "/api/v1/orders/preview", Some(json!({})), Some(buyer.id))
        .await;
    assert_eq!(response.status(), 200);
    let preview = response_json(response).await;
    assert_eq!(preview["subtotal"], 50_000);
    assert_eq!(preview["delivery_amount"], 0);
    assert_eq!(preview["total_payment"], 50_000);
    assert_eq!(preview["expected_point"], 500);

    let other = app.seed_buyer("erin", 0).await;
    let short = app.seed_product("한끗차이", 49_999, dec!(0), 10).await;
    app.add_to_cart(other.id, short.id, 1).await;

    let preview = response_json(
        app.request(Method::POST, "/api/v1/orders/preview", Some(json!({})), Some(other.id))
            .await,
    )
    .await;
    assert_eq!(preview["delivery_amount"], 3_500);
    assert_eq!(preview["total_payment"], 53_499);
    assert_eq!(preview["available_point"], 0);
}

#[tokio::test]
async fn order_lines_keep_price_at_order_time() {
    let app = TestApp::new().await;
    let buyer = app.seed_buyer("frank", 0).await;
    let item = app.seed_product("키보드", 30_000, dec!(0), 10).await;
    app.add_to_cart(buyer.id, item.id, 1).await;
    let order = app.create_order(buyer.id, 0).await;

    let mut repriced: product::ActiveModel = app.product(item.id).await.into();
    repriced.product_value = Set(99_000);
    repriced.update(&*app.state.db).await.unwrap();

    let detail = response_json(
        app.request(
            Method::GET,
            &format!("/api/v1/orders/{}", order["id"]),
            None,
            Some(buyer.id),
        )
        .await,
    )
    .await;
    assert_eq!(detail["order_products"][0]["price"], 30_000);
    assert_eq!(detail["total_payment"], order["total_payment"]);
}

#[tokio::test]
async fn address_rules() {
    let app = TestApp::new().await;
    let homeless = app.seed_user("gina", 0).await;
    let item = app.seed_product("양말", 5_000, dec!(0), 10).await;
    app.add_to_cart(homeless.id, item.id, 1).await;

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(json!({})), Some(homeless.id))
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert!(body["details"]["address"].is_array());

    let stranger = app.seed_user("hank", 0).await;
    let foreign = app.seed_address(stranger.id, true).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "address": foreign.id })),
            Some(homeless.id),
        )
        .await;
    assert_eq!(response.status(), 403);

    let own = app.seed_address(homeless.id, false).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "address": own.id, "delivery_request": "문 앞에 놓아주세요" })),
            Some(homeless.id),
        )
        .await;
    assert_eq!(response.status(), 201);
    let order = response_json(response).await;
    assert_eq!(order["address_id"], own.id);
    assert_eq!(order["delivery_request"], "문 앞에 놓아주세요");
}

#[tokio::test]
async fn empty_selection_is_rejected() {
    let app = TestApp::new().await;
    let buyer = app.seed_buyer("ivy", 0).await;

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(json!({})), Some(buyer.id))
        .await;
    assert_eq!(response.status(), 400);
    assert!(response_json(response).await["details"]["cart"].is_array());

    let item = app.seed_product("양말", 5_000, dec!(0), 10).await;
    app.add_to_cart(buyer.id, item.id, 1).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "cart_item_ids": [9_999] })),
            Some(buyer.id),
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn selected_cart_items_only() {
    let app = TestApp::new().await;
    let buyer = app.seed_buyer("jack", 0).await;
    let a = app.seed_product("A", 10_000, dec!(0), 10).await;
    let b = app.seed_product("B", 20_000, dec!(0), 10).await;
    let a_item = app.add_to_cart(buyer.id, a.id, 1).await;
    app.add_to_cart(buyer.id, b.id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "cart_item_ids": [a_item] })),
            Some(buyer.id),
        )
        .await;
    assert_eq!(response.status(), 201);
    let order = response_json(response).await;
    assert_eq!(order["subtotal"], 10_000);
    assert_eq!(order["order_products"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn stock_is_checked_at_creation() {
    let app = TestApp::new().await;
    let buyer = app.seed_buyer("kim", 0).await;
    let item = app.seed_product("한정판", 10_000, dec!(0), 1).await;
    app.add_to_cart(buyer.id, item.id, 2).await;

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(json!({})), Some(buyer.id))
        .await;
    assert_eq!(response.status(), 409);
    let body = response_json(response).await;
    assert_eq!(body["details"]["product_id"], item.id);
    assert_eq!(Order::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn orders_are_listed_newest_first_and_private() {
    let app = TestApp::new().await;
    let buyer = app.seed_buyer("lee", 0).await;
    let item = app.seed_product("컵", 10_000, dec!(0), 10).await;
    app.add_to_cart(buyer.id, item.id, 1).await;
    let first = app.create_order(buyer.id, 0).await;
    let second = app.create_order(buyer.id, 0).await;

    let list = response_json(
        app.request(Method::GET, "/api/v1/orders?page=1&per_page=1", None, Some(buyer.id))
            .await,
    )
    .await;
    assert_eq!(list["pagination"]["total"], 2);
    assert_eq!(list["pagination"]["total_pages"], 2);
    assert_eq!(list["data"][0]["id"], second["id"]);

    let snoop = app.seed_user("mallory", 0).await;
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", first["id"]),
            None,
            Some(snoop.id),
        )
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn identity_header_is_required() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(response.status(), 401);

    let response = app.request(Method::GET, "/api/v1/orders", None, Some(424_242)).await;
    assert_eq!(response.status(), 401);

    let response = app.request(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response_json(response).await["status"], "healthy");
}
