//! Read-only product catalog.

mod common;

use axum::http::Method;
use common::{response_json, TestApp};
use rust_decimal_macros::dec;

#[tokio::test]
async fn products_are_listed_newest_first() {
    let app = TestApp::new().await;
    let older = app.seed_product("머그컵", 10_000, dec!(0.10), 10).await;
    let newer = app.seed_product("텀블러", 25_000, dec!(0), 3).await;

    let response = app
        .request(Method::GET, "/api/v1/products?page=1&per_page=1", None, None)
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["pagination"]["total"], 2);
    assert_eq!(body["pagination"]["total_pages"], 2);
    assert_eq!(body["data"][0]["id"], newer.id);

    let body = response_json(
        app.request(Method::GET, "/api/v1/products?page=2&per_page=1", None, None)
            .await,
    )
    .await;
    assert_eq!(body["data"][0]["id"], older.id);
}

#[tokio::test]
async fn product_detail_and_missing_product() {
    let app = TestApp::new().await;
    let item = app.seed_product("머그컵", 10_000, dec!(0.10), 10).await;

    let response = app
        .request(Method::GET, &format!("/api/v1/products/{}", item.id), None, None)
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["product_name"], "머그컵");
    assert_eq!(body["product_value"], 10_000);
    assert_eq!(body["product_stock"], 10);

    let response = app
        .request(Method::GET, "/api/v1/products/9999", None, None)
        .await;
    assert_eq!(response.status(), 404);
}
