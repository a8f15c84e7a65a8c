//! 路由集成测试
//!
//! 无数据库的用例使用延迟连接池，请求在触达 SQL 之前即返回；
//! 标记 `#[ignore]` 的用例需要 TEST_DATABASE_URL 指向可写的 PostgreSQL。

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use fake::{Fake, faker::lorem::en::Sentence};
use http_body_util::BodyExt;
use lms_admin_service::{AppState, build_router};
use lms_shared::{
    cache::Cache,
    config::AppConfig,
    database::Database,
    test_utils::{test_database_config, test_redis_config, unique_name},
};
use serde_json::{Value, json};
use sqlx::PgPool;
use tower::ServiceExt;

const TOKEN: &str = "test-antiforgery-token";

fn lazy_app(configure: impl FnOnce(&mut AppConfig)) -> Router {
    let mut config = AppConfig::default();
    configure(&mut config);
    let db = Database::connect_lazy(&test_database_config()).unwrap();
    let cache = Arc::new(Cache::new(&test_redis_config()).unwrap());
    build_router(AppState::new(db.pool().clone(), cache, Arc::new(config)))
}

async fn db_app() -> Router {
    db_app_with_pool().await.0
}

async fn db_app_with_pool() -> (Router, PgPool) {
    let mut config = AppConfig::default();
    config.antiforgery.enabled = false;
    let db = Database::connect(&test_database_config()).await.unwrap();
    db.run_migrations().await.unwrap();
    let cache = Arc::new(Cache::new(&test_redis_config()).unwrap());
    let pool = db.pool().clone();
    (
        build_router(AppState::new(pool.clone(), cache, Arc::new(config))),
        pool,
    )
}

async fn seed_user(pool: &PgPool) -> i64 {
    sqlx::query_scalar("INSERT INTO users (email, full_name) VALUES ($1, $2) RETURNING id")
        .bind(format!("{}@example.com", unique_name("user")))
        .bind(unique_name("name"))
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn seed_completed_payment(pool: &PgPool, user_id: i64, amount_cents: i64) -> i64 {
    let course_id: i64 =
        sqlx::query_scalar("INSERT INTO courses (title, price_cents) VALUES ($1, $2) RETURNING id")
            .bind(unique_name("course"))
            .bind(amount_cents)
            .fetch_one(pool)
            .await
            .unwrap();
    sqlx::query_scalar(
        r#"
        INSERT INTO payments (user_id, course_id, amount_cents, status, payment_method)
        VALUES ($1, $2, $3, 'completed', 'card')
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(amount_cents)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn create_affiliate(app: &Router, user_id: i64) -> i64 {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/admin/affiliates",
            json!({"userId": user_id, "commissionRate": 10.0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["data"]["id"].as_i64().unwrap()
}

async fn default_tax_ids(pool: &PgPool) -> Vec<i64> {
    sqlx::query_scalar("SELECT id FROM tax_settings WHERE is_default")
        .fetch_all(pool)
        .await
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, format!("XSRF-TOKEN={}", TOKEN))
        .header("x-xsrf-token", TOKEN)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = lazy_app(|_| {});
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "lms-admin-service");
}

#[tokio::test]
async fn test_issue_antiforgery_token_sets_cookie() {
    let app = lazy_app(|_| {});
    let response = app
        .oneshot(
            Request::get("/admin/antiforgery/token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("XSRF-TOKEN="));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(!cookie.contains("HttpOnly"));

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["headerName"], "x-xsrf-token");
    let token = body["data"]["token"].as_str().unwrap();
    assert!(cookie.contains(token));
}

#[tokio::test]
async fn test_write_without_token_is_rejected() {
    let app = lazy_app(|_| {});
    let request = Request::post("/admin/badges")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"name": "x", "requiredPoints": 0}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "ANTIFORGERY_REJECTED");
}

#[tokio::test]
async fn test_write_with_mismatched_token_is_rejected() {
    let app = lazy_app(|_| {});
    let request = Request::delete("/admin/comments/1")
        .header(header::COOKIE, format!("XSRF-TOKEN={}", TOKEN))
        .header("x-xsrf-token", "another-token")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_validation_error_after_token_check() {
    let app = lazy_app(|_| {});
    let response = app
        .oneshot(json_request(
            "POST",
            "/admin/badges",
            json!({"name": "Early Bird", "color": "blue", "requiredPoints": 10}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_disabled_antiforgery_lets_writes_through() {
    let app = lazy_app(|config| config.antiforgery.enabled = false);
    let request = Request::post("/admin/flash-sales")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "name": "",
                "courseId": 1,
                "discountPercent": 95,
                "startsAt": "2026-01-01T00:00:00Z",
                "endsAt": "2026-01-02T00:00:00Z"
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_route_returns_not_found() {
    let app = lazy_app(|_| {});
    let response = app
        .oneshot(Request::get("/admin/unknown").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "需要数据库"]
async fn test_badge_toggle_twice_restores_state() {
    let app = db_app().await;
    let name = unique_name("badge");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/admin/badges",
            json!({"name": name, "requiredPoints": 100}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = body_json(response).await["data"]["id"].as_i64().unwrap();

    let toggle = format!("/admin/badges/{}/toggle-active", id);
    let first = body_json(
        app.clone()
            .oneshot(json_request("POST", &toggle, json!({})))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(first["data"]["isActive"], false);

    let second = body_json(
        app.clone()
            .oneshot(json_request("POST", &toggle, json!({})))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(second["data"]["isActive"], true);

    let response = app
        .oneshot(json_request("DELETE", &format!("/admin/badges/{}", id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore = "需要数据库"]
async fn test_resolve_error_log_keeps_first_resolver() {
    let mut config = AppConfig::default();
    config.antiforgery.enabled = false;
    let db = Database::connect(&test_database_config()).await.unwrap();
    db.run_migrations().await.unwrap();
    let message: String = Sentence(3..8).fake();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO error_logs (level, message) VALUES ('error', $1) RETURNING id",
    )
    .bind(&message)
    .fetch_one(db.pool())
    .await
    .unwrap();
    let cache = Arc::new(Cache::new(&test_redis_config()).unwrap());
    let app = build_router(AppState::new(db.pool().clone(), cache, Arc::new(config)));

    let resolve = format!("/admin/error-logs/{}/resolve", id);
    for operator in ["alice", "bob"] {
        let request = Request::post(resolve.as_str())
            .header("x-operator-id", operator)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let resolved_by: Option<String> =
        sqlx::query_scalar("SELECT resolved_by FROM error_logs WHERE id = $1")
            .bind(id)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(resolved_by.as_deref(), Some("alice"));
}

#[tokio::test]
#[ignore = "需要数据库"]
async fn test_missing_badge_returns_not_found() {
    let app = db_app().await;
    let response = app
        .oneshot(
            Request::get("/admin/badges/999999999")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "BADGE_NOT_FOUND");
}

#[tokio::test]
#[ignore = "需要数据库"]
async fn test_delete_affiliate_removes_its_commissions() {
    let (app, pool) = db_app_with_pool().await;
    let user_id = seed_user(&pool).await;
    let affiliate_id = create_affiliate(&app, user_id).await;

    for sale in [10_000, 25_000] {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/admin/affiliates/commissions",
                json!({"affiliateId": affiliate_id, "saleAmountCents": sale}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(json_request(
            "DELETE",
            &format!("/admin/affiliates/{}", affiliate_id),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM affiliate_commissions WHERE affiliate_id = $1")
            .bind(affiliate_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
#[ignore = "需要数据库"]
async fn test_second_commission_for_same_payment_conflicts() {
    let (app, pool) = db_app_with_pool().await;
    let user_id = seed_user(&pool).await;
    let payment_id = seed_completed_payment(&pool, user_id, 19_900).await;
    let affiliate_id = create_affiliate(&app, user_id).await;
    let body = json!({"affiliateId": affiliate_id, "paymentId": payment_id});

    let first = app
        .clone()
        .oneshot(json_request("POST", "/admin/affiliates/commissions", body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_json(first).await["data"]["amountCents"], 1_990);

    let second = app
        .oneshot(json_request("POST", "/admin/affiliates/commissions", body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["code"], "DUPLICATE");

    let booked: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM affiliate_commissions WHERE payment_id = $1")
            .bind(payment_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(booked, 1);
}

#[tokio::test]
#[ignore = "需要数据库"]
async fn test_at_most_one_default_tax_setting() {
    let (app, pool) = db_app_with_pool().await;

    let mut ids = Vec::new();
    for country in ["DE", "FR"] {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/admin/tax-settings",
                json!({
                    "name": unique_name("vat"),
                    "countryCode": country,
                    "rate": 20.0,
                    "isDefault": true
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        ids.push(body_json(response).await["data"]["id"].as_i64().unwrap());
    }
    let (first, second) = (ids[0], ids[1]);
    assert_eq!(default_tax_ids(&pool).await, vec![second]);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/admin/tax-settings/{}", first),
            json!({"isDefault": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(default_tax_ids(&pool).await, vec![first]);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/admin/tax-settings/{}/set-default", second),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(default_tax_ids(&pool).await, vec![second]);

    // 并发切换只允许成功或冲突，不能出现 500
    let (a, b) = tokio::join!(
        app.clone().oneshot(json_request(
            "POST",
            &format!("/admin/tax-settings/{}/set-default", first),
            json!({}),
        )),
        app.clone().oneshot(json_request(
            "POST",
            &format!("/admin/tax-settings/{}/set-default", second),
            json!({}),
        )),
    );
    for response in [a.unwrap(), b.unwrap()] {
        assert!(
            matches!(response.status(), StatusCode::OK | StatusCode::CONFLICT),
            "unexpected status {}",
            response.status()
        );
    }
    assert_eq!(default_tax_ids(&pool).await.len(), 1);
}

#[tokio::test]
#[ignore = "需要数据库"]
async fn test_used_flash_sale_cannot_be_deleted() {
    let (app, pool) = db_app_with_pool().await;
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO flash_sales (name, discount_percent, starts_at, ends_at, used_count)
        VALUES ($1, 30, NOW() - INTERVAL '1 day', NOW() + INTERVAL '1 day', 3)
        RETURNING id
        "#,
    )
    .bind(unique_name("sale"))
    .fetch_one(&pool)
    .await
    .unwrap();

    let response = app
        .oneshot(json_request(
            "DELETE",
            &format!("/admin/flash-sales/{}", id),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "FLASH_SALE_IN_USE");

    let still_there: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM flash_sales WHERE id = $1)")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(still_there);
}
