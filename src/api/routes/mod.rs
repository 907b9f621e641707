use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::auth::{auth_middleware, require_admin};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no auth required)
    let public_routes = Router::new()
        // Users
        .route("/users", post(handlers::users::create_user))
        .route("/users/:user_id", get(handlers::users::get_user))
        // Affiliate
        .route("/affiliate/programs", get(handlers::affiliate::list_programs))
        .route("/affiliate/link/create", post(handlers::affiliate::create_link))
        .route("/affiliate/click/:link_code", post(handlers::affiliate::record_click))
        .route("/affiliate/conversion", post(handlers::affiliate::record_conversion))
        .route("/affiliate/earnings/:user_id", get(handlers::affiliate::get_earnings))
        .route("/affiliate/stats/:user_id", get(handlers::affiliate::get_stats))
        .route("/affiliate/payout/request", post(handlers::affiliate::request_payout))
        .route("/affiliate/viral-content/submit", post(handlers::affiliate::submit_content))
        // Referral
        .route("/affiliate/referral/track", post(handlers::referral::track_referral))
        .route("/affiliate/referral/convert", post(handlers::referral::convert_referral))
        // Banking
        .route("/banking/payout-schedule", post(handlers::banking::upsert_schedule))
        .route("/banking/payout-schedule/:user_id", get(handlers::banking::get_schedule))
        .route("/banking/processors", get(handlers::banking::list_processors));

    // Admin routes (admin token required)
    let admin_routes = Router::new()
        // Payouts
        .route("/banking/process-scheduled-payouts", post(handlers::banking::process_scheduled_payouts))
        .route("/admin/payouts/sweep", post(handlers::admin::run_payout_sweep))
        .route("/admin/payouts/:request_id/approve", post(handlers::admin::approve_payout))
        // Review
        .route(
            "/admin/affiliate/conversions/:conversion_id/approve",
            post(handlers::admin::approve_conversion),
        )
        .route(
            "/admin/affiliate/conversions/:conversion_id/reject",
            post(handlers::admin::reject_conversion),
        )
        .route("/admin/viral-content/approve", post(handlers::admin::approve_content))
        .route("/admin/users/:user_id/community-reward", post(handlers::admin::community_reward))
        // Fraud
        .route("/admin/users/:user_id/fraud-check", post(handlers::admin::fraud_check))
        .route("/admin/users/:user_id/trust-score", get(handlers::admin::trust_score))
        // Reports
        .route("/admin/dashboard", get(handlers::admin::dashboard))
        .route("/admin/referrals", get(handlers::admin::referral_overview))
        .route("/admin/payouts", get(handlers::admin::payout_overview))
        .route("/admin/fraud-detection", get(handlers::admin::fraud_overview))
        .route("/banking/financial-summary", get(handlers::banking::financial_summary))
        .route("/banking/compliance-summary", get(handlers::banking::compliance_summary))
        .route("/banking/ledger", get(handlers::banking::ledger))
        .layer(axum_middleware::from_fn(require_admin))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::auth::{JwtManager, Role};
    use crate::config::AppConfig;
    use crate::store::{LedgerStore, MemoryLedgerStore};
    use crate::{build_app, AppState};

    async fn create_test_app() -> (Router, AppConfig) {
        let config = AppConfig::for_memory();
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::with_default_programs().await.unwrap());
        let state = Arc::new(AppState::new(config.clone(), store, None));
        (build_app(state), config)
    }

    fn token_for(config: &AppConfig, role: Role) -> String {
        JwtManager::new(&config.jwt_secret, config.jwt_expiry_seconds)
            .generate_token("tester", role)
            .unwrap()
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn signup(app: &Router, name: &str, referral_code: Option<&str>) -> Value {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/users",
            Some(json!({
                "email": format!("{}@bloom.example", name),
                "username": name,
                "referral_code": referral_code,
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["data"].clone()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = create_test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_signup_with_referral_code_and_convert() {
        let (app, _) = create_test_app().await;
        let mentor = signup(&app, "mentor", None).await;
        let code = mentor["referral_code"].as_str().unwrap().to_string();
        let mentee = signup(&app, "mentee", Some(&code)).await;
        assert_eq!(mentee["referred_by_id"], mentor["id"]);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/affiliate/referral/convert",
            Some(json!({ "referred_id": mentee["id"], "subscription_type": "premium" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"]["referrer_tier"], "bronze");
        assert_eq!(body["data"]["awards"].as_array().unwrap().len(), 1);

        let uri = format!("/api/affiliate/earnings/{}", mentor["id"]);
        let (status, body) = send(&app, Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["referral_count"], 1);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/affiliate/referral/convert",
            Some(json!({ "referred_id": mentee["id"], "subscription_type": "premium" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (app, _) = create_test_app().await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/users",
            Some(json!({ "email": "not-an-email", "username": "someone" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = send(&app, Method::GET, "/api/users/999", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/affiliate/referral/convert",
            Some(json!({ "referred_id": 999, "subscription_type": "premium" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_payout_request_validation_over_http() {
        let (app, config) = create_test_app().await;
        let user = signup(&app, "saver", None).await;
        let admin = token_for(&config, Role::Admin);

        let uri = format!("/api/admin/users/{}/community-reward", user["id"]);
        let (status, _) = send(
            &app,
            Method::POST,
            &uri,
            Some(json!({ "amount": "40", "reason": "circle host" })),
            Some(&admin),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let request = |amount: &str| {
            json!({
                "user_id": user["id"],
                "amount": amount,
                "payment_method": { "type": "paypal", "email": "saver@bloom.example" },
            })
        };
        let (status, body) = send(&app, Method::POST, "/api/affiliate/payout/request", Some(request("10")), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        let (status, _) = send(&app, Method::POST, "/api/affiliate/payout/request", Some(request("50")), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = send(&app, Method::POST, "/api/affiliate/payout/request", Some(request("30")), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "pending");

        let uri = format!("/api/admin/payouts/{}/approve", body["data"]["id"]);
        let (status, body) = send(&app, Method::POST, &uri, Some(json!({ "notes": "ok" })), Some(&admin)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "approved");
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_bad_requests() {
        let (app, _) = create_test_app().await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/affiliate/referral/convert",
            Some(json!({ "subscription_type": "premium" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/affiliate/referral/track",
            Some(json!({ "referrer_id": "one", "referred_id": 2 })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_payout_request_with_method_and_details() {
        let (app, config) = create_test_app().await;
        let user = signup(&app, "wren", None).await;
        let admin = token_for(&config, Role::Admin);

        let uri = format!("/api/admin/users/{}/community-reward", user["id"]);
        let (status, _) = send(
            &app,
            Method::POST,
            &uri,
            Some(json!({ "amount": "40", "reason": "circle host" })),
            Some(&admin),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/affiliate/payout/request",
            Some(json!({
                "user_id": user["id"],
                "amount": 30,
                "payment_method": "paypal",
                "payment_details": { "email": "wren@bloom.example" },
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["data"]["payout_method"]["type"], "paypal");
        assert_eq!(body["data"]["payout_method"]["email"], "wren@bloom.example");
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin_token() {
        let (app, config) = create_test_app().await;

        let (status, _) = send(&app, Method::GET, "/api/admin/dashboard", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, Method::GET, "/api/admin/dashboard", None, Some("garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let user_token = token_for(&config, Role::User);
        let (status, _) = send(&app, Method::GET, "/api/admin/dashboard", None, Some(&user_token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin_token = token_for(&config, Role::Admin);
        let (status, body) = send(&app, Method::GET, "/api/admin/dashboard", None, Some(&admin_token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_users"], 0);

        let (status, body) = send(&app, Method::POST, "/api/admin/payouts/sweep", None, Some(&admin_token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["processed"], 0);
    }

    #[tokio::test]
    async fn test_public_catalogues() {
        let (app, _) = create_test_app().await;

        let (status, body) = send(&app, Method::GET, "/api/affiliate/programs", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 5);

        let (status, body) = send(&app, Method::GET, "/api/banking/processors", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["name"], "stripe");
    }
}
