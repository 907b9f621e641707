//! Admin-only handlers. Routed behind `require_admin`.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::models::*;
use crate::services::reporting::{Dashboard, FraudOverview, PayoutOverview, ReferralOverview};
use crate::services::PayoutSweep;
use crate::utils::response::{ApiResponse, AppError, ValidatedJson};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CommunityRewardRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 200))]
    pub reason: String,
}

pub async fn run_payout_sweep(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<PayoutSweep>>, AppError> {
    let sweep = state.payouts.check_and_process_payouts(Utc::now()).await?;
    Ok(Json(ApiResponse::success(sweep)))
}

pub async fn approve_payout(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<i64>,
    body: Option<Json<ApprovePayoutRequest>>,
) -> Result<Json<ApiResponse<PayoutRequest>>, AppError> {
    let notes = body.and_then(|Json(req)| req.notes);
    let request = state.payouts.approve_payout(request_id, notes, Utc::now()).await?;
    Ok(Json(ApiResponse::success(request)))
}

pub async fn approve_conversion(
    State(state): State<Arc<AppState>>,
    Path(conversion_id): Path<i64>,
) -> Result<Json<ApiResponse<AffiliateConversion>>, AppError> {
    let conversion = state.earnings.approve_conversion(conversion_id, Utc::now()).await?;
    Ok(Json(ApiResponse::success(conversion)))
}

/// Rejecting reverses the commission credited when the conversion came in.
pub async fn reject_conversion(
    State(state): State<Arc<AppState>>,
    Path(conversion_id): Path<i64>,
    body: Option<Json<ReviewConversionRequest>>,
) -> Result<Json<ApiResponse<AffiliateConversion>>, AppError> {
    let reason = body.and_then(|Json(req)| req.reason);
    let conversion = state
        .earnings
        .reject_conversion(conversion_id, reason.as_deref(), Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(conversion)))
}

pub async fn approve_content(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<ApproveContentRequest>,
) -> Result<Json<ApiResponse<ViralContent>>, AppError> {
    let content = state
        .earnings
        .approve_content(req.content_id, req.performance_metrics, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(content)))
}

pub async fn community_reward(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    ValidatedJson(req): ValidatedJson<CommunityRewardRequest>,
) -> Result<Json<ApiResponse<UserEarnings>>, AppError> {
    let earnings = state
        .earnings
        .credit_community(user_id, req.amount, &req.reason, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(earnings)))
}

pub async fn fraud_check(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<FraudAssessment>>, AppError> {
    let assessment = state.fraud.detect_multi_account_fraud(user_id, Utc::now()).await?;
    Ok(Json(ApiResponse::success(assessment)))
}

pub async fn trust_score(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<RiskProfile>>, AppError> {
    let profile = state.fraud.risk_profile(user_id, Utc::now()).await?;
    Ok(Json(ApiResponse::success(profile)))
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Dashboard>>, AppError> {
    let dashboard = state.reporting.dashboard(Utc::now()).await?;
    Ok(Json(ApiResponse::success(dashboard)))
}

pub async fn referral_overview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<ReferralOverview>>, AppError> {
    let overview = state.reporting.referral_overview().await?;
    Ok(Json(ApiResponse::success(overview)))
}

pub async fn payout_overview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<PayoutOverview>>, AppError> {
    let overview = state.reporting.payout_overview().await?;
    Ok(Json(ApiResponse::success(overview)))
}

pub async fn fraud_overview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<FraudOverview>>, AppError> {
    let overview = state.reporting.fraud_overview().await?;
    Ok(Json(ApiResponse::success(overview)))
}
