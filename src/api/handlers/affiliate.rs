//! Affiliate links, conversions, earnings and viral content.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::models::*;
use crate::utils::response::{ApiResponse, AppError, ValidatedJson};
use crate::AppState;

pub async fn list_programs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<AffiliateProgram>>>, AppError> {
    let programs = state.earnings.list_programs().await?;
    Ok(Json(ApiResponse::success(programs)))
}

pub async fn create_link(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreateLinkRequest>,
) -> Result<Json<ApiResponse<UserAffiliateLink>>, AppError> {
    let link = state
        .earnings
        .create_link(req.user_id, req.program_id, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(link)))
}

pub async fn record_click(
    State(state): State<Arc<AppState>>,
    Path(link_code): Path<String>,
) -> Result<Json<ApiResponse<UserAffiliateLink>>, AppError> {
    let link = state.earnings.record_click(&link_code).await?;
    Ok(Json(ApiResponse::success(link)))
}

/// Partner callback for a sale through an affiliate link.
pub async fn record_conversion(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<RecordConversionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AffiliateConversion>>), AppError> {
    if req.conversion_value <= Decimal::ZERO {
        return Err(AppError::bad_request("conversion_value must be positive"));
    }

    let conversion = state
        .earnings
        .record_conversion(&req.link_code, req.conversion_value, req.transaction_id, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(conversion))))
}

pub async fn get_earnings(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<EarningsBreakdown>>, AppError> {
    let breakdown = state.earnings.get_breakdown(user_id, Utc::now()).await?;
    Ok(Json(ApiResponse::success(breakdown)))
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<AffiliateStats>>, AppError> {
    let stats = state.earnings.affiliate_stats(user_id).await?;
    Ok(Json(ApiResponse::success(stats)))
}

pub async fn submit_content(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<SubmitContentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ViralContent>>), AppError> {
    let content = state
        .earnings
        .submit_content(req.user_id, req.content_type, req.platform_url, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(content))))
}

pub async fn request_payout(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreatePayoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PayoutRequest>>), AppError> {
    let request = state
        .payouts
        .request_payout(req.user_id, req.amount, req.payment_method, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(request))))
}
