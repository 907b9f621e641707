//! Referral tracking and conversion handlers

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::models::{ConvertReferralRequest, ConvertReferralResponse, ReferralTracking, TrackReferralRequest};
use crate::utils::response::{ApiResponse, AppError, ValidatedJson};
use crate::AppState;

pub async fn track_referral(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<TrackReferralRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ReferralTracking>>), AppError> {
    let referral = state.referrals.track_referral(req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(referral))))
}

/// The referred user paid; awards the chain bonus.
pub async fn convert_referral(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<ConvertReferralRequest>,
) -> Result<Json<ApiResponse<ConvertReferralResponse>>, AppError> {
    let bonus = state
        .referrals
        .convert_referral(req.referred_id, req.subscription_type, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(bonus.into())))
}
