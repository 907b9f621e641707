use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::models::{CreateUserRequest, UserProfile};
use crate::utils::response::{ApiResponse, AppError, ValidatedJson};
use crate::AppState;

/// Signup; a referral code links the new user to their referrer.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserProfile>>), AppError> {
    let user = state.referrals.register_user(req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(user.into()))))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<UserProfile>>, AppError> {
    let user = state.referrals.get_user(user_id).await?;
    Ok(Json(ApiResponse::success(user.into())))
}
