//! Payout schedules, processors, scheduled runs and financial reports.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::*;
use crate::services::reporting::{ComplianceSummary, FinancialSummary};
use crate::services::PayoutSweep;
use crate::utils::response::{ApiResponse, AppError, ValidatedJson};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub async fn upsert_schedule(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<UpsertScheduleRequest>,
) -> Result<Json<ApiResponse<PayoutSchedule>>, AppError> {
    let schedule = state.payouts.upsert_schedule(req, Utc::now()).await?;
    Ok(Json(ApiResponse::success(schedule)))
}

pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<PayoutSchedule>>, AppError> {
    let schedule = state.payouts.get_schedule(user_id).await?;
    Ok(Json(ApiResponse::success(schedule)))
}

pub async fn list_processors() -> Json<ApiResponse<Vec<PaymentProcessor>>> {
    Json(ApiResponse::success(PaymentProcessor::catalogue()))
}

pub async fn process_scheduled_payouts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<PayoutSweep>>, AppError> {
    let sweep = state.payouts.process_scheduled_payouts(Utc::now()).await?;
    Ok(Json(ApiResponse::success(sweep)))
}

pub async fn financial_summary(
    State(state): State<Arc<AppState>>,
    Query(period): Query<PeriodQuery>,
) -> Result<Json<ApiResponse<FinancialSummary>>, AppError> {
    let summary = state
        .reporting
        .financial_summary(period.from, period.to, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn compliance_summary(
    State(state): State<Arc<AppState>>,
    Query(period): Query<PeriodQuery>,
) -> Result<Json<ApiResponse<ComplianceSummary>>, AppError> {
    let summary = state
        .reporting
        .compliance_summary(period.from, period.to, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn ledger(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<LedgerFilter>,
) -> Result<Json<ApiResponse<Vec<LedgerEntry>>>, AppError> {
    let entries = state.reporting.ledger(&filter).await?;
    Ok(Json(ApiResponse::success(entries)))
}
