//! HTTP handlers for the lead marketplace API.

use crate::assignment;
use crate::billing;
use crate::config::Config;
use crate::errors::AppError;
use crate::income;
use crate::models::{
    BillingPeriod, BulkInvoiceRequest, CancellationDecisionRequest, CreateLeadRequest,
    CreatePartnerRequest, GenerateInvoiceRequest, Lead, Partner, PartnerAssignment, ServiceType,
    UpdateAssignmentRequest,
};
use crate::notifier::PartnerNotifier;
use crate::settings::{Settings, SettingsStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub settings: SettingsStore,
    pub notifier: Option<PartnerNotifier>,
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "leadmarket-api"
    }))
}

// ============ Leads ============

fn lead_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]+-\d{4,}$").unwrap())
}

fn generate_lead_id(service_type: ServiceType) -> String {
    // Derive a 5-digit suffix from a fresh UUID; collisions bounce off the
    // primary key and surface as a retryable 400.
    let suffix = 10_000 + (Uuid::new_v4().as_u128() % 90_000) as u32;
    format!("{}-{}", service_type.id_prefix(), suffix)
}

/// Creates a lead from an intake form submission. The lead starts out
/// `pending`; assignment is a separate, explicit step.
pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLeadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = match req.id {
        Some(id) => {
            if !lead_id_regex().is_match(&id) {
                return Err(AppError::BadRequest(format!(
                    "Lead ID '{}' must match PREFIX-NNNN (e.g. MOVE-1234)",
                    id
                )));
            }
            id
        }
        None => generate_lead_id(req.service_type),
    };

    let lead = sqlx::query_as::<_, Lead>(
        r#"
        INSERT INTO leads (id, service_type, status, form_data)
        VALUES ($1, $2, 'pending', $3)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(req.service_type.as_str())
    .bind(&req.form_data)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::BadRequest(format!("Lead ID '{}' already exists", id))
        }
        _ => AppError::DatabaseError(e),
    })?;

    tracing::info!("Lead {} created ({})", lead.id, lead.service_type);
    Ok((StatusCode::CREATED, Json(lead)))
}

/// A lead together with its assignment history.
#[derive(Debug, serde::Serialize)]
pub struct LeadDetail {
    #[serde(flatten)]
    pub lead: Lead,
    pub assignments: Vec<PartnerAssignment>,
}

pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<String>,
) -> Result<Json<LeadDetail>, AppError> {
    let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
        .bind(&lead_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))?;

    let assignments = sqlx::query_as::<_, PartnerAssignment>(
        "SELECT * FROM lead_assignments WHERE lead_id = $1 ORDER BY assigned_at",
    )
    .bind(&lead_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(LeadDetail { lead, assignments }))
}

// ============ Partners ============

/// Registers a partner account, active immediately.
pub async fn create_partner(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePartnerRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.company_name.trim().is_empty() {
        return Err(AppError::BadRequest(
            "company_name must not be empty".to_string(),
        ));
    }
    let service_areas = serde_json::to_value(&req.service_areas)
        .map_err(|e| AppError::InternalError(format!("serialize service areas: {}", e)))?;

    let partner = sqlx::query_as::<_, Partner>(
        r#"
        INSERT INTO partners (id, company_name, service_type, tier, status, weekly_lead_limit, service_areas)
        VALUES ($1, $2, $3, $4, 'active', $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.company_name.trim())
    .bind(req.service_type.as_str())
    .bind(req.tier.as_str())
    .bind(req.weekly_lead_limit)
    .bind(&service_areas)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        "Partner {} registered: {} ({}, {})",
        partner.id,
        partner.company_name,
        partner.service_type,
        partner.tier
    );
    Ok((StatusCode::CREATED, Json(partner)))
}

// ============ Assignment ============

pub async fn auto_assign(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let result = assignment::auto_assign(&state, &lead_id).await?;
    Ok(Json(result))
}

pub async fn update_assignment(
    State(state): State<Arc<AppState>>,
    Path((lead_id, partner_id)): Path<(String, Uuid)>,
    Json(req): Json<UpdateAssignmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let updated =
        assignment::update_assignment_status(&state, &lead_id, partner_id, req.status, req.reason)
            .await?;
    Ok(Json(updated))
}

pub async fn decide_cancellation(
    State(state): State<Arc<AppState>>,
    Path((lead_id, partner_id)): Path<(String, Uuid)>,
    Json(req): Json<CancellationDecisionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let updated =
        assignment::decide_cancellation(&state, &lead_id, partner_id, req.approve, req.reason)
            .await?;
    Ok(Json(updated))
}

// ============ Billing ============

pub async fn generate_invoice(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateInvoiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = billing::generate_invoice(&state, &req).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn generate_bulk_invoices(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkInvoiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invoices = billing::generate_bulk_invoices(&state, &req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "generated": invoices.len(),
            "invoices": invoices,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BillingReadyQuery {
    pub service_type: ServiceType,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

pub async fn billing_ready(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BillingReadyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let period = BillingPeriod {
        start: query.period_start,
        end: query.period_end,
    };
    let partners =
        billing::get_billing_ready_partners(&state.db, query.service_type, period).await?;
    Ok(Json(partners))
}

// ============ Income ============

#[derive(Debug, Deserialize)]
pub struct IncomeQuery {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub service_type: Option<ServiceType>,
    pub partner_id: Option<Uuid>,
}

pub async fn income_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IncomeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let period = BillingPeriod {
        start: query.period_start,
        end: query.period_end,
    };
    let summary = income::calculate_income_for_period(
        &state.db,
        period,
        query.service_type,
        query.partner_id,
    )
    .await?;
    Ok(Json(summary))
}

// ============ Settings ============

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Settings>, AppError> {
    let settings = state.settings.current().await?;
    Ok(Json(settings))
}

/// Replaces the settings document. Applies prospectively only; frozen
/// assignment prices are never touched.
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, AppError> {
    if settings.system.tax_rate < 0.0 || settings.system.tax_rate > 100.0 {
        return Err(AppError::BadRequest(
            "tax_rate must be between 0 and 100".to_string(),
        ));
    }
    if settings.system.basic_partner_lead_limit < 1 {
        return Err(AppError::BadRequest(
            "basic_partner_lead_limit must be at least 1".to_string(),
        ));
    }
    let updated = state.settings.update(settings).await?;
    Ok(Json(updated))
}
