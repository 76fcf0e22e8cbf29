//! Read-only income reporting over accepted assignments.
//!
//! Income is defined directly over acceptance at frozen prices, so the
//! report reflects earned income whether or not an invoice has been
//! generated yet. Aggregation happens in process over a single query.

use crate::errors::AppError;
use crate::models::{
    round2, BillingPeriod, IncomeBucket, IncomeSummary, PartnerIncomeBucket, ServiceType,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One accepted assignment joined with its lead and partner identity.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AcceptedAssignmentRow {
    pub lead_id: String,
    pub service_type: String,
    pub partner_id: Uuid,
    pub partner_name: String,
    pub partner_type: String,
    pub lead_price: f64,
    pub accepted_at: Option<DateTime<Utc>>,
}

/// Aggregates accepted rows into overall, per-service, and per-partner
/// buckets. Pure; averages are rounded to cents.
pub fn summarize_income(rows: &[AcceptedAssignmentRow]) -> IncomeSummary {
    let mut total_income = 0.0;
    let mut by_service: BTreeMap<String, IncomeBucket> = BTreeMap::new();
    let mut by_partner: BTreeMap<Uuid, PartnerIncomeBucket> = BTreeMap::new();

    for row in rows {
        total_income += row.lead_price;

        let service = by_service.entry(row.service_type.clone()).or_default();
        service.income += row.lead_price;
        service.leads += 1;

        let partner = by_partner
            .entry(row.partner_id)
            .or_insert_with(|| PartnerIncomeBucket {
                partner_name: row.partner_name.clone(),
                partner_type: row.partner_type.clone(),
                income: 0.0,
                leads: 0,
                avg_price: 0.0,
            });
        partner.income += row.lead_price;
        partner.leads += 1;
    }

    for bucket in by_service.values_mut() {
        bucket.income = round2(bucket.income);
        bucket.avg_price = round2(bucket.income / bucket.leads as f64);
    }
    for bucket in by_partner.values_mut() {
        bucket.income = round2(bucket.income);
        bucket.avg_price = round2(bucket.income / bucket.leads as f64);
    }

    IncomeSummary {
        total_income: round2(total_income),
        total_leads: rows.len() as i64,
        by_service,
        by_partner,
    }
}

/// Income summary for a period, optionally narrowed to one service type
/// and/or one partner.
pub async fn calculate_income_for_period(
    pool: &PgPool,
    period: BillingPeriod,
    service_type: Option<ServiceType>,
    partner_id: Option<Uuid>,
) -> Result<IncomeSummary, AppError> {
    let rows = sqlx::query_as::<_, AcceptedAssignmentRow>(
        r#"
        SELECT la.lead_id,
               l.service_type,
               la.partner_id,
               p.company_name AS partner_name,
               p.tier AS partner_type,
               la.lead_price,
               la.accepted_at
        FROM lead_assignments la
        JOIN leads l ON l.id = la.lead_id
        JOIN partners p ON p.id = la.partner_id
        WHERE la.status = 'accepted'
          AND la.accepted_at BETWEEN $1 AND $2
          AND ($3::text IS NULL OR l.service_type = $3)
          AND ($4::uuid IS NULL OR la.partner_id = $4)
        ORDER BY la.accepted_at
        "#,
    )
    .bind(period.start)
    .bind(period.end)
    .bind(service_type.map(|s| s.as_str()))
    .bind(partner_id)
    .fetch_all(pool)
    .await?;

    tracing::debug!(
        "Income report: {} accepted assignment(s) in period",
        rows.len()
    );
    Ok(summarize_income(&rows))
}
