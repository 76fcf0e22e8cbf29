//! Invoice generation and revenue recognition.
//!
//! Billable units are accepted, not-yet-invoiced assignments at their
//! frozen prices. Stamping `lead_assignments.invoice_id` inside the
//! invoice transaction is what prevents the same acceptance from being
//! billed twice across overlapping periods; the unique constraint on
//! `revenues (lead_id, partner_id)` is the idempotency backstop for
//! recognized income.

use crate::audit::{self, AuditEntry};
use crate::errors::{AppError, ResultExt};
use crate::handlers::AppState;
use crate::models::{
    round2, BillingPeriod, BillingReadyPartner, BulkInvoiceRequest, GenerateInvoiceRequest,
    Invoice, InvoiceLine, InvoiceWithLines, Partner, ServiceType,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Platform commission, percent of each recognized revenue amount.
pub const COMMISSION_RATE_PCT: f64 = 10.0;

/// Days until an issued invoice falls due.
const PAYMENT_TERM_DAYS: i64 = 30;

/// One billable assignment, as read from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillableLine {
    pub lead_id: String,
    pub lead_price: f64,
    pub accepted_at: Option<DateTime<Utc>>,
}

/// A line after price-override resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedLine {
    pub lead_id: String,
    pub amount: f64,
    pub accepted_at: Option<DateTime<Utc>>,
}

/// Subtotal/tax/total for a set of computed lines.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceTotals {
    pub lines: Vec<ComputedLine>,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
}

/// Resolves per-line amounts (frozen price unless overridden) and the
/// invoice totals. Pure; every monetary value is rounded to cents.
pub fn compute_invoice(
    lines: &[BillableLine],
    price_overrides: &BTreeMap<String, f64>,
    tax_rate_pct: f64,
) -> InvoiceTotals {
    let computed: Vec<ComputedLine> = lines
        .iter()
        .map(|line| {
            let amount = price_overrides
                .get(&line.lead_id)
                .copied()
                .unwrap_or(line.lead_price);
            ComputedLine {
                lead_id: line.lead_id.clone(),
                amount: round2(amount),
                accepted_at: line.accepted_at,
            }
        })
        .collect();

    let subtotal = round2(computed.iter().map(|l| l.amount).sum());
    let tax_amount = round2(subtotal * tax_rate_pct / 100.0);
    let total = round2(subtotal + tax_amount);
    InvoiceTotals {
        lines: computed,
        subtotal,
        tax_amount,
        total,
    }
}

/// Splits a gross amount into (commission, net revenue).
pub fn commission_split(amount: f64) -> (f64, f64) {
    let commission = round2(amount * COMMISSION_RATE_PCT / 100.0);
    (commission, round2(amount - commission))
}

async fn fetch_partner_locked(
    conn: &mut PgConnection,
    partner_id: Uuid,
) -> Result<Partner, AppError> {
    sqlx::query_as::<_, Partner>("SELECT * FROM partners WHERE id = $1 FOR UPDATE")
        .bind(partner_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Partner {} not found", partner_id)))
}

async fn fetch_billable_lines(
    conn: &mut PgConnection,
    partner_id: Uuid,
    service_type: ServiceType,
    period: BillingPeriod,
    selected_lead_ids: &Option<Vec<String>>,
) -> Result<Vec<BillableLine>, AppError> {
    let lines = sqlx::query_as::<_, BillableLine>(
        r#"
        SELECT la.lead_id, la.lead_price, la.accepted_at
        FROM lead_assignments la
        JOIN leads l ON l.id = la.lead_id
        WHERE la.partner_id = $1
          AND la.status = 'accepted'
          AND la.invoice_id IS NULL
          AND l.service_type = $2
          AND la.accepted_at BETWEEN $3 AND $4
          AND ($5::text[] IS NULL OR la.lead_id = ANY($5))
        ORDER BY la.accepted_at
        "#,
    )
    .bind(partner_id)
    .bind(service_type.as_str())
    .bind(period.start)
    .bind(period.end)
    .bind(selected_lead_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(lines)
}

/// Records recognized revenue for one billed line. The unique constraint
/// on (lead_id, partner_id) makes this idempotent; the partner's running
/// revenue total only moves on first insertion.
async fn record_revenue(
    conn: &mut PgConnection,
    line: &ComputedLine,
    partner_id: Uuid,
) -> Result<bool, AppError> {
    let (commission, net_revenue) = commission_split(line.amount);
    let inserted = sqlx::query(
        r#"
        INSERT INTO revenues (id, lead_id, partner_id, amount, commission, net_revenue, status, revenue_date)
        VALUES ($1, $2, $3, $4, $5, $6, 'confirmed', $7)
        ON CONFLICT (lead_id, partner_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&line.lead_id)
    .bind(partner_id)
    .bind(line.amount)
    .bind(commission)
    .bind(net_revenue)
    .bind(line.accepted_at.unwrap_or_else(Utc::now))
    .execute(&mut *conn)
    .await?
    .rows_affected()
        == 1;

    if inserted {
        sqlx::query(
            "UPDATE partners SET total_revenue = total_revenue + $2, updated_at = now() WHERE id = $1",
        )
        .bind(partner_id)
        .bind(line.amount)
        .execute(&mut *conn)
        .await
        .context("accumulating partner revenue total")?;
    } else {
        tracing::info!(
            "Revenue for lead {} / partner {} already recorded, skipping",
            line.lead_id,
            partner_id
        );
    }
    Ok(inserted)
}

/// Generates one draft invoice for a partner over a billing period.
///
/// The partner row lock serializes concurrent invoice runs for the same
/// partner; stamping `invoice_id` in the same transaction removes the
/// billed assignments from every later run's billable set.
pub async fn generate_invoice(
    state: &Arc<AppState>,
    req: &GenerateInvoiceRequest,
) -> Result<InvoiceWithLines, AppError> {
    let settings = state.settings.current().await?;
    let period = BillingPeriod {
        start: req.period_start,
        end: req.period_end,
    };

    let mut tx = state.db.begin().await?;
    fetch_partner_locked(&mut tx, req.partner_id).await?;

    let billable = fetch_billable_lines(
        &mut tx,
        req.partner_id,
        req.service_type,
        period,
        &req.selected_lead_ids,
    )
    .await?;
    if billable.is_empty() {
        tracing::info!(
            "Partner {} has no billable leads in the selected period",
            req.partner_id
        );
        return Err(AppError::NoLeadsToInvoice);
    }

    let totals = compute_invoice(&billable, &req.price_overrides, settings.system.tax_rate);

    let invoice_id = Uuid::new_v4();
    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        INSERT INTO invoices (id, partner_id, service_type, period_start, period_end,
                              subtotal, tax_amount, total, status, due_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'draft', $9)
        RETURNING *
        "#,
    )
    .bind(invoice_id)
    .bind(req.partner_id)
    .bind(req.service_type.as_str())
    .bind(period.start)
    .bind(period.end)
    .bind(totals.subtotal)
    .bind(totals.tax_amount)
    .bind(totals.total)
    .bind(Utc::now() + Duration::days(PAYMENT_TERM_DAYS))
    .fetch_one(&mut *tx)
    .await?;

    let mut lines = Vec::with_capacity(totals.lines.len());
    for line in &totals.lines {
        let stored = sqlx::query_as::<_, InvoiceLine>(
            r#"
            INSERT INTO invoice_lines (id, invoice_id, lead_id, amount, accepted_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(&line.lead_id)
        .bind(line.amount)
        .bind(line.accepted_at)
        .fetch_one(&mut *tx)
        .await?;
        lines.push(stored);
    }

    let lead_ids: Vec<String> = totals.lines.iter().map(|l| l.lead_id.clone()).collect();
    sqlx::query(
        "UPDATE lead_assignments SET invoice_id = $1 WHERE partner_id = $2 AND lead_id = ANY($3)",
    )
    .bind(invoice_id)
    .bind(req.partner_id)
    .bind(&lead_ids)
    .execute(&mut *tx)
    .await
    .context("stamping billed assignments with the invoice id")?;

    for line in &totals.lines {
        record_revenue(&mut tx, line, req.partner_id).await?;
    }

    tx.commit().await?;

    tracing::info!(
        "Invoice {} generated for partner {}: {} line(s), total {}",
        invoice_id,
        req.partner_id,
        lines.len(),
        totals.total
    );

    audit::record(
        &state.db,
        AuditEntry::new("admin", "invoice.generated", "Invoice generated")
            .partner(req.partner_id)
            .status("draft")
            .details(serde_json::json!({
                "invoice_id": invoice_id,
                "service_type": req.service_type,
                "lines": lines.len(),
                "subtotal": totals.subtotal,
                "tax_amount": totals.tax_amount,
                "total": totals.total,
            })),
    )
    .await;

    Ok(InvoiceWithLines { invoice, lines })
}

/// Generates invoices for every billing-ready partner in the period.
/// Per-partner failures are logged and skipped so one bad partner never
/// aborts the whole run.
pub async fn generate_bulk_invoices(
    state: &Arc<AppState>,
    req: &BulkInvoiceRequest,
) -> Result<Vec<InvoiceWithLines>, AppError> {
    let period = BillingPeriod {
        start: req.period_start,
        end: req.period_end,
    };
    let ready = get_billing_ready_partners(&state.db, req.service_type, period).await?;
    tracing::info!(
        "Bulk invoice run for {}: {} billing-ready partner(s)",
        req.service_type.as_str(),
        ready.len()
    );

    let mut invoices = Vec::new();
    for partner in ready {
        let single = GenerateInvoiceRequest {
            partner_id: partner.partner_id,
            service_type: req.service_type,
            period_start: req.period_start,
            period_end: req.period_end,
            selected_lead_ids: None,
            price_overrides: BTreeMap::new(),
        };
        match generate_invoice(state, &single).await {
            Ok(invoice) => invoices.push(invoice),
            Err(AppError::NoLeadsToInvoice) => {
                // Raced with a concurrent invoice run; nothing left to bill.
                tracing::info!(
                    "Partner {} had no billable leads left, skipping",
                    partner.partner_id
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Invoice generation failed for partner {}: {}",
                    partner.partner_id,
                    e
                );
            }
        }
    }
    Ok(invoices)
}

/// Partners with accepted, not-yet-invoiced assignments in the period,
/// with their billable totals. Read-only preview for the bulk run.
pub async fn get_billing_ready_partners(
    pool: &PgPool,
    service_type: ServiceType,
    period: BillingPeriod,
) -> Result<Vec<BillingReadyPartner>, AppError> {
    let partners = sqlx::query_as::<_, BillingReadyPartner>(
        r#"
        SELECT p.id AS partner_id,
               p.company_name AS partner_name,
               p.tier AS partner_type,
               COUNT(*) AS accepted_leads,
               COALESCE(SUM(la.lead_price), 0)::float8 AS total_amount,
               COALESCE(AVG(la.lead_price), 0)::float8 AS avg_lead_price
        FROM lead_assignments la
        JOIN partners p ON p.id = la.partner_id
        JOIN leads l ON l.id = la.lead_id
        WHERE la.status = 'accepted'
          AND la.invoice_id IS NULL
          AND l.service_type = $1
          AND la.accepted_at BETWEEN $2 AND $3
        GROUP BY p.id, p.company_name, p.tier
        ORDER BY total_amount DESC
        "#,
    )
    .bind(service_type.as_str())
    .bind(period.start)
    .bind(period.end)
    .fetch_all(pool)
    .await?;
    Ok(partners)
}
