//! Lead assignment coordination.
//!
//! Orchestrates eligibility -> selection -> commit for new leads, and the
//! partner-driven assignment status transitions (accept/reject and the
//! two-phase cancellation flow). Each operation runs inside a single
//! transaction holding the lead row lock, so an assignment is never
//! partially visible: either the lead and partner updates both commit, or
//! neither does.

use crate::audit::{self, AuditEntry};
use crate::eligibility;
use crate::errors::{AppError, ResultExt};
use crate::handlers::AppState;
use crate::matching;
use crate::models::{
    week_start, AssignOutcome, AssignResult, AssignedPartner, AssignmentAction, AssignmentStatus,
    Lead, LeadStatus, Partner, PartnerAssignment,
};
use crate::settings::Settings;
use chrono::{Duration, Utc};
use sqlx::PgConnection;
use std::sync::Arc;
use uuid::Uuid;

async fn fetch_lead_locked(
    conn: &mut PgConnection,
    lead_id: &str,
) -> Result<Lead, AppError> {
    sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1 FOR UPDATE")
        .bind(lead_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))
}

async fn fetch_assignments(
    conn: &mut PgConnection,
    lead_id: &str,
) -> Result<Vec<PartnerAssignment>, AppError> {
    let assignments = sqlx::query_as::<_, PartnerAssignment>(
        "SELECT * FROM lead_assignments WHERE lead_id = $1 ORDER BY assigned_at",
    )
    .bind(lead_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(assignments)
}

/// Re-derives the lead's status from its (just mutated) assignment list
/// and overwrites the materialized column, inside the caller's
/// transaction.
async fn recompute_lead_status(
    conn: &mut PgConnection,
    lead: &Lead,
    settings: &Settings,
) -> Result<LeadStatus, AppError> {
    let assignments = fetch_assignments(conn, &lead.id).await?;
    let status = eligibility::derive_lead_status(
        &assignments,
        matching::extract_scheduled_date(lead),
        settings.system.basic_partner_lead_limit,
        Utc::now().date_naive(),
    );
    sqlx::query("UPDATE leads SET status = $2, updated_at = now() WHERE id = $1")
        .bind(&lead.id)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await
        .context("persisting derived lead status")?;
    Ok(status)
}

fn unavailable(outcome: AssignOutcome, message: impl Into<String>) -> AssignResult {
    AssignResult {
        success: false,
        outcome,
        partner: None,
        message: message.into(),
    }
}

/// Automatically assigns a pending lead to the best eligible partner.
///
/// The price for (service type, partner tier) is snapshotted from the
/// current settings at this moment and frozen on the assignment; later
/// settings changes never touch it. Notification dispatch happens after
/// commit and is fire-and-forget.
pub async fn auto_assign(state: &Arc<AppState>, lead_id: &str) -> Result<AssignResult, AppError> {
    let settings = state.settings.current().await?;
    let today = Utc::now().date_naive();
    let current_week = week_start(today);

    let mut tx = state.db.begin().await?;

    let lead = fetch_lead_locked(&mut tx, lead_id).await?;
    let assignments = fetch_assignments(&mut tx, &lead.id).await?;
    let status = eligibility::derive_lead_status(
        &assignments,
        matching::extract_scheduled_date(&lead),
        settings.system.basic_partner_lead_limit,
        today,
    );
    if status != LeadStatus::Pending {
        tracing::info!(
            "auto_assign skipped: lead {} is {}, not pending",
            lead.id,
            status.as_str()
        );
        return Ok(unavailable(
            AssignOutcome::LeadNotAvailable,
            format!("Lead is {}, not available for assignment", status.as_str()),
        ));
    }

    let eligible =
        eligibility::find_eligible_partners(&mut tx, &lead, &settings, today).await?;
    if eligible.is_empty() {
        tracing::info!("auto_assign: no eligible partners for lead {}", lead.id);
        return Ok(unavailable(
            AssignOutcome::NoEligiblePartners,
            "No eligible partners for this lead",
        ));
    }

    let eligible_refs: Vec<&Partner> = eligible.iter().collect();
    let Some(selected) = eligibility::select_partner(&eligible_refs, current_week) else {
        return Ok(unavailable(
            AssignOutcome::SelectionFailed,
            "Partner selection produced no result",
        ));
    };
    let selected = selected.clone();

    // Price snapshot: frozen onto the assignment from here on.
    let lead_price = settings.per_lead_price(&lead.service_type, selected.tier());

    let assignment_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO lead_assignments (id, lead_id, partner_id, status, lead_price, partner_tier, assigned_at)
        VALUES ($1, $2, $3, 'pending', $4, $5, now())
        "#,
    )
    .bind(assignment_id)
    .bind(&lead.id)
    .bind(selected.id)
    .bind(lead_price)
    .bind(&selected.tier)
    .execute(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db)
            if db.constraint() == Some("lead_assignments_lead_id_partner_id_key") =>
        {
            AppError::DuplicateAssignment(format!(
                "Partner {} already has an assignment on lead {}",
                selected.id, lead.id
            ))
        }
        _ => AppError::DatabaseError(e),
    })?;

    // Counter update is a single statement so concurrent assignments to
    // the same partner never race on a read-then-write; the CASE rolls
    // the weekly counter over when a new week is observed.
    sqlx::query(
        r#"
        UPDATE partners SET
            total_leads_received = total_leads_received + 1,
            weekly_leads_received = CASE
                WHEN week_started_on IS DISTINCT FROM $2 THEN 1
                ELSE weekly_leads_received + 1
            END,
            week_started_on = $2,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(selected.id)
    .bind(current_week)
    .execute(&mut *tx)
    .await
    .context("incrementing partner lead counters")?;

    recompute_lead_status(&mut tx, &lead, &settings).await?;
    tx.commit().await?;

    tracing::info!(
        "Lead {} assigned to partner {} ({}, price {})",
        lead.id,
        selected.id,
        selected.tier,
        lead_price
    );

    if let Some(notifier) = state.notifier.clone() {
        let partner = selected.clone();
        let lead_for_notify = lead.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier
                .send_lead_assignment(&partner, &lead_for_notify, lead_price)
                .await
            {
                tracing::warn!(
                    "Assignment notification failed for lead {} / partner {}: {}",
                    lead_for_notify.id,
                    partner.id,
                    e
                );
            }
        });
    }

    audit::record(
        &state.db,
        AuditEntry::new("system", "lead.assigned", "Lead auto-assigned")
            .lead(&lead.id, &lead.service_type)
            .partner(selected.id)
            .status("pending")
            .details(serde_json::json!({
                "lead_price": lead_price,
                "partner_tier": selected.tier,
            })),
    )
    .await;

    Ok(AssignResult {
        success: true,
        outcome: AssignOutcome::Assigned,
        partner: Some(AssignedPartner {
            partner_id: selected.id,
            company_name: selected.company_name.clone(),
            partner_tier: selected.tier(),
            lead_price,
        }),
        message: format!("Lead assigned to {}", selected.company_name),
    })
}

async fn fetch_assignment_locked(
    conn: &mut PgConnection,
    lead_id: &str,
    partner_id: Uuid,
) -> Result<PartnerAssignment, AppError> {
    sqlx::query_as::<_, PartnerAssignment>(
        "SELECT * FROM lead_assignments WHERE lead_id = $1 AND partner_id = $2 FOR UPDATE",
    )
    .bind(lead_id)
    .bind(partner_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        AppError::NotFound(format!(
            "No assignment for partner {} on lead {}",
            partner_id, lead_id
        ))
    })
}

/// Applies a partner action to their assignment on a lead.
///
/// Accept/reject only apply to pending assignments. A cancellation
/// request flags the assignment but leaves the status untouched until an
/// administrator decides (see `decide_cancellation`), and is only open
/// within the configured window after acceptance.
pub async fn update_assignment_status(
    state: &Arc<AppState>,
    lead_id: &str,
    partner_id: Uuid,
    action: AssignmentAction,
    reason: Option<String>,
) -> Result<PartnerAssignment, AppError> {
    let settings = state.settings.current().await?;
    let mut tx = state.db.begin().await?;

    let lead = fetch_lead_locked(&mut tx, lead_id).await?;
    let assignment = fetch_assignment_locked(&mut tx, lead_id, partner_id).await?;

    match action {
        AssignmentAction::Accepted => {
            if assignment.assignment_status() != AssignmentStatus::Pending {
                return Err(AppError::BadRequest(format!(
                    "Assignment is {}, only pending assignments can be accepted",
                    assignment.status
                )));
            }
            sqlx::query(
                "UPDATE lead_assignments SET status = 'accepted', accepted_at = now() WHERE id = $1",
            )
            .bind(assignment.id)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "UPDATE partners SET total_leads_accepted = total_leads_accepted + 1, updated_at = now() WHERE id = $1",
            )
            .bind(partner_id)
            .execute(&mut *tx)
            .await?;
        }
        AssignmentAction::Rejected => {
            if assignment.assignment_status() != AssignmentStatus::Pending {
                return Err(AppError::BadRequest(format!(
                    "Assignment is {}, only pending assignments can be rejected",
                    assignment.status
                )));
            }
            sqlx::query(
                "UPDATE lead_assignments SET status = 'rejected', rejected_at = now() WHERE id = $1",
            )
            .bind(assignment.id)
            .execute(&mut *tx)
            .await?;
        }
        AssignmentAction::CancellationRequested => {
            if assignment.assignment_status() != AssignmentStatus::Accepted {
                return Err(AppError::BadRequest(
                    "Only accepted assignments can request cancellation".to_string(),
                ));
            }
            if assignment.cancellation_requested {
                return Err(AppError::BadRequest(
                    "Cancellation already requested for this assignment".to_string(),
                ));
            }
            let window = Duration::hours(settings.system.cancellation_time_limit_hours);
            if let Some(accepted_at) = assignment.accepted_at {
                if Utc::now() - accepted_at > window {
                    return Err(AppError::BadRequest(format!(
                        "Cancellation window of {}h has expired",
                        settings.system.cancellation_time_limit_hours
                    )));
                }
            }
            sqlx::query(
                r#"
                UPDATE lead_assignments SET
                    cancellation_requested = true,
                    cancellation_reason = $2,
                    cancellation_requested_at = now()
                WHERE id = $1
                "#,
            )
            .bind(assignment.id)
            .bind(&reason)
            .execute(&mut *tx)
            .await?;
        }
    }

    recompute_lead_status(&mut tx, &lead, &settings).await?;

    let updated = sqlx::query_as::<_, PartnerAssignment>(
        "SELECT * FROM lead_assignments WHERE id = $1",
    )
    .bind(assignment.id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    audit::record(
        &state.db,
        AuditEntry::new("partner", "assignment.status_updated", "Assignment updated")
            .lead(&lead.id, &lead.service_type)
            .partner(partner_id)
            .status(&updated.status)
            .details(serde_json::json!({
                "action": action,
                "reason": reason,
            })),
    )
    .await;

    Ok(updated)
}

/// Administrator decision on a pending cancellation request. Approval is
/// the only transition to `cancelled`.
pub async fn decide_cancellation(
    state: &Arc<AppState>,
    lead_id: &str,
    partner_id: Uuid,
    approve: bool,
    reason: Option<String>,
) -> Result<PartnerAssignment, AppError> {
    let settings = state.settings.current().await?;
    let mut tx = state.db.begin().await?;

    let lead = fetch_lead_locked(&mut tx, lead_id).await?;
    let assignment = fetch_assignment_locked(&mut tx, lead_id, partner_id).await?;
    if !assignment.has_pending_cancellation() {
        return Err(AppError::NotFound(format!(
            "No pending cancellation request for partner {} on lead {}",
            partner_id, lead_id
        )));
    }

    if approve {
        sqlx::query(
            r#"
            UPDATE lead_assignments SET
                status = 'cancelled',
                cancellation_approved = true,
                cancellation_approved_at = now()
            WHERE id = $1
            "#,
        )
        .bind(assignment.id)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE lead_assignments SET
                cancellation_rejected = true,
                cancellation_rejection_reason = $2
            WHERE id = $1
            "#,
        )
        .bind(assignment.id)
        .bind(&reason)
        .execute(&mut *tx)
        .await?;
    }

    recompute_lead_status(&mut tx, &lead, &settings).await?;

    let updated = sqlx::query_as::<_, PartnerAssignment>(
        "SELECT * FROM lead_assignments WHERE id = $1",
    )
    .bind(assignment.id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    audit::record(
        &state.db,
        AuditEntry::new(
            "admin",
            if approve {
                "assignment.cancellation_approved"
            } else {
                "assignment.cancellation_rejected"
            },
            "Cancellation request decided",
        )
        .lead(&lead.id, &lead.service_type)
        .partner(partner_id)
        .status(&updated.status)
        .details(serde_json::json!({ "approved": approve, "reason": reason })),
    )
    .await;

    Ok(updated)
}
