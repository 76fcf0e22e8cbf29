//! Partner eligibility filtering, tier-priority selection, and the lead
//! status projection.
//!
//! `filter_eligible` and `select_partner` are pure over already-loaded
//! rows so the quota/tier/load-balancing rules can be tested without a
//! database; `find_eligible_partners` wires them to the partner query.

use crate::errors::AppError;
use crate::matching;
use crate::models::{
    week_start, Lead, LeadStatus, Partner, PartnerAssignment, PartnerTier,
};
use crate::settings::Settings;
use chrono::NaiveDate;
use sqlx::PgConnection;

/// Applies the weekly-quota and service-area checks to candidate
/// partners. Read-only: partner state is never mutated here.
pub fn filter_eligible<'a>(
    candidates: &'a [Partner],
    lead: &Lead,
    settings: &Settings,
    today: NaiveDate,
) -> Vec<&'a Partner> {
    let current_week = week_start(today);
    candidates
        .iter()
        .filter(|partner| {
            let quota = partner
                .weekly_lead_limit
                .unwrap_or(settings.system.default_weekly_lead_limit as i32);
            if partner.weekly_count(current_week) >= quota {
                tracing::debug!(
                    "Partner {} over weekly quota ({} >= {})",
                    partner.id,
                    partner.weekly_count(current_week),
                    quota
                );
                return false;
            }
            matching::is_eligible(partner, lead)
        })
        .collect()
}

/// Selects the partner a lead will be offered to.
///
/// Exclusive-tier partners take strict priority: while any exclusive
/// partner is eligible, basic partners are never chosen. Within the
/// chosen tier the partner with the fewest leads received this week wins;
/// ties break on partner ID so selection is deterministic.
pub fn select_partner<'a>(
    eligible: &[&'a Partner],
    current_week: NaiveDate,
) -> Option<&'a Partner> {
    let exclusive: Vec<&Partner> = eligible
        .iter()
        .filter(|p| p.tier() == PartnerTier::Exclusive)
        .copied()
        .collect();
    let pool: Vec<&Partner> = if exclusive.is_empty() {
        eligible.to_vec()
    } else {
        exclusive
    };
    pool.into_iter()
        .min_by_key(|p| (p.weekly_count(current_week), p.id))
}

/// Queries active partners for the lead's service type (excluding any the
/// lead was already offered to) and applies the eligibility filter.
pub async fn find_eligible_partners(
    conn: &mut PgConnection,
    lead: &Lead,
    settings: &Settings,
    today: NaiveDate,
) -> Result<Vec<Partner>, AppError> {
    let candidates = sqlx::query_as::<_, Partner>(
        r#"
        SELECT * FROM partners
        WHERE status = 'active'
          AND service_type = $1
          AND NOT EXISTS (
              SELECT 1 FROM lead_assignments la
              WHERE la.lead_id = $2 AND la.partner_id = partners.id
          )
        ORDER BY id
        "#,
    )
    .bind(&lead.service_type)
    .bind(&lead.id)
    .fetch_all(&mut *conn)
    .await?;

    let eligible: Vec<Partner> = filter_eligible(&candidates, lead, settings, today)
        .into_iter()
        .cloned()
        .collect();

    tracing::debug!(
        "Lead {}: {} candidate(s), {} eligible",
        lead.id,
        candidates.len(),
        eligible.len()
    );
    Ok(eligible)
}

/// Derives the lead's overall status from its assignment list.
///
/// Pure projection; the stored `leads.status` column is only ever a
/// materialized copy of this function's output.
pub fn derive_lead_status(
    assignments: &[PartnerAssignment],
    scheduled_date: Option<NaiveDate>,
    basic_partner_lead_limit: i64,
    today: NaiveDate,
) -> LeadStatus {
    let active: Vec<&PartnerAssignment> =
        assignments.iter().filter(|a| a.is_active()).collect();
    if active.is_empty() {
        return LeadStatus::Pending;
    }

    let any_accepted = active
        .iter()
        .any(|a| a.assignment_status() == crate::models::AssignmentStatus::Accepted);
    let any_pending_cancellation = active.iter().any(|a| a.has_pending_cancellation());
    if any_accepted || any_pending_cancellation {
        return LeadStatus::Assigned;
    }

    // Past the scheduled date with nothing accepted and no cancellation in
    // flight: surface the lead for re-attention.
    if let Some(date) = scheduled_date {
        if date < today {
            return LeadStatus::Pending;
        }
    }

    // Exclusive partners fully occupy a lead once offered.
    if active.iter().any(|a| a.tier() == PartnerTier::Exclusive) {
        return LeadStatus::Assigned;
    }

    if (active.len() as i64) < basic_partner_lead_limit {
        LeadStatus::PartialAssigned
    } else {
        LeadStatus::Assigned
    }
}
