/// End-to-end assignment and billing flow against a real database.
/// Marked ignored to avoid running against production by accident; set
/// TEST_DATABASE_URL (schema.sql applied) to run.
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use uuid::Uuid;

use leadmarket_api::assignment;
use leadmarket_api::billing;
use leadmarket_api::config::Config;
use leadmarket_api::db::Database;
use leadmarket_api::errors::AppError;
use leadmarket_api::handlers::AppState;
use leadmarket_api::income;
use leadmarket_api::models::{
    AssignOutcome, AssignmentAction, BillingPeriod, GenerateInvoiceRequest, PartnerAssignment,
    ServiceType,
};
use leadmarket_api::settings::SettingsStore;

async fn test_state() -> anyhow::Result<Arc<AppState>> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;
    let db = Database::new(&db_url, 5).await?;
    let settings = SettingsStore::new(db.pool.clone());
    Ok(Arc::new(AppState {
        db: db.pool.clone(),
        config: Config {
            database_url: db_url,
            max_db_connections: 5,
            port: 0,
            notify_webhook_url: None,
            notify_webhook_token: None,
        },
        settings,
        notifier: None,
    }))
}

async fn insert_exclusive_berlin_partner(state: &AppState) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO partners (id, company_name, service_type, tier, status, service_areas)
        VALUES ($1, $2, 'moving', 'exclusive', 'active', $3)
        "#,
    )
    .bind(id)
    .bind(format!("Integration Movers {}", id))
    .bind(serde_json::json!({
        "Germany": {
            "type": "cities",
            "cities": {
                "Berlin": { "radius": 15.0, "coordinates": { "lat": 52.50, "lng": 13.40 } }
            }
        }
    }))
    .execute(&state.db)
    .await?;
    Ok(id)
}

async fn insert_berlin_lead(state: &AppState) -> anyhow::Result<String> {
    let lead_id = format!("MOVE-{}", 100_000 + Uuid::new_v4().as_u128() % 900_000);
    sqlx::query(
        r#"
        INSERT INTO leads (id, service_type, status, form_data)
        VALUES ($1, 'moving', 'pending', $2)
        "#,
    )
    .bind(&lead_id)
    .bind(serde_json::json!({
        "pickup_address": {
            "city": "Berlin", "country": "Germany",
            "lat": 52.52, "lng": 13.405
        }
    }))
    .execute(&state.db)
    .await?;
    Ok(lead_id)
}

async fn fetch_assignment(
    state: &AppState,
    lead_id: &str,
    partner_id: Uuid,
) -> anyhow::Result<PartnerAssignment> {
    let assignment = sqlx::query_as::<_, PartnerAssignment>(
        "SELECT * FROM lead_assignments WHERE lead_id = $1 AND partner_id = $2",
    )
    .bind(lead_id)
    .bind(partner_id)
    .fetch_one(&state.db)
    .await?;
    Ok(assignment)
}

#[tokio::test]
#[ignore]
async fn assign_accept_invoice_flow() -> anyhow::Result<()> {
    let state = test_state().await?;
    let partner_id = insert_exclusive_berlin_partner(&state).await?;
    let lead_id = insert_berlin_lead(&state).await?;

    // Assign: the exclusive partner covers Berlin and must be selected.
    let result = assignment::auto_assign(&state, &lead_id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(result.success);
    assert_eq!(result.outcome, AssignOutcome::Assigned);
    let assigned = result.partner.expect("assigned partner");
    assert_eq!(assigned.partner_id, partner_id);

    // Price was frozen from the settings snapshot at assignment time.
    let settings = state
        .settings
        .current()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let expected_price =
        settings.per_lead_price("moving", leadmarket_api::models::PartnerTier::Exclusive);
    let stored = fetch_assignment(&state, &lead_id, partner_id).await?;
    assert_eq!(stored.lead_price, expected_price);
    assert_eq!(stored.partner_tier, "exclusive");

    // Exclusive assignment occupies the lead; a second run is a no-op.
    let second = assignment::auto_assign(&state, &lead_id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(!second.success);
    assert_eq!(second.outcome, AssignOutcome::LeadNotAvailable);

    // Accept.
    let accepted = assignment::update_assignment_status(
        &state,
        &lead_id,
        partner_id,
        AssignmentAction::Accepted,
        None,
    )
    .await
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(accepted.status, "accepted");
    assert!(accepted.accepted_at.is_some());

    // Changing pricing after the fact must not touch the frozen price.
    let mut repriced = settings.clone();
    if let Some(moving) = repriced.pricing.get_mut("moving") {
        moving.exclusive += 100.0;
    }
    state
        .settings
        .update(repriced)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let reread = fetch_assignment(&state, &lead_id, partner_id).await?;
    assert_eq!(reread.lead_price, expected_price);
    state
        .settings
        .update(settings.clone())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Invoice the acceptance.
    let req = GenerateInvoiceRequest {
        partner_id,
        service_type: ServiceType::Moving,
        period_start: Utc::now() - Duration::hours(1),
        period_end: Utc::now() + Duration::hours(1),
        selected_lead_ids: Some(vec![lead_id.clone()]),
        price_overrides: BTreeMap::new(),
    };
    let invoice = billing::generate_invoice(&state, &req)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(invoice.lines.len(), 1);
    assert_eq!(invoice.lines[0].amount, expected_price);
    assert_eq!(invoice.invoice.status, "draft");

    // The billed assignment is stamped and never billable again.
    let stamped = fetch_assignment(&state, &lead_id, partner_id).await?;
    assert_eq!(stamped.invoice_id, Some(invoice.invoice.id));
    let again = billing::generate_invoice(&state, &req).await;
    assert!(matches!(again, Err(AppError::NoLeadsToInvoice)));

    // Exactly one revenue row exists for the (lead, partner) pair.
    let revenue_count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM revenues WHERE lead_id = $1 AND partner_id = $2",
    )
    .bind(&lead_id)
    .bind(partner_id)
    .fetch_one(&state.db)
    .await?;
    assert_eq!(revenue_count.0, 1);

    // The income report sees the accepted lead at its frozen price.
    let summary = income::calculate_income_for_period(
        &state.db,
        BillingPeriod {
            start: Utc::now() - Duration::hours(1),
            end: Utc::now() + Duration::hours(1),
        },
        Some(ServiceType::Moving),
        Some(partner_id),
    )
    .await
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(summary.total_leads, 1);
    assert_eq!(summary.total_income, expected_price);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn cancellation_request_is_two_phase() -> anyhow::Result<()> {
    let state = test_state().await?;
    let partner_id = insert_exclusive_berlin_partner(&state).await?;
    let lead_id = insert_berlin_lead(&state).await?;

    assignment::auto_assign(&state, &lead_id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assignment::update_assignment_status(
        &state,
        &lead_id,
        partner_id,
        AssignmentAction::Accepted,
        None,
    )
    .await
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Request: flags only, status untouched.
    let requested = assignment::update_assignment_status(
        &state,
        &lead_id,
        partner_id,
        AssignmentAction::CancellationRequested,
        Some("customer unreachable".to_string()),
    )
    .await
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(requested.status, "accepted");
    assert!(requested.cancellation_requested);

    // Approve: now, and only now, the assignment is cancelled.
    let decided = assignment::decide_cancellation(&state, &lead_id, partner_id, true, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(decided.status, "cancelled");
    assert!(decided.cancellation_approved);

    // With its only assignment cancelled the lead is pending again.
    let (status,): (String,) = sqlx::query_as("SELECT status FROM leads WHERE id = $1")
        .bind(&lead_id)
        .fetch_one(&state.db)
        .await?;
    assert_eq!(status, "pending");

    Ok(())
}
