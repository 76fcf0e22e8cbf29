use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

// ============ Enumerations ============

/// Service vertical a lead or partner belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Moving / relocation requests.
    Moving,
    /// Cleaning requests.
    Cleaning,
}

impl ServiceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "moving" => Some(ServiceType::Moving),
            "cleaning" => Some(ServiceType::Cleaning),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Moving => "moving",
            ServiceType::Cleaning => "cleaning",
        }
    }

    /// Prefix used for human-readable lead IDs (e.g. `MOVE-1234`).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ServiceType::Moving => "MOVE",
            ServiceType::Cleaning => "CLEAN",
        }
    }
}

/// Partner priority class. Exclusive partners are offered leads before
/// basic partners, strictly (tier is never a mere tiebreak).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerTier {
    Basic,
    Exclusive,
}

impl PartnerTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(PartnerTier::Basic),
            "exclusive" => Some(PartnerTier::Exclusive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerTier::Basic => "basic",
            PartnerTier::Exclusive => "exclusive",
        }
    }
}

/// Operational status of a partner account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerStatus {
    Pending,
    Active,
    Suspended,
    Rejected,
}

impl PartnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerStatus::Pending => "pending",
            PartnerStatus::Active => "active",
            PartnerStatus::Suspended => "suspended",
            PartnerStatus::Rejected => "rejected",
        }
    }
}

/// Status of a single lead-to-partner assignment.
///
/// A cancellation *request* is a flag on the assignment, not a status:
/// the status only becomes `cancelled` once an administrator approves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl AssignmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AssignmentStatus::Pending),
            "accepted" => Some(AssignmentStatus::Accepted),
            "rejected" => Some(AssignmentStatus::Rejected),
            "cancelled" => Some(AssignmentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Accepted => "accepted",
            AssignmentStatus::Rejected => "rejected",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }
}

/// Overall lead status. Always a projection over the assignment list
/// (see `eligibility::derive_lead_status`), never independently settable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Pending,
    PartialAssigned,
    Assigned,
    Accepted,
    Rejected,
    Cancelled,
    Completed,
}

impl LeadStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LeadStatus::Pending),
            "partial_assigned" => Some(LeadStatus::PartialAssigned),
            "assigned" => Some(LeadStatus::Assigned),
            "accepted" => Some(LeadStatus::Accepted),
            "rejected" => Some(LeadStatus::Rejected),
            "cancelled" => Some(LeadStatus::Cancelled),
            "completed" => Some(LeadStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Pending => "pending",
            LeadStatus::PartialAssigned => "partial_assigned",
            LeadStatus::Assigned => "assigned",
            LeadStatus::Accepted => "accepted",
            LeadStatus::Rejected => "rejected",
            LeadStatus::Cancelled => "cancelled",
            LeadStatus::Completed => "completed",
        }
    }
}

// ============ Geography ============

/// A latitude/longitude pair. Validated by `geo::distance_km`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude", alias = "lon")]
    pub lng: f64,
}

/// One named city inside a partner's service area, with its catchment
/// radius in kilometers around the reference coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityArea {
    /// Catchment radius in km. A radius of 0 never matches.
    #[serde(rename = "radius")]
    pub radius_km: f64,
    /// Reference point of the city; absent coordinates disable radius
    /// matching for this city entirely. Name matching against the city
    /// key only happens for leads that carry no coordinates at all.
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

/// Mode of a per-country service-area entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaMode {
    /// Partner serves the whole country regardless of city.
    Country,
    /// Partner serves only the named cities within their radii.
    Cities,
}

/// Per-country entry of a partner's service-area map.
///
/// Mixing modes across countries is intentional: a partner can serve all
/// of country X while restricting to a city list in country Y.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryArea {
    #[serde(rename = "type")]
    pub mode: AreaMode,
    #[serde(default)]
    pub cities: BTreeMap<String, CityArea>,
}

/// Country name -> area entry. An empty map means the partner opted into
/// nothing and is never eligible for any lead.
pub type ServiceAreaMap = BTreeMap<String, CountryArea>;

// ============ Database Models ============

/// A partner company account. One row per company per service type; a
/// company offering both moving and cleaning is two partner rows.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Partner {
    /// Unique identifier.
    pub id: Uuid,
    /// Display/company name.
    pub company_name: String,
    /// Service vertical this account receives leads for.
    pub service_type: String,
    /// Tier: "basic" or "exclusive".
    pub tier: String,
    /// Operational status: pending/active/suspended/rejected.
    pub status: String,
    /// Weekly lead quota; falls back to the settings default when unset.
    pub weekly_lead_limit: Option<i32>,
    /// Service-area preference map (JSONB, see `ServiceAreaMap`).
    pub service_areas: serde_json::Value,
    /// Lifetime count of leads offered to this partner.
    pub total_leads_received: i64,
    /// Lifetime count of leads this partner accepted.
    pub total_leads_accepted: i64,
    /// Leads received in the week starting at `week_started_on`.
    pub weekly_leads_received: i32,
    /// Monday of the ISO week `weekly_leads_received` belongs to. A stale
    /// week means the counter is effectively zero (lazy weekly reset).
    pub week_started_on: Option<NaiveDate>,
    /// Accumulated recognized revenue from this partner's accepted leads.
    pub total_revenue: f64,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Partner {
    pub fn tier(&self) -> PartnerTier {
        PartnerTier::parse(&self.tier).unwrap_or(PartnerTier::Basic)
    }

    /// Parses the JSONB service-area map. Malformed entries deserialize to
    /// an empty map, which makes the partner ineligible rather than
    /// crashing an eligibility scan.
    pub fn areas(&self) -> ServiceAreaMap {
        serde_json::from_value(self.service_areas.clone()).unwrap_or_default()
    }

    /// Weekly counter as of the given week; counters from an earlier week
    /// read as zero.
    pub fn weekly_count(&self, current_week: NaiveDate) -> i32 {
        match self.week_started_on {
            Some(week) if week == current_week => self.weekly_leads_received,
            _ => 0,
        }
    }
}

/// A customer service request to be matched to partner companies.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Lead {
    /// Human-readable, service-prefixed ID (e.g. `MOVE-1234`).
    pub id: String,
    /// Service vertical: "moving" or "cleaning".
    pub service_type: String,
    /// Materialized copy of the derived status. Recomputed from the
    /// assignment list inside every assignment-mutating transaction,
    /// never accepted as external input.
    pub status: String,
    /// Per-service form payload, including nested address objects with
    /// optional geocoordinates.
    pub form_data: serde_json::Value,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: Option<DateTime<Utc>>,
}

/// The record of a lead being offered to one specific partner.
///
/// `lead_price` and `partner_tier` are frozen at assignment time: later
/// changes to pricing settings or to the partner's tier must not alter
/// them, because billing treats them as historical facts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PartnerAssignment {
    /// Unique identifier.
    pub id: Uuid,
    /// The lead this assignment belongs to.
    pub lead_id: String,
    /// The partner the lead was offered to.
    pub partner_id: Uuid,
    /// pending/accepted/rejected/cancelled.
    pub status: String,
    /// Per-lead price in effect at assignment time. Immutable.
    pub lead_price: f64,
    /// Partner tier at assignment time. Immutable.
    pub partner_tier: String,
    /// When the lead was offered.
    pub assigned_at: DateTime<Utc>,
    /// When the partner accepted, if they did.
    pub accepted_at: Option<DateTime<Utc>>,
    /// When the partner rejected, if they did.
    pub rejected_at: Option<DateTime<Utc>>,
    /// Whether a cancellation has been requested (two-phase: the status
    /// stays until an administrator approves).
    pub cancellation_requested: bool,
    /// Partner-supplied cancellation reason.
    pub cancellation_reason: Option<String>,
    /// When the cancellation was requested.
    pub cancellation_requested_at: Option<DateTime<Utc>>,
    /// Whether an administrator approved the cancellation.
    pub cancellation_approved: bool,
    /// When the cancellation was approved.
    pub cancellation_approved_at: Option<DateTime<Utc>>,
    /// Whether an administrator rejected the cancellation request.
    pub cancellation_rejected: bool,
    /// Admin reason for rejecting the cancellation request.
    pub cancellation_rejection_reason: Option<String>,
    /// Set when this assignment is first included in an invoice; guards
    /// against the same assignment being billed twice across overlapping
    /// periods.
    pub invoice_id: Option<Uuid>,
}

impl PartnerAssignment {
    pub fn assignment_status(&self) -> AssignmentStatus {
        AssignmentStatus::parse(&self.status).unwrap_or(AssignmentStatus::Pending)
    }

    pub fn tier(&self) -> PartnerTier {
        PartnerTier::parse(&self.partner_tier).unwrap_or(PartnerTier::Basic)
    }

    /// Active assignments are those neither rejected nor cancelled.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.assignment_status(),
            AssignmentStatus::Rejected | AssignmentStatus::Cancelled
        )
    }

    /// A cancellation request still awaiting an admin decision.
    pub fn has_pending_cancellation(&self) -> bool {
        self.cancellation_requested && !self.cancellation_approved && !self.cancellation_rejected
    }
}

/// An invoice issued to a partner for a set of accepted leads.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier.
    pub id: Uuid,
    /// Invoiced partner.
    pub partner_id: Uuid,
    /// Service vertical the invoice covers.
    pub service_type: String,
    /// Billing period start (inclusive).
    pub period_start: DateTime<Utc>,
    /// Billing period end (inclusive).
    pub period_end: DateTime<Utc>,
    /// Sum of line amounts.
    pub subtotal: f64,
    /// Tax applied on the subtotal.
    pub tax_amount: f64,
    /// subtotal + tax_amount.
    pub total: f64,
    /// draft/sent/paid/overdue/cancelled.
    pub status: String,
    /// Payment due date.
    pub due_date: DateTime<Utc>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// One lead line item on an invoice, at its frozen (or admin-overridden)
/// price.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub lead_id: String,
    /// Billed amount: the assignment's frozen price unless overridden.
    pub amount: f64,
    /// When the partner accepted the underlying assignment.
    pub accepted_at: Option<DateTime<Utc>>,
}

/// Platform-recognized income for one accepted (lead, partner) pair.
/// At most one row may exist per pair.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Revenue {
    pub id: Uuid,
    pub lead_id: String,
    pub partner_id: Uuid,
    /// Gross amount (the billed line price).
    pub amount: f64,
    /// Platform commission (fixed percentage of amount).
    pub commission: f64,
    /// amount - commission.
    pub net_revenue: f64,
    /// confirmed/pending/cancelled.
    pub status: String,
    /// The assignment's acceptance timestamp.
    pub revenue_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ============ Billing Period ============

/// Inclusive date-time window accepted assignments are aggregated over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// ============ API Request/Response Models ============

/// Request payload for lead intake.
#[derive(Debug, Deserialize)]
pub struct CreateLeadRequest {
    /// Optional caller-supplied ID; generated when absent.
    pub id: Option<String>,
    pub service_type: ServiceType,
    /// Arbitrary per-service form payload.
    #[serde(default)]
    pub form_data: serde_json::Value,
}

/// Request payload for partner registration.
#[derive(Debug, Deserialize)]
pub struct CreatePartnerRequest {
    pub company_name: String,
    pub service_type: ServiceType,
    #[serde(default = "default_tier")]
    pub tier: PartnerTier,
    #[serde(default)]
    pub service_areas: ServiceAreaMap,
    pub weekly_lead_limit: Option<i32>,
}

fn default_tier() -> PartnerTier {
    PartnerTier::Basic
}

/// Outcome code of an auto-assignment attempt. "No match" outcomes are
/// expected in steady state and are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOutcome {
    Assigned,
    LeadNotAvailable,
    NoEligiblePartners,
    SelectionFailed,
}

/// Result of `auto_assign`, returned to the caller/job scheduler.
#[derive(Debug, Serialize)]
pub struct AssignResult {
    pub success: bool,
    pub outcome: AssignOutcome,
    pub partner: Option<AssignedPartner>,
    pub message: String,
}

/// The partner selected by an assignment, with the frozen price.
#[derive(Debug, Serialize)]
pub struct AssignedPartner {
    pub partner_id: Uuid,
    pub company_name: String,
    pub partner_tier: PartnerTier,
    pub lead_price: f64,
}

/// Body of the assignment status update endpoint.
#[derive(Debug, Deserialize)]
pub struct UpdateAssignmentRequest {
    pub status: AssignmentAction,
    pub reason: Option<String>,
}

/// Actions a partner may take on an assignment. A cancellation request
/// only sets the request flag; it does not cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAction {
    Accepted,
    Rejected,
    CancellationRequested,
}

/// Body of the admin cancellation decision endpoint.
#[derive(Debug, Deserialize)]
pub struct CancellationDecisionRequest {
    pub approve: bool,
    pub reason: Option<String>,
}

/// Request payload for invoice generation.
#[derive(Debug, Deserialize)]
pub struct GenerateInvoiceRequest {
    pub partner_id: Uuid,
    pub service_type: ServiceType,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Restricts billing to exactly these leads when present.
    pub selected_lead_ids: Option<Vec<String>>,
    /// Per-lead admin price overrides, keyed by lead ID.
    #[serde(default)]
    pub price_overrides: BTreeMap<String, f64>,
}

/// Request payload for a bulk invoice run.
#[derive(Debug, Deserialize)]
pub struct BulkInvoiceRequest {
    pub service_type: ServiceType,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// An invoice together with its line items.
#[derive(Debug, Serialize)]
pub struct InvoiceWithLines {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub lines: Vec<InvoiceLine>,
}

/// One row of the billing-ready partner summary.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BillingReadyPartner {
    pub partner_id: Uuid,
    pub partner_name: String,
    pub partner_type: String,
    pub accepted_leads: i64,
    pub total_amount: f64,
    pub avg_lead_price: f64,
}

/// Per-service bucket of an income summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IncomeBucket {
    pub income: f64,
    pub leads: i64,
    pub avg_price: f64,
}

/// Per-partner bucket, with identifying info.
#[derive(Debug, Clone, Serialize)]
pub struct PartnerIncomeBucket {
    pub partner_name: String,
    pub partner_type: String,
    pub income: f64,
    pub leads: i64,
    pub avg_price: f64,
}

/// Read-only income aggregation over accepted assignments in a period.
#[derive(Debug, Serialize)]
pub struct IncomeSummary {
    pub total_income: f64,
    pub total_leads: i64,
    pub by_service: BTreeMap<String, IncomeBucket>,
    pub by_partner: BTreeMap<Uuid, PartnerIncomeBucket>,
}

// ============ Helpers ============

/// Round a monetary or distance value to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Monday of the ISO week containing `date`; anchors the lazy weekly
/// counter reset.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    use chrono::Datelike;
    date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn week_start_is_monday() {
        // 2026-08-26 is a Wednesday
        let wed = NaiveDate::from_ymd_opt(2026, 8, 26).unwrap();
        let mon = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
        assert_eq!(week_start(wed), mon);
        assert_eq!(week_start(mon), mon);
        // Sunday still belongs to the week started the previous Monday
        let sun = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        assert_eq!(week_start(sun), mon);
    }

    #[test]
    fn round2_behaves() {
        assert_eq!(round2(2.249_5), 2.25);
        assert_eq!(round2(19.0), 19.0);
        assert_eq!(round2(0.005), 0.01);
    }

    #[test]
    fn service_area_map_parses_both_modes() {
        let json = serde_json::json!({
            "Germany": {
                "type": "cities",
                "cities": {
                    "Berlin": { "radius": 10.0, "coordinates": { "lat": 52.50, "lng": 13.40 } }
                }
            },
            "Austria": { "type": "country", "cities": {} }
        });
        let map: ServiceAreaMap = serde_json::from_value(json).unwrap();
        assert_eq!(map["Germany"].mode, AreaMode::Cities);
        assert_eq!(map["Germany"].cities["Berlin"].radius_km, 10.0);
        assert_eq!(map["Austria"].mode, AreaMode::Country);
        assert!(map["Austria"].cities.is_empty());
    }

    #[test]
    fn stale_weekly_counter_reads_as_zero() {
        let mut partner = test_partner();
        partner.weekly_leads_received = 7;
        partner.week_started_on = NaiveDate::from_ymd_opt(2026, 8, 17);
        let this_week = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
        assert_eq!(partner.weekly_count(this_week), 0);
        partner.week_started_on = Some(this_week);
        assert_eq!(partner.weekly_count(this_week), 7);
    }

    fn test_partner() -> Partner {
        Partner {
            id: Uuid::new_v4(),
            company_name: "Test Movers".to_string(),
            service_type: "moving".to_string(),
            tier: "basic".to_string(),
            status: "active".to_string(),
            weekly_lead_limit: None,
            service_areas: serde_json::json!({}),
            total_leads_received: 0,
            total_leads_accepted: 0,
            weekly_leads_received: 0,
            week_started_on: None,
            total_revenue: 0.0,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}
