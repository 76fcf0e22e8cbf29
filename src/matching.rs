//! Service-area eligibility resolution.
//!
//! Decides whether a partner's configured service areas cover a lead's
//! location(s). Radius matching against stored coordinates is the primary
//! path; when a lead carries no coordinates at all, a name-based fallback
//! compares city/country strings. The fallback is a degraded mode and is
//! logged distinctly so accuracy regressions stay observable.

use crate::geo;
use crate::models::{AreaMode, Coordinates, CountryArea, Lead, Partner, ServiceType};
use serde_json::Value;

/// A location candidate extracted from a lead's form payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadPoint {
    /// Which address slot this came from ("pickup", "destination", ...).
    pub label: &'static str,
    pub city: Option<String>,
    pub country: Option<String>,
    pub coords: Option<Coordinates>,
}

fn string_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn coords_of(obj: &Value) -> Option<Coordinates> {
    // Either a nested coordinates object or lat/lng directly on the address
    if let Some(coords) = obj.get("coordinates") {
        if let Ok(c) = serde_json::from_value::<Coordinates>(coords.clone()) {
            return Some(c);
        }
    }
    let lat = obj
        .get("lat")
        .or_else(|| obj.get("latitude"))
        .and_then(|v| v.as_f64())?;
    let lng = obj
        .get("lng")
        .or_else(|| obj.get("longitude"))
        .and_then(|v| v.as_f64())?;
    Some(Coordinates { lat, lng })
}

fn parse_address(form: &Value, key: &str, label: &'static str) -> Option<LeadPoint> {
    let obj = form.get(key)?;
    if !obj.is_object() {
        return None;
    }
    Some(LeadPoint {
        label,
        city: string_field(obj, "city"),
        country: string_field(obj, "country"),
        coords: coords_of(obj),
    })
}

/// Extracts location candidates from a lead's form payload.
///
/// Moving leads yield the pickup and destination addresses, cleaning leads
/// the single service address. Leads of an unrecognized service type fall
/// back to a legacy single `location` field when present.
pub fn extract_lead_points(lead: &Lead) -> Vec<LeadPoint> {
    let form = &lead.form_data;
    let mut points = match ServiceType::parse(&lead.service_type) {
        Some(ServiceType::Moving) => vec![
            parse_address(form, "pickup_address", "pickup"),
            parse_address(form, "destination_address", "destination"),
        ],
        Some(ServiceType::Cleaning) => vec![parse_address(form, "address", "address")],
        None => vec![],
    }
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    if points.is_empty() {
        if let Some(legacy) = parse_address(form, "location", "location") {
            points.push(legacy);
        }
    }
    points
}

/// The scheduled/fixed date of a lead, if its form payload carries one.
/// Used by the status projection to flag past-date leads for re-attention.
pub fn extract_scheduled_date(lead: &Lead) -> Option<chrono::NaiveDate> {
    let form = &lead.form_data;
    let raw = match ServiceType::parse(&lead.service_type) {
        Some(ServiceType::Moving) => string_field(form, "move_date"),
        Some(ServiceType::Cleaning) => string_field(form, "date"),
        None => None,
    }
    .or_else(|| string_field(form, "date"));
    raw.and_then(|s| chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

/// Case-insensitive substring containment in either direction. Empty
/// strings never match.
fn names_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

fn country_entry_matches_name(country_name: &str, points: &[LeadPoint]) -> bool {
    points
        .iter()
        .any(|p| p.country.as_deref().is_some_and(|c| names_match(country_name, c)))
}

/// Whether a country entry restricts to named cities (as opposed to
/// serving the whole country). An explicit "country" mode or an empty
/// cities map both mean whole-country matching.
fn restricts_to_cities(area: &CountryArea) -> bool {
    area.mode == AreaMode::Cities && !area.cities.is_empty()
}

/// Decides whether `partner` serves `lead`'s location.
///
/// A partner with an empty service-area map is never eligible: serving
/// anywhere requires explicit opt-in. Geo errors on individual points are
/// treated as "no match" for that point, never aborting the scan.
pub fn is_eligible(partner: &Partner, lead: &Lead) -> bool {
    let areas = partner.areas();
    if areas.is_empty() {
        return false;
    }

    let points = extract_lead_points(lead);
    let has_coords = points.iter().any(|p| p.coords.is_some());

    for (country_name, area) in &areas {
        if has_coords {
            if restricts_to_cities(area) {
                for point in &points {
                    let Some(coords) = point.coords else {
                        continue;
                    };
                    for (city_name, city) in &area.cities {
                        let check = geo::is_within_radius(coords, city.coordinates, city.radius_km);
                        if check.within_radius {
                            tracing::debug!(
                                "Lead {} {} point within {}km of {} ({}, distance {:?}km) for partner {}",
                                lead.id,
                                point.label,
                                city.radius_km,
                                city_name,
                                country_name,
                                check.distance_km,
                                partner.id
                            );
                            return true;
                        }
                    }
                }
            } else if country_entry_matches_name(country_name, &points) {
                tracing::debug!(
                    "Lead {} matched whole-country entry {} for partner {}",
                    lead.id,
                    country_name,
                    partner.id
                );
                return true;
            }
        } else {
            // Degraded mode: no coordinates anywhere on the lead, fall
            // back to name-based matching.
            if restricts_to_cities(area) {
                for point in &points {
                    let Some(lead_city) = point.city.as_deref() else {
                        continue;
                    };
                    if area.cities.keys().any(|name| names_match(name, lead_city)) {
                        tracing::info!(
                            "Lead {} matched partner {} via name-based fallback (city '{}', no coordinates)",
                            lead.id,
                            partner.id,
                            lead_city
                        );
                        return true;
                    }
                }
            } else if country_entry_matches_name(country_name, &points) {
                tracing::info!(
                    "Lead {} matched partner {} via name-based fallback (country '{}', no coordinates)",
                    lead.id,
                    partner.id,
                    country_name
                );
                return true;
            }
        }
    }

    false
}
