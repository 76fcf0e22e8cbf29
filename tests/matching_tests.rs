/// Service-area matching scenarios: radius matching, whole-country mode,
/// the empty-map rule, and the name-based fallback for leads without
/// coordinates.
use leadmarket_api::matching::is_eligible;
use leadmarket_api::models::{Lead, Partner};
use serde_json::json;
use uuid::Uuid;

fn partner_with_areas(areas: serde_json::Value) -> Partner {
    Partner {
        id: Uuid::new_v4(),
        company_name: "Area Movers".to_string(),
        service_type: "moving".to_string(),
        tier: "basic".to_string(),
        status: "active".to_string(),
        weekly_lead_limit: None,
        service_areas: areas,
        total_leads_received: 0,
        total_leads_accepted: 0,
        weekly_leads_received: 0,
        week_started_on: None,
        total_revenue: 0.0,
        created_at: chrono::Utc::now(),
        updated_at: None,
    }
}

fn moving_lead(form: serde_json::Value) -> Lead {
    Lead {
        id: "MOVE-1000".to_string(),
        service_type: "moving".to_string(),
        status: "pending".to_string(),
        form_data: form,
        created_at: chrono::Utc::now(),
        updated_at: None,
    }
}

fn berlin_cities_area(radius: f64) -> serde_json::Value {
    json!({
        "Germany": {
            "type": "cities",
            "cities": {
                "Berlin": {
                    "radius": radius,
                    "coordinates": { "lat": 52.50, "lng": 13.40 }
                }
            }
        }
    })
}

#[test]
fn lead_inside_city_radius_matches() {
    let partner = partner_with_areas(berlin_cities_area(10.0));
    // Alexanderplatz area, a couple of km from the stored city center
    let lead = moving_lead(json!({
        "pickup_address": {
            "city": "Berlin", "country": "Germany",
            "lat": 52.52, "lng": 13.405
        },
        "destination_address": { "city": "Hamburg", "country": "Germany" }
    }));
    assert!(is_eligible(&partner, &lead));
}

#[test]
fn lead_outside_city_radius_does_not_match() {
    let partner = partner_with_areas(berlin_cities_area(10.0));
    // Leipzig is well over 100km from Berlin
    let lead = moving_lead(json!({
        "pickup_address": {
            "city": "Leipzig", "country": "Germany",
            "lat": 51.34, "lng": 12.37
        }
    }));
    assert!(!is_eligible(&partner, &lead));
}

#[test]
fn destination_point_alone_can_match() {
    let partner = partner_with_areas(berlin_cities_area(10.0));
    let lead = moving_lead(json!({
        "pickup_address": {
            "city": "Munich", "country": "Germany",
            "lat": 48.137, "lng": 11.575
        },
        "destination_address": {
            "city": "Berlin", "country": "Germany",
            "lat": 52.51, "lng": 13.41
        }
    }));
    assert!(is_eligible(&partner, &lead));
}

#[test]
fn whole_country_mode_matches_by_country_name() {
    let partner = partner_with_areas(json!({
        "Austria": { "type": "country", "cities": {} }
    }));
    let lead = moving_lead(json!({
        "pickup_address": {
            "city": "Vienna", "country": "Austria",
            "lat": 48.21, "lng": 16.37
        }
    }));
    assert!(is_eligible(&partner, &lead));

    let elsewhere = moving_lead(json!({
        "pickup_address": {
            "city": "Berlin", "country": "Germany",
            "lat": 52.52, "lng": 13.405
        }
    }));
    assert!(!is_eligible(&partner, &elsewhere));
}

#[test]
fn empty_service_area_map_never_matches() {
    let partner = partner_with_areas(json!({}));
    let lead = moving_lead(json!({
        "pickup_address": {
            "city": "Berlin", "country": "Germany",
            "lat": 52.50, "lng": 13.40
        }
    }));
    assert!(!is_eligible(&partner, &lead));
}

#[test]
fn malformed_service_areas_never_match() {
    let partner = partner_with_areas(json!({ "Germany": "everywhere" }));
    let lead = moving_lead(json!({
        "pickup_address": { "city": "Berlin", "lat": 52.50, "lng": 13.40 }
    }));
    assert!(!is_eligible(&partner, &lead));
}

#[test]
fn name_fallback_applies_without_coordinates() {
    let partner = partner_with_areas(berlin_cities_area(10.0));
    let lead = moving_lead(json!({
        "pickup_address": { "city": "berlin", "country": "Germany" }
    }));
    assert!(is_eligible(&partner, &lead));

    let no_match = moving_lead(json!({
        "pickup_address": { "city": "Hamburg", "country": "Germany" }
    }));
    assert!(!is_eligible(&partner, &no_match));
}

#[test]
fn country_name_fallback_without_coordinates() {
    let partner = partner_with_areas(json!({
        "Switzerland": { "type": "country", "cities": {} }
    }));
    let lead = moving_lead(json!({
        "pickup_address": { "city": "Zurich", "country": "Switzerland" }
    }));
    assert!(is_eligible(&partner, &lead));
}

#[test]
fn coordinate_bearing_lead_never_matches_a_city_without_coordinates() {
    // Radius matching needs a stored reference point; the name fallback
    // is reserved for leads with no coordinates anywhere.
    let partner = partner_with_areas(json!({
        "Germany": {
            "type": "cities",
            "cities": { "Berlin": { "radius": 10.0 } }
        }
    }));
    let with_coords = moving_lead(json!({
        "pickup_address": {
            "city": "Berlin", "country": "Germany",
            "lat": 52.51, "lng": 13.41
        }
    }));
    assert!(!is_eligible(&partner, &with_coords));

    let without_coords = moving_lead(json!({
        "pickup_address": { "city": "Berlin", "country": "Germany" }
    }));
    assert!(is_eligible(&partner, &without_coords));
}

#[test]
fn coordinates_disable_name_fallback_for_city_areas() {
    // Lead claims "Berlin" by name but its coordinates are in Munich;
    // with coordinates present, radius matching is authoritative.
    let partner = partner_with_areas(berlin_cities_area(10.0));
    let lead = moving_lead(json!({
        "pickup_address": {
            "city": "Berlin", "country": "Germany",
            "lat": 48.137, "lng": 11.575
        }
    }));
    assert!(!is_eligible(&partner, &lead));
}

#[test]
fn mixed_modes_across_countries() {
    let partner = partner_with_areas(json!({
        "Germany": {
            "type": "cities",
            "cities": {
                "Berlin": { "radius": 10.0, "coordinates": { "lat": 52.50, "lng": 13.40 } }
            }
        },
        "Austria": { "type": "country", "cities": {} }
    }));

    let vienna = moving_lead(json!({
        "pickup_address": {
            "city": "Vienna", "country": "Austria",
            "lat": 48.21, "lng": 16.37
        }
    }));
    assert!(is_eligible(&partner, &vienna));

    let berlin = moving_lead(json!({
        "pickup_address": {
            "city": "Berlin", "country": "Germany",
            "lat": 52.51, "lng": 13.41
        }
    }));
    assert!(is_eligible(&partner, &berlin));

    let munich = moving_lead(json!({
        "pickup_address": {
            "city": "Munich", "country": "Germany",
            "lat": 48.137, "lng": 11.575
        }
    }));
    assert!(!is_eligible(&partner, &munich));
}

#[test]
fn cleaning_lead_uses_single_address() {
    let mut partner = partner_with_areas(berlin_cities_area(10.0));
    partner.service_type = "cleaning".to_string();
    let lead = Lead {
        id: "CLEAN-1000".to_string(),
        service_type: "cleaning".to_string(),
        status: "pending".to_string(),
        form_data: json!({
            "address": {
                "city": "Berlin", "country": "Germany",
                "coordinates": { "lat": 52.51, "lng": 13.41 }
            }
        }),
        created_at: chrono::Utc::now(),
        updated_at: None,
    };
    assert!(is_eligible(&partner, &lead));
}
