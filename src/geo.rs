//! Great-circle distance and radius checks for service-area matching.
//!
//! Pure functions, safe to call concurrently from any number of threads.
//! Matching always operates on already-stored coordinates; nothing here
//! triggers geocoding.

use crate::models::{round2, Coordinates};

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Error raised for malformed latitude/longitude input.
///
/// Callers scanning many partners must treat the offending point as
/// non-matching instead of aborting the whole eligibility scan.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidCoordinate {
    pub lat: f64,
    pub lng: f64,
}

impl std::fmt::Display for InvalidCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid coordinate (lat: {}, lng: {}); lat must be in [-90, 90], lng in [-180, 180]",
            self.lat, self.lng
        )
    }
}

impl std::error::Error for InvalidCoordinate {}

fn validate(point: Coordinates) -> Result<Coordinates, InvalidCoordinate> {
    let ok = point.lat.is_finite()
        && point.lng.is_finite()
        && (-90.0..=90.0).contains(&point.lat)
        && (-180.0..=180.0).contains(&point.lng);
    if ok {
        Ok(point)
    } else {
        Err(InvalidCoordinate {
            lat: point.lat,
            lng: point.lng,
        })
    }
}

/// Haversine distance between two points in kilometers, rounded to 2
/// decimal places.
pub fn distance_km(a: Coordinates, b: Coordinates) -> Result<f64, InvalidCoordinate> {
    let a = validate(a)?;
    let b = validate(b)?;

    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    Ok(round2(EARTH_RADIUS_KM * c))
}

/// Result of a radius check.
#[derive(Debug, Clone, PartialEq)]
pub struct RadiusCheck {
    pub within_radius: bool,
    /// Distance in km when it could be computed.
    pub distance_km: Option<f64>,
    /// Diagnostic reason when the check could not match.
    pub reason: Option<&'static str>,
}

impl RadiusCheck {
    fn no_match(reason: &'static str) -> Self {
        Self {
            within_radius: false,
            distance_km: None,
            reason: Some(reason),
        }
    }
}

/// Checks whether `point` lies within `radius_km` of `center`.
///
/// A radius of 0 (or negative) and an absent center always yield a
/// non-match with a diagnostic reason. The boundary is inclusive:
/// distance == radius counts as within.
pub fn is_within_radius(
    point: Coordinates,
    center: Option<Coordinates>,
    radius_km: f64,
) -> RadiusCheck {
    let Some(center) = center else {
        return RadiusCheck::no_match("city has no reference coordinates");
    };
    if radius_km <= 0.0 {
        return RadiusCheck::no_match("radius is zero or negative");
    }
    match distance_km(point, center) {
        Ok(distance) => RadiusCheck {
            within_radius: distance <= radius_km,
            distance_km: Some(distance),
            reason: None,
        },
        Err(_) => RadiusCheck::no_match("invalid coordinates"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lng: f64) -> Coordinates {
        Coordinates { lat, lng }
    }

    #[test]
    fn berlin_center_to_nearby_point() {
        // Lead at Berlin Alexanderplatz area vs. a partner city center a
        // couple of kilometers away.
        let lead = point(52.52, 13.405);
        let center = point(52.50, 13.40);
        let d = distance_km(lead, center).unwrap();
        assert!(d > 2.0 && d < 2.5, "expected ~2.25km, got {}", d);
    }

    #[test]
    fn zero_distance_for_identical_points() {
        let p = point(48.137, 11.575);
        assert_eq!(distance_km(p, p).unwrap(), 0.0);
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        let err = distance_km(point(91.0, 0.0), point(0.0, 0.0)).unwrap_err();
        assert_eq!(err.lat, 91.0);
        assert!(distance_km(point(0.0, 0.0), point(0.0, -180.1)).is_err());
        assert!(distance_km(point(f64::NAN, 0.0), point(0.0, 0.0)).is_err());
    }

    #[test]
    fn boundary_distance_counts_as_within() {
        // Pick a center/point pair, then use the computed distance as the
        // radius; the check must be inclusive at the boundary.
        let p = point(52.52, 13.405);
        let c = point(52.50, 13.40);
        let d = distance_km(p, c).unwrap();
        let check = is_within_radius(p, Some(c), d);
        assert!(check.within_radius);
        assert_eq!(check.distance_km, Some(d));
    }

    #[test]
    fn zero_radius_never_matches() {
        let p = point(52.52, 13.405);
        let check = is_within_radius(p, Some(p), 0.0);
        assert!(!check.within_radius);
        assert!(check.reason.is_some());
    }

    #[test]
    fn missing_center_never_matches() {
        let check = is_within_radius(point(52.52, 13.405), None, 50.0);
        assert!(!check.within_radius);
        assert_eq!(check.reason, Some("city has no reference coordinates"));
    }
}
