//! Great-circle distance between two locations.

use crate::model::Location;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometers.
///
/// Returns `f64::INFINITY` when either side is missing a coordinate (or
/// carries a non-finite one), so any `<= radius` check rejects it.
pub fn distance(a: &Location, b: &Location) -> f64 {
    let (Some((lat1, lon1)), Some((lat2, lon2))) = (a.coordinates(), b.coordinates()) else {
        return f64::INFINITY;
    };

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1 for antipodal points.
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}
