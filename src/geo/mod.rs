use uuid::Uuid;

use crate::models::driver::{Driver, GeoPoint};

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverMatch {
    pub driver_id: Uuid,
    pub distance_km: f64,
}

/// Picks the candidate closest to `target`.
///
/// Candidates without a reported position are never selected. Equidistant
/// candidates resolve to the lowest driver id, which is deterministic but
/// carries no fairness guarantee (idle time is not considered).
pub fn nearest_driver<'a, I>(target: &GeoPoint, candidates: I) -> Option<DriverMatch>
where
    I: IntoIterator<Item = &'a Driver>,
{
    candidates
        .into_iter()
        .filter_map(|driver| {
            driver.location.as_ref().map(|location| DriverMatch {
                driver_id: driver.id,
                distance_km: haversine_km(location, target),
            })
        })
        .min_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{haversine_km, nearest_driver};
    use crate::models::driver::{Driver, GeoPoint};

    fn driver(id_seed: u128, location: Option<(f64, f64)>) -> Driver {
        Driver {
            id: Uuid::from_u128(id_seed),
            name: "test-driver".to_string(),
            phone: None,
            is_available: true,
            location: location.map(|(lat, lng)| GeoPoint { lat, lng }),
            is_active: true,
            is_blocked: false,
            push_token: None,
            updated_at: Utc::now(),
        }
    }

    // One degree of latitude is ~111.19 km on a 6371 km sphere.
    fn km_north(km: f64) -> (f64, f64) {
        (km / 111.195, 0.0)
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 6.5244,
            lng: 3.3792,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn nearest_of_one_five_and_ten_km_wins() {
        let target = GeoPoint { lat: 0.0, lng: 0.0 };
        let drivers = vec![
            driver(10, Some(km_north(10.0))),
            driver(5, Some(km_north(5.0))),
            driver(1, Some(km_north(1.0))),
        ];

        let found = nearest_driver(&target, &drivers).unwrap();
        assert_eq!(found.driver_id, Uuid::from_u128(1));
        assert!((found.distance_km - 1.0).abs() < 0.01);
    }

    #[test]
    fn empty_candidate_set_yields_none() {
        let target = GeoPoint { lat: 0.0, lng: 0.0 };
        assert!(nearest_driver(&target, &Vec::<Driver>::new()).is_none());
    }

    #[test]
    fn candidate_without_position_is_never_selected() {
        let target = GeoPoint { lat: 0.0, lng: 0.0 };
        let only_unlocated = vec![driver(1, None)];
        assert!(nearest_driver(&target, &only_unlocated).is_none());

        let mixed = vec![driver(1, None), driver(2, Some(km_north(50.0)))];
        let found = nearest_driver(&target, &mixed).unwrap();
        assert_eq!(found.driver_id, Uuid::from_u128(2));
    }

    #[test]
    fn equidistant_candidates_resolve_to_lowest_id() {
        let target = GeoPoint { lat: 0.0, lng: 0.0 };
        let drivers = vec![
            driver(9, Some(km_north(3.0))),
            driver(4, Some(km_north(3.0))),
        ];

        let found = nearest_driver(&target, &drivers).unwrap();
        assert_eq!(found.driver_id, Uuid::from_u128(4));
    }
}
