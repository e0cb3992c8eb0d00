//! Fuzzy matching of Bronze records against Silver venues
//!
//! `score = 0.4·nameSim + 0.3·addressSim + 0.3·locationScore`, where the
//! string similarities are normalized Levenshtein over [`normalize`]d text.

pub mod geo;
pub mod normalize;

pub use geo::{haversine_meters, location_score};
pub use normalize::{normalize, normalize_opt};

use localist_common::db::models::{BronzeRecord, SilverVenue};
use serde::Serialize;

pub const NAME_WEIGHT: f64 = 0.4;
pub const ADDRESS_WEIGHT: f64 = 0.3;
pub const LOCATION_WEIGHT: f64 = 0.3;

/// `1 - edit_distance(a, b) / max(len(a), len(b))` over characters
///
/// Two empty strings carry no evidence and score 0.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    1.0 - strsim::levenshtein(a, b) as f64 / max_len as f64
}

/// Weighted combination of the three components
///
/// When no address comparison is possible (either side lacks one) the
/// address weight is dropped and the rest renormalized.
pub fn combine(name_sim: f64, address_sim: Option<f64>, location: f64) -> f64 {
    match address_sim {
        Some(address) => NAME_WEIGHT * name_sim + ADDRESS_WEIGHT * address + LOCATION_WEIGHT * location,
        None => (NAME_WEIGHT * name_sim + LOCATION_WEIGHT * location) / (NAME_WEIGHT + LOCATION_WEIGHT),
    }
}

/// Score breakdown for one record/venue pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchScore {
    pub name: f64,
    pub address: Option<f64>,
    pub location: f64,
    pub distance_meters: f64,
    pub total: f64,
}

/// Score a Bronze record (which must have coordinates) against one venue
pub fn score_pair(record: &BronzeRecord, venue: &SilverVenue, proximity_meters: f64) -> Option<MatchScore> {
    let (lat, lng) = record.coordinates()?;

    let name = string_similarity(&normalize(&record.name), &venue.normalized_name);
    let address = match (normalize_opt(record.address.as_deref()), venue.normalized_address.as_deref()) {
        (Some(a), Some(b)) => Some(string_similarity(&a, b)),
        _ => None,
    };
    let distance_meters = haversine_meters(lat, lng, venue.latitude, venue.longitude);
    let location = location_score(distance_meters, proximity_meters);

    Some(MatchScore {
        name,
        address,
        location,
        distance_meters,
        total: combine(name, address, location),
    })
}

/// Highest-scoring candidate for a record
///
/// `candidates` must be ordered oldest first; on equal totals the earlier
/// (older) venue is kept.
pub fn best_match(
    record: &BronzeRecord,
    candidates: &[SilverVenue],
    proximity_meters: f64,
) -> Option<(usize, MatchScore)> {
    let mut best: Option<(usize, MatchScore)> = None;
    for (idx, venue) in candidates.iter().enumerate() {
        let Some(score) = score_pair(record, venue, proximity_meters) else {
            continue;
        };
        match &best {
            Some((_, current)) if score.total <= current.total => {}
            _ => best = Some((idx, score)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use localist_common::db::models::{BronzeKind, ProcessingStatus};
    use localist_common::Payload;

    fn record(name: &str, address: Option<&str>, lat: f64, lng: f64) -> BronzeRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        BronzeRecord {
            id: "b1".to_string(),
            kind: BronzeKind::Venue,
            source_id: "src".to_string(),
            source_native_id: "n1".to_string(),
            name: name.to_string(),
            address: address.map(str::to_string),
            city: "nyc".to_string(),
            latitude: Some(lat),
            longitude: Some(lng),
            category: None,
            cuisine: None,
            tags: vec![],
            rating: None,
            rating_scale: None,
            review_count: None,
            list_position: None,
            mention_count: None,
            raw_payload: Payload::new(),
            processing_status: ProcessingStatus::Pending,
            error_message: None,
            fetched_at: ts,
            created_at: ts,
            updated_at: ts,
            processed_at: None,
        }
    }

    fn venue(id: &str, name: &str, address: Option<&str>, lat: f64, lng: f64, minute: u32) -> SilverVenue {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap();
        SilverVenue {
            id: id.to_string(),
            canonical_name: name.to_string(),
            normalized_name: normalize(name),
            address: address.map(str::to_string),
            normalized_address: normalize_opt(address),
            city: "nyc".to_string(),
            latitude: lat,
            longitude: lng,
            category: None,
            cuisine: None,
            tags: vec![],
            confidence_score: 0.5,
            source_count: 1,
            expert_score: 0.0,
            consumer_score: 0.0,
            aggregated_rating: 0.0,
            verified: false,
            active: true,
            last_verified_at: None,
            scores_updated_at: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_combined_score_is_weighted_sum() {
        // 0.4·0.9 + 0.3·0.8 + 0.3·0.6
        let total = combine(0.9, Some(0.8), 0.6);
        assert!((total - 0.78).abs() < 1e-12, "got {}", total);
        // identical inputs give identical output on every call
        assert_eq!(total, combine(0.9, Some(0.8), 0.6));
    }

    #[test]
    fn test_missing_address_renormalizes() {
        let total = combine(1.0, None, 0.5);
        assert!((total - (0.4 + 0.15) / 0.7).abs() < 1e-12);
        assert!(combine(1.0, None, 1.0) <= 1.0);
    }

    #[test]
    fn test_string_similarity() {
        assert_eq!(string_similarity("joes pizza", "joes pizza"), 1.0);
        assert!((string_similarity("abcd", "abce") - 0.75).abs() < 1e-12);
        assert_eq!(string_similarity("", ""), 0.0);
        assert_eq!(string_similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_joes_pizza_variants_match() {
        let rec = record("Joes Pizza", None, 40.7129, -74.0061);
        let v = venue("s1", "Joe's Pizza", None, 40.7128, -74.0060, 0);
        let score = score_pair(&rec, &v, 50.0).unwrap();
        assert_eq!(score.name, 1.0);
        assert!(score.address.is_none());
        assert!(score.total > 0.85, "got {}", score.total);
    }

    #[test]
    fn test_distant_namesake_does_not_match() {
        let rec = record("Joe's Pizza", Some("1435 Broadway"), 40.7547, -73.9870);
        let v = venue("s1", "Joe's Pizza", Some("7 Carmine St"), 40.7306, -74.0022, 0);
        let score = score_pair(&rec, &v, 50.0).unwrap();
        assert_eq!(score.location, 0.0);
        assert!(score.total < 0.85);
    }

    #[test]
    fn test_record_without_coordinates_is_not_scored() {
        let mut rec = record("Joe's Pizza", None, 0.0, 0.0);
        rec.latitude = None;
        let v = venue("s1", "Joe's Pizza", None, 40.7128, -74.0060, 0);
        assert!(score_pair(&rec, &v, 50.0).is_none());
        assert!(best_match(&rec, &[v], 50.0).is_none());
    }

    #[test]
    fn test_tie_prefers_earliest_candidate() {
        let rec = record("Lucali", None, 40.6800, -73.9990);
        let older = venue("old", "Lucali", None, 40.6800, -73.9990, 0);
        let newer = venue("new", "Lucali", None, 40.6800, -73.9990, 5);
        let (idx, _) = best_match(&rec, &[older, newer], 50.0).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_highest_score_wins() {
        let rec = record("Lucali", None, 40.6800, -73.9990);
        let far = venue("far", "Lucali", None, 40.6803, -73.9990, 0);
        let near = venue("near", "Lucali", None, 40.6800, -73.9990, 5);
        let (idx, score) = best_match(&rec, &[far, near], 50.0).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(score.total, 1.0);
    }
}
