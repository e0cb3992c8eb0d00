//! Raw record and Bronze fixtures

use chrono::{DateTime, Utc};
use localist_common::db::models::BronzeKind;
use localist_common::Payload;
use localist_pipeline::db::bronze::NewBronzeRecord;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Raw source JSON for one venue
pub fn raw_venue(name: &str, lat: f64, lng: f64, rating: Option<f64>) -> Value {
    let mut value = json!({
        "name": name,
        "city": "nyc",
        "lat": lat,
        "lng": lng,
        "category": "pizza",
    });
    if let Some(rating) = rating {
        value["rating"] = json!(rating);
    }
    value
}

/// Write `value` as a JSON file under `dir`
pub fn write_json(dir: &Path, file_name: &str, value: &Value) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    path
}

/// Builder for Bronze rows inserted directly, bypassing collectors
#[derive(Debug, Clone)]
pub struct NewRecordBuilder {
    record: NewBronzeRecord,
}

impl NewRecordBuilder {
    pub fn new(source_id: &str, name: &str) -> Self {
        Self {
            record: NewBronzeRecord {
                kind: BronzeKind::Venue,
                source_id: source_id.to_string(),
                source_native_id: format!("{}_nyc", name),
                name: name.to_string(),
                address: None,
                city: "nyc".to_string(),
                latitude: Some(40.7128),
                longitude: Some(-74.0060),
                category: Some("pizza".to_string()),
                cuisine: None,
                tags: vec![],
                rating: None,
                rating_scale: None,
                review_count: None,
                list_position: None,
                mention_count: Some(1),
                raw_payload: Payload::new().with("name", name),
                fetched_at: Utc::now(),
            },
        }
    }

    pub fn kind(mut self, kind: BronzeKind) -> Self {
        self.record.kind = kind;
        self
    }

    pub fn city(mut self, city: &str) -> Self {
        self.record.city = city.to_string();
        self
    }

    pub fn at(mut self, lat: f64, lng: f64) -> Self {
        self.record.latitude = Some(lat);
        self.record.longitude = Some(lng);
        self
    }

    pub fn without_coordinates(mut self) -> Self {
        self.record.latitude = None;
        self.record.longitude = None;
        self
    }

    pub fn rating(mut self, rating: f64, scale: f64) -> Self {
        self.record.rating = Some(rating);
        self.record.rating_scale = Some(scale);
        self
    }

    pub fn list_position(mut self, position: i64) -> Self {
        self.record.list_position = Some(position);
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.record.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn fetched_at(mut self, at: DateTime<Utc>) -> Self {
        self.record.fetched_at = at;
        self
    }

    pub fn build(self) -> NewBronzeRecord {
        self.record
    }
}
