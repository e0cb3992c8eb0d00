//! Database access for localist-pipeline
//!
//! Free async functions over a `SqlitePool`, or over a `SqliteConnection`
//! when the caller needs them inside its own transaction.

pub mod agents;
pub mod algorithms;
pub mod bronze;
pub mod gold;
pub mod mappings;
pub mod quality;
pub mod silver;
pub mod sources;

use localist_common::{Error, Result};

/// Decode a JSON string-array column
pub(crate) fn parse_tags(text: &str) -> Result<Vec<String>> {
    serde_json::from_str(text)
        .map_err(|e| Error::Internal(format!("Failed to deserialize tags: {}", e)))
}

/// Encode tags for a JSON string-array column
pub(crate) fn tags_to_json(tags: &[String]) -> Result<String> {
    Ok(serde_json::to_string(tags)?)
}

/// Case-folded, trimmed, deduplicated tags in stable order
pub(crate) fn clean_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_tags_sorted_unique() {
        let tags = vec![
            "Patio".to_string(),
            " late_night ".to_string(),
            "patio".to_string(),
            "".to_string(),
        ];
        assert_eq!(clean_tags(&tags), vec!["late_night", "patio"]);
    }

    #[test]
    fn test_tags_json_round_trip() {
        let tags = vec!["a".to_string(), "b".to_string()];
        assert_eq!(parse_tags(&tags_to_json(&tags).unwrap()).unwrap(), tags);
    }
}
