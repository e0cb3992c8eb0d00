//! Downstream publish hooks
//!
//! The coordinator hands every published Gold list to the registered
//! listeners (for example a serving cache that must drop stale entries).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// A Gold list that was just replaced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldPublication {
    pub list_id: String,
    pub slug: String,
    pub city: Option<String>,
    pub category: Option<String>,
    pub item_count: u64,
    pub published_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait GoldPublishListener: Send + Sync {
    async fn on_gold_published(&self, publication: &GoldPublication);
}

/// Default listener: records the invalidation in the log
#[derive(Debug, Default)]
pub struct LoggingPublishListener;

#[async_trait::async_trait]
impl GoldPublishListener for LoggingPublishListener {
    async fn on_gold_published(&self, publication: &GoldPublication) {
        info!(
            slug = %publication.slug,
            items = publication.item_count,
            "Gold list published; downstream caches for this list are stale"
        );
    }
}
