//! Runtime settings for the pipeline
//!
//! Derived once from the bootstrap [`LocalistConfig`] and shared read-only
//! by every agent.

use crate::coordinator::scheduler::ScheduleSpec;
use crate::error::{PipelineError, PipelineResult};
use localist_common::config::LocalistConfig;

/// Settings every stage reads
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Merge only when the best candidate scores strictly above this
    pub similarity_threshold: f64,
    /// Location component reaches zero at this distance
    pub proximity_meters: f64,
    pub scorer_cooldown: chrono::Duration,
    pub max_lock_wait_ms: u64,
    /// Pending Bronze records handled per Reconciler run
    pub reconcile_batch_size: i64,
    pub event_triggers: bool,
    pub event_capacity: usize,
    pub reconciler_schedule: Option<ScheduleSpec>,
    pub scorer_schedule: Option<ScheduleSpec>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            proximity_meters: 50.0,
            scorer_cooldown: chrono::Duration::minutes(60),
            max_lock_wait_ms: 5000,
            reconcile_batch_size: 1000,
            event_triggers: true,
            event_capacity: 256,
            reconciler_schedule: None,
            scorer_schedule: None,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &LocalistConfig) -> PipelineResult<Self> {
        let cooldown = i64::try_from(config.scoring.cooldown_minutes)
            .map_err(|_| PipelineError::Config("scoring.cooldown_minutes is too large".to_string()))?;

        Ok(Self {
            similarity_threshold: config.matching.similarity_threshold,
            proximity_meters: config.matching.proximity_meters,
            scorer_cooldown: chrono::Duration::minutes(cooldown),
            max_lock_wait_ms: config.storage.max_lock_wait_ms,
            event_triggers: config.coordinator.event_triggers,
            event_capacity: config.coordinator.event_capacity,
            reconciler_schedule: parse_optional(config.coordinator.reconciler_schedule.as_deref())?,
            scorer_schedule: parse_optional(config.coordinator.scorer_schedule.as_deref())?,
            ..Self::default()
        })
    }
}

/// Parse an optional schedule string; `None` and "off" mean unscheduled
pub fn parse_optional(value: Option<&str>) -> PipelineResult<Option<ScheduleSpec>> {
    match value.map(str::trim) {
        None | Some("") | Some("off") | Some("manual") => Ok(None),
        Some(spec) => ScheduleSpec::parse(spec).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_default_config() {
        let settings = PipelineSettings::from_config(&LocalistConfig::default()).unwrap();
        assert_eq!(settings.similarity_threshold, 0.85);
        assert_eq!(settings.proximity_meters, 50.0);
        assert_eq!(settings.scorer_cooldown, chrono::Duration::minutes(60));
        assert_eq!(settings.reconciler_schedule, Some(ScheduleSpec::Minutes(15)));
        assert_eq!(settings.scorer_schedule, Some(ScheduleSpec::Hours(1)));
    }

    #[test]
    fn test_manual_schedule_is_none() {
        assert_eq!(parse_optional(Some("manual")).unwrap(), None);
        assert_eq!(parse_optional(None).unwrap(), None);
        assert!(parse_optional(Some("every tuesday")).is_err());
    }
}
