//! Repository tests: algorithm versioning, run history, Bronze status

mod helpers;

use helpers::{create_test_db, insert_bronze, register_source, test_context, NewRecordBuilder};
use localist_common::db::models::{AgentKind, AlgorithmWeights, ProcessingStatus, RunStatus, SourceType};
use localist_common::Error;
use localist_pipeline::agents::Reconciler;
use localist_pipeline::db::{agents, algorithms, bronze, quality};
use localist_pipeline::types::{Agent, RunCounters};

#[tokio::test]
async fn test_retune_updates_unlocked_version_in_place() {
    let (_dir, pool) = create_test_db().await;
    let seeded = algorithms::seed_default_algorithm(&pool).await.unwrap();
    assert_eq!(seeded.version, 1);
    assert!(!seeded.locked);

    let again = algorithms::seed_default_algorithm(&pool).await.unwrap();
    assert_eq!(again.id, seeded.id);

    let weights = AlgorithmWeights {
        expert_weight: 0.8,
        consumer_weight: 0.2,
        recency_weight: 0.0,
        ..Default::default()
    };
    let retuned = algorithms::retune_algorithm(&pool, "balanced", &weights).await.unwrap();
    assert_eq!(retuned.id, seeded.id);
    assert_eq!(retuned.version, 1);
    assert_eq!(retuned.expert_weight, 0.8);
}

#[tokio::test]
async fn test_locked_version_is_never_modified() {
    let (_dir, pool) = create_test_db().await;
    let v1 = algorithms::seed_default_algorithm(&pool).await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    algorithms::lock_algorithm(&mut *conn, &v1.id).await.unwrap();
    drop(conn);

    let mut weights = AlgorithmWeights::default();
    weights.boost_factors.insert("late_night".to_string(), 5.0);
    let v2 = algorithms::retune_algorithm(&pool, "balanced", &weights).await.unwrap();
    assert_eq!(v2.version, 2);
    assert_ne!(v2.id, v1.id);

    let versions = algorithms::list_versions(&pool, "balanced").await.unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions[0].locked);
    assert!(versions[0].boost_factors.is_empty());
    assert_eq!(versions[1].boost_factors.get("late_night"), Some(&5.0));
}

#[tokio::test]
async fn test_ensure_algorithm_is_noop_for_equal_weights() {
    let (_dir, pool) = create_test_db().await;
    let weights = AlgorithmWeights {
        min_source_count: 2,
        ..Default::default()
    };

    let first = algorithms::ensure_algorithm(&pool, "trusted", &weights).await.unwrap();
    let mut conn = pool.acquire().await.unwrap();
    algorithms::lock_algorithm(&mut *conn, &first.id).await.unwrap();
    drop(conn);

    let second = algorithms::ensure_algorithm(&pool, "trusted", &weights).await.unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(algorithms::list_versions(&pool, "trusted").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_weights_rejected() {
    let (_dir, pool) = create_test_db().await;
    let weights = AlgorithmWeights {
        min_confidence_score: 1.5,
        ..Default::default()
    };
    let result = algorithms::retune_algorithm(&pool, "broken", &weights).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert!(algorithms::latest_algorithm(&pool, "broken").await.unwrap().is_none());
    assert!(matches!(
        algorithms::get_algorithm(&pool, "no-such-id").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_run_history_and_orphan_recovery() {
    let (_dir, pool) = create_test_db().await;
    agents::register_agent(&pool, "scorer", AgentKind::Scorer, Some("1h")).await.unwrap();

    let done = agents::start_run(&pool, "scorer").await.unwrap();
    let counters = RunCounters {
        processed: 4,
        updated: 3,
        warnings: vec!["one venue has no evidence".to_string()],
        ..Default::default()
    };
    agents::finish_run(&pool, &done, RunStatus::Completed, &counters, None).await.unwrap();

    let interrupted = agents::start_run(&pool, "scorer").await.unwrap();
    assert_eq!(agents::fail_orphaned_runs(&pool).await.unwrap(), 1);

    // A finished run cannot be finished again
    agents::finish_run(&pool, &interrupted, RunStatus::Completed, &RunCounters::default(), None)
        .await
        .unwrap();
    let recovered = agents::get_run(&pool, &interrupted).await.unwrap();
    assert_eq!(recovered.status, RunStatus::Failed);
    assert_eq!(recovered.error_message.as_deref(), Some("interrupted by restart"));

    let completed = agents::get_run(&pool, &done).await.unwrap();
    assert_eq!(completed.processed, 4);
    assert_eq!(completed.updated, 3);
    assert_eq!(completed.warnings, counters.warnings);

    assert_eq!(agents::runs_for_agent(&pool, "scorer", 10).await.unwrap().len(), 2);
    assert_eq!(agents::runs_for_agent(&pool, "scorer", 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_errored_record_can_be_reset_for_retry() {
    let (_dir, pool) = create_test_db().await;
    register_source(&pool, "eater", SourceType::Directory).await;
    let (kind, id) = insert_bronze(&pool, NewRecordBuilder::new("eater", "Joe's Pizza")).await;

    bronze::mark_error(&pool, kind, &id, "constraint failed").await.unwrap();
    let record = bronze::get_record(&pool, kind, &id).await.unwrap().unwrap();
    assert_eq!(record.processing_status, ProcessingStatus::Error);
    assert_eq!(record.error_message.as_deref(), Some("constraint failed"));

    let report = quality::data_quality_report(&pool).await.unwrap();
    assert_eq!(report.bronze[0].error, 1);

    assert_eq!(bronze::reset_errors_for_source(&pool, "eater").await.unwrap(), 1);
    let record = bronze::get_record(&pool, kind, &id).await.unwrap().unwrap();
    assert_eq!(record.processing_status, ProcessingStatus::Pending);
    assert!(record.error_message.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retune_racing_a_publish_lock_keeps_new_weights() {
    let (_dir, pool) = create_test_db().await;
    algorithms::seed_default_algorithm(&pool).await.unwrap();

    for round in 1..=20 {
        let weights = AlgorithmWeights {
            expert_weight: f64::from(round) / 100.0,
            ..Default::default()
        };

        let locker = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let latest = algorithms::latest_algorithm(&pool, "balanced").await.unwrap().unwrap();
                let mut conn = pool.acquire().await.unwrap();
                algorithms::lock_algorithm(&mut *conn, &latest.id).await.unwrap();
            })
        };
        let retuned = algorithms::retune_algorithm(&pool, "balanced", &weights).await.unwrap();
        locker.await.unwrap();

        assert_eq!(retuned.expert_weight, weights.expert_weight, "round {}", round);
        let stored = algorithms::get_algorithm(&pool, &retuned.id).await.unwrap();
        assert_eq!(stored.expert_weight, weights.expert_weight, "round {}", round);
    }

    let versions = algorithms::list_versions(&pool, "balanced").await.unwrap();
    let numbers: Vec<i64> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, (1..=versions.len() as i64).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_retune_after_lock_creates_next_version() {
    let (_dir, pool) = create_test_db().await;
    let v1 = algorithms::seed_default_algorithm(&pool).await.unwrap();
    let weights = AlgorithmWeights {
        expert_weight: 0.9,
        ..Default::default()
    };

    let mut conn = pool.acquire().await.unwrap();
    algorithms::lock_algorithm(&mut *conn, &v1.id).await.unwrap();
    drop(conn);

    let v2 = algorithms::retune_algorithm(&pool, "balanced", &weights).await.unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(v2.expert_weight, 0.9);
    assert_eq!(algorithms::get_algorithm(&pool, &v1.id).await.unwrap().expert_weight, v1.expert_weight);
}

#[tokio::test]
async fn test_reset_to_pending_skips_mapped_records() {
    let (_dir, pool) = create_test_db().await;
    let ctx = test_context(&pool);
    register_source(&pool, "eater", SourceType::Directory).await;

    let (kind, mapped) = insert_bronze(&pool, NewRecordBuilder::new("eater", "Joe's Pizza")).await;
    let mut counters = RunCounters::default();
    Reconciler::new(ctx).execute(&mut counters).await.unwrap();
    assert_eq!(counters.created, 1);

    let (_, failed) = insert_bronze(&pool, NewRecordBuilder::new("eater", "Lucali")).await;
    bronze::mark_error(&pool, kind, &failed, "bad coordinates").await.unwrap();

    // Already reconciled into a venue
    assert!(!bronze::reset_to_pending(&pool, kind, &mapped).await.unwrap());
    let record = bronze::get_record(&pool, kind, &mapped).await.unwrap().unwrap();
    assert_eq!(record.processing_status, ProcessingStatus::Processed);

    assert!(bronze::reset_to_pending(&pool, kind, &failed).await.unwrap());
    let record = bronze::get_record(&pool, kind, &failed).await.unwrap().unwrap();
    assert_eq!(record.processing_status, ProcessingStatus::Pending);
    assert!(record.error_message.is_none());
    assert!(record.processed_at.is_none());

    assert!(!bronze::reset_to_pending(&pool, kind, "no-such-record").await.unwrap());
}
