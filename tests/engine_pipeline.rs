//! End-to-end pipeline tests
//!
//! These walk the full monitoring flow against an in-process engine:
//! - Warm-up traffic and baseline computation
//! - Fault injection, anomaly scoring, and incident creation
//! - Open-incident dedup under consecutive failures
//! - Blast radius, deployment correlation, on-call assignment, and
//!   runbook suggestions on a fresh incident
//! - Resolution, memory indexing, and similar-incident lookup

use anyhow::Result;
use chrono::{Duration, Utc};
use sentinel_engine::{
    DependencyKind, Deployment, DeploymentStatus, EngineConfig, HealthSample, IncidentStatus,
    OnCallEntry, Runbook, SentinelEngine, Service, ServiceClass, Severity,
};
use std::collections::HashSet;
use uuid::Uuid;

struct Scenario {
    engine: SentinelEngine,
    database: Service,
    api: Service,
    web: Service,
    batch: Service,
}

/// Database feeds the API (hard), the API feeds the web tier (soft), and
/// a batch consumer hangs off the database optionally.
async fn build_scenario() -> Result<Scenario> {
    let engine = SentinelEngine::new(EngineConfig::default());

    let database = engine
        .register_service("postgres-primary", ServiceClass::Critical, 0.95)
        .await?;
    let api = engine
        .register_service("api-gateway", ServiceClass::Critical, 0.85)
        .await?;
    let web = engine
        .register_service("web-frontend", ServiceClass::Standard, 0.5)
        .await?;
    let batch = engine
        .register_service("batch-reports", ServiceClass::Standard, 0.2)
        .await?;

    engine
        .add_dependency(database.id, api.id, DependencyKind::Hard)
        .await?;
    engine
        .add_dependency(api.id, web.id, DependencyKind::Soft)
        .await?;
    engine
        .add_dependency(database.id, batch.id, DependencyKind::Optional)
        .await?;

    Ok(Scenario {
        engine,
        database,
        api,
        web,
        batch,
    })
}

async fn warm_up(engine: &SentinelEngine, services: &[&Service]) -> Result<()> {
    for service in services {
        for i in 0..120 {
            let latency = 80.0 + (i % 7) as f64 * 4.0;
            engine
                .ingest_sample(HealthSample::new(service.id, latency, true), None)
                .await?;
        }
    }
    let baselines = engine.refresh_baselines(Duration::minutes(30)).await;
    assert_eq!(baselines.len(), services.len());
    Ok(())
}

fn oncall(responder: &str, priority: u8) -> OnCallEntry {
    let now = Utc::now();
    OnCallEntry {
        id: Uuid::new_v4(),
        team: "sre".to_string(),
        responder: responder.to_string(),
        contact_channels: vec![format!("slack:@{responder}")],
        starts_at: now - Duration::hours(1),
        ends_at: now + Duration::hours(11),
        priority,
        severities: [Severity::P0, Severity::P1, Severity::P2, Severity::P3]
            .into_iter()
            .collect(),
        service_scope: HashSet::new(),
        is_active: true,
    }
}

fn embedding(seed: f32) -> Vec<f32> {
    (0..384).map(|i| ((i as f32 + 1.0) * seed).sin()).collect()
}

#[tokio::test]
async fn test_fault_opens_one_incident_with_full_triage() -> Result<()> {
    let scenario = build_scenario().await?;
    let engine = &scenario.engine;
    warm_up(
        engine,
        &[
            &scenario.database,
            &scenario.api,
            &scenario.web,
            &scenario.batch,
        ],
    )
    .await?;

    engine.add_oncall_entry(oncall("primary", 1)).await;
    engine.add_oncall_entry(oncall("secondary", 2)).await;

    let proven = engine
        .add_runbook({
            let mut r = Runbook::new(
                "recycle connection pool",
                "response_time anomaly",
                None,
                vec!["recycle the pool".to_string()],
            );
            r.times_used = 10;
            r.success_count = 8;
            r
        })
        .await?;
    let unproven = engine
        .add_runbook({
            let mut r = Runbook::new(
                "restart database",
                "anomaly on postgres",
                Some(scenario.database.id),
                vec!["restart postgres".to_string()],
            );
            r.times_used = 5;
            r.success_count = 3;
            r
        })
        .await?;

    // A deployment shortly before the fault, with a clear error-rate
    // regression.
    let suspect = Deployment {
        id: Uuid::new_v4(),
        service_id: scenario.database.id,
        version_from: "14.2".to_string(),
        version_to: "14.3".to_string(),
        status: DeploymentStatus::Succeeded,
        started_at: Utc::now() - Duration::minutes(10),
        finished_at: Some(Utc::now() - Duration::minutes(8)),
        pre_error_rate: 0.01,
        post_error_rate: Some(0.08),
        pre_latency_ms: 90.0,
        post_latency_ms: Some(95.0),
        caused_incident: false,
        rollback_recommended: false,
    };
    engine.record_deployment(suspect.clone()).await;

    // Inject the fault: five consecutive critical samples.
    let mut created_count = 0;
    let mut last_report = None;
    for _ in 0..5 {
        let report = engine
            .ingest_sample(
                HealthSample::new(scenario.database.id, 900.0, false),
                Some(-0.9),
            )
            .await?;
        if report.incident_created {
            created_count += 1;
        }
        last_report = Some(report);
    }
    let report = last_report.unwrap();
    let incident = report.incident.clone().expect("incident must be open");

    // Dedup invariant: one creation, one open incident, counter at 5.
    assert_eq!(created_count, 1);
    assert_eq!(incident.consecutive_failures, 5);
    let open: Vec<_> = engine
        .list_incidents()
        .await
        .into_iter()
        .filter(|i| i.is_open())
        .collect();
    assert_eq!(open.len(), 1);

    // Severity: near-max criticality and a saturating deviation.
    assert!(incident.severity <= Severity::P1);

    // Blast radius: api and web via hard/soft, batch excluded (optional).
    assert_eq!(incident.blast_radius, 3);
    assert_eq!(
        incident.affected_services,
        [scenario.api.id, scenario.web.id].into_iter().collect()
    );
    assert!(!incident.affected_services.contains(&scenario.batch.id));

    // Deployment correlation linked the suspect and suggested rollback.
    assert_eq!(incident.deployment_id, Some(suspect.id));
    assert!(incident.suggested_rollback);

    // Escalation: the priority-1 responder was paged and assigned; the
    // first creating report carried the page, later ones enrich only.
    assert_eq!(incident.assigned_to.as_deref(), Some("primary"));
    assert_eq!(incident.status, IncidentStatus::Alerting);

    // Timeline accumulated detection, assignment, and annotations.
    let timeline = engine.timeline(incident.id).await;
    assert!(timeline.len() >= 3);

    // The incident's runbook suggestions surfaced on creation. Verify
    // ranking through a direct match of the same error text.
    let matches = engine
        .runbooks()
        .match_incident(
            "response_time anomaly on postgres-primary: observed 900.00 against baseline 92.00",
            scenario.database.id,
        )
        .await;
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].runbook_id, proven.id);
    assert_eq!(matches[1].runbook_id, unproven.id);

    Ok(())
}

#[tokio::test]
async fn test_missing_responder_degrades_but_incident_survives() -> Result<()> {
    let scenario = build_scenario().await?;
    let engine = &scenario.engine;
    warm_up(engine, &[&scenario.database]).await?;

    // No on-call entries registered at all.
    let report = engine
        .ingest_sample(
            HealthSample::new(scenario.database.id, 900.0, false),
            Some(-0.9),
        )
        .await?;

    let incident = report.incident.expect("incident still created");
    assert!(report.page.is_none());
    assert!(incident.assigned_to.is_none());
    assert_eq!(incident.status, IncidentStatus::Alerting);
    Ok(())
}

#[tokio::test]
async fn test_samples_recorded_even_when_unevaluable() -> Result<()> {
    let scenario = build_scenario().await?;
    let engine = &scenario.engine;

    // No baseline yet: ingestion must still record and report cleanly.
    for _ in 0..10 {
        let report = engine
            .ingest_sample(HealthSample::new(scenario.web.id, 55.0, true), None)
            .await?;
        assert!(report.anomaly.is_none());
    }
    assert_eq!(engine.store().sample_count(scenario.web.id).await, 10);
    Ok(())
}

#[tokio::test]
async fn test_resolution_feeds_memory_index_and_similarity() -> Result<()> {
    let scenario = build_scenario().await?;
    let engine = &scenario.engine;
    warm_up(engine, &[&scenario.database, &scenario.api]).await?;

    // First incident: database fault, resolved with an embedding.
    let report = engine
        .ingest_sample(
            HealthSample::new(scenario.database.id, 900.0, false),
            Some(-0.9),
        )
        .await?;
    let first = report.incident.expect("database incident");

    engine.acknowledge_incident(first.id, "primary").await?;
    let vector = embedding(0.42);
    let resolved = engine
        .resolve_incident(
            first.id,
            "connection pool exhaustion",
            "recycled the connection pool",
            Some(vector.clone()),
        )
        .await?;

    assert_eq!(resolved.status, IncidentStatus::Resolved);
    assert!(resolved.mtta().is_some());
    assert!(resolved.mttr().is_some());
    assert_eq!(engine.memory_index().len().await, 1);

    // Second incident on the API; the same symptom embedding should
    // surface the resolved database incident at similarity 1.0.
    let report = engine
        .ingest_sample(
            HealthSample::new(scenario.api.id, 900.0, false),
            Some(-0.9),
        )
        .await?;
    let second = report.incident.expect("api incident");

    let hits = engine.suggest_similar(second.id, &vector).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].incident_id, first.id);
    assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    assert_eq!(hits[0].service_name, "postgres-primary");
    assert_eq!(
        hits[0].remediation.as_deref(),
        Some("recycled the connection pool")
    );

    let annotated = engine.get_incident(second.id).await?;
    assert_eq!(annotated.similar_incidents, vec![first.id]);
    Ok(())
}

#[tokio::test]
async fn test_runbook_feedback_reorders_ranking() -> Result<()> {
    let scenario = build_scenario().await?;
    let engine = &scenario.engine;

    let veteran = engine
        .add_runbook({
            let mut r = Runbook::new("veteran", "timeout", None, vec![]);
            r.times_used = 10;
            r.success_count = 6; // 0.6
            r
        })
        .await?;
    let challenger = engine
        .add_runbook({
            let mut r = Runbook::new("challenger", "timeout", None, vec![]);
            r.times_used = 2;
            r.success_count = 1; // 0.5
            r
        })
        .await?;

    let before = engine
        .runbooks()
        .match_incident("timeout", scenario.web.id)
        .await;
    assert_eq!(before[0].runbook_id, veteran.id);

    // The challenger keeps working; its derived rate overtakes.
    let incident_id = Uuid::new_v4();
    for _ in 0..8 {
        engine
            .record_runbook_execution(incident_id, challenger.id, true, "operator")
            .await?;
    }

    let after = engine
        .runbooks()
        .match_incident("timeout", scenario.web.id)
        .await;
    assert_eq!(after[0].runbook_id, challenger.id);
    assert!((after[0].success_rate - 0.9).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_resolved_service_can_fail_again_as_new_incident() -> Result<()> {
    let scenario = build_scenario().await?;
    let engine = &scenario.engine;
    warm_up(engine, &[&scenario.database]).await?;

    let report = engine
        .ingest_sample(
            HealthSample::new(scenario.database.id, 900.0, false),
            Some(-0.9),
        )
        .await?;
    let first = report.incident.expect("first incident");
    engine
        .resolve_incident(first.id, "cause", "fix", None)
        .await?;

    let report = engine
        .ingest_sample(
            HealthSample::new(scenario.database.id, 900.0, false),
            Some(-0.9),
        )
        .await?;
    let second = report.incident.expect("second incident");

    assert!(report.incident_created);
    assert_ne!(second.id, first.id);
    assert_eq!(second.consecutive_failures, 1);
    Ok(())
}
