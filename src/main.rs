use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use sentinel_engine::{
    DependencyKind, EngineConfig, HealthSample, OnCallEntry, Runbook, SentinelEngine, ServiceClass,
    Severity,
};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "sentinel-engine")]
#[command(about = "Incident correlation and service topology analysis engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic monitoring scenario against an in-process engine
    Simulate {
        /// Healthy warm-up samples per service before the fault is injected
        #[arg(long, default_value = "120")]
        warmup_samples: usize,
        /// Faulty samples injected into the origin service
        #[arg(long, default_value = "5")]
        fault_samples: usize,
    },
    /// Print the effective engine configuration
    Config,
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sentinel_engine={log_level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    init_tracing(&config.log_level);

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::Simulate {
            warmup_samples,
            fault_samples,
        }) => simulate(config, warmup_samples, fault_samples).await,
        None => simulate(config, 120, 5).await,
    }
}

/// Seed a small topology, warm baselines, inject a latency fault into the
/// database service, and walk the resulting incident to resolution.
async fn simulate(config: EngineConfig, warmup_samples: usize, fault_samples: usize) -> Result<()> {
    let engine = SentinelEngine::new(config);

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
        .add_dependency(api.id, web.id, DependencyKind::Hard)
        .await?;
    engine
        .add_dependency(database.id, batch.id, DependencyKind::Optional)
        .await?;

    engine
        .add_runbook(Runbook::new(
            "recycle connection pool",
            "response_time anomaly on postgres",
            Some(database.id),
            vec![
                "check pg_stat_activity for idle-in-transaction sessions".to_string(),
                "recycle the application connection pool".to_string(),
                "verify p95 latency recovers".to_string(),
            ],
        ))
        .await?;

    let now = chrono::Utc::now();
    engine
        .add_oncall_entry(OnCallEntry {
            id: Uuid::new_v4(),
            team: "sre".to_string(),
            responder: "primary-oncall".to_string(),
            contact_channels: vec!["slack:#incident-response".to_string()],
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::hours(11),
            priority: 1,
            severities: [Severity::P0, Severity::P1, Severity::P2]
                .into_iter()
                .collect(),
            service_scope: HashSet::new(),
            is_active: true,
        })
        .await;

    // Warm-up traffic so baselines have something to chew on.
    for service in [&database, &api, &web, &batch] {
        for i in 0..warmup_samples {
            let latency = 80.0 + (i % 7) as f64 * 4.0;
            engine
                .ingest_sample(HealthSample::new(service.id, latency, true), None)
                .await?;
        }
    }
    let baselines = engine.refresh_baselines(Duration::minutes(30)).await;
    info!(count = baselines.len(), "baselines computed");

    // Inject a latency fault into the database.
    let mut last_report = None;
    for _ in 0..fault_samples {
        let report = engine
            .ingest_sample(
                HealthSample::new(database.id, 900.0, false),
                Some(-0.9), // outlier model agrees something is wrong
            )
            .await?;
        last_report = Some(report);
    }

    let report = last_report.context("no fault samples were injected")?;
    let incident = report
        .incident
        .context("fault samples did not open an incident")?;

    println!("incident {}", incident.id);
    println!("  severity:             {}", incident.severity);
    println!("  status:               {}", incident.status);
    println!("  consecutive failures: {}", incident.consecutive_failures);
    println!("  blast radius:         {}", incident.blast_radius);
    println!(
        "  assigned to:          {}",
        incident.assigned_to.as_deref().unwrap_or("<unassigned>")
    );

    engine
        .acknowledge_incident(incident.id, "primary-oncall")
        .await?;
    let resolved = engine
        .resolve_incident(
            incident.id,
            "connection pool exhaustion after deploy",
            "recycled the pool and rolled back the deploy",
            None,
        )
        .await?;

    println!(
        "  resolved, mttr: {}s",
        resolved.mttr().map(|d| d.num_seconds()).unwrap_or(0)
    );

    for event in engine.timeline(incident.id).await {
        println!(
            "  [{}] {} ({})",
            event.created_at.format("%H:%M:%S"),
            event.content,
            event.author
        );
    }

    Ok(())
}
