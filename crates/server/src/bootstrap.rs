use std::sync::Arc;

use frontdesk_agent::llm::OracleError;
use frontdesk_agent::{
    BufferedTransport, OpenAiCompatibleOracle, Oracle, RuntimeSettings, SessionRegistry,
    SessionServices, ToolExecutor,
};
use frontdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use frontdesk_core::notification::NotificationError;
use frontdesk_core::{
    AuditRecorder, AuditSink, AvailabilityStore, EmergencyClassifier, FlowEngine,
    InMemoryRecordLookup, KnowledgeBase, SchedulingOrchestrator, VerificationGate,
};
use frontdesk_db::{
    connect_with_settings, migrations, practice_today, DbPool, DemoPractice, RepositoryError,
    SqlAuditSink, SqlAvailabilityStore, SqlSessionRepository,
};
use thiserror::Error;
use tracing::info;

use crate::notify::gateway_from_config;

/// Days of demo availability written at startup.
const SEED_DAYS: u32 = 14;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<SessionRegistry>,
    pub transport: Arc<BufferedTransport>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("demo practice seed failed: {0}")]
    Seed(#[source] RepositoryError),
    #[error("llm client setup failed: {0}")]
    Oracle(#[source] OracleError),
    #[error("notification gateway setup failed: {0}")]
    Notification(#[source] NotificationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let oracle = OpenAiCompatibleOracle::from_config(&config.llm).map_err(BootstrapError::Oracle)?;
    bootstrap_with_oracle(config, Arc::new(oracle)).await
}

/// Wires every collaborator around the given oracle.
pub async fn bootstrap_with_oracle(
    config: AppConfig,
    oracle: Arc<dyn Oracle>,
) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", correlation_id = "bootstrap");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", correlation_id = "bootstrap");

    let clock = config.practice.clock();
    let seeded = DemoPractice::load(&db_pool, practice_today(&clock), SEED_DAYS, &clock)
        .await
        .map_err(BootstrapError::Seed)?;
    info!(
        event_name = "system.bootstrap.practice_seeded",
        correlation_id = "bootstrap",
        providers = seeded.providers_seeded,
        slots = seeded.slots_seeded,
    );

    let records = Arc::new(InMemoryRecordLookup::with_records(DemoPractice::records()));
    for coverage in DemoPractice::coverages() {
        records.insert_coverage(coverage).await;
    }

    let policy = config.session.external_call_policy();
    let store: Arc<dyn AvailabilityStore> = Arc::new(SqlAvailabilityStore::new(db_pool.clone()));
    let audit: Arc<dyn AuditSink> = Arc::new(SqlAuditSink::new(db_pool.clone()));
    let notifier =
        gateway_from_config(&config.notification).map_err(BootstrapError::Notification)?;
    let transport = Arc::new(BufferedTransport::new());

    let gate = Arc::new(VerificationGate::new(
        records.clone(),
        config.session.max_verification_attempts,
        policy,
    ));
    let scheduling = Arc::new(SchedulingOrchestrator::new(
        store,
        records.clone(),
        notifier,
        clock.clone(),
        policy,
    ));

    let services = SessionServices {
        flow: FlowEngine::default(),
        recorder: Arc::new(AuditRecorder::new(Arc::clone(&audit), config.session.audit_backoff())),
        tools: ToolExecutor::new(
            gate,
            scheduling,
            records,
            Arc::new(KnowledgeBase::default()),
            clock,
            policy,
        ),
        classifier: EmergencyClassifier::default(),
        oracle,
        transport: transport.clone(),
        archive: Arc::new(SqlSessionRepository::new(db_pool.clone())),
        settings: RuntimeSettings::from_config(&config),
    };

    info!(event_name = "system.bootstrap.ready", correlation_id = "bootstrap");
    Ok(Application {
        config,
        db_pool,
        registry: Arc::new(SessionRegistry::new(services)),
        transport,
        audit,
    })
}
