//! Statsink ingestion pipeline runtime.
//!
//! One invocation runs one pipeline execution for one trigger event:
//! repositories are built from the environment at startup, composed into
//! services, and handed to the state machine. The exit code reflects the
//! run's terminal status.

#![forbid(unsafe_code)]

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use statsink_application::{
    Aggregator, AuditRepository, BatchWorker, CsvValidator, IngestionPipeline, ObjectStore,
    ParsedEvent, PipelineConfig, PipelineOutcome, RunDispatcher, RunMetadataRepository,
    UserStatisticsRepository,
};
use statsink_core::{AppError, AppResult};
use statsink_domain::RunStatus;
use statsink_infrastructure::{
    FsObjectStore, InMemoryAuditRepository, InMemoryRunMetadataRepository,
    InMemoryUserStatisticsRepository, PostgresUserStatisticsRepository, RedisAuditRepository,
    RedisRunMetadataRepository,
};

#[derive(Debug, Clone)]
struct RuntimeConfig {
    input_bucket: String,
    output_bucket: String,
    object_store_root: String,
    store_backend: StoreBackend,
    audit_table: String,
    metadata_table: String,
    redis_url: Option<String>,
    database: Option<DatabaseConfig>,
    pipeline: PipelineConfig,
}

#[derive(Debug, Clone)]
struct DatabaseConfig {
    host: String,
    port: u16,
    name: String,
    user: String,
    password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreBackend {
    /// PostgreSQL for users, Redis for audit and run metadata.
    External,
    /// In-memory stores for smoke runs without infrastructure.
    Memory,
}

impl StoreBackend {
    fn parse(value: &str) -> AppResult<Self> {
        if value.eq_ignore_ascii_case("external") {
            return Ok(Self::External);
        }

        if value.eq_ignore_ascii_case("memory") {
            return Ok(Self::Memory);
        }

        Err(AppError::Configuration(format!(
            "STORE_BACKEND must be either 'external' or 'memory', got '{value}'"
        )))
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(exit_code) => exit_code,
        Err(app_error) => {
            error!(error = %app_error, "pipeline run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> AppResult<ExitCode> {
    let config = RuntimeConfig::load()?;
    let event = trigger_event(&config)?;

    info!(
        input_bucket = %config.input_bucket,
        output_bucket = %config.output_bucket,
        store_backend = %config.store_backend,
        batch_max = config.pipeline.batch_max,
        max_concurrency = config.pipeline.max_concurrency,
        tolerated_failure_percentage = config.pipeline.tolerated_failure_percentage,
        "statsink-pipeline started"
    );

    let pipeline = build_pipeline(&config).await?;
    let outcome = pipeline.execute(&event).await?;

    Ok(report_outcome(&outcome))
}

fn report_outcome(outcome: &PipelineOutcome) -> ExitCode {
    match outcome {
        PipelineOutcome::Completed(report) => {
            info!(
                run_id = %report.run.run_id,
                status = report.run.status.as_str(),
                total_rows = report.run.total_rows,
                succeeded = report.result.totals.succeeded,
                failed = report.result.totals.failed,
                artifact = %report.artifact_key,
                "run completed"
            );

            if report.run.status == RunStatus::Succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        PipelineOutcome::Duplicate(run) => {
            info!(
                run_id = %run.run_id,
                status = run.status.as_str(),
                "duplicate submission; existing run wins"
            );
            ExitCode::SUCCESS
        }
        PipelineOutcome::ValidationFailed(run) => {
            error!(run_id = %run.run_id, "validation failed; run terminated");
            ExitCode::FAILURE
        }
        PipelineOutcome::Aborted(run) => {
            error!(run_id = %run.run_id, "run aborted");
            ExitCode::FAILURE
        }
        PipelineOutcome::TimedOut(run) => {
            error!(run_id = %run.run_id, "run timed out");
            ExitCode::FAILURE
        }
    }
}

/// Builds the trigger event from `EVENT_JSON` or the key argument.
fn trigger_event(config: &RuntimeConfig) -> AppResult<ParsedEvent> {
    if let Ok(raw) = env::var("EVENT_JSON") {
        let value = serde_json::from_str(raw.as_str()).map_err(|parse_error| {
            AppError::Configuration(format!("EVENT_JSON is not valid JSON: {parse_error}"))
        })?;
        return Ok(ParsedEvent::parse(&value));
    }

    let key = env::args().nth(1).ok_or_else(|| {
        AppError::Configuration(
            "pass the object key as the first argument or set EVENT_JSON".to_owned(),
        )
    })?;

    Ok(ParsedEvent::parse(&json!({
        "bucket": config.input_bucket,
        "key": key,
    })))
}

async fn build_pipeline(config: &RuntimeConfig) -> AppResult<IngestionPipeline> {
    let object_store: Arc<dyn ObjectStore> =
        Arc::new(FsObjectStore::new(config.object_store_root.clone()));

    let (users, audit, run_metadata) = build_stores(config).await?;

    let dispatcher = RunDispatcher::new(
        run_metadata.clone(),
        audit.clone(),
        config.pipeline.max_file_size_bytes,
    );
    let validator = CsvValidator::new(
        object_store.clone(),
        audit.clone(),
        config.pipeline.max_file_size_bytes,
    );
    let worker = Arc::new(BatchWorker::new(
        users,
        audit.clone(),
        run_metadata.clone(),
        config.pipeline.worker_retry,
    ));
    let aggregator = Arc::new(Aggregator::new(
        object_store,
        run_metadata.clone(),
        audit,
        config.output_bucket.clone(),
        config.pipeline.tolerated_failure_percentage,
    ));

    IngestionPipeline::new(
        dispatcher,
        validator,
        worker,
        aggregator,
        run_metadata,
        config.pipeline,
    )
}

type Stores = (
    Arc<dyn UserStatisticsRepository>,
    Arc<dyn AuditRepository>,
    Arc<dyn RunMetadataRepository>,
);

async fn build_stores(config: &RuntimeConfig) -> AppResult<Stores> {
    match config.store_backend {
        StoreBackend::Memory => Ok((
            Arc::new(InMemoryUserStatisticsRepository::new()),
            Arc::new(InMemoryAuditRepository::new()),
            Arc::new(InMemoryRunMetadataRepository::new()),
        )),
        StoreBackend::External => {
            let database = config.database.as_ref().ok_or_else(|| {
                AppError::Configuration(
                    "DB_HOST, DB_NAME, and DB_USER are required when STORE_BACKEND=external"
                        .to_owned(),
                )
            })?;
            let redis_url = config.redis_url.as_deref().ok_or_else(|| {
                AppError::Configuration(
                    "REDIS_URL is required when STORE_BACKEND=external".to_owned(),
                )
            })?;

            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database.connection_url().as_str())
                .await
                .map_err(|error| {
                    AppError::Database(format!("failed to connect to database: {error}"))
                })?;

            let redis_client = redis::Client::open(redis_url).map_err(|error| {
                AppError::Configuration(format!("invalid REDIS_URL: {error}"))
            })?;

            Ok((
                Arc::new(PostgresUserStatisticsRepository::new(pool)),
                Arc::new(RedisAuditRepository::new(
                    redis_client.clone(),
                    config.audit_table.clone(),
                )),
                Arc::new(RedisRunMetadataRepository::new(
                    redis_client,
                    config.metadata_table.clone(),
                )),
            ))
        }
    }
}

impl DatabaseConfig {
    fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

impl RuntimeConfig {
    fn load() -> AppResult<Self> {
        let input_bucket = required_env("INPUT_BUCKET")?;
        let output_bucket = required_env("OUTPUT_BUCKET")?;
        let object_store_root =
            env::var("OBJECT_STORE_ROOT").unwrap_or_else(|_| "./data".to_owned());
        let store_backend = StoreBackend::parse(
            env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "external".to_owned())
                .as_str(),
        )?;
        let audit_table =
            env::var("AUDIT_TABLE").unwrap_or_else(|_| "statsink:audit".to_owned());
        let metadata_table =
            env::var("METADATA_TABLE").unwrap_or_else(|_| "statsink:run_metadata".to_owned());
        let redis_url = env::var("REDIS_URL")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let database = load_database_config()?;

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            batch_max: parse_env_usize("BATCH_MAX", defaults.batch_max)?,
            max_concurrency: parse_env_usize("MAX_CONCURRENCY", defaults.max_concurrency)?,
            tolerated_failure_percentage: parse_env_f64(
                "TOLERATED_FAILURE_PCT",
                defaults.tolerated_failure_percentage,
            )?,
            run_timeout: Duration::from_secs(parse_env_u64(
                "RUN_TIMEOUT_SECONDS",
                defaults.run_timeout.as_secs(),
            )?),
            batch_timeout: Duration::from_secs(parse_env_u64(
                "BATCH_TIMEOUT_SECONDS",
                defaults.batch_timeout.as_secs(),
            )?),
            ..defaults
        };
        pipeline.validate()?;

        Ok(Self {
            input_bucket,
            output_bucket,
            object_store_root,
            store_backend,
            audit_table,
            metadata_table,
            redis_url,
            database,
            pipeline,
        })
    }
}

fn load_database_config() -> AppResult<Option<DatabaseConfig>> {
    let host = match env::var("DB_HOST") {
        Ok(host) => host,
        Err(_) => return Ok(None),
    };

    let port = parse_env_u64("DB_PORT", 5432)?;
    let port = u16::try_from(port)
        .map_err(|error| AppError::Configuration(format!("invalid DB_PORT: {error}")))?;
    let name = required_env("DB_NAME")?;
    let user = required_env("DB_USER")?;
    let password = database_password()?;

    Ok(Some(DatabaseConfig {
        host,
        port,
        name,
        user,
        password,
    }))
}

/// Resolves the database password from `DB_PASSWORD_REF` (a secret file
/// path) or the `DB_PASSWORD` variable.
fn database_password() -> AppResult<String> {
    if let Ok(reference) = env::var("DB_PASSWORD_REF") {
        return std::fs::read_to_string(reference.as_str())
            .map(|secret| secret.trim().to_owned())
            .map_err(|error| {
                AppError::Configuration(format!(
                    "failed to read DB_PASSWORD_REF '{reference}': {error}"
                ))
            });
    }

    required_env("DB_PASSWORD")
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            env::var("LOG_LEVEL")
                .ok()
                .and_then(|level| EnvFilter::try_new(level.to_lowercase()).ok())
        })
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Configuration(format!("{name} is required")))
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Configuration(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Configuration(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_f64(name: &str, default: f64) -> AppResult<f64> {
    match env::var(name) {
        Ok(value) => value.parse::<f64>().map_err(|error| {
            AppError::Configuration(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
