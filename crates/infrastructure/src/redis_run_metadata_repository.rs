//! Redis-backed run-metadata repository with conditional writes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};

use statsink_application::{
    CompleteRunInput, CreateRunInput, RunCreation, RunMetadataRepository,
};
use statsink_core::{AppError, AppResult, RunId};
use statsink_domain::{Run, RunStatus};

use crate::record_sanitizer::iso8601;

const CREATE_RUN_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1],
  'source_ref', ARGV[1],
  'status', ARGV[2],
  'started_at', ARGV[3],
  'total_rows', '0',
  'success_count', '0',
  'error_count', '0')
redis.call('ZADD', KEYS[2], ARGV[4], ARGV[5])
return 1
"#;

const COMPLETE_RUN_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if status ~= 'running' then
  return 0
end
redis.call('HSET', KEYS[1],
  'status', ARGV[1],
  'total_rows', ARGV[2],
  'success_count', ARGV[3],
  'error_count', ARGV[4],
  'ended_at', ARGV[5])
if ARGV[6] ~= '' then
  redis.call('HSET', KEYS[1], 'output_ref', ARGV[6])
end
return 1
"#;

const PROGRESS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HINCRBY', KEYS[1], 'success_count', ARGV[1])
redis.call('HINCRBY', KEYS[1], 'error_count', ARGV[2])
return 1
"#;

const SET_TOTAL_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'total_rows', ARGV[1])
return 1
"#;

/// Redis implementation of the run-metadata repository.
///
/// Conditional transitions run as Lua scripts so create-if-absent and the
/// forward-only status change stay atomic under concurrent starts. All
/// timestamps are stored as ISO-8601 strings; absent fields are simply
/// not written.
#[derive(Clone)]
pub struct RedisRunMetadataRepository {
    client: redis::Client,
    key_prefix: String,
}

impl RedisRunMetadataRepository {
    /// Creates one repository adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn run_key(&self, run_id: &RunId) -> String {
        format!("{}:run:{run_id}", self.key_prefix)
    }

    fn index_key(&self) -> String {
        format!("{}:recent", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::KeyValue(format!("failed to connect to redis: {error}")))
    }

    async fn load_run(
        &self,
        connection: &mut redis::aio::MultiplexedConnection,
        run_id: &RunId,
    ) -> AppResult<Option<Run>> {
        let fields: HashMap<String, String> = connection
            .hgetall(self.run_key(run_id))
            .await
            .map_err(|error| {
                AppError::KeyValue(format!("failed to load run '{run_id}': {error}"))
            })?;

        if fields.is_empty() {
            return Ok(None);
        }

        run_from_fields(run_id.clone(), &fields).map(Some)
    }
}

#[async_trait]
impl RunMetadataRepository for RedisRunMetadataRepository {
    async fn try_create_run(&self, input: CreateRunInput) -> AppResult<RunCreation> {
        let mut connection = self.connection().await?;

        let created: i32 = Script::new(CREATE_RUN_SCRIPT)
            .key(self.run_key(&input.run_id))
            .key(self.index_key())
            .arg(input.source_ref.as_str())
            .arg(RunStatus::Running.as_str())
            .arg(iso8601(input.started_at))
            .arg(input.started_at.timestamp())
            .arg(input.run_id.as_str())
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::KeyValue(format!(
                    "failed to create run '{}': {error}",
                    input.run_id
                ))
            })?;

        let run = self
            .load_run(&mut connection, &input.run_id)
            .await?
            .ok_or_else(|| {
                AppError::KeyValue(format!(
                    "run '{}' disappeared right after creation",
                    input.run_id
                ))
            })?;

        if created == 1 {
            Ok(RunCreation::Created(run))
        } else {
            Ok(RunCreation::Duplicate(run))
        }
    }

    async fn find_run(&self, run_id: &RunId) -> AppResult<Option<Run>> {
        let mut connection = self.connection().await?;
        self.load_run(&mut connection, run_id).await
    }

    async fn set_total_rows(&self, run_id: &RunId, total_rows: u64) -> AppResult<()> {
        let mut connection = self.connection().await?;

        let updated: i32 = Script::new(SET_TOTAL_SCRIPT)
            .key(self.run_key(run_id))
            .arg(total_rows)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::KeyValue(format!(
                    "failed to set total rows for run '{run_id}': {error}"
                ))
            })?;

        if updated == 0 {
            return Err(AppError::NotFound(format!("run '{run_id}'")));
        }

        Ok(())
    }

    async fn record_progress(&self, run_id: &RunId, succeeded: u64, failed: u64) -> AppResult<()> {
        let mut connection = self.connection().await?;

        let updated: i32 = Script::new(PROGRESS_SCRIPT)
            .key(self.run_key(run_id))
            .arg(succeeded)
            .arg(failed)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::KeyValue(format!(
                    "failed to record progress for run '{run_id}': {error}"
                ))
            })?;

        if updated == 0 {
            return Err(AppError::NotFound(format!("run '{run_id}'")));
        }

        Ok(())
    }

    async fn complete_run(&self, input: CompleteRunInput) -> AppResult<Run> {
        let mut connection = self.connection().await?;

        if !input.status.is_terminal() {
            return Err(AppError::Validation(format!(
                "completion status must be terminal, got '{}'",
                input.status.as_str()
            )));
        }

        Script::new(COMPLETE_RUN_SCRIPT)
            .key(self.run_key(&input.run_id))
            .arg(input.status.as_str())
            .arg(input.total_rows)
            .arg(input.success_count)
            .arg(input.error_count)
            .arg(iso8601(input.ended_at))
            .arg(input.output_ref.as_deref().unwrap_or_default())
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::KeyValue(format!(
                    "failed to complete run '{}': {error}",
                    input.run_id
                ))
            })?;

        // Terminal rows win: the stored state is returned either way.
        self.load_run(&mut connection, &input.run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("run '{}'", input.run_id)))
    }

    async fn list_recent_runs(&self, limit: usize) -> AppResult<Vec<Run>> {
        let mut connection = self.connection().await?;
        let capped = limit.clamp(1, 200) as isize;

        let run_ids: Vec<String> = connection
            .zrevrange(self.index_key(), 0, capped - 1)
            .await
            .map_err(|error| {
                AppError::KeyValue(format!("failed to list recent runs: {error}"))
            })?;

        let mut runs = Vec::with_capacity(run_ids.len());
        for raw_run_id in run_ids {
            let run_id = RunId::new(raw_run_id)?;
            if let Some(run) = self.load_run(&mut connection, &run_id).await? {
                runs.push(run);
            }
        }

        Ok(runs)
    }
}

fn run_from_fields(run_id: RunId, fields: &HashMap<String, String>) -> AppResult<Run> {
    let status = fields
        .get("status")
        .map(|value| RunStatus::parse(value))
        .transpose()?
        .ok_or_else(|| {
            AppError::KeyValue(format!("run '{run_id}' record is missing its status"))
        })?;

    Ok(Run {
        source_ref: fields.get("source_ref").cloned().unwrap_or_default(),
        status,
        total_rows: parse_counter(fields, "total_rows")?,
        success_count: parse_counter(fields, "success_count")?,
        error_count: parse_counter(fields, "error_count")?,
        started_at: parse_timestamp(fields, "started_at", &run_id)?,
        ended_at: fields
            .get("ended_at")
            .map(|value| parse_timestamp_value(value, &run_id))
            .transpose()?,
        output_ref: fields.get("output_ref").cloned(),
        run_id,
    })
}

fn parse_counter(fields: &HashMap<String, String>, name: &str) -> AppResult<u64> {
    fields
        .get(name)
        .map_or(Ok(0), |value| {
            value.parse::<u64>().map_err(|error| {
                AppError::KeyValue(format!("run counter '{name}' is malformed: {error}"))
            })
        })
}

fn parse_timestamp(
    fields: &HashMap<String, String>,
    name: &str,
    run_id: &RunId,
) -> AppResult<DateTime<Utc>> {
    let value = fields.get(name).ok_or_else(|| {
        AppError::KeyValue(format!("run '{run_id}' record is missing '{name}'"))
    })?;
    parse_timestamp_value(value, run_id)
}

fn parse_timestamp_value(value: &str, run_id: &RunId) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| {
            AppError::KeyValue(format!(
                "run '{run_id}' carries a malformed timestamp '{value}': {error}"
            ))
        })
}
