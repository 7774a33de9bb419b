//! Long-running middleware jobs.
//!
//! Many middleware methods return a job id instead of a result. The job can
//! be awaited either with a blocking `core.job_wait` call
//! ([`Session::call_with_job`]) or by watching `core.get_jobs` collection
//! events ([`Session::wait_for_job`]).

use crate::config::ProtocolConfig;
use crate::events::CollectionEvent;
use crate::session::Session;
use crate::{ClientError, Result};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Final state of a completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub id: i64,
    pub state: String,
    pub result: Value,
    /// Last reported progress, in percent.
    pub progress: f64,
}

/// Interpret a call result as a job id, if it is one.
pub fn job_id_of(result: &Value) -> Option<i64> {
    result.as_i64().or_else(|| {
        result
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// Job state carried by a `core.get_jobs` event.
#[derive(Debug, Clone, PartialEq)]
struct JobUpdate {
    id: i64,
    state: String,
    progress: f64,
    result: Value,
    error: Option<String>,
}

impl JobUpdate {
    fn from_event(event: &CollectionEvent) -> Option<Self> {
        if event.collection != ProtocolConfig::JOBS_COLLECTION {
            return None;
        }

        let id = event
            .fields
            .get("id")
            .and_then(job_id_of)
            .or_else(|| event.id.as_ref().and_then(job_id_of))?;

        Some(Self {
            id,
            state: event
                .fields
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            progress: event
                .fields
                .get("progress")
                .and_then(|p| p.get("percent"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            result: event.fields.get("result").cloned().unwrap_or(Value::Null),
            error: event
                .fields
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

impl Session {
    /// Call a job-returning method and wait for the job via `core.job_wait`.
    ///
    /// Results that are not job ids are returned unchanged.
    pub async fn call_with_job(&self, method: &str, params: Value) -> Result<Value> {
        let result = self.call(method, params).await?;
        let Some(job_id) = job_id_of(&result) else {
            return Ok(result);
        };

        debug!("{} started job {}", method, job_id);
        self.call_raw(
            ProtocolConfig::JOB_WAIT_METHOD,
            Value::Array(vec![Value::from(job_id)]),
        )
        .await
        .map_err(|e| match e {
            ClientError::Remote { message, .. } => ClientError::Job {
                job_id,
                state: "FAILED".to_string(),
                message,
            },
            other => other,
        })
    }

    /// Wait for `job_id` to finish by subscribing to job events.
    ///
    /// `FAILED` and `ABORTED` jobs surface as [`ClientError::Job`].
    pub async fn wait_for_job(&self, job_id: i64, timeout: Duration) -> Result<JobResult> {
        // Subscribe locally first so no event slips in between.
        let mut events = self.subscribe_events();
        self.call_raw(
            ProtocolConfig::SUBSCRIBE_METHOD,
            Value::Array(vec![Value::from(ProtocolConfig::JOBS_COLLECTION)]),
        )
        .await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Ok(event)) => event,
                Ok(Err(RecvError::Lagged(missed))) => {
                    warn!("Missed {} job events while waiting for job {}", missed, job_id);
                    continue;
                }
                Ok(Err(RecvError::Closed)) => return Err(ClientError::SessionClosed),
                Err(_) => {
                    return Err(ClientError::Timeout {
                        method: format!("job {}", job_id),
                        after: timeout,
                    })
                }
            };

            let Some(update) = JobUpdate::from_event(&event).filter(|u| u.id == job_id) else {
                continue;
            };

            info!(
                "Job {}: state={} progress={:.1}%",
                job_id, update.state, update.progress
            );

            match update.state.as_str() {
                "SUCCESS" => {
                    return Ok(JobResult {
                        id: job_id,
                        state: update.state,
                        result: update.result,
                        progress: update.progress,
                    })
                }
                "FAILED" | "ABORTED" => {
                    return Err(ClientError::Job {
                        job_id,
                        state: update.state,
                        message: update.error.unwrap_or_default(),
                    })
                }
                _ => {}
            }
        }
    }
}
