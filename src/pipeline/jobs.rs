//! Async runner for generation requests.
//!
//! Each request runs on its own blocking worker under a deadline, so one
//! hung generator call does not stall other cases. There is no ordering
//! between concurrent requests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinError;

use super::generation::{GenerationService, ProgressSink, RunControl};
use super::GenerationError;
use crate::models::{GenerateRequest, SarResponse};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Processing { progress: u8, message: String },
    Completed { result: Box<SarResponse> },
    Failed { error: String },
}

impl JobState {
    pub fn progress(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing { progress, .. } => *progress,
            Self::Completed { .. } => 100,
            Self::Failed { .. } => 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Pollable state for one job. Also the progress sink handed to the pipeline.
#[derive(Debug)]
pub struct JobTracker {
    state: Mutex<JobState>,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self {
            state: Mutex::new(JobState::Pending),
        }
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> JobState {
        match self.state.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set(&self, next: JobState) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Terminal states are final; a late progress report must not reopen the job.
        if !guard.is_finished() {
            *guard = next;
        }
    }
}

impl ProgressSink for JobTracker {
    fn report(&self, percent: u8, message: &str) {
        self.set(JobState::Processing {
            progress: percent,
            message: message.to_string(),
        });
    }
}

/// Run one request on the blocking pool with a deadline.
///
/// On timeout the run is cancelled and recorded as failed. The worker
/// thread cannot be pre-empted; it stops at its next checkpoint and writes
/// nothing further. If the worker settled its outcome just before the
/// deadline, that outcome is awaited and returned instead.
pub async fn run_generation(
    service: Arc<GenerationService>,
    request: GenerateRequest,
    progress: Arc<dyn ProgressSink>,
    timeout: Duration,
) -> Result<SarResponse, GenerationError> {
    let control = Arc::new(RunControl::new(service.assign_report_id(&request)));
    let worker = Arc::clone(&service);
    let worker_control = Arc::clone(&control);
    let mut handle = tokio::task::spawn_blocking(move || {
        worker.generate_with(&request, progress.as_ref(), &worker_control)
    });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(joined) => flatten(joined),
        Err(_) => match service.cancel_on_timeout(&control, timeout) {
            Some(error) => {
                tracing::warn!(
                    report_id = %control.report_id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Generation timed out"
                );
                Err(error)
            }
            None => flatten(handle.await),
        },
    }
}

fn flatten(
    joined: Result<Result<SarResponse, GenerationError>, JoinError>,
) -> Result<SarResponse, GenerationError> {
    joined.unwrap_or_else(|join_err| {
        tracing::error!(error = %join_err, "Generation worker aborted");
        Err(GenerationError::Aborted(join_err.to_string()))
    })
}

/// Run a request and record the outcome on its tracker.
pub async fn run_tracked(
    service: Arc<GenerationService>,
    request: GenerateRequest,
    tracker: Arc<JobTracker>,
    timeout: Duration,
) -> Result<SarResponse, GenerationError> {
    let result = run_generation(service, request, tracker.clone(), timeout).await;
    tracker.set(match &result {
        Ok(sar) => JobState::Completed {
            result: Box::new(sar.clone()),
        },
        Err(e) => JobState::Failed {
            error: e.to_string(),
        },
    });
    result
}

#[derive(Debug)]
pub struct BatchSummary {
    /// One entry per request, in submission order.
    pub results: Vec<Result<SarResponse, GenerationError>>,
    pub completed: usize,
    pub failed: usize,
}

/// Run every request concurrently, each as its own task.
pub async fn run_batch(
    service: Arc<GenerationService>,
    requests: Vec<GenerateRequest>,
    timeout: Duration,
) -> BatchSummary {
    let progress: Arc<dyn ProgressSink> = Arc::new(super::generation::NoopProgress);
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            tokio::spawn(run_generation(
                Arc::clone(&service),
                request,
                Arc::clone(&progress),
                timeout,
            ))
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(GenerationError::Aborted(join_err.to_string())),
        });
    }

    let completed = results.iter().filter(|r| r.is_ok()).count();
    let failed = results.len() - completed;
    tracing::info!(total = results.len(), completed, failed, "Batch finished");

    BatchSummary {
        results,
        completed,
        failed,
    }
}
