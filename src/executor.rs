//! Layer C10 — runs a single task to completion (spec §4.10).
//!
//! Grounded on the original task body's `summarize_task` / `extract_pdf_task`
//! sequence: load, classify, call, persist. PDF rasterization is delegated behind
//! `PageRasterizer` since turning PDF bytes into page images is out of scope here;
//! `NaivePageRasterizer` is a placeholder that treats form-feed-delimited chunks of
//! the task content as pages so the rest of the pipeline has something to exercise.

use crate::backoff;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{CoreError, CoreResult};
use crate::error_classifier::{self, ErrorKind};
use crate::metrics::Metrics;
use crate::provider::{ProviderHandler, ProviderResponse};
use crate::provider_state::ProviderState;
use crate::queue_router::QueueRouter;
use crate::rate_limiter::RateLimiter;
use crate::task_repo::TaskRepo;
use crate::types::{ErrorHistoryEntry, TaskKind, TaskState};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, content: &str) -> CoreResult<Vec<String>>;
}

pub struct NaivePageRasterizer;

impl PageRasterizer for NaivePageRasterizer {
    fn rasterize(&self, content: &str) -> CoreResult<Vec<String>> {
        let pages: Vec<String> = content.split('\u{000c}').map(|s| s.to_string()).collect();
        Ok(pages)
    }
}

pub struct Executor {
    repo: Arc<TaskRepo>,
    router: Arc<QueueRouter>,
    rate_limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    provider_state: Arc<ProviderState>,
    provider: Arc<dyn ProviderHandler>,
    rasterizer: Arc<dyn PageRasterizer>,
    metrics: Arc<Metrics>,
    worker_id: String,
}

impl Executor {
    pub fn new(
        repo: Arc<TaskRepo>,
        router: Arc<QueueRouter>,
        rate_limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        provider_state: Arc<ProviderState>,
        provider: Arc<dyn ProviderHandler>,
        rasterizer: Arc<dyn PageRasterizer>,
        metrics: Arc<Metrics>,
        worker_id: String,
    ) -> Self {
        Executor {
            repo,
            router,
            rate_limiter,
            breaker,
            provider_state,
            provider,
            rasterizer,
            metrics,
            worker_id,
        }
    }

    pub async fn run_task(&self, id: &str, now: f64) {
        if let Err(e) = self.run_task_inner(id, now).await {
            error!(id, error = %e, "executor failed to process task");
        }
    }

    async fn run_task_inner(&self, id: &str, now: f64) -> CoreResult<()> {
        let task = match self.repo.fetch(id).await? {
            Some(t) => t,
            None => {
                warn!(id, "popped id has no task record, dropping");
                return Ok(());
            }
        };

        if task.retry_count >= task.max_retries {
            self.send_to_dlq(id, TaskState::Pending, now).await?;
            return Ok(());
        }

        if self.provider_state.should_skip_api_call(now).await? {
            self.reschedule(id, TaskState::Pending, task.retry_count, error_classifier::ErrorSubKind::ServiceUnavailable, Vec::new(), now).await?;
            return Ok(());
        }

        self.repo
            .transition(
                id,
                TaskState::Pending,
                TaskState::Active,
                vec![("worker_id".to_string(), self.worker_id.clone()), ("started_at".to_string(), now.to_string())],
                now,
            )
            .await?;

        let outcome = match task.kind {
            TaskKind::Summarize => self.call_once(task.kind, &task.content).await,
            TaskKind::PdfExtract => self.call_per_page(&task.content).await,
        };

        match outcome {
            Ok(result) => {
                self.repo
                    .transition(
                        id,
                        TaskState::Active,
                        TaskState::Completed,
                        vec![("result".to_string(), result), ("completed_at".to_string(), now.to_string())],
                        now,
                    )
                    .await?;
                info!(id, "task completed");
            }
            Err(classified) => {
                self.record_failure(id, &task, now, classified).await?;
            }
        }
        Ok(())
    }

    async fn call_once(&self, kind: TaskKind, content: &str) -> Result<String, ClassifiedFailure> {
        self.dispatch_call(kind, content).await
    }

    async fn call_per_page(&self, content: &str) -> Result<String, ClassifiedFailure> {
        let pages = self
            .rasterizer
            .rasterize(content)
            .map_err(|e| ClassifiedFailure { kind: ErrorKind::Dependency, sub: error_classifier::ErrorSubKind::MissingDependency, message: e.to_string() })?;

        let mut aggregated = Vec::with_capacity(pages.len());
        for (idx, page) in pages.iter().enumerate() {
            match self.dispatch_call(TaskKind::PdfExtract, page).await {
                Ok(text) => aggregated.push(text),
                Err(f) => aggregated.push(format!("[page {idx} skipped: {}]", f.message)),
            }
        }
        Ok(aggregated.join("\n\n"))
    }

    /// `RateLimiter.acquire -> CircuitBreaker.guard -> ProviderHandler::call`,
    /// classifying whatever comes out the other end (spec §4.10).
    async fn dispatch_call(&self, kind: TaskKind, content: &str) -> Result<String, ClassifiedFailure> {
        let rl_timeout = 30.0;
        if self
            .rate_limiter
            .acquire(1.0, rl_timeout, || {
                std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs_f64()
            })
            .await
            .is_err()
        {
            let c = error_classifier::classify_rate_limit_timeout();
            return Err(ClassifiedFailure { kind: c.kind, sub: c.sub, message: "rate limiter timed out".to_string() });
        }

        let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs_f64();
        let provider = self.provider.clone();
        let kind_copy = kind;
        let content_owned = content.to_string();
        let call_result = self
            .breaker
            .guard(now, move || {
                let provider = provider.clone();
                let content_owned = content_owned.clone();
                async move {
                    provider
                        .call(kind_copy, &content_owned)
                        .await
                        .map_err(|e| CoreError::Provider(e.to_string()))
                }
            })
            .await;

        match call_result {
            Ok(response) => match self.from_response(response) {
                Ok(body) => {
                    self.report_provider_outcome(true, "healthy", "", None, now).await;
                    Ok(body)
                }
                Err(failure) => {
                    self.report_provider_outcome(
                        false,
                        error_classifier::provider_state_label(failure.sub),
                        &failure.message,
                        Some(failure.message.clone()),
                        now,
                    )
                    .await;
                    Err(failure)
                }
            },
            Err(CoreError::CircuitOpen(_)) => {
                let c = error_classifier::classify_circuit_open();
                Err(ClassifiedFailure { kind: c.kind, sub: c.sub, message: "circuit breaker open".to_string() })
            }
            Err(e) => {
                let c = error_classifier::classify(502, &e.to_string(), None);
                self.report_provider_outcome(
                    false,
                    error_classifier::provider_state_label(c.sub),
                    &e.to_string(),
                    Some(e.to_string()),
                    now,
                )
                .await;
                Err(ClassifiedFailure { kind: c.kind, sub: c.sub, message: e.to_string() })
            }
        }
    }

    fn from_response(&self, response: ProviderResponse) -> Result<String, ClassifiedFailure> {
        if (200..300).contains(&response.status_code) {
            Ok(response.body)
        } else {
            let c = error_classifier::classify(response.status_code, &response.body, None);
            Err(ClassifiedFailure { kind: c.kind, sub: c.sub, message: response.body })
        }
    }

    async fn report_provider_outcome(&self, success: bool, state: &str, message: &str, error_details: Option<String>, now: f64) {
        match self.provider_state.report_outcome(success, state, message, error_details, &self.metrics, now).await {
            Ok(true) => {}
            Ok(false) => debug!("provider state update skipped, lock held elsewhere"),
            Err(e) => warn!(error = %e, "failed to update provider state snapshot"),
        }
    }

    async fn record_failure(&self, id: &str, task: &crate::types::Task, now: f64, failure: ClassifiedFailure) -> CoreResult<()> {
        let error_entry = ErrorHistoryEntry {
            ts: now,
            error: failure.message.clone(),
            kind: format!("{:?}", failure.kind).to_lowercase(),
            retry_count: task.retry_count,
            state_transition: "active->failed".to_string(),
        };
        let mut error_history = task.error_history.clone();
        error_history.push(error_entry);
        let error_fields = vec![
            ("last_error".to_string(), failure.message.clone()),
            ("error_kind".to_string(), failure.sub.as_str().to_string()),
            ("error_history".to_string(), serde_json::to_string(&error_history)?),
        ];

        match failure.kind {
            ErrorKind::Permanent | ErrorKind::Dependency => {
                self.send_to_dlq_with_error(id, TaskState::Active, error_fields, now).await?;
            }
            ErrorKind::Transient => {
                if task.retry_count + 1 >= task.max_retries {
                    self.send_to_dlq_with_error(id, TaskState::Active, error_fields, now).await?;
                } else {
                    self.reschedule(id, TaskState::Active, task.retry_count, failure.sub, error_fields, now).await?;
                }
            }
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: &str,
        from: TaskState,
        retry_count: u32,
        sub: error_classifier::ErrorSubKind,
        mut error_fields: Vec<(String, String)>,
        now: f64,
    ) -> CoreResult<()> {
        let delay = backoff::delay_secs(retry_count, sub);
        let due = now + delay;
        error_fields.push(("retry_count".to_string(), (retry_count + 1).to_string()));
        error_fields.push(("retry_after".to_string(), due.to_string()));
        self.repo.transition(id, from, TaskState::Scheduled, error_fields, now).await?;
        self.router.schedule(id, due).await
    }

    async fn send_to_dlq(&self, id: &str, from: TaskState, now: f64) -> CoreResult<()> {
        self.repo
            .transition(id, from, TaskState::Dlq, vec![("dlq_at".to_string(), now.to_string())], now)
            .await?;
        self.router.send_to_dlq(id).await
    }

    async fn send_to_dlq_with_error(&self, id: &str, from: TaskState, mut error_fields: Vec<(String, String)>, now: f64) -> CoreResult<()> {
        error_fields.push(("dlq_at".to_string(), now.to_string()));
        self.repo.transition(id, from, TaskState::Dlq, error_fields, now).await?;
        self.router.send_to_dlq(id).await
    }
}

struct ClassifiedFailure {
    kind: ErrorKind,
    sub: error_classifier::ErrorSubKind,
    message: String,
}
