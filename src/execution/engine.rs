//! Main execution engine - drives a pipeline run step by step

use crate::{
    backend::{create_backend, JobBackend},
    core::{
        config::RunSettings,
        error::PipelineError,
        pipeline::Pipeline,
        state::{ExecutionStatus, StepState},
    },
    execution::StepExecutor,
    modules::ModuleRegistry,
    persistence::{create_summary, PersistenceBackend, RunSummary},
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        name: String,
        steps: usize,
    },
    StepStarted {
        ordinal: usize,
        module: String,
        key: String,
    },
    JobsSubmitted {
        ordinal: usize,
        count: usize,
    },
    JobProgress {
        ordinal: usize,
        finished: usize,
        failed: usize,
        total: usize,
    },
    StepCompleted {
        ordinal: usize,
        module: String,
        artifacts: usize,
        jobs: usize,
    },
    StepFailed {
        ordinal: usize,
        module: String,
        error: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Pipeline controller
///
/// Runs the steps of a pipeline strictly in order. The first failing step
/// stops the run; the steps after it are marked skipped.
pub struct ExecutionEngine {
    registry: Arc<ModuleRegistry>,
    backend: Arc<dyn JobBackend>,
    interrupt: Arc<AtomicBool>,
    event_handlers: Vec<EventHandler>,
    persistence: Option<Arc<dyn PersistenceBackend>>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ModuleRegistry>, backend: Arc<dyn JobBackend>) -> Self {
        Self {
            registry,
            backend,
            interrupt: Arc::new(AtomicBool::new(false)),
            event_handlers: Vec::new(),
            persistence: None,
        }
    }

    /// Engine using the backend selected by the run settings
    pub fn for_settings(registry: Arc<ModuleRegistry>, settings: &RunSettings) -> Self {
        Self::new(registry, create_backend(settings))
    }

    /// Flag that aborts the run when set
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Record finished runs in a history store
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceBackend>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// One handler forwarding to every registered handler
    fn event_sink(&self) -> Option<EventHandler> {
        if self.event_handlers.is_empty() {
            return None;
        }
        let handlers = self.event_handlers.clone();
        Some(Arc::new(move |event: ExecutionEvent| {
            for handler in &handlers {
                handler(event.clone());
            }
        }))
    }

    /// Execute every step of the pipeline
    pub async fn execute(&self, pipeline: &mut Pipeline) -> Result<RunSummary, PipelineError> {
        let run_id = pipeline.state.run_id;
        let run_dir = pipeline.run_dir().to_path_buf();
        std::fs::create_dir_all(&run_dir).map_err(|e| PipelineError::io(&run_dir, e))?;

        info!(
            "Starting run {} ({}) in {}",
            pipeline.name,
            run_id,
            run_dir.display()
        );
        pipeline.state.start(pipeline.steps.len());
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            name: pipeline.name.clone(),
            steps: pipeline.steps.len(),
        });

        let executor = StepExecutor::new(
            self.registry.clone(),
            self.backend.clone(),
            self.interrupt.clone(),
        );
        let sink = self.event_sink();

        for ordinal in 0..pipeline.steps.len() {
            let started_at = Utc::now();
            let (module, key) = {
                let step = &mut pipeline.steps[ordinal];
                step.state = StepState::Running { started_at };
                (step.module.clone(), step.key.clone())
            };
            self.emit_event(ExecutionEvent::StepStarted {
                ordinal,
                module: module.clone(),
                key,
            });

            let result = if self.interrupt.load(Ordering::SeqCst) {
                Err(PipelineError::Interrupted {
                    ordinal,
                    module: module.clone(),
                })
            } else {
                executor.execute(pipeline, ordinal, sink.clone()).await
            };

            match result {
                Ok(outcome) => {
                    pipeline.steps[ordinal].state = StepState::Completed {
                        artifacts: outcome.manifest.len(),
                        jobs: outcome.jobs,
                        started_at,
                        completed_at: Utc::now(),
                    };
                    pipeline.state.step_completed();
                    self.emit_event(ExecutionEvent::StepCompleted {
                        ordinal,
                        module,
                        artifacts: outcome.manifest.len(),
                        jobs: outcome.jobs,
                    });
                }
                Err(err) => {
                    error!("Step {} ({}) failed: {}", ordinal, module, err);
                    self.abort(pipeline, ordinal, &module, started_at, &err).await;
                    return Err(err);
                }
            }
        }

        pipeline.state.complete();
        info!(
            "Run {} completed: {} step(s)",
            pipeline.name, pipeline.state.completed_steps
        );
        self.emit_event(ExecutionEvent::RunCompleted {
            run_id,
            status: pipeline.state.status,
        });

        Ok(self.finish(pipeline).await)
    }

    /// Record a failed step and skip the rest of the run
    async fn abort(
        &self,
        pipeline: &mut Pipeline,
        ordinal: usize,
        module: &str,
        started_at: chrono::DateTime<Utc>,
        err: &PipelineError,
    ) {
        let message = err.to_string();
        pipeline.steps[ordinal].state = StepState::Failed {
            error: message.clone(),
            started_at,
            failed_at: Utc::now(),
        };
        for step in pipeline.steps.iter_mut().skip(ordinal + 1) {
            step.state = StepState::Skipped {
                reason: format!("step {} ({}) did not complete", ordinal, module),
            };
        }

        if matches!(err, PipelineError::Interrupted { .. }) {
            pipeline.state.cancel(ordinal);
            pipeline.state.error = Some(message.clone());
        } else {
            pipeline.state.fail(ordinal, message.clone());
        }

        self.emit_event(ExecutionEvent::StepFailed {
            ordinal,
            module: module.to_string(),
            error: message,
        });
        self.emit_event(ExecutionEvent::RunCompleted {
            run_id: pipeline.state.run_id,
            status: pipeline.state.status,
        });

        self.finish(pipeline).await;
    }

    /// Write `run.json` and record the run in the history store
    async fn finish(&self, pipeline: &Pipeline) -> RunSummary {
        let summary = create_summary(pipeline);

        if let Err(e) = summary.write(pipeline.run_dir()) {
            warn!("Could not write run summary: {:#}", e);
        }
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_run(&summary).await {
                warn!("Could not record run {} in history: {:#}", summary.run_id, e);
            }
        }

        summary
    }
}
