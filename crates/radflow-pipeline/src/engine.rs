//! Pipeline execution engine.
//!
//! Drives a run through `Idle → Initializing → Streaming → Finalizing → Done`:
//! plan the stages, resolve the clock and its timeline, then invoke every
//! stage transform with INIT, once per timeline step with PROCESS, and once
//! more with FINALIZE. Stages are always visited level by level, in
//! declaration order within a level.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use radflow_types::{Dataset, FlowError, ProcStatus, Result, StageState, Volume};

use crate::config::{RunConfig, StageDescriptor};
use crate::context::StageContext;
use crate::dispatch::ProductDispatcher;
use crate::events::{EventEmitter, PipelineEvent};
use crate::plan::{build_plan, RunPlan};
use crate::renderer::{default_renderers, RendererRegistry};
use crate::source::VolumeSource;
use crate::timeline::{resolve_clock, resolve_timeline, Timeline};
use crate::transform::{default_transforms, DynTransform, TransformRegistry};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Initializing,
    Streaming,
    Finalizing,
    Done,
}

/// A timeline step whose volume could not be fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedStep {
    pub timestamp: DateTime<Utc>,
    pub locator: String,
    pub reason: String,
}

/// A transform invocation that failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: String,
    pub status: ProcStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub error: String,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub clock: String,
    pub steps_total: usize,
    pub steps_processed: usize,
    pub skipped_steps: Vec<SkippedStep>,
    pub stage_failures: Vec<StageFailure>,
    pub products_rendered: usize,
    pub products_skipped: usize,
    pub phase: RunPhase,
}

impl RunReport {
    fn new(run_id: Uuid, timeline: &Timeline) -> Self {
        Self {
            run_id,
            clock: timeline.clock.to_string(),
            steps_total: timeline.len(),
            steps_processed: 0,
            skipped_steps: Vec::new(),
            stage_failures: Vec::new(),
            products_rendered: 0,
            products_skipped: 0,
            phase: RunPhase::Idle,
        }
    }

    pub fn steps_skipped(&self) -> usize {
        self.skipped_steps.len()
    }
}

// ---------------------------------------------------------------------------
// Field merge
// ---------------------------------------------------------------------------

/// Write the fields of `dataset` into the working volume when `stage` is
/// declared `make_global`. Existing fields of the same name are overwritten.
/// Returns the names written.
pub fn merge_fields(
    stage: &StageDescriptor,
    dataset: &Dataset,
    volume: Option<&mut Volume>,
) -> Vec<String> {
    if !stage.make_global {
        return Vec::new();
    }
    let Some(volume) = volume else {
        return Vec::new();
    };

    let mut merged = Vec::with_capacity(dataset.fields.len());
    for (name, value) in &dataset.fields {
        if volume.set_field(name.clone(), value.clone()).is_some() {
            tracing::debug!(stage = %stage.name, field = %name, "Overwrote volume field");
        }
        merged.push(name.clone());
    }
    merged
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

/// One planned stage with its transform and persistent context.
struct StageSlot<'a> {
    descriptor: &'a StageDescriptor,
    transform: &'a DynTransform,
    ctx: StageContext,
}

/// Runs one [`RunConfig`] against a [`VolumeSource`].
///
/// The executor owns the transform and renderer registries. Stage state lives
/// only for the duration of [`run`](Self::run), so one executor can drive
/// several runs.
pub struct PipelineExecutor {
    config: RunConfig,
    transforms: TransformRegistry,
    renderers: RendererRegistry,
    events: EventEmitter,
}

impl PipelineExecutor {
    pub fn new(
        config: RunConfig,
        transforms: TransformRegistry,
        renderers: RendererRegistry,
    ) -> Self {
        Self {
            config,
            transforms,
            renderers,
            events: EventEmitter::default(),
        }
    }

    /// Executor with the built-in stages and products.
    pub fn with_defaults(config: RunConfig) -> Self {
        Self::new(config, default_transforms(), default_renderers())
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    pub fn renderers(&self) -> &RendererRegistry {
        &self.renderers
    }

    pub fn plan(&self) -> Result<RunPlan> {
        build_plan(&self.config, &self.transforms)
    }

    /// Execute the run. Fatal errors abort before any transform is invoked;
    /// everything else is recorded in the report.
    pub async fn run(&self, source: &dyn VolumeSource) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        tracing::info!(run = %self.config.name, %run_id, "Starting run");
        self.events.emit(PipelineEvent::RunStarted {
            run_id: run_id.to_string(),
            run_name: self.config.name.clone(),
            stage_count: self.config.stages.len(),
        });

        match self.execute(run_id, source).await {
            Ok(report) => {
                tracing::info!(
                    run = %self.config.name,
                    processed = report.steps_processed,
                    total = report.steps_total,
                    skipped = report.steps_skipped(),
                    failures = report.stage_failures.len(),
                    "Run completed"
                );
                self.events.emit(PipelineEvent::RunCompleted {
                    run_id: run_id.to_string(),
                    steps_processed: report.steps_processed,
                    steps_skipped: report.steps_skipped(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Ok(report)
            }
            Err(e) => {
                tracing::error!(run = %self.config.name, error = %e, "Run aborted");
                self.events.emit(PipelineEvent::RunFailed {
                    run_id: run_id.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn execute(&self, run_id: Uuid, source: &dyn VolumeSource) -> Result<RunReport> {
        let plan = self.plan()?;
        let window = self.config.window.ok_or_else(|| {
            FlowError::Config("no processing window: both start and end are required".into())
        })?;
        let clock = resolve_clock(
            &plan.required,
            self.config.clock.as_ref(),
            &self.config.clock_fallback,
        )?;
        let timeline =
            resolve_timeline(source, self.config.master_scan(), clock, &window).await?;

        let mut report = RunReport::new(run_id, &timeline);
        let mut slots = self.slots(&plan)?;

        // INIT
        self.enter(&mut report, RunPhase::Initializing);
        for slot in &mut slots {
            self.invoke(slot, ProcStatus::Init, None, &mut report).await;
        }

        // PROCESS
        self.enter(&mut report, RunPhase::Streaming);
        let mut last_observed = None;
        for entry in timeline.iter() {
            last_observed = Some(entry.timestamp);
            let mut volume = match source.fetch_volume(entry, &plan.required).await {
                Ok(volume) => volume,
                Err(e) => {
                    tracing::warn!(
                        timestamp = %entry.timestamp,
                        locator = %entry.locator,
                        error = %e,
                        "Volume unavailable, skipping step"
                    );
                    self.events.emit(PipelineEvent::StepSkipped {
                        timestamp: entry.timestamp,
                        locator: entry.locator.clone(),
                        reason: e.to_string(),
                    });
                    report.skipped_steps.push(SkippedStep {
                        timestamp: entry.timestamp,
                        locator: entry.locator.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            tracing::info!(timestamp = %entry.timestamp, "Processing volume");
            for slot in &mut slots {
                slot.ctx.timestamp = Some(entry.timestamp);
                slot.ctx.state.last_timestamp = Some(entry.timestamp);
            }
            for slot in &mut slots {
                self.invoke(slot, ProcStatus::Process, Some(&mut volume), &mut report)
                    .await;
            }
            report.steps_processed += 1;
        }

        // FINALIZE
        self.enter(&mut report, RunPhase::Finalizing);
        for slot in &mut slots {
            slot.ctx.timestamp = last_observed;
            self.invoke(slot, ProcStatus::Finalize, None, &mut report).await;
        }

        self.enter(&mut report, RunPhase::Done);
        Ok(report)
    }

    /// Fresh contexts for every planned stage, in visiting order.
    fn slots<'a>(&'a self, plan: &'a RunPlan) -> Result<Vec<StageSlot<'a>>> {
        plan.ordered()
            .map(|descriptor| {
                let transform = self.transforms.get(&descriptor.stage_type).ok_or_else(|| {
                    FlowError::UnknownStageType {
                        stage: descriptor.name.clone(),
                        stage_type: descriptor.stage_type.clone(),
                    }
                })?;
                Ok(StageSlot {
                    descriptor,
                    transform,
                    ctx: StageContext::fresh(&self.config, descriptor),
                })
            })
            .collect()
    }

    fn enter(&self, report: &mut RunReport, phase: RunPhase) {
        tracing::debug!(?phase, "Entering phase");
        report.phase = phase;
        self.events.emit(PipelineEvent::PhaseChanged { phase });
    }

    /// Invoke one transform, merge and dispatch its result. Failures are
    /// recorded in `report` and never propagate.
    async fn invoke(
        &self,
        slot: &mut StageSlot<'_>,
        status: ProcStatus,
        volume: Option<&mut Volume>,
        report: &mut RunReport,
    ) {
        let stage = slot.descriptor;
        let timestamp = slot.ctx.timestamp;
        tracing::debug!(stage = %stage.name, %status, "Invoking stage");

        let result = slot
            .transform
            .transform(status, &mut slot.ctx, volume.as_deref())
            .await;

        let dataset = match result {
            Ok(dataset) => dataset,
            Err(e) => {
                tracing::warn!(stage = %stage.name, %status, error = %e, "Stage failed, skipping");
                if status == ProcStatus::Init {
                    slot.ctx.state = StageState::default();
                }
                self.events.emit(PipelineEvent::StageFailed {
                    stage: stage.name.clone(),
                    status,
                    error: e.to_string(),
                });
                report.stage_failures.push(StageFailure {
                    stage: stage.name.clone(),
                    status,
                    timestamp,
                    error: e.to_string(),
                });
                return;
            }
        };

        self.events.emit(PipelineEvent::StageInvoked {
            stage: stage.name.clone(),
            status,
            timestamp,
            produced: dataset.is_some(),
        });
        let Some(dataset) = dataset else {
            return;
        };

        let merged = merge_fields(stage, &dataset, volume);
        if !merged.is_empty() {
            self.events.emit(PipelineEvent::FieldsMerged {
                stage: stage.name.clone(),
                fields: merged,
            });
        }

        if stage.products.is_empty() {
            return;
        }
        let summary = ProductDispatcher::new(&self.config, &self.renderers, &self.events)
            .dispatch(stage, slot.transform.format(), &dataset, timestamp)
            .await;
        report.products_rendered += summary.rendered.len();
        report.products_skipped += summary.skipped.len();
    }
}
