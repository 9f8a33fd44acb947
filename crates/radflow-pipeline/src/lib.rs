//! Dataset processing flow engine.
//!
//! This crate turns a [`RunConfig`] into a run: it plans stages into levels,
//! picks the clock that drives the timeline, invokes every stage transform
//! through its INIT / PROCESS / FINALIZE lifecycle, merges global results
//! into the working volume, and dispatches products to renderers.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod plan;
pub mod products;
pub mod renderer;
pub mod source;
pub mod stages;
pub mod timeline;
pub mod transform;
pub mod validation;

pub use config::{
    default_clock_fallback, ClockFallback, ProductDescriptor, RunConfig, StageDescriptor,
    TimeWindow, VOL_FORMAT,
};
pub use context::{ProductContext, StageContext};
pub use dispatch::{DispatchSummary, ProductDispatcher, RenderedProduct, SkippedProduct};
pub use engine::{merge_fields, PipelineExecutor, RunPhase, RunReport, SkippedStep, StageFailure};
pub use events::{EventEmitter, PipelineEvent};
pub use plan::{build_plan, unique_datatypes, RunLevels, RunPlan};
pub use products::{LogFieldsProduct, SaveJsonProduct};
pub use renderer::{default_renderers, ProductRenderer, RendererRegistry};
pub use source::{DirectorySource, MemorySource, VolumeSource};
pub use stages::{RawStage, TimeAvgStage};
pub use timeline::{resolve_clock, resolve_timeline, Timeline, TimelineEntry};
pub use transform::{default_transforms, DynTransform, StageTransform, TransformRegistry};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
