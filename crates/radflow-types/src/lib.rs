//! Shared types, errors, volumes and stage state for the radflow processing engine.
//!
//! This crate provides the foundational types used across all other radflow crates:
//! - `FlowError`: unified error taxonomy, split into fatal and recoverable kinds
//! - `Volume`: one sensor-volume snapshot, the shared working volume of a step
//! - `Dataset`: the derived artifact a stage transform returns
//! - `Accumulator`: type-erased cross-volume state owned by a stage
//! - `StageState`: the per-stage state the executor carries across steps

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unified error type for all radflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    // === Descriptor / configuration errors (fatal) ===
    #[error("Malformed descriptor '{descriptor}': {message}")]
    MalformedDescriptor { descriptor: String, message: String },

    #[error("No processing stages declared")]
    NoStages,

    #[error("Stage '{name}' is listed but has no definition")]
    UndefinedStage { name: String },

    #[error("Stage name '{name}' is declared more than once")]
    DuplicateStageName { name: String },

    #[error("Stage '{stage}' references unknown stage type '{stage_type}'")]
    UnknownStageType { stage: String, stage_type: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // === Timeline errors (fatal) ===
    #[error("No clock descriptor available: stages require no usable input data type")]
    NoClockAvailable,

    #[error("No volumes found for clock '{clock}' between {start} and {end}")]
    EmptyTimeline {
        clock: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    // === Step-level errors (recoverable) ===
    #[error("Volume not found at '{locator}': {message}")]
    VolumeNotFound { locator: String, message: String },

    // === Stage-level errors (recoverable) ===
    #[error("Stage '{stage}' failed during {status}: {message}")]
    TransformFailed {
        stage: String,
        status: ProcStatus,
        message: String,
    },

    #[error("Field '{field}' missing from result of stage '{stage}'")]
    MissingField { stage: String, field: String },

    #[error("Product '{product}' of stage '{stage}' has unsupported type '{product_type}'")]
    UnsupportedProductType {
        stage: String,
        product: String,
        product_type: String,
    },

    #[error("Renderer for product '{product}' failed: {message}")]
    RendererFailed { product: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FlowError {
    /// Returns `true` if the error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowError::MalformedDescriptor { .. }
                | FlowError::NoStages
                | FlowError::UndefinedStage { .. }
                | FlowError::DuplicateStageName { .. }
                | FlowError::UnknownStageType { .. }
                | FlowError::Config(_)
                | FlowError::NoClockAvailable
                | FlowError::EmptyTimeline { .. }
        )
    }

    /// Returns `true` if the error only skips one unit of work (a step, a
    /// stage invocation or a product).
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

/// A convenience alias for `Result<T, FlowError>`.
pub type Result<T> = std::result::Result<T, FlowError>;

// ---------------------------------------------------------------------------
// ProcStatus: lifecycle phase a transform is invoked in
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcStatus {
    Init,
    Process,
    Finalize,
}

impl fmt::Display for ProcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcStatus::Init => "init",
            ProcStatus::Process => "process",
            ProcStatus::Finalize => "finalize",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Field containers
// ---------------------------------------------------------------------------

/// Named fields of a volume or dataset. Ordered so that iteration, logging
/// and serialised output are deterministic.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// Free-form parameters handed to transforms and renderers.
pub type Params = BTreeMap<String, serde_json::Value>;

/// One sensor-volume snapshot.
///
/// During a timeline step this is the shared working volume: stages declared
/// with `make_global` write their result fields into it and later stages of
/// the same step read them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub time: DateTime<Utc>,
    pub locator: String,
    #[serde(default)]
    pub fields: FieldMap,
}

impl Volume {
    /// Create an empty volume.
    pub fn new(time: DateTime<Utc>, locator: impl Into<String>) -> Self {
        Self {
            time,
            locator: locator.into(),
            fields: FieldMap::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Write a field, replacing any existing field of the same name.
    /// Returns the replaced value.
    pub fn set_field(
        &mut self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.fields.insert(name.into(), value)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// The derived artifact returned by a stage transform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub attrs: FieldMap,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// `true` when the dataset carries neither fields nor attributes.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.attrs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Accumulator: opaque cross-volume state of one stage
// ---------------------------------------------------------------------------

/// Type-erased state owned by a stage transform.
///
/// The executor stores and hands it back unchanged between invocations; only
/// the transform that created it knows the concrete type.
pub struct Accumulator(Box<dyn Any + Send + Sync>);

impl Accumulator {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.downcast_mut::<T>()
    }

    /// Take the concrete value out, or give the accumulator back on a type
    /// mismatch.
    pub fn into_inner<T: Any>(self) -> std::result::Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(inner) => Err(Self(inner)),
        }
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Accumulator(..)")
    }
}

// ---------------------------------------------------------------------------
// StageState: per-stage state carried across timeline steps
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StageState {
    /// Set by the transform once its auxiliary data is available.
    pub initialized: bool,
    pub accumulator: Option<Accumulator>,
    /// Timestamp of the last PROCESS invocation.
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl StageState {
    /// Borrow the accumulator as `T`, if present and of that type.
    pub fn accumulator_ref<T: Any>(&self) -> Option<&T> {
        self.accumulator.as_ref().and_then(|a| a.downcast_ref::<T>())
    }

    /// Borrow the accumulator as `T`, installing `T::default()` first when it
    /// is absent or holds a different type.
    pub fn accumulator_or_default<T: Any + Default + Send + Sync>(&mut self) -> &mut T {
        let matches = self.accumulator.as_ref().is_some_and(|a| a.is::<T>());
        if !matches {
            self.accumulator = Some(Accumulator::new(T::default()));
        }
        self.accumulator
            .as_mut()
            .and_then(|a| a.downcast_mut::<T>())
            .unwrap_or_else(|| unreachable!("accumulator was just installed"))
    }
}
