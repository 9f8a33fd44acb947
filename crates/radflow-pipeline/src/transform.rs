//! Stage transform trait, dynamic dispatch wrapper, and transform registry.

use std::collections::HashMap;

use async_trait::async_trait;

use radflow_types::{Dataset, ProcStatus, Result, Volume};

use crate::config::VOL_FORMAT;
use crate::context::StageContext;

// ---------------------------------------------------------------------------
// StageTransform trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StageTransform: Send + Sync {
    /// The stage-type identifier used in configuration (e.g. "RAW").
    fn stage_type(&self) -> &str;

    /// Dataset format of the results, used to pick renderers.
    fn format(&self) -> &str {
        VOL_FORMAT
    }

    /// Run one lifecycle step.
    ///
    /// `volume` is the working volume during `Process` and `None` otherwise.
    /// State that must survive to the next call goes into `ctx.state`.
    async fn transform(
        &self,
        status: ProcStatus,
        ctx: &mut StageContext,
        volume: Option<&Volume>,
    ) -> Result<Option<Dataset>>;
}

// ---------------------------------------------------------------------------
// DynTransform: object-safe wrapper
// ---------------------------------------------------------------------------

pub struct DynTransform(Box<dyn StageTransform>);

impl DynTransform {
    pub fn new(transform: impl StageTransform + 'static) -> Self {
        Self(Box::new(transform))
    }

    pub fn stage_type(&self) -> &str {
        self.0.stage_type()
    }

    pub fn format(&self) -> &str {
        self.0.format()
    }

    pub async fn transform(
        &self,
        status: ProcStatus,
        ctx: &mut StageContext,
        volume: Option<&Volume>,
    ) -> Result<Option<Dataset>> {
        self.0.transform(status, ctx, volume).await
    }
}

// ---------------------------------------------------------------------------
// TransformRegistry
// ---------------------------------------------------------------------------

/// Stage-type identifier → transform, populated once at startup.
pub struct TransformRegistry {
    transforms: HashMap<String, DynTransform>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Register a transform under its own stage type, replacing any previous
    /// registration of that type.
    pub fn register(&mut self, transform: impl StageTransform + 'static) {
        let t = transform.stage_type().to_string();
        self.transforms.insert(t, DynTransform::new(transform));
    }

    pub fn get(&self, stage_type: &str) -> Option<&DynTransform> {
        self.transforms.get(stage_type)
    }

    pub fn has(&self, stage_type: &str) -> bool {
        self.transforms.contains_key(stage_type)
    }

    /// Registered stage types, sorted.
    pub fn stage_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the built-in stages.
pub fn default_transforms() -> TransformRegistry {
    let mut reg = TransformRegistry::new();
    reg.register(crate::stages::RawStage);
    reg.register(crate::stages::TimeAvgStage);
    reg
}
