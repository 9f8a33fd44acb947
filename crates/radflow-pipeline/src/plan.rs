//! Level planning: stage descriptors → ordered execution tiers.

use std::collections::{BTreeMap, HashMap, HashSet};

use radflow_descriptor::DataTypeDescriptor;
use radflow_types::{FlowError, Result};

use crate::config::{RunConfig, StageDescriptor};
use crate::transform::TransformRegistry;

// ---------------------------------------------------------------------------
// RunLevels
// ---------------------------------------------------------------------------

/// Level number → stage names in declaration order.
///
/// Levels iterate in ascending order. Level 0 is always present, possibly
/// empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLevels {
    levels: BTreeMap<u32, Vec<String>>,
}

impl RunLevels {
    pub fn from_stages(stages: &[StageDescriptor]) -> Self {
        let mut levels: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        levels.insert(0, Vec::new());
        for stage in stages {
            levels.entry(stage.level).or_default().push(stage.name.clone());
        }
        Self { levels }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[String])> {
        self.levels.iter().map(|(l, names)| (*l, names.as_slice()))
    }

    /// All stage names in visiting order: level ascending, then declaration.
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.levels.values().flatten().map(String::as_str)
    }

    pub fn level(&self, level: u32) -> Option<&[String]> {
        self.levels.get(&level).map(Vec::as_slice)
    }

    pub fn level_numbers(&self) -> Vec<u32> {
        self.levels.keys().copied().collect()
    }

    /// Number of levels, including an empty level 0.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.values().all(Vec::is_empty)
    }
}

// ---------------------------------------------------------------------------
// RunPlan
// ---------------------------------------------------------------------------

/// Validated execution plan of one run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub levels: RunLevels,
    stages: HashMap<String, StageDescriptor>,
    /// Unique externally-sourced inputs of all stages.
    pub required: Vec<DataTypeDescriptor>,
}

impl RunPlan {
    pub fn stage(&self, name: &str) -> Option<&StageDescriptor> {
        self.stages.get(name)
    }

    /// Stage descriptors in visiting order.
    pub fn ordered(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.levels.stages().filter_map(|name| self.stages.get(name))
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Unique inputs of `stages`, keyed by `(category, field)` and kept in
/// first-declared order. Internally produced descriptors are excluded.
pub fn unique_datatypes(stages: &[StageDescriptor]) -> Vec<DataTypeDescriptor> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for d in stages.iter().flat_map(|s| &s.datatypes) {
        if d.is_internal() {
            continue;
        }
        if seen.insert(d.key()) {
            out.push(d.clone());
        }
    }
    out
}

/// Check the declared stages and build the execution plan.
pub fn build_plan(config: &RunConfig, transforms: &TransformRegistry) -> Result<RunPlan> {
    if config.stages.is_empty() {
        return Err(FlowError::NoStages);
    }

    let mut stages = HashMap::with_capacity(config.stages.len());
    for stage in &config.stages {
        if stages.contains_key(&stage.name) {
            return Err(FlowError::DuplicateStageName {
                name: stage.name.clone(),
            });
        }
        if !transforms.has(&stage.stage_type) {
            return Err(FlowError::UnknownStageType {
                stage: stage.name.clone(),
                stage_type: stage.stage_type.clone(),
            });
        }
        stages.insert(stage.name.clone(), stage.clone());
    }

    let levels = RunLevels::from_stages(&config.stages);
    let required = unique_datatypes(&config.stages);
    tracing::debug!(
        levels = levels.len(),
        stages = stages.len(),
        required = required.len(),
        "Built run plan"
    );

    Ok(RunPlan {
        levels,
        stages,
        required,
    })
}
