use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of data produced by another stage of the same run. Descriptors of
/// this category are read from the working volume, never from a data source.
pub const PROC_CATEGORY: &str = "PROC";

/// A `lN:name` stage declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageRef {
    pub level: u32,
    pub name: String,
}

impl fmt::Display for StageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}:{}", self.level, self.name)
    }
}

/// One requested input quantity: `CATEGORY:field[,sourceStage,sourceProduct]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataTypeDescriptor {
    pub category: String,
    pub field: String,
    pub source_stage: Option<String>,
    pub source_product: Option<String>,
}

impl DataTypeDescriptor {
    pub fn new(category: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            field: field.into(),
            source_stage: None,
            source_product: None,
        }
    }

    /// Attach the stage/product pair this input is read from.
    pub fn with_source(mut self, stage: impl Into<String>, product: impl Into<String>) -> Self {
        self.source_stage = Some(stage.into());
        self.source_product = Some(product.into());
        self
    }

    /// `true` when the descriptor names data produced inside the run.
    pub fn is_internal(&self) -> bool {
        self.category == PROC_CATEGORY
    }

    /// Identity used for de-duplication: category and field only.
    pub fn key(&self) -> (&str, &str) {
        (&self.category, &self.field)
    }
}

impl fmt::Display for DataTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.field)?;
        if let (Some(stage), Some(product)) = (&self.source_stage, &self.source_product) {
            write!(f, ",{},{}", stage, product)?;
        }
        Ok(())
    }
}

impl FromStr for DataTypeDescriptor {
    type Err = radflow_types::FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::parser::parse_datatype(s)
    }
}

impl FromStr for StageRef {
    type Err = radflow_types::FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::parser::parse_stage_ref(s)
    }
}
