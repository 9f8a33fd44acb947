//! Run configuration: the immutable description of one processing run.
//!
//! A [`RunConfig`] is usually loaded from a TOML file with [`RunConfig::load`],
//! but can be assembled in code with the builder methods (tests, embedding).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use radflow_descriptor::{parse_datatype, parse_stage_entry, DataTypeDescriptor};
use radflow_types::{FlowError, Params, Result};

/// Dataset format every transform and renderer uses unless it says otherwise.
pub const VOL_FORMAT: &str = "VOL";

// ---------------------------------------------------------------------------
// Clock fallback table
// ---------------------------------------------------------------------------

/// Maps an auxiliary-reference category to the clock descriptor used when a
/// run consumes only auxiliary data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockFallback {
    pub category: String,
    pub clock: String,
}

impl ClockFallback {
    pub fn new(category: impl Into<String>, clock: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            clock: clock.into(),
        }
    }
}

/// Model and terrain references of the RAINBOW and RAD4ALP families.
pub fn default_clock_fallback() -> Vec<ClockFallback> {
    vec![
        ClockFallback::new("COSMO", "RAINBOW:dBZ"),
        ClockFallback::new("RAD4ALPCOSMO", "RAD4ALP:dBZ"),
        ClockFallback::new("DEM", "RAINBOW:dBZ"),
        ClockFallback::new("RAD4ALPDEM", "RAD4ALP:dBZ"),
    ]
}

// ---------------------------------------------------------------------------
// Time window
// ---------------------------------------------------------------------------

/// Half-open processing period `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

// ---------------------------------------------------------------------------
// Stage and product descriptors
// ---------------------------------------------------------------------------

/// A named output-generation request attached to a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDescriptor {
    pub name: String,
    pub product_type: String,
    pub params: Params,
}

impl ProductDescriptor {
    pub fn new(name: impl Into<String>, product_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            product_type: product_type.into(),
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// One declared processing stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDescriptor {
    pub name: String,
    pub level: u32,
    pub stage_type: String,
    pub make_global: bool,
    pub datatypes: Vec<DataTypeDescriptor>,
    pub params: Params,
    pub products: Vec<ProductDescriptor>,
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>, level: u32, stage_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level,
            stage_type: stage_type.into(),
            make_global: false,
            datatypes: Vec::new(),
            params: Params::new(),
            products: Vec::new(),
        }
    }

    pub fn make_global(mut self, make_global: bool) -> Self {
        self.make_global = make_global;
        self
    }

    pub fn with_datatype(mut self, datatype: DataTypeDescriptor) -> Self {
        self.datatypes.push(datatype);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_product(mut self, product: ProductDescriptor) -> Self {
        self.products.push(product);
        self
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Process-wide configuration, resolved once at startup and never mutated
/// while a run is in progress.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Processing name; the first path component of every product.
    pub name: String,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Scan list. The first entry is the master scan that drives the clock.
    pub scans: Vec<String>,
    /// Stages in declaration order.
    pub stages: Vec<StageDescriptor>,
    /// Designated clock; bypasses clock selection when set.
    pub clock: Option<DataTypeDescriptor>,
    pub clock_fallback: Vec<ClockFallback>,
    pub window: Option<TimeWindow>,
    /// Run-wide parameters shared by every stage and product.
    pub params: Params,
}

impl RunConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: PathBuf::new(),
            output: PathBuf::new(),
            scans: Vec::new(),
            stages: Vec::new(),
            clock: None,
            clock_fallback: default_clock_fallback(),
            window: None,
            params: Params::new(),
        }
    }

    pub fn with_stage(mut self, stage: StageDescriptor) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.window = Some(TimeWindow::new(start, end));
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn master_scan(&self) -> Option<&str> {
        self.scans.first().map(String::as_str)
    }

    pub fn stage(&self, name: &str) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Read and resolve a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Resolve a configuration from TOML text.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: RunConfigFile =
            toml::from_str(source).map_err(|e| FlowError::Config(e.to_string()))?;
        file.resolve()
    }
}

// ---------------------------------------------------------------------------
// On-disk representation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RunConfigFile {
    name: String,
    #[serde(default)]
    input: PathBuf,
    #[serde(default)]
    output: PathBuf,
    #[serde(default)]
    scans: Vec<String>,
    #[serde(default)]
    stages: Vec<String>,
    clock: Option<String>,
    clock_fallback: Option<Vec<ClockFallback>>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    params: Params,
    #[serde(default)]
    stage: HashMap<String, StageFile>,
}

#[derive(Debug, Deserialize)]
struct StageFile {
    #[serde(rename = "type")]
    stage_type: String,
    #[serde(default)]
    datatype: OneOrMany,
    #[serde(default)]
    make_global: bool,
    #[serde(default)]
    params: Params,
    #[serde(default)]
    products: Vec<ProductFile>,
}

#[derive(Debug, Deserialize)]
struct ProductFile {
    name: String,
    #[serde(rename = "type")]
    product_type: String,
    #[serde(flatten)]
    params: Params,
}

/// `datatype = "X:y"` or `datatype = ["X:y", "X:z"]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

impl RunConfigFile {
    fn resolve(mut self) -> Result<RunConfig> {
        let mut stages: Vec<StageDescriptor> = Vec::with_capacity(self.stages.len());
        for entry in &self.stages {
            let stage_ref = parse_stage_entry(entry)?;
            if let Some(first) = stages.iter().find(|s| s.name == stage_ref.name) {
                // Listed twice: keep both entries so planning reports the
                // duplicate rather than a missing definition.
                let mut dup = first.clone();
                dup.level = stage_ref.level;
                stages.push(dup);
                continue;
            }
            let def = self
                .stage
                .remove(&stage_ref.name)
                .ok_or_else(|| FlowError::UndefinedStage {
                    name: stage_ref.name.clone(),
                })?;

            let datatypes = def
                .datatype
                .into_vec()
                .iter()
                .map(|d| parse_datatype(d))
                .collect::<Result<Vec<_>>>()?;
            let products = def
                .products
                .into_iter()
                .map(|p| ProductDescriptor {
                    name: p.name,
                    product_type: p.product_type,
                    params: p.params,
                })
                .collect();

            stages.push(StageDescriptor {
                name: stage_ref.name,
                level: stage_ref.level,
                stage_type: def.stage_type,
                make_global: def.make_global,
                datatypes,
                params: def.params,
                products,
            });
        }

        for unused in self.stage.keys() {
            tracing::warn!(stage = %unused, "Stage defined but not listed in `stages`; ignoring");
        }

        let clock = self.clock.as_deref().map(parse_datatype).transpose()?;
        let window = match (self.start, self.end) {
            (Some(start), Some(end)) => Some(TimeWindow::new(start, end)),
            (None, None) => None,
            _ => {
                return Err(FlowError::Config(
                    "`start` and `end` must be given together".into(),
                ))
            }
        };

        Ok(RunConfig {
            name: self.name,
            input: self.input,
            output: self.output,
            scans: self.scans,
            stages,
            clock,
            clock_fallback: self.clock_fallback.unwrap_or_else(default_clock_fallback),
            window,
            params: self.params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const SAMPLE: &str = r#"
        name = "demo"
        input = "/data/radar"
        output = "/data/products"
        scans = ["001", "002"]
        stages = ["l0:echo", "l1:avg", "hydro"]
        start = "2024-05-01T00:00:00Z"
        end = "2024-05-01T01:00:00Z"

        [params]
        imgformat = "png"

        [stage.echo]
        type = "RAW"
        datatype = ["RAINBOW:dBZ", "RAINBOW:ZDR"]
        make_global = true

        [[stage.echo.products]]
        name = "dbz_json"
        type = "SAVE_JSON"
        voltype = "dBZ"

        [[stage.echo.products]]
        name = "all_log"
        type = "LOG_FIELDS"

        [stage.avg]
        type = "TIME_AVG"
        datatype = "PROC:dBZ,echo,dbz_json"

        [stage.avg.params]
        min_volumes = 2

        [stage.hydro]
        type = "RAW"
    "#;

    #[test]
    fn load_full_config() {
        let cfg = RunConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.name, "demo");
        assert_eq!(cfg.master_scan(), Some("001"));
        assert_eq!(cfg.params.get("imgformat"), Some(&json!("png")));
        assert_eq!(cfg.clock_fallback, default_clock_fallback());
        assert!(cfg.clock.is_none());

        let names: Vec<_> = cfg.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "avg", "hydro"]);

        let echo = cfg.stage("echo").unwrap();
        assert_eq!(echo.level, 0);
        assert!(echo.make_global);
        assert_eq!(echo.datatypes.len(), 2);
        assert_eq!(echo.products.len(), 2);
        assert_eq!(echo.products[0].name, "dbz_json");
        assert_eq!(echo.products[0].product_type, "SAVE_JSON");
        assert_eq!(echo.products[0].params.get("voltype"), Some(&json!("dBZ")));
        assert!(!echo.products[0].params.contains_key("name"));
        assert_eq!(echo.products[1].name, "all_log");

        let avg = cfg.stage("avg").unwrap();
        assert_eq!(avg.level, 1);
        assert_eq!(avg.datatypes.len(), 1);
        assert_eq!(avg.datatypes[0].source_stage.as_deref(), Some("echo"));
        assert_eq!(avg.params.get("min_volumes"), Some(&json!(2)));

        assert_eq!(cfg.stage("hydro").unwrap().level, 0);
    }

    #[test]
    fn window_is_half_open() {
        let cfg = RunConfig::from_toml_str(SAMPLE).unwrap();
        let w = cfg.window.unwrap();
        assert!(w.contains(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        assert!(w.contains(Utc.with_ymd_and_hms(2024, 5, 1, 0, 59, 59).unwrap()));
        assert!(!w.contains(Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap()));
    }

    #[test]
    fn undefined_stage_is_rejected() {
        let err = RunConfig::from_toml_str(
            r#"
            name = "x"
            stages = ["l0:ghost"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::UndefinedStage { ref name } if name == "ghost"));
        assert!(err.is_fatal());
    }

    #[test]
    fn malformed_stage_entry_is_rejected() {
        let err = RunConfig::from_toml_str(
            r#"
            name = "x"
            stages = ["lx:echo"]
            [stage.echo]
            type = "RAW"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::MalformedDescriptor { .. }));
    }

    #[test]
    fn malformed_datatype_is_rejected() {
        let err = RunConfig::from_toml_str(
            r#"
            name = "x"
            stages = ["echo"]
            [stage.echo]
            type = "RAW"
            datatype = "RAINBOW"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::MalformedDescriptor { .. }));
    }

    #[test]
    fn stage_listed_twice_is_kept_twice() {
        let cfg = RunConfig::from_toml_str(
            r#"
            name = "x"
            stages = ["l0:echo", "l1:echo"]
            [stage.echo]
            type = "RAW"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.stages.len(), 2);
        assert_eq!(cfg.stages[1].level, 1);
    }

    #[test]
    fn custom_clock_and_fallback() {
        let cfg = RunConfig::from_toml_str(
            r#"
            name = "x"
            clock = "ODIM:dBZ"
            [[clock_fallback]]
            category = "NWP"
            clock = "ODIM:dBZ"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.clock, Some(DataTypeDescriptor::new("ODIM", "dBZ")));
        assert_eq!(cfg.clock_fallback, vec![ClockFallback::new("NWP", "ODIM:dBZ")]);
        assert!(cfg.window.is_none());
    }

    #[test]
    fn half_window_is_rejected() {
        let err = RunConfig::from_toml_str(
            r#"
            name = "x"
            start = "2024-05-01T00:00:00Z"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = RunConfig::from_toml_str("name = ").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = RunConfig::load(&path).unwrap();
        assert_eq!(cfg.stages.len(), 3);
    }
}
