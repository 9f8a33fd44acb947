//! Per-stage and per-product contexts handed to transforms and renderers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use radflow_descriptor::DataTypeDescriptor;
use radflow_types::{Params, StageState};

use crate::config::{ProductDescriptor, RunConfig, StageDescriptor};

/// Everything a stage transform sees about itself.
///
/// Transforms receive it as `&mut` and may update [`state`](Self::state);
/// whatever they leave there is what the executor hands back on the next
/// invocation.
#[derive(Debug)]
pub struct StageContext {
    pub name: String,
    pub stage_type: String,
    pub level: u32,
    pub make_global: bool,
    pub datatypes: Vec<DataTypeDescriptor>,
    /// Run-wide parameters overlaid by the stage's own parameters.
    pub params: Params,
    /// Time of the volume being processed. `None` during initialisation.
    pub timestamp: Option<DateTime<Utc>>,
    pub state: StageState,
}

impl StageContext {
    /// Build an uninitialised context for `stage`.
    pub fn fresh(config: &RunConfig, stage: &StageDescriptor) -> Self {
        let mut params = config.params.clone();
        params.extend(stage.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        params.insert("procname".into(), serde_json::json!(config.name));
        params.insert(
            "output".into(),
            serde_json::json!(config.output.to_string_lossy()),
        );
        params.insert("dsname".into(), serde_json::json!(stage.name));

        Self {
            name: stage.name.clone(),
            stage_type: stage.stage_type.clone(),
            level: stage.level,
            make_global: stage.make_global,
            datatypes: stage.datatypes.clone(),
            params,
            timestamp: None,
            state: StageState::default(),
        }
    }

    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    /// String parameter, falling back to `default` when absent or not a string.
    pub fn param_str(&self, key: &str, default: &str) -> String {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_owned()
    }

    /// Names of the fields this stage asked for, in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.datatypes.iter().map(|d| d.field.as_str())
    }
}

/// Fully-resolved context for one product rendering.
#[derive(Debug, Clone)]
pub struct ProductContext {
    pub run_name: String,
    pub output: PathBuf,
    pub stage: String,
    pub stage_type: String,
    pub product: String,
    pub product_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Run-wide parameters overlaid by the product's own parameters.
    pub params: Params,
}

impl ProductContext {
    pub fn new(
        config: &RunConfig,
        stage: &StageDescriptor,
        product: &ProductDescriptor,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        let mut params = config.params.clone();
        params.extend(product.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            run_name: config.name.clone(),
            output: config.output.clone(),
            stage: stage.name.clone(),
            stage_type: stage.stage_type.clone(),
            product: product.name.clone(),
            product_type: product.product_type.clone(),
            timestamp,
            params,
        }
    }

    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str, default: &str) -> String {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_owned()
    }

    /// The single field this product is restricted to, if any.
    pub fn voltype(&self) -> Option<&str> {
        self.params.get("voltype").and_then(|v| v.as_str())
    }

    /// `<output>/<run>/<YYYY-MM-DD>/<stage>/<product>/`, without the date
    /// component when there is no timestamp.
    pub fn save_dir(&self) -> PathBuf {
        let mut dir = self.output.join(&self.run_name);
        if let Some(ts) = self.timestamp {
            dir.push(ts.format("%Y-%m-%d").to_string());
        }
        dir.push(&self.stage);
        dir.push(&self.product);
        dir
    }

    /// `<YYYYmmddHHMMSS>_<prefix>_<field>.<ext>`, without the time stamp when
    /// there is no timestamp.
    pub fn file_name(&self, prefix: &str, field: &str, ext: &str) -> String {
        match self.timestamp {
            Some(ts) => format!("{}_{}_{}.{}", ts.format("%Y%m%d%H%M%S"), prefix, field, ext),
            None => format!("{}_{}.{}", prefix, field, ext),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn config() -> RunConfig {
        RunConfig::new("demo")
            .with_output("/out")
            .with_param("imgformat", json!("png"))
            .with_param("threshold", json!(5))
    }

    #[test]
    fn stage_params_overlay_run_params() {
        let stage = StageDescriptor::new("echo", 1, "RAW").with_param("threshold", json!(10));
        let ctx = StageContext::fresh(&config(), &stage);
        assert_eq!(ctx.param("threshold"), Some(&json!(10)));
        assert_eq!(ctx.param_str("imgformat", "svg"), "png");
        assert_eq!(ctx.param_str("dsname", ""), "echo");
        assert_eq!(ctx.param_str("procname", ""), "demo");
        assert_eq!(ctx.param_str("missing", "fallback"), "fallback");
        assert!(!ctx.state.initialized);
        assert!(ctx.state.accumulator.is_none());
        assert!(ctx.timestamp.is_none());
    }

    #[test]
    fn product_context_paths() {
        let stage = StageDescriptor::new("echo", 0, "RAW");
        let product =
            ProductDescriptor::new("dbz", "SAVE_JSON").with_param("voltype", json!("dBZ"));
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap();
        let ctx = ProductContext::new(&config(), &stage, &product, Some(ts));

        assert_eq!(ctx.voltype(), Some("dBZ"));
        assert_eq!(ctx.param_str("imgformat", ""), "png");
        assert_eq!(
            ctx.save_dir(),
            PathBuf::from("/out/demo/2024-05-01/echo/dbz")
        );
        assert_eq!(ctx.file_name("ds", "dBZ", "json"), "20240501120500_ds_dBZ.json");
    }

    #[test]
    fn product_context_without_timestamp() {
        let stage = StageDescriptor::new("echo", 0, "RAW");
        let product = ProductDescriptor::new("summary", "SAVE_JSON");
        let ctx = ProductContext::new(&config(), &stage, &product, None);
        assert_eq!(ctx.save_dir(), PathBuf::from("/out/demo/echo/summary"));
        assert_eq!(ctx.file_name("ds", "all", "json"), "ds_all.json");
        assert!(ctx.voltype().is_none());
    }
}
