use std::path::PathBuf;

use async_trait::async_trait;

use radflow_types::{Dataset, Result};

use crate::context::ProductContext;
use crate::renderer::ProductRenderer;

/// Logs field names and attributes of the dataset. Writes nothing.
pub struct LogFieldsProduct;

#[async_trait]
impl ProductRenderer for LogFieldsProduct {
    fn product_type(&self) -> &str {
        "LOG_FIELDS"
    }

    fn formats(&self) -> &[&str] {
        super::ANY_FORMAT
    }

    async fn render(&self, dataset: &Dataset, ctx: &ProductContext) -> Result<Option<PathBuf>> {
        let fields: Vec<&str> = dataset.fields.keys().map(String::as_str).collect();
        let attrs = serde_json::to_string(&dataset.attrs)?;
        tracing::info!(
            stage = %ctx.stage,
            product = %ctx.product,
            timestamp = ?ctx.timestamp,
            fields = ?fields,
            attrs = %attrs,
            "Dataset fields"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProductDescriptor, RunConfig, StageDescriptor};
    use serde_json::json;

    #[tokio::test]
    async fn renders_without_output_file() {
        let config = RunConfig::new("demo");
        let stage = StageDescriptor::new("echo", 0, "RAW");
        let product = ProductDescriptor::new("log", "LOG_FIELDS");
        let ctx = ProductContext::new(&config, &stage, &product, None);
        let ds = Dataset::new().with_field("dBZ", json!(1));
        assert!(LogFieldsProduct.render(&ds, &ctx).await.unwrap().is_none());
    }
}
