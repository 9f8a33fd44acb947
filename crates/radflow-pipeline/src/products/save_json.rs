use std::path::PathBuf;

use async_trait::async_trait;

use radflow_types::{Dataset, FlowError, Result};

use crate::context::ProductContext;
use crate::renderer::ProductRenderer;

/// Writes the dataset (or only its `voltype` field) as pretty JSON under the
/// product's save directory.
pub struct SaveJsonProduct;

#[async_trait]
impl ProductRenderer for SaveJsonProduct {
    fn product_type(&self) -> &str {
        "SAVE_JSON"
    }

    fn formats(&self) -> &[&str] {
        super::ANY_FORMAT
    }

    async fn render(&self, dataset: &Dataset, ctx: &ProductContext) -> Result<Option<PathBuf>> {
        let (field, body) = match ctx.voltype() {
            Some(field) => {
                let value = dataset.field(field).ok_or_else(|| FlowError::MissingField {
                    stage: ctx.stage.clone(),
                    field: field.to_string(),
                })?;
                let subset = Dataset {
                    fields: [(field.to_string(), value.clone())].into_iter().collect(),
                    attrs: dataset.attrs.clone(),
                };
                (field.to_string(), serde_json::to_value(&subset)?)
            }
            None => ("all".to_string(), serde_json::to_value(dataset)?),
        };

        let dir = ctx.save_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(ctx.file_name("ds", &field, "json"));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&body)?).await?;

        tracing::info!(product = %ctx.product, path = %path.display(), "Saved dataset");
        Ok(Some(path))
    }
}
