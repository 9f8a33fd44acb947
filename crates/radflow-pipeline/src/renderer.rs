//! Product renderer trait and the per-format renderer registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use radflow_types::{Dataset, Result};

use crate::config::VOL_FORMAT;
use crate::context::ProductContext;

#[async_trait]
pub trait ProductRenderer: Send + Sync {
    /// The product-type identifier used in configuration (e.g. "SAVE_JSON").
    fn product_type(&self) -> &str;

    /// Dataset formats this renderer understands.
    fn formats(&self) -> &[&str] {
        &[VOL_FORMAT]
    }

    /// Render `dataset`. Returns the path written, if the product is a file.
    async fn render(&self, dataset: &Dataset, ctx: &ProductContext) -> Result<Option<PathBuf>>;
}

/// `(format, product type)` → renderer, populated once at startup.
pub struct RendererRegistry {
    by_format: HashMap<String, HashMap<String, Arc<dyn ProductRenderer>>>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self {
            by_format: HashMap::new(),
        }
    }

    /// Register a renderer for every format it declares.
    pub fn register(&mut self, renderer: impl ProductRenderer + 'static) {
        let renderer: Arc<dyn ProductRenderer> = Arc::new(renderer);
        let product_type = renderer.product_type().to_string();
        for format in renderer.formats() {
            self.by_format
                .entry((*format).to_string())
                .or_default()
                .insert(product_type.clone(), Arc::clone(&renderer));
        }
    }

    pub fn resolve(&self, format: &str, product_type: &str) -> Option<&dyn ProductRenderer> {
        self.by_format
            .get(format)
            .and_then(|types| types.get(product_type))
            .map(|r| r.as_ref())
    }

    pub fn supports(&self, format: &str, product_type: &str) -> bool {
        self.resolve(format, product_type).is_some()
    }

    /// `true` if any format knows `product_type`.
    pub fn knows(&self, product_type: &str) -> bool {
        self.by_format
            .values()
            .any(|types| types.contains_key(product_type))
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the built-in products.
pub fn default_renderers() -> RendererRegistry {
    let mut reg = RendererRegistry::new();
    reg.register(crate::products::SaveJsonProduct);
    reg.register(crate::products::LogFieldsProduct);
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PpiImage;

    #[async_trait]
    impl ProductRenderer for PpiImage {
        fn product_type(&self) -> &str {
            "PPI_IMAGE"
        }

        async fn render(&self, _ds: &Dataset, _ctx: &ProductContext) -> Result<Option<PathBuf>> {
            Ok(None)
        }
    }

    #[test]
    fn resolution_is_per_format() {
        let mut reg = RendererRegistry::new();
        reg.register(PpiImage);
        assert!(reg.supports("VOL", "PPI_IMAGE"));
        assert!(!reg.supports("TIMESERIES", "PPI_IMAGE"));
        assert!(reg.knows("PPI_IMAGE"));
        assert!(!reg.knows("RHI_IMAGE"));
    }

    #[test]
    fn default_renderers_cover_both_formats() {
        let reg = default_renderers();
        for format in ["VOL", "TIMESERIES"] {
            assert!(reg.supports(format, "SAVE_JSON"));
            assert!(reg.supports(format, "LOG_FIELDS"));
        }
    }
}
