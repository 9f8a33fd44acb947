//! Product dispatch: render every declared product of a stage result.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use radflow_types::{Dataset, FlowError};

use crate::config::{RunConfig, StageDescriptor};
use crate::context::ProductContext;
use crate::events::{EventEmitter, PipelineEvent};
use crate::renderer::RendererRegistry;

#[derive(Debug)]
pub struct RenderedProduct {
    pub product: String,
    pub path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct SkippedProduct {
    pub product: String,
    pub error: FlowError,
}

/// What happened to the products of one stage result.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub rendered: Vec<RenderedProduct>,
    pub skipped: Vec<SkippedProduct>,
}

pub struct ProductDispatcher<'a> {
    config: &'a RunConfig,
    renderers: &'a RendererRegistry,
    events: &'a EventEmitter,
}

impl<'a> ProductDispatcher<'a> {
    pub fn new(
        config: &'a RunConfig,
        renderers: &'a RendererRegistry,
        events: &'a EventEmitter,
    ) -> Self {
        Self {
            config,
            renderers,
            events,
        }
    }

    /// Render each product of `stage` in declaration order. Failures are
    /// logged and recorded; they never stop sibling products.
    pub async fn dispatch(
        &self,
        stage: &StageDescriptor,
        format: &str,
        dataset: &Dataset,
        timestamp: Option<DateTime<Utc>>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for product in &stage.products {
            let ctx = ProductContext::new(self.config, stage, product, timestamp);
            match self.render_one(format, dataset, &ctx).await {
                Ok(path) => {
                    tracing::debug!(
                        stage = %stage.name,
                        product = %product.name,
                        "Product rendered"
                    );
                    self.events.emit(PipelineEvent::ProductRendered {
                        stage: stage.name.clone(),
                        product: product.name.clone(),
                        path: path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                    });
                    summary.rendered.push(RenderedProduct {
                        product: product.name.clone(),
                        path,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        stage = %stage.name,
                        product = %product.name,
                        error = %error,
                        "Product skipped"
                    );
                    self.events.emit(PipelineEvent::ProductSkipped {
                        stage: stage.name.clone(),
                        product: product.name.clone(),
                        reason: error.to_string(),
                    });
                    summary.skipped.push(SkippedProduct {
                        product: product.name.clone(),
                        error,
                    });
                }
            }
        }

        summary
    }

    async fn render_one(
        &self,
        format: &str,
        dataset: &Dataset,
        ctx: &ProductContext,
    ) -> Result<Option<PathBuf>, FlowError> {
        let renderer = self
            .renderers
            .resolve(format, &ctx.product_type)
            .ok_or_else(|| FlowError::UnsupportedProductType {
                stage: ctx.stage.clone(),
                product: ctx.product.clone(),
                product_type: ctx.product_type.clone(),
            })?;

        if let Some(field) = ctx.voltype() {
            if !dataset.has_field(field) {
                return Err(FlowError::MissingField {
                    stage: ctx.stage.clone(),
                    field: field.to_string(),
                });
            }
        }

        renderer.render(dataset, ctx).await.map_err(|e| match e {
            e @ (FlowError::RendererFailed { .. } | FlowError::MissingField { .. }) => e,
            other => FlowError::RendererFailed {
                product: ctx.product.clone(),
                message: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProductDescriptor;
    use crate::renderer::ProductRenderer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Recording {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ProductRenderer for Recording {
        fn product_type(&self) -> &str {
            "RECORD"
        }

        async fn render(
            &self,
            _ds: &Dataset,
            ctx: &ProductContext,
        ) -> radflow_types::Result<Option<PathBuf>> {
            self.calls.lock().unwrap().push(ctx.product.clone());
            Ok(None)
        }
    }

    struct Failing;

    #[async_trait]
    impl ProductRenderer for Failing {
        fn product_type(&self) -> &str {
            "FAIL"
        }

        async fn render(
            &self,
            _ds: &Dataset,
            _ctx: &ProductContext,
        ) -> radflow_types::Result<Option<PathBuf>> {
            Err(FlowError::Other("disk full".into()))
        }
    }

    #[tokio::test]
    async fn failures_do_not_stop_siblings() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut renderers = RendererRegistry::new();
        renderers.register(Recording {
            calls: Arc::clone(&calls),
        });
        renderers.register(Failing);

        let stage = StageDescriptor::new("echo", 0, "RAW")
            .with_product(ProductDescriptor::new("first", "RECORD"))
            .with_product(ProductDescriptor::new("unknown", "PPI_IMAGE"))
            .with_product(ProductDescriptor::new("broken", "FAIL"))
            .with_product(
                ProductDescriptor::new("missing", "RECORD").with_param("voltype", json!("RR")),
            )
            .with_product(ProductDescriptor::new("last", "RECORD"));
        let config = RunConfig::new("demo").with_stage(stage.clone());
        let events = EventEmitter::new(64);
        let mut rx = events.subscribe();

        let dispatcher = ProductDispatcher::new(&config, &renderers, &events);
        let ds = Dataset::new().with_field("dBZ", json!(1));
        let summary = dispatcher.dispatch(&stage, "VOL", &ds, None).await;

        assert_eq!(*calls.lock().unwrap(), vec!["first", "last"]);
        assert_eq!(summary.rendered.len(), 2);
        let skipped: Vec<_> = summary.skipped.iter().map(|s| s.product.as_str()).collect();
        assert_eq!(skipped, vec!["unknown", "broken", "missing"]);
        assert!(matches!(summary.skipped[0].error, FlowError::UnsupportedProductType { .. }));
        assert!(matches!(summary.skipped[1].error, FlowError::RendererFailed { .. }));
        assert!(matches!(summary.skipped[2].error, FlowError::MissingField { .. }));

        let mut skipped_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, PipelineEvent::ProductSkipped { .. }) {
                skipped_events += 1;
            }
        }
        assert_eq!(skipped_events, 3);
    }

    #[tokio::test]
    async fn product_type_must_support_format() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut renderers = RendererRegistry::new();
        renderers.register(Recording {
            calls: Arc::clone(&calls),
        });
        let stage = StageDescriptor::new("avg", 1, "TIME_AVG")
            .with_product(ProductDescriptor::new("rec", "RECORD"));
        let config = RunConfig::new("demo");
        let events = EventEmitter::default();

        let summary = ProductDispatcher::new(&config, &renderers, &events)
            .dispatch(&stage, "TIMESERIES", &Dataset::new(), None)
            .await;
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(summary.skipped.len(), 1);
    }
}
