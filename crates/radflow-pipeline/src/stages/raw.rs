use async_trait::async_trait;

use radflow_types::{Dataset, FlowError, ProcStatus, Result, Volume};

use crate::context::StageContext;
use crate::transform::StageTransform;

// ---------------------------------------------------------------------------
// RawStage: passes requested fields of the working volume through
// ---------------------------------------------------------------------------

pub struct RawStage;

#[async_trait]
impl StageTransform for RawStage {
    fn stage_type(&self) -> &str {
        "RAW"
    }

    async fn transform(
        &self,
        status: ProcStatus,
        ctx: &mut StageContext,
        volume: Option<&Volume>,
    ) -> Result<Option<Dataset>> {
        if status != ProcStatus::Process {
            return Ok(None);
        }
        let Some(volume) = volume else {
            return Ok(None);
        };

        let mut dataset = Dataset::new();
        for field in ctx.field_names() {
            let value = volume.field(field).ok_or_else(|| FlowError::MissingField {
                stage: ctx.name.clone(),
                field: field.to_string(),
            })?;
            dataset.fields.insert(field.to_string(), value.clone());
        }

        tracing::debug!(stage = %ctx.name, fields = dataset.fields.len(), "Copied raw fields");
        Ok(Some(dataset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RunConfig, StageDescriptor};
    use chrono::{TimeZone, Utc};
    use radflow_descriptor::DataTypeDescriptor;
    use serde_json::json;

    fn ctx() -> StageContext {
        let stage = StageDescriptor::new("echo", 0, "RAW")
            .with_datatype(DataTypeDescriptor::new("RAINBOW", "dBZ"))
            .with_datatype(DataTypeDescriptor::new("PROC", "echoID"));
        StageContext::fresh(&RunConfig::new("test").with_stage(stage.clone()), &stage)
    }

    fn volume() -> Volume {
        Volume::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(), "v0")
            .with_field("dBZ", json!([1.0, 2.0]))
            .with_field("echoID", json!(3))
            .with_field("ZDR", json!(0.5))
    }

    #[tokio::test]
    async fn process_copies_requested_fields_only() {
        let mut ctx = ctx();
        let vol = volume();
        let ds = RawStage
            .transform(ProcStatus::Process, &mut ctx, Some(&vol))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ds.field("dBZ"), Some(&json!([1.0, 2.0])));
        assert_eq!(ds.field("echoID"), Some(&json!(3)));
        assert!(!ds.has_field("ZDR"));
    }

    #[tokio::test]
    async fn missing_field_is_reported() {
        let mut ctx = ctx();
        let vol = Volume::new(Utc::now(), "v").with_field("dBZ", json!(1));
        let err = RawStage
            .transform(ProcStatus::Process, &mut ctx, Some(&vol))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::MissingField { ref field, .. } if field == "echoID"));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn init_and_finalize_yield_nothing() {
        let mut ctx = ctx();
        for status in [ProcStatus::Init, ProcStatus::Finalize] {
            let out = RawStage.transform(status, &mut ctx, None).await.unwrap();
            assert!(out.is_none());
        }
    }
}
