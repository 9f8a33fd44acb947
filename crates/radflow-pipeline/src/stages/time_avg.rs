//! Element-wise time average over all processed volumes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use radflow_types::{Dataset, FlowError, ProcStatus, Result, Volume};

use crate::context::StageContext;
use crate::transform::StageTransform;

pub const TIMESERIES_FORMAT: &str = "TIMESERIES";

/// Running sums of one field. Scalars are stored as a one-element series.
#[derive(Debug)]
struct FieldSum {
    scalar: bool,
    sum: Vec<f64>,
    count: Vec<u64>,
}

impl FieldSum {
    fn new(scalar: bool, len: usize) -> Self {
        Self {
            scalar,
            sum: vec![0.0; len],
            count: vec![0; len],
        }
    }

    fn mean(&self) -> Value {
        let values: Vec<Value> = self
            .sum
            .iter()
            .zip(&self.count)
            .map(|(s, n)| {
                if *n == 0 {
                    Value::Null
                } else {
                    serde_json::json!(s / *n as f64)
                }
            })
            .collect();
        if self.scalar {
            values.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(values)
        }
    }
}

#[derive(Debug, Default)]
struct TimeAvgState {
    fields: BTreeMap<String, FieldSum>,
    nvolumes: u64,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

/// Flatten a number or an array of numbers. `null` elements become `None`.
fn samples(value: &Value) -> Option<(bool, Vec<Option<f64>>)> {
    match value {
        Value::Number(n) => Some((true, vec![n.as_f64()])),
        Value::Null => Some((true, vec![None])),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::Null => Some(None),
                other => other.as_f64().map(Some),
            })
            .collect::<Option<Vec<_>>>()
            .map(|v| (false, v)),
        _ => None,
    }
}

impl TimeAvgState {
    fn add(&mut self, stage: &str, field: &str, value: &Value) -> Result<()> {
        let failed = |message: String| FlowError::TransformFailed {
            stage: stage.to_string(),
            status: ProcStatus::Process,
            message,
        };
        let (scalar, values) =
            samples(value).ok_or_else(|| failed(format!("field '{field}' is not numeric")))?;

        let acc = self
            .fields
            .entry(field.to_string())
            .or_insert_with(|| FieldSum::new(scalar, values.len()));
        if acc.scalar != scalar || acc.sum.len() != values.len() {
            return Err(failed(format!(
                "field '{field}' changed shape: expected {} values, got {}",
                acc.sum.len(),
                values.len()
            )));
        }
        for (i, v) in values.into_iter().enumerate() {
            if let Some(v) = v {
                acc.sum[i] += v;
                acc.count[i] += 1;
            }
        }
        Ok(())
    }
}

pub struct TimeAvgStage;

#[async_trait]
impl StageTransform for TimeAvgStage {
    fn stage_type(&self) -> &str {
        "TIME_AVG"
    }

    fn format(&self) -> &str {
        TIMESERIES_FORMAT
    }

    async fn transform(
        &self,
        status: ProcStatus,
        ctx: &mut StageContext,
        volume: Option<&Volume>,
    ) -> Result<Option<Dataset>> {
        match status {
            ProcStatus::Init => {
                ctx.state.initialized = true;
                ctx.state.accumulator_or_default::<TimeAvgState>();
                Ok(None)
            }
            ProcStatus::Process => {
                let Some(volume) = volume else {
                    return Ok(None);
                };
                let fields: Vec<String> = ctx.field_names().map(str::to_string).collect();
                let stage = ctx.name.clone();
                let state = ctx.state.accumulator_or_default::<TimeAvgState>();

                // Validate every field before touching the sums.
                let mut staged = TimeAvgState::default();
                for field in &fields {
                    let value = volume.field(field).ok_or_else(|| FlowError::MissingField {
                        stage: stage.clone(),
                        field: field.clone(),
                    })?;
                    if let Some(existing) = state.fields.get(field) {
                        staged.fields.insert(
                            field.clone(),
                            FieldSum::new(existing.scalar, existing.sum.len()),
                        );
                    }
                    staged.add(&stage, field, value)?;
                }

                for (field, part) in staged.fields {
                    let acc = state
                        .fields
                        .entry(field)
                        .or_insert_with(|| FieldSum::new(part.scalar, part.sum.len()));
                    for i in 0..part.sum.len() {
                        acc.sum[i] += part.sum[i];
                        acc.count[i] += part.count[i];
                    }
                }
                state.nvolumes += 1;
                state.start.get_or_insert(volume.time);
                state.end = Some(volume.time);
                Ok(None)
            }
            ProcStatus::Finalize => {
                let Some(state) = ctx.state.accumulator_ref::<TimeAvgState>() else {
                    return Ok(None);
                };
                if state.nvolumes == 0 {
                    tracing::warn!(stage = %ctx.name, "No volumes accumulated, nothing to average");
                    return Ok(None);
                }
                let mut dataset = Dataset::new()
                    .with_attr("nvolumes", serde_json::json!(state.nvolumes))
                    .with_attr("start", serde_json::json!(state.start))
                    .with_attr("end", serde_json::json!(state.end));
                for (field, sum) in &state.fields {
                    dataset.fields.insert(field.clone(), sum.mean());
                }
                Ok(Some(dataset))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RunConfig, StageDescriptor};
    use chrono::TimeZone;
    use radflow_descriptor::DataTypeDescriptor;
    use serde_json::json;

    fn ctx() -> StageContext {
        let stage = StageDescriptor::new("avg", 1, "TIME_AVG")
            .with_datatype(DataTypeDescriptor::new("RAINBOW", "dBZ"))
            .with_datatype(DataTypeDescriptor::new("RAINBOW", "RR"));
        StageContext::fresh(&RunConfig::new("test").with_stage(stage.clone()), &stage)
    }

    fn vol(minute: u32, dbz: Value, rr: Value) -> Volume {
        Volume::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, minute, 0).unwrap(), "v")
            .with_field("dBZ", dbz)
            .with_field("RR", rr)
    }

    #[tokio::test]
    async fn averages_arrays_and_scalars() {
        let stage = TimeAvgStage;
        let mut ctx = ctx();
        stage.transform(ProcStatus::Init, &mut ctx, None).await.unwrap();
        assert!(ctx.state.initialized);

        for v in [
            vol(0, json!([10.0, null, 4.0]), json!(1.0)),
            vol(5, json!([20.0, 6.0, 8.0]), json!(3.0)),
        ] {
            let out = stage
                .transform(ProcStatus::Process, &mut ctx, Some(&v))
                .await
                .unwrap();
            assert!(out.is_none());
        }

        let ds = stage
            .transform(ProcStatus::Finalize, &mut ctx, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ds.field("dBZ"), Some(&json!([15.0, 6.0, 6.0])));
        assert_eq!(ds.field("RR"), Some(&json!(2.0)));
        assert_eq!(ds.attrs["nvolumes"], json!(2));
        assert_eq!(ds.attrs["start"], json!("2024-05-01T00:00:00Z"));
        assert_eq!(ds.attrs["end"], json!("2024-05-01T00:05:00Z"));
    }

    #[tokio::test]
    async fn shape_change_fails_without_partial_update() {
        let stage = TimeAvgStage;
        let mut ctx = ctx();
        let first = vol(0, json!([1.0, 1.0]), json!(1.0));
        stage
            .transform(ProcStatus::Process, &mut ctx, Some(&first))
            .await
            .unwrap();

        let bad = vol(5, json!([1.0]), json!(9.0));
        let err = stage
            .transform(ProcStatus::Process, &mut ctx, Some(&bad))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::TransformFailed { .. }));

        let ds = stage
            .transform(ProcStatus::Finalize, &mut ctx, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ds.field("RR"), Some(&json!(1.0)));
        assert_eq!(ds.attrs["nvolumes"], json!(1));
    }

    #[tokio::test]
    async fn finalize_without_volumes_yields_nothing() {
        let stage = TimeAvgStage;
        let mut ctx = ctx();
        stage.transform(ProcStatus::Init, &mut ctx, None).await.unwrap();
        let out = stage
            .transform(ProcStatus::Finalize, &mut ctx, None)
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn non_numeric_field_fails() {
        let stage = TimeAvgStage;
        let mut ctx = ctx();
        let v = vol(0, json!("text"), json!(1.0));
        let err = stage
            .transform(ProcStatus::Process, &mut ctx, Some(&v))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
