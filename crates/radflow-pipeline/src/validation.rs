//! Advisory validation of a run configuration.
//!
//! [`validate`] runs every built-in lint rule and returns diagnostics;
//! [`validate_or_raise`] fails on the first `Error`-severity issue. Checks that
//! can only be answered by the data on disk (is the timeline empty?) are left
//! to the executor.

use std::collections::HashSet;
use std::fmt;

use radflow_types::{FlowError, Result};

use crate::config::RunConfig;
use crate::plan::unique_datatypes;
use crate::renderer::RendererRegistry;
use crate::timeline::resolve_clock;
use crate::transform::TransformRegistry;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub stage: Option<String>,
    pub product: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

impl Diagnostic {
    fn new(rule: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            severity,
            message: message.into(),
            stage: None,
            product: None,
            fix: None,
        }
    }

    fn stage(mut self, stage: &str) -> Self {
        self.stage = Some(stage.into());
        self
    }

    fn product(mut self, product: &str) -> Self {
        self.product = Some(product.into());
        self
    }

    fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

/// Everything a rule may look at.
pub struct ValidationInput<'a> {
    pub config: &'a RunConfig,
    pub transforms: &'a TransformRegistry,
    pub renderers: &'a RendererRegistry,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, input: &ValidationInput<'_>) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct NoStagesRule;
impl LintRule for NoStagesRule {
    fn name(&self) -> &str { "no_stages" }
    fn apply(&self, input: &ValidationInput<'_>) -> Vec<Diagnostic> {
        if input.config.stages.is_empty() {
            vec![Diagnostic::new(self.name(), Severity::Error, "Run declares no processing stages")
                .fix("List at least one stage in `stages`")]
        } else {
            vec![]
        }
    }
}

struct DuplicateStageRule;
impl LintRule for DuplicateStageRule {
    fn name(&self) -> &str { "duplicate_stage" }
    fn apply(&self, input: &ValidationInput<'_>) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        input
            .config
            .stages
            .iter()
            .filter(|s| !seen.insert(s.name.as_str()))
            .map(|s| {
                Diagnostic::new(
                    self.name(),
                    Severity::Error,
                    format!("Stage '{}' is declared more than once", s.name),
                )
                .stage(&s.name)
            })
            .collect()
    }
}

struct UnknownStageTypeRule;
impl LintRule for UnknownStageTypeRule {
    fn name(&self) -> &str { "unknown_stage_type" }
    fn apply(&self, input: &ValidationInput<'_>) -> Vec<Diagnostic> {
        input
            .config
            .stages
            .iter()
            .filter(|s| !input.transforms.has(&s.stage_type))
            .map(|s| {
                Diagnostic::new(
                    self.name(),
                    Severity::Error,
                    format!("Stage '{}' has unknown type '{}'", s.name, s.stage_type),
                )
                .stage(&s.name)
                .fix(format!("Use one of: {}", input.transforms.stage_types().join(", ")))
            })
            .collect()
    }
}

struct ClockResolvableRule;
impl LintRule for ClockResolvableRule {
    fn name(&self) -> &str { "clock_resolvable" }
    fn apply(&self, input: &ValidationInput<'_>) -> Vec<Diagnostic> {
        let config = input.config;
        if config.stages.is_empty() {
            return vec![];
        }
        let required = unique_datatypes(&config.stages);
        match resolve_clock(&required, config.clock.as_ref(), &config.clock_fallback) {
            Ok(_) => vec![],
            Err(e) => vec![Diagnostic::new(self.name(), Severity::Error, e.to_string())
                .fix("Declare an external datatype on some stage or set `clock`")],
        }
    }
}

struct UnknownProductTypeRule;
impl LintRule for UnknownProductTypeRule {
    fn name(&self) -> &str { "unknown_product_type" }
    fn apply(&self, input: &ValidationInput<'_>) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for stage in &input.config.stages {
            let format = input.transforms.get(&stage.stage_type).map(|t| t.format());
            for product in &stage.products {
                let known = match format {
                    Some(format) => input.renderers.supports(format, &product.product_type),
                    None => input.renderers.knows(&product.product_type),
                };
                if !known {
                    let message = match format {
                        Some(format) => format!(
                            "Product '{}' of stage '{}' has type '{}', unsupported for {} datasets",
                            product.name, stage.name, product.product_type, format
                        ),
                        None => format!(
                            "Product '{}' of stage '{}' has unknown type '{}'",
                            product.name, stage.name, product.product_type
                        ),
                    };
                    diags.push(
                        Diagnostic::new(self.name(), Severity::Warning, message)
                            .stage(&stage.name)
                            .product(&product.name),
                    );
                }
            }
        }
        diags
    }
}

struct SourceStageExistsRule;
impl LintRule for SourceStageExistsRule {
    fn name(&self) -> &str { "source_stage_exists" }
    fn apply(&self, input: &ValidationInput<'_>) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for stage in &input.config.stages {
            for d in &stage.datatypes {
                let Some(source) = &d.source_stage else { continue };
                if input.config.stage(source).is_none() {
                    diags.push(
                        Diagnostic::new(
                            self.name(),
                            Severity::Warning,
                            format!(
                                "Stage '{}' reads '{}' from undeclared stage '{}'",
                                stage.name, d, source
                            ),
                        )
                        .stage(&stage.name),
                    );
                }
            }
        }
        diags
    }
}

struct SourceStageLevelRule;
impl LintRule for SourceStageLevelRule {
    fn name(&self) -> &str { "source_stage_level" }
    fn apply(&self, input: &ValidationInput<'_>) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for stage in &input.config.stages {
            for d in &stage.datatypes {
                let Some(source) = d.source_stage.as_deref().and_then(|s| input.config.stage(s))
                else {
                    continue;
                };
                if source.level >= stage.level {
                    diags.push(
                        Diagnostic::new(
                            self.name(),
                            Severity::Warning,
                            format!(
                                "Stage '{}' (level {}) reads from '{}' at level {}, \
                                 which does not run before it",
                                stage.name, stage.level, source.name, source.level
                            ),
                        )
                        .stage(&stage.name)
                        .fix(format!("Move '{}' to a level above {}", stage.name, source.level)),
                    );
                }
            }
        }
        diags
    }
}

struct EmptyDatatypeRule;
impl LintRule for EmptyDatatypeRule {
    fn name(&self) -> &str { "empty_datatype" }
    fn apply(&self, input: &ValidationInput<'_>) -> Vec<Diagnostic> {
        input
            .config
            .stages
            .iter()
            .filter(|s| s.datatypes.is_empty())
            .map(|s| {
                Diagnostic::new(
                    self.name(),
                    Severity::Info,
                    format!("Stage '{}' declares no input datatypes", s.name),
                )
                .stage(&s.name)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(
    config: &RunConfig,
    transforms: &TransformRegistry,
    renderers: &RendererRegistry,
) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(NoStagesRule),
        Box::new(DuplicateStageRule),
        Box::new(UnknownStageTypeRule),
        Box::new(ClockResolvableRule),
        Box::new(UnknownProductTypeRule),
        Box::new(SourceStageExistsRule),
        Box::new(SourceStageLevelRule),
        Box::new(EmptyDatatypeRule),
    ];

    let input = ValidationInput {
        config,
        transforms,
        renderers,
    };
    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(&input));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(
    config: &RunConfig,
    transforms: &TransformRegistry,
    renderers: &RendererRegistry,
) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(config, transforms, renderers);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(FlowError::Config(errors.join("; ")));
    }
    Ok(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClockFallback, ProductDescriptor, StageDescriptor};
    use crate::renderer::default_renderers;
    use crate::transform::default_transforms;
    use radflow_descriptor::parse_datatype;

    fn run(config: &RunConfig) -> Vec<Diagnostic> {
        validate(config, &default_transforms(), &default_renderers())
    }

    fn has(diags: &[Diagnostic], rule: &str, severity: Severity) -> bool {
        diags.iter().any(|d| d.rule == rule && d.severity == severity)
    }

    fn echo() -> StageDescriptor {
        StageDescriptor::new("echo", 0, "RAW")
            .with_datatype(parse_datatype("RAINBOW:dBZ").unwrap())
            .with_product(ProductDescriptor::new("dump", "SAVE_JSON"))
    }

    #[test]
    fn valid_config_passes() {
        let config = RunConfig::new("ok").with_stage(echo());
        let diags = run(&config);
        assert!(diags.is_empty(), "Expected no diagnostics, got: {diags:?}");
        assert!(validate_or_raise(&config, &default_transforms(), &default_renderers()).is_ok());
    }

    #[test]
    fn empty_config_is_an_error() {
        let diags = run(&RunConfig::new("empty"));
        assert!(has(&diags, "no_stages", Severity::Error));
        assert!(!has(&diags, "clock_resolvable", Severity::Error));
    }

    #[test]
    fn duplicate_and_unknown_type() {
        let config = RunConfig::new("x")
            .with_stage(echo())
            .with_stage(echo())
            .with_stage(
                StageDescriptor::new("kdp", 1, "KDP")
                    .with_datatype(parse_datatype("PROC:PhiDP").unwrap()),
            );
        let diags = run(&config);
        assert!(has(&diags, "duplicate_stage", Severity::Error));
        let unknown = diags.iter().find(|d| d.rule == "unknown_stage_type").unwrap();
        assert_eq!(unknown.stage.as_deref(), Some("kdp"));
        assert!(unknown.fix.as_deref().unwrap().contains("RAW"));
    }

    #[test]
    fn unresolvable_clock_is_an_error() {
        let config = RunConfig::new("x").with_stage(
            StageDescriptor::new("a", 0, "RAW").with_datatype(parse_datatype("PROC:dBZc").unwrap()),
        );
        let err =
            validate_or_raise(&config, &default_transforms(), &default_renderers()).unwrap_err();
        assert!(matches!(err, FlowError::Config(ref m) if m.contains("No clock")));
    }

    #[test]
    fn custom_fallback_makes_clock_resolvable() {
        let mut config = RunConfig::new("x").with_stage(
            StageDescriptor::new("a", 0, "RAW").with_datatype(parse_datatype("NWP:TEMP").unwrap()),
        );
        config.clock_fallback = vec![ClockFallback::new("NWP", "ODIM:TH")];
        assert!(!has(&run(&config), "clock_resolvable", Severity::Error));
    }

    #[test]
    fn unknown_product_type_is_a_warning() {
        let config = RunConfig::new("x").with_stage(
            echo().with_product(ProductDescriptor::new("img", "PPI_IMAGE")),
        );
        let diags = run(&config);
        let d = diags.iter().find(|d| d.rule == "unknown_product_type").unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.product.as_deref(), Some("img"));
        assert!(validate_or_raise(&config, &default_transforms(), &default_renderers()).is_ok());
    }

    #[test]
    fn source_stage_checks() {
        let config = RunConfig::new("x")
            .with_stage(echo())
            .with_stage(
                StageDescriptor::new("same_level", 0, "RAW")
                    .with_datatype(parse_datatype("PROC:dBZ,echo,dump").unwrap()),
            )
            .with_stage(
                StageDescriptor::new("orphan", 1, "RAW")
                    .with_datatype(parse_datatype("PROC:dBZ,ghost,dump").unwrap()),
            );
        let diags = run(&config);
        let level = diags.iter().find(|d| d.rule == "source_stage_level").unwrap();
        assert_eq!(level.stage.as_deref(), Some("same_level"));
        let exists = diags.iter().find(|d| d.rule == "source_stage_exists").unwrap();
        assert_eq!(exists.stage.as_deref(), Some("orphan"));
    }

    #[test]
    fn stage_without_inputs_is_info() {
        let config = RunConfig::new("x")
            .with_stage(echo())
            .with_stage(StageDescriptor::new("avg", 1, "TIME_AVG"));
        assert!(has(&run(&config), "empty_datatype", Severity::Info));
    }
}
