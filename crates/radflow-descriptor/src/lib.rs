//! Parser for the compact descriptors used in radflow run configurations.
//!
//! Two descriptor families are supported:
//! - stage declarations, `l2:echoFilter` → [`StageRef`] `{ level: 2, name: "echoFilter" }`
//! - input data types, `RAINBOW:dBZ` or `PROC:dBZc,echoFilter,dbz` → [`DataTypeDescriptor`]
//!
//! # Example
//! ```
//! let d = radflow_descriptor::parse_datatype("PROC:dBZc,echo,save").unwrap();
//! assert_eq!(d.category, "PROC");
//! assert_eq!(d.source_stage.as_deref(), Some("echo"));
//! ```

pub mod descriptor;
mod parser;

pub use descriptor::*;
pub use parser::{parse_datatype, parse_stage_entry, parse_stage_ref};

#[cfg(test)]
mod tests {
    use super::*;
    use radflow_types::FlowError;

    fn assert_malformed<T: std::fmt::Debug>(result: radflow_types::Result<T>) -> String {
        match result {
            Err(FlowError::MalformedDescriptor { message, .. }) => message,
            other => panic!("expected MalformedDescriptor, got {other:?}"),
        }
    }

    #[test]
    fn parse_level_stage() {
        let s = parse_stage_ref("l2:myStage").unwrap();
        assert_eq!(s.level, 2);
        assert_eq!(s.name, "myStage");
        assert_eq!(s.to_string(), "l2:myStage");
    }

    #[test]
    fn parse_level_stage_multi_digit_and_whitespace() {
        let s = parse_stage_ref("  l12:hydro_class ").unwrap();
        assert_eq!(s.level, 12);
        assert_eq!(s.name, "hydro_class");
    }

    #[test]
    fn stage_ref_from_str() {
        let s: StageRef = "L0:raw".parse().unwrap();
        assert_eq!(s, StageRef { level: 0, name: "raw".into() });
    }

    #[test]
    fn stage_ref_missing_colon_is_malformed() {
        let msg = assert_malformed(parse_stage_ref("l2myStage"));
        assert!(msg.contains("':' after level"), "got: {msg}");
    }

    #[test]
    fn stage_ref_missing_level_number_is_malformed() {
        let msg = assert_malformed(parse_stage_ref("l:stage"));
        assert!(msg.contains("level number"), "got: {msg}");
    }

    #[test]
    fn stage_ref_empty_name_is_malformed() {
        assert_malformed(parse_stage_ref("l1:"));
    }

    #[test]
    fn stage_ref_without_prefix_is_malformed() {
        assert_malformed(parse_stage_ref("myStage"));
        assert_malformed(parse_stage_ref("x1:myStage"));
    }

    #[test]
    fn stage_ref_trailing_input_is_malformed() {
        let msg = assert_malformed(parse_stage_ref("l1:a:b"));
        assert!(msg.contains("trailing input"), "got: {msg}");
    }

    #[test]
    fn stage_entry_bare_name_is_level_zero() {
        let s = parse_stage_entry("echo").unwrap();
        assert_eq!(s.level, 0);
        assert_eq!(s.name, "echo");
    }

    #[test]
    fn stage_entry_with_colon_must_be_well_formed() {
        assert_eq!(parse_stage_entry("l3:avg").unwrap().level, 3);
        assert_malformed(parse_stage_entry("lx:avg"));
        assert_malformed(parse_stage_entry("two words"));
    }

    #[test]
    fn parse_simple_datatype() {
        let d = parse_datatype("CATA:fieldX").unwrap();
        assert_eq!(d.category, "CATA");
        assert_eq!(d.field, "fieldX");
        assert!(d.source_stage.is_none());
        assert!(d.source_product.is_none());
        assert!(!d.is_internal());
        assert_eq!(d.to_string(), "CATA:fieldX");
    }

    #[test]
    fn parse_datatype_with_source() {
        let d = parse_datatype("PROC:dBZc,echoFilter,saveVol").unwrap();
        assert_eq!(d.category, "PROC");
        assert_eq!(d.field, "dBZc");
        assert_eq!(d.source_stage.as_deref(), Some("echoFilter"));
        assert_eq!(d.source_product.as_deref(), Some("saveVol"));
        assert!(d.is_internal());
        assert_eq!(d.to_string(), "PROC:dBZc,echoFilter,saveVol");
    }

    #[test]
    fn datatype_with_partial_source_is_malformed() {
        let msg = assert_malformed(parse_datatype("PROC:dBZc,echoFilter"));
        assert!(msg.contains("source product"), "got: {msg}");
    }

    #[test]
    fn datatype_without_delimiter_is_malformed() {
        assert_malformed(parse_datatype("RAINBOWdBZ"));
        assert_malformed(parse_datatype("RAINBOW:"));
        assert_malformed(parse_datatype(":dBZ"));
    }

    #[test]
    fn datatype_key_ignores_source() {
        let a = parse_datatype("PROC:dBZc,a,b").unwrap();
        let b = parse_datatype("PROC:dBZc").unwrap();
        assert_eq!(a.key(), b.key());
        assert_ne!(a, b);
    }

    #[test]
    fn datatype_from_str() {
        let d: DataTypeDescriptor = "RAD4ALP:ZDR".parse().unwrap();
        assert_eq!(d, DataTypeDescriptor::new("RAD4ALP", "ZDR"));
    }
}
