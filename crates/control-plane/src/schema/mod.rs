//! Analyzer schema registry.

pub mod registry;

pub use registry::{
    AnalyzerSchema, AnalyzerSchemaRegistry, ConditionTemplate, DetectedField, FieldPathCheck,
    FieldType, SchemaField,
};
