// HL7 JSON Core Implementation
//
// This crate provides the core functionality for transforming HL7 v2.x messages into
// JSON, either mirroring the message structure or following a JSON template.

pub mod direct;
pub mod errors;
pub mod model;
pub mod parser;
pub mod path;
pub mod schema;
pub mod template;

use std::sync::Arc;

/// HL7 v2.x message format family handled by the engines
pub const HL7_VERSION_FAMILY: &str = "2.x";

pub use direct::Hl7JsonTransformer;
pub use errors::Hl7JsonError;
pub use model::{Delimiters, DynamicTypeRule, HierarchyNode, TransformConfig};
pub use parser::{HierarchySource, Hl7Message, PathResolver, SegmentHierarchy};
pub use schema::{Cardinality, FieldDescriptor, MaxOccurs, Schema};
pub use template::{RepetitionPolicy, TemplateTransformer};

/// Transforms a raw message into a JSON tree mirroring its segment structure
///
/// Uses the default configuration. `structure` describes segments, `fields` the
/// composite data types.
pub fn transform_message(
    message: &str,
    structure: Arc<Schema>,
    fields: Arc<Schema>,
) -> serde_json::Value {
    Hl7JsonTransformer::new(structure, fields, Arc::new(TransformConfig::default()))
        .transform_message(message)
}

/// Transforms a raw message into the shape of a JSON template
///
/// Uses the default configuration and the built-in parser.
pub fn transform_template(
    message: &str,
    template: serde_json::Value,
    schema: Arc<Schema>,
    policy: &RepetitionPolicy,
) -> Result<serde_json::Value, errors::Hl7JsonError> {
    TemplateTransformer::new(template, schema, Arc::new(TransformConfig::default()))?
        .transform_message(message, policy)
}
