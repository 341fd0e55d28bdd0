// HL7 JSON Direct Mapping
//
// This module implements the schema-driven transformation that mirrors the message's
// native segment/field/component/subcomponent structure.

use crate::errors::Hl7JsonError;
use crate::model::{HierarchyNode, TransformConfig};
use crate::parser::{HierarchySource, Hl7Message};
use crate::schema::{FieldDescriptor, Schema};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "trace")]
use log::{debug, trace};

/// Property holding the segments grouped under a segment
pub const CHILDREN_KEY: &str = "children";

/// Header property overwritten with the field separator
pub const FIELD_SEPARATOR_KEY: &str = "field_separator";

/// Header property overwritten with the encoding characters
pub const ENCODING_CHARACTERS_KEY: &str = "encoding_characters";

/// Transforms a message hierarchy into a JSON tree keyed by segment and field names
#[derive(Debug, Clone)]
pub struct Hl7JsonTransformer {
    /// Segment layouts
    structure: Arc<Schema>,

    /// Composite data type layouts (components and subcomponents)
    fields: Arc<Schema>,

    config: Arc<TransformConfig>,
}

impl Hl7JsonTransformer {
    pub fn new(structure: Arc<Schema>, fields: Arc<Schema>, config: Arc<TransformConfig>) -> Self {
        Self {
            structure,
            fields,
            config,
        }
    }

    /// Loads both schema documents up front so a bad profile fails before any message
    pub fn from_paths(
        profile: impl AsRef<Path>,
        field_profile: impl AsRef<Path>,
        config: TransformConfig,
    ) -> Result<Self, Hl7JsonError> {
        let structure = Schema::from_path(profile)?;
        let fields = Schema::from_path(field_profile)?;
        Ok(Self::new(
            Arc::new(structure),
            Arc::new(fields),
            Arc::new(config),
        ))
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Parses a raw message with the built-in parser and transforms it
    pub fn transform_message(&self, text: &str) -> Value {
        let hierarchy = self.structure.hierarchy().or_standard();
        let message = Hl7Message::parse(text, &hierarchy, &self.config);
        self.transform(&message)
    }

    /// Transforms a parsed message hierarchy.
    ///
    /// Missing data never fails: absent fields render as `null`.
    pub fn transform<S: HierarchySource + ?Sized>(&self, source: &S) -> Value {
        let root = source.hierarchy();

        #[cfg(feature = "trace")]
        debug!("Transforming message with {} segments", root.segment_count());

        let mut message = Map::new();
        if root.segment_code.is_empty() {
            for segment in &root.children {
                message.insert(
                    segment.segment_code.clone(),
                    Value::Object(self.segment_json(segment)),
                );
            }
        } else {
            message.insert(
                root.segment_code.clone(),
                Value::Object(self.segment_json(root)),
            );
        }

        // The delimiters themselves cannot be recovered by positional splitting
        if let Some(Value::Object(header)) = message.get_mut(&self.config.header_segment) {
            let delimiters = &self.config.delimiters;
            header.insert(
                FIELD_SEPARATOR_KEY.to_string(),
                Value::String(delimiters.field_separator()),
            );
            header.insert(
                ENCODING_CHARACTERS_KEY.to_string(),
                Value::String(delimiters.encoding_characters()),
            );
        }

        Value::Object(message)
    }

    fn segment_json(&self, segment: &HierarchyNode) -> Map<String, Value> {
        let code = segment.segment_code.as_str();

        #[cfg(feature = "trace")]
        trace!("Processing segment {}", code);

        let tokens: Vec<&str> = segment.raw_text.split(self.config.delimiters.field).collect();
        let mut json = Map::new();

        for field in self.structure.lookup(code).unwrap_or_default() {
            let value = self.config.field_value(code, &tokens, field.field_number);
            json.insert(field.key(), self.field_json(code, &tokens, field, value));
        }

        if !segment.children.is_empty() {
            let children = segment
                .children
                .iter()
                .map(|child| {
                    let mut wrapper = Map::new();
                    wrapper.insert(
                        child.segment_code.clone(),
                        Value::Object(self.segment_json(child)),
                    );
                    Value::Object(wrapper)
                })
                .collect();
            json.insert(CHILDREN_KEY.to_string(), Value::Array(children));
        }

        json
    }

    /// Data type used to decode a field: the declared one, or the runtime tag carried
    /// by a sibling field of the same segment
    fn resolve_type<'a>(
        &self,
        code: &str,
        tokens: &[&'a str],
        field: &'a FieldDescriptor,
    ) -> &'a str {
        match self.config.discriminator_for(code, field.field_number) {
            Some(discriminator) => self
                .config
                .field_value(code, tokens, discriminator)
                .map(str::trim)
                .unwrap_or(""),
            None => field.data_type.as_str(),
        }
    }

    fn field_json(
        &self,
        code: &str,
        tokens: &[&str],
        field: &FieldDescriptor,
        value: Option<&str>,
    ) -> Value {
        let repeating = field.cardinality.is_repeating();
        let repetitions: Vec<&str> = value
            .map(|v| v.split(self.config.delimiters.repetition).collect())
            .unwrap_or_default();

        let Some(components) = self.fields.lookup(self.resolve_type(code, tokens, field)) else {
            return primitive_json(&repetitions, repeating);
        };

        if repeating {
            let populated: Vec<Value> = repetitions
                .iter()
                .filter_map(|repetition| self.composite_json(repetition, components))
                .map(Value::Object)
                .collect();
            if populated.is_empty() {
                Value::Null
            } else {
                Value::Array(populated)
            }
        } else {
            // FIXME: a singular slot keeps whatever the last repetition produced,
            // even null; confirm whether the first repetition should win instead
            repetitions
                .last()
                .and_then(|repetition| self.composite_json(repetition, components))
                .map(Value::Object)
                .unwrap_or(Value::Null)
        }
    }

    /// One repetition of a composite field, or `None` when no component has a value
    fn composite_json(
        &self,
        repetition: &str,
        components: &[FieldDescriptor],
    ) -> Option<Map<String, Value>> {
        let parts: Vec<&str> = repetition.split(self.config.delimiters.component).collect();
        let mut json = Map::new();
        let mut populated = false;

        for component in components {
            let value = positional(&parts, component.field_number);
            populated |= value.is_some_and(|v| !v.is_empty());

            let rendered = match self.fields.lookup(&component.data_type) {
                Some(subcomponents) => self.subcomponent_json(value, subcomponents),
                None => string_or_null(value),
            };
            json.insert(component.key(), rendered);
        }

        populated.then_some(json)
    }

    fn subcomponent_json(&self, value: Option<&str>, subcomponents: &[FieldDescriptor]) -> Value {
        let parts: Vec<&str> = value
            .map(|v| v.split(self.config.delimiters.subcomponent).collect())
            .unwrap_or_default();
        let mut json = Map::new();
        let mut populated = false;

        for subcomponent in subcomponents {
            let value = positional(&parts, subcomponent.field_number);
            populated |= value.is_some_and(|v| !v.is_empty());
            json.insert(subcomponent.key(), string_or_null(value));
        }

        if populated {
            Value::Object(json)
        } else {
            Value::Null
        }
    }
}

/// A field with no component layout.
///
/// Repeating slots keep only populated repetitions, in order, the same way
/// composite arrays skip unpopulated ones. Array positions therefore do not
/// track repetition numbers: `1~~2` renders as `["1", "2"]`.
fn primitive_json(repetitions: &[&str], repeating: bool) -> Value {
    if repeating {
        let values: Vec<Value> = repetitions
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| Value::String(r.to_string()))
            .collect();
        if values.is_empty() {
            Value::Null
        } else {
            Value::Array(values)
        }
    } else {
        string_or_null(repetitions.first().copied())
    }
}

/// 1-based positional lookup; out of range is absent
fn positional<'a>(parts: &[&'a str], number: usize) -> Option<&'a str> {
    number
        .checked_sub(1)
        .and_then(|index| parts.get(index))
        .copied()
}

fn string_or_null(value: Option<&str>) -> Value {
    match value {
        Some(v) if !v.is_empty() => Value::String(v.to_string()),
        _ => Value::Null,
    }
}
