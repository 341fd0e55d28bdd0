// HL7 JSON Template Transformation
//
// This module implements the template-driven transformation: every string leaf of a
// caller-supplied JSON document is a path expression resolved against the message,
// and arrays repeat their element subtree once per message repetition.

use crate::errors::Hl7JsonError;
use crate::model::TransformConfig;
use crate::parser::{Hl7Message, PathResolver};
use crate::path::{PathExpression, PropertyKey};
use crate::schema::Schema;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "trace")]
use log::{debug, trace};

/// How a leaf that resolves to several values is rendered
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RepetitionPolicy {
    /// A JSON array of the values
    #[default]
    EmitArray,

    /// A single string of the values joined by the delimiter
    Join(String),
}

impl RepetitionPolicy {
    /// `Join` for `Some(delimiter)`, `EmitArray` otherwise
    pub fn from_delimiter(delimiter: Option<&str>) -> Self {
        match delimiter {
            Some(d) => RepetitionPolicy::Join(d.to_string()),
            None => RepetitionPolicy::EmitArray,
        }
    }

    fn render(&self, values: Vec<String>) -> Value {
        match values.len() {
            0 => Value::Null,
            1 => values.into_iter().next().map(Value::String).unwrap_or(Value::Null),
            _ => match self {
                RepetitionPolicy::EmitArray => {
                    Value::Array(values.into_iter().map(Value::String).collect())
                }
                RepetitionPolicy::Join(delimiter) => Value::String(values.join(delimiter)),
            },
        }
    }
}

/// Transforms messages into the shape of a JSON template
#[derive(Debug, Clone)]
pub struct TemplateTransformer {
    template: Map<String, Value>,

    /// Profile used by the built-in parser for segment grouping
    schema: Arc<Schema>,

    config: Arc<TransformConfig>,
}

impl TemplateTransformer {
    /// Creates a transformer for a template whose root is a JSON object
    pub fn new(
        template: Value,
        schema: Arc<Schema>,
        config: Arc<TransformConfig>,
    ) -> Result<Self, Hl7JsonError> {
        match template {
            Value::Object(template) => Ok(Self {
                template,
                schema,
                config,
            }),
            other => Err(Hl7JsonError::InvalidTemplate(format!(
                "Template root must be a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn from_json_str(
        template: &str,
        schema: Arc<Schema>,
        config: Arc<TransformConfig>,
    ) -> Result<Self, Hl7JsonError> {
        let template: Value = serde_json::from_str(template)
            .map_err(|e| Hl7JsonError::TemplateLoad(format!("Invalid template document: {}", e)))?;
        Self::new(template, schema, config)
    }

    /// Loads the template and profile documents up front
    pub fn from_paths(
        template: impl AsRef<Path>,
        profile: impl AsRef<Path>,
        config: TransformConfig,
    ) -> Result<Self, Hl7JsonError> {
        let template = template.as_ref();
        let content = fs::read_to_string(template).map_err(|e| {
            Hl7JsonError::TemplateLoad(format!("Failed to read {}: {}", template.display(), e))
        })?;
        let schema = Schema::from_path(profile)?;
        Self::from_json_str(&content, Arc::new(schema), Arc::new(config))
    }

    pub fn template(&self) -> &Map<String, Value> {
        &self.template
    }

    /// Parses a raw message with the built-in parser and transforms it
    pub fn transform_message(
        &self,
        text: &str,
        policy: &RepetitionPolicy,
    ) -> Result<Value, Hl7JsonError> {
        let hierarchy = self.schema.hierarchy().or_standard();
        let message = Hl7Message::parse(text, &hierarchy, &self.config);
        self.transform(&message, policy)
    }

    /// Same as `transform_message`, serialized to JSON text
    pub fn transform_to_string(
        &self,
        text: &str,
        policy: &RepetitionPolicy,
    ) -> Result<String, Hl7JsonError> {
        let value = self.transform_message(text, policy)?;
        Ok(serde_json::to_string(&value)?)
    }

    /// Resolves every template leaf through `resolver`.
    ///
    /// Fails only for an array nested directly inside an array element.
    pub fn transform(
        &self,
        resolver: &dyn PathResolver,
        policy: &RepetitionPolicy,
    ) -> Result<Value, Hl7JsonError> {
        #[cfg(feature = "trace")]
        debug!(
            "Transforming template with {} top-level properties",
            self.template.len()
        );

        let walker = Walker { resolver, policy };
        let mut path = Vec::new();
        let output = walker.object(&self.template, &mut path)?;
        Ok(Value::Object(output))
    }
}

/// A template leaf inside an array element, resolved for every repetition at once
struct ArrayLeaf {
    /// Keys from the element root down to the leaf
    keys: Vec<PropertyKey>,
    source: LeafSource,
}

enum LeafSource {
    Resolved {
        expression: PathExpression,
        repetitions: Vec<Vec<String>>,
    },
    Constant(Value),
}

struct Walker<'a> {
    resolver: &'a dyn PathResolver,
    policy: &'a RepetitionPolicy,
}

impl Walker<'_> {
    fn object(
        &self,
        template: &Map<String, Value>,
        path: &mut Vec<String>,
    ) -> Result<Map<String, Value>, Hl7JsonError> {
        let mut output = Map::new();

        for (key, node) in template {
            path.push(key.clone());

            let name = match PropertyKey::parse(key) {
                PropertyKey::Literal(name) => Some(name),
                PropertyKey::Dynamic(expression) => self.first_value(&expression),
            };

            let value = match node {
                Value::Object(inner) => Value::Object(self.object(inner, path)?),
                Value::Array(items) => Value::Array(self.array(items, path)?),
                Value::String(expression) => self.leaf(expression),
                other => other.clone(),
            };

            // A dynamic key that resolves to nothing leaves no property behind
            if let Some(name) = name {
                output.insert(name, value);
            }

            path.pop();
        }

        Ok(output)
    }

    fn leaf(&self, expression: &str) -> Value {
        let expression = PathExpression::parse(expression);
        let values = self.values(&expression);

        #[cfg(feature = "trace")]
        trace!("Resolved {:?} to {:?}", expression, values);

        self.policy.render(values)
    }

    fn first_value(&self, expression: &PathExpression) -> Option<String> {
        self.values(expression).into_iter().next()
    }

    /// Resolved values flattened across repetitions, with the selector applied
    fn values(&self, expression: &PathExpression) -> Vec<String> {
        let values: Vec<String> = self
            .resolver
            .resolve(&expression.base)
            .map(|repetitions| repetitions.into_iter().flatten().collect())
            .unwrap_or_default();
        expression.select(values)
    }

    /// Expands an array template into one element per message repetition
    fn array(&self, items: &[Value], path: &mut Vec<String>) -> Result<Vec<Value>, Hl7JsonError> {
        let mut leaves = Vec::new();

        for (index, item) in items.iter().enumerate() {
            path.push(index.to_string());
            match item {
                Value::Object(map) => self.collect_leaves(map, &mut Vec::new(), path, &mut leaves)?,
                Value::Array(_) => {
                    return Err(Hl7JsonError::UnsupportedTemplate {
                        path: json_pointer(path),
                    })
                }
                other => leaves.push(self.array_leaf(Vec::new(), other)),
            }
            path.pop();
        }

        let count = leaves
            .iter()
            .map(|leaf| match &leaf.source {
                LeafSource::Resolved { repetitions, .. } => repetitions.len(),
                LeafSource::Constant(_) => 0,
            })
            .max()
            .unwrap_or(0);

        #[cfg(feature = "trace")]
        debug!(
            "Array at {} expands to {} elements from {} leaves",
            json_pointer(path),
            count,
            leaves.len()
        );

        Ok((0..count)
            .map(|index| self.array_element(&leaves, index))
            .collect())
    }

    fn collect_leaves(
        &self,
        template: &Map<String, Value>,
        keys: &mut Vec<PropertyKey>,
        path: &mut Vec<String>,
        leaves: &mut Vec<ArrayLeaf>,
    ) -> Result<(), Hl7JsonError> {
        for (key, node) in template {
            path.push(key.clone());
            keys.push(PropertyKey::parse(key));

            match node {
                Value::Object(inner) => self.collect_leaves(inner, keys, path, leaves)?,
                Value::Array(_) => {
                    return Err(Hl7JsonError::UnsupportedTemplate {
                        path: json_pointer(path),
                    })
                }
                other => leaves.push(self.array_leaf(keys.clone(), other)),
            }

            keys.pop();
            path.pop();
        }
        Ok(())
    }

    fn array_leaf(&self, keys: Vec<PropertyKey>, node: &Value) -> ArrayLeaf {
        let source = match node {
            Value::String(expression) => {
                let expression = PathExpression::parse(expression);
                let repetitions = self.resolver.resolve(&expression.base).unwrap_or_default();
                LeafSource::Resolved {
                    expression,
                    repetitions,
                }
            }
            other => LeafSource::Constant(other.clone()),
        };
        ArrayLeaf { keys, source }
    }

    /// Builds the element for one repetition (0-based `index`) by merging a skeleton
    /// per leaf
    fn array_element(&self, leaves: &[ArrayLeaf], index: usize) -> Value {
        let mut element = Map::new();
        let mut bare = None;

        for leaf in leaves {
            let value = match &leaf.source {
                LeafSource::Resolved {
                    expression,
                    repetitions,
                } => match repetitions.get(index) {
                    Some(values) => self.policy.render(expression.select(values.clone())),
                    None => Value::Null,
                },
                LeafSource::Constant(value) => value.clone(),
            };

            let keys: Option<Vec<String>> = leaf
                .keys
                .iter()
                .map(|key| match key {
                    PropertyKey::Literal(name) => Some(name.clone()),
                    PropertyKey::Dynamic(expression) => {
                        self.first_value(&expression.bind_repetition(index + 1))
                    }
                })
                .collect();

            match keys {
                Some(keys) if keys.is_empty() => bare = Some(value),
                Some(keys) => graft(&mut element, skeleton(&keys, value)),
                None => {}
            }
        }

        match bare {
            Some(value) if element.is_empty() => value,
            _ => Value::Object(element),
        }
    }
}

/// A minimal nested object holding `leaf` under `keys`
pub fn skeleton(keys: &[String], leaf: Value) -> Map<String, Value> {
    let mut node = leaf;
    for key in keys.iter().rev() {
        let mut wrapper = Map::new();
        wrapper.insert(key.clone(), node);
        node = Value::Object(wrapper);
    }
    match node {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Merges `branch` into `target`: descends while both sides hold an object under the
/// same key, then grafts the rest of `branch` at the point of divergence
pub fn graft(target: &mut Map<String, Value>, branch: Map<String, Value>) {
    for (key, value) in branch {
        let value = match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                graft(existing, nested);
                continue;
            }
            (_, value) => value,
        };
        target.insert(key, value);
    }
}

/// RFC 6901 pointer for a structural path
fn json_pointer(path: &[String]) -> String {
    path.iter()
        .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_skeleton() {
        assert_eq!(
            Value::Object(skeleton(&keys(&["a", "b"]), json!("x"))),
            json!({"a": {"b": "x"}})
        );
        assert!(skeleton(&[], json!("x")).is_empty());
    }

    #[test]
    fn test_graft_at_divergence() {
        let mut target = skeleton(&keys(&["a", "b", "c"]), json!(1));
        graft(&mut target, skeleton(&keys(&["a", "b", "d"]), json!(2)));
        graft(&mut target, skeleton(&keys(&["a", "e"]), json!(3)));
        graft(&mut target, skeleton(&keys(&["f"]), json!(4)));

        assert_eq!(
            Value::Object(target),
            json!({"a": {"b": {"c": 1, "d": 2}, "e": 3}, "f": 4})
        );
    }

    #[test]
    fn test_policy_render() {
        let values = vec!["1".to_string(), "2".to_string()];
        assert_eq!(RepetitionPolicy::EmitArray.render(values.clone()), json!(["1", "2"]));
        assert_eq!(
            RepetitionPolicy::Join(", ".into()).render(values),
            json!("1, 2")
        );
        assert_eq!(RepetitionPolicy::EmitArray.render(vec![]), Value::Null);
        assert_eq!(
            RepetitionPolicy::Join("|".into()).render(vec!["x".into()]),
            json!("x")
        );
    }

    #[test]
    fn test_json_pointer() {
        let path = vec!["a/b".to_string(), "0".to_string(), "c~d".to_string()];
        assert_eq!(json_pointer(&path), "/a~1b/0/c~0d");
    }
}
