// HL7 JSON Schema
//
// This module implements the positional schema (profile) shared by both engines.
// The same lookup describes segment layouts, composite data types (components)
// and component data types (subcomponents).

use crate::errors::Hl7JsonError;
use crate::parser::SegmentHierarchy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Upper bound of a cardinality declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxOccurs {
    /// `[0..n]`
    Exactly(u32),

    /// `[0..*]`
    Unbounded,

    /// Anything that could not be read
    Unknown,
}

/// A parsed `"[min..max]"` cardinality string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Cardinality {
    pub min: Option<u32>,
    pub max: MaxOccurs,
    raw: String,
}

impl Cardinality {
    /// Parses a cardinality string. Malformed input yields `MaxOccurs::Unknown`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (min, max) = match trimmed.split_once("..") {
            Some((lower, upper)) => {
                let min = lower.trim_start_matches('[').trim().parse().ok();
                let max = match upper.strip_suffix(']').map(str::trim) {
                    Some("*") => MaxOccurs::Unbounded,
                    Some(other) => other
                        .parse()
                        .map(MaxOccurs::Exactly)
                        .unwrap_or(MaxOccurs::Unknown),
                    // Unterminated or trailing garbage
                    None => MaxOccurs::Unknown,
                };
                (min, max)
            }
            None => (None, MaxOccurs::Unknown),
        };

        Self {
            min,
            max,
            raw: raw.to_string(),
        }
    }

    /// Whether a slot with this cardinality holds an array.
    ///
    /// Unknown bounds render as a single value.
    pub fn is_repeating(&self) -> bool {
        match self.max {
            MaxOccurs::Unbounded => true,
            MaxOccurs::Exactly(n) => n > 1,
            MaxOccurs::Unknown => false,
        }
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::parse("")
    }
}

impl From<String> for Cardinality {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<Cardinality> for String {
    fn from(cardinality: Cardinality) -> Self {
        cardinality.raw
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One positional entry of a segment or data type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub field_number: usize,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl FieldDescriptor {
    /// The JSON property name for this entry
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Normalizes a schema name into a JSON property name.
///
/// `"Namespace ID"` becomes `namespace_id`.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            if pending_separator && !normalized.is_empty() {
                normalized.push('_');
            }
            pending_separator = false;
            normalized.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    normalized
}

/// Accepted layouts of a schema document
#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaDocument {
    Profile {
        #[serde(rename = "segmentFields")]
        segment_fields: HashMap<String, Vec<FieldDescriptor>>,
        #[serde(rename = "segmentHierarchy", default)]
        segment_hierarchy: HashMap<String, Vec<String>>,
    },
    Bare(HashMap<String, Vec<FieldDescriptor>>),
}

/// Lookup from a type identifier to its ordered field descriptors
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<String, Vec<FieldDescriptor>>,
    hierarchy: SegmentHierarchy,
}

impl Schema {
    /// Builds a schema from descriptor lists, sorting each by field number
    pub fn new(types: HashMap<String, Vec<FieldDescriptor>>) -> Self {
        Self::with_hierarchy(types, SegmentHierarchy::default())
    }

    pub fn with_hierarchy(
        mut types: HashMap<String, Vec<FieldDescriptor>>,
        hierarchy: SegmentHierarchy,
    ) -> Self {
        for fields in types.values_mut() {
            fields.sort_by_key(|field| field.field_number);
        }
        Self { types, hierarchy }
    }

    /// Parses a schema document
    pub fn from_json_str(content: &str) -> Result<Self, Hl7JsonError> {
        let document: SchemaDocument = serde_json::from_str(content)
            .map_err(|e| Hl7JsonError::SchemaLoad(format!("Invalid schema document: {}", e)))?;
        Ok(Self::from_document(document))
    }

    /// Parses a schema document from a reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, Hl7JsonError> {
        let document: SchemaDocument = serde_json::from_reader(reader)
            .map_err(|e| Hl7JsonError::SchemaLoad(format!("Invalid schema document: {}", e)))?;
        Ok(Self::from_document(document))
    }

    /// Loads a schema document from a file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Hl7JsonError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Hl7JsonError::SchemaLoad(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    fn from_document(document: SchemaDocument) -> Self {
        match document {
            SchemaDocument::Profile {
                segment_fields,
                segment_hierarchy,
            } => Self::with_hierarchy(segment_fields, SegmentHierarchy::new(segment_hierarchy)),
            SchemaDocument::Bare(types) => Self::new(types),
        }
    }

    /// Field descriptors for a type, or `None` for a primitive leaf
    pub fn lookup(&self, type_id: &str) -> Option<&[FieldDescriptor]> {
        self.types
            .get(type_id)
            .map(Vec::as_slice)
            .filter(|fields| !fields.is_empty())
    }

    /// Segment grouping rules carried by the document
    pub fn hierarchy(&self) -> &SegmentHierarchy {
        &self.hierarchy
    }

    /// Known type identifiers
    pub fn type_ids(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
