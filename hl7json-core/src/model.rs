// HL7 JSON Data Model
//
// This module defines the message hierarchy and the transformation configuration
// shared by both engines.

use serde::{Deserialize, Serialize};

/// Code of the message-header segment
pub const HEADER_SEGMENT: &str = "MSH";

/// The delimiter characters of an HL7 v2.x message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    /// Separates fields within a segment
    pub field: char,

    /// Separates components within a field
    pub component: char,

    /// Separates repetitions of a field
    pub repetition: char,

    /// Escape character (carried, never interpreted)
    pub escape: char,

    /// Separates subcomponents within a component
    pub subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Delimiters {
    /// Reads the delimiters declared by a raw header segment (`MSH|^~\&|...`).
    ///
    /// Characters missing from the header keep their default value. Returns `None`
    /// when the text is not a header segment.
    pub fn from_header(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(HEADER_SEGMENT)?;
        let mut chars = rest.chars();
        let field = chars.next()?;
        let defaults = Self::default();
        let encoding: Vec<char> = chars.take_while(|c| *c != field).collect();

        Some(Self {
            field,
            component: encoding.first().copied().unwrap_or(defaults.component),
            repetition: encoding.get(1).copied().unwrap_or(defaults.repetition),
            escape: encoding.get(2).copied().unwrap_or(defaults.escape),
            subcomponent: encoding.get(3).copied().unwrap_or(defaults.subcomponent),
        })
    }

    /// Field separator as written in the header (`MSH-1`)
    pub fn field_separator(&self) -> String {
        self.field.to_string()
    }

    /// Encoding characters as written in the header (`MSH-2`)
    pub fn encoding_characters(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .collect()
    }
}

/// A field whose decoding type is carried at runtime by a sibling field.
///
/// `OBX-5` is decoded with the data type named in `OBX-2` of the same segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicTypeRule {
    pub segment: String,
    pub field: usize,
    pub discriminator: usize,
}

impl DynamicTypeRule {
    pub fn new(segment: impl Into<String>, field: usize, discriminator: usize) -> Self {
        Self {
            segment: segment.into(),
            field,
            discriminator,
        }
    }
}

/// Immutable configuration shared by both engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub delimiters: Delimiters,

    /// Segment whose fields are numbered one position off (its own field
    /// separator occupies position 1)
    pub header_segment: String,

    pub dynamic_types: Vec<DynamicTypeRule>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            delimiters: Delimiters::default(),
            header_segment: HEADER_SEGMENT.to_string(),
            dynamic_types: vec![DynamicTypeRule::new("OBX", 5, 2)],
        }
    }
}

impl TransformConfig {
    /// Offset between a field number and its position in the split segment text
    pub fn index_skew(&self, segment_code: &str) -> usize {
        if segment_code == self.header_segment {
            1
        } else {
            0
        }
    }

    /// The discriminator field for `segment_code`-`field_number`, if any
    pub fn discriminator_for(&self, segment_code: &str, field_number: usize) -> Option<usize> {
        self.dynamic_types
            .iter()
            .find(|rule| rule.segment == segment_code && rule.field == field_number)
            .map(|rule| rule.discriminator)
    }

    /// Value at `field_number` of a split segment, honoring the header skew
    pub fn field_value<'a>(
        &self,
        segment_code: &str,
        tokens: &[&'a str],
        field_number: usize,
    ) -> Option<&'a str> {
        // Position 0 holds the segment code, never field data
        if field_number == 0 {
            return None;
        }
        field_number
            .checked_sub(self.index_skew(segment_code))
            .and_then(|position| tokens.get(position))
            .copied()
    }
}

/// A segment and the segments grouped under it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Three-character segment code (empty for the message root)
    pub segment_code: String,

    /// The unsplit segment line
    pub raw_text: String,

    #[serde(default)]
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    /// Creates a node for a raw segment line
    pub fn new(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let segment_code = raw_text.chars().take(3).collect();
        Self {
            segment_code,
            raw_text,
            children: Vec::new(),
        }
    }

    /// Creates an empty message root
    pub fn root() -> Self {
        Self {
            segment_code: String::new(),
            raw_text: String::new(),
            children: Vec::new(),
        }
    }

    /// Number of segments in this subtree, excluding a message root
    pub fn segment_count(&self) -> usize {
        let own = usize::from(!self.segment_code.is_empty());
        own + self
            .children
            .iter()
            .map(HierarchyNode::segment_count)
            .sum::<usize>()
    }
}
