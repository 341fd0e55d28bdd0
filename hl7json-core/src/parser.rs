// HL7 JSON Message Parser
//
// This module implements the built-in message collaborator: splitting a raw message
// into its segment hierarchy and resolving locator paths against it. Both engines
// only see it through the `HierarchySource` and `PathResolver` traits, so any
// other parser can be plugged in.

use crate::errors::Hl7JsonError;
use crate::model::{Delimiters, HierarchyNode, TransformConfig};
use crate::path::{FieldLocator, Occurrence, SegmentLocator};
use std::collections::HashMap;

#[cfg(feature = "trace")]
use log::{debug, trace};

/// Anything that can hand out a parsed segment hierarchy
pub trait HierarchySource {
    fn hierarchy(&self) -> &HierarchyNode;
}

impl HierarchySource for HierarchyNode {
    fn hierarchy(&self) -> &HierarchyNode {
        self
    }
}

/// Resolves a path expression against a message.
///
/// The outer list holds one entry per matched repetition (segment occurrence), the
/// inner list the values that occurrence carries. `None` means nothing matched.
pub trait PathResolver {
    fn resolve(&self, path: &str) -> Option<Vec<Vec<String>>>;
}

/// Fixed answers keyed by path, handy for driving the template engine directly
impl PathResolver for HashMap<String, Vec<Vec<String>>> {
    fn resolve(&self, path: &str) -> Option<Vec<Vec<String>>> {
        self.get(path).cloned()
    }
}

/// Parent to allowed-children grouping rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentHierarchy {
    rules: HashMap<String, Vec<String>>,
}

impl SegmentHierarchy {
    pub fn new(rules: HashMap<String, Vec<String>>) -> Self {
        Self { rules }
    }

    /// Grouping used for common result and order messages
    pub fn standard() -> Self {
        let rules = [
            ("PID", &["PD1", "NK1", "PV1", "PV2", "ORC", "OBR"][..]),
            ("ORC", &["OBR"][..]),
            ("OBR", &["OBX", "NTE", "SPM"][..]),
            ("OBX", &["NTE"][..]),
            ("SPM", &["OBX"][..]),
        ]
        .into_iter()
        .map(|(parent, children)| {
            (
                parent.to_string(),
                children.iter().map(|c| c.to_string()).collect(),
            )
        })
        .collect();

        Self { rules }
    }

    pub fn allows(&self, parent: &str, child: &str) -> bool {
        self.rules
            .get(parent)
            .is_some_and(|children| children.iter().any(|c| c == child))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// These rules, or the standard grouping when none are defined
    pub fn or_standard(&self) -> Self {
        if self.is_empty() {
            Self::standard()
        } else {
            self.clone()
        }
    }
}

/// A message split into segments and grouped into a hierarchy
#[derive(Debug, Clone)]
pub struct Hl7Message {
    segments: Vec<String>,
    root: HierarchyNode,
    config: TransformConfig,
}

impl Hl7Message {
    /// Parses a raw message.
    ///
    /// Segments are separated by CR and/or LF; blank lines are skipped. A segment
    /// nests under the nearest open ancestor allowed to own it, otherwise it
    /// becomes a top-level child of the message root.
    pub fn parse(text: &str, hierarchy: &SegmentHierarchy, config: &TransformConfig) -> Self {
        let segments: Vec<String> = text
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        let delimiters = segments
            .first()
            .and_then(|first| Delimiters::from_header(first))
            .unwrap_or(config.delimiters);

        let mut config = config.clone();
        config.delimiters = delimiters;

        let root = build_hierarchy(&segments, hierarchy);

        #[cfg(feature = "trace")]
        debug!(
            "Parsed message with {} segments ({} top-level)",
            segments.len(),
            root.children.len()
        );

        Self {
            segments,
            root,
            config,
        }
    }

    /// Segment lines in message order
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.config.delimiters
    }

    /// Resolves a locator path, reporting malformed paths as errors
    pub fn query(&self, path: &str) -> Result<Option<Vec<Vec<String>>>, Hl7JsonError> {
        let locator = SegmentLocator::parse(path)?;

        #[cfg(feature = "trace")]
        trace!("Resolving {:?}", locator);

        let matched: Vec<Vec<String>> = self
            .segments
            .iter()
            .filter(|line| line.get(..3) == Some(locator.segment.as_str()))
            .enumerate()
            .filter(|(index, _)| match locator.occurrence {
                Occurrence::All => true,
                Occurrence::Nth(n) => index + 1 == n,
            })
            .map(|(_, line)| match &locator.field {
                Some(field) => self.field_values(&locator.segment, line, field),
                None => vec![line.clone()],
            })
            .collect();

        if matched.iter().all(Vec::is_empty) {
            Ok(None)
        } else {
            Ok(Some(matched))
        }
    }

    /// Non-empty values of one field of one segment line
    fn field_values(&self, segment: &str, line: &str, field: &FieldLocator) -> Vec<String> {
        let delimiters = &self.config.delimiters;

        // The header's own delimiters cannot be recovered by splitting
        if segment == self.config.header_segment && field.number <= 2 {
            return match field.number {
                1 => vec![delimiters.field_separator()],
                2 => vec![delimiters.encoding_characters()],
                _ => Vec::new(),
            };
        }

        let tokens: Vec<&str> = line.split(delimiters.field).collect();
        let Some(value) = self.config.field_value(segment, &tokens, field.number) else {
            return Vec::new();
        };

        value
            .split(delimiters.repetition)
            .enumerate()
            .filter(|(index, _)| field.repetition.map_or(true, |r| index + 1 == r))
            .filter_map(|(_, repetition)| {
                let component = match field.component {
                    Some(c) => repetition.split(delimiters.component).nth(c.checked_sub(1)?)?,
                    None => repetition,
                };
                match field.subcomponent {
                    Some(s) => component.split(delimiters.subcomponent).nth(s.checked_sub(1)?),
                    None => Some(component),
                }
            })
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl HierarchySource for Hl7Message {
    fn hierarchy(&self) -> &HierarchyNode {
        &self.root
    }
}

impl PathResolver for Hl7Message {
    fn resolve(&self, path: &str) -> Option<Vec<Vec<String>>> {
        match self.query(path) {
            Ok(values) => values,
            Err(_err) => {
                #[cfg(feature = "trace")]
                debug!("Unresolvable path {}: {}", path, _err);
                None
            }
        }
    }
}

fn build_hierarchy(segments: &[String], hierarchy: &SegmentHierarchy) -> HierarchyNode {
    // stack[0] is the message root, the rest the currently open ancestors
    let mut stack = vec![HierarchyNode::root()];

    for line in segments {
        let node = HierarchyNode::new(line.as_str());
        while stack.len() > 1 {
            let parent = &stack[stack.len() - 1].segment_code;
            if hierarchy.allows(parent, &node.segment_code) {
                break;
            }
            close_top(&mut stack);
        }
        stack.push(node);
    }

    while stack.len() > 1 {
        close_top(&mut stack);
    }

    stack.pop().unwrap_or_else(HierarchyNode::root)
}

fn close_top(stack: &mut Vec<HierarchyNode>) {
    if let Some(closed) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(closed);
        }
    }
}
