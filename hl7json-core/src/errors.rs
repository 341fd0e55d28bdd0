// HL7 JSON Error Types
//
// This module defines the error types used throughout the transformation engines.

use thiserror::Error;

/// Errors that can occur while loading documents or transforming messages
#[derive(Error, Debug)]
pub enum Hl7JsonError {
    /// Schema (profile) document could not be loaded or parsed
    #[error("Schema load error: {0}")]
    SchemaLoad(String),

    /// Template document could not be loaded or parsed
    #[error("Template load error: {0}")]
    TemplateLoad(String),

    /// Template has a shape the engine refuses to process
    #[error("Unsupported template shape at {path}: arrays of arrays are not supported")]
    UnsupportedTemplate { path: String },

    /// Template node that cannot appear in a well-formed template
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Malformed path expression handed to the built-in resolver
    #[error("Path syntax error: {0}")]
    PathSyntax(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
