//! Declarative slice configuration, as decoded from JSON.
//!
//! These are plain value objects; [`crate::schema::Schema`] turns them into
//! the in-memory reference graph.

use serde::{Deserialize, Serialize};

/// Traversal sense of a reference.
///
/// `Forward` follows from the owning table to the referenced table,
/// `Reverse` the inverse. A reference enables either, both, or neither,
/// independent of its structural orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
}

/// The schema description document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDoc {
    #[serde(default)]
    pub tables: Vec<TableDoc>,
    #[serde(default)]
    pub references: Vec<ReferenceDoc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDoc {
    /// Stable opaque identifier, unique within the document.
    pub id: String,
    pub schema: String,
    pub name: String,
    /// Ordered column list. Order is significant for extraction and load.
    pub columns: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDoc {
    /// Stable opaque identifier, unique within the document.
    pub id: String,
    /// Owning table id.
    pub table: String,
    /// Columns of the owning table, matched pairwise against
    /// `reference_columns`.
    pub columns: Vec<String>,
    /// Referenced table id.
    pub reference_table: String,
    pub reference_columns: Vec<String>,
    /// Enabled traversal senses. Empty means the reference is declared but
    /// never walked.
    #[serde(default)]
    pub directions: Vec<Direction>,
}

/// One root of the slice: a table and a verbatim SQL boolean expression
/// over its columns.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootDoc {
    pub table: String,
    pub condition: String,
}
