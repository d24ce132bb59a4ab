//! The index of a slice archive: per-table metadata and segment row counts.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Tables in first-discovery order.
    pub tables: Vec<ManifestTable>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTable {
    pub id: String,
    pub schema: String,
    pub name: String,
    pub columns: Vec<String>,
    /// Segment metadata, mirroring segment index assignment: entry `i`
    /// describes blob `segments/<id>/<i>`.
    pub segments: Vec<ManifestSegment>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSegment {
    pub row_count: u64,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn json_shape() {
        let manifest = Manifest {
            tables: vec![ManifestTable {
                id: "t".into(),
                schema: "public".into(),
                name: "things".into(),
                columns: vec!["id".into(), "label".into()],
                segments: vec![ManifestSegment { row_count: 3 }],
            }],
        };
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "tables": [{
                    "id": "t",
                    "schema": "public",
                    "name": "things",
                    "columns": ["id", "label"],
                    "segments": [{ "rowCount": 3 }],
                }]
            })
        );
        let back: Manifest = serde_json::from_value(json).unwrap();
        assert_eq!(back, manifest);
    }
}
