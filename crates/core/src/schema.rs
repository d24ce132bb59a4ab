//! In-memory reference graph built from a [`SchemaDoc`].

use indexmap::IndexMap;

use crate::config::{Direction, ReferenceDoc, SchemaDoc};
use crate::error::SchemaError;

/// Index of a [`Table`] within its [`Schema`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TableId(pub(crate) usize);

/// Index of a [`Reference`] within its [`Schema`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReferenceId(pub(crate) usize);

#[derive(Debug)]
pub struct Table {
    /// Stable string id from the schema document.
    pub id: String,
    pub schema: String,
    pub name: String,
    pub columns: Vec<String>,
    /// References owned by this table (this table → parent).
    pub references: Vec<ReferenceId>,
    /// References owned by other tables pointing here (this table ← child).
    pub reverse_references: Vec<ReferenceId>,
}

#[derive(Debug)]
pub struct Reference {
    pub id: String,
    pub directions: Vec<Direction>,
    /// Owning table.
    pub table: TableId,
    pub columns: Vec<String>,
    /// Referenced table.
    pub reference_table: TableId,
    pub reference_columns: Vec<String>,
}

impl Reference {
    pub fn walks(&self, direction: Direction) -> bool {
        self.directions.contains(&direction)
    }
}

/// Bidirectional adjacency over tables and references.
///
/// Tables and references are arena-allocated and addressed by [`TableId`] /
/// [`ReferenceId`]; the string ids from the document resolve through
/// [`Schema::resolve`].
#[derive(Debug)]
pub struct Schema {
    tables: Vec<Table>,
    references: Vec<Reference>,
    by_id: IndexMap<String, TableId>,
}

impl Schema {
    pub fn new(doc: &SchemaDoc) -> Result<Self, SchemaError> {
        let mut tables = Vec::with_capacity(doc.tables.len());
        let mut by_id = IndexMap::with_capacity(doc.tables.len());
        for table in &doc.tables {
            let id = TableId(tables.len());
            if by_id.insert(table.id.clone(), id).is_some() {
                return Err(SchemaError::DuplicateTable { id: table.id.clone() });
            }
            tables.push(Table {
                id: table.id.clone(),
                schema: table.schema.clone(),
                name: table.name.clone(),
                columns: table.columns.clone(),
                references: Vec::new(),
                reverse_references: Vec::new(),
            });
        }

        let mut references = Vec::with_capacity(doc.references.len());
        let mut reference_ids = IndexMap::with_capacity(doc.references.len());
        for reference in &doc.references {
            let rid = ReferenceId(references.len());
            if reference_ids.insert(reference.id.clone(), rid).is_some() {
                return Err(SchemaError::DuplicateReference {
                    id: reference.id.clone(),
                });
            }
            let resolve = |table: &str| {
                by_id
                    .get(table)
                    .copied()
                    .ok_or_else(|| SchemaError::DanglingReference {
                        reference: reference.id.clone(),
                        table: table.to_owned(),
                    })
            };
            let table = resolve(&reference.table)?;
            let reference_table = resolve(&reference.reference_table)?;
            check_column_arity(reference)?;

            references.push(Reference {
                id: reference.id.clone(),
                directions: reference.directions.clone(),
                table,
                columns: reference.columns.clone(),
                reference_table,
                reference_columns: reference.reference_columns.clone(),
            });
            tables[table.0].references.push(rid);
            tables[reference_table.0].reverse_references.push(rid);
        }

        Ok(Self {
            tables,
            references,
            by_id,
        })
    }

    /// Resolve a string table id from the schema document.
    pub fn resolve(&self, id: &str) -> Result<TableId, SchemaError> {
        self.by_id
            .get(id)
            .copied()
            .ok_or_else(|| SchemaError::UnknownTable { id: id.to_owned() })
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0]
    }

    pub fn reference(&self, id: ReferenceId) -> &Reference {
        &self.references[id.0]
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableId, &Table)> {
        self.tables.iter().enumerate().map(|(i, t)| (TableId(i), t))
    }
}

fn check_column_arity(reference: &ReferenceDoc) -> Result<(), SchemaError> {
    if reference.columns.len() != reference.reference_columns.len() {
        return Err(SchemaError::ColumnCountMismatch {
            reference: reference.id.clone(),
            columns: reference.columns.len(),
            reference_columns: reference.reference_columns.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableDoc;

    fn table(id: &str) -> TableDoc {
        TableDoc {
            id: id.into(),
            schema: "public".into(),
            name: id.into(),
            columns: vec!["id".into(), "parent_id".into()],
        }
    }

    fn reference(id: &str, table: &str, reference_table: &str) -> ReferenceDoc {
        ReferenceDoc {
            id: id.into(),
            table: table.into(),
            columns: vec!["parent_id".into()],
            reference_table: reference_table.into(),
            reference_columns: vec!["id".into()],
            directions: vec![Direction::Forward, Direction::Reverse],
        }
    }

    #[test]
    fn builds_bidirectional_adjacency() {
        let doc = SchemaDoc {
            tables: vec![table("a"), table("b")],
            references: vec![reference("b_a", "b", "a")],
        };
        let schema = Schema::new(&doc).unwrap();

        let a = schema.resolve("a").unwrap();
        let b = schema.resolve("b").unwrap();
        assert_eq!(schema.table(b).references.len(), 1);
        assert_eq!(schema.table(b).reverse_references.len(), 0);
        assert_eq!(schema.table(a).references.len(), 0);
        assert_eq!(schema.table(a).reverse_references.len(), 1);

        let r = schema.reference(schema.table(b).references[0]);
        assert_eq!(r.table, b);
        assert_eq!(r.reference_table, a);
    }

    #[test]
    fn self_reference_lands_on_both_sides() {
        let doc = SchemaDoc {
            tables: vec![table("node")],
            references: vec![reference("parent", "node", "node")],
        };
        let schema = Schema::new(&doc).unwrap();
        let node = schema.resolve("node").unwrap();
        assert_eq!(schema.table(node).references.len(), 1);
        assert_eq!(schema.table(node).reverse_references.len(), 1);
    }

    #[test]
    fn duplicate_table_rejected() {
        let doc = SchemaDoc {
            tables: vec![table("a"), table("a")],
            references: vec![],
        };
        assert!(matches!(
            Schema::new(&doc),
            Err(SchemaError::DuplicateTable { id }) if id == "a"
        ));
    }

    #[test]
    fn duplicate_reference_rejected() {
        let doc = SchemaDoc {
            tables: vec![table("a"), table("b")],
            references: vec![reference("r", "b", "a"), reference("r", "a", "b")],
        };
        assert!(matches!(
            Schema::new(&doc),
            Err(SchemaError::DuplicateReference { id }) if id == "r"
        ));
    }

    #[test]
    fn dangling_reference_rejected() {
        let doc = SchemaDoc {
            tables: vec![table("a")],
            references: vec![reference("r", "a", "missing")],
        };
        assert!(matches!(
            Schema::new(&doc),
            Err(SchemaError::DanglingReference { table, .. }) if table == "missing"
        ));
    }

    #[test]
    fn column_arity_checked() {
        let mut bad = reference("r", "b", "a");
        bad.reference_columns.push("extra".into());
        let doc = SchemaDoc {
            tables: vec![table("a"), table("b")],
            references: vec![bad],
        };
        assert!(matches!(
            Schema::new(&doc),
            Err(SchemaError::ColumnCountMismatch { columns: 1, reference_columns: 2, .. })
        ));
    }

    #[test]
    fn unknown_table_lookup() {
        let schema = Schema::new(&SchemaDoc::default()).unwrap();
        assert!(matches!(
            schema.resolve("nope"),
            Err(SchemaError::UnknownTable { id }) if id == "nope"
        ));
    }
}
