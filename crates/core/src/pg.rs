//! PostgreSQL session plumbing: transaction control, snapshot pinning,
//! constraint deferral, and the foreign-key catalog query.
//!
//! Transactions are driven with explicit SQL rather than the driver's
//! borrowing [`postgres::Transaction`] so that a session can travel into a
//! worker closure and keep its transaction open across many tasks.

use postgres::Client;
use postgres_protocol::escape::{escape_identifier, escape_literal};

use crate::manifest::ManifestTable;

/// `schema.name`, quoted for interpolation into a statement.
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", escape_identifier(schema), escape_identifier(name))
}

/// Quoted, comma-separated column list.
pub fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| escape_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn begin(client: &mut Client) -> Result<(), postgres::Error> {
    client.batch_execute("BEGIN")
}

pub fn commit(client: &mut Client) -> Result<(), postgres::Error> {
    client.batch_execute("COMMIT")
}

pub fn rollback(client: &mut Client) -> Result<(), postgres::Error> {
    client.batch_execute("ROLLBACK")
}

/// Pin the current transaction to a stable snapshot: repeatable read, read
/// only. All dump work happens under this mode.
pub fn freeze(client: &mut Client) -> Result<(), postgres::Error> {
    client.batch_execute("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
}

/// Attach the current (frozen) transaction to a snapshot exported by
/// another session. The exporting transaction must still be open.
pub fn import_snapshot(client: &mut Client, snapshot: &str) -> Result<(), postgres::Error> {
    client.batch_execute(&format!("SET TRANSACTION SNAPSHOT {}", escape_literal(snapshot)))
}

/// Publish this transaction's snapshot for other sessions to import.
pub fn export_snapshot(client: &mut Client) -> Result<String, postgres::Error> {
    let row = client.query_one("SELECT pg_export_snapshot()", &[])?;
    Ok(row.get(0))
}

/// Postpone enforcement of the named constraints to transaction commit.
/// Transaction-local; every inserting transaction must issue this itself.
pub fn defer_constraints(
    client: &mut Client,
    constraints: &[(String, String)],
) -> Result<(), postgres::Error> {
    let names = constraints
        .iter()
        .map(|(schema, name)| qualified(schema, name))
        .collect::<Vec<_>>()
        .join(", ");
    client.batch_execute(&format!("SET CONSTRAINTS {names} DEFERRED"))
}

/// A foreign-key constraint between two manifest tables.
#[derive(Clone, Debug)]
pub struct ForeignKey {
    pub schema: String,
    pub name: String,
    /// Manifest id of the constrained (child) table.
    pub table: String,
    /// Manifest id of the referenced (parent) table.
    pub reference_table: String,
    pub deferrable: bool,
}

/// Query the destination catalog for foreign keys between exactly the given
/// tables, matched by `(schema, name)`.
pub fn foreign_keys(
    client: &mut Client,
    tables: &[ManifestTable],
) -> Result<Vec<ForeignKey>, postgres::Error> {
    let ids: Vec<&str> = tables.iter().map(|t| t.id.as_str()).collect();
    let schemas: Vec<&str> = tables.iter().map(|t| t.schema.as_str()).collect();
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();

    let rows = client.query(
        r#"
        WITH listed AS (
            SELECT *
            FROM unnest($1::text[], $2::text[], $3::text[]) AS t (id, schema, name)
        )
        SELECT pn.nspname, pc.conname, child.id, parent.id, pc.condeferrable
        FROM pg_constraint AS pc
            JOIN pg_class AS rel ON pc.conrelid = rel.oid
            JOIN pg_namespace AS pn ON rel.relnamespace = pn.oid
            JOIN listed AS child ON (pn.nspname, rel.relname) = (child.schema, child.name)
            JOIN pg_class AS frel ON pc.confrelid = frel.oid
            JOIN pg_namespace AS fpn ON frel.relnamespace = fpn.oid
            JOIN listed AS parent ON (fpn.nspname, frel.relname) = (parent.schema, parent.name)
        WHERE pc.contype = 'f'
        "#,
        &[&ids, &schemas, &names],
    )?;

    Ok(rows
        .into_iter()
        .map(|row| ForeignKey {
            schema: row.get(0),
            name: row.get(1),
            table: row.get(2),
            reference_table: row.get(3),
            deferrable: row.get(4),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(qualified("public", "order"), r#""public"."order""#);
        assert_eq!(qualified("we\"ird", "t"), r#""we""ird"."t""#);
        assert_eq!(
            column_list(&["a".into(), "select".into()]),
            r#""a", "select""#
        );
    }
}
