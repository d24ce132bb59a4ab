//! The dump engine: concurrent graph traversal of a live database,
//! extracting a referentially closed slice at a single snapshot.

use std::io::{self, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use itertools::Itertools;
use log::{debug, info, trace};
use postgres::Client;
use postgres_protocol::escape::escape_identifier;

use crate::config::{Direction, RootDoc, SchemaDoc};
use crate::discovery::{DiscoveryResult, Segment};
use crate::error::DumpError;
use crate::pg;
use crate::schema::{ReferenceId, Schema, Table, TableId};
use crate::sink::Output;
use crate::sql::SqlWriter;
use crate::tid::{self, Tid};
use crate::work;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputType {
    Slice,
    Sql,
}

/// The schema region being delegated to the external `pg_dump`
/// collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaSection {
    PreData,
    PostData,
}

impl SchemaSection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreData => "pre-data",
            Self::PostData => "post-data",
        }
    }
}

/// Post-discovery safety predicate.
///
/// For every table whose column list contains `column`, newly discovered
/// rows matching the SQL boolean expression `condition` abort the dump.
#[derive(Clone, Debug)]
pub struct Guard {
    pub column: String,
    pub condition: String,
}

#[derive(Clone, Debug)]
pub struct DumpParams {
    pub include_schema: bool,
    pub parallelism: NonZeroUsize,
    pub output_type: OutputType,
    pub guard: Option<Guard>,
}

/// Signature of the collaborator writing DDL regions (spawns `pg_dump`).
pub type SchemaDump = fn(SchemaSection, &mut dyn Write) -> io::Result<()>;

/// The I/O surface of one dump: a connection factory, the output byte
/// stream, and the schema-section collaborator.
pub struct DumpIo<C, W, D = SchemaDump> {
    pub connect: C,
    pub output: W,
    pub schema_dump: D,
}

impl<C, W> DumpIo<C, W> {
    /// I/O without schema sections; `include_schema` dumps will fail their
    /// pre-data write.
    pub fn new(connect: C, output: W) -> Self {
        fn unavailable(section: SchemaSection, _: &mut dyn Write) -> io::Result<()> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no collaborator available for the {} section", section.as_str()),
            ))
        }
        Self {
            connect,
            output,
            schema_dump: unavailable,
        }
    }

    pub fn with_schema_dump<D>(self, schema_dump: D) -> DumpIo<C, W, D> {
        DumpIo {
            connect: self.connect,
            output: self.output,
            schema_dump,
        }
    }
}

/// One unit of discovery work.
enum Item {
    /// A root query: every row of `table` matching `condition`.
    Root { table: TableId, condition: String },
    /// Rows reachable from `segment` across `reference` in `direction`.
    Reference {
        reference: ReferenceId,
        direction: Direction,
        segment: Arc<Segment>,
    },
}

/// Dump a slice of the database reachable from `roots` into `io.output`.
///
/// See the crate docs for the traversal model. With `parallelism > 1` all
/// worker sessions are pinned to one exported snapshot; the output is
/// indistinguishable from a single-session dump taken at that instant.
pub fn dump<C, W, D>(
    schema_doc: &SchemaDoc,
    roots: &[RootDoc],
    io: DumpIo<C, W, D>,
    params: &DumpParams,
) -> Result<(), DumpError>
where
    C: Fn() -> Result<Client, postgres::Error> + Sync,
    W: Write + Send,
    D: FnMut(SchemaSection, &mut dyn Write) -> io::Result<()>,
{
    if params.output_type == OutputType::Slice && params.include_schema {
        return Err(DumpError::SliceWithSchema);
    }

    let schema = Schema::new(schema_doc)?;
    let mut seeds = Vec::with_capacity(roots.len());
    for root in roots {
        seeds.push(Item::Root {
            table: schema.resolve(&root.table)?,
            condition: root.condition.clone(),
        });
    }

    let DumpIo {
        connect,
        output,
        mut schema_dump,
    } = io;

    let output = match params.output_type {
        OutputType::Slice => Output::slice(output),
        OutputType::Sql => {
            let mut writer = SqlWriter::new(output);
            if params.include_schema {
                write_schema_section(&mut schema_dump, SchemaSection::PreData, writer.predata_writer()?)?;
            }
            Output::sql(writer)
        }
    };

    let result = DiscoveryResult::new();

    info!("dumping rows");
    let start = Instant::now();

    // With one worker, its own frozen transaction is the snapshot. With
    // more, the coordinator exports a snapshot and must hold its
    // transaction open until every worker is done.
    let mut coordinator = None;
    let snapshot = if params.parallelism.get() == 1 {
        None
    } else {
        let mut client = connect()?;
        pg::begin(&mut client)?;
        pg::freeze(&mut client)?;
        let snapshot = pg::export_snapshot(&mut client)?;
        info!("running at snapshot {snapshot}");
        coordinator = Some(client);
        Some(snapshot)
    };

    work::run(params.parallelism, seeds, || {
        let mut client = connect()?;
        pg::begin(&mut client)?;
        pg::freeze(&mut client)?;
        if let Some(snapshot) = &snapshot {
            pg::import_snapshot(&mut client, snapshot).map_err(|source| DumpError::SnapshotLost {
                snapshot: snapshot.clone(),
                source,
            })?;
        }
        let schema = &schema;
        let result = &result;
        let output = &output;
        let guard = params.guard.as_ref();
        Ok(move |item| process_item(&mut client, schema, result, output, guard, item))
    })?;

    if let Some(mut client) = coordinator {
        pg::commit(&mut client)?;
    }
    info!(
        "dumped {} rows ({:.3}s)",
        result.row_count(),
        start.elapsed().as_secs_f64()
    );

    match params.output_type {
        OutputType::Slice => {
            let manifest = result.into_manifest();
            output.finish_slice(&manifest)?;
        }
        OutputType::Sql => {
            let mut writer = output.finish_sql();
            if params.include_schema {
                write_schema_section(&mut schema_dump, SchemaSection::PostData, writer.postdata_writer()?)?;
            }
            writer.finish()?;
        }
    }
    Ok(())
}

fn write_schema_section<D>(schema_dump: &mut D, section: SchemaSection, out: &mut dyn Write) -> Result<(), DumpError>
where
    D: FnMut(SchemaSection, &mut dyn Write) -> io::Result<()>,
{
    trace!("dumping {} schema", section.as_str());
    let start = Instant::now();
    schema_dump(section, out)?;
    debug!(
        "dumped {} schema ({:.3}s)",
        section.as_str(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn process_item<W: Write>(
    client: &mut Client,
    schema: &Schema,
    result: &DiscoveryResult,
    output: &Output<W>,
    guard: Option<&Guard>,
    item: Item,
) -> Result<Vec<Item>, DumpError> {
    let (to_table, arrived, segment) = match &item {
        Item::Root { table, condition } => {
            let segment = discover_root(client, schema, result, *table, condition)?;
            (*table, None, segment)
        }
        Item::Reference {
            reference,
            direction,
            segment,
        } => {
            let (to_table, found) =
                discover_reference(client, schema, result, *reference, *direction, segment)?;
            (to_table, Some((*reference, *direction)), found)
        }
    };
    // Nothing new: the traversal terminates here. Cycles in the reference
    // graph bottom out on this path.
    let Some(segment) = segment else {
        return Ok(Vec::new());
    };

    let meta = schema.table(to_table);
    if let Some(guard) = guard {
        check_guard(client, meta, guard, &segment)?;
    }
    extract(client, meta, &segment, output)?;

    Ok(successors(schema, &Arc::new(segment), arrived))
}

fn discover_root(
    client: &mut Client,
    schema: &Schema,
    result: &DiscoveryResult,
    table: TableId,
    condition: &str,
) -> Result<Option<Segment>, DumpError> {
    let meta = schema.table(table);
    trace!("finding rows from table {}", meta.id);
    let start = Instant::now();

    let query = format!(
        "SELECT ctid FROM {} WHERE {}",
        pg::qualified(&meta.schema, &meta.name),
        condition,
    );
    let found: Vec<Tid> = client
        .query(query.as_str(), &[])?
        .into_iter()
        .map(|row| row.get(0))
        .collect();

    let segment = add_found(result, table, meta, &found);
    log_discovery(meta, found.len(), segment.as_ref(), start);
    Ok(segment)
}

fn discover_reference(
    client: &mut Client,
    schema: &Schema,
    result: &DiscoveryResult,
    reference: ReferenceId,
    direction: Direction,
    source: &Segment,
) -> Result<(TableId, Option<Segment>), DumpError> {
    let r = schema.reference(reference);
    let (from_table, from_columns, to_table, to_columns) = match direction {
        Direction::Forward => (r.table, &r.columns, r.reference_table, &r.reference_columns),
        Direction::Reverse => (r.reference_table, &r.reference_columns, r.table, &r.columns),
    };
    let from = schema.table(from_table);
    let to = schema.table(to_table);
    trace!(
        "finding rows from table {} using {}/{} via {}",
        to.id,
        from.id,
        source.index,
        r.id
    );
    let start = Instant::now();

    let query = format!(
        "SELECT DISTINCT b.ctid FROM {} AS a JOIN {} AS b ON ({}) = ({}) WHERE a.ctid = ANY($1)",
        pg::qualified(&from.schema, &from.name),
        pg::qualified(&to.schema, &to.name),
        from_columns.iter().map(|c| format!("a.{}", escape_identifier(c))).join(", "),
        to_columns.iter().map(|c| format!("b.{}", escape_identifier(c))).join(", "),
    );
    let found: Vec<Tid> = client
        .query(query.as_str(), &[&source.row_ids])?
        .into_iter()
        .map(|row| row.get(0))
        .collect();

    let segment = add_found(result, to_table, to, &found);
    log_discovery(to, found.len(), segment.as_ref(), start);
    Ok((to_table, segment))
}

fn add_found(result: &DiscoveryResult, table: TableId, meta: &Table, found: &[Tid]) -> Option<Segment> {
    if found.is_empty() {
        None
    } else {
        result.add(table, meta, found)
    }
}

fn log_discovery(meta: &Table, found: usize, segment: Option<&Segment>, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    match segment {
        None => debug!("found {found} rows (no new) in table {} ({elapsed:.3}s)", meta.id),
        Some(segment) => debug!(
            "found {found} rows ({} new) as {}/{} ({elapsed:.3}s)",
            segment.row_ids.len(),
            meta.id,
            segment.index,
        ),
    }
}

fn check_guard(
    client: &mut Client,
    meta: &Table,
    guard: &Guard,
    segment: &Segment,
) -> Result<(), DumpError> {
    if !meta.columns.contains(&guard.column) {
        return Ok(());
    }
    let query = format!(
        "SELECT 1 FROM {} WHERE ctid = ANY($1) AND ({}) LIMIT 1",
        pg::qualified(&meta.schema, &meta.name),
        guard.condition,
    );
    let rows = client.query(query.as_str(), &[&segment.row_ids])?;
    if rows.is_empty() {
        Ok(())
    } else {
        Err(DumpError::Guard {
            table: meta.id.clone(),
        })
    }
}

/// Stream the segment's column data through a scratch file into the sink.
///
/// The spool keeps the sink mutex out of the database round-trip: the COPY
/// completes before the sink is locked.
fn extract<W: Write>(
    client: &mut Client,
    meta: &Table,
    segment: &Segment,
    output: &Output<W>,
) -> Result<(), DumpError> {
    trace!("dumping {} rows from table {}", segment.row_ids.len(), meta.id);
    let start = Instant::now();

    let query = format!(
        "COPY (SELECT {} FROM {} WHERE ctid = ANY({})) TO STDOUT",
        pg::column_list(&meta.columns),
        pg::qualified(&meta.schema, &meta.name),
        tid::array_literal(&segment.row_ids),
    );
    let mut spool = tempfile::tempfile()?;
    let mut reader = client.copy_out(query.as_str())?;
    let len = io::copy(&mut reader, &mut spool)?;
    drop(reader);

    spool.seek(SeekFrom::Start(0))?;
    output.write_segment(meta, segment.index, len, &mut spool)?;

    debug!(
        "dumped {} rows from table {} ({:.3}s)",
        segment.row_ids.len(),
        meta.id,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Enumerate the items this segment's frontier expands into: outgoing
/// references walking forward and incoming references walking reverse,
/// minus the inverse of the edge that produced the segment.
fn successors(
    schema: &Schema,
    segment: &Arc<Segment>,
    arrived: Option<(ReferenceId, Direction)>,
) -> Vec<Item> {
    let table = schema.table(segment.table);
    let mut items = Vec::new();
    for &reference in &table.references {
        if !schema.reference(reference).walks(Direction::Forward) {
            continue;
        }
        if arrived == Some((reference, Direction::Reverse)) {
            continue;
        }
        items.push(Item::Reference {
            reference,
            direction: Direction::Forward,
            segment: segment.clone(),
        });
    }
    for &reference in &table.reverse_references {
        if !schema.reference(reference).walks(Direction::Reverse) {
            continue;
        }
        if arrived == Some((reference, Direction::Forward)) {
            continue;
        }
        items.push(Item::Reference {
            reference,
            direction: Direction::Reverse,
            segment: segment.clone(),
        });
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReferenceDoc, TableDoc};

    fn doc(directions: Vec<Direction>) -> SchemaDoc {
        SchemaDoc {
            tables: vec![TableDoc {
                id: "node".into(),
                schema: "public".into(),
                name: "node".into(),
                columns: vec!["id".into(), "parent_id".into()],
            }],
            references: vec![ReferenceDoc {
                id: "node_parent".into(),
                table: "node".into(),
                columns: vec!["parent_id".into()],
                reference_table: "node".into(),
                reference_columns: vec!["id".into()],
                directions,
            }],
        }
    }

    fn segment_for(schema: &Schema, table: TableId) -> Arc<Segment> {
        let result = DiscoveryResult::new();
        let segment = result
            .add(table, schema.table(table), &[Tid { block: 0, offset: 1 }])
            .unwrap();
        Arc::new(segment)
    }

    fn directions_of(items: &[Item]) -> Vec<Direction> {
        items
            .iter()
            .map(|item| match item {
                Item::Reference { direction, .. } => *direction,
                Item::Root { .. } => panic!("root in successors"),
            })
            .collect()
    }

    #[test]
    fn root_segment_walks_both_senses() {
        let schema = Schema::new(&doc(vec![Direction::Forward, Direction::Reverse])).unwrap();
        let table = schema.resolve("node").unwrap();
        let items = successors(&schema, &segment_for(&schema, table), None);
        assert_eq!(directions_of(&items), vec![Direction::Forward, Direction::Reverse]);
    }

    #[test]
    fn arrival_edge_is_not_walked_backwards() {
        let schema = Schema::new(&doc(vec![Direction::Forward, Direction::Reverse])).unwrap();
        let table = schema.resolve("node").unwrap();
        let reference = schema.table(table).references[0];

        let items = successors(
            &schema,
            &segment_for(&schema, table),
            Some((reference, Direction::Forward)),
        );
        assert_eq!(directions_of(&items), vec![Direction::Forward]);

        let items = successors(
            &schema,
            &segment_for(&schema, table),
            Some((reference, Direction::Reverse)),
        );
        assert_eq!(directions_of(&items), vec![Direction::Reverse]);
    }

    #[test]
    fn disabled_directions_are_not_walked() {
        let schema = Schema::new(&doc(vec![Direction::Forward])).unwrap();
        let table = schema.resolve("node").unwrap();
        let items = successors(&schema, &segment_for(&schema, table), None);
        assert_eq!(directions_of(&items), vec![Direction::Forward]);
    }

    #[test]
    fn slice_with_schema_rejected_before_any_connection() {
        let params = DumpParams {
            include_schema: true,
            parallelism: NonZeroUsize::new(1).unwrap(),
            output_type: OutputType::Slice,
            guard: None,
        };
        let io = DumpIo::new(
            || -> Result<postgres::Client, postgres::Error> {
                panic!("connected despite config conflict")
            },
            Vec::new(),
        );
        let err = dump(&SchemaDoc::default(), &[], io, &params).unwrap_err();
        assert!(matches!(err, DumpError::SliceWithSchema));
    }
}
