//! The restore engine: dependency-ordered loading of a slice archive into
//! a destination database of the same schema.

use std::collections::HashMap;
use std::io::{self, Read, Seek};
use std::num::NonZeroUsize;
use std::time::Instant;

use log::{debug, info, trace};
use parking_lot::Mutex;
use postgres::Client;

use crate::error::RestoreError;
use crate::graph::{self, RunError};
use crate::manifest::ManifestTable;
use crate::pg;
use crate::slice::SliceReader;

#[derive(Clone, Debug)]
pub struct RestoreParams {
    pub parallelism: NonZeroUsize,
    /// Load everything in the coordinator's single transaction. Requires
    /// `parallelism == 1`.
    pub transaction: bool,
}

/// Restore a slice archive into the destination reachable via `connect`.
///
/// `open_input` reopens the archive; every worker indexes its own handle so
/// segment streaming needs no shared file offset.
///
/// Tables constrained by a non-deferrable foreign key load strictly after
/// their parent; deferrable constraints are deferred and impose no
/// ordering.
pub fn restore<C, F, R>(connect: C, params: &RestoreParams, open_input: F) -> Result<(), RestoreError>
where
    C: Fn() -> Result<Client, postgres::Error> + Sync,
    F: Fn() -> io::Result<R> + Sync,
    R: Read + Seek,
{
    if params.parallelism.get() > 1 && params.transaction {
        return Err(RestoreError::TransactionalParallelism);
    }

    let manifest = SliceReader::new(open_input()?)?.manifest()?;
    let tables = manifest.tables;
    let index: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, table)| (table.id.as_str(), i))
        .collect();

    let mut coordinator = connect()?;
    pg::begin(&mut coordinator)?;
    let constraints = pg::foreign_keys(&mut coordinator, &tables)?;

    let deferrable: Vec<(String, String)> = constraints
        .iter()
        .filter(|c| c.deferrable)
        .map(|c| (c.schema.clone(), c.name.clone()))
        .collect();
    if !deferrable.is_empty() {
        info!("deferring {} constraints", deferrable.len());
        pg::defer_constraints(&mut coordinator, &deferrable)?;
    }

    // Non-deferrable constraints impose strict parent-before-child order;
    // deferrable ones only need to hold at commit.
    let mut deps = vec![Vec::new(); tables.len()];
    for constraint in constraints.iter().filter(|c| !c.deferrable) {
        if let (Some(&child), Some(&parent)) = (
            index.get(constraint.table.as_str()),
            index.get(constraint.reference_table.as_str()),
        ) {
            deps[child].push(parent);
        }
    }

    info!("restoring {} tables", tables.len());
    let start = Instant::now();

    let outcome = if params.transaction {
        let shared = Mutex::new(coordinator);
        let outcome = graph::run(params.parallelism, &tables, &deps, || {
            let mut reader = SliceReader::new(open_input()?)?;
            let shared = &shared;
            Ok(move |table: &ManifestTable| {
                copy_table(&mut shared.lock(), table, &mut reader)
            })
        });
        let mut coordinator = shared.into_inner();
        match &outcome {
            Ok(()) => pg::commit(&mut coordinator)?,
            Err(_) => {
                let _ = pg::rollback(&mut coordinator);
            }
        }
        outcome
    } else {
        let deferrable = &deferrable;
        let outcome = graph::run(params.parallelism, &tables, &deps, || {
            let mut reader = SliceReader::new(open_input()?)?;
            let mut client = connect()?;
            Ok(move |table: &ManifestTable| {
                pg::begin(&mut client)?;
                if !deferrable.is_empty() {
                    pg::defer_constraints(&mut client, deferrable)?;
                }
                match copy_table(&mut client, table, &mut reader) {
                    Ok(()) => pg::commit(&mut client).map_err(RestoreError::from),
                    Err(error) => {
                        let _ = pg::rollback(&mut client);
                        Err(error)
                    }
                }
            })
        });
        match &outcome {
            Ok(()) => pg::commit(&mut coordinator)?,
            Err(_) => {
                let _ = pg::rollback(&mut coordinator);
            }
        }
        outcome
    };

    match outcome {
        Ok(()) => {
            let rows: u64 = tables
                .iter()
                .flat_map(|t| &t.segments)
                .map(|s| s.row_count)
                .sum();
            info!("restored {rows} rows ({:.3}s)", start.elapsed().as_secs_f64());
            Ok(())
        }
        Err(RunError::Cycle) => Err(RestoreError::CycleDetected),
        Err(RunError::Failed(errors)) => Err(RestoreError::Failed(errors)),
    }
}

/// Stream every segment of `table`, in manifest order, into a `COPY`.
fn copy_table<R: Read + Seek>(
    client: &mut Client,
    table: &ManifestTable,
    reader: &mut SliceReader<R>,
) -> Result<(), RestoreError> {
    let query = format!(
        "COPY {} ({}) FROM STDIN",
        pg::qualified(&table.schema, &table.name),
        pg::column_list(&table.columns),
    );
    for (index, segment) in table.segments.iter().enumerate() {
        trace!("restoring {} rows into table {}", segment.row_count, table.id);
        let start = Instant::now();

        let mut payload = reader.open_segment(&table.id, index)?;
        let mut writer = client.copy_in(query.as_str())?;
        io::copy(&mut payload, &mut writer)?;
        writer.finish()?;

        debug!(
            "restored {} rows into table {} ({:.3}s)",
            segment.row_count,
            table.id,
            start.elapsed().as_secs_f64()
        );
    }
    Ok(())
}
