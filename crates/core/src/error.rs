use std::io;

use thiserror::Error;

/// Error constructing or querying the schema graph.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("multiple definitions for table {id}")]
    DuplicateTable { id: String },
    #[error("multiple definitions for reference {id}")]
    DuplicateReference { id: String },
    #[error("no table {table}, needed by reference {reference}")]
    DanglingReference { reference: String, table: String },
    #[error("reference {reference}: {columns} column(s) cannot match {reference_columns} referenced column(s)")]
    ColumnCountMismatch {
        reference: String,
        columns: usize,
        reference_columns: usize,
    },
    #[error("no such table {id}")]
    UnknownTable { id: String },
}

/// Error returned by [`crate::dump`].
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("slice output is incompatible with schema sections")]
    SliceWithSchema,
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("failed to bind session to exported snapshot {snapshot}")]
    SnapshotLost {
        snapshot: String,
        #[source]
        source: postgres::Error,
    },
    #[error("guard condition matched newly discovered rows in table {table}")]
    Guard { table: String },
    #[error(transparent)]
    Db(#[from] postgres::Error),
    #[error("failed to write dump output")]
    Sink(#[from] io::Error),
}

/// Error returned by [`crate::restore`].
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("a single transaction requires parallelism 1")]
    TransactionalParallelism,
    #[error("foreign key constraints between restored tables form a cycle")]
    CycleDetected,
    #[error(transparent)]
    Db(#[from] postgres::Error),
    #[error("failed to read slice archive")]
    Archive(#[from] io::Error),
    #[error("{} restore task(s) failed, first: {}", .0.len(), .0[0])]
    Failed(Vec<RestoreError>),
}
