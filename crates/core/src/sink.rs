//! Thread-safe wrappers around the output writers.
//!
//! One mutex per sink, held only while a single segment's already-spooled
//! bytes are copied in — never across a database round-trip.

use std::io::{self, Read, Write};

use parking_lot::Mutex;

use crate::manifest::Manifest;
use crate::schema::Table;
use crate::slice::SliceWriter;
use crate::sql::SqlWriter;

pub enum Output<W: Write> {
    Slice(Mutex<SliceWriter<W>>),
    Sql(Mutex<SqlWriter<W>>),
}

impl<W: Write> Output<W> {
    pub fn slice(out: W) -> Self {
        Self::Slice(Mutex::new(SliceWriter::new(out)))
    }

    pub fn sql(writer: SqlWriter<W>) -> Self {
        Self::Sql(Mutex::new(writer))
    }

    /// Copy one spooled segment payload into the output.
    pub fn write_segment(
        &self,
        table: &Table,
        index: usize,
        len: u64,
        payload: &mut impl Read,
    ) -> io::Result<()> {
        match self {
            Self::Slice(writer) => writer.lock().append_segment(&table.id, index, len, payload),
            Self::Sql(writer) => writer
                .lock()
                .write_frame(&table.schema, &table.name, &table.columns, payload)
                .map(|_| ()),
        }
    }

    /// Finalize a slice output with its manifest. Panics if the output is
    /// not a slice; the dump engine matches on the output type itself.
    pub fn finish_slice(self, manifest: &Manifest) -> io::Result<W> {
        match self {
            Self::Slice(writer) => writer.into_inner().finish(manifest),
            Self::Sql(_) => unreachable!("slice finalization on sql output"),
        }
    }

    /// Take back the SQL writer for the post-data region.
    pub fn finish_sql(self) -> SqlWriter<W> {
        match self {
            Self::Sql(writer) => writer.into_inner(),
            Self::Slice(_) => unreachable!("sql finalization on slice output"),
        }
    }
}
