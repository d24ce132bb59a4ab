//! Consistent, referentially closed slices of live PostgreSQL databases.
//!
//! A *slice* is the transitive closure of a set of seed rows under a
//! user-declared graph of foreign-key-like references. [`dump`] walks that
//! graph concurrently against a single database snapshot — discovering row
//! identities, deduplicating them, and extracting their column data into
//! segmented output — and [`restore`] loads such output back into a
//! destination of the same schema, ordering tables by the destination's
//! non-deferrable foreign keys and deferring the deferrable ones.
//!
//! The engines share two worker-pool primitives, each handing every worker
//! an exclusive database session: [`work`] expands a growing frontier,
//! [`graph`] executes under a precomputed dependency relation.

pub mod config;
pub mod discovery;
pub mod dump;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod pg;
pub mod restore;
pub mod schema;
pub mod sink;
pub mod slice;
pub mod sql;
pub mod tid;
pub mod work;

pub use config::{Direction, RootDoc, SchemaDoc};
pub use dump::{dump, DumpIo, DumpParams, Guard, OutputType, SchemaSection};
pub use error::{DumpError, RestoreError, SchemaError};
pub use manifest::Manifest;
pub use restore::{restore, RestoreParams};
pub use schema::Schema;
pub use slice::{SliceReader, SliceWriter};
pub use tid::Tid;
