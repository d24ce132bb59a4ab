use std::fs::File;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use postgres::{Client, NoTls};

use slicedb_core::dump::{dump, DumpIo, DumpParams, Guard, OutputType, SchemaSection};
use slicedb_core::restore::{restore, RestoreParams};
use slicedb_core::{RootDoc, SchemaDoc};

#[derive(Parser)]
#[command(name = "slicedb", version, about = "Dump and restore referentially closed slices of PostgreSQL databases")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump the transitive closure of the configured roots.
    Dump(DumpArgs),
    /// Load a slice archive into a database of the same schema.
    Restore(RestoreArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputKind {
    Slice,
    Sql,
}

#[derive(clap::Args)]
struct DumpArgs {
    /// Connection string for the source database.
    #[arg(long, env = "SLICEDB_DSN")]
    dsn: String,
    /// Schema description document (JSON).
    #[arg(long)]
    schema: PathBuf,
    /// Root in the form <table_id>:<sql condition>. Repeatable.
    #[arg(long = "root", required = true)]
    roots: Vec<String>,
    /// Output file. Defaults to stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "slice")]
    output_type: OutputKind,
    /// Capture pre-/post-data DDL with pg_dump (sql output only).
    #[arg(long)]
    include_schema: bool,
    /// Number of parallel sessions.
    #[arg(long, short = 'j', default_value = "1")]
    jobs: NonZeroUsize,
    /// Column that activates the guard on tables containing it.
    #[arg(long, requires = "guard_condition")]
    guard_column: Option<String>,
    /// SQL condition matching rows that must never enter a slice.
    #[arg(long, requires = "guard_column")]
    guard_condition: Option<String>,
}

#[derive(clap::Args)]
struct RestoreArgs {
    /// Connection string for the destination database.
    #[arg(long, env = "SLICEDB_DSN")]
    dsn: String,
    /// Slice archive produced by `slicedb dump`.
    #[arg(long)]
    input: PathBuf,
    /// Number of parallel sessions.
    #[arg(long, short = 'j', default_value = "1")]
    jobs: NonZeroUsize,
    /// Run the whole restore in one transaction. Requires --jobs 1.
    #[arg(long)]
    single_transaction: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    match Cli::parse().command {
        Command::Dump(args) => run_dump(args),
        Command::Restore(args) => run_restore(args),
    }
}

fn run_dump(args: DumpArgs) -> anyhow::Result<()> {
    let schema_file = File::open(&args.schema)
        .with_context(|| format!("cannot open schema file {}", args.schema.display()))?;
    let schema_doc: SchemaDoc = serde_json::from_reader(schema_file)
        .with_context(|| format!("cannot decode schema file {}", args.schema.display()))?;

    let roots = args
        .roots
        .iter()
        .map(|root| parse_root(root))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let params = DumpParams {
        include_schema: args.include_schema,
        parallelism: args.jobs,
        output_type: match args.output_type {
            OutputKind::Slice => OutputType::Slice,
            OutputKind::Sql => OutputType::Sql,
        },
        guard: match (args.guard_column, args.guard_condition) {
            (Some(column), Some(condition)) => Some(Guard { column, condition }),
            _ => None,
        },
    };

    let output: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("cannot create output file {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let dsn = args.dsn;
    let pg_dump_dsn = dsn.clone();
    let connect = || Client::connect(&dsn, NoTls);
    let io = DumpIo::new(connect, output).with_schema_dump(
        move |section: SchemaSection, out: &mut dyn Write| pg_dump_section(&pg_dump_dsn, section, out),
    );

    dump(&schema_doc, &roots, io, &params).context("dump failed")?;
    Ok(())
}

fn run_restore(args: RestoreArgs) -> anyhow::Result<()> {
    let params = RestoreParams {
        parallelism: args.jobs,
        transaction: args.single_transaction,
    };
    let dsn = args.dsn;
    let connect = || Client::connect(&dsn, NoTls);
    let input = args.input;

    restore(connect, &params, || File::open(&input)).context("restore failed")?;
    Ok(())
}

fn parse_root(root: &str) -> anyhow::Result<RootDoc> {
    let Some((table, condition)) = root.split_once(':') else {
        bail!("root {root:?} is not of the form <table_id>:<condition>");
    };
    Ok(RootDoc {
        table: table.to_owned(),
        condition: condition.to_owned(),
    })
}

/// Capture one DDL section from `pg_dump` into the SQL output.
fn pg_dump_section(dsn: &str, section: SchemaSection, out: &mut dyn Write) -> io::Result<()> {
    let mut reader = duct::cmd(
        "pg_dump",
        ["-B", "--no-acl", "--section", section.as_str(), "--dbname", dsn],
    )
    .stdin_null()
    .reader()?;
    io::copy(&mut reader, out)?;
    Ok(())
}
