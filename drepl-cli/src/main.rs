mod access;
mod check;
mod export;
mod metrics;

use std::path::{Path, PathBuf};

use access::{exec_read, exec_write};
use check::exec_check;
use clap::Parser;
use drepl::file::{Description, DreplFile, DreplOpenOptions};
use drepl::metrics::DreplMetrics;
use drepl::{ReplicationMode, ReplicationOptions};
use export::exec_export;
use metrics::print_metrics;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser)]
#[command(name = "drepl", version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
    /// Replicate writes on a worker pool instead of inline.
    #[arg(long = "async", global = true)]
    detached: bool,
    /// Flush the written view's replica after every write.
    #[arg(long, global = true)]
    msync: bool,
    /// Size of the replication worker pool.
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Print the replication metrics after the command.
    #[arg(long, global = true)]
    metrics: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Build the block graph and print every view's block trees.
    Check { desc: PathBuf },
    /// Write the graph in the binary export format.
    Export {
        desc: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Hex dump bytes read through a view.
    Read {
        desc: PathBuf,
        view: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Defaults to the rest of the view.
        #[arg(long)]
        len: Option<u64>,
    },
    /// Write hex-encoded bytes through a view and replicate them.
    Write {
        desc: PathBuf,
        view: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        data: String,
    },
}

impl Cli {
    /// The document's options with command line flags applied on top.
    fn replication(&self, desc: &Description) -> ReplicationOptions {
        let mut options = desc.options.clone().unwrap_or_default();
        if self.detached {
            options = options.with_mode(ReplicationMode::Async);
        }
        if self.msync {
            options = options.with_sync_on_write(true);
        }
        if let Some(workers) = self.workers {
            options = options.with_workers(workers);
        }
        options
    }

    fn open(&self, path: &Path, in_memory: bool) -> anyhow::Result<DreplFile> {
        let desc = Description::from_path(path)?;
        let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let mut options = DreplOpenOptions::new()
            .with_replication(self.replication(&desc))
            .with_metrics(DreplMetrics::with_tags([("desc", name)].as_slice()));
        if let Some(dir) = path.parent() {
            options = options.with_base_dir(dir);
        }
        if in_memory {
            options = options.in_memory();
        }
        Ok(options.open(&desc)?)
    }
}

fn setup_logger(is_verbose: bool) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::builder()
            .with_default_directive(
                if is_verbose {
                    LevelFilter::DEBUG
                } else {
                    LevelFilter::INFO
                }
                .into(),
            )
            .from_env_lossy(),
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_env_filter(filter)
        .init();
}

impl Commands {
    /// The description to open, and whether its replicas stay in memory.
    fn desc(&self) -> (&Path, bool) {
        match self {
            Commands::Check { desc } => (desc.as_path(), true),
            Commands::Export { desc, .. }
            | Commands::Read { desc, .. }
            | Commands::Write { desc, .. } => (desc.as_path(), false),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logger(cli.verbose);

    let (desc, in_memory) = cli.command.desc();
    let file = cli.open(desc, in_memory)?;
    match &cli.command {
        Commands::Check { .. } => exec_check(&file)?,
        Commands::Export { output, .. } => exec_export(&file, output)?,
        Commands::Read { view, offset, len, .. } => exec_read(&file, view, *offset, *len)?,
        Commands::Write { view, offset, data, .. } => exec_write(&file, view, *offset, data)?,
    }
    if cli.metrics {
        print_metrics(file.graph().metrics());
    }
    Ok(())
}
