//! CLI for the rrdstrategy round-robin strategy layer.
//!
//! Provides commands for creating, updating, fetching from and exporting
//! round-robin containers, plus last-value queries and graph rendering.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use rrdstrategy::clock::now_secs;
use rrdstrategy::{
    ConsolidationFn, FetchResults, FileEngine, MultithreadedStrategy, RrdStrategy, StrategyConfig,
    UpdateCommand,
};
use tracing_subscriber::EnvFilter;

/// rrdstrategy: round-robin container tool.
#[derive(Parser)]
#[command(name = "rrdstrategy", version, about)]
struct Cli {
    /// Strategy configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create a container from DS: and RRA: definitions.
    Create {
        /// Path of the container to create.
        path: PathBuf,

        /// Step in seconds.
        #[arg(long, default_value = "300")]
        step: u64,

        /// Initial last-update time (seconds). Defaults to now minus the
        /// configured back-dating.
        #[arg(long)]
        start: Option<i64>,

        /// `DS:name:TYPE:heartbeat:min:max` and `RRA:CF:xff:steps:rows` arguments.
        #[arg(required = true)]
        definitions: Vec<String>,
    },

    /// Append rows to a container in one batch.
    Update {
        /// Path of the container.
        path: PathBuf,

        /// `timestamp:value[:value...]` rows; `N` is now, `U` is unknown.
        #[arg(required = true)]
        rows: Vec<String>,
    },

    /// Fetch consolidated values from a container.
    Fetch {
        /// Path of the container.
        path: PathBuf,

        /// Consolidation function.
        #[arg(long, default_value = "AVERAGE")]
        cf: ConsolidationFn,

        /// Window start (seconds). Defaults to one day before the end.
        #[arg(long)]
        start: Option<i64>,

        /// Window end (seconds). Defaults to now.
        #[arg(long)]
        end: Option<i64>,

        /// Requested resolution in seconds.
        #[arg(long, default_value = "1")]
        step: u64,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Export DEF:/XPORT: directives over a window.
    Xport {
        /// Window start (seconds). Defaults to one day before the end.
        #[arg(long)]
        start: Option<i64>,

        /// Window end (seconds). Defaults to now.
        #[arg(long)]
        end: Option<i64>,

        /// Requested resolution in seconds.
        #[arg(long, default_value = "1")]
        step: u64,

        /// Maximum number of rows; 0 for no limit.
        #[arg(long, default_value = "0")]
        maxrows: i64,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,

        /// `DEF:vname=path:ds:CF` and `XPORT:vname[:legend]` directives.
        #[arg(required = true)]
        directives: Vec<String>,
    },

    /// Print the latest value of a data source.
    Last {
        /// Path of the container.
        path: PathBuf,

        /// Data source name.
        ds: String,

        /// Consolidation function.
        #[arg(long, default_value = "AVERAGE")]
        cf: ConsolidationFn,

        /// Collection interval in milliseconds.
        #[arg(long, default_value = "300000")]
        interval_ms: i64,

        /// Look back this many milliseconds for the newest known value
        /// (always uses AVERAGE).
        #[arg(long)]
        range_ms: Option<i64>,
    },

    /// Render a graph with an external command.
    Graph {
        /// Full graph command line; text between delimiters is one argument.
        command: String,

        /// Working directory of the graph process.
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        /// Write the image here instead of standard output.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Render to a temporary file and print size and print lines.
        #[arg(long)]
        details: bool,
    },
}

/// Output format for fetch and export results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with the full result table.
    Json,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult {
    let config = match &cli.config {
        Some(path) => StrategyConfig::load(path)?,
        None => StrategyConfig::default(),
    };
    let strategy = MultithreadedStrategy::with_config(FileEngine::new(), config)?;

    match cli.command {
        Commands::Create {
            path,
            step,
            start,
            definitions,
        } => cmd_create(&strategy, &path, step, start, &definitions),
        Commands::Update { path, rows } => cmd_update(&strategy, &path, rows),
        Commands::Fetch {
            path,
            cf,
            start,
            end,
            step,
            format,
        } => {
            let (start, end) = window(start, end);
            let results = strategy.rrd().fetch(&path, cf, start, end, step)?;
            print_results(&results, &format)
        }
        Commands::Xport {
            start,
            end,
            step,
            maxrows,
            format,
            directives,
        } => {
            let (start, end) = window(start, end);
            let results = strategy.rrd().export(start, end, step, maxrows, &directives)?;
            print_results(&results, &format)
        }
        Commands::Last {
            path,
            ds,
            cf,
            interval_ms,
            range_ms,
        } => {
            let value = match range_ms {
                Some(range) => strategy.fetch_last_value_in_range(&path, &ds, interval_ms, range),
                None => strategy.fetch_last_value(&path, &ds, cf, interval_ms),
            };
            match value {
                Some(v) => println!("{v}"),
                None => return Err(format!("no value for '{ds}' in {}", path.display()).into()),
            }
            Ok(())
        }
        Commands::Graph {
            command,
            work_dir,
            output,
            details,
        } => cmd_graph(&strategy, &command, &work_dir, output.as_deref(), details),
    }
}

/// Implements `rrdstrategy create`.
fn cmd_create(
    strategy: &MultithreadedStrategy<FileEngine>,
    path: &Path,
    step: u64,
    start: Option<i64>,
    definitions: &[String],
) -> CliResult {
    let start = start.unwrap_or_else(|| now_secs() - strategy.config().create_backdate_secs);
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)?;
    }
    strategy.rrd().create(path, step, start, definitions)?;
    tracing::info!("created {}", path.display());
    Ok(())
}

/// Implements `rrdstrategy update`.
fn cmd_update(strategy: &MultithreadedStrategy<FileEngine>, path: &Path, rows: Vec<String>) -> CliResult {
    let mut update: UpdateCommand = strategy.open_file(path);
    for row in rows {
        strategy.update_file(&mut update, &row);
    }
    let count = update.rows().len();
    strategy.close_file(update)?;
    tracing::info!("wrote {count} row(s) to {}", path.display());
    Ok(())
}

/// Implements `rrdstrategy graph`.
fn cmd_graph(
    strategy: &MultithreadedStrategy<FileEngine>,
    command: &str,
    work_dir: &Path,
    output: Option<&Path>,
    details: bool,
) -> CliResult {
    let image = if details {
        let details = strategy.create_graph_return_details(command, work_dir)?;
        println!("{}", serde_json::to_string_pretty(&details)?);
        details.image
    } else {
        strategy.create_graph(command, work_dir)?
    };

    match output {
        Some(path) => fs::write(path, &image)?,
        None if !details => {
            use std::io::Write;
            std::io::stdout().write_all(&image)?;
        }
        None => {}
    }
    Ok(())
}

fn print_results(results: &FetchResults, format: &OutputFormat) -> CliResult {
    match format {
        OutputFormat::Csv => {
            println!(
                "# start={}, end={}, step={}, rows={}",
                results.start(),
                results.end(),
                results.step(),
                results.row_count()
            );
            println!("timestamp,{}", results.columns().join(","));
            for (row, ts) in results.timestamps().enumerate() {
                let values: Vec<String> = results
                    .values()
                    .iter()
                    .map(|column| column[row].to_string())
                    .collect();
                println!("{ts},{}", values.join(","));
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results)?);
        }
    }
    Ok(())
}

/// Resolves an optional window, defaulting to the day ending now.
fn window(start: Option<i64>, end: Option<i64>) -> (i64, i64) {
    let end = end.unwrap_or_else(now_secs);
    let start = start.unwrap_or(end - 86_400);
    (start, end)
}
