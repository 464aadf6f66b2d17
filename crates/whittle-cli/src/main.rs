use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use whittle_store::CaptureStore;

mod commands;
mod httptext;
mod output;

use commands::import::run_import;
use commands::list::run_list;
use commands::minimize::run_minimize;
use commands::show::run_show;

#[derive(Parser)]
#[command(name = "whittle")]
#[command(
    about = "Reduce a captured HTTP request to the smallest one with the same behavior",
    long_about = None
)]
struct Cli {
    /// Machine-readable JSON output on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose progress logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Override the capture database path (default: .whittle/whittle.db).
    #[arg(long = "store", global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a raw HTTP request from a text file into the capture store.
    Import(ImportArgs),
    /// List captured requests.
    List,
    /// Minimize a captured request against its live endpoint.
    Minimize(MinimizeArgs),
    /// Print a captured request (or a replay session) as HTTP text.
    Show(ShowArgs),
}

#[derive(Args)]
struct ImportArgs {
    /// File holding the raw request: request line, headers, blank line, body.
    file: PathBuf,

    /// Target host, overriding the request's Host header.
    #[arg(long)]
    host: Option<String>,

    /// Target port (defaults to 443 with --tls, 80 without).
    #[arg(long)]
    port: Option<u16>,

    /// Send over TLS.
    #[arg(long)]
    tls: bool,
}

#[derive(Args)]
struct MinimizeArgs {
    /// Captured request id (from `whittle import` or `whittle list`).
    id: String,

    #[arg(long = "min-delay-ms")]
    min_delay_ms: Option<u64>,

    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    #[arg(long = "max-retries")]
    max_retries: Option<u32>,

    /// Never remove headers matching this glob (repeatable).
    #[arg(long = "keep-header")]
    keep_header: Vec<String>,

    /// Remove headers matching this glob without a trial (repeatable).
    #[arg(long = "auto-remove-header")]
    auto_remove_header: Vec<String>,

    #[arg(long = "skip-query")]
    skip_query: bool,

    #[arg(long = "skip-body")]
    skip_body: bool,

    #[arg(long = "skip-headers")]
    skip_headers: bool,

    #[arg(long = "skip-json")]
    skip_json: bool,

    /// Record every sent trial in the store's send history.
    #[arg(long = "save-to-history")]
    save_to_history: bool,
}

#[derive(Args)]
struct ShowArgs {
    /// Captured request id, or a replay session id with --session.
    id: String,

    /// Show a replay session instead of a captured request.
    #[arg(long)]
    session: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("[whittle] error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = std::env::current_dir()?;
    let store = match &cli.store {
        Some(path) => CaptureStore::open_at(path.clone())?,
        None => CaptureStore::new(&workspace)?,
    };

    match &cli.command {
        Commands::Import(args) => run_import(&store, args, cli.json),
        Commands::List => run_list(&store, cli.json),
        Commands::Minimize(args) => run_minimize(&workspace, &store, args, cli.json, cli.verbose),
        Commands::Show(args) => run_show(&store, args),
    }
}
