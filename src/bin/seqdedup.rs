use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use seqdedup::app::App;
use seqdedup::config::{ConfigLoader, ResolvedConfig};
use seqdedup::corpus::CorpusBuilder;
use seqdedup::domain::ContentHash;
use seqdedup::error::SeqError;
use seqdedup::harvester::{BackoffPolicy, Harvester};
use seqdedup::kv::{self, KvStore};
use seqdedup::output::JsonOutput;
use seqdedup::scheduler::{CancellationToken, ThreadScheduler};
use seqdedup::search::{BlastSearchTool, SearchTool};
use seqdedup::sequences::SequenceStore;
use seqdedup::server;
use seqdedup::sparql::SparqlHttpSource;

#[derive(Parser)]
#[command(name = "seqdedup")]
#[command(about = "Harvest, deduplicate and search genetic sequence records")]
#[command(version, author)]
struct Cli {
    /// Path to a JSON config file (defaults to ./seqdedup.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Ingest records from the upstream source until interrupted")]
    Harvest(HarvestArgs),
    #[command(about = "Search the corpus and map hits back to source identifiers")]
    Search(SearchArgs),
    #[command(about = "Show the source identifiers recorded for a content hash")]
    Lookup(LookupArgs),
    #[command(about = "Concatenate sequence files and build the search index")]
    BuildCorpus,
    #[command(about = "Serve the query front end over HTTP")]
    Serve,
    #[command(about = "Show cursor position and corpus size")]
    Status,
}

#[derive(Args)]
struct HarvestArgs {
    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[derive(Args)]
struct SearchArgs {
    sequence: String,
}

#[derive(Args)]
struct LookupArgs {
    hash: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<SeqError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SeqError) -> u8 {
    match error {
        SeqError::ConfigRead(_) | SeqError::ConfigParse(_) => 2,
        SeqError::UpstreamUnavailable(_)
        | SeqError::UpstreamStatus { .. }
        | SeqError::MalformedRecord(_)
        | SeqError::SearchToolFailure(_)
        | SeqError::SearchTimeout(_)
        | SeqError::MissingTool(_)
        | SeqError::CorpusBuild(_) => 3,
        SeqError::StoreWriteFailed(_)
        | SeqError::CursorAdvanceFailed(_)
        | SeqError::ReconciliationLookupFailed(_)
        | SeqError::Kv(_)
        | SeqError::Filesystem(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Harvest(args) => run_harvest(&config, args),
        Commands::Search(args) => {
            let token = shutdown_token()?;
            let tool = BlastSearchTool::new(&config.search, &config.corpus).with_cancellation(token);
            let app = App::new(tool, kv::open(&config.kv_url)?, &config.kv_keys);
            let report = app.search(&args.sequence)?;
            JsonOutput::print_search(&report).into_diagnostic()
        }
        Commands::Lookup(args) => {
            let hash: ContentHash = args.hash.parse()?;
            let app = query_app(&config)?;
            let result = app.lookup(&hash)?;
            JsonOutput::print_lookup(&result).into_diagnostic()
        }
        Commands::BuildCorpus => {
            let store = SequenceStore::new(config.sequence_dir.clone());
            let result = CorpusBuilder::new(config.corpus.clone()).build(&store)?;
            JsonOutput::print_corpus(&result).into_diagnostic()
        }
        Commands::Serve => {
            let app = Arc::new(query_app(&config)?);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .into_diagnostic()?;
            runtime.block_on(server::serve(app, config.port))?;
            Ok(())
        }
        Commands::Status => {
            let app = query_app(&config)?;
            let result = app.status()?;
            JsonOutput::print_status(&result).into_diagnostic()
        }
    }
}

fn run_harvest(config: &ResolvedConfig, args: HarvestArgs) -> miette::Result<()> {
    let kv = kv::open(&config.kv_url)?;
    let upstream = SparqlHttpSource::new(&config.harvest)?;
    let store = SequenceStore::new(config.sequence_dir.clone());
    store.ensure_root()?;
    let harvester = Harvester::new(
        upstream,
        kv,
        &config.kv_keys,
        store,
        BackoffPolicy::from_settings(&config.harvest),
    );

    if args.once {
        let report = harvester.run_cycle()?;
        return JsonOutput::print_cycle(&report).into_diagnostic();
    }

    let token = shutdown_token()?;
    let summary = harvester.run(&ThreadScheduler::new(token))?;
    JsonOutput::print_summary(&summary).into_diagnostic()
}

/// The first Ctrl-C lets the current cycle finish; a second one exits at
/// once, which is safe because the cursor only moves after a full commit.
fn shutdown_token() -> miette::Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            warn!("second interrupt, exiting immediately");
            std::process::exit(130);
        }
        info!("shutdown requested, finishing current cycle");
        handler_token.cancel();
    })
    .into_diagnostic()?;
    Ok(token)
}

fn query_app(config: &ResolvedConfig) -> miette::Result<App<Arc<dyn SearchTool>, Arc<dyn KvStore>>> {
    let tool: Arc<dyn SearchTool> = Arc::new(BlastSearchTool::new(&config.search, &config.corpus));
    let kv = kv::open(&config.kv_url)?;
    Ok(App::new(tool, kv, &config.kv_keys))
}

