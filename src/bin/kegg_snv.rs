use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kegg_snv::app::App;
use kegg_snv::cache::{EntityCache, FsStorage};
use kegg_snv::config::{Config, ConfigLoader};
use kegg_snv::domain::{GeneId, NetworkId, NetworkType};
use kegg_snv::error::SnvError;
use kegg_snv::export;
use kegg_snv::kegg::{KeggApi, KeggHttpClient};
use kegg_snv::snv::SnvFilter;

#[derive(Parser)]
#[command(name = "kegg-snv")]
#[command(about = "KEGG gene/pathway cache and nonsynonymous SNV enumeration")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download and cache every gene of the configured organism")]
    InitGenome {
        /// Re-fetch genes that are already cached
        #[arg(long)]
        recalc: bool,
    },
    #[command(about = "Enumerate SNVs for one gene")]
    Gene {
        id: String,
        #[command(flatten)]
        output: OutputArgs,
    },
    #[command(about = "Enumerate SNVs across a pathway or module")]
    Network {
        id: String,
        #[arg(long, value_enum)]
        kind: NetworkType,
        #[command(flatten)]
        output: OutputArgs,
    },
    #[command(about = "List all pathways of the configured organism")]
    Pathways,
    #[command(about = "List all modules")]
    Modules,
}

#[derive(Args, Clone)]
struct OutputArgs {
    #[arg(long)]
    out: Utf8PathBuf,

    /// Keep synonymous substitutions in the output
    #[arg(long)]
    keep_synonymous: bool,

    /// Keep stop-introducing substitutions in the output
    #[arg(long)]
    keep_nonsense: bool,
}

impl OutputArgs {
    fn filter(&self) -> SnvFilter {
        SnvFilter {
            exclude_synonymous: !self.keep_synonymous,
            exclude_nonsense: !self.keep_nonsense,
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SnvError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SnvError) -> u8 {
    match error {
        SnvError::InvalidGeneId(_)
        | SnvError::InvalidNetworkId(_)
        | SnvError::InvalidNetworkType(_)
        | SnvError::MissingConfig(_) => 2,
        SnvError::KeggHttp(_)
        | SnvError::KeggStatus { .. }
        | SnvError::EmptyResponse(_) => 3,
        SnvError::MissingEntry
        | SnvError::SequenceLengthMismatch { .. }
        | SnvError::CacheCorrupt { .. } => 4,
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
    let app = build_app(&config)?;

    match cli.command {
        Commands::InitGenome { recalc } => {
            let summary = app.init_genome(recalc)?;
            println!(
                "genome cache ready: {} genes total, {} newly fetched, {} already cached",
                summary.total, summary.created, summary.skipped
            );
        }
        Commands::Gene { id, output } => {
            let id: GeneId = id.parse()?;
            let variants = app.gene_snvs(&id, output.filter())?;
            export::write_variants(&output.out, &variants)?;
            println!("{} variants written to {}", variants.len(), output.out);
        }
        Commands::Network { id, kind, output } => {
            let id: NetworkId = id.parse()?;
            let variants = app.network_snvs(&id, kind, output.filter())?;
            export::write_variants(&output.out, &variants)?;
            println!("{} variants written to {}", variants.len(), output.out);
        }
        Commands::Pathways => {
            for (id, description) in app.list_pathways()? {
                println!("{id}\t{description}");
            }
        }
        Commands::Modules => {
            for (id, description) in app.list_modules()? {
                println!("{id}\t{description}");
            }
        }
    }
    Ok(())
}

fn build_app(config: &Config) -> miette::Result<App<KeggHttpClient, FsStorage>> {
    let client = KeggHttpClient::new(config)?;
    let api = KeggApi::new(client, config);
    let storage = FsStorage::new(config.resolved_cache_root()?);
    let cache = EntityCache::new(api, storage, config.workers);
    Ok(App::new(cache, config))
}
