//! exprepo CLI: post-coordinated expression repository.

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use exprepo::config::{RepositoryConfig, default_data_dir};
use exprepo::id::ExpressionId;
use exprepo::repository::Repository;

#[derive(Parser)]
#[command(name = "exprepo", version, about = "Post-coordinated expression repository")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistent storage (default: $XDG_DATA_HOME/exprepo).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep everything in memory; nothing is written to disk.
    #[arg(long, global = true, conflicts_with = "data_dir")]
    memory: bool,

    /// Ontology file of precoordinated concepts.
    #[arg(long, global = true)]
    ontology: Option<PathBuf>,

    /// Classifier timeout in milliseconds (0 disables it).
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an expression to its id, storing it if new.
    Resolve {
        /// Expression text, e.g. "64572001 : 363698007 = 80891009".
        expression: String,
    },

    /// Evaluate a query, e.g. "<< 404684003 OR 73211009".
    Query { query: String },

    /// Direct parents of an id.
    Parents { id: u64 },

    /// Direct children of an id.
    Children { id: u64 },

    /// All ancestors of an id.
    Ancestors { id: u64 },

    /// All descendants of an id.
    Descendants { id: u64 },

    /// Render an id back to expression text.
    Text { id: u64 },

    /// Print the canonical form of an expression without storing it.
    Canonical { expression: String },

    /// Show repository info and statistics.
    Info,

    /// Export concepts and stored expressions as JSON.
    Export,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Canonical { expression } = &cli.command {
        let form = exprepo::expression::parse_expression(expression)
            .map(|e| exprepo::expression::canonicalize(&e))?;
        println!("{form}");
        return Ok(());
    }

    let repo = Repository::open(build_config(&cli)?)?;

    match cli.command {
        Commands::Resolve { expression } => {
            let id = repo.resolve_expression_id(&expression)?;
            println!("{id}");
        }

        Commands::Query { query } => {
            let ids = repo.run_query(&query)?;
            print_ids(&repo, &ids);
        }

        Commands::Parents { id } => print_ids(&repo, &repo.parents(parse_id(id)?)?),
        Commands::Children { id } => print_ids(&repo, &repo.children(parse_id(id)?)?),
        Commands::Ancestors { id } => print_ids(&repo, &repo.ancestors(parse_id(id)?)?),
        Commands::Descendants { id } => print_ids(&repo, &repo.descendants(parse_id(id)?)?),

        Commands::Text { id } => {
            let text = repo.expression_text(parse_id(id)?)?;
            println!("{text}");
        }

        Commands::Info => {
            println!("{}", repo.info());
            println!("bootstrap: {}", repo.bootstrap_report());
        }

        Commands::Export => {
            let export = repo.export()?;
            println!("{}", export.to_json().into_diagnostic()?);
        }

        Commands::Canonical { .. } => unreachable!("handled before opening the repository"),
    }

    Ok(())
}

/// Config file first, then command-line overrides.
fn build_config(cli: &Cli) -> Result<RepositoryConfig> {
    let mut config = match &cli.config {
        Some(path) => RepositoryConfig::load(path)?,
        None => RepositoryConfig::default(),
    };

    if cli.memory {
        config.store.data_dir = None;
    } else if let Some(dir) = &cli.data_dir {
        config.store.data_dir = Some(dir.clone());
    } else if config.store.data_dir.is_none() {
        config.store.data_dir = Some(default_data_dir()?);
    }
    if let Some(path) = &cli.ontology {
        config.ontology.path = Some(path.clone());
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.classifier.timeout_ms = timeout_ms;
    }
    Ok(config)
}

fn parse_id(raw: u64) -> Result<ExpressionId> {
    ExpressionId::new(raw).ok_or_else(|| miette::miette!("expression ids are positive; got 0"))
}

fn print_ids(repo: &Repository, ids: &BTreeSet<ExpressionId>) {
    if ids.is_empty() {
        println!("(none)");
        return;
    }
    for id in ids {
        match repo.term(*id) {
            Some(term) => println!("{id} |{term}|"),
            None => println!("{id}"),
        }
    }
}
