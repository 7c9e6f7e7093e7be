mod config;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use conceptcards_core::{
    export_jsonl, Analyzer, Book, BookAnalysis, BookId, EngineConfig, FileStore, Interchange,
    ResultCache, SystemClock,
};

use crate::config::{load_config, DEFAULT_CONFIG};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const VERSION_LONG: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CONCEPT_CARDS_BUILD"),
    ")"
);

#[derive(Parser, Debug)]
#[command(
    name = "concept-cards",
    version = VERSION,
    long_version = VERSION_LONG,
    about = "Chapter concept cards and cross-references for technical books"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a book and write its concept cards.
    Analyze {
        input: PathBuf,
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[arg(long, action = ArgAction::SetTrue)]
        jsonl: bool,
        #[arg(long = "no-cache", action = ArgAction::SetTrue)]
        no_cache: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        quiet: bool,
    },
    /// Print the content hash that identifies a book in the cache.
    BookId { input: PathBuf },
    /// Show the concepts one chapter shares with a later one.
    Xref {
        input: PathBuf,
        earlier: u32,
        later: u32,
    },
    /// Print the effective configuration as TOML.
    ShowConfig,
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Delete expired entries.
    Prune,
    /// Delete every entry of one book.
    Invalidate { book_id: String },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut config = load_config(&config_path)?;

    match cli.command {
        Commands::Analyze {
            input,
            out,
            jsonl,
            no_cache,
            quiet,
        } => {
            if no_cache {
                config.cache.enabled = false;
            }
            let book = load_book(&input)?;
            let analyzer = Analyzer::new(config.clone(), config.cache.open());
            let analysis = analyzer.analyze(&book)?;
            let document = Interchange::from_analysis(&analysis);

            fs::create_dir_all(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            let json_path = out.join(format!("{}.cards.json", book.id));
            document
                .save_json(&json_path)
                .with_context(|| format!("failed to write {}", json_path.display()))?;
            info!(path = %json_path.display(), "wrote interchange document");
            if jsonl {
                let jsonl_path = out.join(format!("{}.cards.jsonl", book.id));
                let records = export_jsonl(&document, &jsonl_path)
                    .with_context(|| format!("failed to write {}", jsonl_path.display()))?;
                info!(path = %jsonl_path.display(), records, "wrote jsonl export");
            }
            if !quiet {
                print_summary(&analysis, &json_path);
                let stats = analyzer.cache().stats();
                println!(
                    "cache: {} hit(s), {} miss(es), {} expired, {} error(s), {} write(s)",
                    stats.hits, stats.misses, stats.expired, stats.errors, stats.writes
                );
            }
        }
        Commands::BookId { input } => {
            let book = load_book(&input)?;
            println!("{}", book.id);
        }
        Commands::Xref {
            input,
            earlier,
            later,
        } => {
            let book = load_book(&input)?;
            let analysis = Analyzer::new(config.clone(), config.cache.open()).analyze(&book)?;
            let reference = analysis.cross_reference(earlier, later)?;
            println!("{}", serde_json::to_string_pretty(reference)?);
        }
        Commands::ShowConfig => {
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| anyhow!("failed to render config: {e}"))?;
            print!("{rendered}");
        }
        Commands::Cache(command) => {
            let cache = open_file_cache(&config)?;
            match command {
                CacheCommand::Prune => {
                    let removed = cache.prune_expired();
                    println!(
                        "pruned {removed} expired entr{} from {}",
                        if removed == 1 { "y" } else { "ies" },
                        config.cache.dir.display()
                    );
                }
                CacheCommand::Invalidate { book_id } => {
                    let book = BookId::parse(&book_id)?;
                    let removed = cache.invalidate(&book);
                    println!("removed {removed} cached result(s) for {}", book.short());
                }
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_book(path: &Path) -> Result<Book> {
    Book::load_json(path).with_context(|| format!("failed to load book {}", path.display()))
}

// Maintenance commands act on the directory even when analysis caching is
// switched off.
fn open_file_cache(config: &EngineConfig) -> Result<ResultCache> {
    let store = FileStore::open(&config.cache.dir)
        .with_context(|| format!("failed to open cache {}", config.cache.dir.display()))?;
    Ok(ResultCache::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.cache.ttl(),
        config.cache.stage_version.clone(),
    ))
}

fn print_summary(analysis: &BookAnalysis, json_path: &Path) {
    println!(
        "{} ({} chapter(s), {} concept(s)) -> {}",
        analysis.title.as_deref().unwrap_or("untitled"),
        analysis.chapters.len(),
        analysis.indexed_keys().len(),
        json_path.display()
    );
    for chapter in &analysis.chapters {
        let top: Vec<&str> = chapter
            .index
            .concepts
            .iter()
            .take(5)
            .map(|c| c.display_form.as_str())
            .collect();
        let builds_on = analysis.backward_references(chapter.chapter.index).count();
        println!(
            "  [{}] {}: {} (builds on {} chapter(s))",
            chapter.chapter.index,
            chapter.title.as_deref().unwrap_or("-"),
            if top.is_empty() {
                "no concepts".to_string()
            } else {
                top.join(", ")
            },
            builds_on
        );
    }
}
