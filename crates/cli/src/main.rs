use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use pocket_protocol::{ScoredResult, TagFilter};
use pocket_search::{HashingEmbedder, ItemSource, MemoryItemStore, SearchConfig, SearchEngine};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod items;

#[derive(Parser)]
#[command(name = "pocket-search")]
#[command(about = "Multi-modal search over a personal knowledge base", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON file holding the items to search
    #[arg(short, long, global = true, default_value = "items.json")]
    items: PathBuf,

    /// TOML configuration file (POCKET_SEARCH_* variables still apply on top)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search items (modes: substr, fts, glob, regex, exact, vector, hybrid)
    Search(SearchArgs),

    /// Look an item up by id or slug, tolerating typos
    Resolve(ResolveArgs),

    /// Suggest tags for a piece of text
    #[command(name = "suggest-tags")]
    SuggestTags(SuggestTagsArgs),

    /// Generate embeddings for every item and optionally write them back
    Embed(EmbedArgs),

    /// Show vector index and cache statistics
    Stats(StatsArgs),
}

#[derive(Args)]
struct SearchArgs {
    query: String,

    #[arg(short, long, default_value = "hybrid")]
    mode: String,

    /// Required tag (repeatable; all must match)
    #[arg(short, long = "tag")]
    tags: Vec<String>,

    #[arg(short, long)]
    limit: Option<usize>,

    /// Embed items lacking an embedding before searching
    #[arg(long)]
    embed: bool,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ResolveArgs {
    query: String,

    /// Minimum similarity for a fuzzy match (default from config)
    #[arg(short, long)]
    threshold: Option<f32>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SuggestTagsArgs {
    text: String,

    /// Tag the text already has (repeatable)
    #[arg(short, long = "existing")]
    existing: Vec<String>,

    #[arg(short, long)]
    limit: Option<usize>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct EmbedArgs {
    /// Model to embed with (default from config)
    #[arg(long)]
    model: Option<String>,

    /// Store the embeddings in the items file
    #[arg(long)]
    write: bool,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct StatsArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct SearchHit<'a> {
    id: &'a str,
    score: f32,
    slug: String,
    sources: Vec<pocket_protocol::MatchSource>,
    text: &'a str,
}

impl<'a> From<&'a ScoredResult> for SearchHit<'a> {
    fn from(result: &'a ScoredResult) -> Self {
        Self {
            id: &result.item.id,
            score: result.score,
            slug: result.item.slug().into_owned(),
            sources: result.sources().collect(),
            text: &result.item.text,
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn load_config(path: Option<&Path>) -> Result<SearchConfig> {
    let base = match path {
        Some(path) => SearchConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SearchConfig::default(),
    };
    base.apply_env().context("Invalid POCKET_SEARCH_* override")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(72).collect();
    if line.chars().count() > 72 || text.lines().nth(1).is_some() {
        out.push('…');
    }
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = load_config(cli.config.as_deref())?;
    let items = items::load_items(&cli.items)?;
    let store = Arc::new(MemoryItemStore::from_items(items));
    let embedder = Arc::new(HashingEmbedder::new(
        config.model_id.clone(),
        config.embedding_dimension,
    ));
    let engine = SearchEngine::new(config, store.clone(), embedder)?;
    engine.rebuild_vector_index().await?;

    let outcome = run(cli.command, &cli.items, &engine, &store).await;
    engine.shutdown();
    outcome
}

async fn run(
    command: Commands,
    items_path: &Path,
    engine: &SearchEngine,
    store: &MemoryItemStore,
) -> Result<()> {
    match command {
        Commands::Search(args) => {
            if args.embed {
                engine
                    .generate_embeddings(&engine.config().model_id)
                    .await?;
            }
            let tags = TagFilter::new(&args.tags);
            let results = engine
                .search_str(&args.mode, &args.query, &tags, args.limit)
                .await?;
            let hits: Vec<SearchHit<'_>> = results.iter().map(SearchHit::from).collect();
            if args.json {
                return print_json(&hits);
            }
            if hits.is_empty() {
                println!("No results for '{}'", args.query);
            }
            for hit in hits {
                let sources: Vec<&str> = hit.sources.iter().map(|s| s.as_str()).collect();
                println!(
                    "{:.3}  {:<24} [{}]  {}",
                    hit.score,
                    hit.id,
                    sources.join(","),
                    preview(hit.text)
                );
            }
        }
        Commands::Resolve(args) => {
            let item = engine.resolve_by_slug(&args.query, args.threshold).await?;
            if args.json {
                return print_json(&item);
            }
            println!("{}  {}  {}", item.id, item.slug(), preview(&item.text));
        }
        Commands::SuggestTags(args) => {
            let suggestions = engine
                .suggest_tags(&args.text, &args.existing, args.limit)
                .await?;
            if args.json {
                return print_json(&suggestions);
            }
            for suggestion in suggestions {
                println!(
                    "{:<24} {:.2}  {}",
                    suggestion.tag, suggestion.score, suggestion.reason
                );
            }
        }
        Commands::Embed(args) => {
            let model = args
                .model
                .unwrap_or_else(|| engine.config().model_id.clone());
            let report = engine.generate_embeddings(&model).await?;
            if args.write {
                let items = store.list_items(&TagFilter::any()).await?;
                items::save_items(items_path, &items)?;
                log::info!("Wrote {} items to {}", items.len(), items_path.display());
            }
            if args.json {
                return print_json(&report);
            }
            println!(
                "{}: {} embedded, {} reused, {} failed",
                report.model_id, report.embedded, report.reused, report.failed
            );
        }
        Commands::Stats(args) => {
            #[derive(Serialize)]
            struct Stats {
                items: usize,
                index: pocket_search::IndexStats,
                caches: pocket_cache::CacheManagerStats,
            }
            let stats = Stats {
                items: store.len(),
                index: engine.index_stats(),
                caches: engine.cache_stats(),
            };
            if args.json {
                return print_json(&stats);
            }
            println!(
                "items: {}\nindex: {} vectors ({}, dim {})",
                stats.items, stats.index.vectors, stats.index.model_id, stats.index.dimension
            );
            for cache in [&stats.caches.embeddings, &stats.caches.results, &stats.caches.patterns] {
                println!(
                    "cache {:<10} {}/{} entries, hit rate {:.2}, {} evictions",
                    cache.name, cache.entries, cache.capacity, cache.hit_rate, cache.evictions
                );
            }
        }
    }
    Ok(())
}
