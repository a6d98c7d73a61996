//! CLI entry point for `mailfts`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use mailfts::config::{self, Config};
use mailfts::index::{IndexStore, OpenStatus};
use mailfts::model::address::format_list;
use mailfts::search::query::SearchScope;
use mailfts::store::MailCatalog;
use mailfts::worker::{
    self, AtomicGate, IndexWorker, JobOutcome, JobState, LocalScheduler, MessageCorpus, RunReport,
    JOB_NAME,
};

#[derive(Parser)]
#[command(
    name = "mailfts",
    version,
    about = "Full-text search over a directory of .eml files"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Index file to use instead of the configured one
    #[arg(long, global = true, value_name = "FILE", env = "MAILFTS_INDEX")]
    index: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the index up to date with the mail tree
    Index {
        root: PathBuf,
        /// Reindex every message
        #[arg(short, long)]
        force: bool,
    },
    /// Search indexed messages, newest first
    Search {
        root: PathBuf,
        /// Words, or +required -forbidden ?optional terms
        query: String,
        /// Restrict to one account directory
        #[arg(long)]
        account: Option<String>,
        /// Restrict to one folder (account/folder)
        #[arg(long)]
        folder: Option<String>,
        /// Leave out a folder (account/folder); repeatable
        #[arg(long, value_name = "FOLDER")]
        exclude: Vec<String>,
        /// Only messages received after this date (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_name = "DATE")]
        after: Option<String>,
        /// Only messages received before this date (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_name = "DATE")]
        before: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Complete a search term from the index vocabulary, rarest first
    Suggest {
        root: PathBuf,
        prefix: String,
        #[arg(long, default_value_t = 10)]
        max: usize,
    },
    /// Empty the index and mark every message for reindexing
    Reset { root: PathBuf },
    /// Compact the index
    Optimize { root: PathBuf },
    /// Show catalog and index statistics
    Stats {
        root: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config();
    if let Some(index) = cli.index {
        config.index.path = Some(index);
    }

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Index { root, force } => cmd_index(&config, &root, force),
        Commands::Search {
            root,
            query,
            account,
            folder,
            exclude,
            after,
            before,
            json,
        } => {
            let filters = Filters {
                account,
                folder,
                exclude,
                after,
                before,
            };
            cmd_search(&config, &root, &query, &filters, json)
        }
        Commands::Suggest { root, prefix, max } => cmd_suggest(&config, &root, &prefix, max),
        Commands::Reset { root } => cmd_reset(&config, &root),
        Commands::Optimize { root } => cmd_optimize(&config, &root),
        Commands::Stats { root, json } => cmd_stats(&config, &root, json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_file = config::log_file_path(config);
    let log_dir = log_file.parent().map(Path::to_path_buf).unwrap_or_default();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailfts.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailfts", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Resolve the mail root so the default index location is stable.
fn mail_root(root: &Path) -> anyhow::Result<PathBuf> {
    if !root.is_dir() {
        anyhow::bail!("Not a directory: {}", root.display());
    }
    Ok(root.canonicalize()?)
}

fn open_index(config: &Config, root: &Path) -> anyhow::Result<(IndexStore, OpenStatus)> {
    Ok(IndexStore::open(config::index_path(config, root))?)
}

/// Refresh the catalog, reconcile the index with it, and run the index job.
fn cmd_index(config: &Config, root: &Path, force: bool) -> anyhow::Result<()> {
    let root = mail_root(root)?;
    let start = Instant::now();

    let mut catalog = MailCatalog::open(&root)?;
    let refresh = catalog.refresh()?;
    let (mut store, status) = open_index(config, &root)?;

    if force || status.requires_rebuild() || catalog.is_fresh() {
        info!(?status, force, fresh = catalog.is_fresh(), "Rebuilding index");
        let writer = store.begin()?;
        writer.delete_all()?;
        writer.commit()?;
        catalog.reset_pending()?;
    } else {
        if !refresh.removed.is_empty() {
            let writer = store.begin()?;
            for &id in &refresh.removed {
                writer.delete(id)?;
            }
            writer.commit()?;
        }
        catalog.save()?;
    }

    let gate = Arc::new(AtomicGate::new(config.features.fts, config.features.entitled));
    let scheduler = LocalScheduler::new(config.scheduler.retry_policy());
    let indexer = IndexWorker::new(config.index.worker_options());

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Indexing [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let job_pb = pb.clone();
    let job_gate = Arc::clone(&gate);
    scheduler.register(JOB_NAME, move |scheduler| {
        let progress = |done: usize, total: usize| {
            job_pb.set_length(total as u64);
            job_pb.set_position(done as u64);
        };
        indexer.run(
            &mut store,
            &mut catalog,
            &*job_gate,
            Some(scheduler),
            Some(&progress),
        )
    });

    worker::init(&scheduler, &*gate, true, config.index.settle_delay());
    let state = loop {
        if let Some(state) = scheduler.wait_idle(JOB_NAME, Duration::from_secs(60)) {
            break state;
        }
    };
    pb.finish_and_clear();

    match (state, scheduler.last_outcome(JOB_NAME)) {
        (JobState::Completed, Some(JobOutcome::Completed(report))) => {
            print_index_summary(&report, start.elapsed());
            print_stats_table(config, &root)
        }
        (_, Some(JobOutcome::Failed(reason))) => anyhow::bail!("Indexing failed: {reason}"),
        _ => {
            println!("  Full-text indexing is disabled.");
            Ok(())
        }
    }
}

fn print_index_summary(report: &RunReport, elapsed: Duration) {
    println!();
    if report.skipped {
        println!("  Full-text indexing is disabled.");
        return;
    }
    println!("  {:<20} {}", "Indexed", report.indexed);
    if report.gone > 0 {
        println!("  {:<20} {}", "Gone", report.gone);
    }
    if report.failed > 0 {
        println!("  {:<20} {} (retried next run)", "Failed", report.failed);
    }
    if report.stopped_early {
        println!("  {:<20} yes", "Stopped early");
    }
    println!("  {:<20} {:.2?}", "Indexing time", elapsed);
}

/// Command-line search filters, by name.
struct Filters {
    account: Option<String>,
    folder: Option<String>,
    exclude: Vec<String>,
    after: Option<String>,
    before: Option<String>,
}

impl Filters {
    fn resolve(&self, catalog: &MailCatalog) -> anyhow::Result<SearchScope> {
        let folder_id = |name: &str| {
            catalog
                .folder_id(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown folder: {name}"))
        };

        Ok(SearchScope {
            account: self
                .account
                .as_deref()
                .map(|name| {
                    catalog
                        .account_id(name)
                        .ok_or_else(|| anyhow::anyhow!("Unknown account: {name}"))
                })
                .transpose()?,
            folder: self.folder.as_deref().map(folder_id).transpose()?,
            exclude_folders: self
                .exclude
                .iter()
                .map(|name| folder_id(name))
                .collect::<anyhow::Result<_>>()?,
            after: self.after.as_deref().map(parse_date_millis).transpose()?,
            before: self.before.as_deref().map(parse_date_millis).transpose()?,
        })
    }
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp into epoch millis.
fn parse_date_millis(input: &str) -> anyhow::Result<i64> {
    if let Ok(date) = chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().timestamp_millis());
        }
    }
    chrono::DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| anyhow::anyhow!("Invalid date '{input}': expected YYYY-MM-DD or RFC 3339"))
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// Search the index and print matching messages.
fn cmd_search(
    config: &Config,
    root: &Path,
    query: &str,
    filters: &Filters,
    json: bool,
) -> anyhow::Result<()> {
    let root = mail_root(root)?;
    let catalog = MailCatalog::open(&root)?;
    let (store, status) = open_index(config, &root)?;
    if status.requires_rebuild() {
        eprintln!("  The index is empty; run `mailfts index {}` first.", root.display());
    }

    let scope = filters.resolve(&catalog)?;
    let (_parsed_query, ids) = mailfts::search::execute(&store, query, scope)?;

    let mut messages = Vec::with_capacity(ids.len());
    for id in ids {
        // Entries can outlive their files until the next index run.
        if let Some(message) = catalog.get_message(id)? {
            messages.push(message);
        }
    }

    if json {
        let items: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.id,
                    "date": chrono::DateTime::from_timestamp_millis(m.time).map(|dt| dt.to_rfc3339()),
                    "folder": catalog.folder_name(m.folder),
                    "path": catalog.entry(m.id).map(|e| e.rel_path.as_str()),
                    "from": m.from,
                    "to": m.to,
                    "subject": m.subject,
                    "keywords": m.keywords,
                })
            })
            .collect();
        let output = serde_json::json!({
            "result_count": messages.len(),
            "results": items,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("  {} result(s)", messages.len());
    println!();
    if messages.is_empty() {
        return Ok(());
    }

    println!(
        "  {:<6} {:<17} {:<25} {:<40} {}",
        "Id", "Date", "From", "Subject", "Folder"
    );
    println!("  {}", "-".repeat(106));
    for m in &messages {
        let from: String = format_list(&m.from).chars().take(24).collect();
        let subject: String = m
            .subject
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(39)
            .collect();
        println!(
            "  {:<6} {:<17} {:<25} {:<40} {}",
            m.id,
            format_millis(m.time),
            from,
            subject,
            catalog.folder_name(m.folder).unwrap_or_default()
        );
    }
    println!();
    Ok(())
}

fn cmd_suggest(config: &Config, root: &Path, prefix: &str, max: usize) -> anyhow::Result<()> {
    let root = mail_root(root)?;
    let (store, _) = open_index(config, &root)?;
    for term in store.suggestions(prefix, max)? {
        println!("{term}");
    }
    Ok(())
}

fn cmd_reset(config: &Config, root: &Path) -> anyhow::Result<()> {
    let root = mail_root(root)?;
    let mut catalog = MailCatalog::open(&root)?;
    let (mut store, _) = open_index(config, &root)?;

    let writer = store.begin()?;
    writer.delete_all()?;
    writer.commit()?;
    store.optimize()?;
    catalog.reset_pending()?;

    println!(
        "  Index cleared; {} message(s) will be reindexed.",
        catalog.stats().pending
    );
    Ok(())
}

fn cmd_optimize(config: &Config, root: &Path) -> anyhow::Result<()> {
    let root = mail_root(root)?;
    let (store, _) = open_index(config, &root)?;
    let before = store.size();
    store.optimize()?;
    store.checkpoint()?;
    println!(
        "  Optimized: {} -> {}",
        format_size(before, BINARY),
        format_size(store.size(), BINARY)
    );
    Ok(())
}

fn cmd_stats(config: &Config, root: &Path, json: bool) -> anyhow::Result<()> {
    let root = mail_root(root)?;
    if !json {
        return print_stats_table(config, &root);
    }

    let catalog = MailCatalog::open(&root)?;
    let (store, _) = open_index(config, &root)?;
    let stats = serde_json::json!({
        "root": root.to_string_lossy(),
        "catalog": catalog.stats(),
        "index": {
            "path": store.path().to_string_lossy(),
            "entries": store.count()?,
            "size": store.size(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Print catalog and index statistics in a human-readable table.
fn print_stats_table(config: &Config, root: &Path) -> anyhow::Result<()> {
    let catalog = MailCatalog::open(root)?;
    let (store, _) = open_index(config, root)?;
    let stats = catalog.stats();

    println!();
    println!("  {:<20} {}", "Mail root", root.display());
    println!("  {:<20} {}", "Accounts", stats.accounts);
    println!("  {:<20} {}", "Folders", stats.folders);
    println!("  {:<20} {}", "Messages", stats.total);
    println!(
        "  {:<20} {} ({:.1}%)",
        "Indexed",
        stats.indexed,
        if stats.total == 0 {
            100.0
        } else {
            stats.indexed as f64 / stats.total as f64 * 100.0
        }
    );
    println!("  {:<20} {}", "Pending", stats.pending);
    println!("  {:<20} {}", "Index file", store.path().display());
    println!("  {:<20} {}", "Index entries", store.count()?);
    println!("  {:<20} {}", "Index size", format_size(store.size(), BINARY));
    println!();
    Ok(())
}
