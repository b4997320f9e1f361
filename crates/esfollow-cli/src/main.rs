//! es-follow CLI
//!
//! Command-line interface for searching and tailing time-ordered documents
//! in an Elasticsearch-compatible backend.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use esfollow_client::{Auth, HttpBackend, DEFAULT_BASE_URL};
use esfollow_core::{
    ContextFetcher, FollowConfig, FollowEngine, FollowError, FollowStats, FormattingProcessor,
    PollEvent, Poller, SearchQuery,
};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Printed before every context group
const GROUP_SEPARATOR: &str = "#########";

#[derive(Parser)]
#[command(name = "es-follow")]
#[command(about = "es-follow - tail and search logs stored in Elasticsearch")]
#[command(version)]
struct Cli {
    /// URL to connect to
    #[arg(short, long, env = "ES_TAIL_CONNECT", global = true)]
    connect: Option<String>,

    /// Username for basic auth
    #[arg(short, long, env = "ES_TAIL_USERNAME", global = true)]
    username: Option<String>,

    /// Password for basic auth
    #[arg(short, long, env = "ES_TAIL_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Session cookie, replaces basic auth
    #[arg(long, env = "ES_TAIL_COOKIE", global = true, hide_env_values = true)]
    cookie: Option<String>,

    /// Document field holding the timestamp
    #[arg(long, env = "ES_TAIL_TIMESTAMP_FIELD", global = true)]
    timestamp_field: Option<String>,

    /// Config file (default: <config dir>/es-follow/config.yaml)
    #[arg(long, env = "ES_TAIL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Print debug logs to stderr
    #[arg(short, long, env = "ES_TAIL_VERBOSE", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search once, optionally with lines around every match
    Fetch(FetchArgs),

    /// Print new lines as they arrive
    Tail(TailArgs),
}

#[derive(Args)]
struct FetchArgs {
    /// Indexes to search, wildcards allowed
    #[arg(short, long)]
    index: Option<String>,

    /// Query in the Elasticsearch query-string syntax
    #[arg(short, long)]
    query: Option<String>,

    /// Start of the time range (e.g. now-1h)
    #[arg(short = 'F', long)]
    from_time: Option<String>,

    /// End of the time range (e.g. now)
    #[arg(short = 'T', long)]
    to_time: Option<String>,

    /// Lines of leading context per match
    #[arg(short = 'B', long, value_name = "NUM", default_value_t = 0)]
    num_before: usize,

    /// Lines of trailing context per match
    #[arg(short = 'A', long, value_name = "NUM", default_value_t = 0)]
    num_after: usize,

    /// Output format, e.g. "{@timestamp} {message}"
    #[arg(short, long)]
    format_string: Option<String>,
}

#[derive(Args)]
struct TailArgs {
    /// Indexes to follow, wildcards allowed
    #[arg(short, long)]
    index: Option<String>,

    /// Only follow lines matching this query
    #[arg(short, long)]
    query: Option<String>,

    /// Look this many seconds into the past for new lines
    #[arg(short = 't', long, value_name = "SECONDS")]
    timedelta: Option<u64>,

    /// Start with only the last NUM lines of the first poll
    #[arg(short, long, value_name = "NUM", default_value_t = 0)]
    number_of_lines: usize,

    /// Output format, e.g. "{@timestamp} {message}"
    #[arg(short, long)]
    format_string: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { config.log_level.as_str() })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Fetch(args) => cmd_fetch(&config, args),
        Commands::Tail(args) => cmd_tail(&config, args),
    }
}

/// Config file values, overridden by whatever was given on the command line
fn load_config(cli: &Cli) -> Result<FollowConfig> {
    let mut config = match &cli.config {
        Some(path) => FollowConfig::load_from(path)?,
        None => FollowConfig::load(),
    };

    if let Some(connect) = &cli.connect {
        config.connect = Some(connect.clone());
    }
    if let Some(username) = &cli.username {
        config.username = Some(username.clone());
    }
    if let Some(password) = &cli.password {
        config.password = Some(password.clone());
    }
    if let Some(cookie) = &cli.cookie {
        config.cookie = Some(cookie.clone());
    }
    if let Some(field) = &cli.timestamp_field {
        config.timestamp_field = field.clone();
    }

    Ok(config)
}

fn connect(config: &FollowConfig) -> Result<HttpBackend> {
    let url = config.connect.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let auth = Auth::from_parts(
        config.username.clone(),
        config.password.clone(),
        config.cookie.clone(),
    );

    tracing::debug!(url, user = ?config.username, "Connecting");
    HttpBackend::builder(url)
        .auth(auth)
        .timeout(config.request_timeout())
        .build()
        .with_context(|| format!("Cannot connect to {}", url))
}

/// Bad documents are reported and skipped; backend failures end the command
fn skip_bad_document(e: FollowError) -> Result<()> {
    if e.is_backend() {
        return Err(e).context("Backend request failed");
    }
    tracing::warn!("Skipping document: {}", e);
    Ok(())
}

fn cmd_fetch(config: &FollowConfig, args: FetchArgs) -> Result<()> {
    let format = args.format_string.as_deref().unwrap_or(&config.format_string);
    let processor = FormattingProcessor::new(format)?;

    let backend = connect(config)?;
    let fetcher = ContextFetcher::new(&backend).configured(config);

    let query = SearchQuery {
        query_string: args.query,
        from_time: args.from_time,
        to_time: args.to_time,
    };
    let with_context = args.num_before > 0 || args.num_after > 0;

    let groups = fetcher
        .search_surrounding(args.index.as_deref(), &query, args.num_before, args.num_after)
        .context("Search failed")?;

    let mut out = io::stdout().lock();
    for group in groups {
        let group = match group {
            Ok(group) => group,
            Err(e) => {
                skip_bad_document(e)?;
                continue;
            }
        };

        if with_context {
            writeln!(out, "{}", GROUP_SEPARATOR)?;
        }
        for line in group.iter() {
            writeln!(out, "{}", processor.format(line))?;
        }
    }

    out.flush()?;
    Ok(())
}

fn cmd_tail(config: &FollowConfig, args: TailArgs) -> Result<()> {
    let format = args.format_string.as_deref().unwrap_or(&config.format_string);
    let processor = FormattingProcessor::new(format)?;

    let secs = args.timedelta.unwrap_or(config.default_timedelta_secs);
    let window = chrono::Duration::from_std(std::time::Duration::from_secs(secs))
        .context("Timedelta out of range")?;

    let backend = connect(config)?;
    let mut engine = FollowEngine::new(&backend).configured(config);
    if let Some(query) = args.query {
        engine = engine.with_query(query);
    }

    let mut poller = Poller::new(engine, args.index, window, processor);
    let mut out = io::stdout().lock();

    if args.number_of_lines > 0 {
        let mut first = Vec::new();
        for event in poller.by_ref() {
            match event {
                Ok(PollEvent::Line(line)) => first.push(line),
                Ok(PollEvent::Idle) => break,
                Err(e) => skip_bad_document(e)?,
            }
        }

        for line in last_lines(&first, args.number_of_lines) {
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
        std::thread::sleep(config.poll_interval());
    }

    while let Some(event) = poller.next() {
        match event {
            Ok(PollEvent::Line(line)) => writeln!(out, "{}", line)?,
            Ok(PollEvent::Idle) => {
                out.flush()?;
                log_stats(poller.engine().stats());
                std::thread::sleep(config.poll_interval());
            }
            Err(e) => skip_bad_document(e)?,
        }
    }

    Ok(())
}

fn log_stats(stats: FollowStats) {
    tracing::debug!(
        queries = stats.queries,
        hits = stats.hits_seen,
        delivered = stats.delivered,
        duplicates = stats.duplicates_skipped,
        duplicate_rate = stats.duplicate_rate(),
        malformed = stats.malformed,
        pruned = stats.pruned,
        "follow stats"
    );
}

fn last_lines(lines: &[String], count: usize) -> &[String] {
    &lines[lines.len().saturating_sub(count)..]
}
