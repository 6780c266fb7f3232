use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use proxy_geosort::{
    country::{countries, resolve_country},
    output::{message_header, save_to_file, MessageBatcher},
    CheckMode, CheckerConfig, ClassificationPipeline, Config, ConfigParser, GeoConfig,
    PipelineConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Sort proxy config lines by the country of their endpoint
#[derive(Parser)]
#[command(name = "proxy-geosort")]
#[command(about = "Sort proxy config lines by the country of their endpoint")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable progress and chat-sized result messages
    Text,
    /// One JSON object per line on stdout
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the lines whose endpoint is in the given country
    Classify {
        /// Input file with one config line per line
        input: PathBuf,
        /// Country name, ISO code or alias (e.g. "Japan", "jp", "Япония")
        #[arg(short, long)]
        country: String,
        /// Verify candidates through DNS and IP geolocation
        #[arg(short, long)]
        strict: bool,
        /// Output file for matched lines
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Lines per strict-pass chunk
        #[arg(long, default_value = "100")]
        chunk_size: usize,
        /// Concurrent verifications per chunk
        #[arg(short = 'n', long, default_value = "8")]
        workers: usize,
        /// Lines beyond this count are dropped
        #[arg(long, default_value = "50000")]
        max_lines: usize,
        /// Strict-pass candidate cap
        #[arg(long, default_value = "1000")]
        max_candidates: usize,
        /// Input size limit in bytes
        #[arg(long, default_value = "15728640")]
        max_bytes: usize,
        /// Geolocation service base URL
        #[arg(long, default_value = "http://ip-api.com/json")]
        geoip_url: String,
        /// Use a local MaxMind database instead of the HTTP service
        #[arg(long)]
        mmdb: Option<String>,
        /// Geolocation timeout in seconds
        #[arg(long, default_value = "3")]
        timeout: u64,
        /// DNS timeout in seconds
        #[arg(long, default_value = "5")]
        dns_timeout: u64,
        /// Also stop between lines of a chunk on Ctrl-C
        #[arg(long)]
        fine_grained_cancel: bool,
        /// Result format on stdout
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show protocol, endpoint and structural validity of each line
    Inspect {
        /// Input file with one config line per line
        input: PathBuf,
        /// Report format on stdout
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// List the countries that can be targeted
    Countries,
}

fn init_logging(verbose: bool, format: LogFormat) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Classify {
            input,
            country,
            strict,
            output,
            chunk_size,
            workers,
            max_lines,
            max_candidates,
            max_bytes,
            geoip_url,
            mmdb,
            timeout,
            dns_timeout,
            fine_grained_cancel,
            format,
        } => {
            let text = format == OutputFormat::Text;
            let target = resolve_country(&country)?;

            let mut geo = GeoConfig::new()
                .with_base_url(geoip_url)
                .with_timeout(Duration::from_secs(timeout));
            if let Some(path) = mmdb {
                geo = geo.with_mmdb_path(path);
            }
            let config = Config::new()
                .with_pipeline(
                    PipelineConfig::new()
                        .with_max_lines(max_lines)
                        .with_max_input_bytes(max_bytes)
                        .with_max_candidates(max_candidates),
                )
                .with_checker(
                    CheckerConfig::new()
                        .with_chunk_size(chunk_size)
                        .with_concurrency(workers)
                        .with_dns_timeout(Duration::from_secs(dns_timeout))
                        .with_fine_grained_cancel(fine_grained_cancel),
                )
                .with_geo(geo);

            let pipeline = ClassificationPipeline::from_config(&config)?;
            let bytes = std::fs::read(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let lines = pipeline.ingest(&bytes)?;

            let mode = if strict { CheckMode::Strict } else { CheckMode::Fast };
            if text {
                println!("Loaded {} lines from {:?}", lines.len(), input);
                println!("Target: {}, mode: {:?}", target, mode);
                if strict {
                    println!("Checking with {} workers, chunks of {}", workers, chunk_size);
                }
                println!();
            }

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing the current chunk");
                    ctrl_c.cancel();
                }
            });

            let report = pipeline
                .classify(lines, &target, mode, &cancel, |progress| {
                    if !text {
                        return;
                    }
                    println!(
                        "[{}/{}] +{} matches ({} total, {:.1}s)",
                        progress.chunk_index + 1,
                        progress.total_chunks,
                        progress.chunk_matches.len(),
                        progress.matches_so_far,
                        progress.elapsed.as_secs_f64()
                    );
                })
                .await;

            let matches = report.matches();
            info!(
                matches = matches.len(),
                total_lines = report.total_lines,
                blank_lines = report.blank_lines,
                dropped_lines = report.dropped_lines,
                elapsed_ms = report.elapsed.as_millis() as u64,
                cancelled = report.is_cancelled(),
                "results"
            );
            if text {
                println!(
                    "Results: {} matches from {} lines ({} blank, {} dropped) in {:.1}s{}",
                    matches.len(),
                    report.total_lines,
                    report.blank_lines,
                    report.dropped_lines,
                    report.elapsed.as_secs_f64(),
                    if report.is_cancelled() { ", cancelled" } else { "" }
                );
            }
            let (lines_cached, hosts_cached, ips_cached) = pipeline.cache().sizes();
            info!(lines_cached, hosts_cached, ips_cached, "cache sizes");

            if let Some(output_path) = output {
                save_to_file(&matches, &output_path)?;
                info!(path = ?output_path, saved = matches.len(), "matches saved");
            } else if !text {
                for outcome in &report.outcomes {
                    println!("{}", serde_json::to_string(outcome)?);
                }
            } else if matches.is_empty() {
                println!("No configs found for {}", target.canonical_name);
            } else {
                let batcher = MessageBatcher::new(message_header(&target));
                for message in batcher.batch(&matches) {
                    println!("{}", message);
                }
            }
        }
        Commands::Inspect { input, format } => {
            let content = std::fs::read(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;

            for report in ConfigParser::inspect(&String::from_utf8_lossy(&content)) {
                if format == OutputFormat::Json {
                    println!("{}", serde_json::to_string(&report)?);
                    continue;
                }
                let endpoint = report
                    .endpoint
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let valid = if report.valid { "valid" } else { "invalid" };
                println!(
                    "{:>5}  {:<7} {:<40} {}",
                    report.line_number,
                    report.protocol.to_string(),
                    endpoint,
                    valid
                );
            }
        }
        Commands::Countries => {
            for entry in countries() {
                let mut codes = vec![entry.code];
                codes.extend(entry.alternate_codes);
                println!("{:<16} {}", entry.name, codes.join(", ").to_uppercase());
            }
        }
    }

    Ok(())
}
