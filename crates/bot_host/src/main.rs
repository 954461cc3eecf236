//! # bot_host
//!
//! Loads a scenario, drives a bot runtime on a fixed-timestep tick loop,
//! answers task-bearing actions as the scenario says, and prints every
//! non-empty tick output to stdout.
//!
//! ## Output
//!
//! - `json`: one JSON object per line.
//! - `msgpack`: concatenated MessagePack values.
//!
//! Logs go to stderr; filter them with `RUST_LOG`.

mod host;
mod scenario;
mod script;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bot_protocol::RuntimeOutput;
use bot_runtime::RuntimeConfig;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use host::{HostLoop, TickConfig};
use scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Msgpack,
}

#[derive(Parser)]
#[command(name = "bot_host", about = "Run a bot scenario on a fixed-timestep tick loop")]
struct Args {
    /// Scenario file (JSON)
    #[arg(short, long)]
    scenario: Option<PathBuf>,

    /// Runtime configuration file (JSON); overrides the scenario's config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of ticks to run
    #[arg(short, long, default_value_t = 600)]
    ticks: u64,

    /// Ticks per second
    #[arg(short = 'r', long, default_value_t = 60.0)]
    tick_rate: f64,

    /// Energy budget per tick; overrides the configuration
    #[arg(short, long)]
    energy: Option<i64>,

    /// Output encoding
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,

    /// Pace ticks to wall-clock time
    #[arg(long)]
    realtime: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let args = Args::parse();

    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::default(),
    };
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => scenario.config.clone().unwrap_or_default(),
    };
    if let Some(energy) = args.energy {
        config.energy = energy;
    }
    info!(
        energy = config.energy,
        spaces = ?config.spaces,
        ticks = args.ticks,
        tick_rate = args.tick_rate,
        "bot host starting"
    );

    let tick_config = TickConfig {
        tick_rate: args.tick_rate,
        max_ticks: args.ticks,
        realtime: args.realtime,
    };
    let host = HostLoop::new(tick_config, config, scenario)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let format = args.output;
    let last = host.run(|output| write_output(&mut out, format, output)).await?;
    if !last.is_empty() {
        write_output(&mut out, format, &last)?;
    }
    out.flush()?;

    info!("bot host shut down");
    Ok(())
}

/// Log directives used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "bot_host=info,bot_runtime=info";

/// `RUST_LOG` when it parses, the default directives otherwise.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn write_output(out: &mut impl Write, format: OutputFormat, output: &RuntimeOutput) -> Result<()> {
    match format {
        OutputFormat::Json => writeln!(out, "{}", bot_protocol::encode_json(output)?)?,
        OutputFormat::Msgpack => out.write_all(&bot_protocol::encode(output)?)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["bot_host"]);
        assert_eq!(args.ticks, 600);
        assert_eq!(args.tick_rate, 60.0);
        assert_eq!(args.output, OutputFormat::Json);
        assert!(!args.realtime);
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "bot_host", "--ticks", "5", "--energy", "10", "--output", "msgpack",
        ]);
        assert_eq!(args.ticks, 5);
        assert_eq!(args.energy, Some(10));
        assert_eq!(args.output, OutputFormat::Msgpack);
    }

    #[test]
    fn test_rust_log_overrides_default_levels() {
        let filter = log_filter(Some("bot_runtime=debug")).to_string();
        assert!(filter.contains("bot_runtime=debug"));
        assert!(!filter.contains("bot_runtime=info"));
    }

    #[test]
    fn test_default_log_filter_without_rust_log() {
        let filter = log_filter(None).to_string();
        assert!(filter.contains("bot_host=info"));
        assert!(filter.contains("bot_runtime=info"));
    }

    #[test]
    fn test_json_output_is_one_line() {
        let mut buf = Vec::new();
        let output = RuntimeOutput {
            tick: 3,
            ..RuntimeOutput::default()
        };
        write_output(&mut buf, OutputFormat::Json, &output).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"tick\":3"));
    }
}
