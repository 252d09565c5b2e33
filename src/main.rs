use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, LoggingConfig, TurnstileConfig};
use turnstile::ratelimit::{Decision, RateLimiter, RequestEvent};

/// Replay request traffic through a Turnstile rate limiter.
#[derive(Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "turnstile.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate JSON-lines request events and print one decision per line
    Replay {
        /// Input file, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },
    /// Print the compiled bindings in evaluation order
    Bindings,
}

/// One line of replay input.
#[derive(Debug, Deserialize)]
struct ReplayEvent {
    client_address: IpAddr,
    #[serde(default)]
    headers: HashMap<String, String>,
    /// Raw `Cookie` header value
    #[serde(default)]
    cookie: Option<String>,
    /// Run a cookie preflight instead of a counted check
    #[serde(default)]
    preflight: bool,
}

impl ReplayEvent {
    fn into_request(self) -> RequestEvent {
        let mut event = RequestEvent::new(self.client_address);
        for (name, value) in self.headers {
            event = event.with_header(&name, value);
        }
        if let Some(cookie) = &self.cookie {
            event = event.with_cookie_header(cookie);
        }
        event
    }
}

#[derive(Debug, Serialize)]
struct ReplayOutcome {
    line: usize,
    #[serde(flatten)]
    decision: Option<Decision>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    set_cookie: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BindingSummary {
    index: usize,
    kind: String,
    max_count: u64,
    window_ms: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = TurnstileConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    init_tracing(&config.logging);

    info!("Starting Turnstile {}", env!("CARGO_PKG_VERSION"));

    let limiter = RateLimiter::from_config(&config.rate_limiting)
        .context("invalid rate limiting configuration")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Bindings => {
            for (index, binding) in limiter.bindings().iter().enumerate() {
                let summary = BindingSummary {
                    index,
                    kind: format!("{:?}", binding.strategy.kind()),
                    max_count: binding.window.max_count,
                    window_ms: binding.window.window_ms,
                };
                serde_json::to_writer(&mut out, &summary)?;
                writeln!(out)?;
            }
        }
        Command::Replay { input } => {
            let reader: Box<dyn BufRead> = if input == "-" {
                Box::new(BufReader::new(io::stdin()))
            } else {
                let file = File::open(&input).with_context(|| format!("failed to open {}", input))?;
                Box::new(BufReader::new(file))
            };

            let mut limited = 0usize;
            let mut total = 0usize;
            for (index, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let number = index + 1;
                let replay: ReplayEvent = serde_json::from_str(&line)
                    .with_context(|| format!("line {}: invalid request event", number))?;

                let preflight = replay.preflight;
                let mut event = replay.into_request();
                let decision = if preflight {
                    limiter.preflight(&mut event)?;
                    None
                } else {
                    let decision = limiter.check(&mut event)?;
                    total += 1;
                    if decision.limited {
                        limited += 1;
                    }
                    Some(decision)
                };

                let outcome = ReplayOutcome {
                    line: number,
                    decision,
                    set_cookie: event
                        .cookies()
                        .outgoing()
                        .iter()
                        .map(|cookie| cookie.to_header_value())
                        .collect(),
                };
                serde_json::to_writer(&mut out, &outcome)?;
                writeln!(out)?;
            }

            info!(total, limited, "Replay finished");
        }
    }

    Ok(())
}

/// Initialize tracing. `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
