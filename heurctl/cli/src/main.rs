//! heurctl - Terminal Front End for Remote Optimization Jobs
//!
//! Connects to the job server, reads commands from stdin and prints
//! notices, progress and the connection indicator to stdout. Logs go to
//! stderr.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (ws://localhost:8000/ws)
//! heurctl
//!
//! # Another server, more patience
//! heurctl --url ws://optimizer.lab:8000/ws --max-retries 10
//!
//! # Verbose logging
//! RUST_LOG=debug heurctl
//! ```

mod input;
mod render;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use heurctl_core::{
    default_config_path, load_config_from_path, ClientConfigFile, ClientInput, ClientStatus,
    ConfigOverrides, FileConfigStore, FnData, JobClient, NoticeEvent, NoticeId, Transport,
    WebSocketConnector,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

use input::{parse_line, Action, HELP};

/// heurctl - control remote heuristic-optimization jobs
#[derive(Parser, Debug)]
#[command(name = "heurctl")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Job server endpoint (ws:// or wss://)
    #[arg(short = 'u', long, value_name = "URL")]
    url: Option<String>,

    /// Reconnect attempts before giving up
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Delay before the first reconnect; doubles per attempt
    #[arg(long, value_name = "MS")]
    initial_delay_ms: Option<u64>,

    /// Directory for the persisted configuration cache
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "HEURCTL_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "HEURCTL_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref url) = self.url {
            overrides = overrides.with_url(url.clone());
        }
        if let Some(retries) = self.max_retries {
            overrides = overrides.with_max_retries(retries);
        }
        if let Some(ms) = self.initial_delay_ms {
            overrides = overrides.with_initial_delay_ms(ms);
        }
        if let Some(ref dir) = self.cache_dir {
            overrides = overrides.with_cache_dir(dir.clone());
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("heurctl={level},heurctl_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(args: &Args) -> Result<ClientConfigFile> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = resolve_config(&args)?;
    info!(
        url = %config.transport.url,
        cache_dir = %config.cache_dir.display(),
        source = %config.source(),
        "heurctl starting"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: ClientConfigFile) -> Result<()> {
    let store = FileConfigStore::new(config.cache_dir.clone());
    let transport = Transport::new(config.transport.clone(), WebSocketConnector);
    let mut client = JobClient::new(transport, store, config.notice_ttl);

    let status = client.watch_status();
    let notices = client.notices().subscribe();
    let (tx, rx) = mpsc::channel(32);

    println!("{HELP}");
    let (client_result, front_result) =
        tokio::join!(client.run(rx), front_end(tx, status, notices));
    client_result?;
    front_result
}

/// Read commands from stdin and print what the client publishes
async fn front_end(
    tx: mpsc::Sender<ClientInput>,
    mut status: watch::Receiver<ClientStatus>,
    mut notices: broadcast::Receiver<NoticeEvent>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown: Vec<NoticeId> = Vec::new();
    let mut last = status.borrow().clone();
    println!("link: {}", render::indicator(&last.link));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    let _ = tx.send(ClientInput::Shutdown).await;
                    break;
                };
                let current = status.borrow().clone();
                match parse_line(&line) {
                    Ok(Action::Client(ClientInput::Shutdown)) => {
                        let _ = tx.send(ClientInput::Shutdown).await;
                        break;
                    }
                    Ok(Action::Client(request)) => {
                        if tx.send(request).await.is_err() {
                            break;
                        }
                    }
                    Ok(Action::Custom { path, bounds }) => match load_custom(&path, bounds) {
                        Ok(function) => {
                            println!("custom function `{}` selected", function.name);
                            if tx.send(ClientInput::SelectCustom(function)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => println!("{e:#}"),
                    },
                    Ok(Action::DismissLatest) => {
                        if let Some(id) = shown.pop() {
                            let _ = tx.send(ClientInput::Dismiss(id)).await;
                        }
                    }
                    Ok(Action::Status) => println!("{}", render::status(&current)),
                    Ok(Action::Algorithms) => println!("{}", render::algorithms(&current)),
                    Ok(Action::Functions) => println!("{}", render::functions(&current)),
                    Ok(Action::Help) => println!("{HELP}"),
                    Ok(Action::Nothing) => {}
                    Err(message) => println!("{message}"),
                }
            }
            event = notices.recv() => match event {
                Ok(NoticeEvent::Shown(notice)) => {
                    println!("{}", render::notice(&notice));
                    shown.push(notice.id);
                }
                Ok(NoticeEvent::Expired(id) | NoticeEvent::Dismissed(id)) => {
                    shown.retain(|s| *s != id);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed notices");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = status.borrow_and_update().clone();
                print_changes(&last, &next);
                last = next;
            }
        }
    }
    Ok(())
}

fn print_changes(last: &ClientStatus, next: &ClientStatus) {
    let (was, now) = (render::indicator(&last.link), render::indicator(&next.link));
    if was != now {
        println!("link: {now}");
    }
    if last.session != next.session {
        println!("job: {}", next.session);
    }
    if last.progress != next.progress {
        println!("progress: {}", render::progress(next));
    }
}

fn load_custom(path: &Path, bounds: Option<(f64, f64)>) -> Result<FnData> {
    let code = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    FnData::custom(code, bounds).with_context(|| format!("No usable function in {}", path.display()))
}
