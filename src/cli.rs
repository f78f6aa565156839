//! Command-line front end.

use crate::config::{Config, PacingConfig};
use crate::error::Error;
use crate::present::{self, PresentEvent, TerminalSurface};
use crate::reassemble::Segment;
use crate::session::{Outcome, Relay, Transcript};
use crate::transport::{Connector, HttpConnector, InvocationParams, ReplayConnector};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;

/// Stream agent responses into the terminal
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Invoke an agent and stream its response
    Invoke(InvokeArgs),
    /// Play back a captured event stream
    Replay(ReplayArgs),
    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,

    /// Show characters as they arrive, without pacing delays
    #[arg(long)]
    pub no_pacing: bool,
}

#[derive(Parser, Debug)]
pub struct InvokeArgs {
    /// Agent identifier
    pub agent: String,

    /// Message to send
    pub message: String,

    /// Conversation thread
    #[arg(short, long, default_value = "1")]
    pub thread: String,

    /// Model name sent with the request
    #[arg(short, long)]
    pub model: Option<String>,

    /// Image path forwarded to the agent
    #[arg(long)]
    pub image: Option<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Captured event-stream file
    pub file: PathBuf,

    /// Bytes delivered per read
    #[arg(long)]
    pub chunk_bytes: Option<usize>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show config file path
    Path,
    /// Print the effective configuration
    Show,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Styled, paced terminal output
    #[default]
    Text,
    /// One JSON summary once the stream ends
    Json,
}

#[derive(Serialize)]
struct Summary<'a> {
    outcome: &'static str,
    text: String,
    raw_text: &'a str,
    status: Option<&'a str>,
    caption: Option<&'a str>,
    final_answer: Option<&'a str>,
    tools: Vec<String>,
    blocks: Vec<BlockSummary<'a>>,
}

#[derive(Serialize)]
struct BlockSummary<'a> {
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
}

impl<'a> Summary<'a> {
    fn new(transcript: &'a Transcript, preview_chars: usize) -> Self {
        Self {
            outcome: match transcript.outcome {
                Outcome::Done => "done",
                Outcome::Closed => "closed",
                Outcome::Cancelled => "cancelled",
            },
            text: transcript.visible_text(),
            raw_text: &transcript.raw_text,
            status: transcript.status.as_deref(),
            caption: transcript.caption.as_deref(),
            final_answer: transcript.final_answer.as_deref(),
            tools: transcript
                .tool_log
                .iter()
                .map(|t| t.log_line(preview_chars))
                .collect(),
            blocks: transcript
                .segments
                .iter()
                .filter_map(|segment| match segment {
                    Segment::Block(rendered) => Some(BlockSummary {
                        kind: rendered.kind_name(),
                        text: rendered.to_string(),
                        html: rendered.html(),
                    }),
                    Segment::Text(_) => None,
                })
                .collect(),
        }
    }
}

pub async fn run(cli: Cli) -> ExitCode {
    match run_inner(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_inner(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Config(args) => config_command(&args.action),
        Commands::Invoke(args) => {
            let config = Config::load().context("loading config")?;
            let mut params = InvocationParams::new(args.agent, args.message).with_thread(args.thread);
            if let Some(model) = args.model {
                params = params.with_model(model);
            }
            params.image_path = args.image;
            let connector = HttpConnector::new(&config.connection);
            stream(connector, params, config, &args.output).await
        }
        Commands::Replay(args) => {
            let mut config = Config::load().context("loading config")?;
            if let Some(chunk_bytes) = args.chunk_bytes {
                config.replay.chunk_bytes = chunk_bytes;
            }
            let connector = ReplayConnector::from_file(&args.file, config.replay.chunk_bytes)
                .await
                .with_context(|| format!("reading {}", args.file.display()))?;
            let params = InvocationParams::new("replay", args.file.display().to_string());
            stream(connector, params, config, &args.output).await
        }
    }
}

fn config_command(action: &ConfigAction) -> Result<ExitCode> {
    match action {
        ConfigAction::Path => println!("{}", Config::path().display()),
        ConfigAction::Show => {
            let mut config = Config::load().context("loading config")?;
            if config.connection.api_token.is_some() {
                config.connection.api_token = Some("<redacted>".to_string());
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(ExitCode::from(0))
}

async fn stream<C: Connector>(
    connector: C,
    params: InvocationParams,
    mut config: Config,
    output: &OutputArgs,
) -> Result<ExitCode> {
    let json = output.output_format == OutputFormat::Json;
    if output.no_pacing || json {
        config.pacing = PacingConfig {
            hard_cancel: config.pacing.hard_cancel,
            ..PacingConfig::immediate()
        };
    }
    let preview_chars = config.display.tool_preview_chars;

    let (tx, rx) = mpsc::unbounded_channel();
    let surface = if json {
        tokio::spawn(discard(rx))
    } else {
        let display = config.display.clone();
        tokio::spawn(async move {
            present::run_surface(rx, TerminalSurface::stdout(display))
                .await
                .map(drop)
        })
    };

    let mut relay = Relay::new(connector, config, tx);
    relay.start(params).await;

    let result = match relay.canceller() {
        Some(canceller) => {
            let waiting = relay.wait();
            tokio::pin!(waiting);
            tokio::select! {
                result = &mut waiting => result,
                _ = tokio::signal::ctrl_c() => {
                    tracing::debug!("Interrupted, cancelling invocation");
                    canceller.cancel();
                    waiting.await
                }
            }
        }
        None => relay.wait().await,
    };

    // Closing the relay drops the last event sender and lets the surface finish.
    drop(relay);
    surface.await?.context("writing output")?;

    match result {
        Ok(transcript) => {
            if json {
                let summary = Summary::new(&transcript, preview_chars);
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Ok(match transcript.outcome {
                Outcome::Cancelled => ExitCode::from(3),
                Outcome::Done | Outcome::Closed => ExitCode::from(0),
            })
        }
        // The surface already showed the failure line.
        Err(Error::Transport(e)) if !json => {
            tracing::debug!("Invocation ended with error: {e}");
            Ok(ExitCode::from(1))
        }
        Err(e) => Err(e.into()),
    }
}

async fn discard(mut rx: mpsc::UnboundedReceiver<PresentEvent>) -> std::io::Result<()> {
    while rx.recv().await.is_some() {}
    Ok(())
}
