use anyhow::Context;
use babelcall::application::{AppEvent, Collaborators, Command, EventBus, Orchestrator, OrchestratorHandle, OrchestratorSettings};
use babelcall::config::Config;
use babelcall::domain::shared::value_objects::PeerId;
use babelcall::infrastructure::metrics;
use babelcall::infrastructure::services::{HttpSpeechServices, LoggingPlayback, ScriptedRecognizer};
use babelcall::infrastructure::signaling::WebSocketChannel;
use babelcall::infrastructure::webrtc::{OpusCapture, RtcPeerConnectionFactory, RtpDrainOutput};
use babelcall::interface::console::{self, ConsoleInput, PeerRef};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "babelcall", version, about = "Peer-to-peer voice calls with translated text relay")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, default_value = "babelcall.toml")]
    config: PathBuf,

    /// Join the directory with this name on startup
    #[arg(short, long)]
    name: Option<String>,

    /// Fixed participant id
    #[arg(long)]
    peer_id: Option<String>,

    /// Signaling server WebSocket URL
    #[arg(long)]
    signaling_url: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(Some(&args.config))
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    if let Some(name) = args.name {
        config.identity.name = Some(name);
    }
    if let Some(peer_id) = args.peer_id {
        config.identity.peer_id = Some(peer_id);
    }
    if let Some(url) = args.signaling_url {
        config.signaling.url = url;
    }

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    // Logs go to stderr so the console stays readable on stdout
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting babelcall");
    metrics::describe_metrics();

    let self_id = config
        .identity
        .peer_id
        .clone()
        .map(PeerId::new)
        .unwrap_or_else(PeerId::generate);
    info!("Participant id: {}", self_id);

    let (channel, channel_events) = WebSocketChannel::spawn(config.signaling.clone(), self_id.clone());
    let factory = Arc::new(RtcPeerConnectionFactory::new(config.ice.urls.clone())?);
    let services = Arc::new(HttpSpeechServices::new(&config.services)?);
    let (recognizer, utterances) = ScriptedRecognizer::new();

    let collaborators = Collaborators {
        channel,
        channel_events,
        factory,
        output: Arc::new(RtpDrainOutput),
        capture: Arc::new(OpusCapture::new(self_id.to_string())),
        recognizer: Arc::new(recognizer),
        translator: services.clone(),
        assistant: services,
        playback: Arc::new(LoggingPlayback),
    };

    let events = EventBus::default();
    let printer = tokio::spawn(print_events(events.subscribe()));

    let (handle, task) = Orchestrator::spawn(OrchestratorSettings::from(&config), collaborators, events);

    match &config.identity.name {
        Some(name) => {
            if let Err(e) = handle.join(name.clone()).await {
                warn!("Join failed: {}", e);
            }
        }
        None => println!("type `join <name>` to enter the directory, `help` for commands"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !run_line(&handle, &utterances, &line).await {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await;
    if let Err(e) = task.await {
        warn!("Orchestrator task ended abnormally: {}", e);
    }
    printer.abort();

    info!("babelcall stopped");
    Ok(())
}

/// Handle one console line; `false` means quit
async fn run_line(handle: &OrchestratorHandle, utterances: &mpsc::UnboundedSender<String>, line: &str) -> bool {
    let input = match console::parse(line) {
        Ok(input) => input,
        Err(e) => {
            println!("{}", e);
            return true;
        }
    };

    let result = match input {
        ConsoleInput::Empty => Ok(()),
        ConsoleInput::Quit => return false,
        ConsoleInput::Help => {
            println!("{}", console::HELP);
            Ok(())
        }
        ConsoleInput::Command(command) => handle.execute(command).await,
        ConsoleInput::Speak(text) => {
            if utterances.send(text).is_err() {
                warn!("Recognizer is gone");
            }
            handle.execute(Command::Speak).await
        }
        input @ (ConsoleInput::Call(_) | ConsoleInput::Hangup(_) | ConsoleInput::Tell(..)) => {
            run_targeted(handle, input).await
        }
        input @ (ConsoleInput::Peers | ConsoleInput::Status | ConsoleInput::Log) => show(handle, input).await,
    };

    if let Err(e) = result {
        println!("! {}", e);
    }
    true
}

/// Commands naming a peer, resolved against the current roster
async fn run_targeted(handle: &OrchestratorHandle, input: ConsoleInput) -> babelcall::Result<()> {
    let snapshot = handle.snapshot().await?;
    let resolve = |peer: &PeerRef| console::resolve_peer(peer, &snapshot);

    match &input {
        ConsoleInput::Call(peer) => match resolve(peer) {
            Ok(peer_id) => handle.call(&peer_id).await,
            Err(e) => {
                println!("{}", e);
                Ok(())
            }
        },
        ConsoleInput::Hangup(peer) => match resolve(peer) {
            Ok(peer_id) => handle.hangup(&peer_id).await,
            Err(e) => {
                println!("{}", e);
                Ok(())
            }
        },
        ConsoleInput::Tell(peer, text) => match resolve(peer) {
            Ok(peer_id) => handle.relay(Some(peer_id), text.clone()).await,
            Err(e) => {
                println!("{}", e);
                Ok(())
            }
        },
        _ => Ok(()),
    }
}

async fn show(handle: &OrchestratorHandle, input: ConsoleInput) -> babelcall::Result<()> {
    let snapshot = handle.snapshot().await?;
    match input {
        ConsoleInput::Peers if snapshot.roster.is_empty() => println!("nobody else is here"),
        ConsoleInput::Peers => {
            for peer in &snapshot.roster {
                println!("  {} [{}]", peer.label(), peer.id);
            }
        }
        ConsoleInput::Status => println!("{}", console::render_status(&snapshot)),
        _ => {
            for entry in snapshot.log.iter().rev() {
                println!("  {}", entry.line());
            }
        }
    }
    Ok(())
}

async fn print_events(mut rx: broadcast::Receiver<AppEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = console::render(&event) {
                    println!("{}", line);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Console fell behind, {} event(s) skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
