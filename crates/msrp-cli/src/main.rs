//! MSRP command-line client
//!
//! Sends and receives files over MSRP. SDP offers and answers are exchanged
//! through files so any signaling channel can carry them.

mod config;
mod endpoint;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

use config::Config;
use endpoint::{Endpoint, Event, wait_for_sdp};
use msrp_core::{FileSelector, FileSource, PayloadSource, SessionState};
use progress::{TransferProgress, format_bytes, format_duration};

/// MSRP - chunked file transfer over the Message Session Relay Protocol
#[derive(Parser)]
#[command(name = "msrp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to <config dir>/msrp/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Offer a file to a peer and push it once the answer arrives
    SendFile {
        /// File to send
        file: PathBuf,

        /// Peer (or relay) address
        #[arg(long)]
        connect: String,

        /// Where to write the SDP offer
        #[arg(long)]
        offer_out: PathBuf,

        /// Where the peer's SDP answer will appear
        #[arg(long)]
        answer_in: PathBuf,

        /// MIME type of the file
        #[arg(long, default_value = "application/octet-stream")]
        mime_type: String,
    },

    /// Accept one connection and receive the offered file
    Receive {
        /// Listen address
        #[arg(short, long, default_value = "0.0.0.0:2855")]
        bind: String,

        /// Where the peer's SDP offer will appear
        #[arg(long)]
        offer_in: PathBuf,

        /// Where to write the SDP answer
        #[arg(long)]
        answer_out: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Print the effective configuration
    Config {
        /// Write it to the configuration file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if cli.config.is_some() {
        Config::load(&config_path)?
    } else {
        Config::load_or_default()?
    };
    config.validate()?;

    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::SendFile {
            file,
            connect,
            offer_out,
            answer_in,
            mime_type,
        } => send_file(&file, &connect, &offer_out, &answer_in, &mime_type, &config).await?,
        Commands::Receive {
            bind,
            offer_in,
            answer_out,
            output,
        } => receive_file(&bind, &offer_in, &answer_out, &output, &config).await?,
        Commands::Config { write } => show_config(&config, write.then_some(config_path.as_path()))?,
    }

    Ok(())
}

/// Offer `file`, wait for the answer, then push it
async fn send_file(
    file: &Path,
    connect: &str,
    offer_out: &Path,
    answer_in: &Path,
    mime_type: &str,
    config: &Config,
) -> anyhow::Result<()> {
    let source = FileSource::open(file).with_context(|| format!("opening {}", file.display()))?;
    let size = source.len();
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    println!("File: {}", file.display());
    println!("Size: {}", format_bytes(size));
    println!("Connecting to {connect}");

    let stream = tokio::time::timeout(config.network.connect_timeout, TcpStream::connect(connect))
        .await
        .with_context(|| format!("timed out connecting to {connect}"))?
        .with_context(|| format!("connecting to {connect}"))?;
    let mut endpoint = Endpoint::new(stream, config)?;
    endpoint.wait_negotiable().await?;

    let selector = FileSelector {
        name: Some(filename.clone()),
        size: Some(size),
        mime_type: Some(mime_type.to_string()),
        hash: None,
    };
    let session = endpoint.session().clone();
    let offer = endpoint
        .connection_mut()
        .create_file_offer(&session, Box::new(source), selector, None)?;
    tokio::fs::write(offer_out, offer)
        .await
        .with_context(|| format!("writing offer to {}", offer_out.display()))?;
    println!("Offer written to {}", offer_out.display());

    let answer = wait_for_sdp(answer_in, config).await?;
    endpoint
        .connection_mut()
        .process_answer(&session, &answer, Instant::now())
        .context("processing SDP answer")?;

    let progress = TransferProgress::new(size, &format!("Sending: {filename}"));
    loop {
        match endpoint.next_event().await? {
            Event::Sent(p) => progress.update(p.bytes),
            Event::Delivered(message_id) => {
                tracing::info!(message_id = %message_id, "file delivered");
                progress.finish_with_message(format!(
                    "{} {filename} delivered in {}",
                    style("✓").green(),
                    format_duration(progress.elapsed())
                ));
                break;
            }
            Event::SendFailed { status, reason } => {
                progress.abandon_with_message(format!("{} transfer failed", style("✗").red()));
                anyhow::bail!("peer refused the file: {status} {reason}");
            }
            Event::State(state) if state.is_terminal() => {
                progress.abandon_with_message(format!("{} session ended", style("✗").red()));
                anyhow::bail!("session ended in {state}");
            }
            _ => {}
        }
    }

    endpoint.shutdown().await
}

/// Accept one peer, answer its offer and store the file it sends
async fn receive_file(
    bind: &str,
    offer_in: &Path,
    answer_out: &Path,
    output: &Path,
    config: &Config,
) -> anyhow::Result<()> {
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }

    let listener = TcpListener::bind(bind).await.with_context(|| format!("binding {bind}"))?;
    println!("Listening on: {}", listener.local_addr()?);
    println!("Output directory: {}", output.display());

    let (stream, peer) = listener.accept().await?;
    println!("Peer connected: {peer}");
    let mut endpoint = Endpoint::new(stream, config)?;
    endpoint.wait_negotiable().await?;

    let offer = wait_for_sdp(offer_in, config).await?;
    let session = endpoint.session().clone();
    let answer = endpoint
        .connection_mut()
        .process_offer(&session, &offer, Instant::now())
        .context("processing SDP offer")?;
    tokio::fs::write(answer_out, &answer.sdp)
        .await
        .with_context(|| format!("writing answer to {}", answer_out.display()))?;
    println!("Answer written to {}", answer_out.display());

    let offered_name = answer.file.as_ref().and_then(|f| f.selector.name.clone());
    let offered_size = answer.file.as_ref().and_then(|f| f.selector.size).unwrap_or(0);
    if answer.file.is_some() {
        println!(
            "Incoming file: {} ({})",
            offered_name.as_deref().unwrap_or("unnamed"),
            format_bytes(offered_size)
        );
        endpoint.connection_mut().accept_file_transfer(&session)?;
    }

    let progress = TransferProgress::new(offered_size, "Receiving");
    loop {
        match endpoint.next_event().await? {
            Event::Received(p) => {
                if let Some(total) = p.total {
                    progress.set_total(total);
                }
                progress.update(p.bytes);
            }
            Event::Message(message) => {
                let name = safe_file_name(offered_name.as_deref(), &message.message_id);
                let path = output.join(name);
                tokio::fs::write(&path, &message.body)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                progress.finish_with_message(format!(
                    "{} saved {} ({})",
                    style("✓").green(),
                    path.display(),
                    format_bytes(message.body.len() as u64)
                ));
                break;
            }
            Event::ReceiveAborted(_) => {
                progress.abandon_with_message(format!("{} sender aborted", style("✗").red()));
                anyhow::bail!("sender aborted the transfer");
            }
            Event::ReceiveTimeout(_) => {
                progress.abandon_with_message(format!("{} transfer stalled", style("✗").red()));
                anyhow::bail!("transfer timed out");
            }
            Event::State(state) if state.is_terminal() && state != SessionState::Closed => {
                anyhow::bail!("session ended in {state}");
            }
            _ => {}
        }
    }

    endpoint.shutdown().await
}

/// Final path component of the offered name, falling back to the message id
fn safe_file_name(offered: Option<&str>, message_id: &str) -> String {
    offered
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && *name != "..")
        .map_or_else(|| format!("{message_id}.bin"), String::from)
}

/// Print the configuration, optionally saving it
fn show_config(config: &Config, write_to: Option<&Path>) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if let Some(path) = write_to {
        config.save(path)?;
        println!("\nSaved to {}", path.display());
    }
    Ok(())
}
