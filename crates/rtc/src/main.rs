//! rtc-loopback
//!
//! Exercises the façade against the in-process loopback engine.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rtc::{
    Candidate, Channel, Config, DataChannel, Description, LoopbackEngine, PeerConnection,
    WebSocket,
};
use tracing_subscriber::EnvFilter;

/// Loopback driver for the rtc façade.
#[derive(Parser, Debug)]
#[command(name = "rtc-loopback")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Negotiate two peers and exchange messages over a data channel
    Chat {
        /// Messages sent in each direction
        #[arg(long, short = 'n', default_value = "3")]
        count: usize,

        /// Message text
        #[arg(long, short, default_value = "hello")]
        message: String,
    },

    /// Round-trip binary messages through a web socket echo endpoint
    Echo {
        /// Endpoint (defaults to the configured socket url)
        #[arg(long)]
        url: Option<String>,

        /// Messages to send
        #[arg(long, short = 'n', default_value = "3")]
        count: usize,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    match cli.command {
        Commands::Chat { count, message } => chat(&config, count, &message),
        Commands::Echo { url, count } => {
            let url = url.unwrap_or_else(|| config.socket.url.clone());
            echo(&url, count)
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Offerer,
    Answerer,
}

enum Signal {
    Description(Description),
    Candidate(Candidate),
}

/// Signaling messages waiting to be relayed to the other side.
type Mailbox = Arc<Mutex<VecDeque<(Side, Signal)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn attach_signaling(pc: &PeerConnection, side: Side, mailbox: &Mailbox) {
    let outbox = Arc::clone(mailbox);
    pc.on_local_description(move |description| {
        lock(&outbox).push_back((side, Signal::Description(description)));
    });

    let outbox = Arc::clone(mailbox);
    pc.on_local_candidate(move |candidate| {
        lock(&outbox).push_back((side, Signal::Candidate(candidate)));
    });

    pc.on_state_change(move |state| tracing::info!(?side, %state, "Connection state"));
}

/// Runs the engine and relays signaling until both sides go quiet.
fn negotiate(
    engine: &LoopbackEngine,
    offerer: &PeerConnection,
    answerer: &PeerConnection,
    mailbox: &Mailbox,
) {
    loop {
        engine.run_until_idle();
        let batch: Vec<_> = lock(mailbox).drain(..).collect();
        if batch.is_empty() {
            return;
        }
        for (from, signal) in batch {
            let target = match from {
                Side::Offerer => answerer,
                Side::Answerer => offerer,
            };
            match signal {
                Signal::Description(description) => {
                    tracing::debug!(?from, kind = %description.type_string(), "Relaying description");
                    target.set_remote_description(&description);
                }
                Signal::Candidate(candidate) => target.add_remote_candidate(&candidate),
            }
        }
    }
}

fn count_messages(channel: &DataChannel) -> Arc<AtomicUsize> {
    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    let label = channel.label().to_string();
    channel.on_message(move |message| {
        counter.fetch_add(1, Ordering::SeqCst);
        match message.as_text() {
            Some(text) => println!("[{label}] {text}"),
            None => println!("[{label}] <{} bytes>", message.len()),
        }
    });
    received
}

fn chat(config: &Config, count: usize, message: &str) -> anyhow::Result<()> {
    let engine = Arc::new(LoopbackEngine::new());
    let configuration = config.configuration();
    let offerer = PeerConnection::new(engine.clone(), &configuration)
        .context("Failed to create offering peer")?;
    let answerer = PeerConnection::new(engine.clone(), &configuration)
        .context("Failed to create answering peer")?;

    let mailbox: Mailbox = Arc::default();
    attach_signaling(&offerer, Side::Offerer, &mailbox);
    attach_signaling(&answerer, Side::Answerer, &mailbox);

    let announced: Arc<Mutex<Option<DataChannel>>> = Arc::default();
    let slot = Arc::clone(&announced);
    answerer.on_data_channel(move |channel| {
        tracing::info!(label = %channel.label(), "Remote data channel");
        *lock(&slot) = Some(channel);
    });

    let local = offerer
        .create_data_channel_with(&config.channel.label, config.reliability()?)
        .context("Failed to create data channel")?;
    local.set_buffered_amount_low_threshold(config.channel.buffered_amount_low_threshold);
    local.on_buffered_amount_low(|| tracing::debug!("Send buffer drained"));
    let from_answerer = count_messages(&local);

    negotiate(&engine, &offerer, &answerer, &mailbox);

    let Some(remote) = lock(&announced).take() else {
        bail!("Answering peer never received the data channel");
    };
    if !local.is_open() {
        bail!("Data channel did not open");
    }
    let from_offerer = count_messages(&remote);

    for i in 1..=count {
        local.send_text(&format!("{message} #{i}"))?;
        remote.send_text(&format!("re: {message} #{i}"))?;
    }
    engine.run_until_idle();

    let sent = (from_offerer.load(Ordering::SeqCst), from_answerer.load(Ordering::SeqCst));
    println!(
        "offerer -> answerer: {}/{count}, answerer -> offerer: {}/{count}",
        sent.0, sent.1
    );
    if sent != (count, count) {
        bail!("Messages were lost on the loopback channel");
    }

    local.close();
    remote.close();
    Ok(())
}

fn echo(url: &str, count: usize) -> anyhow::Result<()> {
    let engine = Arc::new(LoopbackEngine::new());
    let socket = WebSocket::new(engine.clone());

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    socket.on_binary_or_text(
        move |data| {
            counter.fetch_add(1, Ordering::SeqCst);
            println!("echo: {}", String::from_utf8_lossy(&data));
        },
        |text| println!("echo (text): {text}"),
    );
    socket.on_error(|reason| tracing::warn!(%reason, "Web socket error"));

    socket
        .open(url)
        .with_context(|| format!("Failed to open web socket to {url}"))?;
    engine.run_until_idle();
    if !socket.is_open() {
        bail!("Web socket to {url} did not open");
    }

    for i in 1..=count {
        socket.send_binary(format!("ping {i}").as_bytes())?;
    }
    engine.run_until_idle();

    let echoed = received.load(Ordering::SeqCst);
    println!("{echoed}/{count} messages echoed by {url}");
    socket.close();
    if echoed != count {
        bail!("Echo endpoint dropped messages");
    }
    Ok(())
}
