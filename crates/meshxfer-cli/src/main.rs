//! `meshxfer`: the command-line frontend over `meshxfer-core`. Parses
//! arguments, loads configuration, wires the collaborator traits to
//! their concrete binary-side implementations, and renders progress
//! with an `indicatif` bar.

mod collab;
mod config;
mod logging;
mod walk;

use clap::{Parser, Subcommand};
use collab::StdinPrompter;
use config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use meshxfer_core::{
    format_bytes, format_speed, install_interrupt_handler, run_receiver, run_sender,
    AlwaysTrustVerifier, NoopSelfIp, Prompter, ReceiverOptions, ReceiverOutcome, SelfIp,
    SenderOptions, SenderOutcome,
};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "meshxfer", version, about = "Secure peer-to-peer file transfer")]
struct Cli {
    /// Path to a TOML config file; defaults to the platform config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug-level logging regardless of the configured level.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one file or a whole directory to a waiting receiver.
    Send {
        /// File or directory to send.
        path: PathBuf,

        /// Shared session token; generated and printed if omitted.
        #[arg(long)]
        token: Option<String>,

        /// Address to bind and listen on, overriding the config file.
        #[arg(long)]
        bind: Option<String>,

        /// Disable LZ4 stream compression.
        #[arg(long)]
        no_compress: bool,
    },
    /// Receive a batch of files from a sender.
    Receive {
        /// `ip:token` or `ip:port:token` connection string, e.g.
        /// `10.0.0.4:ocean-forest`.
        connection: String,

        /// Directory to write received files into.
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
}

/// Parse a receiver connection string of the form `ip:token` or
/// `ip:port:token`, defaulting to the standard port when omitted.
fn parse_connection_string(s: &str, default_port: u16) -> anyhow::Result<(SocketAddr, String)> {
    let parts: Vec<&str> = s.split(':').collect();
    let (host, port, token) = match parts.as_slice() {
        [host, token] => (*host, default_port, (*token).to_string()),
        [host, port, token] => (
            *host,
            port.parse::<u16>()
                .map_err(|_| anyhow::anyhow!("invalid port in connection string: {port}"))?,
            (*token).to_string(),
        ),
        _ => anyhow::bail!("expected connection string of the form ip:token or ip:port:token"),
    };

    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("could not resolve host: {host}"))?;

    Ok((addr, token))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    logging::init(&config.logging.level, cli.verbose);

    match cli.command {
        Commands::Send {
            path,
            token,
            bind,
            no_compress,
        } => send_command(config, path, token, bind, no_compress),
        Commands::Receive { connection, output } => receive_command(config, connection, output),
    }
}

fn send_command(
    config: Config,
    path: PathBuf,
    token: Option<String>,
    bind: Option<String>,
    no_compress: bool,
) -> anyhow::Result<()> {
    let entries = walk::collect_entries(&path, &config.transfer.exclude_patterns)?;
    if entries.is_empty() {
        anyhow::bail!("nothing to send: {} has no files", path.display());
    }
    let total_size: u64 = entries.iter().map(|e| e.size).sum();

    let token = token.unwrap_or_else(|| {
        meshxfer_crypto::generate_token(&mut rand_core::OsRng)
    });

    let bind_addr: SocketAddr = bind
        .as_deref()
        .unwrap_or_else(|| config.bind_addr())
        .parse()?;

    if let Some(self_ip) = NoopSelfIp.detect() {
        tracing::debug!(%self_ip, "detected self IP");
    }

    println!("Sharing {} file(s), {} total", entries.len(), format_bytes(total_size));
    println!("Token: {token}");
    println!("Waiting for a connection on {bind_addr} ...");

    let bar = ProgressBar::new(total_size);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .expect("invalid progress bar template")
            .progress_chars("#>-"),
    );
    bar.set_message(format!("Sending {}", path.display()));

    let bar_clone = bar.clone();
    let on_progress = Box::new(move |snapshot: meshxfer_core::ProgressSnapshot| {
        bar_clone.set_position(snapshot.bytes_transferred);
    });

    let start = Instant::now();
    let opts = SenderOptions {
        compress: config.transfer.compress && !no_compress,
    };

    let outcome = run_sender(bind_addr, &token, entries, opts, &AlwaysTrustVerifier, Some(on_progress));
    let elapsed = start.elapsed().as_secs_f64().max(0.001);

    match outcome {
        Ok(SenderOutcome::Confirmed) => {
            bar.finish_with_message("done");
            println!(
                "Transfer complete! (avg: {})",
                format_speed(total_size as f64 / elapsed)
            );
            Ok(())
        }
        Ok(SenderOutcome::SentUnconfirmed) => {
            bar.finish_with_message("sent, unconfirmed");
            println!("Transfer finished without an explicit confirmation from the receiver.");
            Ok(())
        }
        Err(e) => {
            bar.abandon_with_message("failed");
            Err(e.into())
        }
    }
}

fn receive_command(config: Config, connection: String, output: PathBuf) -> anyhow::Result<()> {
    let default_port: u16 = config
        .bind_addr()
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(15820);
    let (sender_addr, token) = parse_connection_string(&connection, default_port)?;

    println!("Connecting to {sender_addr} ...");
    let interrupted = install_interrupt_handler();

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .expect("invalid progress bar template")
            .progress_chars("#>-"),
    );
    bar.set_message(format!("Receiving into {}", output.display()));
    let bar_clone = bar.clone();
    let on_progress = Box::new(move |snapshot: meshxfer_core::ProgressSnapshot| {
        bar_clone.set_length(snapshot.total_size);
        bar_clone.set_position(snapshot.bytes_transferred);
    });

    let prompter = StdinPrompter;
    let opts = ReceiverOptions {
        output_dir: output,
        enable_stall_detection: true,
    };

    let outcome = run_receiver(sender_addr, &token, opts, interrupted, Some(on_progress));

    match outcome {
        Ok(ReceiverOutcome::Completed) => {
            bar.finish_with_message("done");
            println!("Transfer complete!");
            Ok(())
        }
        Ok(ReceiverOutcome::FailedFiles(files)) => {
            bar.abandon_with_message("incomplete");
            println!("The following files failed integrity verification after retrying:");
            for f in &files {
                println!("  - {f}");
            }
            if prompter.ask("Keep partial files for manual inspection?") {
                println!("Partial files left in place.");
            }
            anyhow::bail!("{} file(s) failed to transfer cleanly", files.len());
        }
        Err(e) => {
            bar.abandon_with_message("failed");
            Err(e.into())
        }
    }
}
