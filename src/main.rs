//! Chitchat — delimiter-framed TCP echo server.
//!
//! Each frame received from a client is answered with a JSON object that
//! echoes it back. A few frames are treated as commands:
//!
//!   peers   list connected remote addresses
//!   quit    close this connection from the server side
//!
//! Usage:
//!   chitchat                                  # 127.0.0.1:7070, newline-delimited
//!   chitchat --port 9000 --delimiter 59       # ';'-delimited frames
//!   chitchat --delimiter 0                    # raw pass-through chunks
//!   chitchat --read-timeout-ms 30000          # drop idle clients after 30s

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chitchat_transport::{FrameContext, HandlerResult, ServerBuilder, ServerConfig};
use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chitchat", about = "Chitchat — delimiter-framed TCP echo server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "7070")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Frame delimiter as a byte value (0 = pass-through)
    #[arg(long, default_value = "10")]
    delimiter: u8,

    /// Per-connection read deadline in milliseconds (0 = none)
    #[arg(long, default_value = "0")]
    read_timeout_ms: u64,

    /// Per-connection write deadline in milliseconds (0 = none)
    #[arg(long, default_value = "0")]
    write_timeout_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Shared state handed to every frame through the context.
#[derive(Default)]
struct Stats {
    frames: AtomicU64,
}

async fn on_frame(frame: Bytes, ctx: FrameContext<Stats>) -> HandlerResult {
    let seq = ctx.extra().frames.fetch_add(1, Ordering::Relaxed) + 1;
    let text = String::from_utf8_lossy(&frame);

    match text.trim() {
        "peers" => {
            let peers = ctx.registry().remote_addrs();
            ctx.write(&json!({ "peers": peers })).await?;
        }
        "quit" => {
            ctx.write(&json!({ "bye": ctx.remote_addr() })).await?;
            ctx.close()?;
        }
        _ => {
            ctx.write(&json!({
                "echo": text,
                "from": ctx.remote_addr(),
                "via": ctx.local_addr(),
                "seq": seq,
            }))
            .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = match std::fs::OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}", log_path.display());
                std::process::exit(1);
            }
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServerConfig {
        bind_addr: format!("{}:{}", cli.hostname, cli.port),
        delimiter: cli.delimiter,
        read_timeout: Duration::from_millis(cli.read_timeout_ms),
        write_timeout: Duration::from_millis(cli.write_timeout_ms),
    };

    let server = ServerBuilder::new(config, Stats::default())
        .handler(on_frame)
        .build();

    let Some(mut errors) = server.take_error_stream() else {
        error!("error stream already taken");
        std::process::exit(1);
    };

    if let Err(e) = server.listen().await {
        error!("Failed to start server: {e}");
        std::process::exit(1);
    }

    let addr = server
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| server.bind_addr().to_string());
    println!();
    println!("  Chitchat listening on {addr}");
    println!("  Delimiter:  {:#04x}", cli.delimiter);
    println!("  Press Ctrl+C to stop.");
    println!();

    let error_log = tokio::spawn(async move {
        while let Some(event) = errors.recv().await {
            warn!(origin = %event.origin, "{}", event.error);
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    println!();
    println!("  Shutting down...");
    if let Err(e) = server.cut().await {
        error!("Failed to stop server: {e}");
    }
    let _ = error_log.await;

    info!(frames = server.extra().frames.load(Ordering::Relaxed), "server stopped");
    println!("  Server stopped.");
}
