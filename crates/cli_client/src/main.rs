//! StreamInd CLI client
//! Loads terminals from a JSON file, connects them and drives them from stdin

mod commands;
mod terminals;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use commands::{Command, HELP};
use std::path::PathBuf;
use std::sync::Arc;
use streamind_core::protocol::frame::MAX_PAYLOAD_LEN;
use streamind_core::TerminalRegistry;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author = "StreamInd Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-terminal client for the StreamInd platform", long_about = None)]
struct Args {
    /// JSON file with the terminal list
    #[arg(short, long)]
    config: PathBuf,

    /// Trace id attached to the startup connects
    #[arg(short, long)]
    trace_id: Option<String>,

    /// Register terminals without connecting them
    #[arg(long, default_value_t = false)]
    no_connect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    info!(
        "Starting StreamInd CLI v{} (core {})",
        env!("CARGO_PKG_VERSION"),
        TerminalRegistry::version()
    );

    let entries = terminals::load(&args.config)?;
    let registry = Arc::new(TerminalRegistry::new());
    install_observers(&registry);

    for entry in entries {
        registry
            .register(entry.id.clone(), entry.config)
            .await
            .with_context(|| format!("Failed to register terminal {}", entry.id))?;
    }

    if !args.no_connect {
        connect_startup(&registry, args.trace_id.as_deref()).await;
    }

    println!("{}", HELP);

    // stdin is blocking; read lines on a dedicated thread
    let (line_tx, mut line_rx) = mpsc::channel::<String>(32);
    let stdin_task = tokio::task::spawn_blocking(move || {
        use std::io::BufRead;

        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Err(e) = execute(&registry, command).await {
                            println!("error: {:#}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("error: {:#}", e),
                }
            }
        }
    }

    registry.shutdown().await;
    stdin_task.abort();

    println!("Goodbye.");
    // the stdin thread stays blocked in read() and would hold the runtime open
    std::process::exit(0)
}

async fn connect_startup(registry: &TerminalRegistry, trace_id: Option<&str>) {
    let results = match trace_id {
        None => registry.connect_all().await,
        Some(trace_id) => {
            let mut results = std::collections::HashMap::new();
            for id in registry.terminal_ids().await {
                let result = registry.connect(&id, Some(trace_id)).await;
                results.insert(id, result);
            }
            results
        }
    };

    let mut ids: Vec<_> = results.keys().cloned().collect();
    ids.sort();
    for id in ids {
        match &results[&id] {
            Ok(()) => println!("[{}] connected", id),
            Err(e) => println!("[{}] connect failed: {}", id, e),
        }
    }
}

fn install_observers(registry: &TerminalRegistry) {
    registry.set_global_connection_callback(|id, connected, message| {
        if connected {
            println!("[{}] connection up", id);
        } else {
            println!("[{}] connection down: {}", id, message);
        }
    });
    registry.set_global_directive_callback(|id, directive| {
        println!(
            "[{}] directive {} ({}) {}",
            id,
            directive.name,
            directive.id,
            serde_json::Value::Object(directive.parameters.clone())
        );
    });
    registry.set_global_binary_callback(|id, data| {
        println!("[{}] binary {} bytes", id, data.len());
    });
    registry.set_global_error_callback(|id, code, message| {
        println!("[{}] error {}: {}", id, code, message);
    });
    registry.set_global_close_callback(|id, code, reason| {
        println!("[{}] closed {} {}", id, code, reason);
    });
}

async fn execute(registry: &TerminalRegistry, command: Command) -> Result<()> {
    match command {
        Command::Send {
            terminal,
            signal_type,
            text,
        } => {
            registry
                .send_text(&terminal, &signal_type, &text, None)
                .await?;
        }
        Command::Json {
            terminal,
            signal_type,
            data,
        } => {
            registry.send_json(&terminal, &signal_type, data).await?;
        }
        Command::Audio {
            terminal,
            file,
            format,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let data = Bytes::from(data);
            let mut frames = 0;
            for start in (0..data.len()).step_by(MAX_PAYLOAD_LEN) {
                let end = (start + MAX_PAYLOAD_LEN).min(data.len());
                registry
                    .send_audio(&terminal, data.slice(start..end), format.as_deref())
                    .await?;
                frames += 1;
            }
            println!("[{}] sent {} bytes in {} frames", terminal, data.len(), frames);
        }
        Command::Connect { terminal, trace_id } => {
            registry.connect(&terminal, trace_id.as_deref()).await?;
        }
        Command::Disconnect { terminal } => {
            registry.disconnect(&terminal).await?;
        }
        Command::Stats { terminal: Some(id) } => {
            println!("[{}] {}", id, registry.statistics(&id).await?);
        }
        Command::Stats { terminal: None } => {
            let stats = registry.statistics_all().await;
            let mut ids: Vec<_> = stats.keys().collect();
            ids.sort();
            for id in ids {
                println!("[{}] {}", id, stats[id]);
            }
        }
        Command::Reset { terminal } => {
            registry.reset_statistics(&terminal).await?;
        }
        Command::List => {
            for id in registry.terminal_ids().await {
                let state = registry.state(&id).await?;
                println!("{:<20} {}", id, state);
            }
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => warn!("quit reached execute"),
    }
    Ok(())
}

fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
