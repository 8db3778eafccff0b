/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use node_base::config::RuntimeConfig;
use node_base::hal::sim::{FileStorage, RamStorage, SimCanController, SystemClock};
use node_base::hal::StorageDevice;
use node_base::{NodeRuntime, NodeState};

/// Cycles allowed for modules to acknowledge a shutdown.
const SHUTDOWN_CYCLES: u32 = 1000;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Hosted CAN node simulator running the base module superloop.
///
/// Example:
///   node-base --config node.yaml --node-index 2 --storage-file nv.bin
#[derive(Debug, Parser)]
#[command(
    name = "node-base",
    about = "CAN node base module – hosted simulator",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML runtime configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Node index (0–15), overrides the configuration file.
    #[arg(short = 'i', long = "node-index")]
    node_index: Option<u8>,

    /// Node type (0–127), overrides the configuration file.
    #[arg(short = 't', long = "node-type")]
    node_type: Option<u8>,

    /// File backing the non-volatile storage, overrides the configuration file.
    #[arg(short = 's', long = "storage-file")]
    storage_file: Option<PathBuf>,

    /// Stop after this many superloop cycles instead of waiting for Ctrl-C.
    #[arg(short = 'n', long = "cycles")]
    cycles: Option<u64>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("node-base failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load_from_file(path)?,
        None => {
            warn!("No configuration file provided, using defaults");
            RuntimeConfig::default()
        }
    };
    if let Some(index) = cli.node_index {
        config.node.node_index = index;
    }
    if let Some(node_type) = cli.node_type {
        config.node.node_type = node_type;
    }
    if cli.storage_file.is_some() {
        config.storage.path = cli.storage_file.clone();
    }
    config.validate().context("Invalid configuration after CLI overrides")?;

    info!(
        node_type  = config.node.node_type,
        node_index = config.node.node_index,
        storage    = ?config.storage.path,
        cycles     = ?cli.cycles,
        "Configuration"
    );

    // ── Hardware ──────────────────────────────────────────────────────────────
    let device: Box<dyn StorageDevice> = match &config.storage.path {
        Some(path) => Box::new(
            FileStorage::open(path, config.storage.size_bytes)
                .with_context(|| format!("Cannot open storage file: {}", path.display()))?,
        ),
        None => Box::new(RamStorage::new(config.storage.size_bytes)),
    };
    let can = SimCanController::new();
    let clock = Arc::new(SystemClock::new());

    let mut runtime = NodeRuntime::new(&config, Box::new(can.clone()), device, clock)
        .context("Node runtime initialisation failed")?;
    runtime.services_mut().set_node_state(NodeState::Normal);

    // ── Interrupt pump ────────────────────────────────────────────────────────
    let transport = runtime.transport();
    let pump = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_micros(250));
        loop {
            tick.tick().await;
            transport.poll_interrupts();
        }
    });

    // ── Superloop ─────────────────────────────────────────────────────────────
    let period = Duration::from_millis(config.scheduler.cycle_period_ms.max(1));
    let mut tick = tokio::time::interval(period);
    let mut cycles: u64 = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                runtime.schedule_tasks();
                cycles += 1;
                if cli.cycles.is_some_and(|limit| cycles >= limit) {
                    info!(cycles, "cycle limit reached");
                    break;
                }
            }
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    runtime.begin_shutdown();
    for _ in 0..SHUTDOWN_CYCLES {
        if runtime.services().node_state() == NodeState::Standby {
            break;
        }
        tick.tick().await;
        runtime.schedule_tasks();
    }
    if runtime.services().node_state() != NodeState::Standby {
        warn!("modules did not reach standby in time");
    }

    let timeout = runtime.services().flush_timeout_ms();
    if let Err(e) = runtime.services().transport.flush_messages(timeout) {
        warn!(error = %e, "send queue not flushed");
    }
    pump.abort();

    let stats = runtime.services().transport.stats();
    info!(
        cycles,
        sent = stats.sent,
        received = stats.received,
        send_dropped = stats.send_dropped,
        recv_dropped = stats.recv_dropped,
        frames_on_bus = can.sent_count(),
        free_storage = runtime.services().storage.free_space(),
        "node-base stopped"
    );
    Ok(())
}
