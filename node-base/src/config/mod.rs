/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node runtime configuration.
//!
//! Every section and field is optional.  A complete file looks like:
//! ```yaml
//! node:
//!   node_type: 3
//!   node_index: 1
//! can:
//!   send_queue_size: 16
//!   recv_queue_size: 16
//!   flush_timeout_ms: 500
//! storage:
//!   size_bytes: 8192
//!   partition_count: 16
//!   path: /var/lib/node-base/nvram.bin
//! scheduler:
//!   max_modules: 16
//!   max_tasks: 32
//!   cycle_period_ms: 1
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::can::MAX_CHANNEL;
use crate::storage::table::DESCRIPTOR_SIZE;

// ── Sections ──────────────────────────────────────────────────────────────────

/// Bus address of this node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSection {
    /// 7-bit node type.
    pub node_type: u8,
    /// 4-bit node index.
    pub node_index: u8,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            node_type: 3,
            node_index: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanSection {
    pub send_queue_size: usize,
    pub recv_queue_size: usize,
    /// Upper bound for the shutdown flush busy-wait.
    pub flush_timeout_ms: u64,
}

impl Default for CanSection {
    fn default() -> Self {
        Self {
            send_queue_size: 16,
            recv_queue_size: 16,
            flush_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub size_bytes: u32,
    /// Table entries written when a blank device is formatted.
    pub partition_count: u16,
    /// Backing file; `None` keeps the storage in RAM.
    pub path: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            size_bytes: 8192,
            partition_count: 16,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    pub max_modules: usize,
    pub max_tasks: usize,
    /// Superloop period of the hosted binary.
    pub cycle_period_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_modules: 16,
            max_tasks: 32,
            cycle_period_ms: 1,
        }
    }
}

// ── RuntimeConfig ─────────────────────────────────────────────────────────────

/// Complete runtime configuration of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub node: NodeSection,
    pub can: CanSection,
    pub storage: StorageSection,
    pub scheduler: SchedulerSection,
}

impl RuntimeConfig {
    /// Parse and validate the YAML file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid YAML for this
    /// layout, or fails [`validate`](Self::validate).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading runtime configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))?;

        debug!(?config, "runtime configuration loaded");
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserialises as unit, not as an empty map.
        let config: RuntimeConfig = if content.trim().is_empty() {
            RuntimeConfig::default()
        } else {
            serde_yaml::from_str(content).context("Failed to parse YAML")?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that the types alone do not enforce.
    pub fn validate(&self) -> Result<()> {
        if self.node.node_type > 0x7F {
            bail!("node.node_type {} exceeds 127", self.node.node_type);
        }
        if self.node.node_index > 0x0F {
            bail!("node.node_index {} exceeds 15", self.node.node_index);
        }
        if self.node.node_type == 0 && self.node.node_index == 0 {
            bail!("node address 0.0 is the broadcast address");
        }
        if self.can.send_queue_size == 0 || self.can.recv_queue_size == 0 {
            bail!("CAN queue sizes must be non-zero");
        }
        if self.scheduler.max_modules == 0 {
            bail!("scheduler.max_modules must be non-zero");
        }
        let channels = MAX_CHANNEL as usize + 1;
        if self.scheduler.max_tasks == 0 || self.scheduler.max_tasks > channels {
            bail!(
                "scheduler.max_tasks {} outside 1..={}",
                self.scheduler.max_tasks,
                channels
            );
        }
        if self.storage.partition_count == 0 {
            bail!("storage.partition_count must be non-zero");
        }
        let table = self.storage.partition_count as u64 * DESCRIPTOR_SIZE as u64;
        if (self.storage.size_bytes as u64) < table {
            bail!(
                "storage.size_bytes {} smaller than a {}-entry partition table ({} bytes)",
                self.storage.size_bytes,
                self.storage.partition_count,
                table
            );
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
