// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Bridge configuration system

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default configuration file looked up by [`BridgeConfig::load`]
pub const CONFIG_FILE: &str = "bridge.toml";

/// What to do with calls issued before the kernel is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupPolicy {
    /// Queue the call; it runs once the kernel is ready
    #[default]
    Buffer,
    /// Fail the call immediately with `NotReady`
    Reject,
}

impl FromStr for StartupPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffer" => Ok(Self::Buffer),
            "reject" => Ok(Self::Reject),
            other => anyhow::bail!("unknown startup policy: {}", other),
        }
    }
}

/// Configuration of one bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bridge name used for thread names, correlation ids and logs.
    /// Defaults to the kernel family.
    pub name: Option<String>,
    /// Handling of calls issued before the kernel is ready
    pub startup: StartupPolicy,
    /// Maximum queued requests; unbounded when absent
    pub queue_capacity: Option<usize>,
    /// Stack size of the executor thread in bytes
    pub stack_size: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: None,
            startup: StartupPolicy::Buffer,
            queue_capacity: None,
            // Kernels recurse deeply on large boolean trees
            stack_size: Some(8 * 1024 * 1024),
        }
    }
}

impl BridgeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: BridgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Load `bridge.toml` when present, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = if PathBuf::from(CONFIG_FILE).exists() {
            Self::from_file(CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `POLYFRAME_BRIDGE_*` overrides read through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(name) = var("POLYFRAME_BRIDGE_NAME") {
            self.name = Some(name);
        }

        if let Some(startup) = var("POLYFRAME_BRIDGE_STARTUP") {
            self.startup = startup.parse()?;
        }

        if let Some(capacity) = var("POLYFRAME_BRIDGE_QUEUE_CAPACITY") {
            self.queue_capacity = Some(
                capacity
                    .parse()
                    .with_context(|| format!("Invalid queue capacity: {}", capacity))?,
            );
        }

        if let Some(stack) = var("POLYFRAME_BRIDGE_STACK_SIZE") {
            self.stack_size = Some(
                stack
                    .parse()
                    .with_context(|| format!("Invalid stack size: {}", stack))?,
            );
        }

        self.validate()
    }

    /// Reject sizes that would leave the bridge unable to take calls
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.queue_capacity != Some(0), "queue capacity must be at least 1");
        anyhow::ensure!(self.stack_size != Some(0), "stack size must be at least 1 byte");
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Effective bridge name for a kernel family
    pub fn name_or<'a>(&'a self, family: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(family)
    }
}
