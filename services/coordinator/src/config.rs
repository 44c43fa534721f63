use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::server::AgentServerOptions;

/// Largest accepted queue length for the command and event buffers.
const MAX_BUFFER: u64 = 1 << 20;

/// One hour, in the unit of each timeout variable.
const MAX_SEND_TIMEOUT_MS: u64 = 3_600_000;
const MAX_SHUTDOWN_TIMEOUT_SECS: u64 = 3_600;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,

    /// Upper bound on one outbound command send to a replica.
    pub send_timeout: Duration,

    /// Per-replica outbound command queue length.
    pub command_buffer: usize,

    /// Queue length of the coordinator's model event listener.
    pub event_buffer: usize,

    pub shutdown_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("MLPLANE_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:9005".to_string())
            .parse()
            .context("MLPLANE_LISTEN_ADDR must be a socket address")?;

        let log_level = std::env::var("MLPLANE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let send_timeout = Duration::from_millis(env_number(
            "MLPLANE_SEND_TIMEOUT_MS",
            5_000,
            MAX_SEND_TIMEOUT_MS,
        )?);
        let command_buffer = env_number("MLPLANE_COMMAND_BUFFER", 64, MAX_BUFFER)? as usize;
        let event_buffer = env_number("MLPLANE_EVENT_BUFFER", 1024, MAX_BUFFER)? as usize;
        let shutdown_timeout = Duration::from_secs(env_number(
            "MLPLANE_SHUTDOWN_TIMEOUT_SECS",
            10,
            MAX_SHUTDOWN_TIMEOUT_SECS,
        )?);

        Ok(Self {
            listen_addr,
            log_level,
            send_timeout,
            command_buffer,
            event_buffer,
            shutdown_timeout,
        })
    }

    pub fn agent_server_options(&self) -> AgentServerOptions {
        AgentServerOptions {
            send_timeout: self.send_timeout,
            command_buffer: self.command_buffer,
            event_buffer: self.event_buffer,
        }
    }
}

fn env_number(name: &str, default: u64, max: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => parse_number(name, &raw, max),
        Err(_) => Ok(default),
    }
}

/// Parses a value in `1..=max`.
fn parse_number(name: &str, raw: &str, max: u64) -> Result<u64> {
    let value = raw
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .with_context(|| format!("{name} must be a positive integer, got {raw:?}"))?;
    anyhow::ensure!(value <= max, "{name} must be at most {max}, got {value}");
    Ok(value)
}
