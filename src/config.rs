//! CLI parsing and the small environment-override layer on top of it.
//!
//! The CLI surface itself is an external collaborator (argument parsing is
//! not part of the tunneling contract) but the process still needs one
//! place that turns flags + environment into the typed configuration the
//! rest of the binary consumes — the same split the teacher draws between
//! `clap` for flags and `HERMES_*`-prefixed env vars for infra overrides.

use crate::router::UpstreamRouter;
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_GATEWAY_TIMEOUT: &str = "15s";
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(250);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "tunnelgate", about = "reverse tunneling HTTP proxy")]
pub struct Cli {
    /// TCP listen port (server).
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Run as server (true) or client (false).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub server: bool,

    /// Server address to dial (client).
    #[arg(long)]
    pub remote: Option<String>,

    /// Upstream mapping (client): `entry(,entry)*`, `entry := value | key=value`.
    #[arg(long)]
    pub upstream: Option<String>,

    /// Per-request deadline, human-readable (server).
    #[arg(long, default_value = DEFAULT_GATEWAY_TIMEOUT)]
    pub gateway_timeout: String,

    /// Optional shared secret. Not enforced by the tunneling core.
    #[arg(long)]
    pub token: Option<String>,

    /// Bind address override; defaults to `0.0.0.0:<port>`.
    #[arg(long)]
    pub listen: Option<String>,

    /// Bind address for the health/metrics surface. Omit to disable it.
    #[arg(long)]
    pub admin_listen: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: DEFAULT_BACKOFF_INITIAL,
            max: DEFAULT_BACKOFF_MAX,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl BackoffConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TUNNELGATE_BACKOFF_INITIAL") {
            if let Ok(d) = humantime::parse_duration(&v) {
                self.initial = d;
            }
        }
        if let Ok(v) = std::env::var("TUNNELGATE_BACKOFF_MAX") {
            if let Ok(d) = humantime::parse_duration(&v) {
                self.max = d;
            }
        }
        if let Ok(v) = std::env::var("TUNNELGATE_BACKOFF_MULTIPLIER") {
            if let Ok(m) = v.parse::<f64>() {
                self.multiplier = m;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub admin_listen: Option<SocketAddr>,
    pub gateway_timeout: Duration,
    pub max_frame_bytes: usize,
    pub token: Option<String>,
}

#[derive(Clone)]
pub struct ClientConfig {
    pub remote: String,
    pub router: UpstreamRouter,
    pub admin_listen: Option<SocketAddr>,
    pub max_frame_bytes: usize,
    pub backoff: BackoffConfig,
    pub token: Option<String>,
}

fn max_frame_bytes_from_env() -> usize {
    std::env::var("TUNNELGATE_MAX_FRAME_BYTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_FRAME_BYTES)
}

fn gateway_timeout_from_env(cli_value: &str) -> Result<Duration> {
    let raw = std::env::var("TUNNELGATE_GATEWAY_TIMEOUT").unwrap_or_else(|_| cli_value.to_string());
    humantime::parse_duration(&raw).with_context(|| format!("invalid gateway-timeout: {raw}"))
}

impl Cli {
    pub fn server_config(&self) -> Result<ServerConfig> {
        if !self.server {
            bail!("server_config() called on a client CLI invocation");
        }
        let listen = match &self.listen {
            Some(addr) => addr.parse().with_context(|| format!("invalid --listen: {addr}"))?,
            None => format!("0.0.0.0:{}", self.port)
                .parse()
                .context("invalid --port")?,
        };
        let admin_listen = self
            .admin_listen
            .as_ref()
            .map(|a| a.parse().with_context(|| format!("invalid --admin-listen: {a}")))
            .transpose()?;
        if let Some(token) = &self.token {
            if token.trim().is_empty() {
                bail!("--token was supplied but empty");
            }
        }
        Ok(ServerConfig {
            listen,
            admin_listen,
            gateway_timeout: gateway_timeout_from_env(&self.gateway_timeout)?,
            max_frame_bytes: max_frame_bytes_from_env(),
            token: self.token.clone(),
        })
    }

    pub fn client_config(&self) -> Result<ClientConfig> {
        if self.server {
            bail!("client_config() called on a server CLI invocation");
        }
        let remote = self
            .remote
            .clone()
            .context("--remote is required in client mode")?;
        let upstream = self
            .upstream
            .clone()
            .context("--upstream is required in client mode")?;
        let admin_listen = self
            .admin_listen
            .as_ref()
            .map(|a| a.parse().with_context(|| format!("invalid --admin-listen: {a}")))
            .transpose()?;
        if let Some(token) = &self.token {
            if token.trim().is_empty() {
                bail!("--token was supplied but empty");
            }
        }
        let mut backoff = BackoffConfig::default();
        backoff.apply_env_overrides();
        Ok(ClientConfig {
            remote,
            router: UpstreamRouter::parse(&upstream),
            admin_listen,
            max_frame_bytes: max_frame_bytes_from_env(),
            backoff,
            token: self.token.clone(),
        })
    }
}
