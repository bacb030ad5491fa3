//! Agent configuration: parsed once at startup from CLI flags (with an
//! environment fallback for `--socket`), immutable thereafter.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;
use crate::ttl::Ttl;

/// Connections get up to this long to finish an in-flight request during
/// graceful shutdown. Not exposed on the CLI surface; it's an internal
/// shutdown-timing constant.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug, Clone)]
#[command(name = "secmem-agent", about = "Local secret-storage agent")]
pub struct Cli {
    #[arg(long, env = "SECMEM_SOCKET", default_value = "/tmp/secmem.sock")]
    pub socket: PathBuf,

    #[arg(long = "allow-uid")]
    pub allow_uid: Vec<u32>,

    #[arg(long, default_value = "15m")]
    pub default_ttl: String,

    #[arg(long, default_value = "1d")]
    pub max_ttl: String,

    #[arg(long, default_value_t = 65_536)]
    pub max_value_bytes: usize,

    #[arg(long, default_value_t = 1_024)]
    pub max_keys: usize,

    #[arg(long, default_value_t = 64)]
    pub max_connections: usize,

    #[arg(long, default_value = "1s")]
    pub sweep_interval: String,

    #[arg(long, default_value = "60s")]
    pub idle_timeout: String,

    #[arg(long, default_value = "0600")]
    pub socket_mode: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub socket_path: PathBuf,
    pub socket_mode: u32,
    pub allowed_uids: Vec<u32>,
    pub default_ttl: Ttl,
    pub max_ttl: Ttl,
    pub max_value_bytes: usize,
    pub max_keys: usize,
    pub max_connections: usize,
    pub sweep_interval: Duration,
    pub idle_timeout: Duration,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let default_ttl = Ttl::parse(&cli.default_ttl).map_err(|e| ConfigError::InvalidValue {
            flag: "default-ttl",
            reason: e.to_string(),
        })?;
        let max_ttl = Ttl::parse(&cli.max_ttl).map_err(|e| ConfigError::InvalidValue {
            flag: "max-ttl",
            reason: e.to_string(),
        })?;
        if default_ttl > max_ttl {
            return Err(ConfigError::InvalidValue {
                flag: "default-ttl",
                reason: "default-ttl must not exceed max-ttl".into(),
            });
        }
        if cli.max_value_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                flag: "max-value-bytes",
                reason: "must be positive".into(),
            });
        }
        if cli.max_keys == 0 {
            return Err(ConfigError::InvalidValue {
                flag: "max-keys",
                reason: "must be positive".into(),
            });
        }
        if cli.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                flag: "max-connections",
                reason: "must be positive".into(),
            });
        }
        let sweep_interval = parse_duration_flag("sweep-interval", &cli.sweep_interval)?;
        let idle_timeout = parse_duration_flag("idle-timeout", &cli.idle_timeout)?;
        let socket_mode = parse_octal_mode(&cli.socket_mode)?;

        Ok(Config {
            socket_path: cli.socket,
            socket_mode,
            allowed_uids: cli.allow_uid,
            default_ttl,
            max_ttl,
            max_value_bytes: cli.max_value_bytes,
            max_keys: cli.max_keys,
            max_connections: cli.max_connections,
            sweep_interval,
            idle_timeout,
        })
    }
}

fn parse_duration_flag(flag: &'static str, s: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(s).map_err(|e| ConfigError::InvalidValue {
        flag,
        reason: e.to_string(),
    })
}

fn parse_octal_mode(s: &str) -> Result<u32, ConfigError> {
    u32::from_str_radix(s.trim_start_matches("0o"), 8).map_err(|_| ConfigError::InvalidValue {
        flag: "socket-mode",
        reason: format!("'{s}' is not a valid octal mode"),
    })
}
