//! CLI argument parsing for the dictum binary

use clap::{Args, Parser, Subcommand};
use dictum_client::{ConnectionConfig, ReconnectPolicy, DEFAULT_ORIGIN};
use std::time::Duration;

/// Dictum - rate-limited, self-healing message relay
#[derive(Parser, Debug)]
#[command(name = "dictum")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Relay JSON lines from stdin to the server, printing selected replies
    Connect(ConnectArgs),

    /// Show the default rate limit buckets
    Limits {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Full endpoint URL; overrides --host and --port
    #[arg(long, env = "DICTUM_URL")]
    pub url: Option<String>,

    /// Server host
    #[arg(long, default_value = "localhost", env = "DICTUM_SERVER_HOST")]
    pub host: String,

    /// WebSocket port
    #[arg(long, default_value = "8765", env = "DICTUM_WEBSOCKET_PORT")]
    pub port: u16,

    /// Rate limit category every outbound line is charged to
    #[arg(long, default_value = "api", env = "DICTUM_CATEGORY")]
    pub category: String,

    /// Message types to print when received (repeatable)
    #[arg(long = "on", value_name = "TYPE")]
    pub message_types: Vec<String>,

    /// Reconnection attempts before giving up (0 = never retry)
    #[arg(long, default_value = "10", env = "DICTUM_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: u32,

    /// Retry forever
    #[arg(long, conflicts_with = "max_reconnect_attempts")]
    pub retry_forever: bool,

    /// Base reconnect delay in milliseconds
    #[arg(long, default_value = "1000", env = "DICTUM_RECONNECT_DELAY_MS")]
    pub reconnect_delay_ms: u64,

    /// Use a fixed reconnect delay instead of exponential backoff
    #[arg(long)]
    pub fixed_delay: bool,

    /// Maximum frames held while disconnected
    #[arg(long, env = "DICTUM_MAX_QUEUE_LEN")]
    pub max_queue_len: Option<usize>,

    /// Origin header sent with the handshake
    #[arg(long, default_value = DEFAULT_ORIGIN, env = "DICTUM_ORIGIN")]
    pub origin: String,

    /// Bearer token sent as Authorization
    #[arg(long, env = "DICTUM_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// Handshake timeout in seconds
    #[arg(long, default_value = "10", env = "DICTUM_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Seconds to wait for queued frames to go out after stdin ends
    #[arg(long, default_value = "5")]
    pub drain_timeout: u64,
}

impl ConnectArgs {
    pub fn endpoint(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("ws://{}:{}", self.host, self.port))
    }

    pub fn to_config(&self) -> ConnectionConfig {
        let base = Duration::from_millis(self.reconnect_delay_ms);
        let policy = if self.fixed_delay {
            ReconnectPolicy::fixed(base)
        } else {
            ReconnectPolicy::exponential(base, base.saturating_mul(30))
        };
        let max_attempts = if self.retry_forever {
            None
        } else {
            Some(self.max_reconnect_attempts)
        };

        ConnectionConfig::builder()
            .url(self.endpoint())
            .reconnect(policy)
            .max_reconnect_attempts(max_attempts)
            .max_queue_len(self.max_queue_len)
            .origin(Some(self.origin.clone()).filter(|o| !o.is_empty()))
            .connect_timeout(Duration::from_secs(self.connect_timeout))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ConnectArgs {
        let cli = Cli::try_parse_from(args.iter().copied()).unwrap();
        match cli.command {
            Commands::Connect(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_endpoint_from_host_and_port() {
        let args = parse(&["dictum", "connect", "--host", "10.1.1.1", "--port", "9001"]);
        assert_eq!(args.endpoint(), "ws://10.1.1.1:9001");
    }

    #[test]
    fn test_url_overrides_host() {
        let args = parse(&["dictum", "connect", "--url", "wss://relay.test/ws", "--host", "x"]);
        assert_eq!(args.endpoint(), "wss://relay.test/ws");
    }

    #[test]
    fn test_to_config() {
        let args = parse(&[
            "dictum",
            "connect",
            "--fixed-delay",
            "--reconnect-delay-ms",
            "500",
            "--max-reconnect-attempts",
            "3",
            "--on",
            "transcript",
            "--on",
            "error",
        ]);
        let config = args.to_config();
        assert_eq!(config.reconnect, ReconnectPolicy::fixed(Duration::from_millis(500)));
        assert_eq!(config.max_reconnect_attempts, Some(3));
        assert_eq!(config.origin.as_deref(), Some(DEFAULT_ORIGIN));
        assert_eq!(args.message_types, vec!["transcript", "error"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_forever_conflicts_with_max() {
        assert!(Cli::try_parse_from([
            "dictum",
            "connect",
            "--retry-forever",
            "--max-reconnect-attempts",
            "2"
        ])
        .is_err());
        let args = parse(&["dictum", "connect", "--retry-forever"]);
        assert_eq!(args.to_config().max_reconnect_attempts, None);
    }
}
