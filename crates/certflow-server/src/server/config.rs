use anyhow::bail;
use certflow::{DEFAULT_TEMPLATE, Environment, NumberingConfig, TrackerConfig};
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `certflow-server` binary.
///
/// Every value can be given as a CLI flag or an environment variable (a
/// `.env` file in the working directory is loaded first). Defaults suit
/// production.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "certflow-server",
    version,
    about = "HTTP and SSE service for certificate generation progress and numbering"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// `production` hides technical error details from responses;
    /// `development` includes the original message, context, and correlation
    /// id.
    ///
    /// Environment variable: `APP_ENV`
    #[arg(long, env = "APP_ENV", default_value_t = String::from("production"))]
    pub environment: String,

    /// Log output format: `pretty` or `json`. Filtering follows `RUST_LOG`.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", default_value_t = String::from("pretty"))]
    pub log_format: String,

    /// Quiet period after which a generation session times out.
    ///
    /// Environment variable: `SESSION_TIMEOUT_SECS`
    #[arg(long, env = "SESSION_TIMEOUT_SECS", default_value_t = 300)]
    pub session_timeout_secs: u64,

    /// Upper bound for a per-session timeout requested by a client.
    ///
    /// Environment variable: `MAX_SESSION_TIMEOUT_SECS`
    #[arg(long, env = "MAX_SESSION_TIMEOUT_SECS", default_value_t = 3600)]
    pub max_session_timeout_secs: u64,

    /// Delay before a completed or failed session is evicted.
    ///
    /// Environment variable: `TERMINAL_EVICTION_SECS`
    #[arg(long, env = "TERMINAL_EVICTION_SECS", default_value_t = 60)]
    pub terminal_eviction_secs: u64,

    /// Sessions untouched for longer than this are dropped regardless of
    /// state.
    ///
    /// Environment variable: `MAX_SESSION_AGE_SECS`
    #[arg(long, env = "MAX_SESSION_AGE_SECS", default_value_t = 1800)]
    pub max_session_age_secs: u64,

    /// Interval of the stale-session sweep.
    ///
    /// Environment variable: `REAP_INTERVAL_SECS`
    #[arg(long, env = "REAP_INTERVAL_SECS", default_value_t = 300)]
    pub reap_interval_secs: u64,

    /// Updates buffered per session; a subscriber further behind is dropped.
    ///
    /// Environment variable: `CHANNEL_CAPACITY`
    #[arg(long, env = "CHANNEL_CAPACITY", default_value_t = 64)]
    pub channel_capacity: usize,

    /// An event stream with no update for this long is closed.
    ///
    /// Environment variable: `SSE_IDLE_TIMEOUT_SECS`
    #[arg(long, env = "SSE_IDLE_TIMEOUT_SECS", default_value_t = 300)]
    pub sse_idle_timeout_secs: u64,

    /// Template for requests that do not carry a `format`.
    ///
    /// Environment variable: `NUMBER_FORMAT`
    #[arg(long, env = "NUMBER_FORMAT", default_value_t = String::from(DEFAULT_TEMPLATE))]
    pub number_format: String,

    /// Lifetime of an idempotency cache entry.
    ///
    /// Environment variable: `NUMBER_CACHE_TTL_SECS`
    #[arg(long, env = "NUMBER_CACHE_TTL_SECS", default_value_t = 300)]
    pub number_cache_ttl_secs: u64,

    /// Store transactions attempted before a number conflict is reported.
    ///
    /// Environment variable: `MAX_CONFLICT_ATTEMPTS`
    #[arg(long, env = "MAX_CONFLICT_ATTEMPTS", default_value_t = 3)]
    pub max_conflict_attempts: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub environment: Environment,
    pub log_format: LogFormat,
    pub tracker: TrackerConfig,
    pub numbering: NumberingConfig,
    pub max_session_timeout: Duration,
    pub sse_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:8080"),
            environment: Environment::Production,
            log_format: LogFormat::Pretty,
            tracker: TrackerConfig::default(),
            numbering: NumberingConfig::default(),
            max_session_timeout: Duration::from_secs(3600),
            sse_idle_timeout: Duration::from_secs(300),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let environment = match args.environment.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "development" | "dev" => Environment::Development,
            other => bail!("APP_ENV must be `production` or `development`, got `{other}`"),
        };
        let log_format = match args.log_format.to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => bail!("LOG_FORMAT must be `pretty` or `json`, got `{other}`"),
        };

        if args.sse_idle_timeout_secs == 0 {
            bail!("SSE_IDLE_TIMEOUT_SECS must be greater than 0");
        }
        if args.max_session_timeout_secs < args.session_timeout_secs {
            bail!(
                "MAX_SESSION_TIMEOUT_SECS ({}) is below SESSION_TIMEOUT_SECS ({})",
                args.max_session_timeout_secs,
                args.session_timeout_secs
            );
        }

        let tracker = TrackerConfig {
            default_timeout: Duration::from_secs(args.session_timeout_secs),
            terminal_eviction: Duration::from_secs(args.terminal_eviction_secs),
            max_session_age: Duration::from_secs(args.max_session_age_secs),
            reap_interval: Duration::from_secs(args.reap_interval_secs),
            channel_capacity: args.channel_capacity,
            ..TrackerConfig::default()
        };
        tracker.validate()?;

        let numbering = NumberingConfig {
            cache_ttl: Duration::from_secs(args.number_cache_ttl_secs),
            max_conflict_attempts: args.max_conflict_attempts,
            default_template: args.number_format,
            ..NumberingConfig::default()
        };
        numbering.validate()?;

        Ok(Self {
            server_addr: args.server_addr,
            environment,
            log_format,
            tracker,
            numbering,
            max_session_timeout: Duration::from_secs(args.max_session_timeout_secs),
            sse_idle_timeout: Duration::from_secs(args.sse_idle_timeout_secs),
        })
    }
}
