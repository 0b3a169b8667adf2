/// Gateway configuration.
/// Everything is read from environment variables; defaults target a local
/// development stack of the user, product and favourite services.
use std::str::FromStr;

use anyhow::{Context, ensure};

/// Main application settings.
#[derive(Clone, Debug)]
pub struct Cfg {
    /// HTTP port the gateway listens on
    pub port: u16,

    /// Overall deadline for one inbound request (milliseconds)
    pub request_timeout_ms: u64,

    /// Maximum inbound requests handled at once; excess is shed with 503
    pub concurrency_limit: usize,

    /// TCP connect timeout towards downstreams (milliseconds)
    pub connect_timeout_ms: u64,

    /// Basic auth credentials injected on every downstream request
    pub downstream_username: String,
    pub downstream_password: String,

    pub users: DownstreamCfg,
    pub products: DownstreamCfg,
    pub favourites: DownstreamCfg,
}

/// One remote collaborator.
#[derive(Clone, Debug)]
pub struct DownstreamCfg {
    /// Name used in logs, metrics and the actuator view
    pub name: String,

    /// Base URL including the service context path
    pub base_url: String,

    pub resilience: ResilienceCfg,
}

/// Tuning for the resilience chain in front of one downstream.
#[derive(Clone, Debug, PartialEq)]
pub struct ResilienceCfg {
    /// Failure rate (0.0-1.0) at which the circuit opens
    pub cb_fail_rate: f64,

    /// Outcomes needed in the window before the rate is evaluated
    pub cb_min_samples: usize,

    /// Number of most recent outcomes kept
    pub cb_window_size: usize,

    /// Maximum age of outcomes in the window (seconds, 0 = count only)
    pub cb_window_secs: u64,

    /// Cooldown before an open circuit lets a probe through (milliseconds)
    pub cb_open_ms: u64,

    /// Attempts per logical call, first one included
    pub retry_max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    pub retry_base_ms: u64,

    /// Growth factor between consecutive retry delays
    pub retry_multiplier: f64,

    /// Upper bound for a retry delay (milliseconds)
    pub retry_max_delay_ms: u64,

    /// Deadline for one attempt (milliseconds)
    pub call_timeout_ms: u64,

    /// Concurrent calls allowed through the bulkhead
    pub bulkhead_max_concurrent: usize,

    /// Callers allowed to queue for a bulkhead slot
    pub bulkhead_max_waiters: usize,

    /// How long a queued caller waits before being rejected (milliseconds)
    pub bulkhead_max_wait_ms: u64,
}

impl Default for ResilienceCfg {
    fn default() -> Self {
        Self {
            cb_fail_rate: 0.5,
            cb_min_samples: 10,
            cb_window_size: 10,
            cb_window_secs: 0,
            cb_open_ms: 10_000,
            retry_max_attempts: 3,
            retry_base_ms: 500,
            retry_multiplier: 2.0,
            retry_max_delay_ms: 5_000,
            call_timeout_ms: 3_000,
            bulkhead_max_concurrent: 10,
            bulkhead_max_waiters: 15,
            bulkhead_max_wait_ms: 500,
        }
    }
}

impl ResilienceCfg {
    fn from_lookup<F>(prefix: &str, lookup: &F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let key = |name: &str| format!("{prefix}_{name}");
        Ok(Self {
            // ========== CIRCUIT BREAKER ==========
            cb_fail_rate: parse_or(lookup, &key("CB_FAIL_RATE"), d.cb_fail_rate)?,
            cb_min_samples: parse_or(lookup, &key("CB_MIN_SAMPLES"), d.cb_min_samples)?,
            cb_window_size: parse_or(lookup, &key("CB_WINDOW_SIZE"), d.cb_window_size)?,
            cb_window_secs: parse_or(lookup, &key("CB_WINDOW_SECS"), d.cb_window_secs)?,
            cb_open_ms: parse_or(lookup, &key("CB_OPEN_MS"), d.cb_open_ms)?,

            // ========== RETRY ==========
            retry_max_attempts: parse_or(lookup, &key("RETRY_MAX_ATTEMPTS"), d.retry_max_attempts)?,
            retry_base_ms: parse_or(lookup, &key("RETRY_BASE_MS"), d.retry_base_ms)?,
            retry_multiplier: parse_or(lookup, &key("RETRY_MULTIPLIER"), d.retry_multiplier)?,
            retry_max_delay_ms: parse_or(lookup, &key("RETRY_MAX_DELAY_MS"), d.retry_max_delay_ms)?,

            // ========== TIME LIMITER ==========
            call_timeout_ms: parse_or(lookup, &key("CALL_TIMEOUT_MS"), d.call_timeout_ms)?,

            // ========== BULKHEAD ==========
            bulkhead_max_concurrent: parse_or(
                lookup,
                &key("BULKHEAD_MAX_CONCURRENT"),
                d.bulkhead_max_concurrent,
            )?,
            bulkhead_max_waiters: parse_or(lookup, &key("BULKHEAD_MAX_WAITERS"), d.bulkhead_max_waiters)?,
            bulkhead_max_wait_ms: parse_or(lookup, &key("BULKHEAD_MAX_WAIT_MS"), d.bulkhead_max_wait_ms)?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.cb_fail_rate > 0.0 && self.cb_fail_rate <= 1.0,
            "failure rate must be in (0, 1], got {}",
            self.cb_fail_rate
        );
        ensure!(self.cb_min_samples >= 1, "minimum samples must be at least 1");
        ensure!(
            self.cb_min_samples <= self.cb_window_size,
            "minimum samples ({}) cannot exceed window size ({})",
            self.cb_min_samples,
            self.cb_window_size
        );
        ensure!(self.retry_max_attempts >= 1, "at least one attempt is required");
        ensure!(
            self.retry_multiplier >= 1.0,
            "retry multiplier must be >= 1.0, got {}",
            self.retry_multiplier
        );
        ensure!(
            self.retry_base_ms <= self.retry_max_delay_ms,
            "retry base delay exceeds max delay"
        );
        ensure!(self.call_timeout_ms > 0, "call timeout must be positive");
        ensure!(self.bulkhead_max_concurrent >= 1, "bulkhead needs at least one slot");
        Ok(())
    }
}

impl Cfg {
    /// Loads settings from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Loads settings from an arbitrary key lookup and validates them.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let downstream = |prefix: &str, name: &str, default_url: &str| -> anyhow::Result<DownstreamCfg> {
            let resilience = ResilienceCfg::from_lookup(prefix, &lookup)?;
            resilience
                .validate()
                .with_context(|| format!("invalid resilience settings for {name}"))?;
            Ok(DownstreamCfg {
                name: name.to_owned(),
                base_url: lookup(&format!("{prefix}_SERVICE_URL"))
                    .unwrap_or_else(|| default_url.to_owned())
                    .trim_end_matches('/')
                    .to_owned(),
                resilience,
            })
        };

        Ok(Self {
            // ========== SERVER ==========
            port: parse_or(&lookup, "PORT", 8900)?,
            request_timeout_ms: parse_or(&lookup, "REQUEST_TIMEOUT_MS", 15_000)?,
            concurrency_limit: parse_or(&lookup, "CONCURRENCY_LIMIT", 1024)?,

            // ========== DOWNSTREAM CONNECTIONS ==========
            connect_timeout_ms: parse_or(&lookup, "CONNECT_TIMEOUT_MS", 250)?,
            downstream_username: lookup("DOWNSTREAM_USERNAME").unwrap_or_else(|| "user".into()),
            downstream_password: lookup("DOWNSTREAM_PASSWORD").unwrap_or_else(|| "password".into()),

            users: downstream("USER", "user-service", "http://localhost:8700/user-service")?,
            products: downstream("PRODUCT", "product-service", "http://localhost:8500/product-service")?,
            favourites: downstream(
                "FAVOURITE",
                "favourite-service",
                "http://localhost:8800/favourite-service",
            )?,
        })
    }

    /// Copy with secrets masked, safe to log.
    pub fn redacted(&self) -> Self {
        let mut c = self.clone();
        c.downstream_password = "***".into();
        c
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has invalid value {raw:?}")),
        None => Ok(default),
    }
}
