use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default base URL of the Graph messaging endpoint.
pub const DEFAULT_GRAPH_API_URL: &str = "https://graph.facebook.com/v21.0";

/// Settings the delivery pipeline reads. Loaded once at startup and shared
/// read-only (behind an `Arc`) for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lower-cased trigger substrings, in the order they were configured.
    pub keywords: Vec<String>,
    /// DM text. `{username}` is replaced with the commenter's username.
    pub message_template: String,
    /// Unconditional wait before every dispatch.
    pub pre_send_delay: Duration,
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,
    /// First retry waits this long; each later retry doubles it.
    pub backoff_base: Duration,
    /// Short-circuit retries for errors that cannot succeed on retry.
    pub skip_terminal_retries: bool,
    /// Token the webhook verification handshake must present.
    pub verify_token: String,
    /// Bearer credential for the messaging endpoint.
    pub access_token: String,
    /// Business account id, used in the outbound URL path.
    pub business_id: String,
    pub graph_api_url: String,
    /// Timeout for a single outbound call.
    pub dispatch_timeout: Duration,
    /// Outbound calls allowed per hour. 0 disables the throttle.
    pub rate_limit_per_hour: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            message_template: String::new(),
            pre_send_delay: Duration::from_secs(60),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            skip_terminal_retries: false,
            verify_token: String::new(),
            access_token: String::new(),
            business_id: String::new(),
            graph_api_url: DEFAULT_GRAPH_API_URL.to_string(),
            dispatch_timeout: Duration::from_secs(10),
            rate_limit_per_hour: 200,
        }
    }
}

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub db_path: String,
    /// PostgreSQL connection URL (when set and starts with postgres://, uses Postgres backend)
    pub database_url: Option<String>,
    /// Capacity of the bounded job queue.
    pub queue_capacity: usize,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Missing values fall back to defaults; values that are present but
    /// unparsable are an error rather than being silently replaced.
    pub fn load() -> Result<Self> {
        let defaults = PipelineConfig::default();

        let pipeline = PipelineConfig {
            keywords: parse_keywords(&env::var("KEYWORDS").unwrap_or_default()),
            message_template: env::var("DM_MESSAGE").unwrap_or_default(),
            pre_send_delay: duration_var("DM_DELAY", defaults.pre_send_delay)?,
            max_retries: parsed_var("MAX_RETRIES", defaults.max_retries)?,
            backoff_base: duration_var("RETRY_BACKOFF_BASE", defaults.backoff_base)?,
            skip_terminal_retries: bool_var("SKIP_TERMINAL_RETRIES")?,
            verify_token: env::var("VERIFY_TOKEN").unwrap_or_default(),
            access_token: env::var("ACCESS_TOKEN").unwrap_or_default(),
            business_id: env::var("IG_BUSINESS_ID").unwrap_or_default(),
            graph_api_url: env::var("GRAPH_API_URL")
                .unwrap_or_else(|_| DEFAULT_GRAPH_API_URL.to_string()),
            dispatch_timeout: duration_var("DISPATCH_TIMEOUT", defaults.dispatch_timeout)?,
            rate_limit_per_hour: parsed_var("DM_RATE_LIMIT_PER_HOUR", defaults.rate_limit_per_hour)?,
        };

        let queue_capacity: usize = parsed_var("QUEUE_CAPACITY", 100)?;
        if queue_capacity == 0 {
            anyhow::bail!("QUEUE_CAPACITY must be at least 1");
        }

        Ok(Self {
            port: parsed_var("PORT", 8080)?,
            bind: env::var("BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            db_path: env::var("AUTODM_DB_PATH").unwrap_or_else(|_| "./autodm.db".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            queue_capacity,
            pipeline,
        })
    }

    /// Check that everything `serve` needs is configured.
    /// Call this before starting the webhook server and worker.
    pub fn require_serve(&self) -> Result<()> {
        let required = [
            ("VERIFY_TOKEN", &self.pipeline.verify_token),
            ("ACCESS_TOKEN", &self.pipeline.access_token),
            ("IG_BUSINESS_ID", &self.pipeline.business_id),
            ("DM_MESSAGE", &self.pipeline.message_template),
        ];
        for (name, value) in required {
            if value.is_empty() {
                anyhow::bail!(
                    "{name} not set. Add it to your .env file.\n\
                     See .env.example for the required variables."
                );
            }
        }
        Ok(())
    }

    /// Whether DATABASE_URL selects the PostgreSQL backend.
    pub fn uses_postgres(&self) -> bool {
        self.database_url
            .as_deref()
            .is_some_and(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"))
    }

    /// A display-friendly database identifier with any password redacted.
    pub fn db_display(&self) -> String {
        match self.database_url.as_deref() {
            Some(url) if self.uses_postgres() => match url.find('@') {
                Some(at) => {
                    let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
                    format!("{}****@{}", &url[..scheme_end], &url[at + 1..])
                }
                None => url.to_string(),
            },
            _ => self.db_path.clone(),
        }
    }
}

/// Split a comma-separated keyword list into trimmed, lower-cased keywords.
///
/// Empty entries are dropped: an empty keyword would match every comment.
/// Duplicates are dropped, keeping first-seen order.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for keyword in raw.split(',').map(|k| k.trim().to_lowercase()) {
        if !keyword.is_empty() && !keywords.contains(&keyword) {
            keywords.push(keyword);
        }
    }
    keywords
}

/// Parse a Go-style duration string: `1m`, `30s`, `1m30s`, `500ms`, `1h`.
/// A bare integer is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("empty duration");
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits == 0 {
            anyhow::bail!("invalid duration {raw:?}: expected a number");
        }
        let value: f64 = rest[..digits]
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => anyhow::bail!("invalid duration {raw:?}: missing unit"),
            unit => anyhow::bail!("invalid duration {raw:?}: unknown unit {unit:?}"),
        };
        rest = &rest[unit_len..];
        total += Duration::try_from_secs_f64(value * seconds_per_unit)
            .with_context(|| format!("invalid duration {raw:?}: out of range"))?;
    }
    Ok(total)
}

fn duration_var(name: &str, default: Duration) -> Result<Duration> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            parse_duration(&raw).with_context(|| format!("{name} is not a valid duration"))
        }
        _ => Ok(default),
    }
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
        _ => Ok(default),
    }
}

fn bool_var(name: &str) -> Result<bool> {
    match env::var(name).as_deref().map(str::trim) {
        Ok("1") | Ok("true") | Ok("yes") => Ok(true),
        Ok("0") | Ok("false") | Ok("no") | Ok("") | Err(_) => Ok(false),
        Ok(other) => anyhow::bail!("{name} must be true or false, got {other:?}"),
    }
}
