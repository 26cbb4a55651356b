use deployq_async::StartupPolicy;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1/";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 15 * 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;
const DEFAULT_QUEUE_PREFIX: &str = "deployq";

/// Scheme that selects the in-process store instead of redis.
pub const MEMORY_STORE_URL: &str = "memory://";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key}={value}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_url: String,
    pub api_key: String,
    pub port: u16,
    pub expose_all_interfaces: bool,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: u32,
    pub startup_policy: StartupPolicy,
    pub queue_prefix: String,
    pub max_pending_per_group: usize,
    pub worker_concurrency: usize,
    pub deploy_timeout: Option<Duration>,
    pub deploy_command: String,
}

impl Settings {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let rate_limit_window_secs: u64 =
            env.parsed("RATE_LIMIT_WINDOW_SECS", DEFAULT_RATE_LIMIT_WINDOW_SECS)?;
        if rate_limit_window_secs == 0 {
            return Err(env.invalid("RATE_LIMIT_WINDOW_SECS", "must be greater than 0"));
        }
        let rate_limit_max_requests: u32 =
            env.parsed("RATE_LIMIT_MAX_REQUESTS", DEFAULT_RATE_LIMIT_MAX_REQUESTS)?;
        if rate_limit_max_requests == 0 {
            return Err(env.invalid("RATE_LIMIT_MAX_REQUESTS", "must be greater than 0"));
        }

        // 0 means one deploy per admitted job with no cap
        let worker_concurrency: usize = env.parsed("WORKER_CONCURRENCY", 0)?;
        let deploy_timeout = match env.get("DEPLOY_TIMEOUT_SECS") {
            Some(_) => Some(Duration::from_secs(env.parsed("DEPLOY_TIMEOUT_SECS", 0)?)),
            None => None,
        };
        // a capped pool only keeps groups independent when deploys are bounded
        if worker_concurrency > 0 && deploy_timeout.is_none() {
            return Err(env.invalid(
                "WORKER_CONCURRENCY",
                "a concurrency cap requires DEPLOY_TIMEOUT_SECS",
            ));
        }

        Ok(Self {
            redis_url: env
                .get("REDIS_URL")
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            api_key: env.required("API_KEY")?,
            port: env.parsed("PORT", DEFAULT_PORT)?,
            expose_all_interfaces: env
                .get("EXPOSE_ALL_INTERFACES")
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("true")),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            rate_limit_max_requests,
            startup_policy: env.parsed("STARTUP_POLICY", StartupPolicy::default())?,
            queue_prefix: env
                .get("QUEUE_PREFIX")
                .unwrap_or_else(|| DEFAULT_QUEUE_PREFIX.to_string()),
            max_pending_per_group: env.parsed("MAX_PENDING_PER_GROUP", 0)?,
            worker_concurrency,
            deploy_timeout,
            deploy_command: env.required("DEPLOY_COMMAND")?,
        })
    }

    /// Loopback unless all interfaces are explicitly exposed.
    pub fn bind_addr(&self) -> SocketAddr {
        let host = if self.expose_all_interfaces {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        };
        SocketAddr::new(host, self.port)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.redis_url.starts_with(MEMORY_STORE_URL)
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Blank values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(value) => value.parse().map_err(|err: T::Err| ConfigError::Invalid {
                key,
                value,
                reason: err.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn invalid(&self, key: &'static str, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            key,
            value: self.get(key).unwrap_or_default(),
            reason: reason.to_string(),
        }
    }
}
