//! Benchmark configuration, read from the environment (and an optional `.env` file).

use std::{env, fmt, str::FromStr, time::Duration};

use bon::Builder;
use objstore_client::StoreConfig;
use overload_throttle::throttle::ThrottleSettings;
use snafu::Snafu;

pub const ENV_ENDPOINT: &str = "BENCH_ENDPOINT";
pub const ENV_BUCKET: &str = "BENCH_BUCKET";
pub const ENV_ACL: &str = "BENCH_ACL";
pub const ENV_CONCURRENCY: &str = "BENCH_CONCURRENCY";
pub const ENV_KEYS: &str = "BENCH_KEYS";
pub const ENV_REQUESTS: &str = "BENCH_REQUESTS";
pub const ENV_METHOD: &str = "BENCH_METHOD";
pub const ENV_PAYLOAD_TEMPLATE: &str = "BENCH_PAYLOAD_TEMPLATE";
pub const ENV_PAYLOAD_LENGTH: &str = "BENCH_PAYLOAD_LENGTH";
pub const ENV_REPORT_INTERVAL_SECS: &str = "BENCH_REPORT_INTERVAL_SECS";
pub const ENV_OP_TIMEOUT_SECS: &str = "BENCH_OP_TIMEOUT_SECS";
pub const ENV_OVERLOAD_DELAY_MS: &str = "BENCH_OVERLOAD_DELAY_MS";

const DEFAULT_BUCKET: &str = "devices";
const DEFAULT_CONCURRENCY: u64 = 200;
const DEFAULT_KEYS: u64 = 200;
const DEFAULT_REQUESTS: u64 = 100_000;
const DEFAULT_PAYLOAD_TEMPLATE: &str = "Hello, S3, {}!";
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_OVERLOAD_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ConfigError {
    #[snafu(display("Required environment variable '{}' not set", name))]
    MissingVar { name: &'static str },

    #[snafu(display("Unknown method '{}', expected PUT or GET", value))]
    UnknownMethod { value: String },

    #[snafu(display("'{}' must be greater than zero", name))]
    NotPositive { name: &'static str },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Method {
    #[default]
    Put,
    Get,
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            m if m.eq_ignore_ascii_case("put") => Ok(Method::Put),
            m if m.eq_ignore_ascii_case("get") => Ok(Method::Get),
            other => Err(ConfigError::UnknownMethod {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Put => write!(f, "PUT"),
            Method::Get => write!(f, "GET"),
        }
    }
}

/// Everything one benchmark run needs.
#[derive(Clone, Debug, Builder)]
pub struct BenchConfig {
    #[builder(into)]
    pub endpoint: String,

    #[builder(into, default = DEFAULT_BUCKET.to_string())]
    pub bucket: String,

    /// Canned ACL sent with every PUT.
    #[builder(into)]
    pub acl: Option<String>,

    /// Transport concurrency. The admission ceiling starts at twice this.
    #[builder(default = DEFAULT_CONCURRENCY)]
    pub concurrency: u64,

    /// Number of distinct keys; request `n` goes to key `n % keys`.
    #[builder(default = DEFAULT_KEYS)]
    pub keys: u64,

    #[builder(default = DEFAULT_REQUESTS)]
    pub requests: u64,

    #[builder(default)]
    pub method: Method,

    /// `{}` is replaced with the zero-padded request number.
    #[builder(into, default = DEFAULT_PAYLOAD_TEMPLATE.to_string())]
    pub payload_template: String,

    pub payload_length: Option<usize>,

    #[builder(default = DEFAULT_REPORT_INTERVAL)]
    pub report_interval: Duration,

    #[builder(default = DEFAULT_OP_TIMEOUT)]
    pub op_timeout: Duration,

    #[builder(default = DEFAULT_OVERLOAD_DELAY)]
    pub overload_delay: Duration,
}

/// Parses `var_name`, falling back to `default_value` when it is unset or malformed.
fn get_env_var<T, F>(lookup: &F, var_name: &str, default_value: T) -> T
where
    T: FromStr + fmt::Debug,
    <T as FromStr>::Err: fmt::Debug,
    F: Fn(&str) -> Option<String>,
{
    lookup(var_name)
        .and_then(|val_str| match val_str.trim().parse::<T>() {
            Ok(val) => Some(val),
            Err(e) => {
                warn!(
                    "Failed to parse env var '{}' (value: '{}'). Error: {:?}. Using default: {:?}",
                    var_name, val_str, e, default_value
                );
                None
            }
        })
        .unwrap_or(default_value)
}

impl BenchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup(ENV_ENDPOINT).ok_or(ConfigError::MissingVar { name: ENV_ENDPOINT })?;
        let method = match lookup(ENV_METHOD) {
            Some(value) => value.parse()?,
            None => Method::default(),
        };

        let config = Self::builder()
            .endpoint(endpoint)
            .bucket(lookup(ENV_BUCKET).unwrap_or_else(|| DEFAULT_BUCKET.to_string()))
            .maybe_acl(lookup(ENV_ACL))
            .concurrency(get_env_var(&lookup, ENV_CONCURRENCY, DEFAULT_CONCURRENCY))
            .keys(get_env_var(&lookup, ENV_KEYS, DEFAULT_KEYS))
            .requests(get_env_var(&lookup, ENV_REQUESTS, DEFAULT_REQUESTS))
            .method(method)
            .payload_template(
                lookup(ENV_PAYLOAD_TEMPLATE).unwrap_or_else(|| DEFAULT_PAYLOAD_TEMPLATE.to_string()),
            )
            .maybe_payload_length(
                lookup(ENV_PAYLOAD_LENGTH).map(|_| get_env_var(&lookup, ENV_PAYLOAD_LENGTH, 0)),
            )
            .report_interval(Duration::from_secs(get_env_var(
                &lookup,
                ENV_REPORT_INTERVAL_SECS,
                DEFAULT_REPORT_INTERVAL.as_secs(),
            )))
            .op_timeout(Duration::from_secs(get_env_var(
                &lookup,
                ENV_OP_TIMEOUT_SECS,
                DEFAULT_OP_TIMEOUT.as_secs(),
            )))
            .overload_delay(Duration::from_millis(get_env_var(
                &lookup,
                ENV_OVERLOAD_DELAY_MS,
                DEFAULT_OVERLOAD_DELAY.as_millis() as u64,
            )))
            .build();

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::NotPositive {
                name: ENV_CONCURRENCY,
            });
        }
        if self.keys == 0 {
            return Err(ConfigError::NotPositive { name: ENV_KEYS });
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::builder()
            .endpoint(self.endpoint.clone())
            .bucket(self.bucket.clone())
            .concurrency(usize::try_from(self.concurrency).unwrap_or(usize::MAX))
            .op_timeout(self.op_timeout)
            .build()
    }

    pub fn throttle_settings(&self) -> ThrottleSettings {
        ThrottleSettings::builder()
            .initial_ceiling(self.concurrency.saturating_mul(2))
            .overload_delay(self.overload_delay)
            .build()
    }
}
