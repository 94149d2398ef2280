use std::str::FromStr;
use std::time::Duration;

use http::StatusCode;
use rater_proto::Quota;
use tracing::Level;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Errors found while loading or validating a [`RateLimitConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid rate \"{0}\"")]
    InvalidRate(String),

    #[error("invalid burst \"{0}\"")]
    InvalidBurst(String),

    #[error("invalid parameter \"{0}\"")]
    UnknownParameter(String),

    #[error("\"{0}\" parameter specified more than once")]
    Duplicate(&'static str),

    #[error("value must be between 400 and 599, got {0}")]
    StatusOutOfRange(u16),

    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("buffer size must be greater than zero")]
    ZeroBuffer,

    #[error("invalid log level \"{0}\"")]
    InvalidLevel(String),
}

/// A number of requests allowed per period.
///
/// Parses `30r/m`, `rate=30r/m` or a bare `30` (per second).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub count: u64,
    pub period: Duration,
}

impl Rate {
    pub fn per_second(count: u64) -> Self {
        Self {
            count,
            period: Duration::from_secs(1),
        }
    }

    pub fn per_minute(count: u64) -> Self {
        Self {
            count,
            period: Duration::from_secs(60),
        }
    }

    pub fn per_hour(count: u64) -> Self {
        Self {
            count,
            period: Duration::from_secs(3600),
        }
    }
}

impl FromStr for Rate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidRate(s.to_string());
        let value = s.strip_prefix("rate=").unwrap_or(s);

        let (digits, period) = match value.find(|c: char| !c.is_ascii_digit()) {
            None => (value, 1),
            Some(at) => {
                let period = match &value[at..] {
                    "r/s" => 1,
                    "r/m" => 60,
                    "r/h" => 3600,
                    _ => return Err(invalid()),
                };
                (&value[..at], period)
            }
        };

        let count: u64 = digits.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }

        Ok(Self {
            count,
            period: Duration::from_secs(period),
        })
    }
}

/// Connect, send and read timeouts for one backend exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub send: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_TIMEOUT,
            send: DEFAULT_TIMEOUT,
            read: DEFAULT_TIMEOUT,
        }
    }
}

/// Immutable per-route settings, shared by every request on that route.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "raw::RawConfig"))]
pub struct RateLimitConfig {
    quota: Quota,
    prefix: String,
    enable_headers: bool,
    status_code: StatusCode,
    limit_log_level: Level,
    timeouts: Timeouts,
    buffer_size: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            quota: Quota::default(),
            prefix: String::new(),
            enable_headers: false,
            status_code: StatusCode::TOO_MANY_REQUESTS,
            limit_log_level: Level::WARN,
            timeouts: Timeouts::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl RateLimitConfig {
    /// Create a configuration allowing `rate`, with every other setting at
    /// its default.
    pub fn new(rate: Rate) -> Self {
        Self::default().with_rate(rate)
    }

    /// Parse directive-style parameters, e.g. `rate=30r/m burst=15`.
    ///
    /// A bare rate such as `10r/s` is accepted in place of `rate=10r/s`.
    pub fn from_params(params: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut seen_rate = false;
        let mut seen_burst = false;

        for param in params.split_whitespace() {
            if let Some(burst) = param.strip_prefix("burst=") {
                if seen_burst {
                    return Err(ConfigError::Duplicate("burst"));
                }
                seen_burst = true;
                config.quota.burst = parse_burst(burst)?;
            } else if param.starts_with("rate=")
                || param.starts_with(|c: char| c.is_ascii_digit())
            {
                if seen_rate {
                    return Err(ConfigError::Duplicate("rate"));
                }
                seen_rate = true;
                config = config.with_rate(param.parse()?);
            } else {
                return Err(ConfigError::UnknownParameter(param.to_string()));
            }
        }

        Ok(config)
    }

    pub fn with_rate(mut self, rate: Rate) -> Self {
        self.quota.rate = rate.count;
        self.quota.period = rate.period.as_secs();
        self
    }

    pub fn with_burst(mut self, burst: u64) -> Self {
        self.quota.burst = burst;
        self
    }

    /// Units consumed per request. Anything other than one is sent to the backend.
    pub fn with_quantity(mut self, quantity: u64) -> Self {
        self.quota.quantity = quantity;
        self
    }

    /// Prefix joined to every key as `prefix_key`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Attach `X-RateLimit-*` headers to allowed responses as well.
    ///
    /// Denials carry them regardless.
    pub fn with_headers(mut self, enable: bool) -> Self {
        self.enable_headers = enable;
        self
    }

    pub fn with_status_code(mut self, status_code: StatusCode) -> Self {
        self.status_code = status_code;
        self
    }

    /// Level at which "rate limit exceeded" events are logged.
    pub fn with_limit_log_level(mut self, level: Level) -> Self {
        self.limit_log_level = level;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.send = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.read = timeout;
        self
    }

    /// Size of the reply buffer. A reply that does not fit is an error.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Check every setting, returning the first one that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quota.rate == 0 {
            return Err(ConfigError::InvalidRate(self.quota.rate.to_string()));
        }
        let code = self.status_code.as_u16();
        if !(400..=599).contains(&code) {
            return Err(ConfigError::StatusOutOfRange(code));
        }
        if self.timeouts.connect.is_zero() {
            return Err(ConfigError::ZeroTimeout("connect"));
        }
        if self.timeouts.send.is_zero() {
            return Err(ConfigError::ZeroTimeout("send"));
        }
        if self.timeouts.read.is_zero() {
            return Err(ConfigError::ZeroTimeout("read"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBuffer);
        }
        Ok(())
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn headers_enabled(&self) -> bool {
        self.enable_headers
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn limit_log_level(&self) -> Level {
        self.limit_log_level
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

fn parse_burst(value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(burst) if burst > 0 => Ok(burst),
        _ => Err(ConfigError::InvalidBurst(value.to_string())),
    }
}

#[cfg(feature = "serde")]
mod raw {
    use std::time::Duration;

    use http::StatusCode;
    use serde::Deserialize;

    use super::ConfigError;
    use super::DEFAULT_BUFFER_SIZE;
    use super::DEFAULT_TIMEOUT;
    use super::RateLimitConfig;
    use super::Timeouts;

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    pub(super) struct RawConfig {
        rate: String,
        #[serde(default)]
        burst: u64,
        #[serde(default = "one")]
        quantity: u64,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        enable_headers: bool,
        #[serde(default = "too_many_requests")]
        status_code: u16,
        #[serde(default = "warn")]
        limit_log_level: String,
        #[serde(default = "default_timeout", with = "duration")]
        connect_timeout: Duration,
        #[serde(default = "default_timeout", with = "duration")]
        send_timeout: Duration,
        #[serde(default = "default_timeout", with = "duration")]
        read_timeout: Duration,
        #[serde(default = "default_buffer")]
        buffer_size: usize,
    }

    fn one() -> u64 {
        1
    }

    fn too_many_requests() -> u16 {
        429
    }

    fn warn() -> String {
        "warn".to_string()
    }

    fn default_timeout() -> Duration {
        DEFAULT_TIMEOUT
    }

    fn default_buffer() -> usize {
        DEFAULT_BUFFER_SIZE
    }

    mod duration {
        use std::time::Duration;

        use serde::Deserialize;
        use serde::Deserializer;
        use serde::de::Error;

        pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            humantime::parse_duration(&s).map_err(D::Error::custom)
        }
    }

    impl TryFrom<RawConfig> for RateLimitConfig {
        type Error = ConfigError;

        fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
            let status_code = StatusCode::from_u16(raw.status_code)
                .map_err(|_| ConfigError::StatusOutOfRange(raw.status_code))?;
            let limit_log_level = raw
                .limit_log_level
                .parse()
                .map_err(|_| ConfigError::InvalidLevel(raw.limit_log_level.clone()))?;

            let config = RateLimitConfig::new(raw.rate.parse()?)
                .with_burst(raw.burst)
                .with_quantity(raw.quantity)
                .with_prefix(raw.prefix)
                .with_headers(raw.enable_headers)
                .with_status_code(status_code)
                .with_limit_log_level(limit_log_level)
                .with_timeouts(Timeouts {
                    connect: raw.connect_timeout,
                    send: raw.send_timeout,
                    read: raw.read_timeout,
                })
                .with_buffer_size(raw.buffer_size);

            config.validate()?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.quota(), Quota::default());
        assert_eq!(config.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(config.timeouts(), Timeouts::default());
        assert_eq!(config.timeouts().read, Duration::from_secs(60));
        assert_eq!(config.buffer_size(), 4096);
        assert_eq!(config.limit_log_level(), Level::WARN);
        assert!(!config.headers_enabled());
        assert!(config.prefix().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rate_parsing() {
        assert_eq!("10r/s".parse::<Rate>().unwrap(), Rate::per_second(10));
        assert_eq!("rate=30r/m".parse::<Rate>().unwrap(), Rate::per_minute(30));
        assert_eq!("5r/h".parse::<Rate>().unwrap(), Rate::per_hour(5));
        assert_eq!("7".parse::<Rate>().unwrap(), Rate::per_second(7));

        for bad in ["", "r/s", "0r/s", "10r/d", "10 r/s", "-1r/s", "ten"] {
            assert!(
                matches!(bad.parse::<Rate>(), Err(ConfigError::InvalidRate(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_from_params() {
        let config = RateLimitConfig::from_params("rate=30r/m burst=15").unwrap();
        let quota = config.quota();
        assert_eq!(quota.rate, 30);
        assert_eq!(quota.period, 60);
        assert_eq!(quota.burst, 15);
        assert_eq!(quota.quantity, 1);

        let config = RateLimitConfig::from_params("100r/h").unwrap();
        assert_eq!(config.quota().period, 3600);
        assert_eq!(config.quota().burst, 0);
    }

    #[test]
    fn test_from_params_errors() {
        assert_eq!(
            RateLimitConfig::from_params("rate=1r/s burst=0").unwrap_err(),
            ConfigError::InvalidBurst("0".to_string())
        );
        assert_eq!(
            RateLimitConfig::from_params("rate=1r/s rate=2r/s").unwrap_err(),
            ConfigError::Duplicate("rate")
        );
        assert_eq!(
            RateLimitConfig::from_params("burst=1 burst=2").unwrap_err(),
            ConfigError::Duplicate("burst")
        );
        assert_eq!(
            RateLimitConfig::from_params("rate=1r/s nodelay").unwrap_err(),
            ConfigError::UnknownParameter("nodelay".to_string())
        );
    }

    #[test]
    fn test_validate() {
        let base = RateLimitConfig::new(Rate::per_second(1));

        let config = base.clone().with_status_code(StatusCode::OK);
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::StatusOutOfRange(200)
        );

        let config = base
            .clone()
            .with_status_code(StatusCode::SERVICE_UNAVAILABLE);
        assert!(config.validate().is_ok());

        let config = base.clone().with_read_timeout(Duration::ZERO);
        assert_eq!(config.validate().unwrap_err(), ConfigError::ZeroTimeout("read"));

        let config = base.with_buffer_size(0);
        assert_eq!(config.validate().unwrap_err(), ConfigError::ZeroBuffer);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize() {
        let config: RateLimitConfig = serde_json::from_str(
            r#"{
                "rate": "30r/m",
                "burst": 15,
                "prefix": "api",
                "enable_headers": true,
                "status_code": 503,
                "limit_log_level": "info",
                "read_timeout": "250ms"
            }"#,
        )
        .unwrap();

        assert_eq!(config.quota().rate, 30);
        assert_eq!(config.quota().period, 60);
        assert_eq!(config.quota().burst, 15);
        assert_eq!(config.prefix(), "api");
        assert!(config.headers_enabled());
        assert_eq!(config.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(config.limit_log_level(), Level::INFO);
        assert_eq!(config.timeouts().read, Duration::from_millis(250));
        assert_eq!(config.timeouts().connect, Duration::from_secs(60));

        let err = serde_json::from_str::<RateLimitConfig>(r#"{"rate": "1r/s", "status_code": 302}"#);
        assert!(err.is_err());
    }
}
