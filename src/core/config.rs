use crate::core::errors::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Inference provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

/// Bounded-concurrency strategy settings
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// Calls in flight per wave
    pub concurrency: usize,
    /// Pause between waves (client-side rate-limit courtesy)
    pub inter_batch_delay_ms: u64,
}

/// Async batch-job strategy settings
#[derive(Debug, Clone)]
pub struct BatchJobConfig {
    pub poll_interval_secs: u64,
    /// Hard ceiling on time spent polling one job
    pub timeout_secs: u64,
    /// Issue a best-effort remote cancel when the poll loop is abandoned
    pub cancel_on_abort: bool,
}

/// Token pricing in USD per 1000 tokens
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub standard_input_rate: f64,
    pub standard_output_rate: f64,
    pub batch_input_rate: f64,
    pub batch_output_rate: f64,
}

/// Circuit breaker around provider calls
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: usize,
    pub cooldown_secs: u64,
    pub success_threshold: usize,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub concurrency: ConcurrencyConfig,
    pub batch_job: BatchJobConfig,
    pub pricing: PricingConfig,
    pub breaker: BreakerConfig,
}

const DEFAULT_STANDARD_INPUT_RATE: f64 = 0.00015;
const DEFAULT_STANDARD_OUTPUT_RATE: f64 = 0.0006;
/// Batch jobs are billed at half the standard rate unless overridden
const BATCH_DISCOUNT: f64 = 0.5;

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to their defaults, same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let log_level = var("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let standard_input_rate = parsed(&var, "STANDARD_INPUT_RATE", DEFAULT_STANDARD_INPUT_RATE);
        let standard_output_rate =
            parsed(&var, "STANDARD_OUTPUT_RATE", DEFAULT_STANDARD_OUTPUT_RATE);

        Ok(Self {
            server: ServerConfig {
                port: parsed(&var, "SERVER_PORT", 8080),
                host: var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                log_level,
            },
            provider: ProviderConfig {
                api_key: var("OPENAI_API_KEY"),
                base_url: var("OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                model: var("ANALYSIS_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                max_tokens: parsed(&var, "MAX_TOKENS", 500),
                timeout_seconds: parsed(&var, "API_TIMEOUT_SECONDS", 60),
                max_retries: parsed(&var, "MAX_RETRIES", 3),
            },
            concurrency: ConcurrencyConfig {
                concurrency: parsed(&var, "CONCURRENCY", 10),
                inter_batch_delay_ms: parsed(&var, "INTER_BATCH_DELAY_MS", 100),
            },
            batch_job: BatchJobConfig {
                poll_interval_secs: parsed(&var, "BATCH_POLL_INTERVAL_SECS", 30),
                timeout_secs: parsed(&var, "BATCH_TIMEOUT_SECS", 24 * 60 * 60),
                cancel_on_abort: parsed(&var, "BATCH_CANCEL_ON_ABORT", true),
            },
            pricing: PricingConfig {
                standard_input_rate,
                standard_output_rate,
                batch_input_rate: parsed(
                    &var,
                    "BATCH_INPUT_RATE",
                    standard_input_rate * BATCH_DISCOUNT,
                ),
                batch_output_rate: parsed(
                    &var,
                    "BATCH_OUTPUT_RATE",
                    standard_output_rate * BATCH_DISCOUNT,
                ),
            },
            breaker: BreakerConfig {
                failure_threshold: parsed(&var, "BREAKER_FAILURE_THRESHOLD", 5),
                cooldown_secs: parsed(&var, "BREAKER_COOLDOWN_SECS", 60),
                success_threshold: parsed(&var, "BREAKER_SUCCESS_THRESHOLD", 2),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // API key is only checked when a live client is built, so tests and
        // dry configurations can load without one

        if self.concurrency.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(self.concurrency.concurrency));
        }

        if self.batch_job.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidBatchJobConfig(
                "poll interval must be > 0".to_string(),
            ));
        }
        if self.batch_job.timeout_secs < self.batch_job.poll_interval_secs {
            return Err(ConfigError::InvalidBatchJobConfig(format!(
                "timeout ({}s) must be >= poll interval ({}s)",
                self.batch_job.timeout_secs, self.batch_job.poll_interval_secs
            )));
        }

        let rates = [
            ("standard_input_rate", self.pricing.standard_input_rate),
            ("standard_output_rate", self.pricing.standard_output_rate),
            ("batch_input_rate", self.pricing.batch_input_rate),
            ("batch_output_rate", self.pricing.batch_output_rate),
        ];
        for (name, rate) in rates {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::InvalidPricing(format!(
                    "{} must be a non-negative number, got {}",
                    name, rate
                )));
            }
        }

        if self.provider.max_tokens == 0 {
            return Err(ConfigError::InvalidProviderConfig(
                "max_tokens must be > 0".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(ConfigError::InvalidProviderConfig(
                "circuit breaker thresholds must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn model(&self) -> &str {
        &self.provider.model
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.provider.api_key.as_deref().ok_or(ConfigError::NoApiKey)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.batch_job.poll_interval_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_job.timeout_secs)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.concurrency.inter_batch_delay_ms)
    }
}

fn parsed<T, F>(var: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

// Note: No Default implementation because Config::new() can fail.
// Tests build one with Config::from_lookup(|_| None).

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = Config::from_lookup(|key| vars.get(key).cloned())?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.concurrency.concurrency, 10);
        assert_eq!(config.concurrency.inter_batch_delay_ms, 100);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.batch_timeout(), Duration::from_secs(86_400));
        assert_eq!(config.log_level(), Level::INFO);
        assert!(config.api_key().is_err());
    }

    #[test]
    fn test_batch_rates_default_to_half_of_standard() {
        let config = config_with(&[("STANDARD_INPUT_RATE", "0.01")]).unwrap();
        assert_eq!(config.pricing.batch_input_rate, 0.005);
        assert_eq!(
            config.pricing.batch_output_rate,
            DEFAULT_STANDARD_OUTPUT_RATE * 0.5
        );
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = config_with(&[("CONCURRENCY", "lots"), ("LOG_LEVEL", "debug")]).unwrap();
        assert_eq!(config.concurrency.concurrency, 10);
        assert_eq!(config.log_level(), Level::DEBUG);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = config_with(&[("OPENAI_BASE_URL", "http://localhost:9000/v1/")]).unwrap();
        assert_eq!(config.provider.base_url, "http://localhost:9000/v1");
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(matches!(
            config_with(&[("CONCURRENCY", "0")]),
            Err(ConfigError::InvalidConcurrency(0))
        ));
    }

    #[test]
    fn test_rejects_timeout_shorter_than_poll_interval() {
        let result = config_with(&[
            ("BATCH_POLL_INTERVAL_SECS", "60"),
            ("BATCH_TIMEOUT_SECS", "30"),
        ]);
        assert!(matches!(result, Err(ConfigError::InvalidBatchJobConfig(_))));
    }

    #[test]
    fn test_rejects_negative_rate() {
        let result = config_with(&[("BATCH_OUTPUT_RATE", "-1")]);
        assert!(matches!(result, Err(ConfigError::InvalidPricing(_))));
    }
}
