use std::env;
use std::path::Path;
use std::str::FromStr;

use crate::error::AppError;
use crate::patterns::{default_principles, ConstitutionalConfig, Principle, TotConfig};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub tot: TotConfig,
    pub constitutional: ConstitutionalConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub tot: String,
    pub review: String,
    pub revise: String,
}

/// Upper bound accepted for `MAX_RETRIES`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request_defaults = RequestConfig::default();
        let request = RequestConfig {
            timeout_ms: env_parse("REQUEST_TIMEOUT_MS", request_defaults.timeout_ms)?,
            max_retries: env_parse("MAX_RETRIES", request_defaults.max_retries)?,
            retry_delay_ms: env_parse("RETRY_DELAY_MS", request_defaults.retry_delay_ms)?,
        };

        if request.max_retries > MAX_RETRIES_LIMIT {
            return Err(AppError::Config {
                message: format!(
                    "MAX_RETRIES must be at most {} (got {})",
                    MAX_RETRIES_LIMIT, request.max_retries
                ),
            });
        }

        let pipes = PipeConfig {
            tot: env::var("PIPE_TOT").unwrap_or_else(|_| "tree-of-thoughts-v1".to_string()),
            review: env::var("PIPE_REVIEW")
                .unwrap_or_else(|_| "constitutional-review-v1".to_string()),
            revise: env::var("PIPE_REVISE")
                .unwrap_or_else(|_| "constitutional-revise-v1".to_string()),
        };

        let tot_defaults = TotConfig::default();
        let tot = TotConfig {
            max_depth: env_parse("TOT_MAX_DEPTH", tot_defaults.max_depth)?,
            max_branches: env_parse("TOT_MAX_BRANCHES", tot_defaults.max_branches)?,
            prune_threshold: env_parse("TOT_PRUNE_THRESHOLD", tot_defaults.prune_threshold)?,
            evaluation_criteria: env::var("TOT_EVALUATION_CRITERIA")
                .map(|s| parse_list(&s))
                .unwrap_or(tot_defaults.evaluation_criteria),
            max_concurrent_expansions: env_parse(
                "TOT_MAX_CONCURRENCY",
                tot_defaults.max_concurrent_expansions,
            )?,
            temperature: tot_defaults.temperature,
        };
        tot.validate()?;

        let constitutional_defaults = ConstitutionalConfig::default();
        let principles = principles_from_env()?;
        let max_revisions: i64 = env_parse(
            "CONSTITUTION_MAX_REVISIONS",
            constitutional_defaults.max_revisions as i64,
        )?;
        if max_revisions < 0 {
            return Err(AppError::Config {
                message: format!(
                    "CONSTITUTION_MAX_REVISIONS must not be negative (got {})",
                    max_revisions
                ),
            });
        }
        let constitutional = ConstitutionalConfig {
            principles,
            min_compliance_score: env_parse(
                "CONSTITUTION_MIN_COMPLIANCE",
                constitutional_defaults.min_compliance_score,
            )?,
            enable_revision: env_parse(
                "CONSTITUTION_ENABLE_REVISION",
                constitutional_defaults.enable_revision,
            )?,
            max_revisions: max_revisions as usize,
            temperature: constitutional_defaults.temperature,
        };
        constitutional.validate()?;

        Ok(Config {
            langbase,
            logging,
            request,
            pipes,
            tot,
            constitutional,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            tot: "tree-of-thoughts-v1".to_string(),
            review: "constitutional-review-v1".to_string(),
            revise: "constitutional-revise-v1".to_string(),
        }
    }
}

/// The validated principle set named by `CONSTITUTION_PATH`, or the
/// defaults when it is unset. Needs no Langbase credentials.
pub fn principles_from_env() -> Result<Vec<Principle>, AppError> {
    let _ = dotenvy::dotenv();
    let principles = match env::var("CONSTITUTION_PATH") {
        Ok(path) => load_principles(Path::new(&path))?,
        Err(_) => default_principles(),
    };
    ConstitutionalConfig::default()
        .with_principles(principles.clone())
        .validate()?;
    Ok(principles)
}

/// Load a principle set from a JSON file containing an array of principles.
pub fn load_principles(path: &Path) -> Result<Vec<Principle>, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|e| AppError::Config {
        message: format!("Failed to read principles from {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&raw).map_err(|e| AppError::Config {
        message: format!("Invalid principles file {}: {}", path.display(), e),
    })
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| AppError::Config {
            message: format!("{} has an invalid value: '{}'", name, raw),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
