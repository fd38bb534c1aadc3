//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides and rejects malformed values.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use consult_patterns::config::{principles_from_env, Config, LogFormat};
use consult_patterns::patterns::{default_principles, PrincipleCategory};
use consult_patterns::AppError;
use serial_test::serial;
use std::env;
use std::io::Write;

const MANAGED_VARS: &[&str] = &[
    "LANGBASE_API_KEY",
    "LANGBASE_BASE_URL",
    "LOG_LEVEL",
    "LOG_FORMAT",
    "REQUEST_TIMEOUT_MS",
    "MAX_RETRIES",
    "RETRY_DELAY_MS",
    "PIPE_TOT",
    "PIPE_REVIEW",
    "PIPE_REVISE",
    "TOT_MAX_DEPTH",
    "TOT_MAX_BRANCHES",
    "TOT_PRUNE_THRESHOLD",
    "TOT_EVALUATION_CRITERIA",
    "TOT_MAX_CONCURRENCY",
    "CONSTITUTION_MIN_COMPLIANCE",
    "CONSTITUTION_ENABLE_REVISION",
    "CONSTITUTION_MAX_REVISIONS",
    "CONSTITUTION_PATH",
];

/// Run `f` with exactly the given variables set (plus an API key unless
/// overridden), clearing every managed variable afterwards.
fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    for name in MANAGED_VARS {
        env::remove_var(name);
    }
    env::set_var("LANGBASE_API_KEY", "test-key");
    for (name, value) in vars {
        env::set_var(name, value);
    }
    let result = f();
    for name in MANAGED_VARS {
        env::remove_var(name);
    }
    result
}

fn expect_config_error(vars: &[(&str, &str)]) -> String {
    match with_env(vars, Config::from_env) {
        Err(AppError::Config { message }) => message,
        other => panic!("Expected config error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_config_from_env_defaults() {
    let config = with_env(&[], Config::from_env).unwrap();

    assert_eq!(config.langbase.api_key, "test-key");
    assert_eq!(config.langbase.base_url, "https://api.langbase.com");
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert_eq!(config.request.max_retries, 3);
    assert_eq!(config.pipes.tot, "tree-of-thoughts-v1");
    assert_eq!(config.tot.max_depth, 3);
    assert_eq!(config.tot.max_branches, 3);
    assert!(config.tot.evaluation_criteria.is_empty());
    assert_eq!(config.constitutional.max_revisions, 3);
    assert!(config.constitutional.enable_revision);
    assert!(!config.constitutional.principles.is_empty());
}

#[test]
#[serial]
fn test_config_requires_api_key() {
    let result = with_env(&[], || {
        env::remove_var("LANGBASE_API_KEY");
        Config::from_env()
    });
    // A local .env file may supply the key; only assert the error shape.
    if let Err(e) = result {
        assert!(e.to_string().contains("LANGBASE_API_KEY"));
    }
}

#[test]
#[serial]
fn test_config_from_env_overrides() {
    let config = with_env(
        &[
            ("LANGBASE_BASE_URL", "https://custom.api.com"),
            ("LOG_FORMAT", "JSON"),
            ("REQUEST_TIMEOUT_MS", "60000"),
            ("PIPE_REVIEW", "review-v2"),
            ("TOT_MAX_DEPTH", "5"),
            ("TOT_MAX_BRANCHES", "2"),
            ("TOT_PRUNE_THRESHOLD", "0.45"),
            ("TOT_EVALUATION_CRITERIA", "Accuracy, Feasibility,,"),
            ("TOT_MAX_CONCURRENCY", "8"),
            ("CONSTITUTION_MIN_COMPLIANCE", "0.9"),
            ("CONSTITUTION_ENABLE_REVISION", "false"),
            ("CONSTITUTION_MAX_REVISIONS", "0"),
        ],
        Config::from_env,
    )
    .unwrap();

    assert_eq!(config.langbase.base_url, "https://custom.api.com");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.request.timeout_ms, 60000);
    assert_eq!(config.pipes.review, "review-v2");
    assert_eq!(config.tot.max_depth, 5);
    assert_eq!(config.tot.max_branches, 2);
    assert_eq!(config.tot.prune_threshold, 0.45);
    assert_eq!(
        config.tot.evaluation_criteria,
        vec!["Accuracy".to_string(), "Feasibility".to_string()]
    );
    assert_eq!(config.tot.max_concurrent_expansions, 8);
    assert_eq!(config.constitutional.min_compliance_score, 0.9);
    assert!(!config.constitutional.enable_revision);
    assert_eq!(config.constitutional.max_revisions, 0);
}

#[test]
#[serial]
fn test_negative_max_revisions_is_rejected() {
    let message = expect_config_error(&[("CONSTITUTION_MAX_REVISIONS", "-1")]);
    assert!(message.contains("CONSTITUTION_MAX_REVISIONS"));
}

#[test]
#[serial]
fn test_excessive_max_retries_is_rejected() {
    let message = expect_config_error(&[("MAX_RETRIES", "4000000000")]);
    assert!(message.contains("MAX_RETRIES must be at most 10"));

    let config = with_env(&[("MAX_RETRIES", "10")], Config::from_env).unwrap();
    assert_eq!(config.request.max_retries, 10);
}

#[test]
#[serial]
fn test_malformed_number_is_rejected() {
    let message = expect_config_error(&[("TOT_MAX_DEPTH", "deep")]);
    assert!(message.contains("TOT_MAX_DEPTH"));
}

#[test]
#[serial]
fn test_out_of_range_values_are_rejected() {
    expect_config_error(&[("TOT_MAX_DEPTH", "0")]);
    expect_config_error(&[("TOT_PRUNE_THRESHOLD", "1.5")]);
    expect_config_error(&[("CONSTITUTION_MIN_COMPLIANCE", "-0.1")]);
}

#[test]
#[serial]
fn test_principles_loaded_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[
            {{"id": "no-dosing", "description": "Never give doses", "category": "safety", "weight": 2.0}},
            {{"id": "cite", "description": "Cite guidance", "category": "accuracy", "weight": 0.5}}
        ]"#
    )
    .unwrap();
    let path = file.path().to_string_lossy().to_string();

    let config = with_env(&[("CONSTITUTION_PATH", path.as_str())], Config::from_env).unwrap();
    let principles = &config.constitutional.principles;
    assert_eq!(principles.len(), 2);
    assert_eq!(principles[0].id, "no-dosing");
    assert_eq!(principles[0].category, PrincipleCategory::Safety);
    assert_eq!(principles[1].weight, 0.5);
}

#[test]
#[serial]
fn test_invalid_principles_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"[{{"id": "dup", "description": "a", "category": "safety", "weight": 1.0}},
                     {{"id": "dup", "description": "b", "category": "safety", "weight": 1.0}}]"#)
    .unwrap();
    let path = file.path().to_string_lossy().to_string();
    let message = expect_config_error(&[("CONSTITUTION_PATH", path.as_str())]);
    assert!(message.contains("duplicate principle id"));

    let message = expect_config_error(&[("CONSTITUTION_PATH", "/nonexistent/principles.json")]);
    assert!(message.contains("Failed to read principles"));
}

#[test]
#[serial]
fn test_principles_load_without_api_key() {
    let principles = with_env(&[], || {
        env::remove_var("LANGBASE_API_KEY");
        principles_from_env()
    })
    .unwrap();
    assert_eq!(principles, default_principles());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[{{"id": "only", "description": "One rule", "category": "autonomy", "weight": 1.0}}]"#
    )
    .unwrap();
    let path = file.path().to_string_lossy().to_string();
    let principles = with_env(&[("CONSTITUTION_PATH", path.as_str())], || {
        env::remove_var("LANGBASE_API_KEY");
        principles_from_env()
    })
    .unwrap();
    assert_eq!(principles.len(), 1);
    assert_eq!(principles[0].category, PrincipleCategory::Autonomy);
}
