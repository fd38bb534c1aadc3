//! # Consult Patterns
//!
//! Reasoning and compliance patterns for healthcare consultation answers,
//! backed by Langbase Pipes for the LLM-powered steps.
//!
//! ## Features
//!
//! - **Tree-of-Thoughts**: bounded branching search over reasoning steps with
//!   scoring, pruning and deterministic best-path selection
//! - **Constitutional Review**: critique against a weighted principle set with
//!   a bounded revise/re-review loop and safe fallback
//! - **Pipeline**: the best search path composed into an answer and reviewed
//!
//! ## Architecture
//!
//! ```text
//! Caller → TotEngine ─ best path ─→ ConstitutionalEngine → RevisionOutcome
//!              ↓                            ↓
//!         ModelInvoker (LangbaseClient → Langbase Pipes over HTTP)
//!              ↓
//!          AuditSink (optional)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use consult_patterns::langbase::LangbaseClient;
//! use consult_patterns::patterns::{run_pipeline, CancellationToken, ConstitutionalEngine, TotEngine};
//! use consult_patterns::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let invoker = Arc::new(LangbaseClient::new(&config.langbase, config.request.clone())?);
//!     let tot = TotEngine::from_config(invoker.clone(), &config)?;
//!     let constitutional = ConstitutionalEngine::from_config(invoker, &config)?;
//!     let result = run_pipeline(
//!         &tot,
//!         &constitutional,
//!         "How should I manage a mild fever at home?",
//!         "consult-1",
//!         &CancellationToken::new(),
//!         None,
//!     )
//!     .await?;
//!     println!("{}", result.outcome.final_response);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Audit events and sinks.
pub mod audit;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Model invocation capability used by the engines.
pub mod invoker;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// Tree-of-Thoughts, constitutional review and their composition.
pub mod patterns;
/// System prompts for Langbase pipes.
pub mod prompts;

pub use config::Config;
pub use error::{AppError, AppResult, EngineError, InvokeError};
pub use invoker::{InvokeOptions, InvokeRequest, Message, ModelInvoker};
