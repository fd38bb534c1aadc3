use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use consult_patterns::{
    audit::{AuditSink, TracingSink},
    config::{principles_from_env, Config, LogFormat},
    langbase::LangbaseClient,
    patterns::{run_pipeline, CancellationToken, ConstitutionalEngine, TotEngine},
};

/// Reasoning and compliance patterns over Langbase Pipes.
#[derive(Parser, Debug)]
#[command(name = "consult-patterns", version, about)]
struct Cli {
    /// Create or update the Langbase pipes before running
    #[arg(long, global = true)]
    ensure_pipes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a Tree-of-Thoughts search and print the result
    Tot {
        /// Consultation question
        #[arg(long)]
        query: String,

        /// Caller context identifier
        #[arg(long, default_value = "cli")]
        context_id: String,
    },

    /// Review a response against the principle set, revising if needed
    Review {
        /// Response text to review
        #[arg(long)]
        response: String,

        /// Question the response answers
        #[arg(long)]
        query: Option<String>,
    },

    /// Search for an answer, then review it
    Pipeline {
        /// Consultation question
        #[arg(long)]
        query: String,

        /// Caller context identifier
        #[arg(long, default_value = "cli")]
        context_id: String,
    },

    /// Print the active principle set
    Principles,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Printing principles needs no Langbase credentials
    if let Commands::Principles = cli.command {
        let principles = match principles_from_env() {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                std::process::exit(1);
            }
        };
        return print_json(&principles);
    }

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?cli.command,
        "consult-patterns starting"
    );

    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %c.base_url(), "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    if cli.ensure_pipes {
        info!("Ensuring required Langbase pipes exist...");
        if let Err(e) = langbase.ensure_pipes(&config.pipes).await {
            error!(error = %e, "Failed to ensure pipes exist");
            return Err(e.into());
        }
    }

    let invoker = Arc::new(langbase);
    let sink: Arc<dyn AuditSink> = Arc::new(TracingSink);
    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match cli.command {
        Commands::Tot { query, context_id } => {
            let tot = TotEngine::from_config(invoker, &config)?.with_sink(sink);
            tot.initialize(&query, &context_id);
            let result = tot.execute_with_cancel(&query, &context_id, &cancel).await?;
            print_json(&result)
        }
        Commands::Review { response, query } => {
            let constitutional =
                ConstitutionalEngine::from_config(invoker, &config)?.with_sink(sink);
            let outcome = constitutional
                .execute_with_cancel(&response, query.as_deref(), &cancel)
                .await;
            print_json(&outcome)
        }
        Commands::Pipeline { query, context_id } => {
            let tot = TotEngine::from_config(invoker.clone(), &config)?.with_sink(sink.clone());
            let constitutional =
                ConstitutionalEngine::from_config(invoker, &config)?.with_sink(sink.clone());
            let result = run_pipeline(
                &tot,
                &constitutional,
                &query,
                &context_id,
                &cancel,
                Some(sink.as_ref()),
            )
            .await?;
            print_json(&result)
        }
        // Handled before configuration loads
        Commands::Principles => Ok(()),
    }
}

/// Cancel the running pattern on the first Ctrl-C.
fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping after the current step");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
