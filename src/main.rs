use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use payguard::application::batch::PaymentBatch;
use payguard::application::retry::RetryExecutor;
use payguard::config::AppConfig;
use payguard::domain::ports::{PaymentGatewayRef, PaymentStore};
use payguard::infrastructure::in_memory::InMemoryPaymentStore;
use payguard::infrastructure::scripted_gateway::ScriptedGateway;
use payguard::interfaces::csv::outcome_writer::OutcomeWriter;
use payguard::interfaces::csv::request_reader::RequestReader;
use payguard::interfaces::json;
use payguard::logging;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input payment requests CSV file
    input: PathBuf,

    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the maximum number of attempts per gateway call
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Override the base backoff delay in milliseconds
    #[arg(long)]
    base_delay_ms: Option<u64>,

    /// How many customer actions (e.g. 3-D Secure) to complete per payment
    #[arg(long, default_value_t = 1)]
    max_actions: u32,

    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).into_diagnostic()?;
    if let Some(max_attempts) = cli.max_attempts {
        config.retry.max_attempts = max_attempts;
    }
    if let Some(base_delay_ms) = cli.base_delay_ms {
        config.retry.base_delay_ms = base_delay_ms;
    }
    logging::init_logging(config.log_filter.as_deref());

    let executor = RetryExecutor::new(config.retry.to_policy().into_diagnostic()?).into_diagnostic()?;
    let store = Arc::new(InMemoryPaymentStore::new());
    let batch = PaymentBatch::new(executor, Arc::new(config.classifier.gateway_classifier()))
        .with_store(store.clone(), Arc::new(config.classifier.driver_classifier()))
        .with_max_actions(cli.max_actions);

    // Each payment talks to its own simulated gateway session.
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = RequestReader::new(file);
    let mut jobs = Vec::new();
    for payment in reader.payments() {
        match payment {
            Ok(payment) => {
                let gateway: PaymentGatewayRef = Arc::new(ScriptedGateway::new(payment.script));
                jobs.push((payment.request, gateway));
            }
            Err(e) => {
                eprintln!("Error reading payment: {}", e);
            }
        }
    }

    let settled = batch.run(jobs).await;
    match store.all().await {
        Ok(persisted) => tracing::info!(persisted = persisted.len(), "batch complete"),
        Err(e) => tracing::error!(error = %e, "could not read payment store"),
    }

    let stdout = io::stdout();
    match cli.format {
        OutputFormat::Csv => OutcomeWriter::new(stdout.lock())
            .write_outcomes(&settled)
            .into_diagnostic()?,
        OutputFormat::Json => json::write_outcomes(stdout.lock(), &settled).into_diagnostic()?,
    }

    Ok(())
}
