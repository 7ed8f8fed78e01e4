use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use unsubscriber::config::AppConfig;
use unsubscriber::credentials::EnvCredentials;
use unsubscriber::error::Error;
use unsubscriber::executor::Dispatcher;
use unsubscriber::extract::InboundEmail;
use unsubscriber::pipeline::Pipeline;
use unsubscriber::store::{LibSqlStore, SubscriberStore};
use uuid::Uuid;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Error: failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run(Cli::from_args()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = AppConfig::from_env().context("reading UNSUB_* configuration")?;
    if let Some(db) = cli.db {
        config.pipeline.db_path = db;
    }

    let store: Arc<dyn SubscriberStore> = Arc::new(
        LibSqlStore::new_local(&config.pipeline.db_path)
            .await
            .with_context(|| format!("opening {}", config.pipeline.db_path.display()))?,
    );

    match cli.command {
        Command::Ingest { account, files } => ingest(&config, store, &account, &files).await,
        Command::Unsubscribe { id, dry_run, yes } => {
            config.executor.dry_run |= dry_run;
            unsubscribe(&config, store, id, yes).await
        }
        Command::Keep { id } => set_keep(store, id, true).await,
        Command::Unkeep { id } => set_keep(store, id, false).await,
        Command::Show { id } => show(&config, store, id).await,
    }
}

async fn ingest(
    config: &AppConfig,
    store: Arc<dyn SubscriberStore>,
    account: &str,
    files: &[std::path::PathBuf],
) -> anyhow::Result<ExitCode> {
    let mut emails = Vec::with_capacity(files.len());
    for path in files {
        let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        match InboundEmail::parse(&raw, account) {
            Ok(email) => emails.push(email),
            Err(e) => eprintln!("Skipping {}: {e}", path.display()),
        }
    }

    let pipeline = Pipeline::new(store, &config.pipeline);
    let report = pipeline.ingest_batch(&emails, &AtomicBool::new(false)).await;
    println!(
        "Processed {} message(s): {} new history entr(ies), {} without a method, {} failed",
        report.processed,
        report.recorded,
        report.without_method,
        report.failures.len()
    );
    Ok(if report.failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn unsubscribe(
    config: &AppConfig,
    store: Arc<dyn SubscriberStore>,
    id: Uuid,
    yes: bool,
) -> anyhow::Result<ExitCode> {
    let subscriber = store
        .get_subscriber(id)
        .await?
        .ok_or(Error::SubscriberNotFound { id: id.to_string() })?;

    if !yes && !config.executor.dry_run {
        let target = subscriber.unsubscribe_link().unwrap_or("<none>");
        if !confirm(&format!("Unsubscribe from {} via {target}?", subscriber.sender))? {
            println!("Aborted.");
            return Ok(ExitCode::FAILURE);
        }
    }

    let dispatcher =
        Dispatcher::from_config(config, store, Arc::new(EnvCredentials::from_env()))?;
    match dispatcher.unsubscribe(id).await {
        Ok(outcome) => {
            for warning in &outcome.warnings {
                println!("warning: {warning}");
            }
            println!("{}: {}", outcome.status(), outcome.description);
            if let Some(err) = &outcome.error {
                println!("error: {err}");
            }
            Ok(if outcome.is_success() || outcome.is_dry_run() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(e @ (Error::Safety(_) | Error::Precondition(_))) => {
            println!("refused: {e}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

async fn set_keep(
    store: Arc<dyn SubscriberStore>,
    id: Uuid,
    keep: bool,
) -> anyhow::Result<ExitCode> {
    store.set_keep(id, keep).await?;
    println!("{id}: keep = {keep}");
    Ok(ExitCode::SUCCESS)
}

async fn show(
    config: &AppConfig,
    store: Arc<dyn SubscriberStore>,
    id: Uuid,
) -> anyhow::Result<ExitCode> {
    let subscriber = store
        .get_subscriber(id)
        .await?
        .ok_or(Error::SubscriberNotFound { id: id.to_string() })?;
    let history = store.method_history(id).await?;
    let attempts = store.list_attempts(id).await?;
    let failed = store.count_failed_attempts(id).await?;

    let view = serde_json::json!({
        "subscriber": subscriber,
        "state": subscriber.state(failed, config.executor.max_attempts),
        "history": history.entries(),
        "attempts": attempts,
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(ExitCode::SUCCESS)
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
