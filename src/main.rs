use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use mail_queue::config::Settings;
use mail_queue::dispatch::ErrorMessages;
use mail_queue::error::QueueError;
use mail_queue::mail::MailMessage;
use mail_queue::server::{create_app, AppState};
use mail_queue::shutdown::Shutdown;
use mail_queue::tasks::RoundScheduler;
use mail_queue::telemetry::init_telemetry;
use mail_queue::MailQueue;

#[derive(Parser)]
#[command(name = "mail-queue", version, about = "Durable mail dispatch queue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one processing round
    Process {
        /// Print the round counters
        #[arg(long)]
        debug: bool,
    },

    /// Show queue statistics (read-only)
    Stat,

    /// Delete sent and exhausted mails
    Purge,

    /// Queue a plain-text mail
    Enqueue {
        #[arg(long)]
        from: String,

        /// Recipient, repeatable
        #[arg(long, required = true)]
        to: Vec<String>,

        #[arg(long)]
        subject: String,

        #[arg(long)]
        body: String,

        /// Earliest send time (RFC 3339); defaults to now
        #[arg(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,
    },

    /// Run rounds on the configured interval and serve the ops endpoints
    Run,
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time: {e}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {e}");
            return ExitCode::from(2);
        }
    };

    let default_level = match cli.command {
        Commands::Run => "info",
        _ => "warn",
    };
    let _telemetry = match init_telemetry(&settings.otel, default_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match execute(cli.command, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit_code(&e)
        }
    }
}

/// 2 for configuration problems, 1 for anything else.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<QueueError>() {
        Some(e) if e.is_config() => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

async fn execute(command: Commands, settings: Settings) -> Result<()> {
    match command {
        Commands::Process { debug } => cmd_process(&settings, debug).await,
        Commands::Stat => cmd_stat(&settings).await,
        Commands::Purge => cmd_purge(&settings).await,
        Commands::Enqueue {
            from,
            to,
            subject,
            body,
            at,
        } => cmd_enqueue(&settings, from, to, subject, body, at).await,
        Commands::Run => cmd_run(settings).await,
    }
}

async fn cmd_process(settings: &Settings, debug: bool) -> Result<()> {
    let (queue, pool) = MailQueue::connect(settings).await?;
    let report = queue.process().await;
    if let Some(pool) = pool {
        pool.close().await;
    }
    let report = report?;

    if debug {
        print_table(
            &[
                "Messages being sent from queue",
                "Not sent",
                "Failed to read (unserialize)",
                "Other error",
            ],
            &[vec![
                report.items_processed.to_string(),
                report.not_sent.to_string(),
                report.decode_failures.to_string(),
                report.other_failures.to_string(),
            ]],
        );
        if report.skipped > 0 || report.store_failures > 0 || report.purged > 0 {
            print_table(
                &["Skipped (claimed elsewhere)", "Store errors", "Purged"],
                &[vec![
                    report.skipped.to_string(),
                    report.store_failures.to_string(),
                    report.purged.to_string(),
                ]],
            );
        }
    }

    print_errors(&report.errors);
    Ok(())
}

async fn cmd_stat(settings: &Settings) -> Result<()> {
    let (queue, pool) = MailQueue::connect(settings).await?;
    let report = queue.stat().await;
    if let Some(pool) = pool {
        pool.close().await;
    }
    let report = report?;

    print_table(
        &[
            "Messages in queue",
            "More > 0 attempts",
            "Failed to read (unserialize)",
            "Other error",
        ],
        &[vec![
            report.total_items.to_string(),
            report.items_with_attempts.to_string(),
            report.decode_failures.to_string(),
            report.other_failures.to_string(),
        ]],
    );
    print_errors(&report.errors);
    Ok(())
}

async fn cmd_purge(settings: &Settings) -> Result<()> {
    let (queue, pool) = MailQueue::connect(settings).await?;
    let purged = queue.purge().await;
    if let Some(pool) = pool {
        pool.close().await;
    }

    println!("Purged {} mail(s)", purged?);
    Ok(())
}

async fn cmd_enqueue(
    settings: &Settings,
    from: String,
    to: Vec<String>,
    subject: String,
    body: String,
    at: Option<DateTime<Utc>>,
) -> Result<()> {
    let mut builder = MailMessage::builder(from).subject(subject).text_body(body);
    for recipient in to {
        builder = builder.to(recipient);
    }
    let message = builder.build();

    let (queue, pool) = MailQueue::connect(settings).await?;
    let item = queue.enqueue(&message, at).await;
    if let Some(pool) = pool {
        pool.close().await;
    }
    let item = item?;

    println!("Queued {} (send after {})", item.id, item.time_to_send.to_rfc3339());
    Ok(())
}

async fn cmd_run(settings: Settings) -> Result<()> {
    let (queue, pool) = MailQueue::connect(&settings).await?;

    if !queue.store().schema_present().await.map_err(QueueError::from)? {
        return Err(QueueError::missing_table(&settings.mailqueue.table).into());
    }

    let queue = Arc::new(queue);
    let shutdown = Shutdown::new();

    let interval = Duration::from_secs(settings.mailqueue.round_interval_seconds.max(1));
    let scheduler = RoundScheduler::new(queue.clone(), interval, shutdown.subscribe());
    let scheduler_handle = tokio::spawn(scheduler.run());

    let addr = settings.server_addr();
    let state = AppState::new(settings, queue, pool.clone());
    let app = create_app(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Ops server listening on {}", addr);

    let server_shutdown = shutdown.subscribe();
    let signals = tokio::spawn(shutdown.clone().listen_for_signals());

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(Shutdown::wait(server_shutdown))
        .await;

    // Server errors must still stop the scheduler
    shutdown.trigger();
    signals.abort();

    tracing::info!("Waiting for the round scheduler to finish...");
    let _ = scheduler_handle.await;

    if let Some(pool) = pool {
        pool.close().await;
    }

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn print_errors(errors: &ErrorMessages) {
    if errors.is_empty() {
        return;
    }
    let rows: Vec<Vec<String>> = errors.iter().map(|e| vec![e.to_string()]).collect();
    print_table(&["Most common error messages"], &rows);
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+";

    let format_row = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("| {:<w$} ", cell, w = *w))
            .collect::<String>()
            + "|"
    };

    println!("{separator}");
    println!("{}", format_row(headers.to_vec()));
    println!("{separator}");
    for row in rows {
        println!("{}", format_row(row.iter().map(String::as_str).collect()));
    }
    println!("{separator}");
}
