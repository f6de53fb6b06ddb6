mod backend_bridge;
mod config;
mod controller;
mod ui;
mod view;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::DashboardClient;
use serde::Serialize;
use shared::{
    domain::{InvoiceId, Verdict},
    protocol::{FeedbackRequest, GenerateInvoiceQuery},
};
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings, CliOverrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "invoice-dashboard", about = "Live invoice journey dashboard")]
struct Cli {
    /// Settings file; defaults to ./dashboard.toml, then the user config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// Actor recorded on actions and feedback.
    #[arg(long, global = true)]
    user: Option<String>,
    #[arg(long, global = true)]
    action_timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow an invoice's journey live and act on its pending tasks.
    Watch { invoice_id: String },
    /// List human tasks.
    Tasks {
        #[arg(long, default_value = "pending")]
        status: String,
    },
    /// Show or regenerate the explanation of an invoice.
    Explain {
        invoice_id: String,
        #[arg(long)]
        regenerate: bool,
    },
    Feedback {
        #[command(subcommand)]
        command: FeedbackCommand,
    },
    /// Generate a sample invoice from a purchase order.
    Generate {
        #[arg(long)]
        po_number: String,
        #[arg(long)]
        invoice_ref: Option<String>,
        #[arg(long)]
        buyer_companycode: Option<String>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        split_first_line: bool,
        /// Also submit the generated invoice for processing.
        #[arg(long)]
        post: bool,
    },
    /// Submit an invoice document (JSON file) for processing.
    Submit { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum FeedbackCommand {
    List {
        invoice_id: String,
    },
    Send {
        invoice_id: String,
        #[arg(long, value_parser = parse_verdict)]
        verdict: Verdict,
        #[arg(long)]
        step_id: Option<String>,
        #[arg(long, default_value = "")]
        notes: String,
    },
}

fn parse_verdict(raw: &str) -> Result<Verdict, String> {
    Verdict::parse(raw).ok_or_else(|| format!("unknown verdict '{raw}' (accept|reject|suggest_edit)"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = CliOverrides {
        api_base: cli.api_base.clone(),
        user: cli.user.clone(),
        action_timeout_secs: cli.action_timeout_secs,
    };
    let settings = load_settings(cli.config.as_deref(), &overrides)?;
    tracing::info!(api_base = %settings.api_base, user = %settings.user, "config: settings loaded");

    match cli.command {
        Command::Watch { invoice_id } => ui::run_watch(&settings, InvoiceId::new(invoice_id)),
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build async runtime")?;
            runtime.block_on(run_command(&settings, command))
        }
    }
}

async fn run_command(settings: &Settings, command: Command) -> Result<()> {
    let client = DashboardClient::new(settings.api_base()?);
    match command {
        Command::Watch { .. } => anyhow::bail!("watch runs on the ui thread, not the runtime"),
        Command::Tasks { status } => {
            let tasks = client
                .list_tasks(Some(&status))
                .await
                .context("failed to list tasks")?;
            if tasks.is_empty() {
                println!("no {status} tasks");
            }
            for task in tasks {
                println!(
                    "{}\tinvoice={}\t{}\t{}",
                    task.id,
                    task.invoice_id,
                    task.task_type.as_deref().unwrap_or("-"),
                    task.created_at.as_deref().unwrap_or("-"),
                );
            }
        }
        Command::Explain {
            invoice_id,
            regenerate,
        } => {
            let invoice_id = InvoiceId::new(invoice_id);
            let response = if regenerate {
                client.request_explanation(&invoice_id, None).await
            } else {
                client.fetch_explanation(&invoice_id).await
            }
            .with_context(|| format!("failed to explain invoice {invoice_id}"))?;
            print_json(&response)?;
        }
        Command::Feedback {
            command: FeedbackCommand::List { invoice_id },
        } => {
            let invoice_id = InvoiceId::new(invoice_id);
            let list = client
                .list_feedback(&invoice_id)
                .await
                .with_context(|| format!("failed to list feedback for {invoice_id}"))?;
            print_json(&list)?;
        }
        Command::Feedback {
            command:
                FeedbackCommand::Send {
                    invoice_id,
                    verdict,
                    step_id,
                    notes,
                },
        } => {
            let feedback = FeedbackRequest {
                invoice_id: InvoiceId::new(invoice_id),
                step_id,
                verdict,
                notes,
                user: settings.user.clone(),
            };
            let ack = client
                .post_feedback(&feedback)
                .await
                .context("failed to record feedback")?;
            println!(
                "feedback recorded: {}",
                ack.inserted_id.as_deref().unwrap_or("no id")
            );
        }
        Command::Generate {
            po_number,
            invoice_ref,
            buyer_companycode,
            currency,
            split_first_line,
            post,
        } => {
            let query = GenerateInvoiceQuery {
                po_number,
                invoice_ref,
                buyer_companycode,
                currency,
                split_first_line,
                post_to_incoming: post,
            };
            let generated = client
                .generate_invoice(&query)
                .await
                .with_context(|| format!("failed to generate invoice for PO {}", query.po_number))?;
            print_json(&generated)?;
        }
        Command::Submit { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let document: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid json", path.display()))?;
            let ack = client
                .submit_invoice(&document)
                .await
                .context("failed to submit invoice")?;
            println!("submitted invoice {} ({})", ack.invoice_id, ack.status);
        }
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
