//! Command-line utility for managing the courier mail queue
//!
//! Works directly against the configured store:
//! - queue new messages and inspect the queue
//! - run a single drain pass (for cron-style scheduling)
//! - retry deferred messages
//! - browse the delivery log
//! - manage the suppression list

#![allow(clippy::print_stdout)]

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use courier::Courier;
use courier_delivery::{bare_address, make_message, retry, retry_deferred};
use courier_store::{
    DeliveryResult, MessageId, MessageViews, Payload, Priority, Security, TransportParams,
};

/// Command-line utility for managing the courier mail queue
#[derive(Parser, Debug)]
#[command(name = "courierctl")]
#[command(about = "Manage the courier mail queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $COURIER_CONFIG, ./courier.config.ron,
    /// then /etc/courier/courier.config.ron)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue a new message
    Send {
        /// Recipient (repeatable)
        #[arg(long, required = true)]
        to: Vec<String>,

        /// Blind-copy recipient (repeatable)
        #[arg(long)]
        bcc: Vec<String>,

        /// Sender address; defaults to the transport's `default_from`
        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        subject: String,

        /// Plain text body
        #[arg(long, default_value = "")]
        body: String,

        /// File holding an HTML alternative body
        #[arg(long)]
        html: Option<PathBuf>,

        /// high, medium or low
        #[arg(long, default_value = "medium")]
        priority: Priority,

        /// Relay host overriding the configured transport
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        username: Option<String>,

        /// Password for `--username`; read from COURIER_SMTP_PASSWORD
        #[arg(long, env = "COURIER_SMTP_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Use implicit TLS for the relay override
        #[arg(long, conflicts_with = "starttls")]
        tls: bool,

        /// Use STARTTLS for the relay override
        #[arg(long)]
        starttls: bool,
    },
    /// Run one drain pass and report what it did
    Drain,
    /// Move deferred messages back into the queue
    Retry {
        /// Message to retry
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        message_id: Option<MessageId>,

        /// Retry every deferred message
        #[arg(long)]
        all: bool,

        /// Priority to requeue at
        #[arg(long, default_value = "medium")]
        priority: Priority,
    },
    /// List queued messages in delivery order
    Queue {
        /// Only show messages at this priority
        #[arg(long)]
        priority: Option<Priority>,
    },
    /// List delivery attempts, oldest first
    Log {
        /// Only show attempts with this result (success, suppressed, failure)
        #[arg(long)]
        result: Option<DeliveryResult>,

        /// Only show the most recent N attempts
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Manage the suppression list
    Suppress {
        #[command(subcommand)]
        action: SuppressAction,
    },
}

#[derive(Subcommand, Debug)]
enum SuppressAction {
    /// Never send to this address again
    Add { address: String },
    /// Allow sending to this address again
    Remove { address: String },
    /// Show every suppressed address
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier_common::logging::init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => courier::find_config_file()?,
    };

    let mut courier = Courier::load(&config_path)?;
    let store = courier.open()?;
    let messages = store.message_store();
    let suppressions = store.suppression_list();

    match cli.command {
        Commands::Send {
            to,
            bcc,
            from,
            subject,
            body,
            html,
            priority,
            host,
            port,
            username,
            password,
            tls,
            starttls,
        } => {
            let html_body = html.map(std::fs::read_to_string).transpose()?;
            let from =
                from.or_else(|| courier.delivery.transport.default_from().map(str::to_string));
            let payload = Payload {
                from,
                to,
                bcc,
                subject,
                body,
                html_body,
                ..Default::default()
            };

            let security = if tls {
                Some(Security::Tls)
            } else if starttls {
                Some(Security::StartTls)
            } else {
                None
            };
            let params = TransportParams {
                host,
                port,
                username,
                password,
                security,
            };
            let params = (params != TransportParams::default()).then_some(params);

            let message = make_message(suppressions.as_ref(), payload, params, priority).await?;
            messages.insert(&message).await?;
            println!("Queued {} at {} priority", message.id, message.priority);
        }
        Commands::Drain => {
            let report = courier.delivery.drain_once().await?;
            if report.contended {
                println!("Another drain pass holds the lock; nothing done");
            } else {
                println!(
                    "{} sent; {} deferred; done in {:.2} seconds",
                    report.sent,
                    report.deferred,
                    report.elapsed.as_secs_f64()
                );
            }
        }
        Commands::Retry {
            message_id,
            all,
            priority,
        } => {
            if all {
                let count = retry_deferred(messages.as_ref(), priority).await?;
                println!("Retried {count} deferred message(s) at {priority} priority");
            } else if let Some(id) = message_id {
                if retry(messages.as_ref(), &id, priority).await? {
                    println!("Retrying {id} at {priority} priority");
                } else {
                    println!("{id} is not a deferred message; nothing changed");
                }
            }
        }
        Commands::Queue { priority } => {
            let queued = messages.messages().await?;
            let shown = priority.map_or_else(
                || queued.iter().collect::<Vec<_>>(),
                |priority| queued.at_priority(priority),
            );

            println!(
                "{:<28} {:<10} {:<22} {:<30} SUBJECT",
                "MESSAGE ID", "PRIORITY", "ENQUEUED", "TO"
            );
            println!("{}", "-".repeat(110));
            for message in &shown {
                println!(
                    "{:<28} {:<10} {:<22} {:<30} {}",
                    message.id,
                    message.priority,
                    format_timestamp(message.enqueued_at),
                    message.payload.to_addresses(),
                    message.payload.subject
                );
            }

            println!(
                "\nTotal: {} message(s), {} deferred",
                shown.len(),
                queued.deferred().len()
            );
        }
        Commands::Log { result, limit } => {
            let entries: Vec<_> = messages
                .log_entries()
                .await?
                .into_iter()
                .filter(|entry| result.is_none_or(|result| entry.result == result))
                .collect();
            let skip = limit.map_or(0, |limit| entries.len().saturating_sub(limit));

            println!(
                "{:<22} {:<10} {:<28} {:<30} DETAIL",
                "ATTEMPTED", "RESULT", "MESSAGE ID", "TO"
            );
            println!("{}", "-".repeat(110));
            for entry in entries.iter().skip(skip) {
                println!(
                    "{:<22} {:<10} {:<28} {:<30} {}",
                    format_timestamp(entry.attempted_at),
                    entry.result,
                    entry.message_id,
                    entry.payload.to_addresses(),
                    entry.detail
                );
            }
        }
        Commands::Suppress { action } => match action {
            SuppressAction::Add { address } => {
                let address = bare_address(&address)?;
                if suppressions.suppress(&address).await? {
                    println!("Suppressed {address}");
                } else {
                    println!("{address} was already suppressed");
                }
            }
            SuppressAction::Remove { address } => {
                let address = bare_address(&address)?;
                if suppressions.unsuppress(&address).await? {
                    println!("Removed {address} from the suppression list");
                } else {
                    println!("{address} was not suppressed");
                }
            }
            SuppressAction::List => {
                for entry in suppressions.suppressions().await? {
                    println!(
                        "{:<40} {}",
                        entry.address,
                        format_timestamp(entry.added_at)
                    );
                }
            }
        },
    }

    Ok(())
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
