//! Courier - captain-to-agent message delivery
//!
//! CLI entry point for sending, broadcasting and queueing messages.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use courier::cli::{Cli, Command, OutputFormat, generate_after_help};
use courier::config::Config;
use courier::domain::{DeliveryStatus, Message, Priority, Tag};
use courier::service::{DEFAULT_SENDER, MessagingService, SendOutcome, SendRequest};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("courier.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    let service = MessagingService::from_config(config.clone())
        .await
        .context("Failed to start messaging service")?;
    let format = cli.format;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Send {
            recipient,
            content,
            priority,
            tag,
            sender,
        } => cmd_send(&service, format, &recipient, &content, priority, tag, &sender).await,
        Command::Broadcast {
            content,
            sender,
            priority,
            exclude,
        } => cmd_broadcast(&service, format, &content, &sender, priority, exclude).await,
        Command::Agents => cmd_agents(&service, format),
        Command::Coords { agent } => cmd_coords(&service, format, &agent),
        Command::Queue {
            recipient,
            content,
            priority,
            timeout,
        } => cmd_queue(&service, format, &recipient, &content, priority, timeout.map(Duration::from_secs)).await,
        Command::History { lines } => cmd_history(&service, format, &config, lines),
    }
}

async fn cmd_send(
    service: &MessagingService,
    format: OutputFormat,
    recipient: &str,
    content: &str,
    priority: Priority,
    tag: Tag,
    sender: &str,
) -> Result<()> {
    debug!(%recipient, %priority, %tag, %sender, "cmd_send: called");
    let message = Message::new(sender, recipient, content)
        .with_priority(priority)
        .with_tag(tag);
    let id = message.id().clone();
    let delivered = service.submit(SendRequest::prebuilt(message)).await.all_succeeded();

    // suppressed messages leave no history record
    let record = service.history().find(&id);
    print_send(
        format,
        recipient,
        delivered,
        record.as_ref().map(|r| r.status),
        record.and_then(|r| r.method).map(|m| m.to_string()),
    )?;

    if delivered {
        Ok(())
    } else {
        Err(eyre::eyre!("Message to {} was not delivered", recipient))
    }
}

fn print_send(
    format: OutputFormat,
    recipient: &str,
    delivered: bool,
    status: Option<DeliveryStatus>,
    method: Option<String>,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "recipient": recipient,
                "delivered": delivered,
                "status": status,
                "method": method,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            let via = method.map(|m| format!(" via {}", m)).unwrap_or_default();
            if delivered {
                println!("{} {}{}", "sent".green(), recipient, via);
            } else {
                let status = status.map(|s| s.to_string()).unwrap_or_else(|| "suppressed".to_string());
                println!("{} {} ({})", "not sent".red(), recipient, status);
            }
        }
    }
    Ok(())
}

async fn cmd_broadcast(
    service: &MessagingService,
    format: OutputFormat,
    content: &str,
    sender: &str,
    priority: Priority,
    exclude: Vec<String>,
) -> Result<()> {
    debug!(%sender, %priority, excluded = exclude.len(), "cmd_broadcast: called");
    let exclude: BTreeSet<String> = exclude.into_iter().collect();
    let request = SendRequest::broadcast(content, sender)
        .with_priority(priority)
        .excluding(exclude);
    let outcome = service.submit(request).await;
    let all_ok = outcome.all_succeeded();
    let results = match outcome {
        SendOutcome::Broadcast(results) => results,
        SendOutcome::Single(_) => BTreeMap::new(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text => {
            for (agent, ok) in &results {
                let mark = if *ok { "ok".green() } else { "failed".red() };
                println!("  {:<12} {}", agent, mark);
            }
            let succeeded = results.values().filter(|ok| **ok).count();
            println!("{}/{} delivered", succeeded, results.len());
        }
    }

    if all_ok {
        Ok(())
    } else {
        Err(eyre::eyre!("Broadcast did not reach every agent"))
    }
}

fn cmd_agents(service: &MessagingService, format: OutputFormat) -> Result<()> {
    debug!("cmd_agents: called");
    let agents = service.list_agents();

    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = agents
                .iter()
                .map(|agent| {
                    serde_json::json!({
                        "agent": agent,
                        "coordinates": service.get_coordinates(agent),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            if agents.is_empty() {
                println!("No agents configured");
            }
            for agent in &agents {
                match service.get_coordinates(agent) {
                    Some((x, y, monitor)) => println!("{:<12} {} ({}, {}) monitor {}", agent, "input".green(), x, y, monitor),
                    None => println!("{:<12} {}", agent, "file-drop only".yellow()),
                }
            }
        }
    }
    Ok(())
}

fn cmd_coords(service: &MessagingService, format: OutputFormat, agent: &str) -> Result<()> {
    debug!(%agent, "cmd_coords: called");
    let coords = service
        .get_coordinates(agent)
        .ok_or_else(|| eyre::eyre!("No coordinates for {}", agent))?;

    match format {
        OutputFormat::Json => {
            let (x, y, monitor) = coords;
            let value = serde_json::json!({ "agent": agent, "x": x, "y": y, "monitor": monitor });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => println!("{} ({}, {}) monitor {}", agent, coords.0, coords.1, coords.2),
    }
    Ok(())
}

async fn cmd_queue(
    service: &MessagingService,
    format: OutputFormat,
    recipient: &str,
    content: &str,
    priority: Priority,
    timeout: Option<Duration>,
) -> Result<()> {
    debug!(%recipient, %priority, ?timeout, "cmd_queue: called");
    let queue = service.pending_queue();
    let message = Message::new(DEFAULT_SENDER, recipient, content).with_priority(priority);

    // enqueue before the loop starts so the first pass picks it up
    let id = queue.enqueue(message, timeout, false).await?;
    let runner = tokio::spawn(queue.clone().run());

    let status = queue.settled(&id).await;
    queue.shutdown().await;
    if let Err(e) = runner.await {
        tracing::error!(error = %e, "Queue loop failed");
    }

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({ "id": id, "recipient": recipient, "status": status });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            let label = status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string());
            let label = match status {
                Some(s) if s.is_success() => label.green(),
                Some(DeliveryStatus::Timeout) => label.yellow(),
                _ => label.red(),
            };
            println!("{} {} {}", id, recipient, label);
        }
    }

    match status {
        Some(s) if s.is_success() => Ok(()),
        _ => Err(eyre::eyre!("Queued message {} did not go out", id)),
    }
}

fn cmd_history(service: &MessagingService, format: OutputFormat, config: &Config, lines: usize) -> Result<()> {
    debug!(lines, "cmd_history: called");
    if config.history.file.is_none() {
        println!("{}", "history.file is not configured; nothing is persisted".yellow());
        return Ok(());
    }

    let records = service.history().recent(lines);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => {
            for record in &records {
                let method = record.method.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string());
                println!(
                    "{} {:<10} {:<12} {:<8} {:<15} {}",
                    record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    record.sender,
                    record.recipient,
                    record.status,
                    method,
                    record.error.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}
