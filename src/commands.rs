//! Command execution.

use crate::Commands;
use colored::Colorize;
use paws_client::{Client, Update};
use paws_protocol::{Method, Response};
use serde_json::Value;
use tokio::sync::mpsc;

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Get { resource } => {
            let response = client.get(&resource).await?;
            Ok(format_response(&response))
        }

        Commands::Put { resource, body } => {
            let response = client.put(&resource, read_body_arg(&body)?).await?;
            Ok(format_response(&response))
        }

        Commands::Post { resource, body } => {
            let response = client.post(&resource, read_body_arg(&body)?).await?;
            Ok(format_response(&response))
        }

        Commands::Delete { resource } => {
            let response = client.delete(&resource).await?;
            Ok(format_response(&response))
        }

        Commands::Request {
            method,
            resource,
            body,
        } => {
            let method = parse_method(&method)?;
            let body = body.map(|b| read_body_arg(&b)).transpose()?;
            let response = client.request(method, &resource, body).await?.await?;
            Ok(format_response(&response))
        }

        Commands::CreateFeed { body } => {
            let id = client.create_feed(read_body_arg(&body)?).await?;
            Ok(format!("{} feed {}", "Created".green(), id.cyan()))
        }

        Commands::ReadFeed { id } => {
            let record = client.read_feed(&id).await?;
            Ok(format!(
                "{}\n{}",
                format!("Feed {}", id.cyan()).bold(),
                format_json(record.value())
            ))
        }

        // Streams until interrupted; handled by `subscribe`.
        Commands::Subscribe { .. } => unreachable!(),
    }
}

/// Subscribes to a resource and prints updates until Ctrl+C.
pub async fn subscribe(client: &Client, resource: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (token, ack) = client
        .subscribe(resource, move |update: Update| {
            let _ = tx.send(update);
        })
        .await?;

    let ack = ack.await?;
    if !ack.is_success() {
        return Err(format!("subscription rejected with status {}", ack.status).into());
    }

    eprintln!(
        "{} {} (token: {})",
        "Subscribed to".green(),
        resource.cyan(),
        token
    );
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Some(update) => println!("{}", serde_json::to_string(update.record.value())?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Unsubscribing...".dimmed());
                if let Ok(done) = client.unsubscribe(&token).await {
                    let _ = done.await;
                }
                break;
            }
        }
    }

    Ok(())
}

fn parse_method(method: &str) -> Result<Method, Box<dyn std::error::Error>> {
    Ok(serde_json::from_value(Value::String(method.to_lowercase()))?)
}

/// Reads a body argument (either inline text or @file).
fn read_body_arg(arg: &str) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        Ok(std::fs::read_to_string(path)?)
    } else {
        Ok(arg.to_string())
    }
}

fn format_response(response: &Response) -> String {
    let status = if response.is_success() || response.is_created() {
        response.status.to_string().green()
    } else {
        response.status.to_string().red()
    };

    let mut output = format!("{} {}", "Status:".bold(), status);
    if let Some(location) = response.location() {
        output.push_str(&format!("\n{} {}", "Location:".bold(), location));
    }
    match response.body_json() {
        Ok(Some(body)) => {
            output.push('\n');
            output.push_str(&format_json(&body));
        }
        Ok(None) => {}
        Err(_) => {
            if let Some(text) = response.body_text() {
                output.push('\n');
                output.push_str(&text);
            }
        }
    }
    output
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
