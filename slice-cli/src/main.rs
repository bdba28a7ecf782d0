/**
 * SLICE CLI - Thin client for the slice kernel control API
 *
 * ROLE:
 * Activate, deactivate or inspect network slices from a shell.
 *
 * USAGE:
 *   slice-cli activate gaming
 *   slice-cli deactivate gaming --host 10.0.0.254
 *   slice-cli status --port 9090
 */

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    Activate,
    Deactivate,
    Status,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Activate => "activate",
            Action::Deactivate => "deactivate",
            Action::Status => "status",
        }
    }
}

/// CLI for SDN slices.
#[derive(Debug, Parser)]
#[command(name = "slice-cli", version)]
struct Cli {
    /// What you want to do.
    #[arg(value_enum)]
    action: Action,

    /// Slice name (not needed for `status`).
    slice: Option<String>,

    /// Controller address.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Controller port.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// API key sent as x-api-key, when the kernel requires one.
    #[arg(long, env = "SLICE_API_KEY")]
    api_key: Option<String>,
}

impl Cli {
    fn url(&self) -> anyhow::Result<String> {
        let base = format!("http://{}:{}", self.host, self.port);
        match (self.action, &self.slice) {
            (Action::Status, _) => Ok(format!("{base}/slices/status")),
            (action, Some(slice)) => Ok(format!("{base}/slice/{slice}/{}", action.as_str())),
            (_, None) => anyhow::bail!("You need to specify a slice name for 'activate' or 'deactivate'."),
        }
    }
}

/// Text printed for a response; `status` pretty-prints the JSON body.
fn render(action: Action, code: u16, body: &str) -> String {
    let Ok(data) = serde_json::from_str::<Value>(body) else {
        return format!("Received non-JSON response ({code}): {body}");
    };
    if action == Action::Status && (200..300).contains(&code) {
        return serde_json::to_string_pretty(&data).unwrap_or_else(|_| body.to_string());
    }

    let message = data.get("message").and_then(Value::as_str).unwrap_or("No message received.");
    if (200..300).contains(&code) {
        format!("Success ({code}): {message}")
    } else {
        format!("Error ({code}): {message}")
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let url = cli.url()?;
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

    let mut request = match cli.action {
        Action::Status => client.get(&url),
        _ => client.post(&url),
    };
    if let Some(key) = &cli.api_key {
        request = request.header("x-api-key", key);
    }

    let response = request.send().await.with_context(|| format!("Connection error: {url}"))?;
    let code = response.status().as_u16();
    let body = response.text().await.context("reading response body")?;
    println!("{}", render(cli.action, code, &body));
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
