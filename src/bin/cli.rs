//! Mobile Agent - drive a phone through one natural-language task.
//!
//! Run with: cargo run --bin mobile-agent -- "open settings"

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context};
use mobile_agent::agent::{
    ArtifactSink, ConnectorFactory, ControlLoop, FsArtifactSink, LoopConfig, TaskRequest,
    TaskScheduler,
};
use mobile_agent::delivery::{DeliveryConfig, WebhookDelivery};
use mobile_agent::device::{create_connector, CommandRunner, ProcessRunner};
use mobile_agent::model::ModelClient;
use mobile_agent::settings::AgentSettings;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: mobile-agent \"<instruction>\" [--max-steps N] [--callback URL] [--connection local|direct|ssh_tunnel|hdc]";

struct CliArgs {
    instruction: String,
    max_steps: Option<u32>,
    callback: Option<String>,
    connection: Option<String>,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut instruction = None;
    let mut max_steps = None;
    let mut callback = None;
    let mut connection = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--max-steps" => {
                let value = iter.next().context("--max-steps needs a value")?;
                max_steps = Some(value.parse().with_context(|| format!("invalid --max-steps: {}", value))?);
            }
            "--callback" => callback = Some(iter.next().context("--callback needs a URL")?.clone()),
            "--connection" => connection = Some(iter.next().context("--connection needs a kind")?.clone()),
            "-h" | "--help" => bail!(USAGE),
            other if other.starts_with("--") => bail!("unknown option {}\n{}", other, USAGE),
            other => {
                if instruction.is_some() {
                    bail!("only one instruction is allowed\n{}", USAGE);
                }
                instruction = Some(other.to_string());
            }
        }
    }

    Ok(CliArgs {
        instruction: instruction.context(USAGE)?,
        max_steps,
        callback,
        connection,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let mut settings = AgentSettings::load();
    settings.apply_env().context("invalid environment configuration")?;
    if let Some(kind) = &cli.connection {
        settings.connection_type = kind.parse()?;
    }

    let connection = settings.connection_config()?;
    tracing::info!(kind = %connection.kind, model = %settings.model_name, "starting");

    let oracle = Arc::new(ModelClient::new(settings.model_config())?);
    let mut control = ControlLoop::new(oracle, LoopConfig::default());
    if let Some(dir) = settings.output_dir() {
        tracing::info!(path = %dir.display(), "saving artifacts");
        let sink: Arc<dyn ArtifactSink> = Arc::new(FsArtifactSink::new(dir));
        control = control.with_sink(sink);
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
    let factory: ConnectorFactory = Arc::new(move || create_connector(&connection, Arc::clone(&runner)));
    // fail on a bad connection config before any task is admitted
    factory()?;

    let delivery = Arc::new(WebhookDelivery::new(DeliveryConfig::default())?);
    let scheduler = TaskScheduler::new(control, factory)
        .with_delivery(delivery)
        .with_default_max_steps(settings.max_steps);

    let mut request = TaskRequest::new(cli.instruction);
    if let Some(max_steps) = cli.max_steps {
        request = request.with_max_steps(max_steps);
    }
    if let Some(url) = cli.callback.as_deref().or(settings.callback()) {
        request = request.with_callback_url(url);
    }

    let handle = scheduler.submit(request)?;
    let task_id = handle.task_id();
    let cancel = handle.cancel_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(%task_id, "interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });

    let finished = handle.join().await?;
    watcher.abort();

    println!("{}", serde_json::to_string_pretty(&finished.result)?);

    if let Some(delivery) = finished.delivery {
        let report = delivery.await?;
        if report.delivered {
            tracing::info!(url = %report.url, attempts = report.attempts, "result delivered");
        } else {
            tracing::error!(url = %report.url, attempts = report.attempts, error = ?report.last_error, "result delivery failed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let cli = parse_args(&args(&["open settings", "--max-steps", "7", "--connection", "hdc"])).unwrap();
        assert_eq!(cli.instruction, "open settings");
        assert_eq!(cli.max_steps, Some(7));
        assert_eq!(cli.connection.as_deref(), Some("hdc"));
        assert!(cli.callback.is_none());
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["a", "b"])).is_err());
        assert!(parse_args(&args(&["a", "--max-steps", "x"])).is_err());
        assert!(parse_args(&args(&["a", "--verbose"])).is_err());
    }
}
