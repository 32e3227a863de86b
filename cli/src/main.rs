use std::io::{self, Write};
use std::time::Duration;

use agentlink::{AgentClient, ClientConfig, ClientError, Event, EventKind, InvokeOptions};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("--args must be a JSON object")]
    ArgsNotObject,
    #[error("bridge rejected {command}: {message}")]
    Remote { command: String, message: String },
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "agentlink-cli", about = "Invoke commands on the agent WebSocket bridge")]
struct Cli {
    #[arg(long, env = "AGENT_BRIDGE_URL")]
    url: Option<String>,

    #[arg(long, env = "AGENT_BRIDGE_HOST")]
    host: Option<String>,

    #[arg(long, env = "AGENT_BRIDGE_PORT")]
    port: Option<u16>,

    #[arg(long, env = "AGENT_BRIDGE_TOKEN")]
    token: Option<String>,

    #[arg(long, env = "AGENT_BRIDGE_TIMEOUT_SECS", value_parser = parse_duration)]
    timeout: Option<Duration>,

    #[arg(long, env = "AGENT_BRIDGE_LONG_TIMEOUT_SECS", value_parser = parse_duration)]
    long_timeout: Option<Duration>,

    #[arg(long, env = "AGENT_BRIDGE_CONNECT_TIMEOUT_SECS", value_parser = parse_duration)]
    connect_timeout: Option<Duration>,

    #[arg(
        long,
        env = "AGENT_BRIDGE_LONG_RUNNING",
        value_delimiter = ',',
        help = "Commands that wait on the long timeout tier"
    )]
    long_running: Option<Vec<String>>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invoke one bridge command and print its result.
    Invoke(InvokeArgs),
    /// List the commands the bridge exposes.
    Discover,
    /// Describe the events the bridge can emit.
    EventsInfo,
}

#[derive(Args, Debug)]
struct InvokeArgs {
    command: String,

    #[arg(long, default_value = "{}", help = "Arguments as a JSON object")]
    args: String,

    #[arg(long, default_value_t = false, help = "Print progress/log/status events to stderr")]
    events: bool,

    #[arg(long, value_parser = parse_duration, help = "Override the command's timeout tier")]
    timeout_secs: Option<Duration>,
}

impl Cli {
    /// Environment config with explicit flags applied on top.
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();

        if let Some(url) = self.url.as_deref().filter(|url| !url.is_empty()) {
            config.url = url.to_owned();
        } else if self.host.is_some() || self.port.is_some() {
            let host = self.host.as_deref().unwrap_or(agentlink::DEFAULT_HOST);
            config.url = agentlink::bridge_url(host, self.port.unwrap_or(agentlink::DEFAULT_PORT));
        }
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            config.token = Some(token.to_owned());
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }

        let mut timeouts = config.timeouts.clone();
        if let Some(short) = self.timeout {
            timeouts.short = short;
        }
        if let Some(long) = self.long_timeout {
            timeouts.long = long;
        }
        if let Some(commands) = &self.long_running {
            let commands = commands.iter().map(String::as_str).map(str::trim);
            timeouts = timeouts.with_long_running(commands.filter(|cmd| !cmd.is_empty()));
        }
        config.with_timeouts(timeouts)
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let client = AgentClient::new(cli.client_config());

    let (command, arguments, options) = match cli.command {
        Command::Invoke(args) => {
            let arguments = parse_args_object(&args.args)?;
            let mut options = InvokeOptions::new();
            if args.events {
                options = options.with_events(print_event);
            }
            if let Some(timeout) = args.timeout_secs {
                options = options.with_timeout(timeout);
            }
            (args.command, arguments, options)
        }
        Command::Discover => (
            "agent_api_discover".to_owned(),
            Map::new(),
            InvokeOptions::new(),
        ),
        Command::EventsInfo => (
            "agent_api_events_info".to_owned(),
            Map::new(),
            InvokeOptions::new(),
        ),
    };

    let result = client
        .scoped(async {
            client
                .invoke_with(&command, arguments, options)
                .await
                .map_err(|error| remote_or_client(&command, error))
        })
        .await?;

    print_json(&result)
}

fn remote_or_client(command: &str, error: ClientError) -> CliError {
    if error.is_remote() {
        CliError::Remote {
            command: command.to_owned(),
            message: error.to_string(),
        }
    } else {
        CliError::Client(error)
    }
}

fn parse_args_object(raw: &str) -> Result<Map<String, Value>, CliError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(CliError::ArgsNotObject),
    }
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    agentlink::parse_secs(raw)
        .ok_or_else(|| format!("invalid duration `{raw}`; expected non-negative seconds"))
}

fn print_event(event: &Event) {
    let line = format_event(event);
    let _ = writeln!(io::stderr().lock(), "{line}");
}

fn format_event(event: &Event) -> String {
    let message = event.message().unwrap_or_default();
    match event.kind() {
        EventKind::Progress => {
            let percent = event.progress().unwrap_or(0.0) * 100.0;
            format!("progress {percent:.0}% {message}").trim_end().to_owned()
        }
        EventKind::Log => format!("[{}] {message}", event.level().unwrap_or("info")),
        EventKind::Status => format!("status: {}", event.status().unwrap_or_default()),
        EventKind::Other(kind) => format!("{kind}: {}", Value::Object(event.data.clone())),
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
