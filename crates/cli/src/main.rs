//! `toolbridge`: load an OpenAPI 3.1 document, inspect the synthesized tools, or call one.

mod config;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use toolbridge_openapi_tools::{ProxyError, ToolRegistry};
use tracing_subscriber::EnvFilter;

use crate::config::{Overrides, load_config};

const EXIT_STARTUP: u8 = 1;
const EXIT_TOOL_ERROR: u8 = 2;
const EXIT_TRANSPORT: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "toolbridge", version, about)]
struct Cli {
    /// Config file (YAML or JSON). Flags override its values.
    #[arg(long, env = "TOOLBRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// OpenAPI 3.1 document (YAML or JSON).
    #[arg(long, global = true)]
    spec: Option<PathBuf>,

    /// Upstream base URL. Defaults to the document's first server.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer token sent as `Authorization: Bearer <token>`.
    #[arg(long, env = "TOOLBRIDGE_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Header set as a JSON object, e.g. `{"X-Api-Key": "..."}`. Exclusive with --token.
    #[arg(long, env = "TOOLBRIDGE_HEADERS", global = true, hide_env_values = true)]
    headers: Option<String>,

    /// Per-attempt upstream timeout in milliseconds (0 disables).
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Retries for GET/HEAD transport failures.
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the document, then print operation and tool counts.
    Validate,
    /// Print the synthesized tool descriptors as JSON.
    List,
    /// Call one tool and print the result.
    Call {
        name: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            config: self.config.clone(),
            spec: self.spec.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            headers: self.headers.clone(),
            timeout_ms: self.timeout_ms,
            max_retries: self.max_retries,
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cfg = load_config(&cli.overrides())?;

    let registry = match ToolRegistry::build(&cfg) {
        Ok(registry) => registry,
        Err(e) => {
            report_startup_error(&e);
            return Ok(ExitCode::from(EXIT_STARTUP));
        }
    };

    match cli.command {
        Command::Validate => {
            println!(
                "{} {}: {} operations, {} tools",
                registry.title(),
                registry.version(),
                registry.operation_count(),
                registry.tool_count()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::List => {
            println!("{}", serde_json::to_string_pretty(registry.descriptors())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Call { name, args } => {
            let arguments: Value = match serde_json::from_str(&args) {
                Ok(v) => v,
                Err(e) => anyhow::bail!("--args is not valid JSON: {e}"),
            };
            match registry.call_tool(&name, arguments).await {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    if result.is_error == Some(true) {
                        Ok(ExitCode::from(EXIT_TOOL_ERROR))
                    } else {
                        Ok(ExitCode::SUCCESS)
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    println!("{}", serde_json::to_string_pretty(&e.to_json())?);
                    Ok(ExitCode::from(EXIT_TRANSPORT))
                }
            }
        }
    }
}

fn report_startup_error(e: &ProxyError) {
    match e {
        ProxyError::SpecInvalid {
            location,
            violations,
        } => {
            eprintln!(
                "error: invalid spec '{location}' ({} violation(s)):",
                violations.len()
            );
            for v in violations {
                eprintln!("  {v}");
            }
        }
        other => eprintln!("error: {other}"),
    }
}
