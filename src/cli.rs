//! Command-line interface for svcctl.
use std::str::FromStr;

use clap::Parser;
use strum_macros::{AsRefStr, EnumString};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" | "information" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for svcctl.
#[derive(Parser)]
#[command(name = "svcctl", version)]
#[command(about = "Build, launch, and stop the services of a workspace", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Path to the configuration file (defaults to `svcctl.yaml` when present).
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<String>,

    /// `<target> <action>`: `all` or a service name, then `up` or `down`.
    #[arg(value_name = "OPERAND")]
    pub operands: Vec<String>,
}

/// What an invocation acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every discovered (for `up`) or registered (for `down`) service.
    All,
    /// A single service by name.
    Service(String),
}

/// What to do with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Action {
    /// Build and start.
    Up,
    /// Stop.
    Down,
}

/// A validated `<target> <action>` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// What to act on.
    pub target: Target,
    /// What to do.
    pub action: Action,
}

/// Why the operands could not be turned into an [`Invocation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// Exactly two operands are required.
    OperandCount(usize),
    /// The action is neither `up` nor `down`.
    UnknownAction(String),
}

impl Invocation {
    /// Parses `<target> <action>`.
    pub fn from_operands(operands: &[String]) -> Result<Self, UsageError> {
        let [target, action] = operands else {
            return Err(UsageError::OperandCount(operands.len()));
        };

        let action = Action::from_str(action.trim())
            .map_err(|_| UsageError::UnknownAction(action.clone()))?;

        let target = if target == "all" {
            Target::All
        } else {
            Target::Service(target.clone())
        };

        Ok(Self { target, action })
    }
}

/// Usage text followed by the services that can be targeted.
pub fn usage(services: &[String]) -> String {
    let mut text = String::from(
        "Usage:\n\
         \x20 svcctl all up              - Start all services\n\
         \x20 svcctl all down            - Stop all services\n\
         \x20 svcctl <service> up        - Start a specific service\n\
         \x20 svcctl <service> down      - Stop a specific service\n",
    );
    text.push('\n');
    text.push_str(&available_services(services));
    text
}

/// The "Available services" listing.
pub fn available_services(services: &[String]) -> String {
    let mut text = String::from("Available services:\n");
    for service in services {
        text.push_str(&format!("  - {service}\n"));
    }
    text
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
