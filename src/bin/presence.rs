//! Presence CLI - Command-line interface for the presence engine
//!
//! Commands:
//! - score: Score a recorded NDJSON stream (batch mode)
//! - run: Score NDJSON records streamed on stdin, report on EOF
//! - config: Print the default configuration or check a config file
//! - doctor: Diagnose installation and configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};

use presence_engine::encoder::PresencePayload;
use presence_engine::{EngineConfig, EngineError, PresenceProcessor};
use presence_engine::{ENGINE_VERSION, PRODUCER_NAME};

/// Presence - nonverbal presence analysis for talks
#[derive(Parser)]
#[command(name = "presence")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Score speaker presence from landmark and voice features", long_about = None)]
struct Cli {
    /// Log level written to stderr (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a recorded stream of NDJSON records (batch mode)
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Session id recorded in the report
        #[arg(long)]
        session_id: Option<String>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        format: OutputFormat,
    },

    /// Score NDJSON records streamed on stdin (streaming mode)
    Run {
        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Session id recorded in the report
        #[arg(long)]
        session_id: Option<String>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        format: OutputFormat,

        /// Skip malformed lines instead of failing
        #[arg(long)]
        lenient: bool,
    },

    /// Print the default configuration, or validate a configuration file
    Config {
        /// Configuration file to validate
        #[arg(long)]
        check: Option<PathBuf>,
    },

    /// Diagnose installation and configuration
    Doctor {
        /// Configuration file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Single-line JSON terminated by a newline
    Ndjson,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(io::stderr)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), PresenceCliError> {
    match command {
        Commands::Score {
            input,
            output,
            config,
            session_id,
            format,
        } => cmd_score(&input, &output, config.as_deref(), session_id, format),

        Commands::Run {
            config,
            session_id,
            format,
            lenient,
        } => cmd_run(config.as_deref(), session_id, format, lenient),

        Commands::Config { check } => cmd_config(check.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, PresenceCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_path(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn make_processor(
    config: Option<&Path>,
    session_id: Option<String>,
) -> Result<PresenceProcessor, PresenceCliError> {
    let config = load_config(config)?;
    let processor = match session_id {
        Some(id) => PresenceProcessor::with_session_id(config, id)?,
        None => PresenceProcessor::new(config)?,
    };
    Ok(processor)
}

fn cmd_score(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    session_id: Option<String>,
    format: OutputFormat,
) -> Result<(), PresenceCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let mut processor = make_processor(config, session_id)?;
    let records = processor.ingest_ndjson(&input_data)?;
    if records == 0 {
        return Err(PresenceCliError::NoRecords);
    }
    info!(records, "input ingested");

    let output_data = format_output(&processor.encode()?, &format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_run(
    config: Option<&Path>,
    session_id: Option<String>,
    format: OutputFormat,
    lenient: bool,
) -> Result<(), PresenceCliError> {
    let mut processor = make_processor(config, session_id)?;
    let stdin = io::stdin();
    let mut records = 0usize;

    for (i, line) in stdin.lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match processor.ingest_json(&line) {
            Ok(()) => records += 1,
            Err(e) if lenient => {
                tracing::warn!(line = i + 1, error = %e, "skipping malformed record");
            }
            Err(e) => {
                return Err(PresenceCliError::ParseError(format!("line {}: {}", i + 1, e)));
            }
        }
    }

    if records == 0 {
        return Err(PresenceCliError::NoRecords);
    }

    let mut stdout = io::stdout();
    write!(stdout, "{}", format_output(&processor.encode()?, &format)?)?;
    stdout.flush()?;
    Ok(())
}

fn cmd_config(check: Option<&Path>) -> Result<(), PresenceCliError> {
    match check {
        Some(path) => {
            let config = EngineConfig::from_path(path)?;
            println!("Configuration OK: {}", path.display());
            if config == EngineConfig::default() {
                println!("(identical to the defaults)");
            }
        }
        None => println!("{}", EngineConfig::default().to_json()?),
    }
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), PresenceCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Presence engine version {}", ENGINE_VERSION),
    });

    checks.push(match EngineConfig::default().validate() {
        Ok(()) => DoctorCheck {
            name: "default_config".to_string(),
            status: CheckStatus::Ok,
            message: "Built-in defaults are valid".to_string(),
        },
        Err(e) => DoctorCheck {
            name: "default_config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    if let Some(path) = config {
        let check = if !path.exists() {
            DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Configuration file does not exist".to_string(),
            }
        } else {
            match EngineConfig::from_path(path) {
                Ok(_) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Configuration file valid: {}", path.display()),
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            }
        };
        checks.push(check);
    }

    // Check stdin is available (for streaming mode)
    let stdin_message = if atty::is(atty::Stream::Stdin) {
        "stdin is a TTY (interactive mode)"
    } else {
        "stdin is a pipe (streaming mode ready)"
    };
    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: stdin_message.to_string(),
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Presence Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(PresenceCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn format_output(payload: &PresencePayload, format: &OutputFormat) -> Result<String, PresenceCliError> {
    match format {
        OutputFormat::Ndjson => Ok(serde_json::to_string(payload)? + "\n"),
        OutputFormat::Json => Ok(serde_json::to_string(payload)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(payload)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum PresenceCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoRecords,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for PresenceCliError {
    fn from(e: io::Error) -> Self {
        PresenceCliError::Io(e)
    }
}

impl From<EngineError> for PresenceCliError {
    fn from(e: EngineError) -> Self {
        PresenceCliError::Engine(e)
    }
}

impl From<serde_json::Error> for PresenceCliError {
    fn from(e: serde_json::Error) -> Self {
        PresenceCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PresenceCliError> for CliError {
    fn from(e: PresenceCliError) -> Self {
        match e {
            PresenceCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PresenceCliError::Engine(e) => {
                let (code, hint) = match &e {
                    EngineError::InvalidConfig { .. } => {
                        ("CONFIG_ERROR", "Run 'presence config' to see valid defaults")
                    }
                    EngineError::MissingField(_) => {
                        ("MISSING_FIELD", "Supply the field in the voice record or its transcript")
                    }
                    EngineError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                    _ => ("PARSE_ERROR", "Each line must be a record tagged with \"modality\""),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            PresenceCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PresenceCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input is not empty".to_string()),
            },
            PresenceCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the failed checks above".to_string()),
            },
            PresenceCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Pass --lenient to skip malformed records".to_string()),
            },
        }
    }
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
