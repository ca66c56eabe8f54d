//! solfa: compile solfège music notation and print the result.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{debug, Level};

use solfa::config::Config;
use solfa::dsl::{CompileError, Compiler};

#[derive(Parser)]
#[command(name = "solfa")]
#[command(about = "Compile solfège music notation", long_about = None, version)]
struct Cli {
    /// Source file
    input: PathBuf,

    /// Stage to print
    #[arg(long, value_enum, default_value_t = Emit::Resolved)]
    emit: Emit,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Yaml)]
    format: Format,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file (default: ~/.solfa/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the instrument and pitch range check
    #[arg(long)]
    no_instrument_check: bool,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum Emit {
    /// Token stream
    Tokens,
    /// Parsed program, before resolution
    Ast,
    /// Fully resolved program
    Resolved,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

const EXIT_DIAGNOSTICS: u8 = 1;
const EXIT_IO: u8 = 2;
const EXIT_INTERNAL: u8 = 70;

enum Failure {
    Diagnostics(Vec<CompileError>),
    Render(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: cannot load config {}: {e}", path.display());
                return ExitCode::from(EXIT_IO);
            }
        },
        None => Config::load().unwrap_or_default(),
    };
    if cli.no_instrument_check {
        config.check_instruments = false;
    }

    init_logging(cli.verbose, &config.log_level);

    let source = match std::fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", cli.input.display());
            return ExitCode::from(EXIT_IO);
        }
    };

    let compiler = Compiler::new(config);
    debug!(config = ?compiler.config(), "loaded configuration");
    let text = match run(&compiler, &source, cli.emit, cli.format) {
        Ok(text) => text,
        Err(Failure::Diagnostics(errors)) => return report(&errors),
        Err(Failure::Render(message)) => {
            eprintln!("error: cannot serialize output: {message}");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("error: cannot write {}: {e}", path.display());
                return ExitCode::from(EXIT_IO);
            }
        }
        None => print!("{text}"),
    }
    ExitCode::SUCCESS
}

fn init_logging(verbose: u8, configured: &str) {
    let level = match verbose {
        0 => configured.parse().unwrap_or(Level::WARN),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(compiler: &Compiler, source: &str, emit: Emit, format: Format) -> Result<String, Failure> {
    match emit {
        Emit::Tokens => {
            let tokens = compiler
                .tokenize(source)
                .map_err(|e| Failure::Diagnostics(vec![e]))?;
            render(&tokens, format)
        }
        Emit::Ast => {
            let mut program = compiler
                .parse(source)
                .map_err(|e| Failure::Diagnostics(vec![e]))?;
            if program.has_errors() {
                return Err(Failure::Diagnostics(std::mem::take(
                    &mut program.diagnostics,
                )));
            }
            render(&program, format)
        }
        Emit::Resolved => {
            let program = compiler.compile(source).map_err(Failure::Diagnostics)?;
            render(&program, format)
        }
    }
}

fn render<T: Serialize>(value: &T, format: Format) -> Result<String, Failure> {
    let mut text = match format {
        Format::Yaml => serde_yaml::to_string(value).map_err(|e| Failure::Render(e.to_string()))?,
        Format::Json => {
            serde_json::to_string_pretty(value).map_err(|e| Failure::Render(e.to_string()))?
        }
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}

/// Print diagnostics to stderr and pick the exit status.
fn report(errors: &[CompileError]) -> ExitCode {
    for err in errors {
        eprintln!("{err}");
    }
    eprintln!(
        "error: compilation failed with {} problem(s)",
        errors.len()
    );
    if errors.iter().any(CompileError::is_internal) {
        ExitCode::from(EXIT_INTERNAL)
    } else {
        ExitCode::from(EXIT_DIAGNOSTICS)
    }
}
