use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use craftr_dsl::dsl::macros;
use craftr_dsl::driver::{builtin_context, Driver, CONTEXT_NAMES};
use craftr_dsl::error::{Error, Result};
use craftr_dsl::runtime::{Value, Vm};
use craftr_dsl::settings;

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "craftr-dsl", about = "Transpile or run build scripts written in the block DSL", version)]
struct Cli {
    /// Script to read. Reads stdin when omitted.
    file: Option<PathBuf>,

    /// Print the transpiled host source instead of running it
    #[arg(short = 'E', long, conflicts_with = "context")]
    transpile: bool,

    /// Root context the script runs against (void, namespace)
    #[arg(short, long)]
    context: Option<String>,

    /// Enable a macro plugin by name (repeatable)
    #[arg(long = "macro", value_name = "NAME")]
    macros: Vec<String>,

    /// JSON file with transpile options
    #[arg(long, value_name = "FILE")]
    options: Option<PathBuf>,

    /// Log pipeline stages to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_source(file: Option<&PathBuf>) -> Result<(String, String)> {
    match file {
        Some(path) => {
            let source = std::fs::read_to_string(path).map_err(|source| Error::Io { path: path.clone(), source })?;
            Ok((source, path.display().to_string()))
        }
        None => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .map_err(|source| Error::Io { path: PathBuf::from("<stdin>"), source })?;
            Ok((source, "<stdin>".to_string()))
        }
    }
}

fn context(name: Option<&str>) -> std::result::Result<Value, String> {
    match name {
        None => Ok(Value::None),
        Some(name) => builtin_context(name)
            .ok_or_else(|| format!("unknown context '{name}' (expected one of: {})", CONTEXT_NAMES.join(", "))),
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let options = match &cli.options {
        Some(path) => settings::load_options(path)?,
        None => settings::TranspileOptions::default(),
    };
    let driver = Driver::new().with_options(options).with_macros(macros::resolve(cli.macros.as_slice())?);
    let (source, filename) = read_source(cli.file.as_ref())?;

    if cli.transpile {
        print!("{}", driver.transpile(&source, &filename)?);
        return Ok(ExitCode::SUCCESS);
    }

    let context = match context(cli.context.as_deref()) {
        Ok(context) => context,
        Err(message) => {
            eprintln!("Error: {message}");
            return Ok(ExitCode::from(2));
        }
    };
    let mut vm = Vm::new();
    driver.run(&source, &filename, context, &mut vm)?;
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(Error::Syntax(err)) => {
            eprintln!("SyntaxError: {err}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
