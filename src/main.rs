use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use rpnjit::config::{JitMode, RuntimeConfig};

// Wrapper types for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum JitModeArg {
    Off,
    On,
    #[default]
    Auto,
}

impl From<JitModeArg> for JitMode {
    fn from(arg: JitModeArg) -> Self {
        match arg {
            JitModeArg::Off => JitMode::Off,
            JitModeArg::On => JitMode::On,
            JitModeArg::Auto => JitMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum FormatArg {
    #[default]
    Human,
    Json,
}

#[derive(Parser)]
#[command(name = "rpnjit")]
#[command(about = "Evaluate postfix arithmetic, interpreted or JIT-compiled", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression
    Run {
        /// Space-separated postfix expression, e.g. "3 4 + 2 *"
        #[arg(allow_hyphen_values = true)]
        expr: String,

        /// JIT compilation mode (off, on, auto). Compiled code does not check division: "x 0 /" kills the process with SIGFPE, use "--jit off" or "check" for a clean error
        #[arg(long, value_enum)]
        jit: Option<JitModeArg>,

        /// Trace JIT compilation events
        #[arg(long)]
        trace_jit: bool,

        /// Re-run the evaluation N times and fail if any result differs
        #[arg(long, default_value = "1")]
        repeat: u64,

        /// Write the emitted machine code to a file
        #[arg(long, value_name = "FILE")]
        dump_code: Option<PathBuf>,

        /// Load runtime configuration from a TOML file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output format (human or json)
        #[arg(long, value_enum, default_value = "human")]
        format: FormatArg,
    },
    /// Evaluate with both engines and compare the results
    Check {
        #[arg(allow_hyphen_values = true)]
        expr: String,

        /// Load runtime configuration from a TOML file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct RunReport {
    expression: String,
    engine: &'static str,
    value: i64,
    repeat: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elided_pairs: Option<usize>,
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, String> {
    match path {
        Some(path) => RuntimeConfig::load(path).map_err(|e| e.to_string()),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Re-evaluate `repeat - 1` more times, failing on the first mismatch.
fn check_deterministic(
    first: i64,
    repeat: u64,
    mut next: impl FnMut() -> Result<i64, String>,
) -> Result<(), String> {
    for _ in 1..repeat {
        let value = next()?;
        if value != first {
            return Err(format!("Not deterministic! {} != {}", first, value));
        }
    }
    Ok(())
}

fn run_interpreter(expr: &str, config: &RuntimeConfig, repeat: u64) -> Result<RunReport, String> {
    let eval = || rpnjit::evaluate_with_config(expr, config).map_err(|e| e.to_string());
    let value = eval()?;
    check_deterministic(value, repeat, eval)?;

    Ok(RunReport {
        expression: expr.to_string(),
        engine: "interpreter",
        value,
        repeat,
        code_bytes: None,
        elided_pairs: None,
    })
}

#[cfg(feature = "jit")]
fn run_jit(
    expr: &str,
    config: &RuntimeConfig,
    repeat: u64,
    dump_code: Option<&Path>,
) -> Result<RunReport, String> {
    let compiled = rpnjit::compile_with_config(expr, config).map_err(|e| e.to_string())?;

    if let Some(path) = dump_code {
        std::fs::write(path, compiled.code())
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
    }

    let value = compiled.call();
    check_deterministic(value, repeat, || Ok(compiled.call()))?;

    Ok(RunReport {
        expression: expr.to_string(),
        engine: "jit",
        value,
        repeat,
        code_bytes: Some(compiled.code().len()),
        elided_pairs: Some(compiled.elided_pairs()),
    })
}

#[cfg(not(feature = "jit"))]
fn run_jit(
    _expr: &str,
    _config: &RuntimeConfig,
    _repeat: u64,
    _dump_code: Option<&Path>,
) -> Result<RunReport, String> {
    Err(rpnjit::RpnError::UnsupportedTarget.to_string())
}

fn print_report(report: &RunReport, format: FormatArg) -> Result<(), String> {
    match format {
        FormatArg::Human => println!("{}", report.value),
        FormatArg::Json => {
            let json = serde_json::to_string_pretty(report)
                .map_err(|e| format!("failed to serialize report: {}", e))?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn check(expr: &str, config: &RuntimeConfig) -> Result<i64, String> {
    let expected = rpnjit::evaluate_with_config(expr, config).map_err(|e| e.to_string())?;
    let actual = run_jit(expr, config, 1, None)?.value;
    if expected != actual {
        return Err(format!(
            "interpreter and JIT disagree: {} != {}",
            expected, actual
        ));
    }
    Ok(expected)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            expr,
            jit,
            trace_jit,
            repeat,
            dump_code,
            config,
            format,
        } => load_config(config.as_deref()).and_then(|mut config| {
            if let Some(jit) = jit {
                config.jit_mode = jit.into();
            }
            config.trace_jit |= trace_jit;

            if config.trace_jit {
                eprintln!("[JIT] Mode: {:?}", config.jit_mode);
            }

            let report = if config.jit_mode.use_jit() {
                run_jit(&expr, &config, repeat, dump_code.as_deref())?
            } else {
                if dump_code.is_some() {
                    eprintln!("warning: --dump-code has no effect without the JIT");
                }
                run_interpreter(&expr, &config, repeat)?
            };
            print_report(&report, format)
        }),
        Commands::Check { expr, config } => load_config(config.as_deref())
            .and_then(|config| check(&expr, &config))
            .map(|value| println!("{}", value)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
