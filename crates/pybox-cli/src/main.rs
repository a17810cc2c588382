//! pybox CLI - run Python files through the sandbox orchestrator

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pybox_core::{ExecutionRequest, Orchestrator, OrchestratorConfig};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Exit status when the orchestrator itself reported an error
const ORCHESTRATOR_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "pybox")]
#[command(author, version, about = "Run untrusted Python code under resource limits")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a Python file and print the result as JSON
    Run {
        /// File to execute (or - for stdin)
        file: String,

        /// File whose contents are fed to the program's stdin
        #[arg(long)]
        stdin: Option<PathBuf>,

        #[command(flatten)]
        settings: Settings,
    },

    /// Print the limits a run would get with the given settings
    Limits {
        #[command(flatten)]
        settings: Settings,
    },
}

#[derive(Args)]
struct Settings {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Runner binary (defaults to PYBOX_RUNNER or pybox-runner next to this executable)
    #[arg(long)]
    runner: Option<PathBuf>,

    /// Directory for per-run workspaces (defaults to PYBOX_SCRATCH_ROOT or <tmp>/pybox)
    #[arg(long)]
    scratch_root: Option<PathBuf>,

    /// Time limit in seconds
    #[arg(short, long)]
    time_limit: Option<f64>,

    /// Memory limit in MB
    #[arg(short, long)]
    memory_limit_mb: Option<u64>,
}

impl Settings {
    fn config(&self) -> Result<OrchestratorConfig> {
        let mut config = match &self.config {
            Some(path) => OrchestratorConfig::from_json_file(path)?,
            None => OrchestratorConfig::default(),
        };
        if let Some(runner) = &self.runner {
            config.runner_path.clone_from(runner);
        }
        if let Some(root) = &self.scratch_root {
            config.scratch_root.clone_from(root);
        }
        config.validate()?;
        Ok(config)
    }

    fn request(&self, config: &OrchestratorConfig, code: String) -> ExecutionRequest {
        let mut request = ExecutionRequest::new(code)
            .with_time_limit(self.time_limit.unwrap_or(config.default_time_limit));
        if let Some(mb) = self.memory_limit_mb {
            request = request.with_memory_limit(mb.saturating_mul(1024 * 1024));
        }
        request
    }
}

fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "pybox=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(ORCHESTRATOR_ERROR)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run {
            file,
            stdin,
            settings,
        } => {
            let config = settings.config()?;
            let code = read_source(&file)?;
            let mut request = settings.request(&config, code);
            if let Some(path) = stdin {
                let input = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read stdin file {}", path.display()))?;
                request = request.with_stdin(input);
            }

            let orchestrator = Orchestrator::new(config);
            match orchestrator.execute(&request) {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(if result.success {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    })
                }
                Err(e) => {
                    eprintln!("error[{}]: {e}", e.kind());
                    Ok(ExitCode::from(ORCHESTRATOR_ERROR))
                }
            }
        }

        Commands::Limits { settings } => {
            let config = settings.config()?;
            let request = settings.request(&config, String::new());
            let orchestrator = Orchestrator::new(config);

            let limits = orchestrator.limits_for(&request);
            let report = serde_json::json!({
                "runner": orchestrator.config().runner_path,
                "scratch_root": orchestrator.config().scratch_root,
                "limits": limits,
                "outer_deadline_secs": orchestrator.outer_deadline(&request).as_secs_f64(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_source(file: &str) -> Result<String> {
    if file == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("failed to read code from stdin")?;
        return Ok(code);
    }

    let path = Path::new(file);
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
