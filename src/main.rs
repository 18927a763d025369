use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli_autopilot::scratch::{PromptSections, ScratchDir};
use cli_autopilot::{
    AutomationConfig, AutomationError, AutomationOrchestrator, DeliveryOptions, DeliveryStatus,
    Platform,
};

#[derive(Parser)]
#[command(name = "cli-autopilot", version, about = "Deliver task files into an interactive terminal CLI")]
struct Cli {
    /// Log at debug level regardless of RUST_LOG
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a new host terminal running the tool
    Launch,
    /// Write a task file into the scratch directory
    WriteTask {
        #[arg(long)]
        role: String,
        #[arg(long)]
        goal: String,
        #[arg(long, default_value = "")]
        function_output: String,
        #[arg(long, default_value = "")]
        ui_requirements: String,
    },
    /// Paste a task file into the tool and submit it
    Deliver {
        /// Defaults to the newest task in the scratch directory
        file: Option<PathBuf>,
        /// Deliver into the newest running session instead of launching one
        #[arg(long)]
        reuse: bool,
        #[arg(long)]
        no_monitor: bool,
        #[arg(long)]
        monitor_secs: Option<u64>,
    },
    /// Run the tool non-interactively with the task file on stdin
    Pipe { file: Option<PathBuf> },
    /// Check the screen once for a confirmation prompt
    Detect,
    /// Watch the screen for a confirmation prompt
    Monitor {
        #[arg(long, default_value_t = 30)]
        secs: u64,
        #[arg(long, default_value_t = 2000)]
        poll_ms: u64,
    },
    /// Terminate all but the newest tool (or terminal) processes
    Cleanup {
        #[arg(long)]
        terminals: bool,
        #[arg(long, default_value_t = 1)]
        keep_newest: usize,
    },
    /// Delete old files from the scratch directory
    CleanScratch {
        #[arg(long, default_value_t = 24)]
        older_than_hours: u64,
    },
    /// Print the detected platform
    Platform,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(code = e.code(), "{}", e);
            ExitCode::from(2)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AutomationError> {
    let json = serde_json::to_string_pretty(value).map_err(anyhow::Error::from)?;
    println!("{}", json);
    Ok(())
}

fn task_or_latest(file: Option<PathBuf>, scratch: &ScratchDir) -> Result<PathBuf, AutomationError> {
    if let Some(file) = file {
        return Ok(file);
    }
    scratch
        .latest_task()?
        .ok_or_else(|| AutomationError::TaskFileMissing(scratch.root().join("prompt_*.txt")))
}

fn run(command: Command) -> Result<ExitCode, AutomationError> {
    let config = AutomationConfig::from_env();
    let scratch = ScratchDir::new(&config.scratch_dir);

    match command {
        Command::Platform => {
            println!("{}", Platform::current());
        }
        Command::WriteTask {
            role,
            goal,
            function_output,
            ui_requirements,
        } => {
            let sections = PromptSections {
                role,
                goal,
                function_output,
                ui_requirements,
            };
            println!("{}", scratch.write_task(&sections)?.display());
        }
        Command::CleanScratch { older_than_hours } => {
            print_json(&scratch.cleanup_older_than(older_than_hours)?)?;
        }
        Command::Launch => {
            let orchestrator = AutomationOrchestrator::for_current_platform(config)?;
            print_json(&orchestrator.open_target_tool()?)?;
        }
        Command::Pipe { file } => {
            let path = task_or_latest(file, &scratch)?;
            let orchestrator = AutomationOrchestrator::for_current_platform(config)?;
            print_json(&orchestrator.deliver_piped(&path)?)?;
        }
        Command::Deliver {
            file,
            reuse,
            no_monitor,
            monitor_secs,
        } => {
            let path = task_or_latest(file, &scratch)?;
            let mut options = DeliveryOptions::from_config(&config);
            options.launch_new = !reuse;
            options.monitor_prompts = !no_monitor;
            if let Some(secs) = monitor_secs {
                options.monitor_duration = Duration::from_secs(secs);
            }

            let orchestrator = AutomationOrchestrator::for_current_platform(config)?;
            let report = orchestrator.deliver(&path, &options)?;
            print_json(&report)?;
            if report.status == DeliveryStatus::Failed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Detect => {
            let orchestrator = AutomationOrchestrator::for_current_platform(config)?;
            print_json(&orchestrator.detect_prompt())?;
        }
        Command::Monitor { secs, poll_ms } => {
            let orchestrator = AutomationOrchestrator::for_current_platform(config)?;
            let outcome = orchestrator
                .monitor_prompts(Duration::from_secs(secs), Duration::from_millis(poll_ms.max(1)));
            print_json(&outcome)?;
        }
        Command::Cleanup {
            terminals,
            keep_newest,
        } => {
            let orchestrator = AutomationOrchestrator::for_current_platform(config)?;
            let report = if terminals {
                orchestrator.cleanup_terminal_processes(keep_newest)
            } else {
                orchestrator.cleanup_target_processes(keep_newest)
            };
            print_json(&report)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
