use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crewflow::cli::commands;
use crewflow::cli::ui::OutputFormat;

#[derive(Parser)]
#[command(name = "crewflow")]
#[command(
    version,
    about = "Multi-agent workflow orchestrator: prompt → specification → code → tests"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize crewflow in the current directory
    Init {
        #[arg(long, short, help = "Overwrite existing initialization")]
        force: bool,
    },

    /// Start a workflow for a prompt
    Run {
        #[arg(help = "What to build")]
        prompt: String,
        #[arg(long, short, help = "Project id (default: directory name)")]
        project: Option<String>,
        #[arg(long, help = "Skip the specification approval gate")]
        no_approval: bool,
        #[arg(long, help = "Re-run automatically while the review has blocking issues")]
        auto_iterate: bool,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Resume a run awaiting approval
    Approve {
        run_id: String,
        #[arg(long, help = "Approve an edited specification (JSON file) instead")]
        spec_file: Option<PathBuf>,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Start a new run from a previous one plus refinement notes
    Refine {
        run_id: String,
        #[arg(long, short, help = "What to change")]
        notes: String,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Critic review and integration of a run's generated code
    Review {
        run_id: String,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show recent runs or one run in detail
    Status {
        run_id: Option<String>,
        #[arg(long, short, help = "Only runs of this project")]
        project: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Request cancellation of a run
    Cancel { run_id: String },

    /// Fail stages left active past the stage timeout
    Reconcile {
        #[arg(long, help = "Stage timeout override in seconds")]
        timeout_secs: Option<u64>,
        #[arg(long, help = "Keep reconciling periodically until Ctrl-C")]
        watch: bool,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run one workflow per line of a prompt file
    Batch {
        file: PathBuf,
        #[arg(long, short)]
        project: Option<String>,
        #[arg(long, short, help = "Concurrent runs (default: workflow.batch_concurrency)")]
        concurrency: Option<usize>,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mcrewflow encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Backtrace with RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init { force } => commands::init::run(force)?,
        Commands::Run {
            prompt,
            project,
            no_approval,
            auto_iterate,
            format,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::run::run(commands::run::RunOptions {
                prompt,
                project,
                no_approval,
                auto_iterate,
                format,
            }))?;
        }
        Commands::Approve {
            run_id,
            spec_file,
            format,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::approve::run(&run_id, spec_file.as_deref(), format))?;
        }
        Commands::Refine {
            run_id,
            notes,
            format,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::refine::run(&run_id, &notes, format))?;
        }
        Commands::Review { run_id, format } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::review::run(&run_id, format))?;
        }
        Commands::Status {
            run_id,
            project,
            limit,
            format,
        } => commands::status::run(run_id.as_deref(), project.as_deref(), limit, format)?,
        Commands::Cancel { run_id } => commands::cancel::run(&run_id)?,
        Commands::Reconcile {
            timeout_secs,
            watch,
            format,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::reconcile::run(timeout_secs, watch, format))?;
        }
        Commands::Batch {
            file,
            project,
            concurrency,
            format,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::batch::run(
                &file,
                project.as_deref(),
                concurrency,
                format,
            ))?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => commands::config::show(global, format)?,
            ConfigAction::Path => commands::config::path()?,
            ConfigAction::Init { global, force } => commands::config::init(global, force)?,
        },
    }

    Ok(())
}
