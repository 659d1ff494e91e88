use anyhow::Result;
use clap::Parser;
use metricore::cli::{CacheCommand, Cli, Commands, OutputFormat};
use metricore::commands::{self, AnalyzeOptions, CacheAction};
use metricore::config::{load_config, EngineConfigBuilder, WorkerCommand};
use metricore::observability::{init_tracing, install_panic_hook};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    install_panic_hook();
    init_tracing(cli.verbosity);

    match cli.command {
        Commands::Worker => {
            commands::run_worker()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Init { force } => {
            commands::init_config(Path::new("."), force)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cache { action } => {
            let config = base_builder(cli.config.as_deref(), cli.cache_dir.as_deref())?.build()?;
            commands::handle_cache(cache_action(action), &config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Analyze {
            paths,
            format,
            extensions,
            jobs,
            timeout_secs,
            bypass,
            no_process_pool,
        } => {
            let mut builder = base_builder(cli.config.as_deref(), cli.cache_dir.as_deref())?;
            if let Some(jobs) = jobs {
                builder = builder.max_workers(jobs);
            }
            if let Some(secs) = timeout_secs {
                builder = builder.batch_timeout(Duration::from_secs(secs));
            }
            if bypass {
                builder = builder.bypass_optimized_path(true);
            }
            builder = if no_process_pool {
                builder.worker_command(None)
            } else {
                builder.worker_command_or(WorkerCommand::current_exe())
            };

            let options = AnalyzeOptions {
                paths,
                extensions,
                json: format == OutputFormat::Json,
            };
            let failures = commands::handle_analyze(options, builder.build()?)?;
            Ok(if failures == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
    }
}

fn base_builder(config: Option<&Path>, cache_dir: Option<&Path>) -> Result<EngineConfigBuilder> {
    let builder = load_config(config)?;
    Ok(match cache_dir {
        Some(dir) => builder.cache_location(dir),
        None => builder,
    })
}

// Pure function to map CLI cache subcommands onto command actions
fn cache_action(command: CacheCommand) -> CacheAction {
    match command {
        CacheCommand::Stats { json } => CacheAction::Stats { json },
        CacheCommand::List { limit, json } => CacheAction::List { limit, json },
        CacheCommand::Evict { key } => CacheAction::Evict { key },
        CacheCommand::Prune => CacheAction::Prune,
        CacheCommand::Clear => CacheAction::Clear,
        CacheCommand::Path => CacheAction::Path,
    }
}
