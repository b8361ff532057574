//! prm - mirror a repository's pull requests into a local file store.

use std::process;

use chrono::Utc;
use clap::Parser;
use pr_mirror::cancel::CancelToken;
use pr_mirror::cli::{Cli, Commands, ConfigCommands};
use pr_mirror::commands::{self, Output, SyncArgs, ValidateArgs};
use pr_mirror::config::{ConfigOverrides, resolve_config};
use pr_mirror::github::GithubClient;
use pr_mirror::logging::{self, Verbosity};

/// Exit code of `validate` when it could not produce a report.
const VALIDATE_ERROR_EXIT: i32 = 2;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    if let Err(e) = logging::init(Verbosity::from_flags(cli.verbose, cli.quiet)) {
        eprintln!("warning: logging disabled: {}", e);
    }

    let error_exit = match cli.command {
        Commands::Validate { .. } => VALIDATE_ERROR_EXIT,
        _ => 1,
    };

    match run_command(cli, human) {
        Ok(code) => process::exit(code),
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            if human {
                eprintln!("Error: {}", e);
            } else {
                eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
            }
            process::exit(error_exit);
        }
    }
}

fn overrides(cli: &Cli) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(ref path) = cli.config {
        overrides = overrides.with_config_path(path);
    }
    if let Some(ref repository) = cli.repository {
        overrides = overrides.with_repository(repository);
    }
    if let Some(ref dir) = cli.data_dir {
        overrides = overrides.with_data_dir(dir);
    }
    if let Some(ref url) = cli.api_base_url {
        overrides = overrides.with_api_base_url(url);
    }
    if let Some(ref token) = cli.token {
        overrides = overrides.with_token(token);
    }
    overrides
}

/// Ctrl-C stops the current run after the item in flight.
fn cancel_token() -> Result<CancelToken, pr_mirror::Error> {
    let cancel = CancelToken::new();
    cancel.install_ctrlc_handler()?;
    Ok(cancel)
}

fn run_command(cli: Cli, human: bool) -> Result<i32, pr_mirror::Error> {
    let resolved = resolve_config(&overrides(&cli))?;

    match cli.command {
        Commands::Sync {
            mode,
            output_dir,
            max_count,
            start,
            end,
            since,
            recent_days,
        } => {
            let config = resolved.into_config();
            let client = GithubClient::from_config(&config)?;
            let args = SyncArgs {
                mode,
                output_dir,
                max_count,
                start,
                end,
                since,
                recent_days,
            };
            let result = commands::sync(&client, &config, &args, cancel_token()?)?;
            output(&result, human);
            Ok(0)
        }

        Commands::Validate {
            output_file,
            console_only,
        } => {
            let config = resolved.into_config();
            let client = GithubClient::from_config(&config)?;
            let args = ValidateArgs {
                output_file,
                console_only,
            };
            let result = commands::validate(&client, &config, &args, cancel_token()?, Utc::now())?;
            output(&result, human);
            Ok(result.exit_code())
        }

        Commands::Gaps { probe } => {
            let config = resolved.into_config();
            let client = GithubClient::from_config(&config)?;
            let result = commands::gaps(&client, &config, probe, cancel_token()?)?;
            output(&result, human);
            Ok(0)
        }

        Commands::Status => {
            let result = commands::status(&resolved.into_config())?;
            output(&result, human);
            Ok(0)
        }

        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                output(&commands::config_show(resolved), human);
                Ok(0)
            }
        },
    }
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
