use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use insurance_etl::generator::GenerateOptions;

use crate::{
    cli_interface::{Commands, CLI},
    commands::{
        generate::handle_generate_command, init::handle_init_command, run::handle_run_command,
    },
    console::print_error_message,
};

mod cli_interface;
mod commands;
mod console;
mod manifest_file;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CLI::parse();

    match &cli.command {
        Commands::Init { name, path } => {
            let resolved_path = resolve_path(path).map_err(|e| {
                print_error_message(&e);
                e
            })?;
            handle_init_command(resolved_path, name.as_deref())
        }
        Commands::Run { entities, dry_run, log_level, path } => {
            let resolved_path = resolve_path(path).map_err(|e| {
                print_error_message(&e);
                e
            })?;
            handle_run_command(resolved_path, entities, *dry_run, log_level).await
        }
        Commands::Generate { entity, rows, duplicate_rate, seed, path } => {
            let resolved_path = resolve_path(path).map_err(|e| {
                print_error_message(&e);
                e
            })?;
            let options =
                GenerateOptions { rows: *rows, duplicate_rate: *duplicate_rate, seed: *seed };
            handle_generate_command(resolved_path, *entity, options).await
        }
    }
}

fn resolve_path(override_path: &Option<String>) -> Result<PathBuf, String> {
    match override_path {
        Some(path) => {
            let path = PathBuf::from_str(path).map_err(|_| "Invalid path provided.".to_string())?;
            Ok(path)
        }
        None => {
            Ok(std::env::current_dir().map_err(|_| "Failed to get current directory.".to_string())?)
        }
    }
}
