//! Configuration view and validation commands: `orderflow config`.

use anyhow::Result;
use orderflow::config::{OrderflowConfig, OrderflowToml};

use super::super::ConfigCommands;

fn print_sections(toml: &OrderflowToml) {
    println!("[store]");
    println!("  path = \"{}\"", toml.store.path.display());
    println!("  busy_timeout_ms = {}", toml.store.busy_timeout_ms);
    println!();
    println!("[protocols]");
    println!("  batch_size = {}", toml.protocols.batch_size);
    println!(
        "  evaluator_version = \"{}\"",
        toml.protocols.evaluator_version
    );
    println!();
    println!("[checkpoints]");
    println!(
        "  default_resume_phase = \"{}\"",
        toml.checkpoints.default_resume_phase
    );
    println!();
    println!("[refund]");
    println!("  stale_lock_minutes = {}", toml.refund.stale_lock_minutes);
    println!();
    println!("[logging]");
    if let Some(filter) = &toml.logging.filter {
        println!("  filter = \"{}\"", filter);
    }
    println!("  format = \"{}\"", toml.logging.format);
    if let Some(dir) = &toml.logging.directory {
        println!("  directory = \"{}\"", dir.display());
    }
    println!();
}

pub fn cmd_config(config: &OrderflowConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &config.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Orderflow Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                print_sections(&OrderflowToml::load(config_path)?);
            } else {
                println!("No orderflow.toml found at {}", config_path.display());
                println!();
                println!("Using default configuration:");
                println!();
                print_sections(&OrderflowToml::default());
                println!("Run 'orderflow config init' to create an orderflow.toml file.");
                println!();
            }

            println!("Effective values (with env/CLI overrides):");
            println!("  database = \"{}\"", config.db_path().display());
            println!("  batch_size = {}", config.toml.protocols.batch_size);
            println!("  log format = \"{}\"", config.toml.logging.format);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No orderflow.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("orderflow.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            OrderflowToml::default().save(config_path)?;

            println!("Created orderflow.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [store] path, busy_timeout_ms");
            println!("  - [protocols] batch_size, evaluator_version");
            println!("  - [checkpoints] default_resume_phase");
            println!("  - [logging] filter, format, directory");
            println!();
        }
    }

    Ok(())
}
