//! Project setup: `orderflow init`.

use anyhow::Result;
use orderflow::config::{OrderflowConfig, OrderflowToml};

pub fn cmd_init(config: &OrderflowConfig) -> Result<()> {
    println!();
    if config.config_path.exists() {
        println!(
            "Config already exists at {}",
            console::style(config.config_path.display()).dim()
        );
    } else {
        OrderflowToml::default().save(&config.config_path)?;
        println!(
            "{} Created {}",
            console::style("✓").green(),
            config.config_path.display()
        );
    }

    // Opening the store runs migrations.
    super::open_store(config)?;
    println!(
        "{} Database ready at {}",
        console::style("✓").green(),
        config.db_path().display()
    );
    println!();
    println!("Next: orderflow order create --tier B");
    println!();
    Ok(())
}
