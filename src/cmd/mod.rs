//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module       | Commands handled                          |
//! |--------------|-------------------------------------------|
//! | `project`    | `Init`                                    |
//! | `order`      | `Order`, `SweepLocks`                     |
//! | `protocol`   | `Protocol`, `Alerts`                      |
//! | `checkpoint` | `Checkpoint`, `ResumePhase`               |
//! | `config`     | `Config`                                  |

pub mod checkpoint;
pub mod config;
pub mod order;
pub mod project;
pub mod protocol;

pub use checkpoint::{cmd_checkpoint, cmd_resume_phase};
pub use config::cmd_config;
pub use order::{cmd_order, cmd_sweep_locks};
pub use project::cmd_init;
pub use protocol::{cmd_alerts, cmd_protocol};

use anyhow::{Context, Result};
use orderflow::config::OrderflowConfig;
use orderflow::store::{DbHandle, PipelineDb};

/// Open the configured database, creating its directory if needed.
pub fn open_store(config: &OrderflowConfig) -> Result<DbHandle> {
    let path = config.db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = PipelineDb::open(&path, config.busy_timeout())
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(DbHandle::new(db))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode output")?
    );
    Ok(())
}
