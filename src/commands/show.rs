//! Show command - displays information.

use anyhow::Result;

use bootpatch::config::Config;
use bootpatch::state::StateStore;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the package `patch` uses when `--apk` is omitted
    Active,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
        }
        ShowTarget::Active => {
            let store = StateStore::new(&config.state_dir);
            match store.load()? {
                Some(active) => {
                    println!("Active package: {}", active.path.display());
                    if let Some(tag) = &active.tag {
                        println!("  Release:  {}", tag);
                    }
                    println!("  Selected: {}", active.selected_at);
                    if !active.path.is_file() {
                        println!("  WARNING: file no longer exists");
                    }
                }
                None => println!("No active package. Run 'bootpatch download' or pass --apk."),
            }
        }
    }
    Ok(())
}
