//! Show command - displays information.

use std::time::SystemTime;

use anyhow::Result;

use crate::artifact::{self, MostRecentWins, SelectionStrategy};
use crate::config::Config;
use crate::digest;

/// Show target for the show command.
pub enum ShowTarget {
    /// Resolved configuration
    Config,
    /// Kernel candidates, the selection and image freshness
    Artifact,
}

/// Execute the show command.
pub fn cmd_show(config: &Config, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Artifact => show_artifact(config),
    }
    Ok(())
}

fn show_artifact(config: &Config) {
    let probed = artifact::probe_all(&artifact::candidate_paths(config));

    println!("Kernel candidates:");
    for candidate in &probed {
        let state = match (candidate.exists, candidate.modified) {
            (false, _) => "missing".to_string(),
            (true, Some(t)) => format!("modified {}", age(t)),
            (true, None) => "no mtime".to_string(),
        };
        println!("  {:<8} {} ({})", candidate.profile, candidate.path.display(), state);
    }

    let strategy = MostRecentWins;
    let Some(selected) = strategy.choose(&probed) else {
        println!("\nNo kernel build found. Build the kernel with cargo first.");
        return;
    };
    println!("\nSelected ({}): {}", strategy.name(), selected.path.display());

    let iso = config.iso_path();
    if !iso.exists() {
        println!("Image: not built ({})", iso.display());
    } else if digest::is_newer(&selected.path, &iso) {
        println!("Image: STALE, the kernel is newer than {}", iso.display());
    } else {
        println!("Image: up to date ({})", iso.display());
    }
}

fn age(time: SystemTime) -> String {
    match SystemTime::now().duration_since(time) {
        Ok(d) if d.as_secs() < 60 => format!("{}s ago", d.as_secs()),
        Ok(d) if d.as_secs() < 3600 => format!("{}m ago", d.as_secs() / 60),
        Ok(d) => format!("{}h ago", d.as_secs() / 3600),
        Err(_) => "in the future".to_string(),
    }
}
