//! Kernel artifact selection.
//!
//! The kernel can be built with several cargo profiles. Selection probes
//! every profile's expected output and hands exactly one artifact to the
//! assembler, or fails before anything is built.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};

/// Cargo build profile of a kernel executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    /// Every profile, highest priority first. Priority breaks mtime ties.
    pub const PRIORITY: [BuildProfile; 2] = [BuildProfile::Release, BuildProfile::Debug];

    /// Directory cargo writes this profile's output into.
    pub fn dir_name(self) -> &'static str {
        match self {
            BuildProfile::Debug => "debug",
            BuildProfile::Release => "release",
        }
    }

    fn rank(self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|p| *p == self)
            .unwrap_or(Self::PRIORITY.len())
    }
}

impl fmt::Display for BuildProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl std::str::FromStr for BuildProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" | "dev" => Ok(BuildProfile::Debug),
            "release" => Ok(BuildProfile::Release),
            other => Err(format!("unknown build profile '{}' (expected debug or release)", other)),
        }
    }
}

/// A probed kernel executable candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub profile: BuildProfile,
    pub path: PathBuf,
    pub exists: bool,
    /// Modification time, if the file exists and the filesystem reports one.
    pub modified: Option<SystemTime>,
}

impl BuildArtifact {
    /// Probe a candidate path. Read-only.
    pub fn probe(profile: BuildProfile, path: &Path) -> Self {
        let meta = path.metadata().ok().filter(|m| m.is_file());
        Self {
            profile,
            path: path.to_path_buf(),
            exists: meta.is_some(),
            modified: meta.and_then(|m| m.modified().ok()),
        }
    }
}

/// Policy choosing one artifact among the probed candidates.
pub trait SelectionStrategy {
    fn name(&self) -> &'static str;

    /// Pick one of `candidates`, considering only those that exist.
    fn choose<'a>(&self, candidates: &'a [BuildArtifact]) -> Option<&'a BuildArtifact>;
}

/// Use whatever was built most recently, regardless of profile.
///
/// Equal timestamps go to the higher-priority profile (release first).
/// An artifact without a readable mtime sorts as the oldest.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostRecentWins;

impl SelectionStrategy for MostRecentWins {
    fn name(&self) -> &'static str {
        "most-recent-wins"
    }

    fn choose<'a>(&self, candidates: &'a [BuildArtifact]) -> Option<&'a BuildArtifact> {
        candidates.iter().filter(|a| a.exists).min_by(|a, b| {
            // Newest first, then priority order.
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.profile.rank().cmp(&b.profile.rank()))
        })
    }
}

/// Only accept one specific profile.
#[derive(Debug, Clone, Copy)]
pub struct FixedProfile(pub BuildProfile);

impl SelectionStrategy for FixedProfile {
    fn name(&self) -> &'static str {
        "fixed-profile"
    }

    fn choose<'a>(&self, candidates: &'a [BuildArtifact]) -> Option<&'a BuildArtifact> {
        candidates.iter().find(|a| a.exists && a.profile == self.0)
    }
}

/// Expected kernel output path for every profile, in priority order.
pub fn candidate_paths(config: &Config) -> Vec<(BuildProfile, PathBuf)> {
    BuildProfile::PRIORITY
        .iter()
        .map(|&profile| {
            let path = config
                .target_dir
                .join(&config.kernel_target)
                .join(profile.dir_name())
                .join(&config.kernel_name);
            (profile, path)
        })
        .collect()
}

/// Probe every candidate.
pub fn probe_all(candidates: &[(BuildProfile, PathBuf)]) -> Vec<BuildArtifact> {
    candidates
        .iter()
        .map(|(profile, path)| BuildArtifact::probe(*profile, path))
        .collect()
}

/// Select exactly one artifact, or fail with `MissingArtifact`.
pub fn select(
    candidates: &[(BuildProfile, PathBuf)],
    strategy: &dyn SelectionStrategy,
) -> PipelineResult<BuildArtifact> {
    let probed = probe_all(candidates);
    for artifact in &probed {
        debug!(
            profile = %artifact.profile,
            path = %artifact.path.display(),
            exists = artifact.exists,
            "probed kernel candidate"
        );
    }

    let chosen = strategy
        .choose(&probed)
        .cloned()
        .ok_or_else(|| PipelineError::MissingArtifact {
            searched: probed.iter().map(|a| a.path.clone()).collect(),
        })?;

    info!(
        "Selected {} kernel ({}): {}",
        chosen.profile,
        strategy.name(),
        chosen.path.display()
    );
    Ok(chosen)
}
