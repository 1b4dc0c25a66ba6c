//! Pipeline error taxonomy.
//!
//! Every variant is terminal for the invocation that produced it. Test-run
//! outcomes such as a timeout or an uninterpretable console are not errors;
//! see [`crate::orchestrator::Classification`].

use std::fmt;
use std::path::PathBuf;

use crate::process::CommandError;

/// A step of image assembly, reported when that step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStep {
    /// Copying bootloader files into the staging tree.
    StageBootloader,
    /// Copying the kernel executable into the staging tree.
    StageKernel,
    /// Mastering the hybrid ISO with xorriso.
    Master,
    /// Installing the legacy boot record with `limine bios-install`.
    DeployBootRecord,
    /// Moving the finished image to its canonical path.
    Promote,
}

impl fmt::Display for AssemblyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssemblyStep::StageBootloader => "stage bootloader",
            AssemblyStep::StageKernel => "stage kernel",
            AssemblyStep::Master => "master ISO",
            AssemblyStep::DeployBootRecord => "deploy boot record",
            AssemblyStep::Promote => "promote image",
        };
        f.write_str(name)
    }
}

/// Fatal failures of the build/boot pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no kernel build found (searched: {})", display_paths(.searched))]
    MissingArtifact { searched: Vec<PathBuf> },

    #[error("assembly failed at '{step}' ({}): {reason}", .path.display())]
    Assembly {
        step: AssemblyStep,
        path: PathBuf,
        reason: String,
    },

    #[error("environment error: '{tool}' {reason}")]
    Environment { tool: String, reason: String },

    #[error("emulated session failed: {reason}")]
    Session { reason: String },

    #[error("cancelled")]
    Cancelled,
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn assembly(
        step: AssemblyStep,
        path: impl Into<PathBuf>,
        reason: impl fmt::Display,
    ) -> Self {
        PipelineError::Assembly {
            step,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Map a command failure raised during an assembly step.
    ///
    /// A missing program is an environment problem, not an assembly problem.
    pub fn from_command(step: AssemblyStep, path: impl Into<PathBuf>, err: CommandError) -> Self {
        match err {
            CommandError::NotFound { program } => PipelineError::Environment {
                tool: program,
                reason: "not found in PATH".to_string(),
            },
            other => PipelineError::assembly(step, path, other),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
