//! Siliso - Silicium boot image builder and test runner.
//!
//! Packs the compiled kernel and the Limine bootloader into a hybrid
//! BIOS/UEFI ISO, and boots it in QEMU to turn the serial console into a
//! pass/fail signal.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use siliso::artifact::BuildProfile;
use siliso::commands::{self, show::ShowTarget, test::TestKind};
use siliso::config::Config;
use siliso::orchestrator::EmulatedOptions;

/// Exit code for errors that stop the pipeline before a classification.
const FATAL_EXIT: u8 = 3;

#[derive(Parser)]
#[command(name = "siliso")]
#[command(about = "Silicium boot image builder and test runner")]
#[command(
    after_help = "QUICK START:\n  siliso preflight       Check host tools and bootloader files\n  siliso build           Assemble output/silicium.iso\n  siliso run             Boot it in QEMU\n  siliso test emulated   Boot headless and report PASS/FAIL"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select a kernel build and assemble the bootable image
    Build {
        /// Only use this build profile (debug or release)
        #[arg(long)]
        profile: Option<BuildProfile>,
    },

    /// Build, then boot the image in QEMU on this terminal
    Run {
        /// Boot with UEFI firmware instead of BIOS
        #[arg(long)]
        uefi: bool,
        /// Only use this build profile (debug or release)
        #[arg(long)]
        profile: Option<BuildProfile>,
    },

    /// Run tests
    Test {
        #[command(subcommand)]
        mode: TestCommand,
    },

    /// Check host tools and bootloader files
    Preflight {
        /// Exit non-zero if any check fails
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },

    /// Remove the output directory
    Clean,
}

#[derive(Subcommand)]
enum TestCommand {
    /// Run the kernel's host-testable unit tests
    Native,
    /// Boot the image headless and scan the serial console
    Emulated {
        /// Timeout in seconds (default: TEST_TIMEOUT)
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
        /// Boot with UEFI firmware instead of BIOS
        #[arg(long)]
        uefi: bool,
        /// Only use this build profile (debug or release)
        #[arg(long)]
        profile: Option<BuildProfile>,
        /// Don't echo the console while testing
        #[arg(short, long)]
        quiet: bool,
    },
}

#[derive(Subcommand)]
enum ShowCommand {
    /// Show resolved configuration
    Config,
    /// Show kernel candidates and which one would be used
    Artifact,
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("siliso=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(FATAL_EXIT)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let base_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let config = Config::load(&base_dir);

    match cli.command {
        Commands::Build { profile } => {
            commands::cmd_build(&config, profile)?;
        }

        Commands::Run { uefi, profile } => {
            commands::cmd_run(&config, uefi, profile)?;
        }

        Commands::Test { mode } => {
            let kind = match mode {
                TestCommand::Native => TestKind::Native,
                TestCommand::Emulated {
                    timeout,
                    uefi,
                    profile,
                    quiet,
                } => {
                    let mut options = EmulatedOptions::from_config(&config);
                    if let Some(secs) = timeout {
                        options.timeout = std::time::Duration::from_secs(secs);
                    }
                    options.uefi = uefi;
                    options.profile = profile;
                    options.echo = !quiet;
                    options.cancel_on_ctrl_c = true;
                    TestKind::Emulated(options)
                }
            };
            let classification = commands::cmd_test(&config, kind)?;
            return Ok(classification.exit_code());
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Show { what } => {
            let target = match what {
                ShowCommand::Config => ShowTarget::Config,
                ShowCommand::Artifact => ShowTarget::Artifact,
            };
            commands::cmd_show(&config, target)?;
        }

        Commands::Clean => {
            commands::cmd_clean(&config)?;
        }
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulated_timeout(args: &[&str]) -> Option<u64> {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Test {
                mode: TestCommand::Emulated { timeout, .. },
            } => timeout,
            _ => panic!("expected `test emulated`"),
        }
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        assert!(Cli::try_parse_from(["siliso", "test", "emulated", "--timeout", "0"]).is_err());
        assert!(Cli::try_parse_from(["siliso", "test", "emulated", "-t", "0"]).is_err());
    }

    #[test]
    fn test_timeout_flag_is_optional() {
        assert_eq!(emulated_timeout(&["siliso", "test", "emulated", "--timeout", "5"]), Some(5));
        assert_eq!(emulated_timeout(&["siliso", "test", "emulated"]), None);
    }
}
