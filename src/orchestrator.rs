//! Test orchestration.
//!
//! Two entry points, each reduced to one [`TestRunResult`]:
//!
//! - [`Orchestrator::run_native`] runs the kernel's host-testable crate
//!   under `cargo test` for the host triple.
//! - [`Orchestrator::run_emulated`] selects a kernel, assembles the image,
//!   boots it and scans the serial console for verdict markers.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::artifact::{self, BuildProfile, FixedProfile, MostRecentWins, SelectionStrategy};
use crate::config::{Config, TARGET_ARCH};
use crate::error::{PipelineError, PipelineResult};
use crate::iso::{BootableImage, ImageAssembler};
use crate::process::{Cmd, CommandError};
use crate::qemu::{
    strip_ansi, BootFirmware, CancelToken, ConsoleObserver, EmulatedSession, Flow, SessionEnd,
    SessionOptions, SessionOutcome, Transcript, DEBUG_EXIT_FAILURE, DEBUG_EXIT_SUCCESS,
};

/// Lines of output included in a failure report.
const REPORT_TAIL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    Native,
    Emulated,
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestMode::Native => "native",
            TestMode::Emulated => "emulated",
        })
    }
}

/// Outcome of a completed test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Pass,
    Fail,
    /// The run exceeded its allowance without a verdict.
    Timeout,
    /// The run ended but its output could not be interpreted.
    InfrastructureError,
}

impl Classification {
    /// Process exit code reported by `siliso test`.
    pub fn exit_code(self) -> u8 {
        match self {
            Classification::Pass => 0,
            Classification::Fail | Classification::Timeout => 1,
            Classification::InfrastructureError => 2,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::Pass => "PASS",
            Classification::Fail => "FAIL",
            Classification::Timeout => "TIMEOUT",
            Classification::InfrastructureError => "INFRASTRUCTURE ERROR",
        })
    }
}

#[derive(Debug, Clone)]
pub struct TestRunResult {
    pub mode: TestMode,
    pub classification: Classification,
    pub reason: String,
    pub output: Transcript,
    pub duration: Duration,
}

impl TestRunResult {
    pub fn passed(&self) -> bool {
        self.classification == Classification::Pass
    }

    pub fn print_summary(&self) {
        println!();
        println!("=== {} test: {} ===", self.mode, self.classification);
        println!("  {}", self.reason);
        println!("  duration: {:.1}s", self.duration.as_secs_f64());

        if !self.passed() && !self.output.is_empty() {
            println!();
            println!("Last {} lines of output:", REPORT_TAIL.min(self.output.len()));
            for line in self.output.tail(REPORT_TAIL) {
                println!("  {}", strip_ansi(line));
            }
        }
    }
}

/// A verdict found on a console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass { marker: String, line: String },
    Fail { marker: String, line: String },
}

/// Scans console lines for pass/fail markers and stops at the first verdict.
///
/// Fail markers are checked first, so a line carrying both is a failure.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    pass: Vec<String>,
    fail: Vec<String>,
    verdict: Option<Verdict>,
}

impl MarkerScanner {
    pub fn new(pass: Vec<String>, fail: Vec<String>) -> Self {
        Self {
            pass,
            fail,
            verdict: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pass_markers.clone(), config.fail_markers.clone())
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    fn scan(&self, line: &str) -> Option<Verdict> {
        let plain = strip_ansi(line);
        if let Some(marker) = self.fail.iter().find(|m| plain.contains(m.as_str())) {
            return Some(Verdict::Fail {
                marker: marker.clone(),
                line: plain.into_owned(),
            });
        }
        self.pass
            .iter()
            .find(|m| plain.contains(m.as_str()))
            .map(|marker| Verdict::Pass {
                marker: marker.clone(),
                line: plain.into_owned(),
            })
    }
}

impl ConsoleObserver for MarkerScanner {
    fn on_line(&mut self, line: &str) -> Flow {
        if self.verdict.is_some() {
            return Flow::Stop;
        }
        match self.scan(line) {
            Some(verdict) => {
                self.verdict = Some(verdict);
                Flow::Stop
            }
            None => Flow::Continue,
        }
    }
}

/// Reduce a finished session to a classification and a reason.
///
/// A cancelled session has no classification.
pub fn classify(
    outcome: &SessionOutcome,
    verdict: Option<&Verdict>,
) -> PipelineResult<(Classification, String)> {
    if outcome.end == SessionEnd::Cancelled {
        return Err(PipelineError::Cancelled);
    }

    match verdict {
        Some(Verdict::Pass { marker, .. }) => {
            return Ok((Classification::Pass, format!("pass marker seen: '{}'", marker)))
        }
        Some(Verdict::Fail { line, .. }) => {
            return Ok((Classification::Fail, format!("fail marker seen: {}", line.trim())))
        }
        None => {}
    }

    let result = match outcome.end {
        SessionEnd::Exited(Some(DEBUG_EXIT_SUCCESS)) => (
            Classification::Pass,
            "guest reported success through isa-debug-exit".to_string(),
        ),
        SessionEnd::Exited(Some(DEBUG_EXIT_FAILURE)) => (
            Classification::Fail,
            "guest reported failure through isa-debug-exit".to_string(),
        ),
        SessionEnd::TimedOut => (
            Classification::Timeout,
            format!(
                "no verdict after {:.1}s ({} console lines)",
                outcome.elapsed.as_secs_f64(),
                outcome.transcript.len()
            ),
        ),
        SessionEnd::Halted(state) => (
            Classification::InfrastructureError,
            format!("guest halted ({:?}) without a verdict", state),
        ),
        SessionEnd::Exited(code) => {
            let code = code.map_or_else(|| "a signal".to_string(), |c| format!("code {}", c));
            let mut reason = format!("emulator exited with {} without a verdict", code);
            if let Some(last) = outcome.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                reason.push_str(&format!(" ({})", last.trim()));
            }
            (Classification::InfrastructureError, reason)
        }
        // The observer stops only after recording a verdict.
        SessionEnd::Stopped => (
            Classification::InfrastructureError,
            "console observer stopped without a verdict".to_string(),
        ),
        SessionEnd::Cancelled => return Err(PipelineError::Cancelled),
    };
    Ok(result)
}

/// Options for one emulated run.
#[derive(Debug, Clone)]
pub struct EmulatedOptions {
    pub timeout: Duration,
    pub uefi: bool,
    /// Only accept this build profile, instead of the newest build.
    pub profile: Option<BuildProfile>,
    /// Mirror the console to stdout while it is scanned.
    pub echo: bool,
    pub cancel_on_ctrl_c: bool,
}

impl EmulatedOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.test_timeout,
            uefi: false,
            profile: None,
            echo: false,
            cancel_on_ctrl_c: false,
        }
    }
}

pub struct Orchestrator<'a> {
    config: &'a Config,
    cancel: CancelToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Select a kernel and assemble the bootable image.
    pub fn build_image(&self, profile: Option<BuildProfile>) -> PipelineResult<BootableImage> {
        let strategy: Box<dyn SelectionStrategy> = match profile {
            Some(profile) => Box::new(FixedProfile(profile)),
            None => Box::new(MostRecentWins),
        };
        let kernel = artifact::select(&artifact::candidate_paths(self.config), strategy.as_ref())?;
        ImageAssembler::new(self.config).assemble(&kernel)
    }

    /// Run the native unit tests for the host triple.
    pub fn run_native(&self) -> PipelineResult<TestRunResult> {
        let started = Instant::now();

        let host_arch = std::env::consts::ARCH;
        if host_arch != TARGET_ARCH {
            return Err(PipelineError::Environment {
                tool: "host".to_string(),
                reason: format!(
                    "native tests need an {} host, this one is {}; use emulated tests",
                    TARGET_ARCH, host_arch
                ),
            });
        }

        let rustc = Cmd::new("rustc")
            .arg("-vV")
            .error_msg("rustc -vV failed")
            .run()
            .map_err(environment("rustc"))?;
        let triple = parse_host_triple(&rustc.stdout).ok_or_else(|| PipelineError::Environment {
            tool: "rustc".to_string(),
            reason: "did not report a host triple".to_string(),
        })?;

        let package = &self.config.native_test_package;
        info!("Running native tests: cargo test -p {} --target {}", package, triple);

        let result = Cmd::new("cargo")
            .args(["test", "-p", package.as_str(), "--target", triple])
            .dir(&self.config.kernel_dir)
            .allow_fail()
            .run()
            .map_err(environment("cargo"))?;

        let output = Transcript::new(
            result
                .stdout
                .lines()
                .chain(result.stderr.lines())
                .map(String::from)
                .collect(),
        );
        let (classification, reason) = if result.success() {
            (Classification::Pass, format!("cargo test -p {} passed", package))
        } else {
            (
                Classification::Fail,
                format!("cargo test -p {} exited with code {}", package, result.code()),
            )
        };

        Ok(TestRunResult {
            mode: TestMode::Native,
            classification,
            reason,
            output,
            duration: started.elapsed(),
        })
    }

    /// Select, assemble, boot and classify.
    pub fn run_emulated(&self, options: &EmulatedOptions) -> PipelineResult<TestRunResult> {
        let started = Instant::now();

        let image = self.build_image(options.profile)?;
        let firmware = if options.uefi {
            BootFirmware::uefi(self.config)?
        } else {
            BootFirmware::Bios
        };

        let session = EmulatedSession::new(self.config, &image.path, firmware);
        let session_options = SessionOptions {
            timeout: options.timeout,
            echo: options.echo,
            cancel_on_ctrl_c: options.cancel_on_ctrl_c,
            ..SessionOptions::default()
        };

        let mut scanner = MarkerScanner::from_config(self.config);
        let outcome = session.run(&session_options, &self.cancel, &mut scanner)?;
        let (classification, reason) = classify(&outcome, scanner.verdict())?;

        if classification == Classification::InfrastructureError {
            warn!("{}", reason);
        }

        Ok(TestRunResult {
            mode: TestMode::Emulated,
            classification,
            reason,
            output: outcome.transcript,
            duration: started.elapsed(),
        })
    }
}

fn environment(tool: &'static str) -> impl Fn(CommandError) -> PipelineError {
    move |err| PipelineError::Environment {
        tool: tool.to_string(),
        reason: match err {
            CommandError::NotFound { .. } => "not found in PATH".to_string(),
            other => other.to_string(),
        },
    }
}

/// The `host:` line of `rustc -vV`.
pub fn parse_host_triple(version_output: &str) -> Option<&str> {
    version_output
        .lines()
        .find_map(|l| l.strip_prefix("host:"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qemu::RunState;

    fn scanner() -> MarkerScanner {
        MarkerScanner::new(
            vec!["Silicium booted successfully!".to_string()],
            vec!["panicked at".to_string(), "System halted".to_string()],
        )
    }

    fn outcome(end: SessionEnd) -> SessionOutcome {
        SessionOutcome {
            end,
            transcript: Transcript::new(vec!["Booting Silicium...".to_string()]),
            stderr: String::new(),
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_pass_marker_through_ansi() {
        let mut s = scanner();
        assert_eq!(s.on_line("\x1b[1m\x1b[32m[*]\x1b[0m Booting Silicium..."), Flow::Continue);
        assert_eq!(
            s.on_line("\x1b[1m\x1b[32m[*]\x1b[0m Silicium booted successfully!"),
            Flow::Stop
        );
        assert!(matches!(s.verdict(), Some(Verdict::Pass { .. })));
    }

    #[test]
    fn test_fail_marker_wins_on_same_line() {
        let mut s = scanner();
        s.on_line("Silicium booted successfully! then CPU 0 panicked at src/main.rs:10");
        assert!(matches!(s.verdict(), Some(Verdict::Fail { .. })));
    }

    #[test]
    fn test_first_verdict_is_kept() {
        let mut s = scanner();
        s.on_line("CPU 1 panicked at 'oops'");
        assert_eq!(s.on_line("Silicium booted successfully!"), Flow::Stop);
        assert!(matches!(s.verdict(), Some(Verdict::Fail { .. })));
    }

    #[test]
    fn test_classify_marker_beats_exit_code() {
        let verdict = Verdict::Pass {
            marker: "ok".to_string(),
            line: "ok".to_string(),
        };
        let failed = outcome(SessionEnd::Exited(Some(DEBUG_EXIT_FAILURE)));
        let (c, _) = classify(&failed, Some(&verdict)).unwrap();
        assert_eq!(c, Classification::Pass);
    }

    #[test]
    fn test_classify_debug_exit() {
        let (c, _) = classify(&outcome(SessionEnd::Exited(Some(33))), None).unwrap();
        assert_eq!(c, Classification::Pass);
        let (c, _) = classify(&outcome(SessionEnd::Exited(Some(35))), None).unwrap();
        assert_eq!(c, Classification::Fail);
    }

    #[test]
    fn test_classify_without_verdict() {
        let (c, _) = classify(&outcome(SessionEnd::TimedOut), None).unwrap();
        assert_eq!(c, Classification::Timeout);
        let (c, _) = classify(&outcome(SessionEnd::Halted(RunState::Shutdown)), None).unwrap();
        assert_eq!(c, Classification::InfrastructureError);
        let (c, _) = classify(&outcome(SessionEnd::Exited(Some(0))), None).unwrap();
        assert_eq!(c, Classification::InfrastructureError);
        let (c, _) = classify(&outcome(SessionEnd::Exited(None)), None).unwrap();
        assert_eq!(c, Classification::InfrastructureError);
    }

    #[test]
    fn test_classify_cancelled_is_error() {
        assert!(matches!(
            classify(&outcome(SessionEnd::Cancelled), None),
            Err(PipelineError::Cancelled)
        ));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Classification::Pass.exit_code(), 0);
        assert_eq!(Classification::Fail.exit_code(), 1);
        assert_eq!(Classification::Timeout.exit_code(), 1);
        assert_eq!(Classification::InfrastructureError.exit_code(), 2);
    }

    #[test]
    fn test_parse_host_triple() {
        let out = "rustc 1.80.0 (051478957 2024-07-21)\n\
                   binary: rustc\n\
                   host: x86_64-unknown-linux-gnu\n\
                   release: 1.80.0\n";
        assert_eq!(parse_host_triple(out), Some("x86_64-unknown-linux-gnu"));
        assert_eq!(parse_host_triple("rustc 1.80.0\n"), None);
    }
}
