//! Emulated execution: boot an image in QEMU and capture its serial console.

pub mod console;
pub mod profile;
pub mod qmp;
pub mod session;

pub use console::{strip_ansi, ConsoleObserver, Flow, Transcript};
pub use profile::{
    find_ovmf, BootFirmware, ConsoleMode, QemuCommand, QemuProfile, DEBUG_EXIT_FAILURE,
    DEBUG_EXIT_SUCCESS,
};
pub use qmp::RunState;
pub use session::{
    run_interactive, CancelToken, EmulatedSession, SessionEnd, SessionOptions, SessionOutcome,
};
