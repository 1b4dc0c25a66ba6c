//! Pinned hardware profile, boot firmware and QEMU argument construction.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};

/// Exit status of QEMU when the guest writes `0x10` to the debug-exit port.
pub const DEBUG_EXIT_SUCCESS: i32 = (0x10 << 1) | 1;
/// Exit status of QEMU when the guest writes `0x11` to the debug-exit port.
pub const DEBUG_EXIT_FAILURE: i32 = (0x11 << 1) | 1;

/// Hardware every session runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QemuProfile {
    pub memory: String,
    pub smp: u32,
}

impl QemuProfile {
    pub fn from_config(config: &Config) -> Self {
        Self {
            memory: config.qemu_memory.clone(),
            smp: config.qemu_smp,
        }
    }

    pub fn machine(&self) -> &'static str {
        "q35"
    }
}

/// Firmware the virtual machine boots the medium with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootFirmware {
    /// SeaBIOS, booting the El Torito BIOS image.
    Bios,
    /// OVMF, booting the El Torito EFI image.
    Uefi { code: PathBuf },
}

impl BootFirmware {
    /// UEFI firmware from `OVMF_CODE`, or the first one found on the host.
    pub fn uefi(config: &Config) -> PipelineResult<Self> {
        let code = match &config.ovmf_code {
            Some(path) if path.is_file() => path.clone(),
            Some(path) => {
                return Err(PipelineError::Environment {
                    tool: "OVMF".to_string(),
                    reason: format!("firmware not found at {}", path.display()),
                })
            }
            None => find_ovmf().ok_or_else(|| PipelineError::Environment {
                tool: "OVMF".to_string(),
                reason: "firmware not found; install edk2-ovmf or set OVMF_CODE".to_string(),
            })?,
        };
        Ok(BootFirmware::Uefi { code })
    }

    pub fn label(&self) -> &'static str {
        match self {
            BootFirmware::Bios => "BIOS (legacy)",
            BootFirmware::Uefi { .. } => "UEFI",
        }
    }
}

/// Common OVMF locations across distros.
pub const OVMF_CANDIDATES: [&str; 6] = [
    // Fedora/RHEL
    "/usr/share/edk2/ovmf/OVMF_CODE.fd",
    "/usr/share/OVMF/OVMF_CODE.fd",
    // Debian/Ubuntu
    "/usr/share/OVMF/OVMF_CODE_4M.fd",
    "/usr/share/qemu/OVMF.fd",
    // Arch
    "/usr/share/edk2-ovmf/x64/OVMF_CODE.fd",
    // NixOS
    "/run/libvirt/nix-ovmf/OVMF_CODE.fd",
];

/// Find OVMF firmware for UEFI boot.
pub fn find_ovmf() -> Option<PathBuf> {
    OVMF_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// Where the guest serial console goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleMode {
    /// Serial on the child's stdout, no monitor. For captured test runs.
    Captured,
    /// Serial multiplexed with the monitor on the terminal (Ctrl+A X quits).
    Interactive,
}

/// A complete QEMU invocation for one boot medium.
#[derive(Debug, Clone)]
pub struct QemuCommand {
    pub binary: String,
    pub profile: QemuProfile,
    pub image: PathBuf,
    pub firmware: BootFirmware,
    pub console: ConsoleMode,
    pub qmp_socket: Option<PathBuf>,
}

impl QemuCommand {
    pub fn new(config: &Config, image: &Path, firmware: BootFirmware) -> Self {
        Self {
            binary: config.qemu.clone(),
            profile: QemuProfile::from_config(config),
            image: image.to_path_buf(),
            firmware,
            console: ConsoleMode::Captured,
            qmp_socket: None,
        }
    }

    pub fn console(mut self, mode: ConsoleMode) -> Self {
        self.console = mode;
        self
    }

    pub fn qmp_socket(mut self, path: &Path) -> Self {
        self.qmp_socket = Some(path.to_path_buf());
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

        push(&["-machine", self.profile.machine()]);
        push(&["-m", &self.profile.memory]);
        push(&["-smp", &self.profile.smp.to_string()]);

        if let BootFirmware::Uefi { code } = &self.firmware {
            push(&[
                "-drive",
                &format!("if=pflash,format=raw,readonly=on,file={}", code.display()),
            ]);
        }

        push(&[
            "-drive",
            &format!("file={},media=cdrom,format=raw,readonly=on", self.image.display()),
            "-boot",
            "d",
        ]);

        match self.console {
            ConsoleMode::Captured => {
                push(&["-serial", "stdio", "-display", "none", "-monitor", "none"])
            }
            ConsoleMode::Interactive => push(&["-serial", "mon:stdio", "-display", "none"]),
        }

        // A reboot becomes a shutdown, and a shutdown pauses instead of exiting.
        push(&["-no-reboot", "-no-shutdown"]);
        push(&["-device", "isa-debug-exit,iobase=0xf4,iosize=0x04"]);

        if let Some(socket) = &self.qmp_socket {
            push(&["-qmp", &format!("unix:{},server=on,wait=off", socket.display())]);
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> Config {
        Config::from_vars(Path::new("/base"), &HashMap::new())
    }

    fn pair(args: &[String], flag: &str) -> Vec<String> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].clone())
            .collect()
    }

    #[test]
    fn test_debug_exit_codes() {
        assert_eq!(DEBUG_EXIT_SUCCESS, 33);
        assert_eq!(DEBUG_EXIT_FAILURE, 35);
    }

    #[test]
    fn test_pinned_profile() {
        let iso = Path::new("/out/silicium.iso");
        let args = QemuCommand::new(&config(), iso, BootFirmware::Bios).args();
        assert_eq!(pair(&args, "-m"), vec!["512M"]);
        assert_eq!(pair(&args, "-smp"), vec!["4"]);
        assert_eq!(pair(&args, "-machine"), vec!["q35"]);
    }

    #[test]
    fn test_medium_is_read_only_cdrom() {
        let iso = Path::new("/out/silicium.iso");
        let args = QemuCommand::new(&config(), iso, BootFirmware::Bios).args();
        assert_eq!(
            pair(&args, "-drive"),
            vec!["file=/out/silicium.iso,media=cdrom,format=raw,readonly=on"]
        );
        assert_eq!(pair(&args, "-boot"), vec!["d"]);
    }

    #[test]
    fn test_captured_console_and_halt_policy() {
        let args = QemuCommand::new(&config(), Path::new("/i.iso"), BootFirmware::Bios).args();
        assert_eq!(pair(&args, "-serial"), vec!["stdio"]);
        assert_eq!(pair(&args, "-monitor"), vec!["none"]);
        assert!(args.contains(&"-no-reboot".to_string()));
        assert!(args.contains(&"-no-shutdown".to_string()));
    }

    #[test]
    fn test_uefi_adds_pflash() {
        let firmware = BootFirmware::Uefi {
            code: PathBuf::from("/fw/OVMF_CODE.fd"),
        };
        let args = QemuCommand::new(&config(), Path::new("/i.iso"), firmware).args();
        let drives = pair(&args, "-drive");
        assert_eq!(drives.len(), 2);
        assert_eq!(drives[0], "if=pflash,format=raw,readonly=on,file=/fw/OVMF_CODE.fd");
    }

    #[test]
    fn test_qmp_socket() {
        let args = QemuCommand::new(&config(), Path::new("/i.iso"), BootFirmware::Bios)
            .qmp_socket(Path::new("/run/q.sock"))
            .args();
        assert_eq!(pair(&args, "-qmp"), vec!["unix:/run/q.sock,server=on,wait=off"]);
    }

    #[test]
    fn test_interactive_console() {
        let args = QemuCommand::new(&config(), Path::new("/i.iso"), BootFirmware::Bios)
            .console(ConsoleMode::Interactive)
            .args();
        assert_eq!(pair(&args, "-serial"), vec!["mon:stdio"]);
        assert!(pair(&args, "-monitor").is_empty());
    }

    #[test]
    fn test_missing_explicit_ovmf_is_environment_error() {
        let mut config = config();
        config.ovmf_code = Some(PathBuf::from("/nonexistent/OVMF_CODE.fd"));
        assert!(matches!(
            BootFirmware::uefi(&config),
            Err(PipelineError::Environment { .. })
        ));
    }
}
