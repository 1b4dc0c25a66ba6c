//! Shared test utilities for siliso integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use siliso::artifact::BuildProfile;
use siliso::config::Config;
use tempfile::TempDir;

/// Bootloader files the default manifest stages.
pub const BOOTLOADER_FILES: [&str; 5] = [
    "limine-bios.sys",
    "limine-bios-cd.bin",
    "limine-uefi-cd.bin",
    "BOOTX64.EFI",
    "limine.cfg",
];

/// Masters a "medium" holding the sorted list of staged files, like
/// `xorriso -as mkisofs ... <root> -o <out>`.
pub const FAKE_XORRISO: &str = r#"#!/bin/sh
root=""
out=""
prev=""
for a in "$@"; do
    if [ "$prev" = "-o" ]; then out="$a"; fi
    if [ "$a" = "-o" ]; then root="$prev"; fi
    prev="$a"
done
[ -n "$out" ] && [ -d "$root" ] || { echo "bad arguments" >&2; exit 2; }
printf 'FAKEISO\n' > "$out"
(cd "$root" && find . -type f | sort) >> "$out"
"#;

/// Appends a marker, like `limine bios-install <image>`.
pub const FAKE_LIMINE: &str = r#"#!/bin/sh
[ "$1" = "bios-install" ] || { echo "usage: limine bios-install <image>" >&2; exit 2; }
printf 'MBR\n' >> "$2"
"#;

pub const FAILING_LIMINE: &str = r#"#!/bin/sh
echo "limine: failed to install boot record" >&2
exit 1
"#;

/// Test environment: a fake kernel target tree, bootloader dir and host tools.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub base_dir: PathBuf,
    pub bootloader_dir: PathBuf,
    pub target_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Fake host tools live here
    pub bin_dir: PathBuf,
    pub vars: HashMap<String, String>,
}

impl TestEnv {
    /// Bootloader files present, working fake xorriso and limine, no kernel yet.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        let bootloader_dir = base_dir.join("limine");
        let target_dir = base_dir.join("target");
        let output_dir = base_dir.join("output");
        let bin_dir = base_dir.join("bin");

        fs::create_dir_all(&bootloader_dir).expect("Failed to create bootloader dir");
        fs::create_dir_all(&bin_dir).expect("Failed to create bin dir");
        for file in BOOTLOADER_FILES {
            fs::write(bootloader_dir.join(file), format!("blob:{}\n", file))
                .expect("Failed to write bootloader file");
        }

        let mut vars = HashMap::new();
        vars.insert("CARGO_TARGET_DIR".to_string(), path_str(&target_dir));
        vars.insert("LIMINE_DIR".to_string(), path_str(&bootloader_dir));
        vars.insert("OUTPUT_DIR".to_string(), path_str(&output_dir));
        vars.insert("XORRISO".to_string(), path_str(&bin_dir.join("xorriso")));
        vars.insert("LIMINE_TOOL".to_string(), path_str(&bin_dir.join("limine")));
        vars.insert("QEMU".to_string(), path_str(&bin_dir.join("qemu")));
        vars.insert("TEST_TIMEOUT".to_string(), "10".to_string());

        let env = Self {
            _temp_dir: temp_dir,
            base_dir,
            bootloader_dir,
            target_dir,
            output_dir,
            bin_dir,
            vars,
        };
        env.write_script("xorriso", FAKE_XORRISO);
        env.write_script("limine", FAKE_LIMINE);
        env
    }

    /// Environment with a release kernel already built.
    pub fn with_kernel() -> Self {
        let env = Self::new();
        env.kernel(BuildProfile::Release, SystemTime::now());
        env
    }

    pub fn config(&self) -> Config {
        Config::from_vars(&self.base_dir, &self.vars)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    /// Write a kernel build for `profile` with the given mtime.
    pub fn kernel(&self, profile: BuildProfile, modified: SystemTime) -> PathBuf {
        let path = self
            .target_dir
            .join("x86_64-unknown-none")
            .join(profile.dir_name())
            .join("silicium");
        fs::create_dir_all(path.parent().expect("kernel path has a parent"))
            .expect("Failed to create profile dir");
        fs::write(&path, format!("ELF kernel ({})\n", profile)).expect("Failed to write kernel");
        set_mtime(&path, modified);
        path
    }

    /// Install an executable shell script under `bin/`.
    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin_dir.join(name);
        create_executable(&path, body);
        path
    }

    /// Install a fake QEMU. Its arguments are recorded in `qemu.args`.
    pub fn fake_qemu(&self, body: &str) -> PathBuf {
        let args_file = self.base_dir.join("qemu.args");
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\n{}",
            args_file.display(),
            body
        );
        self.write_script("qemu", &script)
    }

    /// Arguments the fake QEMU was last started with.
    pub fn qemu_args(&self) -> Vec<String> {
        fs::read_to_string(self.base_dir.join("qemu.args"))
            .expect("fake qemu did not record its arguments")
            .lines()
            .map(String::from)
            .collect()
    }

    /// Entries of the output dir, excluding the image and its checksum.
    pub fn leftovers(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.output_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n != "silicium.iso" && n != "silicium.iso.sha256")
            .collect()
    }
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn set_mtime(path: &Path, modified: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .expect("Failed to open for mtime")
        .set_modified(modified)
        .expect("Failed to set mtime");
}

/// A fixed instant, so mtime comparisons don't depend on the clock.
pub fn epoch_plus(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
}

/// Create an executable file.
pub fn create_executable(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir for script");
    }
    fs::write(path, body).expect("Failed to write script");
    let mut perms = fs::metadata(path).expect("Failed to get metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("Failed to set permissions");
}
