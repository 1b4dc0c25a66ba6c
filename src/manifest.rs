//! Boot medium manifest.
//!
//! The Limine loaders find their stages and configuration by exact name and
//! location, so the layout of the medium is data rather than code. The
//! assembler walks a [`BootManifest`] in order; nothing else decides where
//! a file lands.

use std::path::{Path, PathBuf};

use crate::config::KERNEL_ISO_PATH;

/// Where a staged file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A file in the bootloader directory.
    Bootloader(&'static str),
    /// The selected kernel executable.
    Kernel,
}

/// One `{source, destination}` pair of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub source: Source,
    /// Path relative to the medium root.
    pub destination: &'static str,
    /// What the file is for, shown in preflight output.
    pub role: &'static str,
}

pub const LIMINE_BIOS_SYS: Entry = bootloader(
    "limine-bios.sys",
    "boot/limine/limine-bios.sys",
    "BIOS secondary loader",
);
pub const LIMINE_BIOS_CD: Entry = bootloader(
    "limine-bios-cd.bin",
    "boot/limine/limine-bios-cd.bin",
    "BIOS El Torito stage",
);
pub const LIMINE_UEFI_CD: Entry = bootloader(
    "limine-uefi-cd.bin",
    "boot/limine/limine-uefi-cd.bin",
    "EFI El Torito image",
);
pub const BOOTX64_EFI: Entry = bootloader(
    "BOOTX64.EFI",
    "EFI/BOOT/BOOTX64.EFI",
    "EFI removable-media loader",
);
pub const LIMINE_CFG: Entry = bootloader(
    "limine.cfg",
    "boot/limine/limine.cfg",
    "boot configuration",
);

pub const KERNEL: Entry = Entry {
    source: Source::Kernel,
    destination: KERNEL_ISO_PATH,
    role: "kernel executable",
};

const fn bootloader(file: &'static str, destination: &'static str, role: &'static str) -> Entry {
    Entry {
        source: Source::Bootloader(file),
        destination,
        role,
    }
}

/// Ordered list of files making up the boot medium.
#[derive(Debug, Clone)]
pub struct BootManifest {
    entries: Vec<Entry>,
}

impl Default for BootManifest {
    fn default() -> Self {
        Self::limine()
    }
}

impl BootManifest {
    /// The Limine hybrid BIOS/EFI layout.
    pub fn limine() -> Self {
        Self {
            entries: vec![
                LIMINE_BIOS_SYS,
                LIMINE_BIOS_CD,
                LIMINE_UEFI_CD,
                BOOTX64_EFI,
                LIMINE_CFG,
                KERNEL,
            ],
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entries copied from the bootloader directory.
    pub fn bootloader_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.source, Source::Bootloader(_)))
    }

    /// The entry the kernel executable is staged under.
    pub fn kernel_entry(&self) -> Option<&Entry> {
        self.entries.iter().find(|e| e.source == Source::Kernel)
    }

    /// Legacy El Torito boot image, relative to the medium root.
    pub fn bios_boot_image(&self) -> &'static str {
        LIMINE_BIOS_CD.destination
    }

    /// EFI El Torito boot image, relative to the medium root.
    pub fn efi_boot_image(&self) -> &'static str {
        LIMINE_UEFI_CD.destination
    }

    /// Resolve the source path of an entry.
    pub fn source_path(&self, entry: &Entry, bootloader_dir: &Path, kernel: &Path) -> PathBuf {
        match entry.source {
            Source::Bootloader(file) => bootloader_dir.join(file),
            Source::Kernel => kernel.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_destinations_are_unique_and_relative() {
        let manifest = BootManifest::limine();
        let mut seen = HashSet::new();
        for entry in manifest.entries() {
            assert!(!entry.destination.starts_with('/'), "{}", entry.destination);
            assert!(seen.insert(entry.destination), "duplicate {}", entry.destination);
        }
    }

    #[test]
    fn test_exactly_one_kernel_entry() {
        let manifest = BootManifest::limine();
        let kernels = manifest
            .entries()
            .iter()
            .filter(|e| e.source == Source::Kernel)
            .count();
        assert_eq!(kernels, 1);
        assert_eq!(manifest.kernel_entry().unwrap().destination, "boot/silicium");
    }

    #[test]
    fn test_boot_images_are_staged() {
        let manifest = BootManifest::limine();
        let dests: Vec<_> = manifest.entries().iter().map(|e| e.destination).collect();
        assert!(dests.contains(&manifest.bios_boot_image()));
        assert!(dests.contains(&manifest.efi_boot_image()));
    }

    #[test]
    fn test_source_path() {
        let manifest = BootManifest::limine();
        let kernel = Path::new("/t/release/silicium");
        assert_eq!(
            manifest.source_path(&LIMINE_CFG, Path::new("/limine"), kernel),
            PathBuf::from("/limine/limine.cfg")
        );
        assert_eq!(manifest.source_path(&KERNEL, Path::new("/limine"), kernel), kernel);
    }
}
