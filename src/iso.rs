//! Bootable image assembly.
//!
//! Builds a hybrid BIOS/EFI Limine ISO in five steps:
//!
//! 1. Stage the bootloader files listed in the [`BootManifest`]
//! 2. Stage the kernel under its fixed name
//! 3. Master the ISO with xorriso (El Torito BIOS + EFI, protective MBR label)
//! 4. Install the legacy boot record with `limine bios-install`
//! 5. Atomically promote the image and its checksum to the output directory
//!
//! All intermediate files live in a per-build work directory inside the
//! output directory and are removed on every exit path. The canonical image
//! is only ever replaced by a rename of a fully patched image.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::artifact::BuildArtifact;
use crate::config::{Config, ISO_FILENAME};
use crate::digest;
use crate::error::{AssemblyStep, PipelineError, PipelineResult};
use crate::manifest::{BootManifest, Entry};
use crate::process::Cmd;
use crate::timing::Timer;

/// Suffix of the checksum file written next to the image.
pub const CHECKSUM_SUFFIX: &str = "sha256";

/// A file copied into the staging tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub source: PathBuf,
    /// Path relative to the medium root.
    pub destination: PathBuf,
    pub sha256: String,
}

/// Whether the legacy boot record has been installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootRecord {
    Unpatched,
    Patched,
}

/// A promoted, bootable image.
#[derive(Debug, Clone)]
pub struct BootableImage {
    pub path: PathBuf,
    pub checksum_path: PathBuf,
    pub sha256: String,
    /// Staged files in manifest order.
    pub staged: Vec<StagedFile>,
    pub boot_record: BootRecord,
    pub kernel: BuildArtifact,
}

/// Per-build scratch space: staging tree plus temporary image.
struct WorkDir {
    _dir: TempDir,
    root: PathBuf,
    image: PathBuf,
}

/// Image produced by xorriso, not yet bootable from legacy BIOS disks.
struct MasteredImage {
    path: PathBuf,
    boot_record: BootRecord,
}

/// Image with the boot record installed, still at its temporary path.
struct PatchedImage {
    path: PathBuf,
    boot_record: BootRecord,
}

/// Assembles bootable images from a kernel artifact and the manifest.
pub struct ImageAssembler<'a> {
    config: &'a Config,
    manifest: BootManifest,
}

impl<'a> ImageAssembler<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            manifest: BootManifest::default(),
        }
    }

    /// Run every step and promote the result to `config.iso_path()`.
    ///
    /// On error the previous image at the canonical path is untouched.
    pub fn assemble(&self, kernel: &BuildArtifact) -> PipelineResult<BootableImage> {
        let timer = Timer::start("Assemble bootable image");
        info!("Assembling {} from {}", ISO_FILENAME, kernel.path.display());

        let work = self.work_dir()?;
        let staged = self.stage(kernel, &work.root)?;
        let mastered = self.master(&work)?;
        let patched = self.deploy_boot_record(mastered)?;
        let image = self.promote(patched, staged, kernel)?;

        timer.finish();
        info!("Image ready: {} (sha256 {})", image.path.display(), image.sha256);
        Ok(image)
    }

    /// Copy every manifest entry into `root`, in manifest order.
    ///
    /// Bootloader files are staged first, then the kernel.
    pub fn stage(&self, kernel: &BuildArtifact, root: &Path) -> PipelineResult<Vec<StagedFile>> {
        let mut staged = Vec::with_capacity(self.manifest.entries().len());

        for entry in self.manifest.bootloader_entries() {
            let step = AssemblyStep::StageBootloader;
            staged.push(self.stage_entry(entry, &kernel.path, root, step)?);
        }

        let kernel_entry = self.manifest.kernel_entry().ok_or_else(|| {
            PipelineError::assembly(AssemblyStep::StageKernel, root, "manifest has no kernel entry")
        })?;
        let step = AssemblyStep::StageKernel;
        staged.push(self.stage_entry(kernel_entry, &kernel.path, root, step)?);

        Ok(staged)
    }

    fn stage_entry(
        &self,
        entry: &Entry,
        kernel: &Path,
        root: &Path,
        step: AssemblyStep,
    ) -> PipelineResult<StagedFile> {
        let source = self
            .manifest
            .source_path(entry, &self.config.bootloader_dir, kernel);
        let dest = root.join(entry.destination);

        if !source.is_file() {
            return Err(PipelineError::assembly(
                step,
                &source,
                format!("{} is missing", entry.role),
            ));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::assembly(step, parent, e))?;
        }
        fs::copy(&source, &dest).map_err(|e| PipelineError::assembly(step, &dest, e))?;
        let sha256 =
            digest::hash_file(&dest).map_err(|e| PipelineError::assembly(step, &dest, e))?;

        debug!("staged {} -> {}", source.display(), entry.destination);
        Ok(StagedFile {
            source,
            destination: PathBuf::from(entry.destination),
            sha256,
        })
    }

    fn work_dir(&self) -> PipelineResult<WorkDir> {
        let out = &self.config.output_dir;
        let step = AssemblyStep::StageBootloader;
        fs::create_dir_all(out).map_err(|e| PipelineError::assembly(step, out, e))?;

        let dir = tempfile::Builder::new()
            .prefix(".iso-build-")
            .tempdir_in(out)
            .map_err(|e| PipelineError::assembly(step, out, e))?;
        let root = dir.path().join("iso-root");
        fs::create_dir_all(&root).map_err(|e| PipelineError::assembly(step, &root, e))?;
        let image = dir.path().join(ISO_FILENAME);

        Ok(WorkDir { _dir: dir, root, image })
    }

    fn master(&self, work: &WorkDir) -> PipelineResult<MasteredImage> {
        info!("Mastering hybrid BIOS/EFI ISO with xorriso...");
        Cmd::new(&self.config.xorriso)
            .args(mastering_args(&self.manifest, &work.root, &work.image))
            .error_msg("xorriso failed to master the ISO")
            .run()
            .map_err(|e| PipelineError::from_command(AssemblyStep::Master, &work.image, e))?;

        if !work.image.is_file() {
            return Err(PipelineError::assembly(
                AssemblyStep::Master,
                &work.image,
                "xorriso reported success but produced no image",
            ));
        }

        Ok(MasteredImage {
            path: work.image.clone(),
            boot_record: BootRecord::Unpatched,
        })
    }

    fn deploy_boot_record(&self, image: MasteredImage) -> PipelineResult<PatchedImage> {
        debug_assert_eq!(image.boot_record, BootRecord::Unpatched);
        info!("Installing Limine BIOS boot record...");
        Cmd::new(&self.config.limine_tool)
            .arg("bios-install")
            .arg_path(&image.path)
            .error_msg("limine bios-install failed")
            .run()
            .map_err(|e| {
                PipelineError::from_command(AssemblyStep::DeployBootRecord, &image.path, e)
            })?;

        Ok(PatchedImage {
            path: image.path,
            boot_record: BootRecord::Patched,
        })
    }

    fn promote(
        &self,
        image: PatchedImage,
        staged: Vec<StagedFile>,
        kernel: &BuildArtifact,
    ) -> PipelineResult<BootableImage> {
        let step = AssemblyStep::Promote;
        let final_path = self.config.iso_path();
        let final_checksum = checksum_path(&final_path);

        let sha256 = digest::hash_file(&image.path)
            .map_err(|e| PipelineError::assembly(step, &image.path, e))?;
        let temp_checksum = checksum_path(&image.path);
        fs::write(&temp_checksum, format!("{}  {}\n", sha256, ISO_FILENAME))
            .map_err(|e| PipelineError::assembly(step, &temp_checksum, e))?;

        // A stale checksum must never sit next to a new image.
        match fs::remove_file(&final_checksum) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::assembly(step, &final_checksum, e)),
        }

        // Same filesystem as the work dir, so both renames are atomic.
        fs::rename(&image.path, &final_path)
            .map_err(|e| PipelineError::assembly(step, &final_path, e))?;
        fs::rename(&temp_checksum, &final_checksum)
            .map_err(|e| PipelineError::assembly(step, &final_checksum, e))?;

        Ok(BootableImage {
            path: final_path,
            checksum_path: final_checksum,
            sha256,
            staged,
            boot_record: image.boot_record,
            kernel: kernel.clone(),
        })
    }
}

/// Arguments passed to `xorriso` to master a hybrid image from `root`.
pub fn mastering_args(manifest: &BootManifest, root: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-as", "mkisofs", "-R", "-r", "-J"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    // BIOS El Torito
    args.extend(
        [
            "-b",
            manifest.bios_boot_image(),
            "-no-emul-boot",
            "-boot-load-size",
            "4",
            "-boot-info-table",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    // EFI El Torito, plus an appended EFI partition and protective label
    args.extend(
        [
            "--efi-boot",
            manifest.efi_boot_image(),
            "-efi-boot-part",
            "--efi-boot-image",
            "--protective-msdos-label",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(root.to_string_lossy().into_owned());
    args.push("-o".to_string());
    args.push(output.to_string_lossy().into_owned());
    args
}

/// `<image>.sha256`
pub fn checksum_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(".");
    name.push(CHECKSUM_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mastering_args_are_hybrid() {
        let args = mastering_args(
            &BootManifest::limine(),
            Path::new("/w/iso-root"),
            Path::new("/w/silicium.iso"),
        );
        let joined = args.join(" ");
        assert!(joined.starts_with("-as mkisofs"));
        assert!(joined.contains("-b boot/limine/limine-bios-cd.bin -no-emul-boot"));
        assert!(joined.contains("--efi-boot boot/limine/limine-uefi-cd.bin"));
        assert!(joined.contains("--protective-msdos-label"));
        assert!(joined.ends_with("/w/iso-root -o /w/silicium.iso"));
    }

    #[test]
    fn test_checksum_path() {
        assert_eq!(
            checksum_path(Path::new("/out/silicium.iso")),
            PathBuf::from("/out/silicium.iso.sha256")
        );
    }
}
