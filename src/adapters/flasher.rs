//! PlatformIO flasher adapter.
//!
//! Implements [`FirmwareFlasher`] by running
//! `pio run -t nobuild -t upload --disable-auto-clean` inside the
//! PlatformIO project directory. The build environment is selected via
//! `PLATFORMIO_DEFAULT_ENVS`, and `BUILD_DIR` points PlatformIO at the
//! work directory holding the committed `pio/<env>/firmware.bin`.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use log::{error, info};

use crate::app::ports::{FirmwareFlasher, FlashReport};
use crate::error::UploadError;

const FLASH_ARGS: [&str; 6] = ["run", "-t", "nobuild", "-t", "upload", "--disable-auto-clean"];

pub struct PioFlasher {
    program: String,
    project_dir: PathBuf,
}

impl PioFlasher {
    pub fn new(program: impl Into<String>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            project_dir: project_dir.into(),
        }
    }

    fn command(&self, build_root: &Path, environment: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(FLASH_ARGS)
            .current_dir(&self.project_dir)
            .env("BUILD_DIR", build_root)
            .env("PLATFORMIO_DEFAULT_ENVS", environment);
        cmd
    }
}

impl FirmwareFlasher for PioFlasher {
    fn flash(&self, build_root: &Path, environment: &str) -> Result<FlashReport, UploadError> {
        info!(
            "PLC: {} {} (env {}, cwd {})",
            self.program,
            FLASH_ARGS.join(" "),
            environment,
            self.project_dir.display()
        );
        let output = self
            .command(build_root, environment)
            .output()
            .with_context(|| {
                format!(
                    "running {} in {}",
                    self.program,
                    self.project_dir.display()
                )
            })
            .map_err(|e| {
                error!("PLC: {:#}", e);
                UploadError::FlasherSpawn
            })?;

        Ok(FlashReport {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
