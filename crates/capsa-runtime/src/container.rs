//! Container run request and its preparation.

use std::path::PathBuf;
use std::process::Command;

use capsa_common::constants::DEFAULT_WORKDIR;
use capsa_common::error::{CapsaError, Result};
use capsa_common::types::{ImageId, VolumeSpec};
use capsa_core::syscall::Syscall;
use capsa_image::storage::ImageStore;

use crate::env::{merge_env, resolve_program};
use crate::process::{self, TtyMode};
use crate::rootfs::RootfsBuilder;

/// A single run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Image name or ID.
    pub image: String,
    /// Command and its arguments.
    pub command: Vec<String>,
    /// Working directory inside the container.
    pub workdir: PathBuf,
    /// Caller-declared `KEY=value` entries.
    pub env: Vec<String>,
    /// Caller-declared volumes.
    pub volumes: Vec<VolumeSpec>,
    /// Allocate a pty.
    pub tty: bool,
    /// Detach from the launcher.
    pub detach: bool,
}

impl Container {
    /// Creates a request running `command` in `image` with defaults for
    /// everything else.
    #[must_use]
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            env: Vec::new(),
            volumes: Vec::new(),
            tty: false,
            detach: false,
        }
    }

    /// How the command's standard streams are connected.
    #[must_use]
    pub const fn tty_mode(&self) -> TtyMode {
        TtyMode::from_flags(self.tty, self.detach)
    }

    /// Builds the container root and switches into it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid or the root filesystem
    /// cannot be built. An empty command is rejected before any mount.
    pub fn prepare(self, store: &dyn ImageStore, sys: &dyn Syscall) -> Result<PreparedContainer> {
        if self.command.is_empty() {
            return Err(CapsaError::Config {
                message: "no command given".into(),
            });
        }
        tracing::info!(image = %self.image, command = ?self.command, "preparing container");

        let resolved =
            RootfsBuilder::new(sys, store).build(&self.image, &self.volumes, &self.workdir)?;
        Ok(PreparedContainer {
            image_id: resolved.id,
            image_env: resolved.env,
            container: self,
        })
    }
}

/// A container whose root filesystem is in place.
#[derive(Debug)]
pub struct PreparedContainer {
    container: Container,
    image_id: ImageId,
    image_env: Vec<String>,
}

impl PreparedContainer {
    /// ID of the image the root was built from.
    #[must_use]
    pub const fn image_id(&self) -> &ImageId {
        &self.image_id
    }

    /// Image environment followed by the caller environment.
    #[must_use]
    pub fn env(&self) -> Vec<String> {
        merge_env(&self.image_env, &self.container.env)
    }

    /// Builds the final process image.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be found.
    pub fn command(&self) -> Result<Command> {
        let name = self.container.command.first().ok_or_else(|| CapsaError::Config {
            message: "no command given".into(),
        })?;
        let env = self.env();
        let program = resolve_program(name, &env)?;
        Ok(process::build_command(&program, &self.container.command, &env))
    }

    /// Runs the command and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be resolved or started.
    pub fn run(self) -> Result<i32> {
        let command = self.command()?;
        process::execute(command, self.container.tty_mode())
    }
}
