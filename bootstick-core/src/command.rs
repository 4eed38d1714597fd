//! Runs external programs on behalf of the pipeline stages.
use crate::error::{ProvisionError, Result};
use crate::progress::{ProgressTracker, Severity};
use crate::system::System;

/// Runs a program to completion and turns a non-zero exit into a
/// [`ProvisionError::ToolInvocation`] carrying the captured stderr.
///
/// Every invocation and any stdout it produced end up in the run log. There
/// is no retrying here; stages that need it loop on their own.
pub(crate) struct CommandRunner<'a> {
    system: &'a dyn System,
    progress: &'a ProgressTracker<'a>,
}

impl<'a> CommandRunner<'a> {
    pub(crate) fn new(system: &'a dyn System, progress: &'a ProgressTracker<'a>) -> Self {
        Self { system, progress }
    }

    pub(crate) fn system(&self) -> &'a dyn System {
        self.system
    }

    pub(crate) fn progress(&self) -> &'a ProgressTracker<'a> {
        self.progress
    }

    /// Runs `program` with `args`, logging `description` first when given.
    /// Returns the captured stdout on success.
    pub(crate) fn run(
        &self,
        program: &str,
        args: &[&str],
        description: Option<&str>,
    ) -> Result<String> {
        self.invoke(program, args, description, Severity::Error)
    }

    /// Like [`run`](Self::run), for commands whose failure the caller
    /// recovers from: the failure is logged as a warning, not an error.
    pub(crate) fn run_tolerant(
        &self,
        program: &str,
        args: &[&str],
        description: Option<&str>,
    ) -> Result<String> {
        self.invoke(program, args, description, Severity::Warning)
    }

    fn invoke(
        &self,
        program: &str,
        args: &[&str],
        description: Option<&str>,
        failure: Severity,
    ) -> Result<String> {
        if let Some(description) = description {
            self.progress.info(description);
        }

        let cmdline = command_line(program, args);
        tracing::info!(command = %cmdline, "running");
        self.progress.info(&format!("Running: {cmdline}"));

        let output = self.system.run(program, args).map_err(|e| {
            tracing::warn!(command = %cmdline, error = %e, "failed to start");
            self.progress.log(&format!("Could not start {program}: {e}"), failure);
            ProvisionError::ToolInvocation {
                program: program.to_string(),
                code: None,
                stderr: e.to_string(),
            }
        })?;

        let stdout = output.stdout.trim();
        if !stdout.is_empty() {
            self.progress.info(stdout);
        }

        if !output.success() {
            let stderr = output.stderr.trim().to_string();
            tracing::warn!(command = %cmdline, code = ?output.code, %stderr, "command failed");
            self.progress.log(&format!("Command failed: {cmdline}"), failure);
            if !stderr.is_empty() {
                self.progress.log(&format!("Error output: {stderr}"), failure);
            }
            return Err(ProvisionError::ToolInvocation {
                program: program.to_string(),
                code: output.code,
                stderr,
            });
        }

        Ok(output.stdout)
    }
}

/// Renders an invocation the way it would be typed into a shell, for logs.
pub(crate) fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .map(|part| {
            if part.is_empty() || part.contains(char::is_whitespace) {
                format!("'{part}'")
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
