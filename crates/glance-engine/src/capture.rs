use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use tracing::{debug, warn};

const FILE_PLACEHOLDER: &str = "{file}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub program: String,
    /// `{file}` is replaced with the output path.
    pub args: Vec<String>,
}

impl CaptureCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    fn resolved_args(&self, path: &Path) -> Vec<String> {
        let file = path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(FILE_PLACEHOLDER, &file))
            .collect()
    }
}

/// Shells out to the first screenshot tool that produces a file.
#[derive(Debug, Clone)]
pub struct ScreenshotCapture {
    commands: Vec<CaptureCommand>,
}

impl Default for ScreenshotCapture {
    fn default() -> Self {
        Self::new(vec![
            CaptureCommand::new("gnome-screenshot", &["-f", FILE_PLACEHOLDER]),
            CaptureCommand::new("scrot", &[FILE_PLACEHOLDER]),
        ])
    }
}

impl ScreenshotCapture {
    pub fn new(commands: Vec<CaptureCommand>) -> Self {
        Self { commands }
    }

    pub fn capture(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed creating screenshot dir {}", dir.display()))?;
        let path = dir.join(screenshot_file_name(Local::now().naive_local()));

        for command in &self.commands {
            let status = Command::new(&command.program)
                .args(command.resolved_args(&path))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match status {
                Ok(status) if status.success() && path.is_file() => {
                    debug!(tool = %command.program, path = %path.display(), "screenshot captured");
                    return Ok(path);
                }
                Ok(status) => {
                    warn!(
                        tool = %command.program,
                        %status,
                        "screenshot tool did not produce a file"
                    );
                }
                Err(err) => {
                    debug!(tool = %command.program, error = %err, "screenshot tool unavailable");
                }
            }
        }

        let tried = self
            .commands
            .iter()
            .map(|command| command.program.as_str())
            .collect::<Vec<&str>>()
            .join(", ");
        bail!("screenshot capture failed (tried: {tried})")
    }
}

pub fn screenshot_file_name(at: NaiveDateTime) -> String {
    format!("screenshot_{}.png", at.format("%Y%m%d_%H%M%S"))
}

pub fn capture_screenshot(dir: &Path) -> Result<PathBuf> {
    ScreenshotCapture::default().capture(dir)
}
