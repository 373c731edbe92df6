use crate::common::{KioskError, Result};
use crate::core::capabilities::LevelControl;
use std::process::{Command, Stdio};

const PERCENT_PLACEHOLDER: &str = "{percent}";

/// Level control that runs an external program, e.g. `pactl` or `brightnessctl`.
pub struct CommandControl {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandControl {
    /// `argv[0]` is the program; `{percent}` in any argument is replaced by the level.
    /// Returns `None` for an empty command line.
    pub fn new(name: &str, argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            name: name.to_string(),
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn expand_args(&self, percent: u8) -> Vec<String> {
        let value = percent.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PERCENT_PLACEHOLDER, &value))
            .collect()
    }
}

impl LevelControl for CommandControl {
    fn name(&self) -> &str {
        &self.name
    }

    fn set(&self, percent: u8) -> Result<()> {
        let status = Command::new(&self.program)
            .args(self.expand_args(percent))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| KioskError::Device(format!("Failed to run {}: {}", self.program, e)))?;

        if !status.success() {
            return Err(KioskError::Device(format!("{} exited with {}", self.program, status)));
        }
        tracing::debug!("{} set to {}%", self.name, percent);
        Ok(())
    }
}
