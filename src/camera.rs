use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Which physical camera feeds the pipeline.
///
/// Day and night use separate sensors (the night one is typically an IR camera),
/// selected by the downstream collaborator from its ambient-light readings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    #[default]
    Day,
    Night,
}

impl CameraMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CameraMode::Day => "day",
            CameraMode::Night => "night",
        }
    }

    /// Camera index handed to the capture process for this mode.
    pub fn camera_index(self, day_index: u32, night_index: u32) -> u32 {
        match self {
            CameraMode::Day => day_index,
            CameraMode::Night => night_index,
        }
    }
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(CameraMode::Day),
            "night" => Ok(CameraMode::Night),
            other => Err(anyhow!("unknown camera mode '{}'", other)),
        }
    }
}

/// Result of a mode-switch request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The capture process was restarted on the other camera.
    Switched(CameraMode),
    /// The requested mode was already active; nothing was touched.
    AlreadyActive(CameraMode),
}

impl SwitchOutcome {
    /// Short status line returned to the control client.
    pub fn message(self) -> String {
        match self {
            SwitchOutcome::Switched(mode) => format!("Switched to {} mode", mode),
            SwitchOutcome::AlreadyActive(mode) => format!("Already in {} mode", mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes_case_insensitively() {
        assert_eq!("Night".parse::<CameraMode>().unwrap(), CameraMode::Night);
        assert_eq!(" day ".parse::<CameraMode>().unwrap(), CameraMode::Day);
        assert!("dusk".parse::<CameraMode>().is_err());
    }

    #[test]
    fn maps_modes_to_camera_indices() {
        assert_eq!(CameraMode::Day.camera_index(0, 1), 0);
        assert_eq!(CameraMode::Night.camera_index(0, 1), 1);
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(
            SwitchOutcome::Switched(CameraMode::Night).message(),
            "Switched to night mode"
        );
        assert_eq!(
            SwitchOutcome::AlreadyActive(CameraMode::Day).message(),
            "Already in day mode"
        );
    }
}
