//! Deployment status values reported back to the server

/// Status of a deployment as seen by the device.
///
/// The string forms are wire-exact; the server rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    Installing,
    PauseBeforeInstalling,
    Downloading,
    PauseBeforeRebooting,
    Rebooting,
    PauseBeforeCommitting,
    Success,
    Failure,
    AlreadyInstalled,
}

impl DeploymentStatus {
    /// The wire representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Installing => "installing",
            DeploymentStatus::PauseBeforeInstalling => "pause_before_installing",
            DeploymentStatus::Downloading => "downloading",
            DeploymentStatus::PauseBeforeRebooting => "pause_before_rebooting",
            DeploymentStatus::Rebooting => "rebooting",
            DeploymentStatus::PauseBeforeCommitting => "pause_before_committing",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failure => "failure",
            DeploymentStatus::AlreadyInstalled => "already-installed",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installing" => Ok(DeploymentStatus::Installing),
            "pause_before_installing" => Ok(DeploymentStatus::PauseBeforeInstalling),
            "downloading" => Ok(DeploymentStatus::Downloading),
            "pause_before_rebooting" => Ok(DeploymentStatus::PauseBeforeRebooting),
            "rebooting" => Ok(DeploymentStatus::Rebooting),
            "pause_before_committing" => Ok(DeploymentStatus::PauseBeforeCommitting),
            "success" => Ok(DeploymentStatus::Success),
            "failure" => Ok(DeploymentStatus::Failure),
            "already-installed" => Ok(DeploymentStatus::AlreadyInstalled),
            other => Err(format!("Unknown deployment status {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_are_exact() {
        assert_eq!(DeploymentStatus::Downloading.as_str(), "downloading");
        assert_eq!(DeploymentStatus::PauseBeforeCommitting.as_str(), "pause_before_committing");
        assert_eq!(DeploymentStatus::AlreadyInstalled.as_str(), "already-installed");
        assert_eq!(DeploymentStatus::Success.to_string(), "success");
    }

    #[test]
    fn parsing_round_trips() {
        for status in [
            DeploymentStatus::Installing,
            DeploymentStatus::Downloading,
            DeploymentStatus::Rebooting,
            DeploymentStatus::Success,
            DeploymentStatus::Failure,
            DeploymentStatus::AlreadyInstalled,
        ] {
            assert_eq!(status.as_str().parse::<DeploymentStatus>().unwrap(), status);
        }
        assert!("finished".parse::<DeploymentStatus>().is_err());
    }
}
