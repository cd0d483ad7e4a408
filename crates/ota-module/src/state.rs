//! Update-module protocol states
//!
//! Each state maps to one invocation `<module> <State> <work_dir>`. The
//! state names are part of the module protocol and must match the
//! specification exactly.

/// States of the update-module protocol, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Download,
    ArtifactInstall,
    NeedsReboot,
    ArtifactReboot,
    ArtifactCommit,
    SupportsRollback,
    ArtifactRollback,
    ArtifactVerifyReboot,
    ArtifactRollbackReboot,
    ArtifactVerifyRollbackReboot,
    ArtifactFailure,
    Cleanup,
}

impl ModuleState {
    /// The argument string passed to the module executable.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::Download => "Download",
            ModuleState::ArtifactInstall => "ArtifactInstall",
            ModuleState::NeedsReboot => "NeedsReboot",
            ModuleState::ArtifactReboot => "ArtifactReboot",
            ModuleState::ArtifactCommit => "ArtifactCommit",
            ModuleState::SupportsRollback => "SupportsRollback",
            ModuleState::ArtifactRollback => "ArtifactRollback",
            ModuleState::ArtifactVerifyReboot => "ArtifactVerifyReboot",
            ModuleState::ArtifactRollbackReboot => "ArtifactRollbackReboot",
            ModuleState::ArtifactVerifyRollbackReboot => "ArtifactVerifyRollbackReboot",
            ModuleState::ArtifactFailure => "ArtifactFailure",
            ModuleState::Cleanup => "Cleanup",
        }
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer of the `NeedsReboot` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootAction {
    /// No reboot needed
    No,
    /// The module reboots the device itself during install
    Automatic,
    /// The driver must invoke `ArtifactReboot`
    Yes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_match_protocol() {
        assert_eq!(ModuleState::Download.as_str(), "Download");
        assert_eq!(ModuleState::ArtifactVerifyRollbackReboot.as_str(), "ArtifactVerifyRollbackReboot");
        assert_eq!(ModuleState::Cleanup.to_string(), "Cleanup");
    }
}
