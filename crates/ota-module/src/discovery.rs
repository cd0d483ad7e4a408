//! Update-module discovery
//!
//! Update modules are standalone executables installed under
//! `<data_store_dir>/modules/v3/`. One module handles one payload type;
//! the executable's file name is the payload type it serves.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tracing::debug;

use ota_core::OtaConfig;

use crate::error::ModuleError;

/// List the update-module executables installed on this device.
///
/// Non-executables and non-regular files are skipped. A missing modules
/// directory simply means no modules are installed and yields an empty
/// list, not an error.
pub fn discover_update_modules(config: &OtaConfig) -> Result<Vec<PathBuf>, ModuleError> {
    let dir = config.modules_path();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut modules = Vec::new();
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        if metadata.permissions().mode() & 0o111 == 0 {
            debug!(path = %entry.path().display(), "Skipping non-executable module candidate");
            continue;
        }
        modules.push(entry.path());
    }
    modules.sort();
    Ok(modules)
}
