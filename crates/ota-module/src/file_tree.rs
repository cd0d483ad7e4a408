//! Module input file tree
//!
//! Before a module is invoked, the driver materializes a directory of
//! plain files describing the current device state and the incoming
//! artifact header. The module reads these instead of talking to the
//! client process.
//!
//! ```text
//! <dir>/version                  protocol version, "3"
//! <dir>/current_artifact_name    what is installed now
//! <dir>/current_artifact_group
//! <dir>/current_device_type
//! <dir>/header/artifact_name     what is being installed
//! <dir>/header/artifact_group
//! <dir>/header/payload_type
//! <dir>/header/header_info       raw JSON from the artifact
//! <dir>/header/type_info
//! <dir>/header/meta_data
//! ```

use std::path::Path;

use ota_core::context::{ARTIFACT_GROUP_KEY, ARTIFACT_NAME_KEY};
use ota_core::{ArtifactHeader, DeviceContext};
use ota_store::StoreRead;
use tracing::debug;

use crate::error::ModuleError;

/// Protocol version written to the `version` file.
const MODULE_PROTOCOL_VERSION: &str = "3";

/// Write the module input file tree into `dir`.
///
/// Store slots that have never been written (fresh device) materialize
/// as empty strings.
pub fn prepare_file_tree(
    dir: &Path,
    ctx: &DeviceContext,
    header: &ArtifactHeader,
) -> Result<(), ModuleError> {
    debug!(dir = %dir.display(), "Preparing module file tree");
    std::fs::create_dir_all(dir)?;

    let current_name = ctx.store().read_string(ARTIFACT_NAME_KEY)?.unwrap_or_default();
    let current_group = ctx.store().read_string(ARTIFACT_GROUP_KEY)?.unwrap_or_default();
    let device_type = ctx.get_device_type()?;

    std::fs::write(dir.join("version"), format!("{MODULE_PROTOCOL_VERSION}\n"))?;
    std::fs::write(dir.join("current_artifact_name"), format!("{current_name}\n"))?;
    std::fs::write(dir.join("current_artifact_group"), format!("{current_group}\n"))?;
    std::fs::write(dir.join("current_device_type"), format!("{device_type}\n"))?;

    let header_dir = dir.join("header");
    std::fs::create_dir_all(&header_dir)?;
    std::fs::write(header_dir.join("artifact_name"), &header.artifact_name)?;
    std::fs::write(header_dir.join("artifact_group"), &header.artifact_group)?;
    std::fs::write(header_dir.join("payload_type"), &header.payload_type)?;
    std::fs::write(header_dir.join("header_info"), &header.header_info)?;
    std::fs::write(header_dir.join("type_info"), &header.type_info)?;
    std::fs::write(header_dir.join("meta_data"), &header.meta_data)?;

    Ok(())
}

/// Recursively remove a file tree. Removing an already removed tree is
/// not an error.
pub fn delete_file_tree(dir: &Path) -> Result<(), ModuleError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_core::OtaConfig;

    fn read(dir: &Path, name: &str) -> String {
        std::fs::read_to_string(dir.join(name)).unwrap()
    }

    #[test]
    fn tree_contains_device_state_and_header() {
        let state_dir = tempfile::tempdir().unwrap();
        let tree_dir = tempfile::tempdir().unwrap();

        let config = OtaConfig {
            data_store_dir: state_dir.path().to_path_buf(),
            ..Default::default()
        };
        std::fs::write(config.device_type_path(), "device_type=Some device type\n").unwrap();
        let ctx = DeviceContext::initialize(config).unwrap();
        ctx.store()
            .write(ARTIFACT_NAME_KEY, b"existing-artifact-name")
            .unwrap();
        ctx.store()
            .write(ARTIFACT_GROUP_KEY, b"existing-artifact-group")
            .unwrap();

        let header = ArtifactHeader {
            artifact_name: "test-artifact".to_string(),
            artifact_group: String::new(),
            payload_type: "rootfs-image".to_string(),
            header_info: r#"{"payloads":[{"type":"rootfs-image"}]}"#.to_string(),
            type_info: r#"{"type":"rootfs-image"}"#.to_string(),
            meta_data: String::new(),
            ..Default::default()
        };

        prepare_file_tree(tree_dir.path(), &ctx, &header).unwrap();

        assert_eq!(read(tree_dir.path(), "version"), "3\n");
        assert_eq!(read(tree_dir.path(), "current_artifact_name"), "existing-artifact-name\n");
        assert_eq!(read(tree_dir.path(), "current_artifact_group"), "existing-artifact-group\n");
        assert_eq!(read(tree_dir.path(), "current_device_type"), "Some device type\n");

        assert_eq!(read(tree_dir.path(), "header/artifact_name"), "test-artifact");
        assert_eq!(read(tree_dir.path(), "header/artifact_group"), "");
        assert_eq!(read(tree_dir.path(), "header/payload_type"), "rootfs-image");
        assert_eq!(
            read(tree_dir.path(), "header/header_info"),
            r#"{"payloads":[{"type":"rootfs-image"}]}"#
        );
        assert_eq!(read(tree_dir.path(), "header/type_info"), r#"{"type":"rootfs-image"}"#);
        assert_eq!(read(tree_dir.path(), "header/meta_data"), "");
    }

    #[test]
    fn missing_store_slots_become_empty_strings() {
        let state_dir = tempfile::tempdir().unwrap();
        let tree_dir = tempfile::tempdir().unwrap();

        let config = OtaConfig {
            data_store_dir: state_dir.path().to_path_buf(),
            ..Default::default()
        };
        std::fs::write(config.device_type_path(), "device_type=x\n").unwrap();
        let ctx = DeviceContext::initialize(config).unwrap();

        prepare_file_tree(tree_dir.path(), &ctx, &ArtifactHeader::default()).unwrap();
        assert_eq!(read(tree_dir.path(), "current_artifact_name"), "\n");
        assert_eq!(read(tree_dir.path(), "current_artifact_group"), "\n");
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("header")).unwrap();
        std::fs::write(tree.join("version"), "3\n").unwrap();

        delete_file_tree(&tree).unwrap();
        assert!(!tree.exists());
        delete_file_tree(&tree).unwrap();
    }
}
