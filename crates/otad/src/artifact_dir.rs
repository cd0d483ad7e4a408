//! Parsed-artifact directory loading
//!
//! The artifact parser runs upstream of this daemon and leaves a parsed
//! artifact behind as a plain directory: the header fields as individual
//! files plus the payloads as regular files. This module turns such a
//! directory into an [`Artifact`] the update driver can stream.
//!
//! ```text
//! <dir>/header/artifact_name
//! <dir>/header/artifact_group     (optional)
//! <dir>/header/payload_type
//! <dir>/header/header_info        (optional, raw JSON)
//! <dir>/header/type_info          (optional, raw JSON)
//! <dir>/header/meta_data          (optional, raw JSON)
//! <dir>/header/provides           (optional, JSON object)
//! <dir>/header/clears_provides    (optional, JSON array)
//! <dir>/payloads/<name>           payload files, streamed in name order
//! ```

use std::path::Path;

use anyhow::{bail, Context as _, Result};

use ota_core::{Artifact, ArtifactHeader, ClearsProvides, Payload, ProvidesMap};

/// Load a parsed artifact from `dir`.
pub fn load(dir: &Path) -> Result<Artifact> {
    let header_dir = dir.join("header");

    let header = ArtifactHeader {
        artifact_name: read_required(&header_dir.join("artifact_name"))?,
        artifact_group: read_optional(&header_dir.join("artifact_group"))?,
        payload_type: read_required(&header_dir.join("payload_type"))?,
        header_info: read_optional(&header_dir.join("header_info"))?,
        type_info: read_optional(&header_dir.join("type_info"))?,
        meta_data: read_optional(&header_dir.join("meta_data"))?,
        provides: read_json::<ProvidesMap>(&header_dir.join("provides"))?,
        clears_provides: read_json::<ClearsProvides>(&header_dir.join("clears_provides"))?,
    };

    let payloads_dir = dir.join("payloads");
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&payloads_dir)
        .with_context(|| format!("Reading payloads from {}", payloads_dir.display()))?
    {
        let entry = entry?;
        if entry.metadata()?.is_file() {
            names.push(entry.file_name());
        }
    }
    if names.is_empty() {
        bail!("Artifact at {} has no payloads", dir.display());
    }
    names.sort();

    let mut payloads = Vec::new();
    for name in names {
        let path = payloads_dir.join(&name);
        let file = std::fs::File::open(&path)
            .with_context(|| format!("Opening payload {}", path.display()))?;
        payloads.push(Payload::new(
            name.to_string_lossy().into_owned(),
            Box::new(tokio::fs::File::from_std(file)),
        ));
    }

    Ok(Artifact::new(header, payloads))
}

fn read_required(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Reading {}", path.display()))?;
    let value = content.trim_end_matches('\n').to_string();
    if value.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(value)
}

fn read_optional(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.trim_end_matches('\n').to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("Reading {}", path.display())),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let value = serde_json::from_str(&content)
                .with_context(|| format!("Decoding {}", path.display()))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Reading {}", path.display())),
    }
}
