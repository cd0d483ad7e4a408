//! Device context: what the device currently is
//!
//! The context merges the persistent state store slots into a flat
//! provides map, reads the device type, and atomically applies the state
//! changes of a successful install (new provides, clears-provides
//! invalidation, artifact name/group).

use std::path::Path;

use ota_store::{DeviceStore, StoreError, StoreRead, StoreTransaction};
use tracing::debug;

use crate::config::OtaConfig;
use crate::error::ContextError;
use crate::provides::{apply_clears, ProvidesMap};

/// Store slot holding the name of the installed artifact.
pub const ARTIFACT_NAME_KEY: &str = "artifact-name";
/// Store slot holding the group of the installed artifact, if any.
pub const ARTIFACT_GROUP_KEY: &str = "artifact-group";
/// Store slot holding the remaining provides as a JSON object.
pub const ARTIFACT_PROVIDES_KEY: &str = "artifact-provides";

/// Device context over the state store and the device_type file.
pub struct DeviceContext {
    config: OtaConfig,
    store: DeviceStore,
}

impl DeviceContext {
    /// Open the state store under `config.data_store_dir`.
    pub fn initialize(config: OtaConfig) -> Result<Self, ContextError> {
        let store = DeviceStore::open(&config.store_path())?;
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DeviceStore {
        &mut self.store
    }

    /// Load the flat provides map from the store.
    ///
    /// The dedicated name/group slots are mirrored into the map under
    /// `artifact_name` / `artifact_group` (note the underscore; the store
    /// keys use a dash) and override any same-named entry from the
    /// provides JSON. Missing slots are simply absent from the result.
    pub fn load_provides(&self) -> Result<ProvidesMap, ContextError> {
        load_provides_from(&self.store)
    }

    /// Same as [`load_provides`](Self::load_provides), but reading through
    /// an open transaction.
    pub fn load_provides_txn(txn: &StoreTransaction<'_>) -> Result<ProvidesMap, ContextError> {
        load_provides_from(txn)
    }

    /// Read the device type from `<data_store_dir>/device_type`.
    ///
    /// The file must contain exactly one `device_type=<value>` line with
    /// an optional trailing newline. Anything else is rejected: an empty
    /// file or a missing `=` is a parse error, trailing content after the
    /// first line is a value error, and a missing file surfaces as the
    /// underlying I/O error.
    pub fn get_device_type(&self) -> Result<String, ContextError> {
        let path = self.config.device_type_path();
        let content = std::fs::read_to_string(&path)?;
        parse_device_type(&content, &path)
    }

    /// Atomically record the state of a newly installed artifact.
    ///
    /// Clears-provides patterns are applied to the existing provides
    /// before the new ones are merged, so new values always win. The
    /// literal pattern `artifact_group` additionally removes the stored
    /// group slot. `txn_func` runs inside the same transaction; its error
    /// aborts the whole commit.
    ///
    /// Legacy artifacts carry neither provides nor clears-provides; in
    /// that case the provides slot is left untouched and only the
    /// name/group slots are written.
    pub fn commit_artifact_data<F>(
        &mut self,
        artifact_name: &str,
        artifact_group: &str,
        provides: Option<&ProvidesMap>,
        clears_provides: Option<&[String]>,
        txn_func: F,
    ) -> Result<(), ContextError>
    where
        F: FnOnce(&mut StoreTransaction<'_>) -> Result<(), StoreError>,
    {
        debug!(artifact_name, artifact_group, "Committing artifact data");

        let mut json_error: Option<ContextError> = None;
        let result = self.store.with_transaction(|txn| {
            if provides.is_some() || clears_provides.is_some() {
                let mut merged = match read_provides_json(txn)? {
                    Some(Ok(existing)) => existing,
                    Some(Err(e)) => {
                        json_error = Some(e);
                        return Err(StoreError::NotFound(ARTIFACT_PROVIDES_KEY.to_string()));
                    }
                    None => ProvidesMap::new(),
                };

                if let Some(patterns) = clears_provides {
                    apply_clears(&mut merged, patterns);
                    if patterns.iter().any(|p| p == "artifact_group") {
                        txn.remove(ARTIFACT_GROUP_KEY)?;
                    }
                }

                if let Some(new_provides) = provides {
                    for (key, value) in new_provides {
                        merged.insert(key.clone(), value.clone());
                    }
                }

                if merged.is_empty() {
                    txn.remove(ARTIFACT_PROVIDES_KEY)?;
                } else {
                    // serde_json cannot fail on a string map
                    let serialized = serde_json::to_vec(&merged).expect("serializing string map");
                    txn.write(ARTIFACT_PROVIDES_KEY, &serialized)?;
                }
            }

            txn.write(ARTIFACT_NAME_KEY, artifact_name.as_bytes())?;
            if artifact_group.is_empty() {
                txn.remove(ARTIFACT_GROUP_KEY)?;
            } else {
                txn.write(ARTIFACT_GROUP_KEY, artifact_group.as_bytes())?;
            }

            txn_func(txn)
        });

        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(json_error.take().unwrap_or(ContextError::Store(e))),
        }
    }
}

fn load_provides_from<R: StoreRead>(reader: &R) -> Result<ProvidesMap, ContextError> {
    let mut provides = match read_provides_json(reader) {
        Ok(Some(Ok(map))) => map,
        Ok(Some(Err(e))) => return Err(e),
        Ok(None) => ProvidesMap::new(),
        Err(e) => return Err(e.into()),
    };

    // Dedicated slots override entries from the JSON blob.
    if let Some(name) = reader.read_string(ARTIFACT_NAME_KEY)? {
        provides.insert("artifact_name".to_string(), name);
    }
    if let Some(group) = reader.read_string(ARTIFACT_GROUP_KEY)? {
        provides.insert("artifact_group".to_string(), group);
    }

    Ok(provides)
}

/// Read and decode the provides JSON slot.
///
/// Distinguishes "slot absent" (`Ok(None)`) from "slot present but
/// malformed" (`Ok(Some(Err(..)))`) so callers can abort a commit without
/// conflating the two.
fn read_provides_json<R: StoreRead>(
    reader: &R,
) -> Result<Option<Result<ProvidesMap, ContextError>>, StoreError> {
    let raw = match reader.read(ARTIFACT_PROVIDES_KEY) {
        Ok(raw) => raw,
        Err(StoreError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(Some(decode_provides_json(&raw)))
}

fn decode_provides_json(raw: &[u8]) -> Result<ProvidesMap, ContextError> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| ContextError::Parse(format!("Invalid provides JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| ContextError::Type("Provides data is not a JSON object".to_string()))?;

    let mut provides = ProvidesMap::new();
    for (key, value) in object {
        let string = value.as_str().ok_or_else(|| {
            ContextError::Type(format!("Provides value for {key:?} is not a string"))
        })?;
        provides.insert(key.clone(), string.to_string());
    }
    Ok(provides)
}

fn parse_device_type(content: &str, path: &Path) -> Result<String, ContextError> {
    let (line, rest) = match content.split_once('\n') {
        Some((line, rest)) => (line, rest),
        None => (content, ""),
    };
    if !rest.is_empty() {
        return Err(ContextError::Value(format!(
            "Trailing content in {}",
            path.display()
        )));
    }

    let (key, value) = line.split_once('=').ok_or_else(|| {
        ContextError::Parse(format!("Expected device_type=<value> in {}", path.display()))
    })?;
    if key != "device_type" || value.is_empty() {
        return Err(ContextError::Parse(format!(
            "Expected device_type=<value> in {}",
            path.display()
        )));
    }
    Ok(value.to_string())
}
