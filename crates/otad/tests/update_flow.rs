//! End-to-end update flow tests
//!
//! A fake update module (shell script) plus an in-process deployments
//! API server exercise the full orchestration: status pushes, module
//! phases, the provides commit and the cleanup.

use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::put;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;

use ota_client::DeploymentsClient;
use ota_core::{Artifact, ArtifactHeader, DeviceContext, OtaConfig, Payload, ProvidesMap};
use ota_module::UpdateModule;
use ota_store::StoreRead;
use otad::updater;

type Statuses = Arc<Mutex<Vec<(String, Value)>>>;

async fn start_status_server(statuses: Statuses) -> String {
    let router = Router::new()
        .route(
            "/api/devices/v1/deployments/device/deployments/:id/status",
            put(
                |State(statuses): State<Statuses>, Path(id): Path<String>, Json(body): Json<Value>| async move {
                    statuses.lock().unwrap().push((id, body));
                    StatusCode::OK
                },
            ),
        )
        .with_state(statuses);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

struct Setup {
    _dir: tempfile::TempDir,
    ctx: DeviceContext,
    module: UpdateModule,
}

fn setup(module_script: &str) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let config = OtaConfig {
        data_store_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    std::fs::write(config.device_type_path(), "device_type=test-device\n").unwrap();

    let module_path = config.modules_path().join("rootfs-image");
    std::fs::create_dir_all(config.modules_path()).unwrap();
    std::fs::write(&module_path, module_script).unwrap();
    std::fs::set_permissions(&module_path, std::fs::Permissions::from_mode(0o700)).unwrap();

    let module = UpdateModule::for_payload_type(&config, "rootfs-image");
    let ctx = DeviceContext::initialize(config).unwrap();

    // Device state before the update.
    ctx.store().write("artifact-name", b"release-1").unwrap();
    ctx.store()
        .write("artifact-provides", br#"{"rootfs-image.version":"release-1"}"#)
        .unwrap();

    Setup {
        _dir: dir,
        ctx,
        module,
    }
}

fn test_artifact() -> Artifact {
    let mut provides = ProvidesMap::new();
    provides.insert("rootfs-image.version".to_string(), "release-2".to_string());

    let header = ArtifactHeader {
        artifact_name: "release-2".to_string(),
        artifact_group: String::new(),
        payload_type: "rootfs-image".to_string(),
        type_info: r#"{"type":"rootfs-image"}"#.to_string(),
        provides: Some(provides),
        clears_provides: Some(vec!["rootfs-image.*".to_string()]),
        ..Default::default()
    };
    Artifact::new(header, vec![Payload::from_bytes("rootfs", b"new rootfs".to_vec())])
}

fn status_names(statuses: &Statuses) -> Vec<String> {
    statuses
        .lock()
        .unwrap()
        .iter()
        .map(|(_, body)| body["status"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn successful_update_commits_and_reports() {
    let script = r#"#!/bin/sh
case "$1" in
    Download)
        exit 0
        ;;
    ArtifactInstall)
        touch ../../installed-marker
        ;;
    NeedsReboot)
        echo "No"
        ;;
    SupportsRollback)
        echo "No"
        ;;
esac
exit 0
"#;
    let mut setup = setup(script);
    let statuses: Statuses = Default::default();
    let url = start_status_server(statuses.clone()).await;
    let client = DeploymentsClient::new(&url).unwrap();

    let mut artifact = test_artifact();
    updater::run_deployment(
        &mut setup.ctx,
        &client,
        &mut setup.module,
        &mut artifact,
        Some("d1"),
    )
    .await
    .unwrap();

    assert_eq!(status_names(&statuses), ["downloading", "installing", "success"]);
    for (id, _) in statuses.lock().unwrap().iter() {
        assert_eq!(id, "d1");
    }

    // The module ran ArtifactInstall in its work dir.
    assert!(setup._dir.path().join("installed-marker").exists());
    // Cleanup removed the work dir.
    assert!(!setup.module.work_dir().exists());

    // The store now describes the new artifact; the old provides were
    // cleared by the wildcard before the new ones were applied.
    let store = setup.ctx.store();
    assert_eq!(store.read("artifact-name").unwrap(), b"release-2");
    assert_eq!(
        store.read("artifact-provides").unwrap(),
        br#"{"rootfs-image.version":"release-2"}"#
    );

    let provides = setup.ctx.load_provides().unwrap();
    assert_eq!(provides["artifact_name"], "release-2");
    assert_eq!(provides["rootfs-image.version"], "release-2");
}

#[tokio::test]
async fn failed_install_rolls_back_and_reports_failure() {
    let script = r#"#!/bin/sh
case "$1" in
    Download)
        exit 0
        ;;
    ArtifactInstall)
        exit 2
        ;;
    SupportsRollback)
        echo "Yes"
        ;;
    ArtifactRollback)
        touch ../../rollback-marker
        ;;
    ArtifactFailure)
        touch ../../failure-marker
        ;;
esac
exit 0
"#;
    let mut setup = setup(script);
    let statuses: Statuses = Default::default();
    let url = start_status_server(statuses.clone()).await;
    let client = DeploymentsClient::new(&url).unwrap();

    let mut artifact = test_artifact();
    let result = updater::run_deployment(
        &mut setup.ctx,
        &client,
        &mut setup.module,
        &mut artifact,
        Some("d1"),
    )
    .await;
    assert!(result.is_err());

    assert_eq!(status_names(&statuses), ["downloading", "installing", "failure"]);
    let captured = statuses.lock().unwrap();
    let failure_body = &captured.last().unwrap().1;
    assert!(
        failure_body["substate"]
            .as_str()
            .unwrap()
            .contains("ArtifactInstall"),
        "got {failure_body}"
    );
    drop(captured);

    // The module was rolled back and saw the failure.
    assert!(setup._dir.path().join("rollback-marker").exists());
    assert!(setup._dir.path().join("failure-marker").exists());
    assert!(!setup.module.work_dir().exists());

    // Device state is untouched.
    let store = setup.ctx.store();
    assert_eq!(store.read("artifact-name").unwrap(), b"release-1");
    assert_eq!(
        store.read("artifact-provides").unwrap(),
        br#"{"rootfs-image.version":"release-1"}"#
    );
}

#[tokio::test]
async fn failure_after_reboot_verifies_the_rollback_reboot() {
    let script = r#"#!/bin/sh
case "$1" in
    Download)
        exit 0
        ;;
    NeedsReboot)
        echo "Yes"
        ;;
    ArtifactCommit)
        exit 2
        ;;
    SupportsRollback)
        echo "Yes"
        ;;
    ArtifactRollback)
        touch ../../rollback-marker
        ;;
    ArtifactRollbackReboot)
        touch ../../rollback-reboot-marker
        ;;
    ArtifactVerifyRollbackReboot)
        touch ../../verify-rollback-reboot-marker
        ;;
    ArtifactFailure)
        touch ../../failure-marker
        ;;
esac
exit 0
"#;
    let mut setup = setup(script);
    let statuses: Statuses = Default::default();
    let url = start_status_server(statuses.clone()).await;
    let client = DeploymentsClient::new(&url).unwrap();

    let mut artifact = test_artifact();
    let result = updater::run_deployment(
        &mut setup.ctx,
        &client,
        &mut setup.module,
        &mut artifact,
        Some("d1"),
    )
    .await;
    assert!(result.is_err());

    assert_eq!(
        status_names(&statuses),
        ["downloading", "installing", "rebooting", "failure"]
    );

    // The reboot had happened, so the rollback ran its own reboot
    // sequence before the module saw the failure.
    assert!(setup._dir.path().join("rollback-marker").exists());
    assert!(setup._dir.path().join("rollback-reboot-marker").exists());
    assert!(setup._dir.path().join("verify-rollback-reboot-marker").exists());
    assert!(setup._dir.path().join("failure-marker").exists());
    assert!(!setup.module.work_dir().exists());

    // Device state is untouched.
    assert_eq!(setup.ctx.store().read("artifact-name").unwrap(), b"release-1");
}

#[tokio::test]
async fn reboot_sequence_runs_when_module_asks() {
    let script = r#"#!/bin/sh
case "$1" in
    Download)
        exit 0
        ;;
    NeedsReboot)
        echo "Yes"
        ;;
    ArtifactReboot)
        touch ../../reboot-marker
        ;;
    ArtifactVerifyReboot)
        touch ../../verify-reboot-marker
        ;;
    SupportsRollback)
        echo "No"
        ;;
esac
exit 0
"#;
    let mut setup = setup(script);
    let statuses: Statuses = Default::default();
    let url = start_status_server(statuses.clone()).await;
    let client = DeploymentsClient::new(&url).unwrap();

    let mut artifact = test_artifact();
    updater::run_deployment(
        &mut setup.ctx,
        &client,
        &mut setup.module,
        &mut artifact,
        Some("d1"),
    )
    .await
    .unwrap();

    assert_eq!(
        status_names(&statuses),
        ["downloading", "installing", "rebooting", "success"]
    );
    assert!(setup._dir.path().join("reboot-marker").exists());
    assert!(setup._dir.path().join("verify-reboot-marker").exists());
}
