//! ---
//! tb_section: "01-core-functionality"
//! tb_subsection: "tests"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Settings loading tests."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;

use testbus_common::{BrokerFlavor, BrokerSettings, CodecKind, DeliveryMode};

#[test]
fn load_picks_first_existing_candidate() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("testbus.toml");
    fs::write(&present, "flavor = \"kafka\"\ncodec = \"cbor\"\n").expect("write settings");

    let loaded = BrokerSettings::load_with_source(&[missing, present.clone()]).expect("load");
    assert_eq!(loaded.source, present);
    assert_eq!(loaded.settings.flavor, BrokerFlavor::Kafka);
    assert_eq!(loaded.settings.codec, CodecKind::Cbor);
    assert_eq!(loaded.settings.flavor.default_mode(), DeliveryMode::Broadcast);
}

#[test]
fn load_reports_inspected_paths_when_nothing_exists() {
    let candidates = [PathBuf::from("/nonexistent/testbus.toml")];
    let err = BrokerSettings::load(&candidates).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/testbus.toml"));
}

#[test]
fn invalid_file_surfaces_path_in_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("broken.toml");
    fs::write(&path, "flavor = \"carrier-pigeon\"\n").expect("write settings");

    let err = BrokerSettings::load(&[path.clone()]).unwrap_err();
    assert!(format!("{err:#}").contains("broken.toml"));
}
