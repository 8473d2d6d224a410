#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("smartconnect-backup-src");
    let workspace2 = temp_dir("smartconnect-backup-dst");
    let out_dir = temp_dir("smartconnect-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("smartconnect.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.join("nested").join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], serde_json::json!(backup::BUNDLE_FORMAT_V1));
    assert_eq!(manifest["dbSha256"], serde_json::json!(export.db_sha256));
    archive
        .by_name("db/smartconnect.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(import.db_sha256, export.db_sha256);

    let restored = std::fs::read(workspace2.join("smartconnect.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    assert!(!workspace2.join("smartconnect.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn export_requires_a_database() {
    let workspace = temp_dir("smartconnect-backup-empty");
    let err = backup::export_workspace_bundle(&workspace, &workspace.join("out.zip"))
        .expect_err("export without database");
    assert!(err.to_string().contains("workspace database not found"));
    let _ = std::fs::remove_dir_all(workspace);
}

fn write_bundle(path: &PathBuf, manifest: serde_json::Value, db: &[u8]) {
    let f = File::create(path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(f);
    let opts = zip::write::FileOptions::default();
    zip.start_file("manifest.json", opts).expect("start manifest");
    zip.write_all(manifest.to_string().as_bytes())
        .expect("write manifest");
    zip.start_file("db/smartconnect.sqlite3", opts)
        .expect("start db");
    zip.write_all(db).expect("write db");
    zip.finish().expect("finish zip");
}

#[test]
fn import_rejects_checksum_mismatch_and_unknown_format() {
    let out_dir = temp_dir("smartconnect-backup-bad");
    let workspace = temp_dir("smartconnect-backup-bad-dst");
    std::fs::write(workspace.join("smartconnect.sqlite3"), b"keep-me").expect("write existing db");

    let tampered = out_dir.join("tampered.zip");
    write_bundle(
        &tampered,
        serde_json::json!({ "format": backup::BUNDLE_FORMAT_V1, "dbSha256": "00" }),
        b"payload",
    );
    let err = backup::import_workspace_bundle(&tampered, &workspace).expect_err("checksum mismatch");
    assert!(err.to_string().contains("checksum mismatch"), "{}", err);

    let foreign = out_dir.join("foreign.zip");
    write_bundle(
        &foreign,
        serde_json::json!({ "format": "someone-else-v9", "dbSha256": "00" }),
        b"payload",
    );
    let err = backup::import_workspace_bundle(&foreign, &workspace).expect_err("unknown format");
    assert!(err.to_string().contains("unsupported bundle format"), "{}", err);

    let not_zip = out_dir.join("plain.sqlite3");
    std::fs::write(&not_zip, b"raw sqlite bytes").expect("write raw file");
    assert!(backup::import_workspace_bundle(&not_zip, &workspace).is_err());

    let kept = std::fs::read(workspace.join("smartconnect.sqlite3")).expect("read existing db");
    assert_eq!(kept, b"keep-me");

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
