//! Integration tests for the alignscan CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Raw image with an MBR and one primary partition starting at `first_lba`.
fn write_image(path: &Path, first_lba: u32) {
    let mut image = vec![0u8; 4096];
    image[446 + 4] = 0x83;
    image[446 + 8..446 + 12].copy_from_slice(&first_lba.to_le_bytes());
    image[446 + 12..446 + 16].copy_from_slice(&204_800u32.to_le_bytes());
    image[510] = 0x55;
    image[511] = 0xAA;
    fs::write(path, image).unwrap();
}

/// Command isolated from the user's configuration and environment
fn alignscan(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("alignscan").unwrap();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env_remove("RUST_LOG")
        .env_remove("ALIGNSCAN_CONNECT")
        .env_remove("ALIGNSCAN_CONFIG");
    cmd
}

fn write_inventory(dir: &TempDir) -> PathBuf {
    write_image(&dir.path().join("web.img"), 2048);
    write_image(&dir.path().join("db.img"), 8);
    write_image(&dir.path().join("legacy.img"), 63);

    let inventory = dir.path().join("domains.toml");
    fs::write(
        &inventory,
        r#"
[[domain]]
name = "web01"
uuid = "6b1d7e5e-0f4b-4c1e-9d6f-3a7c2b9e8d10"

[[domain.disk]]
path = "web.img"

[[domain]]
name = "db01"

[[domain.disk]]
path = "db.img"
"#,
    )
    .unwrap();
    inventory
}

#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    alignscan(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("alignment"));
}

#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    alignscan(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("alignscan"));
}

#[test]
fn test_aligned_image_exits_zero() {
    let dir = TempDir::new().unwrap();
    write_image(&dir.path().join("disk.img"), 2048);

    alignscan(&dir)
        .args(["-a", "disk.img"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("/dev/sda1"))
        .stdout(predicate::str::contains("1048576"))
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn test_sector_aligned_image_exits_three() {
    let dir = TempDir::new().unwrap();
    write_image(&dir.path().join("disk.img"), 63);

    alignscan(&dir)
        .args(["scan", "-a", "disk.img"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("bad (alignment < 4K)"));
}

#[test]
fn test_4k_aligned_image_exits_two() {
    let dir = TempDir::new().unwrap();
    write_image(&dir.path().join("disk.img"), 8);

    alignscan(&dir)
        .args(["-a", "disk.img"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("bad (alignment < 64K)"));
}

#[test]
fn test_2k_aligned_image_flags_4k_but_exits_two() {
    let dir = TempDir::new().unwrap();
    write_image(&dir.path().join("disk.img"), 4);

    alignscan(&dir)
        .args(["-a", "disk.img"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("bad (alignment < 4K)"));
}

#[test]
fn test_quiet_prints_nothing() {
    let dir = TempDir::new().unwrap();
    write_image(&dir.path().join("disk.img"), 63);

    alignscan(&dir)
        .args(["-q", "-a", "disk.img"])
        .assert()
        .code(3)
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_worst_disk_decides_single_guest() {
    let dir = TempDir::new().unwrap();
    write_image(&dir.path().join("a.img"), 2048);
    write_image(&dir.path().join("b.img"), 8);

    alignscan(&dir)
        .args(["-a", "a.img", "-a", "b.img"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("/dev/sda1"))
        .stdout(predicate::str::contains("/dev/sdb1"));
}

#[test]
fn test_missing_image_is_an_error() {
    let dir = TempDir::new().unwrap();
    alignscan(&dir)
        .args(["-a", "nope.img"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nope.img"));
}

#[test]
fn test_inventory_scan_in_input_order() {
    let dir = TempDir::new().unwrap();
    write_inventory(&dir);

    let assert = alignscan(&dir)
        .args(["-c", "domains.toml", "-P", "2"])
        .assert()
        .code(2);

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "unexpected output:\n{stdout}");
    // Inventory order is sorted by name
    assert!(lines[0].starts_with("db01:/dev/sda1"));
    assert!(lines[1].starts_with("web01:/dev/sda1"));
}

#[test]
fn test_inventory_scan_with_uuids() {
    let dir = TempDir::new().unwrap();
    write_inventory(&dir);

    alignscan(&dir)
        .args(["--uuid", "-c", "file://domains.toml"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains(
            "6b1d7e5e-0f4b-4c1e-9d6f-3a7c2b9e8d10:/dev/sda1",
        ));
}

#[test]
fn test_domain_selected_from_inventory() {
    let dir = TempDir::new().unwrap();
    write_inventory(&dir);

    alignscan(&dir)
        .args(["-c", "domains.toml", "-d", "web01"])
        .assert()
        .code(0)
        .stdout(predicate::str::starts_with("/dev/sda1"));
}

#[test]
fn test_broken_domain_exits_one_but_others_report() {
    let dir = TempDir::new().unwrap();
    write_inventory(&dir);
    fs::write(
        dir.path().join("broken.toml"),
        r#"
[[domain]]
name = "ghost"

[[domain.disk]]
path = "missing.img"

[[domain]]
name = "web01"

[[domain.disk]]
path = "web.img"
"#,
    )
    .unwrap();

    alignscan(&dir)
        .args(["-c", "broken.toml"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("web01:/dev/sda1"))
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_connect_from_project_config() {
    let dir = TempDir::new().unwrap();
    write_inventory(&dir);
    fs::write(dir.path().join("alignscan.toml"), "connect = \"domains.toml\"\n").unwrap();

    alignscan(&dir)
        .arg("-q")
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_no_inventory_configured() {
    let dir = TempDir::new().unwrap();
    alignscan(&dir)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no domain inventory configured"));
}

#[test]
fn test_uuid_rejected_with_add() {
    let dir = TempDir::new().unwrap();
    write_image(&dir.path().join("disk.img"), 2048);

    alignscan(&dir)
        .args(["--uuid", "-a", "disk.img"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--uuid"));
}

#[test]
fn test_invalid_thread_count() {
    let dir = TempDir::new().unwrap();
    alignscan(&dir).args(["-P", "lots"]).assert().code(1);
}

#[test]
fn test_blocksize_applies_to_following_images() {
    let dir = TempDir::new().unwrap();
    write_image(&dir.path().join("a.img"), 2048);
    write_image(&dir.path().join("b.img"), 2048);

    // b.img is read with 4096-byte sectors, so its partition starts at 8M
    alignscan(&dir)
        .args(["-a", "a.img", "--blocksize", "4096", "-a", "b.img"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("/dev/sda1      1048576"))
        .stdout(predicate::str::contains("/dev/sdb1      8388608"));
}

#[test]
fn test_trailing_format_rejected() {
    let dir = TempDir::new().unwrap();
    write_image(&dir.path().join("disk.img"), 2048);

    alignscan(&dir)
        .args(["-a", "disk.img", "--format", "raw"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not followed by any -a image"));
}

#[test]
fn test_config_show_json() {
    let dir = TempDir::new().unwrap();
    alignscan(&dir)
        .args(["config", "show", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"severe_code\": 3"));
}
