//! CLI end-to-end tests
//!
//! Tests for the clipshrink command-line interface.

mod common;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the clipshrink binary
#[allow(deprecated)]
fn clipshrink_cmd() -> Command {
    Command::cargo_bin("clipshrink").unwrap()
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// Basics
// ---------------------------------------------------------------------------

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = clipshrink_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = clipshrink_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("clipshrink"))
        .stdout(predicate::str::contains("compress"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = clipshrink_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

// ---------------------------------------------------------------------------
// probe
// ---------------------------------------------------------------------------

#[test]
fn test_probe_missing_file() {
    let mut cmd = clipshrink_cmd();
    cmd.args(["probe", "/nonexistent/clip.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_probe_not_a_video() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("notes.mp4");
    fs::write(&path, b"definitely not an mp4 file").unwrap();

    let mut cmd = clipshrink_cmd();
    cmd.arg("probe").arg(&path).assert().failure();
}

#[test]
fn test_probe_text_output() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());

    let mut cmd = clipshrink_cmd();
    cmd.arg("probe")
        .arg(&clip)
        .assert()
        .success()
        .stdout(predicate::str::contains("640x360"))
        .stdout(predicate::str::contains("60 frames"))
        .stdout(predicate::str::contains("44100 Hz"));
}

#[test]
fn test_probe_json_output() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());

    let json = json_stdout(clipshrink_cmd().arg("probe").arg(&clip).arg("--json"));
    assert_eq!(json["width"], 640);
    assert_eq!(json["height"], 360);
    assert_eq!(json["frame_count"], 60);
    assert_eq!(json["rotation"], "None");
    assert_eq!(json["audio"]["sample_rate"], 44100);
    assert_eq!(json["audio"]["channels"], 2);
    assert!((json["estimated_bitrate_bps"].as_f64().unwrap() - 360_000.0).abs() < 1e-3);
}

#[test]
fn test_probe_reports_rotation() {
    let dir = tempdir().unwrap();
    let clip = common::rotated_clip(dir.path());

    let json = json_stdout(clipshrink_cmd().arg("probe").arg(&clip).arg("--json"));
    assert_eq!(json["rotation"], "Cw90");
    assert!(json["audio"].is_null());
}

// ---------------------------------------------------------------------------
// estimate
// ---------------------------------------------------------------------------

#[test]
fn test_estimate_all_tiers() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());

    let json = json_stdout(clipshrink_cmd().arg("estimate").arg(&clip).arg("--json"));
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0]["quality"], "very-high");
    assert_eq!(rows[4]["quality"], "very-low");
    assert_eq!(rows[2]["quality"], "medium");
    assert_eq!(rows[2]["estimated_size_bytes"], 27_000);

    let sizes: Vec<i64> = rows
        .iter()
        .map(|r| r["estimated_size_bytes"].as_i64().unwrap())
        .collect();
    assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn test_estimate_single_tier() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());

    let json = json_stdout(
        clipshrink_cmd()
            .arg("estimate")
            .arg(&clip)
            .args(["--quality", "very-low", "--json"]),
    );
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["quality"], "very-low");
}

#[test]
fn test_estimate_text_output() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());

    let mut cmd = clipshrink_cmd();
    cmd.arg("estimate")
        .arg(&clip)
        .assert()
        .success()
        .stdout(predicate::str::contains("very-high"))
        .stdout(predicate::str::contains("27.0 KB"));
}

#[test]
fn test_estimate_rejects_unknown_tier() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());

    let mut cmd = clipshrink_cmd();
    cmd.arg("estimate")
        .arg(&clip)
        .args(["--quality", "ultra"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown quality tier"));
}

// ---------------------------------------------------------------------------
// compress
// ---------------------------------------------------------------------------

#[test]
fn test_compress_simulated() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());
    let expected = dir.path().join("clip-compressed.mp4");

    let mut cmd = clipshrink_cmd();
    cmd.current_dir(dir.path())
        .arg("compress")
        .arg(&clip)
        .arg("--simulate")
        .assert()
        .success()
        .stdout(predicate::str::contains("clip-compressed.mp4"))
        .stdout(predicate::str::contains("Frames: 60/60"));

    assert!(expected.exists());
}

#[test]
fn test_compress_explicit_output_and_quality() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());
    let output = dir.path().join("small.mp4");

    let mut cmd = clipshrink_cmd();
    cmd.current_dir(dir.path())
        .arg("compress")
        .arg(&clip)
        .arg("--output")
        .arg(&output)
        .args(["--quality", "low", "--simulate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Quality: low"));

    assert!(output.exists());
}

#[test]
fn test_compress_refuses_existing_output() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());
    let output = dir.path().join("clip-compressed.mp4");
    fs::write(&output, b"keep me").unwrap();

    let mut cmd = clipshrink_cmd();
    cmd.current_dir(dir.path())
        .arg("compress")
        .arg(&clip)
        .arg("--simulate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    assert_eq!(fs::read(&output).unwrap(), b"keep me");
}

#[test]
fn test_compress_overwrite_replaces_output() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());
    let output = dir.path().join("clip-compressed.mp4");
    fs::write(&output, b"stale").unwrap();

    let mut cmd = clipshrink_cmd();
    cmd.current_dir(dir.path())
        .arg("compress")
        .arg(&clip)
        .args(["--simulate", "--overwrite"])
        .assert()
        .success();

    assert_ne!(fs::read(&output).unwrap(), b"stale");
}

#[test]
fn test_compress_uses_config_output_settings() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());
    let out_dir = dir.path().join("out");
    fs::create_dir(&out_dir).unwrap();

    let config_path = dir.path().join("clipshrink.toml");
    fs::write(
        &config_path,
        format!(
            "[transcode]\nquality = \"high\"\noutput_suffix = \"_small\"\n\n[output]\ndirectory = {:?}\n",
            out_dir.to_string_lossy()
        ),
    )
    .unwrap();

    let mut cmd = clipshrink_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config_path)
        .arg("compress")
        .arg(&clip)
        .arg("--simulate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Quality: high"));

    assert!(out_dir.join("clip_small.mp4").exists());
}

#[test]
fn test_compress_missing_input() {
    let dir = tempdir().unwrap();

    let mut cmd = clipshrink_cmd();
    cmd.current_dir(dir.path())
        .args(["compress", "missing.mp4", "--simulate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[cfg(not(feature = "native-ffmpeg"))]
#[test]
fn test_compress_requires_native_backend() {
    let dir = tempdir().unwrap();
    let clip = common::clip_with_audio(dir.path());

    let mut cmd = clipshrink_cmd();
    cmd.current_dir(dir.path())
        .arg("compress")
        .arg(&clip)
        .assert()
        .failure()
        .stderr(predicate::str::contains("native-ffmpeg"));

    assert!(!dir.path().join("clip-compressed.mp4").exists());
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

#[test]
fn test_validate_valid_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("clipshrink.toml");
    fs::write(
        &config_path,
        "[transcode]\nquality = \"very-high\"\nreadiness_timeout_ms = 25\n",
    )
    .unwrap();

    let mut cmd = clipshrink_cmd();
    cmd.arg("validate")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Quality: very-high"))
        .stdout(predicate::str::contains("25 ms"));
}

#[test]
fn test_validate_invalid_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("clipshrink.toml");
    fs::write(&config_path, "[transcode]\nreadiness_timeout_ms = 0\n").unwrap();

    let mut cmd = clipshrink_cmd();
    cmd.arg("validate")
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("readiness_timeout_ms"));
}

#[test]
fn test_validate_defaults() {
    let dir = tempdir().unwrap();

    let mut cmd = clipshrink_cmd();
    cmd.current_dir(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("Quality: medium"));
}
