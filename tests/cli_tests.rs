//! CLI integration tests
//!
//! These tests run the kiln binary against temporary sites and check exit
//! codes and outputs. Tests that change the working directory run serially.

use std::fs;
use std::path::Path;
use std::process::Command;
use serial_test::serial;
use tempfile::TempDir;

use kiln::config::find_site_root;

fn kiln() -> Command {
    Command::new(env!("CARGO_BIN_EXE_kiln"))
}

fn site() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("site.toml"), "name = \"CLI\"\n").unwrap();
    fs::create_dir_all(dir.path().join("pages/docs")).unwrap();
    fs::write(dir.path().join("pages/index.md"), "---\ntitle: Home\n---\n# Hello\n").unwrap();
    dir
}

fn run_in(dir: &Path, args: &[&str]) -> std::process::Output {
    kiln().args(args).current_dir(dir).env("RUST_LOG", "warn").output().expect("Failed to execute kiln")
}

#[test]
fn test_build_with_dir_flag() {
    let dir = site();
    let output = kiln()
        .arg("build")
        .arg("-C")
        .arg(dir.path())
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute kiln");

    assert!(output.status.success(), "Build failed: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Build complete"));
    assert!(stdout.contains("Pages: 1"));
    let html = fs::read_to_string(dir.path().join("out/index.html")).unwrap();
    assert!(html.contains("<h1>Hello</h1>"));
}

#[test]
fn test_build_json_summary() {
    let dir = site();
    let output = run_in(dir.path(), &["build", "--json"]);
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["pages"], 1);
    assert_eq!(summary["posts"], 0);
    assert!(summary["duration_ms"].is_u64());
}

#[test]
fn test_build_url_override() {
    let dir = site();
    fs::write(
        dir.path().join("site.toml"),
        "name = \"CLI\"\nurl = \"https://example.com\"\nsitemap = \"sitemap.xml\"\n",
    )
    .unwrap();
    let output = run_in(dir.path(), &["build", "--url", "https://preview.example.com"]);
    assert!(output.status.success(), "Build failed: {}", String::from_utf8_lossy(&output.stderr));

    let sitemap = fs::read_to_string(dir.path().join("out/sitemap.xml")).unwrap();
    assert!(sitemap.contains("<loc>https://preview.example.com/</loc>"));
    assert!(!sitemap.contains("https://example.com/"));
}

#[test]
fn test_build_finds_root_from_subdirectory() {
    let dir = site();
    let output = run_in(&dir.path().join("pages/docs"), &["build"]);
    assert!(output.status.success(), "Build failed: {}", String::from_utf8_lossy(&output.stderr));
    assert!(dir.path().join("out/index.html").is_file());
}

#[test]
fn test_missing_site_is_invalid_args() {
    let dir = TempDir::new().unwrap();
    let output = kiln().arg("build").arg("-C").arg(dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("site.toml not found"));
}

#[test]
fn test_build_error_exit_code() {
    let dir = site();
    fs::write(dir.path().join("pages/bad.html"), "---\nlayout: nowhere\n---\nx").unwrap();
    let output = run_in(dir.path(), &["build"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("layout \"nowhere\" not found"));
}

#[test]
fn test_clean_command() {
    let dir = site();
    assert!(run_in(dir.path(), &["build"]).status.success());
    assert!(dir.path().join("out").is_dir());

    let output = run_in(dir.path(), &["clean"]);
    assert!(output.status.success());
    assert!(!dir.path().join("out").exists());

    let output = run_in(dir.path(), &["clean"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Nothing to clean"));
}

#[test]
#[serial]
fn test_find_site_root_from_working_directory() {
    let dir = site();
    let original = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path().join("pages/docs")).unwrap();
    let found = find_site_root();
    std::env::set_current_dir(original).unwrap();

    let expected = dir.path().canonicalize().unwrap();
    assert_eq!(found.map(|p| p.canonicalize().unwrap()), Some(expected));
}
