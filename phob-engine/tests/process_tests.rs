//! Containers run through a real interpreter process.

#![cfg(unix)]

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use common::*;
use phob_engine::{
    EngineConfig, Executor, HandOff, LoadError, Phob, ProcessExecutor, SkipList, Stage,
};
use phob_license::DeviceBinding;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const MAIN_SH: &str = "test \"$(cat settings.txt)\" = ready\n";

fn engine(exec: ProcessExecutor) -> Phob {
    Phob::new(EngineConfig {
        secrets: Some(secrets()),
        ..Default::default()
    })
    .with_device(device(1, 2, 3))
    .with_executor(Arc::new(exec))
}

fn build_tree(phob: &Phob, src: &Path, out: &Path, entry: &str, skip: &[&str]) -> PathBuf {
    let config = build_config(DeviceBinding::Any)
        .with_entry(entry)
        .with_skip(SkipList::new(skip).unwrap());
    phob.build(src, &out.join("dist"), &config).unwrap().container
}

#[test]
fn skipped_files_resolve_next_to_container() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_file(src.path(), "main.sh", MAIN_SH.as_bytes());
    write_file(src.path(), "settings.txt", b"ready");

    let phob = engine(ProcessExecutor::new("sh"));
    let container = build_tree(&phob, src.path(), out.path(), "main.sh", &["settings.txt"]);
    assert_ne!(std::env::current_dir().unwrap(), out.path().join("dist"));

    let outcome = phob.run(&container).unwrap();
    assert_eq!(outcome.report.exit_code, 0);
}

#[test]
fn interpreter_failure_is_a_runtime_error() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_file(src.path(), "main.sh", MAIN_SH.as_bytes());
    write_file(src.path(), "settings.txt", b"ready");

    // Protected, so it is not on disk next to the container.
    let phob = engine(ProcessExecutor::new("sh"));
    let container = build_tree(&phob, src.path(), out.path(), "main.sh", &[]);

    let err = phob.run(&container).unwrap_err();
    assert!(matches!(err, LoadError::Execution(_)), "{err:?}");
    assert_eq!(err.stage(), Stage::Runtime);
}

#[test]
fn php_hand_off_carries_every_protected_file() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    sample_tree(src.path());
    write_file(src.path(), "settings.txt", b"ready");

    // Stands in for php: stores the script it is given in its working directory.
    let capture = ProcessExecutor::new("sh")
        .with_args(["-c", "cat > handed-off.php"])
        .with_hand_off(HandOff::Php);
    let phob = engine(capture);
    let container = build_tree(&phob, src.path(), out.path(), "index.php", &["settings.txt"]);
    let root = container.parent().unwrap().canonicalize().unwrap();

    phob.run(&container).unwrap();

    let script = fs::read_to_string(root.join("handed-off.php")).unwrap();
    assert!(script.starts_with("<?php"));
    assert!(script.contains(&STANDARD.encode(root.to_string_lossy().as_bytes())));
    for (path, original) in [
        ("index.php", INDEX_PHP.as_bytes()),
        ("lib/util.php", UTIL_PHP.as_bytes()),
        ("config.php", CONFIG_PHP.as_bytes()),
        ("assets/logo.png", LOGO_PNG),
    ] {
        assert!(script.contains(&STANDARD.encode(path)), "{path} not mounted");
        assert!(script.contains(&STANDARD.encode(original)), "{path} contents missing");
    }
    assert!(!script.contains("SECRET_MARKER"));
    assert!(!script.contains(&STANDARD.encode("settings.txt")));
}

const APP_PHP: &str = r#"<?php
require 'lib/util.php';
require __DIR__ . '/lib/text.php';
$config = require 'config.php';
if (greet('world') !== 'hello world') exit(11);
if (shout('hi') !== 'HI') exit(12);
if ($config['db'] !== 'sqlite') exit(13);
if (trim(file_get_contents('settings.txt')) !== 'ready') exit(14);
if (!is_file('lib/util.php') || !is_dir('lib')) exit(15);
"#;

const TEXT_PHP: &str = "<?php\nfunction shout($s) { return strtoupper($s); }\n";

#[test]
fn php_tree_with_includes_runs() {
    let php = ProcessExecutor::default();
    if let Err(reason) = php.available() {
        eprintln!("skipping: {reason}");
        return;
    }

    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_file(src.path(), "index.php", APP_PHP.as_bytes());
    write_file(src.path(), "lib/util.php", UTIL_PHP.as_bytes());
    write_file(src.path(), "lib/text.php", TEXT_PHP.as_bytes());
    write_file(src.path(), "config.php", CONFIG_PHP.as_bytes());
    write_file(src.path(), "settings.txt", b"ready\n");

    let phob = engine(php);
    let container = build_tree(&phob, src.path(), out.path(), "index.php", &["settings.txt"]);

    let outcome = phob.run(&container).unwrap();
    assert_eq!(outcome.files, 4);
    assert_eq!(
        dir_entries(container.parent().unwrap()),
        vec!["app.phob", "settings.txt"]
    );
}
