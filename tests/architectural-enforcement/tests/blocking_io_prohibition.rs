//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production code in `forge-core` runs on the async
//! runtime and MUST NOT use blocking I/O or blocking sleeps.
//! **Required**: `tokio::net`, `tokio::fs`, `tokio::time::sleep` -
//! not `std::net` sockets, `std::fs`, `std::thread::sleep`, or
//! `reqwest::blocking`.
//!
//! Test code (anything after a `#[cfg(test)]` marker) is exempt; so is
//! the CLI crate, which wraps its terminal reads in `spawn_blocking`.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Patterns that indicate blocking I/O on the runtime.
const FORBIDDEN_IO: &[&str] = &[
    "std::net::TcpStream",
    "std::net::TcpListener",
    "std::net::UdpSocket",
    "std::fs::",
    "std::process::Command",
    "reqwest::blocking",
];

/// Patterns that indicate a blocking sleep.
const FORBIDDEN_SLEEP: &[&str] = &["std::thread::sleep", "thread::sleep"];

fn core_src() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../forge/core/src")
}

#[test]
fn test_no_blocking_io_in_core() {
    let violations = scan(&core_src(), FORBIDDEN_IO);
    assert!(
        violations.is_empty(),
        "Blocking I/O in forge-core production code:\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_no_blocking_sleep_in_core() {
    let violations = scan(&core_src(), FORBIDDEN_SLEEP);
    assert!(
        violations.is_empty(),
        "Blocking sleep in forge-core production code:\n{}",
        violations.join("\n")
    );
}

/// Scan production lines of every source file under `root` for the
/// given patterns. Everything from the first `#[cfg(test)]` marker to
/// the end of the file is test code and exempt.
fn scan(root: &Path, patterns: &[&str]) -> Vec<String> {
    let mut violations = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if entry.path().extension().map(|e| e == "rs") != Some(true) {
            continue;
        }
        let Ok(source) = fs::read_to_string(entry.path()) else {
            continue;
        };

        for (number, line) in source.lines().enumerate() {
            if line.contains("#[cfg(test)]") {
                break;
            }
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                continue;
            }
            for pattern in patterns {
                if trimmed.contains(pattern) {
                    violations.push(format!(
                        "  {}:{}: {}",
                        entry.path().display(),
                        number + 1,
                        trimmed
                    ));
                }
            }
        }
    }

    violations
}
