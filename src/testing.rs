//! Shell-script stand-ins for ffmpeg used by unit tests

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script into `dir` and return its path
pub(crate) fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Fake ffmpeg that logs its arguments one per line, creates the final
/// argument as an empty file and exits 0
pub(crate) fn ffmpeg_ok(dir: &Path) -> (PathBuf, PathBuf) {
    let log = dir.join("ffmpeg_args.log");
    let body = format!(
        "for a in \"$@\"; do echo \"$a\" >> '{log}'; done\necho '--' >> '{log}'\nfor last; do :; done\n: > \"$last\"\nexit 0",
        log = log.display()
    );
    (script(dir, "ffmpeg-ok", &body), log)
}

/// Fake ffmpeg that prints a diagnostic on stderr and exits 1
pub(crate) fn ffmpeg_failing(dir: &Path, stderr: &str) -> PathBuf {
    script(
        dir,
        "ffmpeg-fail",
        &format!("echo '{}' >&2\nexit 1", stderr),
    )
}

/// Logged argument lists, one `Vec` per invocation
pub(crate) fn invocations(log: &Path) -> Vec<Vec<String>> {
    let content = std::fs::read_to_string(log).unwrap_or_default();
    let mut calls = Vec::new();
    let mut current = Vec::new();
    for line in content.lines() {
        if line == "--" {
            calls.push(std::mem::take(&mut current));
        } else {
            current.push(line.to_string());
        }
    }
    calls
}
