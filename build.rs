use std::path::Path;
use std::process::Command;

/// Emits `SERIES_LIST_VERSION` for `--version`:
/// `0.3.0 (1a2b3c4d5e release)` in a git checkout, `0.3.0 (release)` from a
/// source tarball or when git is unavailable. A `-dirty` suffix marks
/// uncommitted changes.
fn main() {
    let version = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let profile = std::env::var("PROFILE").unwrap_or_default();

    let revision = if Path::new(".git").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
        println!("cargo:rerun-if-changed=.git/index");
        git_revision()
    } else {
        None
    };
    println!("cargo:rerun-if-changed=build.rs");

    let full = match revision {
        Some(rev) => format!("{version} ({rev} {profile})"),
        None => format!("{version} ({profile})"),
    };
    println!("cargo:rustc-env=SERIES_LIST_VERSION={full}");
}

fn git_revision() -> Option<String> {
    let hash = git(&["rev-parse", "--short=10", "HEAD"])?;
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
        .is_some_and(|s| !s.is_empty());
    Some(if dirty { format!("{hash}-dirty") } else { hash })
}

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}
