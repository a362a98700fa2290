//! Stamps the gateway binary with the source revision reported by `/health`.
//!
//! Release tarballs carry no `.git`, so a `BLASTER_GIT_SHA` set in the build
//! environment wins over asking git.

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=BLASTER_GIT_SHA");
    let sha = std::env::var("BLASTER_GIT_SHA")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(git_short_sha)
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=BLASTER_GIT_SHA={sha}");

    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=BLASTER_BUILD_PROFILE={profile}");

    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/refs/");
}

fn git_short_sha() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}
