use std::path::Path;
use std::process::Command;

fn main() {
    // Short commit of the tree being built
    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let build_date = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    println!("cargo:rustc-env=WIREJUMP_BUILD_COMMIT={}", commit);
    println!("cargo:rustc-env=WIREJUMP_BUILD_DATE={}", build_date);

    // Rebuild if git state changes; the repository root is two levels up
    let git_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../.git");
    println!("cargo:rerun-if-changed={}", git_dir.join("HEAD").display());
    println!("cargo:rerun-if-changed={}", git_dir.join("refs").display());
}
