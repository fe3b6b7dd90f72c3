use std::env;
use std::process::Command;

fn main() {
    // Build metadata surfaced by flexguard::version_info()
    let build_date = chrono::Utc::now()
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string();
    println!("cargo:rustc-env=BUILD_DATE={build_date}");

    // Set Rust version
    let rustc_version = env::var("RUSTC_VERSION").unwrap_or_else(|_| {
        String::from_utf8(
            Command::new("rustc")
                .arg("--version")
                .output()
                .map(|output| output.stdout)
                .unwrap_or_default(),
        )
        .unwrap_or_default()
        .trim()
        .to_string()
    });
    println!("cargo:rustc-env=RUST_VERSION={rustc_version}");

    println!("cargo:rustc-env=GIT_COMMIT={}", git(&["rev-parse", "--short", "HEAD"]));
    println!(
        "cargo:rustc-env=GIT_BRANCH={}",
        git(&["rev-parse", "--abbrev-ref", "HEAD"])
    );

    // Tell cargo to re-run this build script if any of these change
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
    println!("cargo:rerun-if-changed=Cargo.toml");
}

/// Run a git query, falling back to "unknown" outside a repository.
fn git(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
