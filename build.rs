// build.rs - Build metadata and feature checks for the EWS gateway
//
// Stamps the build environment variables read by `ews_gateway::build_info` and
// warns when the adapter feature set cannot produce the gateway binary.

use std::collections::HashSet;
use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=Cargo.toml");

    set_build_env_vars();

    // Only validate in non-test builds
    if env::var("CARGO_CFG_TEST").is_ok() {
        return;
    }

    let enabled_features = collect_enabled_features();
    print_build_summary(&enabled_features);
}

/// Set build environment variables that the code expects
fn set_build_env_vars() {
    println!(
        "cargo:rustc-env=EWS_BUILD_TIMESTAMP={}",
        chrono::Utc::now().to_rfc3339()
    );

    let rustc_version = Command::new("rustc")
        .arg("--version")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=EWS_RUSTC_VERSION={}", rustc_version);

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=EWS_TARGET={}", target);

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=EWS_PROFILE={}", profile);

    if let Ok(output) = Command::new("git").args(["rev-parse", "--short", "HEAD"]).output() {
        if output.status.success() {
            if let Ok(git_hash) = String::from_utf8(output.stdout) {
                println!("cargo:rustc-env=EWS_GIT_HASH={}", git_hash.trim());
            }
        }
    }
}

/// Collect all enabled feature flags from environment variables
fn collect_enabled_features() -> HashSet<String> {
    env::vars()
        .filter_map(|(key, _)| {
            key.strip_prefix("CARGO_FEATURE_")
                .map(|name| name.to_lowercase().replace('_', "-"))
        })
        .collect()
}

/// Print build summary
fn print_build_summary(features: &HashSet<String>) {
    let adapters = ["mqtt", "serial", "http"];
    let missing: Vec<_> = adapters
        .iter()
        .filter(|f| !features.contains(**f))
        .collect();

    if missing.len() == adapters.len() {
        println!("cargo:warning=No adapter features enabled - building alarm core only");
        return;
    }

    if !missing.is_empty() {
        println!(
            "cargo:warning=Gateway binary disabled, missing features: {}",
            missing
                .iter()
                .map(|f| format!("'{}'", f))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let target = env::var("TARGET").unwrap_or_default();
    if features.contains("serial") && target.contains("windows") {
        println!("cargo:warning=Serial device paths on Windows take the form COMx");
    }
}
