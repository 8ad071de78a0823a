//! Build script for detecting system dependencies and providing installation guidance.
//!
//! The `OpenCV` checks only run when the `opencv` feature is enabled; the
//! default build has no system library requirements.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    if env::var_os("CARGO_FEATURE_OPENCV").is_some() {
        // Check for pkg-config
        check_pkg_config();

        // Check for OpenCV
        check_opencv();
    }

    if env::var_os("CARGO_FEATURE_ONNX").is_some() {
        println!("cargo:rerun-if-env-changed=ORT_STRATEGY");
        println!("cargo:rerun-if-env-changed=ORT_LIB_LOCATION");
    }

    // Print detected environment
    println!(
        "cargo:rustc-env=BUILD_TARGET={}",
        env::var("TARGET").unwrap_or_default()
    );
}

fn pkg_config_version(args: &[&str]) -> Option<String> {
    let output = Command::new("pkg-config").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn check_opencv() {
    println!("cargo:rerun-if-env-changed=PKG_CONFIG_PATH");
    println!("cargo:rerun-if-env-changed=OPENCV_LINK_PATHS");
    println!("cargo:rerun-if-env-changed=OPENCV_INCLUDE_PATHS");

    // opencv4 first, then the legacy package name
    match pkg_config_version(&["--modversion", "opencv4"]).or_else(|| pkg_config_version(&["--modversion", "opencv"])) {
        Some(version) => println!("cargo:warning=Found OpenCV version: {version}"),
        None => {
            println!("cargo:warning=OpenCV not found via pkg-config. Webcam capture needs OpenCV with videoio and objdetect.");
            println!("cargo:warning=On Ubuntu: sudo apt-get install libopencv-dev clang libclang-dev");
            println!("cargo:warning=On macOS: brew install opencv");
            println!("cargo:warning=Or build without `--features opencv` and run with `--source pattern`");
        }
    }
}

fn check_pkg_config() {
    if pkg_config_version(&["--version"]).is_none() {
        println!("cargo:warning=pkg-config not found. This is required to find OpenCV.");
        println!("cargo:warning=On Ubuntu: sudo apt-get install pkg-config");
        println!("cargo:warning=On macOS: brew install pkg-config");
    }
}
