use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=ROCM_PATH");
    println!("cargo:rerun-if-changed=build.rs");

    // Native libraries are only needed for the FFI facility.
    if env::var_os("CARGO_FEATURE_ROCM").is_none() {
        return;
    }

    let rocm_path = env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".to_string());
    let lib_dir = PathBuf::from(rocm_path).join("lib");
    if !lib_dir.exists() {
        println!(
            "cargo:warning=ROCm library directory not found at {}",
            lib_dir.display()
        );
    }
    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=dylib=roctracer64");
    println!("cargo:rustc-link-lib=dylib=amdhip64");
}
