//! Build script for sqlprobe.
//!
//! With the `embedded-worker` feature enabled, copies a pre-built driver
//! worker binary into OUT_DIR so it can be embedded with `include_bytes!`.

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=worker/");
    println!("cargo:rerun-if-changed=build.rs");

    // Cargo exposes enabled features to build scripts as environment variables.
    if env::var_os("CARGO_FEATURE_EMBEDDED_WORKER").is_some() {
        copy_embedded_worker();
    }
}

fn copy_embedded_worker() {
    use std::fs;
    use std::path::PathBuf;

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let manifest_dir =
        PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    let worker_binary = out_dir.join("sqlprobe-worker");

    let prebuilt_paths = [
        manifest_dir.join("worker").join("bin").join("sqlprobe-worker"),
        manifest_dir.join("sqlprobe-worker"),
    ];

    for path in &prebuilt_paths {
        if path.exists() {
            fs::copy(path, &worker_binary).expect("Failed to copy pre-built worker binary");
            println!("cargo:warning=Embedding worker binary from {:?}", path);
            return;
        }
    }

    panic!(
        "Cannot embed worker: no pre-built sqlprobe-worker binary found.\n\
         Place one in worker/bin/ or the crate root."
    );
}
