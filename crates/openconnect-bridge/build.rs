use std::env;

fn main() {
    // Rebuild if the progress shim changes.
    println!("cargo:rerun-if-changed=bridge/progress.c");
    println!("cargo:rerun-if-env-changed=OPENCONNECT_LIB_DIR");

    if env::var("CARGO_FEATURE_NATIVE").is_err() {
        // The scripted engine needs no native code.
        return;
    }

    let mut build = cc::Build::new();
    build.file("bridge/progress.c");
    build.warnings(true);
    build.compile("openconnect_bridge_shim");

    if let Ok(dir) = env::var("OPENCONNECT_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }
    println!("cargo:rustc-link-lib=openconnect");
}
