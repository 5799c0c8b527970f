fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=MERKLE_TREE_LIB_DIR");

    // Only link the native verifier when it was asked for
    if std::env::var_os("CARGO_FEATURE_NATIVE").is_none() {
        return Ok(());
    }

    let lib_dir = std::env::var("MERKLE_TREE_LIB_DIR").map_err(|_| {
        "feature `native` requires MERKLE_TREE_LIB_DIR to point at the directory \
         holding libmerkle_tree"
    })?;
    if !std::path::Path::new(&lib_dir).exists() {
        return Err(format!("MERKLE_TREE_LIB_DIR does not exist: {}", lib_dir).into());
    }

    println!("cargo:rustc-link-search=native={}", lib_dir);
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "macos" {
        println!("cargo:rustc-link-lib=dylib=merkle_tree");
    } else {
        // The static archive pulls in these system libraries.
        println!("cargo:rustc-link-lib=static=merkle_tree");
        for lib in ["dl", "rt", "m", "ssl", "crypto"] {
            println!("cargo:rustc-link-lib={}", lib);
        }
    }

    Ok(())
}
