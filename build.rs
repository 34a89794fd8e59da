use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders");
    println!("cargo:rustc-check-cfg=cfg(has_resize_shader)");

    // write compiled shaders to OUT_DIR/shaders
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR not set")).join("shaders");
    fs::create_dir_all(&out_dir).expect("failed to create OUT_DIR/shaders");

    let entries = match fs::read_dir("shaders") {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("comp") {
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let out_path = out_dir.join(format!("{}.spv", stem));

        let result = Command::new("glslc")
            .arg("--target-env=vulkan1.0")
            .arg("-fshader-stage=compute")
            .arg("-o")
            .arg(&out_path)
            .arg(&path)
            .output();

        // shaders are optional at build time: the engine can load SPIR-V from disk instead
        match result {
            Ok(o) if o.status.success() => {
                if stem == "resize" {
                    println!("cargo:rustc-cfg=has_resize_shader");
                }
            }
            Ok(o) => println!(
                "cargo:warning=glslc failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&o.stderr).trim()
            ),
            Err(e) => println!(
                "cargo:warning=failed to run glslc for {}: {}. Shaders must be supplied at runtime.",
                path.display(),
                e
            ),
        }
    }
}
