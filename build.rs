fn main() {
    // Device listing links against the CUDA driver only with the cuda feature
    #[cfg(feature = "cuda")]
    {
        cuda_link_search();
    }
}

#[cfg(feature = "cuda")]
fn cuda_link_search() {
    use std::env;
    use std::path::Path;

    println!("cargo:rerun-if-env-changed=CUDA_PATH");

    if let Ok(cuda_path) = env::var("CUDA_PATH") {
        let lib_dir = if cfg!(target_os = "windows") {
            Path::new(&cuda_path).join("lib").join("x64")
        } else {
            Path::new(&cuda_path).join("lib64")
        };
        if lib_dir.exists() {
            println!("cargo:rustc-link-search=native={}", lib_dir.display());
            return;
        }
    }

    #[cfg(target_os = "linux")]
    {
        let cuda_paths = [
            "/usr/local/cuda/lib64",
            "/usr/lib/x86_64-linux-gnu",
            "/opt/cuda/lib64",
        ];

        for path in &cuda_paths {
            if Path::new(path).exists() {
                println!("cargo:rustc-link-search=native={}", path);
                break;
            }
        }
    }
}
