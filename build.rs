use std::path::{Path, PathBuf};

const FFMPEG_BIN: &str = "third_party/ffmpeg/bin";
const REQUIRED_DLL_PREFIXES: &[&str] = &["avcodec-", "avformat-", "avutil-", "swresample-", "swscale-"];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let ffmpeg = std::env::var_os("CARGO_FEATURE_FFMPEG").is_some();
    let windows = std::env::var("CARGO_CFG_TARGET_OS").is_ok_and(|os| os == "windows");
    if ffmpeg && windows {
        stage_ffmpeg_dlls();
    }
}

/// Link against a vendored FFmpeg and place its DLLs next to the binary.
fn stage_ffmpeg_dlls() {
    println!("cargo:rerun-if-changed={}", FFMPEG_BIN);

    let bin = PathBuf::from(FFMPEG_BIN);
    if !bin.exists() {
        println!("cargo:warning=FFmpeg DLLs not found at {}", bin.display());
        return;
    }
    println!("cargo:rustc-link-search=native={}", bin.display());

    // OUT_DIR is target/<profile>/build/<crate>/out
    let Some(target_dir) = std::env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .and_then(|out| out.ancestors().nth(3).map(Path::to_path_buf))
    else {
        println!("cargo:warning=cannot resolve the target directory");
        return;
    };

    let Ok(entries) = std::fs::read_dir(&bin) else {
        println!("cargo:warning=cannot read {}", bin.display());
        return;
    };
    for path in entries.flatten().map(|entry| entry.path()) {
        if !is_required_dll(&path) {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        let dest = target_dir.join(name);
        if modified(&dest) >= modified(&path) {
            continue;
        }
        match std::fs::copy(&path, &dest) {
            Ok(_) => println!("cargo:warning=copied {} to output dir", path.display()),
            Err(e) => println!("cargo:warning=failed to copy {}: {}", path.display(), e),
        }
    }
}

fn modified(path: &Path) -> std::time::SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
}

fn is_required_dll(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".dll") && REQUIRED_DLL_PREFIXES.iter().any(|p| lower.starts_with(p))
}
