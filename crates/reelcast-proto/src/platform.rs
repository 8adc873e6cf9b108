use std::path::PathBuf;

pub fn data_dir() -> PathBuf {
    // ~/.local/share/reelcast on every unix, including macOS, so the
    // ledger and logs live in one predictable place
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("reelcast")
    }
    #[cfg(windows)]
    {
        // Portable layout: a `data` folder beside the executable wins
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let portable_data = exe_dir.join("data");
                if portable_data.exists() {
                    return portable_data;
                }
            }
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reelcast")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("reelcast")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reelcast")
    }
}

#[cfg(unix)]
fn aria2c_binary_names() -> &'static [&'static str] {
    &["aria2c"]
}

#[cfg(windows)]
fn aria2c_binary_names() -> &'static [&'static str] {
    &["aria2c.exe", "aria2c"]
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
        let p = dir.join("external").join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let sep = ":";
    #[cfg(windows)]
    let sep = ";";
    for dir in path.split(sep) {
        for name in names {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find the aria2c binary used for peer-to-peer transfers.
///
/// Searches in order:
/// 1. ARIA2C_PATH environment variable
/// 2. Beside the current executable (or its `external/` folder)
/// 3. PATH
pub fn find_aria2c_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("ARIA2C_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(p) = find_beside_exe(aria2c_binary_names()) {
        return Some(p);
    }

    find_on_path(aria2c_binary_names())
}
