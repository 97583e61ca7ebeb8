//! Front-end discovery and launch.
//!
//! For a library `foo.so` resolved in directory D, front-end programs live
//! under `D/foo/`: executable regular files whose names begin with the
//! plugin label (or, failing that, with the library basename). A launched
//! front-end receives `(osc_url, library_name, label, instance_tag)`.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use continuo_engine::EngineShared;

/// Try to start one front-end per instance; failure is never fatal.
pub fn launch_all(shared: &EngineShared, host_url: &str) {
    for instance in &shared.instances {
        let plugin = &instance.plugin;
        let osc_url = format!("{host_url}/{}", instance.friendly_name);
        info!("have OSC URL {osc_url}");
        let tag = format!("channel {}", instance.channel);
        launch(
            plugin.directory.as_deref(),
            &plugin.library_name,
            &plugin.label,
            &osc_url,
            &tag,
        );
    }
}

fn launch(directory: Option<&Path>, library_name: &str, label: &str, osc_url: &str, tag: &str) {
    let base = library_base(library_name);
    let subpath = if base.starts_with('/') {
        PathBuf::from(&base)
    } else {
        match directory {
            Some(dir) => dir.join(&base),
            // In-process plugins have no directory to scan.
            None => return,
        }
    };

    let base_name = Path::new(&base)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(base.clone());

    match find_front_end(&subpath, label, &base_name) {
        Some(program) => {
            info!("starting front-end at \"{}\"", program.display());
            if let Err(e) = Command::new(&program)
                .args([osc_url, library_name, label, tag])
                .spawn()
            {
                warn!("failed to start front-end \"{}\": {e}", program.display());
            }
        }
        None => warn!(
            "no front-end found for plugin \"{label}\" in \"{}/\"",
            subpath.display()
        ),
    }
}

/// Scan a front-end directory: label-prefixed candidates first, then the
/// fuzzy pass against the library basename.
fn find_front_end(subpath: &Path, label: &str, base_name: &str) -> Option<PathBuf> {
    for prefix in [label, base_name] {
        let entries = match std::fs::read_dir(subpath) {
            Ok(entries) => entries,
            Err(_) => {
                warn!(
                    "can't open plugin front-end directory \"{}\"",
                    subpath.display()
                );
                return None;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.contains('_') {
                continue;
            }
            if !name.starts_with(prefix) {
                continue;
            }
            let path = entry.path();
            if is_executable_file(&path) {
                return Some(path);
            }
        }
    }
    None
}

fn library_base(library_name: &str) -> String {
    let lower = library_name.to_ascii_lowercase();
    if library_name.len() > 3 && lower.ends_with(".so") {
        library_name[..library_name.len() - 3].to_string()
    } else {
        library_name.to_string()
    }
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}
