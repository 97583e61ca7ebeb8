//! Dynamic library resolution and loading.
//!
//! Libraries are searched along a colon-separated path list taken from
//! `$DSSI_PATH`, falling back to the system roots plus the per-user
//! directory. Absolute library paths bypass the search entirely.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use tracing::{debug, warn};

use crate::abi::{DescriptorFn, SynthDescriptor, DESCRIPTOR_SYMBOL};
use crate::descriptor::PluginDescriptor;
use crate::error::{Error, Result};

/// Environment variable overriding the library search path.
pub const PATH_VAR: &str = "DSSI_PATH";

const SYSTEM_PATH: &str = "/usr/local/lib/dssi:/usr/lib/dssi";

/// A loaded plugin library and its descriptor entry point.
#[derive(Debug)]
pub struct PluginLibrary {
    name: String,
    directory: PathBuf,
    entry: DescriptorFn,
    // Field order matters: `entry` points into `_lib`, which must be
    // dropped last.
    _lib: libloading::Library,
}

impl PluginLibrary {
    /// Resolve and open a library by name.
    pub fn open(name: &str) -> Result<Arc<Self>> {
        if Path::new(name).is_absolute() {
            return Self::open_at(name, Path::new(name)).map_err(|e| match e {
                Error::NotAPluginLibrary { .. } => e,
                _ => Error::LibraryNotFound {
                    name: name.to_string(),
                    searched: name.to_string(),
                },
            });
        }

        let search = search_path();
        for element in search.split(':').filter(|e| !e.is_empty()) {
            if !element.starts_with('/') {
                warn!("ignoring relative element \"{element}\" in {PATH_VAR}");
                continue;
            }
            let candidate = Path::new(element).join(name);
            debug!("looking for library \"{name}\" in {element}");
            match Self::open_at(name, &candidate) {
                Ok(lib) => return Ok(lib),
                // The entry symbol being absent is conclusive; a failed open
                // just means the file is not in this element.
                Err(e @ Error::NotAPluginLibrary { .. }) => return Err(e),
                Err(_) => continue,
            }
        }

        Err(Error::LibraryNotFound {
            name: name.to_string(),
            searched: search,
        })
    }

    fn open_at(name: &str, path: &Path) -> Result<Arc<Self>> {
        // SAFETY: loading runs the library's initializers; plugin libraries
        // are trusted code by the host's contract.
        let lib = unsafe { libloading::Library::new(path) }.map_err(|e| Error::LibraryNotFound {
            name: name.to_string(),
            searched: format!("{} ({e})", path.display()),
        })?;

        let entry = {
            // SAFETY: the symbol type matches the ABI's exported signature.
            let symbol: libloading::Symbol<DescriptorFn> = unsafe { lib.get(DESCRIPTOR_SYMBOL) }
                .map_err(|e| Error::NotAPluginLibrary {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            *symbol
        };

        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        debug!("found library \"{name}\" at {}", path.display());
        Ok(Arc::new(Self {
            name: name.to_string(),
            directory,
            entry,
            _lib: lib,
        }))
    }

    /// The library name as given on the command line.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The directory the library was resolved in (front-ends live beside it).
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn raw_descriptor(&self, index: u32) -> Option<*const SynthDescriptor> {
        // SAFETY: entry symbol stays valid while `self` holds the library.
        let ptr = unsafe { (self.entry)(index) };
        (!ptr.is_null()).then_some(ptr)
    }

    /// Select the descriptor matching `label`, or the library's first one.
    pub fn select(self: &Arc<Self>, label: Option<&str>) -> Result<PluginDescriptor> {
        let mut index = 0;
        while let Some(raw) = self.raw_descriptor(index) {
            let descriptor = PluginDescriptor::from_library(Arc::clone(self), raw)?;
            match label {
                None => return Ok(descriptor),
                Some(wanted) if descriptor.label() == wanted => return Ok(descriptor),
                Some(_) => index += 1,
            }
        }

        match label {
            Some(wanted) => Err(Error::LabelNotFound {
                library: self.name.clone(),
                label: wanted.to_string(),
            }),
            None => Err(Error::EmptyLibrary {
                library: self.name.clone(),
            }),
        }
    }
}

fn search_path() -> String {
    if let Ok(path) = std::env::var(PATH_VAR) {
        return path;
    }
    static WARN_ONCE: Once = Once::new();
    let default = match std::env::var("HOME") {
        Ok(home) => format!("{SYSTEM_PATH}:{home}/.dssi"),
        Err(_) => SYSTEM_PATH.to_string(),
    };
    WARN_ONCE.call_once(|| {
        warn!("{PATH_VAR} not set, defaulting to \"{default}\"");
    });
    default
}
