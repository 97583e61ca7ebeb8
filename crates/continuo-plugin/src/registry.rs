//! Library and descriptor registry.
//!
//! Deduplicates libraries by name and descriptors by (library, label), and
//! assigns each distinct plugin a registration number used to keep instances
//! of the same plugin contiguous in the engine's instance order.

use std::path::PathBuf;
use std::sync::Arc;

use crate::descriptor::PluginDescriptor;
use crate::error::Result;
use crate::library::PluginLibrary;

/// One command-line plugin request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginSpec {
    pub library: String,
    pub label: Option<String>,
    pub count: usize,
}

/// A resolved, deduplicated plugin.
#[derive(Debug)]
pub struct RegisteredPlugin {
    /// Registration order; instances are sorted by this to group plugins.
    pub number: usize,
    pub library_name: String,
    /// Directory the library was found in; `None` for in-process plugins.
    pub directory: Option<PathBuf>,
    pub label: String,
    /// Whether this plugin was selected without an explicit label.
    pub first_in_library: bool,
    pub descriptor: PluginDescriptor,
}

#[derive(Default)]
pub struct PluginRegistry {
    libraries: Vec<Arc<PluginLibrary>>,
    plugins: Vec<Arc<RegisteredPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve one spec, reusing any previously registered library or plugin.
    pub fn resolve(&mut self, spec: &PluginSpec) -> Result<Arc<RegisteredPlugin>> {
        let label = spec.label.as_deref();
        if let Some(existing) = self.plugins.iter().find(|p| {
            p.library_name == spec.library
                && match label {
                    Some(wanted) => p.label == wanted,
                    None => p.first_in_library,
                }
        }) {
            return Ok(Arc::clone(existing));
        }

        let library = match self
            .libraries
            .iter()
            .find(|l| l.name() == spec.library)
        {
            Some(lib) => Arc::clone(lib),
            None => {
                let lib = PluginLibrary::open(&spec.library)?;
                self.libraries.push(Arc::clone(&lib));
                lib
            }
        };

        let descriptor = library.select(label)?;
        let plugin = Arc::new(RegisteredPlugin {
            number: self.plugins.len(),
            library_name: spec.library.clone(),
            directory: Some(library.directory().to_path_buf()),
            label: descriptor.label().to_string(),
            first_in_library: label.is_none(),
            descriptor,
        });
        self.plugins.push(Arc::clone(&plugin));
        Ok(plugin)
    }

    /// Register an in-process descriptor, bypassing the loader.
    pub fn register_descriptor(
        &mut self,
        library_name: &str,
        descriptor: PluginDescriptor,
    ) -> Arc<RegisteredPlugin> {
        let plugin = Arc::new(RegisteredPlugin {
            number: self.plugins.len(),
            library_name: library_name.to_string(),
            directory: None,
            label: descriptor.label().to_string(),
            first_in_library: true,
            descriptor,
        });
        self.plugins.push(Arc::clone(&plugin));
        plugin
    }

    pub fn plugins(&self) -> &[Arc<RegisteredPlugin>] {
        &self.plugins
    }
}
