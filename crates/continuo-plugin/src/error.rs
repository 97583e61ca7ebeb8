//! Error types for plugin resolution and loading.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("plugin library \"{name}\" not found (searched {searched})")]
    LibraryNotFound { name: String, searched: String },

    #[error("\"{name}\" is not a synth plugin library: {reason}")]
    NotAPluginLibrary { name: String, reason: String },

    #[error("plugin label \"{label}\" not found in library \"{library}\"")]
    LabelNotFound { library: String, label: String },

    #[error("library \"{library}\" exposes no descriptors")]
    EmptyLibrary { library: String },

    #[error("descriptor \"{label}\" has malformed metadata at port {port}")]
    InvalidDescriptor { label: String, port: u32 },

    #[error("plugin \"{label}\" failed to instantiate")]
    Instantiate { label: String },
}

pub type Result<T> = std::result::Result<T, Error>;
