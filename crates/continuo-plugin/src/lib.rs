//! Plugin ABI surface and dynamic loader for the continuo host.
//!
//! The ABI is a capability table: one exported enumeration symbol yields
//! `#[repr(C)]` descriptors whose optional operations are `Option`-typed
//! function pointers. This crate owns the raw types, the search-path
//! resolver, and the safe wrappers the engine calls through.

pub mod abi;
pub use abi::{EventKind, PortRangeHint, SynthDescriptor, SynthEvent};

mod descriptor;
pub use descriptor::{PluginDescriptor, PluginHandle, PortInfo, PortKind, Program};

mod library;
pub use library::{PluginLibrary, PATH_VAR};

mod registry;
pub use registry::{PluginRegistry, PluginSpec, RegisteredPlugin};

pub mod error;
pub use error::{Error, Result};
