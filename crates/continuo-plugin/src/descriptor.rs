//! Safe wrappers over the raw descriptor table.
//!
//! A [`PluginDescriptor`] pins the owning library (or a `'static` table, for
//! in-process fixtures) and exposes typed port metadata plus call shims for
//! every ABI operation. Optional operations degrade to no-ops or `None`.

use std::ffi::{CStr, CString};
use std::os::raw::c_ulong;
use std::sync::Arc;

use crate::abi::{self, Handle, PortRangeHint, SynthDescriptor, SynthEvent};
use crate::error::{Error, Result};
use crate::library::PluginLibrary;

/// What a port carries and in which direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortKind {
    AudioIn,
    AudioOut,
    ControlIn,
    ControlOut,
}

/// Cached metadata for one plugin port.
#[derive(Clone, Debug)]
pub struct PortInfo {
    pub kind: PortKind,
    pub name: String,
    pub hint: PortRangeHint,
}

/// An owned copy of one program entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub bank: u32,
    pub program: u32,
    pub name: String,
}

/// An instantiated plugin handle.
///
/// The pointer is owned by the host and only ever used through the
/// descriptor that produced it. Calls are serialized by the host's threading
/// discipline: block processing happens on the audio thread, lifecycle and
/// program operations on the control threads, with the instance's inactive
/// flag ordering the two.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PluginHandle(Handle);

// SAFETY: see the threading discipline note above; the raw pointer itself is
// just an opaque token handed back to the plugin.
unsafe impl Send for PluginHandle {}
unsafe impl Sync for PluginHandle {}

impl PluginHandle {
    pub fn as_ptr(&self) -> Handle {
        self.0
    }
}

#[derive(Debug)]
enum Origin {
    /// Keeps the dynamic library mapped while any descriptor is alive.
    Library(#[allow(dead_code)] Arc<PluginLibrary>),
    Static,
}

#[derive(Debug)]
struct DescriptorInner {
    raw: *const SynthDescriptor,
    _origin: Origin,
    label: String,
    name: String,
    ports: Vec<PortInfo>,
    audio_ins: usize,
    audio_outs: usize,
    control_ins: usize,
    control_outs: usize,
}

// SAFETY: the raw descriptor is read-only for its whole lifetime and the
// origin keeps it mapped; concurrent calls through it follow the plugin
// threading discipline documented on PluginHandle.
unsafe impl Send for DescriptorInner {}
unsafe impl Sync for DescriptorInner {}

/// A shared, read-only view of one plugin descriptor.
#[derive(Clone, Debug)]
pub struct PluginDescriptor {
    inner: Arc<DescriptorInner>,
}

impl PluginDescriptor {
    pub(crate) fn from_library(
        library: Arc<PluginLibrary>,
        raw: *const SynthDescriptor,
    ) -> Result<Self> {
        Self::wrap(raw, Origin::Library(library))
    }

    /// Wrap a descriptor with static lifetime, bypassing the loader.
    ///
    /// Intended for in-process plugins and test fixtures.
    pub fn from_static(raw: &'static SynthDescriptor) -> Result<Self> {
        Self::wrap(raw, Origin::Static)
    }

    fn wrap(raw: *const SynthDescriptor, origin: Origin) -> Result<Self> {
        // SAFETY: `raw` is non-null and points at a descriptor that outlives
        // `origin`; all pointer fields are read according to `port_count`.
        let desc = unsafe { &*raw };
        let label = unsafe { cstr_to_string(desc.label) };
        let name = unsafe { cstr_to_string(desc.name) };

        let mut ports = Vec::with_capacity(desc.port_count as usize);
        let (mut audio_ins, mut audio_outs, mut control_ins, mut control_outs) = (0, 0, 0, 0);
        for i in 0..desc.port_count as usize {
            let bits = unsafe { *desc.port_descriptors.add(i) };
            let kind = match (
                bits & abi::PORT_AUDIO != 0,
                bits & abi::PORT_CONTROL != 0,
                bits & abi::PORT_INPUT != 0,
                bits & abi::PORT_OUTPUT != 0,
            ) {
                (true, false, true, false) => PortKind::AudioIn,
                (true, false, false, true) => PortKind::AudioOut,
                (false, true, true, false) => PortKind::ControlIn,
                (false, true, false, true) => PortKind::ControlOut,
                _ => {
                    return Err(Error::InvalidDescriptor {
                        label,
                        port: i as u32,
                    })
                }
            };
            match kind {
                PortKind::AudioIn => audio_ins += 1,
                PortKind::AudioOut => audio_outs += 1,
                PortKind::ControlIn => control_ins += 1,
                PortKind::ControlOut => control_outs += 1,
            }
            let port_name = if desc.port_names.is_null() {
                format!("port_{i}")
            } else {
                unsafe { cstr_to_string(*desc.port_names.add(i)) }
            };
            let hint = if desc.port_hints.is_null() {
                PortRangeHint::default()
            } else {
                unsafe { *desc.port_hints.add(i) }
            };
            ports.push(PortInfo {
                kind,
                name: port_name,
                hint,
            });
        }

        Ok(Self {
            inner: Arc::new(DescriptorInner {
                raw,
                _origin: origin,
                label,
                name,
                ports,
                audio_ins,
                audio_outs,
                control_ins,
                control_outs,
            }),
        })
    }

    fn raw(&self) -> &SynthDescriptor {
        // SAFETY: kept alive by the origin.
        unsafe { &*self.inner.raw }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ports(&self) -> &[PortInfo] {
        &self.inner.ports
    }

    pub fn port(&self, index: u32) -> Option<&PortInfo> {
        self.inner.ports.get(index as usize)
    }

    pub fn port_count(&self) -> u32 {
        self.inner.ports.len() as u32
    }

    pub fn audio_ins(&self) -> usize {
        self.inner.audio_ins
    }

    pub fn audio_outs(&self) -> usize {
        self.inner.audio_outs
    }

    pub fn control_ins(&self) -> usize {
        self.inner.control_ins
    }

    pub fn control_outs(&self) -> usize {
        self.inner.control_outs
    }

    pub fn supports_run_multiple(&self) -> bool {
        self.raw().run_multiple_synths.is_some()
    }

    pub fn supports_select_program(&self) -> bool {
        self.raw().select_program.is_some()
    }

    pub fn supports_get_program(&self) -> bool {
        self.raw().get_program.is_some()
    }

    pub fn supports_configure(&self) -> bool {
        self.raw().configure.is_some()
    }

    /// Create a plugin instance; a null handle is a plugin runtime failure.
    pub fn instantiate(&self, sample_rate: u32) -> Result<PluginHandle> {
        // SAFETY: required op; the descriptor pointer is the one it came from.
        let handle = unsafe { (self.raw().instantiate)(self.inner.raw, sample_rate as c_ulong) };
        if handle.is_null() {
            return Err(Error::Instantiate {
                label: self.inner.label.clone(),
            });
        }
        Ok(PluginHandle(handle))
    }

    /// Bind a port to host memory.
    ///
    /// # Safety
    ///
    /// `data` must stay valid (and, for audio ports, at least one block
    /// long) until the handle is cleaned up.
    pub unsafe fn connect_port(&self, handle: PluginHandle, port: u32, data: *mut f32) {
        (self.raw().connect_port)(handle.0, port, data);
    }

    pub fn activate(&self, handle: PluginHandle) {
        if let Some(f) = self.raw().activate {
            // SAFETY: handle produced by this descriptor, ports connected.
            unsafe { f(handle.0) };
        }
    }

    pub fn deactivate(&self, handle: PluginHandle) {
        if let Some(f) = self.raw().deactivate {
            // SAFETY: handle produced by this descriptor.
            unsafe { f(handle.0) };
        }
    }

    pub fn cleanup(&self, handle: PluginHandle) {
        if let Some(f) = self.raw().cleanup {
            // SAFETY: handle produced by this descriptor; never used again.
            unsafe { f(handle.0) };
        }
    }

    pub fn run_synth(&self, handle: PluginHandle, frames: usize, events: &[SynthEvent]) {
        // SAFETY: handle is active and its ports are connected to buffers at
        // least `frames` long.
        unsafe {
            (self.raw().run_synth)(
                handle.0,
                frames as c_ulong,
                events.as_ptr(),
                events.len() as c_ulong,
            )
        }
    }

    /// Batched block call over a contiguous run of instances.
    ///
    /// Only valid when [`Self::supports_run_multiple`] is true; the three
    /// slices must be the same length.
    pub fn run_multiple_synths(
        &self,
        handles: &[PluginHandle],
        frames: usize,
        events: &[*const SynthEvent],
        event_counts: &[c_ulong],
    ) {
        debug_assert_eq!(handles.len(), events.len());
        debug_assert_eq!(handles.len(), event_counts.len());
        let Some(f) = self.raw().run_multiple_synths else {
            debug_assert!(false, "run_multiple_synths called without support");
            return;
        };
        // SAFETY: PluginHandle is repr(transparent) over the raw handle, so
        // the slice reads as *const Handle; all handles are active instances
        // of this descriptor with connected ports.
        unsafe {
            f(
                handles.len() as c_ulong,
                handles.as_ptr() as *const Handle,
                frames as c_ulong,
                events.as_ptr(),
                event_counts.as_ptr(),
            )
        }
    }

    pub fn select_program(&self, handle: PluginHandle, bank: u32, program: u32) {
        if let Some(f) = self.raw().select_program {
            // SAFETY: handle produced by this descriptor.
            unsafe { f(handle.0, bank as c_ulong, program as c_ulong) };
        }
    }

    pub fn get_program(&self, handle: PluginHandle, index: u32) -> Option<Program> {
        let f = self.raw().get_program?;
        // SAFETY: handle produced by this descriptor; the returned pointer is
        // valid until the next call into the plugin.
        let raw = unsafe { f(handle.0, index as c_ulong) };
        if raw.is_null() {
            return None;
        }
        let pd = unsafe { &*raw };
        Some(Program {
            bank: pd.bank as u32,
            program: pd.program as u32,
            name: unsafe { cstr_to_string(pd.name) },
        })
    }

    /// The raw controller advertisement for a port, if the op exists.
    pub fn midi_controller_for_port(&self, handle: PluginHandle, port: u32) -> i32 {
        match self.raw().get_midi_controller_for_port {
            // SAFETY: handle produced by this descriptor.
            Some(f) => unsafe { f(handle.0, port) },
            None => abi::MIDI_CONTROLLER_NONE,
        }
    }

    /// Send a configure key/value pair; returns the plugin's message, if any.
    pub fn configure(&self, handle: PluginHandle, key: &str, value: &str) -> Option<String> {
        let f = self.raw().configure?;
        let key = CString::new(key).ok()?;
        let value = CString::new(value).ok()?;
        // SAFETY: handle produced by this descriptor.
        let msg = unsafe { f(handle.0, key.as_ptr(), value.as_ptr()) };
        if msg.is_null() {
            return None;
        }
        // The message comes from the plugin's C allocator; copy it out and
        // hand the pointer back to free().
        let owned = unsafe { CStr::from_ptr(msg).to_string_lossy().into_owned() };
        unsafe { libc::free(msg as *mut std::os::raw::c_void) };
        Some(owned)
    }
}

unsafe fn cstr_to_string(ptr: *const std::os::raw::c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}
