//! Plugin instances and their shared per-instance state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use continuo_plugin::{PluginHandle, Program, RegisteredPlugin};

use crate::lockfree::AtomicFlag;

/// MIDI controller numbers run 0..=127.
pub const MIDI_CONTROLLER_COUNT: usize = 128;

/// Bank/program state, written from the OSC dispatcher and the audio
/// callback's demultiplexer, committed on block boundaries. −1 means "no
/// pending value".
#[derive(Debug)]
pub struct ProgramState {
    pub current_bank: AtomicI32,
    pub current_program: AtomicI32,
    pub pending_bank_msb: AtomicI32,
    pub pending_bank_lsb: AtomicI32,
    pub pending_program: AtomicI32,
}

impl Default for ProgramState {
    fn default() -> Self {
        Self {
            current_bank: AtomicI32::new(0),
            current_program: AtomicI32::new(0),
            pending_bank_msb: AtomicI32::new(-1),
            pending_bank_lsb: AtomicI32::new(-1),
            pending_program: AtomicI32::new(-1),
        }
    }
}

impl ProgramState {
    pub fn clear_pending(&self) {
        self.pending_bank_msb.store(-1, Ordering::Release);
        self.pending_bank_lsb.store(-1, Ordering::Release);
        self.pending_program.store(-1, Ordering::Release);
    }

    pub fn has_pending(&self) -> bool {
        self.pending_program.load(Ordering::Acquire) >= 0
    }
}

/// A registered front-end with its precomputed reply paths.
#[derive(Clone, Debug)]
pub struct UiTarget {
    pub addr: SocketAddr,
    pub control_path: String,
    pub program_path: String,
    pub show_path: String,
}

impl UiTarget {
    /// Derive the method paths from the front-end's base path once, at
    /// registration time.
    pub fn new(addr: SocketAddr, base_path: &str) -> Self {
        let base = base_path.trim_end_matches('/');
        Self {
            addr,
            control_path: format!("{base}/control"),
            program_path: format!("{base}/program"),
            show_path: format!("{base}/show"),
        }
    }
}

/// One plugin instance, bound to a MIDI channel.
///
/// Topology (identity, maps, plugin reference, handle) is frozen when the
/// engine is built; the remaining fields follow the per-field access
/// disciplines described in the crate docs.
#[derive(Debug)]
pub struct Instance {
    pub index: usize,
    pub channel: u8,
    pub friendly_name: String,
    pub plugin: Arc<RegisteredPlugin>,
    pub handle: PluginHandle,

    /// First global control-input index belonging to this instance.
    pub first_control_in: usize,
    /// MIDI controller number → global control-input index, −1 unmapped.
    pub controller_map: [i32; MIDI_CONTROLLER_COUNT],
    /// Plugin port number → global control-input index, −1 for non-control
    /// ports.
    pub port_control_ins: Vec<i32>,

    pub program: ProgramState,
    pub programs: Mutex<Vec<Program>>,

    pub inactive: AtomicFlag,

    pub ui: Mutex<Option<UiTarget>>,
    pub ui_initial_show_sent: AtomicFlag,
    pub ui_needs_program_update: AtomicFlag,
}

impl Instance {
    /// `<libbase>/<label>/chanNN`, unique per engine by construction.
    pub fn friendly_name(library_name: &str, label: &str, channel: u8) -> String {
        let base = library_name
            .rsplit('/')
            .next()
            .unwrap_or(library_name);
        let base = if base.len() > 3 && base.to_ascii_lowercase().ends_with(".so") {
            &base[..base.len() - 3]
        } else {
            base
        };
        format!("{base}/{label}/chan{channel:02}")
    }

    /// Rebuild the program list from the plugin.
    ///
    /// Program metadata is invalidated by `configure`, so this runs at
    /// startup and again after every configure call. Selecting the first
    /// program mirrors the host's startup behavior.
    pub fn query_programs(&self) {
        self.program.clear_pending();

        let descriptor = &self.plugin.descriptor;
        if !descriptor.supports_get_program() || !descriptor.supports_select_program() {
            return;
        }

        let mut list = Vec::new();
        while let Some(program) = descriptor.get_program(self.handle, list.len() as u32) {
            debug!(
                "{} program {} is bank {} program {}, named '{}'",
                self.friendly_name,
                list.len(),
                program.bank,
                program.program,
                program.name
            );
            list.push(program);
        }

        if let Some(first) = list.first() {
            self.program
                .current_bank
                .store(first.bank as i32, Ordering::Release);
            self.program
                .current_program
                .store(first.program as i32, Ordering::Release);
            descriptor.select_program(self.handle, first.bank, first.program);
            self.ui_needs_program_update.set(true);
        }

        *self.programs.lock() = list;
    }
}
