//! The raw plugin ABI.
//!
//! Plugin libraries export a single enumeration symbol, `dssi_descriptor`,
//! yielding [`SynthDescriptor`] pointers by index until it returns null.
//! Everything crossing the boundary is `#[repr(C)]`; optional operations are
//! `Option`-typed function pointers so a null entry reads as `None` on the
//! host side.
//!
//! Ownership rule for [`SynthDescriptor::configure`]: a non-null returned
//! message was allocated with the C allocator (`malloc`/`strdup`) on the
//! plugin side; the host copies it out and releases it with `free`.

use std::os::raw::{c_char, c_ulong, c_void};

/// ABI revision understood by this host.
pub const API_VERSION: u32 = 1;

/// The entry symbol every plugin library must export.
pub const DESCRIPTOR_SYMBOL: &[u8] = b"dssi_descriptor\0";

/// Signature of the entry symbol.
pub type DescriptorFn = unsafe extern "C" fn(index: u32) -> *const SynthDescriptor;

/// Opaque per-instance handle produced by `instantiate`.
pub type Handle = *mut c_void;

// Port descriptor bits.
pub const PORT_INPUT: u32 = 0x1;
pub const PORT_OUTPUT: u32 = 0x2;
pub const PORT_CONTROL: u32 = 0x4;
pub const PORT_AUDIO: u32 = 0x8;

// Port range hint bits.
pub const HINT_BOUNDED_BELOW: u32 = 0x1;
pub const HINT_BOUNDED_ABOVE: u32 = 0x2;
pub const HINT_TOGGLED: u32 = 0x4;
pub const HINT_SAMPLE_RATE: u32 = 0x8;
pub const HINT_LOGARITHMIC: u32 = 0x10;
pub const HINT_INTEGER: u32 = 0x20;
pub const HINT_DEFAULT_MASK: u32 = 0x3C0;
pub const HINT_DEFAULT_MINIMUM: u32 = 0x40;
pub const HINT_DEFAULT_LOW: u32 = 0x80;
pub const HINT_DEFAULT_MIDDLE: u32 = 0xC0;
pub const HINT_DEFAULT_HIGH: u32 = 0x100;
pub const HINT_DEFAULT_MAXIMUM: u32 = 0x140;
pub const HINT_DEFAULT_0: u32 = 0x200;
pub const HINT_DEFAULT_1: u32 = 0x240;
pub const HINT_DEFAULT_100: u32 = 0x280;
pub const HINT_DEFAULT_440: u32 = 0x2C0;

/// `get_midi_controller_for_port` return value meaning "no mapping".
pub const MIDI_CONTROLLER_NONE: i32 = -1;
/// Bit marking a plain CC number in the low 7 bits.
pub const MIDI_CONTROLLER_CC: i32 = 0x2000_0000;

/// True when a controller advertisement encodes a plain CC number.
#[inline]
pub fn is_cc(encoded: i32) -> bool {
    encoded != MIDI_CONTROLLER_NONE && encoded & MIDI_CONTROLLER_CC != 0
}

/// Extract the CC number from a controller advertisement.
#[inline]
pub fn cc_number(encoded: i32) -> u8 {
    (encoded & 0x7F) as u8
}

/// Build a CC advertisement for `get_midi_controller_for_port`.
#[inline]
pub fn cc_controller(cc: u8) -> i32 {
    MIDI_CONTROLLER_CC | cc as i32
}

/// Range metadata for one port.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PortRangeHint {
    pub hint: u32,
    pub lower: f32,
    pub upper: f32,
}

impl PortRangeHint {
    #[inline]
    pub fn is_bounded_below(&self) -> bool {
        self.hint & HINT_BOUNDED_BELOW != 0
    }

    #[inline]
    pub fn is_bounded_above(&self) -> bool {
        self.hint & HINT_BOUNDED_ABOVE != 0
    }

    #[inline]
    pub fn is_sample_rate_relative(&self) -> bool {
        self.hint & HINT_SAMPLE_RATE != 0
    }

    /// The initial value for a control input, honoring the default hint.
    ///
    /// Bounds declared sample-rate-relative are scaled by `sample_rate`
    /// first. Without a default hint the value is 0 when the range is
    /// unbounded or spans zero, otherwise the lower bound.
    pub fn default_value(&self, sample_rate: f32) -> f32 {
        let scale = if self.is_sample_rate_relative() {
            sample_rate
        } else {
            1.0
        };
        let lower = self.lower * scale;
        let upper = self.upper * scale;

        if self.hint & HINT_DEFAULT_MASK == 0 {
            if !self.is_bounded_below() || !self.is_bounded_above() {
                return 0.0;
            }
            if lower <= 0.0 && upper >= 0.0 {
                return 0.0;
            }
            return lower;
        }

        match self.hint & HINT_DEFAULT_MASK {
            HINT_DEFAULT_0 => 0.0,
            HINT_DEFAULT_1 => 1.0,
            HINT_DEFAULT_100 => 100.0,
            HINT_DEFAULT_440 => 440.0,
            HINT_DEFAULT_MINIMUM if self.is_bounded_below() => lower,
            HINT_DEFAULT_MAXIMUM if self.is_bounded_above() => upper,
            HINT_DEFAULT_LOW if self.is_bounded_below() && self.is_bounded_above() => {
                lower * 0.75 + upper * 0.25
            }
            HINT_DEFAULT_MIDDLE if self.is_bounded_below() && self.is_bounded_above() => {
                lower * 0.5 + upper * 0.5
            }
            HINT_DEFAULT_HIGH if self.is_bounded_below() && self.is_bounded_above() => {
                lower * 0.25 + upper * 0.75
            }
            _ => 0.0,
        }
    }

    /// Map a 7-bit controller value into this port's range.
    ///
    /// Unbounded ports take the raw value; a single bound shifts the range;
    /// two bounds interpolate linearly over 0..=127.
    pub fn value_for_controller(&self, value: u8) -> f32 {
        let v = value as f32;
        match (self.is_bounded_below(), self.is_bounded_above()) {
            (false, false) => v,
            (false, true) => self.upper - 127.0 + v,
            (true, false) => self.lower + v,
            (true, true) => self.lower + (self.upper - self.lower) * v / 127.0,
        }
    }
}

/// Kinds of channel event delivered to `run_synth`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventKind {
    #[default]
    NoteOff = 0,
    NoteOn = 1,
    KeyPressure = 2,
    Controller = 3,
    ProgramChange = 4,
    ChannelPressure = 5,
    PitchBend = 6,
}

/// One timestamped channel event, as seen by a plugin.
///
/// `tick` is the frame offset within the current block. Pitch bend carries
/// its 14-bit value as LSB in `data1` and MSB in `data2`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SynthEvent {
    pub kind: EventKind,
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
    pub tick: u32,
}

impl SynthEvent {
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            kind: EventKind::NoteOn,
            channel,
            data1: note,
            data2: velocity,
            tick: 0,
        }
    }

    pub fn note_off(channel: u8, note: u8) -> Self {
        Self {
            kind: EventKind::NoteOff,
            channel,
            data1: note,
            data2: 0,
            tick: 0,
        }
    }

    pub fn controller(channel: u8, cc: u8, value: u8) -> Self {
        Self {
            kind: EventKind::Controller,
            channel,
            data1: cc,
            data2: value,
            tick: 0,
        }
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self {
            kind: EventKind::ProgramChange,
            channel,
            data1: program,
            data2: 0,
            tick: 0,
        }
    }

    pub fn pitch_bend(channel: u8, value: u16) -> Self {
        Self {
            kind: EventKind::PitchBend,
            channel,
            data1: (value & 0x7F) as u8,
            data2: ((value >> 7) & 0x7F) as u8,
            tick: 0,
        }
    }

    /// The 14-bit pitch bend value, when this is a pitch bend event.
    pub fn bend_value(&self) -> u16 {
        self.data1 as u16 | (self.data2 as u16) << 7
    }
}

/// One (bank, program, name) preset exposed by a plugin.
#[repr(C)]
pub struct ProgramDescriptor {
    pub bank: c_ulong,
    pub program: c_ulong,
    pub name: *const c_char,
}

// SAFETY: immutable shared metadata, like the descriptor itself.
unsafe impl Send for ProgramDescriptor {}
unsafe impl Sync for ProgramDescriptor {}

/// The capability table a plugin library exposes per descriptor index.
///
/// `instantiate`, `connect_port` and `run_synth` are required; everything
/// `Option`-typed may be absent.
#[repr(C)]
pub struct SynthDescriptor {
    pub api_version: u32,
    pub unique_id: u32,
    pub label: *const c_char,
    pub name: *const c_char,
    pub maker: *const c_char,

    pub port_count: u32,
    pub port_descriptors: *const u32,
    pub port_names: *const *const c_char,
    pub port_hints: *const PortRangeHint,

    pub instantiate:
        unsafe extern "C" fn(descriptor: *const SynthDescriptor, sample_rate: c_ulong) -> Handle,
    pub connect_port: unsafe extern "C" fn(handle: Handle, port: u32, data: *mut f32),
    pub activate: Option<unsafe extern "C" fn(handle: Handle)>,
    pub run_synth: unsafe extern "C" fn(
        handle: Handle,
        frames: c_ulong,
        events: *const SynthEvent,
        event_count: c_ulong,
    ),
    pub run_multiple_synths: Option<
        unsafe extern "C" fn(
            instance_count: c_ulong,
            handles: *const Handle,
            frames: c_ulong,
            events: *const *const SynthEvent,
            event_counts: *const c_ulong,
        ),
    >,
    pub select_program: Option<unsafe extern "C" fn(handle: Handle, bank: c_ulong, program: c_ulong)>,
    pub get_program:
        Option<unsafe extern "C" fn(handle: Handle, index: c_ulong) -> *const ProgramDescriptor>,
    pub get_midi_controller_for_port: Option<unsafe extern "C" fn(handle: Handle, port: u32) -> i32>,
    pub configure: Option<
        unsafe extern "C" fn(handle: Handle, key: *const c_char, value: *const c_char) -> *mut c_char,
    >,
    pub deactivate: Option<unsafe extern "C" fn(handle: Handle)>,
    pub cleanup: Option<unsafe extern "C" fn(handle: Handle)>,
}

// SAFETY: a descriptor is immutable shared data; its pointer fields refer to
// static metadata owned by the exporting library. This is what lets plugin
// crates expose descriptors as `static` items.
unsafe impl Send for SynthDescriptor {}
unsafe impl Sync for SynthDescriptor {}
