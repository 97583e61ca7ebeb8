//! An in-process plugin used to drive the engine without dlopen.
//!
//! Every observable side effect lands in a per-instance [`MockShared`] that
//! outlives plugin cleanup, so tests can assert on lifecycle counts after
//! release.

#![allow(dead_code)]

use std::os::raw::{c_char, c_ulong};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use continuo_engine::{Engine, EngineConfig, Instance};
use continuo_plugin::abi::{
    cc_controller, EventKind, Handle, PortRangeHint, ProgramDescriptor, SynthDescriptor,
    SynthEvent, API_VERSION, HINT_BOUNDED_ABOVE, HINT_BOUNDED_BELOW, HINT_DEFAULT_MIDDLE,
    MIDI_CONTROLLER_NONE, PORT_AUDIO, PORT_CONTROL, PORT_INPUT, PORT_OUTPUT,
};
use continuo_plugin::{PluginDescriptor, PluginRegistry};

pub const PORT_OUT: u32 = 0;
pub const PORT_CUTOFF: u32 = 1;
pub const PORT_VOLUME: u32 = 2;
pub const PORT_METER: u32 = 3;

pub const CUTOFF_LOWER: f32 = 20.0;
pub const CUTOFF_UPPER: f32 = 20_000.0;

/// Observable plugin state, shared out to the test.
#[derive(Default)]
pub struct MockShared {
    /// Events delivered to each `run_synth` call, in call order.
    pub blocks: Mutex<Vec<Vec<SynthEvent>>>,
    /// Every `select_program(bank, program)` call.
    pub selected: Mutex<Vec<(u32, u32)>>,
    /// Every `configure(key, value)` call.
    pub configured: Mutex<Vec<(String, String)>>,
    /// Batch sizes seen by the multi-synth entry, one entry per handle.
    pub batch_sizes: Mutex<Vec<usize>>,
    pub deactivations: AtomicUsize,
    pub cleanups: AtomicUsize,
}

struct MockState {
    shared: Arc<MockShared>,
    out: *mut f32,
    notes_on: u32,
}

static PORT_DESCRIPTORS: [u32; 4] = [
    PORT_AUDIO | PORT_OUTPUT,
    PORT_CONTROL | PORT_INPUT,
    PORT_CONTROL | PORT_INPUT,
    PORT_CONTROL | PORT_OUTPUT,
];

#[repr(transparent)]
struct PortNames([*const c_char; 4]);
// SAFETY: static C string literals.
unsafe impl Sync for PortNames {}

static PORT_NAMES: PortNames = PortNames([
    c"Output".as_ptr(),
    c"Cutoff".as_ptr(),
    c"Volume".as_ptr(),
    c"Meter".as_ptr(),
]);

static PORT_HINTS: [PortRangeHint; 4] = [
    PortRangeHint {
        hint: 0,
        lower: 0.0,
        upper: 0.0,
    },
    PortRangeHint {
        hint: HINT_BOUNDED_BELOW | HINT_BOUNDED_ABOVE,
        lower: CUTOFF_LOWER,
        upper: CUTOFF_UPPER,
    },
    PortRangeHint {
        hint: HINT_BOUNDED_BELOW | HINT_BOUNDED_ABOVE | HINT_DEFAULT_MIDDLE,
        lower: 0.0,
        upper: 1.0,
    },
    PortRangeHint {
        hint: 0,
        lower: 0.0,
        upper: 0.0,
    },
];

static PROGRAMS: [ProgramDescriptor; 2] = [
    ProgramDescriptor {
        bank: 0,
        program: 0,
        name: c"Init".as_ptr(),
    },
    ProgramDescriptor {
        bank: 131,
        program: 7,
        name: c"Seventh".as_ptr(),
    },
];

unsafe extern "C" fn instantiate(_descriptor: *const SynthDescriptor, _sample_rate: c_ulong) -> Handle {
    Box::into_raw(Box::new(MockState {
        shared: Arc::new(MockShared::default()),
        out: std::ptr::null_mut(),
        notes_on: 0,
    })) as Handle
}

unsafe extern "C" fn connect_port(handle: Handle, port: u32, data: *mut f32) {
    let state = &mut *(handle as *mut MockState);
    if port == PORT_OUT {
        state.out = data;
    }
}

unsafe fn run_one(state: &mut MockState, frames: usize, events: &[SynthEvent]) {
    state.shared.blocks.lock().unwrap().push(events.to_vec());
    for ev in events {
        match ev.kind {
            EventKind::NoteOn => state.notes_on += 1,
            EventKind::NoteOff => state.notes_on = state.notes_on.saturating_sub(1),
            _ => {}
        }
    }
    if !state.out.is_null() {
        let level = if state.notes_on > 0 { 0.25 } else { 0.0 };
        std::slice::from_raw_parts_mut(state.out, frames).fill(level);
    }
}

unsafe extern "C" fn run_synth(
    handle: Handle,
    frames: c_ulong,
    events: *const SynthEvent,
    event_count: c_ulong,
) {
    let state = &mut *(handle as *mut MockState);
    let events = std::slice::from_raw_parts(events, event_count as usize);
    run_one(state, frames as usize, events);
}

unsafe extern "C" fn run_multiple_synths(
    instance_count: c_ulong,
    handles: *const Handle,
    frames: c_ulong,
    events: *const *const SynthEvent,
    event_counts: *const c_ulong,
) {
    for k in 0..instance_count as usize {
        let state = &mut *(*handles.add(k) as *mut MockState);
        state
            .shared
            .batch_sizes
            .lock()
            .unwrap()
            .push(instance_count as usize);
        let events = std::slice::from_raw_parts(*events.add(k), *event_counts.add(k) as usize);
        run_one(state, frames as usize, events);
    }
}

unsafe extern "C" fn select_program(handle: Handle, bank: c_ulong, program: c_ulong) {
    let state = &*(handle as *mut MockState);
    state
        .shared
        .selected
        .lock()
        .unwrap()
        .push((bank as u32, program as u32));
}

unsafe extern "C" fn get_program(_handle: Handle, index: c_ulong) -> *const ProgramDescriptor {
    PROGRAMS
        .get(index as usize)
        .map(|p| p as *const ProgramDescriptor)
        .unwrap_or(std::ptr::null())
}

unsafe extern "C" fn get_midi_controller_for_port(_handle: Handle, port: u32) -> i32 {
    if port == PORT_CUTOFF {
        cc_controller(74)
    } else {
        MIDI_CONTROLLER_NONE
    }
}

unsafe extern "C" fn configure(handle: Handle, key: *const c_char, value: *const c_char) -> *mut c_char {
    let state = &*(handle as *mut MockState);
    let key = std::ffi::CStr::from_ptr(key).to_string_lossy().into_owned();
    let value = std::ffi::CStr::from_ptr(value)
        .to_string_lossy()
        .into_owned();
    state.shared.configured.lock().unwrap().push((key, value));
    // The reply crosses the ABI through the C allocator; the host frees it.
    let reply = b"accepted\0";
    let buf = libc::malloc(reply.len()) as *mut c_char;
    if buf.is_null() {
        return std::ptr::null_mut();
    }
    std::ptr::copy_nonoverlapping(reply.as_ptr() as *const c_char, buf, reply.len());
    buf
}

unsafe extern "C" fn deactivate(handle: Handle) {
    let state = &*(handle as *mut MockState);
    state.shared.deactivations.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn cleanup(handle: Handle) {
    let state = Box::from_raw(handle as *mut MockState);
    state.shared.cleanups.fetch_add(1, Ordering::SeqCst);
}

const MOCK_BASE: SynthDescriptor = SynthDescriptor {
    api_version: API_VERSION,
    unique_id: 9001,
    label: c"mock".as_ptr(),
    name: c"Mock Synth".as_ptr(),
    maker: c"engine tests".as_ptr(),
    port_count: 4,
    port_descriptors: PORT_DESCRIPTORS.as_ptr(),
    port_names: PORT_NAMES.0.as_ptr(),
    port_hints: PORT_HINTS.as_ptr(),
    instantiate,
    connect_port,
    activate: None,
    run_synth,
    run_multiple_synths: None,
    select_program: Some(select_program),
    get_program: Some(get_program),
    get_midi_controller_for_port: Some(get_midi_controller_for_port),
    configure: Some(configure),
    deactivate: Some(deactivate),
    cleanup: Some(cleanup),
};

static MOCK: SynthDescriptor = MOCK_BASE;

/// Same plugin, but advertising the batched block operation.
static MOCK_MULTI: SynthDescriptor = SynthDescriptor {
    run_multiple_synths: Some(run_multiple_synths),
    unique_id: 9002,
    label: c"mock-multi".as_ptr(),
    ..MOCK_BASE
};

pub fn build_engine(reps: usize) -> Engine {
    build_engine_with(reps, false)
}

pub fn build_engine_with(reps: usize, multi: bool) -> Engine {
    try_build_engine(reps, multi).unwrap()
}

pub fn try_build_engine(reps: usize, multi: bool) -> continuo_engine::Result<Engine> {
    let descriptor = if multi { &MOCK_MULTI } else { &MOCK };
    let mut registry = PluginRegistry::new();
    let plugin = registry.register_descriptor(
        "mock.so",
        PluginDescriptor::from_static(descriptor).unwrap(),
    );
    Engine::build(
        &[(plugin, reps)],
        EngineConfig {
            sample_rate: 44_100,
            block_size: 256,
            ring_capacity: 1024,
        },
    )
}

/// The mock's observable state for one engine instance.
pub fn mock_shared(instance: &Instance) -> Arc<MockShared> {
    // SAFETY: the handle is a live MockState created by `instantiate`.
    let state = unsafe { &*(instance.handle.as_ptr() as *const MockState) };
    Arc::clone(&state.shared)
}

pub fn push(engine: &Engine, ev: SynthEvent) {
    engine.producer().push(continuo_engine::IngressEvent {
        at: Instant::now(),
        ev,
    });
}
