//! A single-voice sine synth, small enough to read in one sitting.
//!
//! Port 0 is the audio output, port 1 a volume control (advertised as CC 7),
//! port 2 the tuning of concert A.

use std::os::raw::{c_char, c_ulong};

use continuo_plugin::abi::{
    cc_controller, EventKind, Handle, PortRangeHint, SynthDescriptor, SynthEvent,
    HINT_BOUNDED_ABOVE, HINT_BOUNDED_BELOW, HINT_DEFAULT_440, HINT_DEFAULT_MIDDLE,
    MIDI_CONTROLLER_NONE, PORT_AUDIO, PORT_CONTROL, PORT_INPUT, PORT_OUTPUT,
};

const PORT_OUT: u32 = 0;
const PORT_VOLUME: u32 = 1;
const PORT_TUNING: u32 = 2;

static PORT_DESCRIPTORS: [u32; 3] = [
    PORT_AUDIO | PORT_OUTPUT,
    PORT_CONTROL | PORT_INPUT,
    PORT_CONTROL | PORT_INPUT,
];

#[repr(transparent)]
struct PortNames([*const c_char; 3]);
// SAFETY: static C string literals.
unsafe impl Sync for PortNames {}

static PORT_NAMES: PortNames = PortNames([
    c"Output".as_ptr(),
    c"Volume".as_ptr(),
    c"Tuning A".as_ptr(),
]);

static PORT_HINTS: [PortRangeHint; 3] = [
    PortRangeHint {
        hint: 0,
        lower: 0.0,
        upper: 0.0,
    },
    PortRangeHint {
        hint: HINT_BOUNDED_BELOW | HINT_BOUNDED_ABOVE | HINT_DEFAULT_MIDDLE,
        lower: 0.0,
        upper: 1.0,
    },
    PortRangeHint {
        hint: HINT_BOUNDED_BELOW | HINT_BOUNDED_ABOVE | HINT_DEFAULT_440,
        lower: 410.0,
        upper: 470.0,
    },
];

struct SineSynth {
    sample_rate: f32,
    phase: f32,
    note: Option<u8>,
    velocity: f32,
    out: *mut f32,
    volume: *mut f32,
    tuning: *mut f32,
}

unsafe extern "C" fn instantiate(_descriptor: *const SynthDescriptor, sample_rate: c_ulong) -> Handle {
    Box::into_raw(Box::new(SineSynth {
        sample_rate: sample_rate as f32,
        phase: 0.0,
        note: None,
        velocity: 0.0,
        out: std::ptr::null_mut(),
        volume: std::ptr::null_mut(),
        tuning: std::ptr::null_mut(),
    })) as Handle
}

unsafe extern "C" fn connect_port(handle: Handle, port: u32, data: *mut f32) {
    let synth = &mut *(handle as *mut SineSynth);
    match port {
        PORT_OUT => synth.out = data,
        PORT_VOLUME => synth.volume = data,
        PORT_TUNING => synth.tuning = data,
        _ => {}
    }
}

unsafe extern "C" fn activate(handle: Handle) {
    let synth = &mut *(handle as *mut SineSynth);
    synth.phase = 0.0;
    synth.note = None;
}

unsafe extern "C" fn run_synth(
    handle: Handle,
    frames: c_ulong,
    events: *const SynthEvent,
    event_count: c_ulong,
) {
    let synth = &mut *(handle as *mut SineSynth);
    if synth.out.is_null() {
        return;
    }

    for i in 0..event_count as usize {
        let ev = &*events.add(i);
        match ev.kind {
            EventKind::NoteOn => {
                synth.note = Some(ev.data1);
                synth.velocity = ev.data2 as f32 / 127.0;
            }
            EventKind::NoteOff if synth.note == Some(ev.data1) => synth.note = None,
            _ => {}
        }
    }

    let out = std::slice::from_raw_parts_mut(synth.out, frames as usize);
    let Some(note) = synth.note else {
        out.fill(0.0);
        return;
    };

    let volume = if synth.volume.is_null() {
        0.5
    } else {
        *synth.volume
    };
    let tuning = if synth.tuning.is_null() {
        440.0
    } else {
        *synth.tuning
    };
    let freq = tuning * ((note as f32 - 69.0) / 12.0).exp2();
    let step = std::f32::consts::TAU * freq / synth.sample_rate;
    let gain = synth.velocity * volume;

    for sample in out.iter_mut() {
        *sample = synth.phase.sin() * gain;
        synth.phase += step;
        if synth.phase > std::f32::consts::TAU {
            synth.phase -= std::f32::consts::TAU;
        }
    }
}

unsafe extern "C" fn get_midi_controller_for_port(_handle: Handle, port: u32) -> i32 {
    match port {
        PORT_VOLUME => cc_controller(7),
        _ => MIDI_CONTROLLER_NONE,
    }
}

unsafe extern "C" fn cleanup(handle: Handle) {
    drop(Box::from_raw(handle as *mut SineSynth));
}

static DESCRIPTOR: SynthDescriptor = SynthDescriptor {
    api_version: continuo_plugin::abi::API_VERSION,
    unique_id: 2301,
    label: c"sine".as_ptr(),
    name: c"Simple Sine Synth".as_ptr(),
    maker: c"continuo examples".as_ptr(),
    port_count: 3,
    port_descriptors: PORT_DESCRIPTORS.as_ptr(),
    port_names: PORT_NAMES.0.as_ptr(),
    port_hints: PORT_HINTS.as_ptr(),
    instantiate,
    connect_port,
    activate: Some(activate),
    run_synth,
    run_multiple_synths: None,
    select_program: None,
    get_program: None,
    get_midi_controller_for_port: Some(get_midi_controller_for_port),
    configure: None,
    deactivate: None,
    cleanup: Some(cleanup),
};

/// The host's enumeration entry point.
///
/// # Safety
///
/// Called through the ABI; returns a pointer to static data.
#[no_mangle]
pub unsafe extern "C" fn dssi_descriptor(index: u32) -> *const SynthDescriptor {
    if index == 0 {
        &DESCRIPTOR
    } else {
        std::ptr::null()
    }
}
