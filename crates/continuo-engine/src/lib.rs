//! Real-time MIDI-to-audio dispatch engine for the continuo host.
//!
//! Three actors cooperate around one shared engine value, each field
//! classified by its access pattern and the classification fixed at build
//! time:
//!
//! - the **MIDI reader** thread produces into the ingress ring;
//! - the **audio callback** consumes the ring, demultiplexes events to
//!   per-instance sub-buffers, commits pending program changes, and drives
//!   each plugin's block operation, without allocating, blocking, or
//!   taking a lock;
//! - the **OSC dispatcher** and **front-end liaison** exchange state with
//!   external GUIs through atomic control slots and update flags.

pub mod error;
pub use error::{Error, Result};

pub mod lockfree;
pub use lockfree::{AtomicFlag, AtomicFloat};

pub mod ring;
pub use ring::{event_ring, EventConsumer, EventProducer, IngressEvent};

pub mod instance;
pub use instance::{Instance, ProgramState, UiTarget, MIDI_CONTROLLER_COUNT};

mod engine;
pub use engine::{Engine, EngineConfig, EngineShared, EVENT_BUFFER_SIZE, MAX_CHANNELS, MAX_INSTANCES};

mod dispatch;

pub mod osc;
pub use osc::{Liaison, OscServer};

pub mod audio;
pub use audio::AudioOutput;

pub mod midi_in;
pub use midi_in::{event_from_bytes, MidiIngress};

pub mod shutdown;
