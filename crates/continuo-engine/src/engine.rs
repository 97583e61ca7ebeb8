//! Engine construction: instance ordering, port wiring, buffer layout.

use std::os::raw::c_ulong;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use continuo_plugin::abi;
use continuo_plugin::{PluginHandle, PortKind, RegisteredPlugin, SynthEvent};

use crate::error::{Error, Result};
use crate::instance::{Instance, ProgramState, MIDI_CONTROLLER_COUNT};
use crate::lockfree::{AtomicFlag, AtomicFloat};
use crate::ring::{event_ring, EventConsumer, EventProducer};

/// MIDI channels the router can bind.
pub const MAX_CHANNELS: usize = 16;
/// Upper bound on plugin instances (one per channel).
pub const MAX_INSTANCES: usize = MAX_CHANNELS;
/// Capacity of the ingress ring and of each per-instance event sub-buffer.
pub const EVENT_BUFFER_SIZE: usize = 1024;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub ring_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 512,
            ring_capacity: EVENT_BUFFER_SIZE,
        }
    }
}

/// State shared between the audio callback, the OSC dispatcher, and the
/// front-end liaison.
///
/// Topology (instances, maps, counts) is frozen here at build time; the
/// mutable leaves are all atomic scalars or control-plane-only mutexes.
#[derive(Debug)]
pub struct EngineShared {
    pub sample_rate: u32,
    pub block_size: usize,
    pub instances: Vec<Instance>,
    /// MIDI channel → instance index.
    pub channel_map: [Option<usize>; MAX_CHANNELS],
    /// One slot per global control input, bound to the plugin ports.
    pub control_ins: Box<[AtomicFloat]>,
    /// Set on every control-input write originating from MIDI mapping.
    pub port_updated: Box<[AtomicFlag]>,
    /// Global control input → owning instance index.
    pub control_in_instances: Box<[usize]>,
    /// Global control input → plugin port number.
    pub control_in_ports: Box<[u32]>,
}

/// The audio-side half of the engine: plugin handles, event sub-buffers and
/// audio buffers, plus the ring consumer. Owned by the audio callback.
#[derive(Debug)]
pub struct Engine {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) producer: EventProducer,
    pub(crate) consumer: EventConsumer,

    /// Parallel to `shared.instances`; contiguous for the batched block op.
    pub(crate) handles: Vec<PluginHandle>,
    pub(crate) event_bufs: Vec<Box<[SynthEvent]>>,
    pub(crate) event_counts: Vec<c_ulong>,
    /// Stable pointers into `event_bufs`, prebuilt for the batched call.
    pub(crate) event_ptrs: Vec<*const SynthEvent>,

    /// Kept alive (and zeroed) for the plugins' audio input ports.
    #[allow(dead_code)]
    pub(crate) input_buffers: Vec<Box<[f32]>>,
    pub(crate) output_buffers: Vec<Box<[f32]>>,
    #[allow(dead_code)]
    pub(crate) control_outs: Box<[f32]>,
}

// SAFETY: the raw pointers refer to heap buffers owned by this value; the
// engine is driven from exactly one thread at a time (the audio callback).
unsafe impl Send for Engine {}

impl Engine {
    /// Build the engine from resolved plugins and their repetition counts.
    ///
    /// Instances get consecutive MIDI channels from 0 in specification
    /// order, then are sorted so instances of the same plugin are
    /// contiguous, which lets the block driver use the batched operation.
    pub fn build(plugins: &[(Arc<RegisteredPlugin>, usize)], config: EngineConfig) -> Result<Self> {
        let total: usize = plugins.iter().map(|(_, reps)| *reps).sum();
        if total > MAX_INSTANCES {
            return Err(Error::TooManyInstances { max: MAX_INSTANCES });
        }

        let mut seeds: Vec<(Arc<RegisteredPlugin>, u8)> = Vec::with_capacity(total);
        for (plugin, reps) in plugins {
            for _ in 0..*reps {
                let channel = seeds.len() as u8;
                seeds.push((Arc::clone(plugin), channel));
            }
        }
        seeds.sort_by_key(|(plugin, channel)| (plugin.number, *channel));

        let ins_total: usize = seeds.iter().map(|(p, _)| p.descriptor.audio_ins()).sum();
        let outs_total: usize = seeds.iter().map(|(p, _)| p.descriptor.audio_outs()).sum();
        let control_ins_total: usize = seeds.iter().map(|(p, _)| p.descriptor.control_ins()).sum();
        let control_outs_total: usize =
            seeds.iter().map(|(p, _)| p.descriptor.control_outs()).sum();

        let control_ins: Box<[AtomicFloat]> = (0..control_ins_total)
            .map(|_| AtomicFloat::default())
            .collect();
        let port_updated: Box<[AtomicFlag]> = (0..control_ins_total)
            .map(|_| AtomicFlag::default())
            .collect();
        let mut control_in_instances = Vec::with_capacity(control_ins_total);
        let mut control_in_ports = Vec::with_capacity(control_ins_total);
        let mut control_outs: Box<[f32]> = vec![0.0; control_outs_total].into_boxed_slice();

        let mut input_buffers: Vec<Box<[f32]>> = Vec::with_capacity(ins_total);
        let mut output_buffers: Vec<Box<[f32]>> = Vec::with_capacity(outs_total);

        let mut instances = Vec::with_capacity(total);
        let mut handles = Vec::with_capacity(total);
        let mut channel_map = [None; MAX_CHANNELS];

        let (mut control_in, mut control_out) = (0usize, 0usize);

        for (index, (plugin, channel)) in seeds.iter().enumerate() {
            let descriptor = &plugin.descriptor;
            let handle = descriptor.instantiate(config.sample_rate)?;

            let mut controller_map = [-1i32; MIDI_CONTROLLER_COUNT];
            let mut port_control_ins = vec![-1i32; descriptor.port_count() as usize];
            let first_control_in = control_in;

            for (port, info) in descriptor.ports().iter().enumerate() {
                let port = port as u32;
                match info.kind {
                    PortKind::AudioIn => {
                        let mut buf = vec![0.0f32; config.block_size].into_boxed_slice();
                        // SAFETY: the boxed buffer never moves or shrinks for
                        // the life of the handle.
                        unsafe { descriptor.connect_port(handle, port, buf.as_mut_ptr()) };
                        input_buffers.push(buf);
                    }
                    PortKind::AudioOut => {
                        let mut buf = vec![0.0f32; config.block_size].into_boxed_slice();
                        // SAFETY: as above.
                        unsafe { descriptor.connect_port(handle, port, buf.as_mut_ptr()) };
                        output_buffers.push(buf);
                    }
                    PortKind::ControlIn => {
                        let advertised = descriptor.midi_controller_for_port(handle, port);
                        if advertised == 0 || advertised == 32 {
                            warn!(
                                "buggy plugin \"{}\": wants mapping for bank select CC {advertised}",
                                descriptor.label()
                            );
                        } else if abi::is_cc(advertised) {
                            controller_map[abi::cc_number(advertised) as usize] =
                                control_in as i32;
                        }

                        let slot = &control_ins[control_in];
                        slot.set(info.hint.default_value(config.sample_rate as f32));
                        // SAFETY: the slot lives in a boxed slice owned by
                        // EngineShared, stable for the life of the handle.
                        unsafe { descriptor.connect_port(handle, port, slot.as_ptr()) };

                        control_in_instances.push(index);
                        control_in_ports.push(port);
                        port_control_ins[port as usize] = control_in as i32;
                        control_in += 1;
                    }
                    PortKind::ControlOut => {
                        // SAFETY: `control_outs` is a boxed slice owned by
                        // the engine, stable for the life of the handle.
                        unsafe {
                            descriptor.connect_port(
                                handle,
                                port,
                                control_outs.as_mut_ptr().add(control_out),
                            )
                        };
                        control_out += 1;
                    }
                }
            }

            let instance = Instance {
                index,
                channel: *channel,
                friendly_name: Instance::friendly_name(
                    &plugin.library_name,
                    &plugin.label,
                    *channel,
                ),
                plugin: Arc::clone(plugin),
                handle,
                first_control_in,
                controller_map,
                port_control_ins,
                program: ProgramState::default(),
                programs: Mutex::new(Vec::new()),
                inactive: AtomicFlag::new(true),
                ui: Mutex::new(None),
                ui_initial_show_sent: AtomicFlag::new(false),
                ui_needs_program_update: AtomicFlag::new(false),
            };

            info!(
                "instance {index:2} on channel {channel:2}, plugin {:2} is \"{}\"",
                plugin.number, instance.friendly_name
            );

            descriptor.activate(handle);
            instance.inactive.set(false);
            instance.query_programs();

            channel_map[*channel as usize] = Some(index);
            handles.push(handle);
            instances.push(instance);
        }

        debug_assert_eq!(input_buffers.len(), ins_total);
        debug_assert_eq!(output_buffers.len(), outs_total);
        debug_assert_eq!(control_in, control_ins_total);
        debug_assert_eq!(control_out, control_outs_total);

        let event_bufs: Vec<Box<[SynthEvent]>> = (0..total)
            .map(|_| vec![SynthEvent::default(); EVENT_BUFFER_SIZE].into_boxed_slice())
            .collect();
        let event_ptrs: Vec<*const SynthEvent> = event_bufs.iter().map(|b| b.as_ptr()).collect();

        let shared = Arc::new(EngineShared {
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            instances,
            channel_map,
            control_ins,
            port_updated,
            control_in_instances: control_in_instances.into_boxed_slice(),
            control_in_ports: control_in_ports.into_boxed_slice(),
        });

        let (producer, consumer) = event_ring(config.ring_capacity.max(2));

        Ok(Self {
            shared,
            producer,
            consumer,
            handles,
            event_counts: vec![0; total],
            event_bufs,
            event_ptrs,
            input_buffers,
            output_buffers,
            control_outs,
        })
    }

    pub fn shared(&self) -> Arc<EngineShared> {
        Arc::clone(&self.shared)
    }

    /// A producer handle for the ingress ring (MIDI reader, OSC injector).
    pub fn producer(&self) -> EventProducer {
        self.producer.clone()
    }

    pub fn output_count(&self) -> usize {
        self.output_buffers.len()
    }

    pub fn output(&self, index: usize) -> &[f32] {
        &self.output_buffers[index]
    }
}

impl EngineShared {
    /// True once every instance has gone inactive.
    pub fn all_inactive(&self) -> bool {
        self.instances.iter().all(|i| i.inactive.get())
    }

    pub(crate) fn current_program(&self, instance: &Instance) -> (i32, i32) {
        (
            instance.program.current_bank.load(Ordering::Acquire),
            instance.program.current_program.load(Ordering::Acquire),
        )
    }
}
