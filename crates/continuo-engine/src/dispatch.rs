//! The audio-callback hot path.
//!
//! One call per block: drain the ingress ring, demultiplex events to
//! per-instance sub-buffers with controller mapping, commit pending program
//! changes, then invoke every instance's block operation. Nothing here
//! allocates, blocks, or takes a lock.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use continuo_plugin::EventKind;

use crate::engine::Engine;
use crate::shutdown;

impl Engine {
    /// Process one block of `frames` frames into the global output buffers.
    pub fn process_block(&mut self, frames: usize) {
        let frames = frames.min(self.shared.block_size);
        if frames == 0 {
            return;
        }
        if shutdown::is_exiting() {
            self.zero_outputs(frames);
            return;
        }

        let now = Instant::now();
        for count in self.event_counts.iter_mut() {
            *count = 0;
        }
        self.drain_ring(now, frames);
        self.commit_programs();
        self.run_instances(frames);
    }

    /// Drain the ring until it is empty, an event belongs to the next block,
    /// or a target instance's sub-buffer is full. Events for unbound or
    /// inactive channels are consumed and discarded.
    fn drain_ring(&mut self, now: Instant, frames: usize) {
        let shared = Arc::clone(&self.shared);
        loop {
            let Some(ingress) = self.consumer.peek() else {
                break;
            };

            let instance_index = match shared
                .channel_map
                .get(ingress.ev.channel as usize)
                .copied()
                .flatten()
            {
                Some(index) => index,
                None => {
                    self.consumer.pop();
                    continue;
                }
            };
            if shared.instances[instance_index].inactive.get() {
                self.consumer.pop();
                continue;
            }

            // Leave both a full sub-buffer's event and a future-stamped
            // event in the ring for the next block.
            if self.event_counts[instance_index] as usize == self.event_bufs[instance_index].len()
            {
                break;
            }
            if ingress.at > now {
                break;
            }
            self.consumer.pop();

            let mut ev = ingress.ev;
            ev.tick = frame_offset(now, ingress.at, shared.sample_rate, frames);

            let instance = &shared.instances[instance_index];
            match ev.kind {
                EventKind::Controller => match ev.data1 {
                    0 => instance
                        .program
                        .pending_bank_msb
                        .store(ev.data2 as i32, Ordering::Release),
                    32 => instance
                        .program
                        .pending_bank_lsb
                        .store(ev.data2 as i32, Ordering::Release),
                    cc => {
                        let mapped = instance.controller_map[cc as usize];
                        if mapped >= 0 {
                            self.set_control(mapped as usize, cc, ev.data2);
                        } else {
                            self.forward(instance_index, ev);
                        }
                    }
                },
                EventKind::ProgramChange => {
                    instance
                        .program
                        .pending_program
                        .store(ev.data1 as i32, Ordering::Release);
                    instance.ui_needs_program_update.set(true);
                }
                _ => self.forward(instance_index, ev),
            }
        }
    }

    #[inline]
    fn forward(&mut self, instance_index: usize, ev: continuo_plugin::SynthEvent) {
        let count = self.event_counts[instance_index] as usize;
        self.event_bufs[instance_index][count] = ev;
        self.event_counts[instance_index] += 1;
    }

    /// Map a 7-bit controller value onto a control-input slot.
    fn set_control(&self, control_in: usize, cc: u8, value: u8) {
        let shared = &self.shared;
        let instance = &shared.instances[shared.control_in_instances[control_in]];
        let port = shared.control_in_ports[control_in];
        let hint = instance
            .plugin
            .descriptor
            .port(port)
            .map(|p| p.hint)
            .unwrap_or_default();
        let mapped = hint.value_for_controller(value);
        debug!(
            "{} MIDI controller {cc}={value} -> control in {control_in}={mapped}",
            instance.friendly_name
        );
        shared.control_ins[control_in].set(mapped);
        shared.port_updated[control_in].set(true);
    }

    /// Commit pending program changes before the block calls.
    ///
    /// A lone bank MSB or LSB preserves the other half of the prior bank.
    fn commit_programs(&mut self) {
        for instance in &self.shared.instances {
            if instance.inactive.get() {
                continue;
            }
            let state = &instance.program;
            let program = state.pending_program.load(Ordering::Acquire);
            if program < 0 {
                continue;
            }
            let msb = state.pending_bank_msb.load(Ordering::Acquire);
            let lsb = state.pending_bank_lsb.load(Ordering::Acquire);
            let prior = state.current_bank.load(Ordering::Acquire);

            let bank = if lsb >= 0 {
                if msb >= 0 {
                    lsb + 128 * msb
                } else {
                    lsb + 128 * (prior / 128)
                }
            } else if msb >= 0 {
                prior % 128 + 128 * msb
            } else {
                prior
            };

            state.current_bank.store(bank, Ordering::Release);
            state.current_program.store(program, Ordering::Release);
            state.clear_pending();
            instance.ui_needs_program_update.set(true);

            instance
                .plugin
                .descriptor
                .select_program(instance.handle, bank as u32, program as u32);
        }
    }

    /// Walk the instance order, batching contiguous active instances of the
    /// same plugin through the multi-synth operation when it exists.
    /// Inactive instances get zeroed output buffers instead of a call.
    fn run_instances(&mut self, frames: usize) {
        let shared = Arc::clone(&self.shared);
        let n = shared.instances.len();
        let mut i = 0;
        let mut out = 0;

        while i < n {
            let instance = &shared.instances[i];
            let outs = instance.plugin.descriptor.audio_outs();

            if instance.inactive.get() {
                for buf in &mut self.output_buffers[out..out + outs] {
                    buf[..frames].fill(0.0);
                }
                out += outs;
                i += 1;
                continue;
            }

            let descriptor = instance.plugin.descriptor.clone();
            if descriptor.supports_run_multiple() {
                let mut run = 1;
                let mut run_outs = outs;
                while i + run < n {
                    let next = &shared.instances[i + run];
                    if next.plugin.number != instance.plugin.number || next.inactive.get() {
                        break;
                    }
                    run_outs += next.plugin.descriptor.audio_outs();
                    run += 1;
                }
                descriptor.run_multiple_synths(
                    &self.handles[i..i + run],
                    frames,
                    &self.event_ptrs[i..i + run],
                    &self.event_counts[i..i + run],
                );
                out += run_outs;
                i += run;
            } else {
                let count = self.event_counts[i] as usize;
                descriptor.run_synth(self.handles[i], frames, &self.event_bufs[i][..count]);
                out += outs;
                i += 1;
            }
        }
    }

    pub(crate) fn zero_outputs(&mut self, frames: usize) {
        for buf in &mut self.output_buffers {
            buf[..frames].fill(0.0);
        }
    }
}

/// Frame offset for an event received `now - at` before the block start,
/// clamped into the block: `frames - delta*rate - 1` within [0, frames-1].
fn frame_offset(now: Instant, at: Instant, sample_rate: u32, frames: usize) -> u32 {
    let elapsed = now.saturating_duration_since(at);
    let mut delta = (elapsed.as_secs_f64() * sample_rate as f64) as i64;
    let max = frames as i64 - 1;
    if delta > max {
        delta = max;
    }
    if delta < 0 {
        delta = 0;
    }
    (max - delta) as u32
}
