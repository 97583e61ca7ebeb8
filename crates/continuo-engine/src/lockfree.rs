//! Lock-free scalar cells shared between the control threads and the audio
//! callback.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Cache-line aligned atomic f32.
///
/// Doubles as the storage for a plugin control-input port: [`Self::as_ptr`]
/// yields the stable `*mut f32` handed to `connect_port`. The plugin reads
/// the slot as a plain float; host-side writes go through the atomic, so the
/// last write wins and a torn read is impossible.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFloat {
    bits: AtomicU32,
}

impl AtomicFloat {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// The slot's address, for binding to a plugin port.
    #[inline]
    pub fn as_ptr(&self) -> *mut f32 {
        self.bits.as_ptr() as *mut f32
    }
}

impl Default for AtomicFloat {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Cache-line aligned atomic bool.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn swap(&self, value: bool) -> bool {
        self.value.swap(value, Ordering::AcqRel)
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new(false)
    }
}
