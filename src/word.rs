//! The packed 32-bit lock status word and the atomic primitives used to
//! manipulate it.
//!
//! Byte 0 (`locked`) and byte 1 (`contended`) are addressed independently so
//! the acquire fast path can flip `locked` without touching `contended`, and
//! vice versa for release. `AtomicU32` has no built-in "view as two
//! `AtomicU8`s" operation, so the byte-level accessors get there with a
//! pointer cast, the same trick the corpus reaches for when it needs a
//! sub-word atomic view (e.g. reinterpreting an atomic as a narrower integer
//! to hand to a futex syscall). This is little-endian- and
//! alignment-dependent, which is fine: the crate is Linux/x86_64 only.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// `locked` occupies the low byte, `contended` the second byte, and the top
/// two bytes are always zero.
pub const LOCKED_MASK: u32 = 0x0000_00ff;
pub const CONTENDED_SHIFT: u32 = 8;

/// The "held and contended" pattern: `locked = 1`, `contended = 1`.
pub const LOCKED_AND_CONTENDED: u32 = 0x0101;

#[repr(transparent)]
pub struct StatusWord(AtomicU32);

impl StatusWord {
    pub const fn new(value: u32) -> Self {
        Self(AtomicU32::new(value))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> u32 {
        self.0.load(order)
    }

    #[inline]
    pub fn as_atomic_u32(&self) -> &AtomicU32 {
        &self.0
    }

    /// CAS32: compare-and-swap the full 32-bit word.
    #[inline]
    pub fn compare_exchange(&self, current: u32, new: u32) -> Result<u32, u32> {
        self.0
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    /// XCHG32: unconditional exchange of the full 32-bit word.
    #[inline]
    pub fn swap(&self, new: u32, order: Ordering) -> u32 {
        self.0.swap(new, order)
    }

    /// A pointer to the `locked` byte (offset 0), valid for as long as
    /// `self` is.
    ///
    /// # Safety
    ///
    /// The returned pointer must only be dereferenced through `AtomicU8`
    /// operations; the byte it points at is always in bounds of, and
    /// suitably aligned within, the parent `AtomicU32`.
    #[inline]
    fn locked_byte(&self) -> &AtomicU8 {
        unsafe { &*(self.0.as_ptr() as *const AtomicU8) }
    }

    /// A pointer to the `contended` byte (offset 1). See `locked_byte` for
    /// the safety argument; little-endian x86_64 puts byte 1 right after
    /// byte 0.
    #[inline]
    fn contended_byte(&self) -> &AtomicU8 {
        unsafe { &*((self.0.as_ptr() as *const u8).add(1) as *const AtomicU8) }
    }

    #[inline]
    pub fn load_locked_byte(&self, order: Ordering) -> u8 {
        self.locked_byte().load(order)
    }

    /// XCHG8 on the `locked` byte.
    #[inline]
    pub fn xchg_locked_byte(&self, new: u8, order: Ordering) -> u8 {
        self.locked_byte().swap(new, order)
    }

    /// Clears the `contended` byte without disturbing `locked`.
    #[inline]
    pub fn clear_contended_byte(&self, order: Ordering) {
        self.contended_byte().store(0, order);
    }
}

/// PAUSE: the x86 spin-loop hint plus a full fence, run between consecutive
/// probe attempts in a spin loop. The fence is the portable equivalent of
/// the `mfence` the probe loop needs so each retry observes the other
/// thread's most recent store to `locked`, not a stale cached value.
#[inline]
pub fn pause() {
    std::hint::spin_loop();
    std::sync::atomic::fence(Ordering::SeqCst);
}
