//! Guarded sections for state shared between the application and interrupt handlers.

use core::cell::RefCell;

/// Masks the interrupt sources that can touch a [`Guarded`] value.
///
/// # Safety
///
/// While `masked` is running `f`, no other execution context that can reach the same [`Guarded`]
/// value may run. Implementations that mask only some interrupt sources are sound only when every
/// context touching the value is either the caller or one of the masked sources.
pub unsafe trait InterruptMask {
    /// Runs `f` with the interrupt sources masked.
    fn masked<R>(&self, f: impl FnOnce() -> R) -> R;
}

/// Masks everything by entering a global critical section.
///
/// The implementation comes from whichever `critical-section` provider the application links
/// (`cortex-m`'s single-core one on MCUs, the `std` one in host tests).
#[derive(Clone, Copy, Debug, Default)]
pub struct CriticalSection;

unsafe impl InterruptMask for CriticalSection {
    fn masked<R>(&self, f: impl FnOnce() -> R) -> R {
        critical_section::with(|_| f())
    }
}

/// Masks only the listed NVIC interrupt lines, leaving unrelated interrupts running.
///
/// Lines that were already masked on entry stay masked on exit, so nested sections are fine. At
/// most 32 lines are supported.
#[cfg(feature = "cortex-m")]
#[derive(Clone, Copy)]
pub struct NvicMask<I: 'static> {
    sources: &'static [I],
}

#[cfg(feature = "cortex-m")]
impl<I: cortex_m::interrupt::InterruptNumber> NvicMask<I> {
    /// `sources` must list every interrupt whose handler calls into the port: the USB interrupt and
    /// the interrupt that runs the coalescing timer callback.
    pub const fn new(sources: &'static [I]) -> Self {
        assert!(sources.len() <= 32);
        Self { sources }
    }
}

#[cfg(feature = "cortex-m")]
unsafe impl<I: cortex_m::interrupt::InterruptNumber> InterruptMask for NvicMask<I> {
    fn masked<R>(&self, f: impl FnOnce() -> R) -> R {
        use cortex_m::peripheral::NVIC;

        let mut was_enabled = 0u32;
        for (n, &irq) in self.sources.iter().enumerate() {
            if NVIC::is_enabled(irq) {
                was_enabled |= 1 << n;
                NVIC::mask(irq);
            }
        }
        cortex_m::asm::dsb();
        cortex_m::asm::isb();

        let r = f();

        for (n, &irq) in self.sources.iter().enumerate() {
            if was_enabled & (1 << n) != 0 {
                // Only lines this section masked itself are re-enabled.
                unsafe { NVIC::unmask(irq) };
            }
        }
        r
    }
}

/// A value that is only reachable from inside a guarded section.
///
/// Re-entering [`Guarded::lock`] on the same value from inside its own closure panics instead of
/// aliasing the mutable reference.
pub struct Guarded<T, M> {
    mask: M,
    cell: RefCell<T>,
}

// SAFETY: every access to `cell` goes through `lock`, which holds `mask`. The `InterruptMask`
// contract guarantees no other context runs while it is held.
unsafe impl<T: Send, M: InterruptMask + Sync> Sync for Guarded<T, M> {}

impl<T, M: InterruptMask> Guarded<T, M> {
    pub const fn new(mask: M, value: T) -> Self {
        Self {
            mask,
            cell: RefCell::new(value),
        }
    }

    /// Runs `f` on the value inside a guarded section.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.mask.masked(|| f(&mut self.cell.borrow_mut()))
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::{CriticalSection, Guarded};

    #[test]
    fn lock_gives_exclusive_access() {
        let counter = Guarded::new(CriticalSection, 0u32);

        counter.lock(|c| *c += 1);
        let seen = counter.lock(|c| {
            *c += 1;
            *c
        });

        assert_eq!(seen, 2);
    }

    #[test]
    fn distinct_values_nest() {
        let a = Guarded::new(CriticalSection, 1u8);
        let b = Guarded::new(CriticalSection, 2u8);

        let sum = a.lock(|a| b.lock(|b| *a + *b));
        assert_eq!(sum, 3);
    }

    #[test]
    fn shared_across_threads() {
        let counter = Guarded::new(CriticalSection, 0u32);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        counter.lock(|c| *c += 1);
                    }
                });
            }
        });

        assert_eq!(counter.lock(|c| *c), 4000);
    }
}
