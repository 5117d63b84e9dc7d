//! Interrupt masking.
//!
//! On bare metal this issues `cli`/`sti`. Hosted builds (unit tests) keep a
//! per-thread simulated interrupt flag so each test thread behaves like its
//! own CPU.

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum IntrLevel {
    IntrOn,
    IntrOff,
}

#[cfg(target_os = "none")]
mod arch {
    use core::arch::asm;

    pub fn disable() {
        unsafe { asm!("cli", options(nomem, nostack)) }
    }

    pub fn enable() {
        unsafe { asm!("sti", options(nomem, nostack)) }
    }

    pub fn enabled() -> bool {
        let flags: u32;
        unsafe {
            asm!(
                "pushfd",
                "mov {}, [esp]",
                "popfd",
                out(reg) flags
            );
        }
        flags & (1 << 9) != 0
    }
}

#[cfg(not(target_os = "none"))]
mod arch {
    use core::cell::Cell;

    std::thread_local! {
        static ENABLED: Cell<bool> = const { Cell::new(true) };
    }

    pub fn disable() {
        ENABLED.with(|e| e.set(false));
    }

    pub fn enable() {
        ENABLED.with(|e| e.set(true));
    }

    pub fn enabled() -> bool {
        ENABLED.with(|e| e.get())
    }
}

pub fn intr_get_level() -> IntrLevel {
    if arch::enabled() {
        IntrLevel::IntrOn
    } else {
        IntrLevel::IntrOff
    }
}

/// A guard for withholding interrupts.
///
/// Not `Send`: the saved level belongs to the CPU that took the guard.
pub struct InterruptsGuard {
    was_enabled: bool,
    _not_send: core::marker::PhantomData<*const ()>,
}

/// Prevents interrupts from occurring until the `InterruptsGuard` is dropped.
/// After it is dropped, the interrupts are returned to the previous state, so
/// guards nest.
pub fn hold_interrupts() -> InterruptsGuard {
    let was_enabled = arch::enabled();
    arch::disable();
    InterruptsGuard {
        was_enabled,
        _not_send: core::marker::PhantomData,
    }
}

impl Drop for InterruptsGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            arch::enable();
        }
    }
}
