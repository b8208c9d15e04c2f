//! The operating system side of the allocator: something that owns a program
//! break and can move it.
//!
//! As the allocator, our top level view of this has nothing to do with the
//! concrete APIs offered by each kernel. We only need the two primitives
//! described by [`BreakSource`].

use std::ptr::{self, NonNull};

use crate::utils::ALIGNMENT;

/// A contiguous address range that can grow and shrink at its upper end.
///
/// # Safety
///
/// Implementors guarantee that every byte between the address returned by the
/// first call to [`BreakSource::current`] and the current break is readable and
/// writable, and stays valid until the break is lowered below it.
pub unsafe trait BreakSource {
    /// Moves the break by `delta` bytes (positive to grow, negative to
    /// shrink). Returns the previous break, or `None` if the request is
    /// refused.
    ///
    /// **SAFETY**: lowering the break invalidates everything above the new
    /// break. The caller must not use that memory anymore.
    unsafe fn sbrk(&mut self, delta: isize) -> Option<*mut u8>;

    /// Returns the current break without moving it.
    fn current(&mut self) -> *mut u8 {
        unsafe { self.sbrk(0).unwrap_or(ptr::null_mut()) }
    }
}

/// The process break.
///
/// There is a single break per process, so there should be a single live
/// heap on top of it. Other users of the break (for example a libc `malloc`
/// that falls back to `brk`) are tolerated: the allocator never assumes it
/// still touches the break without checking.
pub struct SystemBreak {
    #[cfg(windows)]
    reservation: win32::Reservation,
}

#[cfg(unix)]
mod unix {
    use super::{BreakSource, SystemBreak};

    use libc::{c_void, intptr_t, sbrk};

    impl SystemBreak {
        /// **SAFETY**: the caller must not create a second `SystemBreak` or
        /// otherwise lower the process break below memory owned by a heap.
        pub unsafe fn new() -> Self {
            Self {}
        }
    }

    unsafe impl BreakSource for SystemBreak {
        unsafe fn sbrk(&mut self, delta: isize) -> Option<*mut u8> {
            unsafe {
                match sbrk(delta as intptr_t) {
                    addr if addr == usize::MAX as *mut c_void => None,
                    addr => Some(addr.cast::<u8>()),
                }
            }
        }
    }
}

#[cfg(windows)]
mod win32 {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr};

    use super::{BreakSource, SystemBreak};
    use crate::utils::align;

    use windows::Win32::System::{Memory, SystemInformation};

    /// Windows has no program break, so we emulate one: a large range of
    /// address space is reserved once and pages are committed or decommitted
    /// as the logical break moves.
    pub(super) struct Reservation {
        base: *mut u8,
        reserved: usize,
        brk: usize,
        committed: usize,
        page_size: usize,
    }

    /// Address space reserved for the emulated break.
    const RESERVATION_SIZE: usize = 1 << 30;

    fn page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }

    impl SystemBreak {
        /// **SAFETY**: kept `unsafe` for parity with the unix backend, where
        /// the break is process wide.
        pub unsafe fn new() -> Self {
            let addr = unsafe {
                Memory::VirtualAlloc(None, RESERVATION_SIZE, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS)
            };

            let reserved = if addr.is_null() { 0 } else { RESERVATION_SIZE };

            Self {
                reservation: Reservation {
                    base: addr.cast(),
                    reserved,
                    brk: 0,
                    committed: 0,
                    page_size: page_size(),
                },
            }
        }
    }

    unsafe impl BreakSource for SystemBreak {
        unsafe fn sbrk(&mut self, delta: isize) -> Option<*mut u8> {
            let r = &mut self.reservation;
            if r.base.is_null() {
                return None;
            }

            let old = r.brk;
            let new = old.checked_add_signed(delta)?;
            if new > r.reserved {
                return None;
            }

            let wanted = align(new, r.page_size);
            unsafe {
                if wanted > r.committed {
                    let start = r.base.add(r.committed);
                    let addr = Memory::VirtualAlloc(
                        Some(start as *const c_void),
                        wanted - r.committed,
                        Memory::MEM_COMMIT,
                        Memory::PAGE_READWRITE,
                    );
                    if addr.is_null() {
                        return None;
                    }
                    r.committed = wanted;
                } else if wanted < r.committed {
                    let start = r.base.add(wanted);
                    let _ = Memory::VirtualFree(start as *mut c_void, r.committed - wanted, Memory::MEM_DECOMMIT);
                    r.committed = wanted;
                }
            }

            r.brk = new;
            Some(r.base.wrapping_add(old))
        }
    }

    impl Drop for Reservation {
        fn drop(&mut self) {
            if !self.base.is_null() {
                unsafe {
                    let _ = Memory::VirtualFree(self.base as *mut c_void, 0, Memory::MEM_RELEASE);
                }
                self.base = ptr::null_mut();
            }
        }
    }
}

/// A fake break over an in-memory buffer, used to exercise the allocator
/// without touching the real process break.
///
/// The buffer is allocated once with the full `capacity` and never moves, so
/// addresses stay valid. Growing past the capacity is refused the same way an
/// exhausted kernel refuses `sbrk`.
pub struct SimulatedBreak {
    memory: NonNull<u64>,
    words: usize,
    brk: usize,
    granted: usize,
    refuse_next: bool,
}

impl SimulatedBreak {
    /// Creates a break that can grow up to `capacity` bytes (rounded up to
    /// [`ALIGNMENT`]).
    pub fn new(capacity: usize) -> Self {
        let words = capacity.div_ceil(ALIGNMENT).max(1);
        let memory: Box<[u64]> = vec![0u64; words].into_boxed_slice();
        let memory = NonNull::from(Box::leak(memory)).cast::<u64>();

        Self {
            memory,
            words,
            brk: 0,
            granted: 0,
            refuse_next: false,
        }
    }

    /// Start of the simulated address range.
    pub fn base(&self) -> *mut u8 {
        self.memory.as_ptr().cast()
    }

    /// Maximum number of bytes the break can grow to.
    pub fn capacity(&self) -> usize {
        self.words * ALIGNMENT
    }

    /// Bytes currently below the break.
    pub fn used(&self) -> usize {
        self.brk
    }

    /// Net bytes handed out through [`BreakSource::sbrk`]. Moves made with
    /// [`SimulatedBreak::foreign_sbrk`] are not counted.
    pub fn granted(&self) -> usize {
        self.granted
    }

    /// Makes the next growth request fail.
    pub fn refuse_next(&mut self) {
        self.refuse_next = true;
    }

    /// Moves the break on behalf of some other user of the address space, so
    /// the heap's tail no longer touches it.
    pub fn foreign_sbrk(&mut self, delta: usize) -> Option<*mut u8> {
        let prev = unsafe { self.sbrk(isize::try_from(delta).ok()?)? };
        self.granted -= delta;
        Some(prev)
    }
}

unsafe impl BreakSource for SimulatedBreak {
    unsafe fn sbrk(&mut self, delta: isize) -> Option<*mut u8> {
        if delta > 0 && std::mem::take(&mut self.refuse_next) {
            return None;
        }

        let new = self.brk.checked_add_signed(delta)?;
        if new > self.capacity() {
            return None;
        }

        let prev = self.base().wrapping_add(self.brk);
        self.brk = new;
        self.granted = self.granted.wrapping_add_signed(delta);

        Some(prev)
    }

    fn current(&mut self) -> *mut u8 {
        self.base().wrapping_add(self.brk)
    }
}

impl Drop for SimulatedBreak {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.memory.as_ptr(),
                self.words,
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_break_moves_both_ways() {
        let mut brk = SimulatedBreak::new(4096);
        let base = brk.base();

        assert_eq!(brk.current(), base);
        unsafe {
            assert_eq!(brk.sbrk(128), Some(base));
            assert_eq!(brk.current(), base.wrapping_add(128));
            assert_eq!(brk.sbrk(-64), Some(base.wrapping_add(128)));
        }
        assert_eq!(brk.used(), 64);
        assert_eq!(brk.granted(), 64);
    }

    #[test]
    fn simulated_break_refuses_past_capacity() {
        let mut brk = SimulatedBreak::new(256);
        let base = brk.base();

        unsafe {
            assert!(brk.sbrk(257).is_none());
            assert!(brk.sbrk(-8).is_none());
            assert_eq!(brk.sbrk(256), Some(base));
            assert!(brk.sbrk(8).is_none());
        }
    }

    #[test]
    fn refusal_is_one_shot() {
        let mut brk = SimulatedBreak::new(256);

        brk.refuse_next();
        unsafe {
            assert!(brk.sbrk(8).is_none());
            assert!(brk.sbrk(8).is_some());
        }
    }

    #[test]
    fn foreign_moves_are_not_granted_to_us() {
        let mut brk = SimulatedBreak::new(256);

        unsafe {
            assert!(brk.sbrk(64).is_some());
        }
        assert!(brk.foreign_sbrk(32).is_some());

        assert_eq!(brk.used(), 96);
        assert_eq!(brk.granted(), 64);
    }

    #[test]
    fn base_is_word_aligned() {
        let brk = SimulatedBreak::new(100);

        assert_eq!(brk.base().addr() % ALIGNMENT, 0);
        assert_eq!(brk.capacity(), 104);
    }
}
