use std::mem::MaybeUninit;
use std::ptr;

/// Byte-exact heap copy of the stack region `[sp, stack_bottom)` of a suspended routine.
///
/// Every capture allocates a buffer of exactly the captured size; the image never grows beyond the
/// frame it holds.
pub struct StackImage {
    // The copied region contains padding and dead slots, so the bytes can't be treated as
    // initialized.
    buf: Box<[MaybeUninit<u8>]>,
}

impl StackImage {
    /// Copies `len` bytes starting at `sp` into a new heap buffer.
    ///
    /// # Safety
    ///
    /// `[sp, sp + len)` must be readable memory of the current thread's stack.
    pub unsafe fn capture(sp: *const u8, len: usize) -> StackImage {
        let mut buf = Box::<[u8]>::new_uninit_slice(len);
        ptr::copy_nonoverlapping(sp, buf.as_mut_ptr() as *mut u8, len);
        StackImage { buf }
    }

    /// Number of captured bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr() as *const u8
    }
}
