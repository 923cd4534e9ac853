use std::io::Error;
use std::ptr;

use libc::{mmap, MAP_ANON, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE};

use super::page_size;

/// A small side stack, mapped outside of the thread stack.
///
/// Restoring an image overwrites the region of the thread stack the restoring code is running on.
/// The copy is therefore performed after switching the stack pointer here, which makes the safety
/// margin explicit: nothing on this stack can ever overlap a routine's image.
///
/// Mmap is called with the MAP_NORESERVE flag, pages are only committed once the copy routine
/// touches them.
pub struct GuardStack {
    ptr: *mut u8,
    size: usize,
}

unsafe impl Send for GuardStack {}

impl GuardStack {
    /// Maps a new guard stack of at least `size` bytes (rounded up to whole pages).
    pub fn new(size: usize) -> Result<Self, Error> {
        let page = page_size();
        let size = size.max(page).div_ceil(page) * page;
        let ptr = unsafe {
            mmap(
                ptr::null_mut(),
                size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON | MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == MAP_FAILED {
            Err(Error::last_os_error())
        } else {
            Ok(Self {
                ptr: ptr as *mut u8,
                size,
            })
        }
    }

    /// Returns a pointer to the bottom (highest address) of the stack. It is page aligned.
    pub fn bottom(&self) -> *mut u8 {
        unsafe { self.ptr.add(self.size) }
    }

    /// Returns a pointer to the top (lowest address) of the stack.
    pub fn top(&self) -> *mut u8 {
        self.ptr
    }

    /// Size of the mapping in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true if `[start, start + len)` overlaps this stack.
    pub fn overlaps(&self, start: *const u8, len: usize) -> bool {
        let start = start as usize;
        let top = self.ptr as usize;
        start < top + self.size && top < start + len
    }
}

impl Drop for GuardStack {
    fn drop(&mut self) {
        let result = unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.size) };
        debug_assert_eq!(result, 0);
    }
}
