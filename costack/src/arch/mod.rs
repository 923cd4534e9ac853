// All architectures expose the same small api. Here I want to take some time explaining the general
// idea behind it, because nothing in here looks like a regular context switch.
//
// Every routine runs on the *same* region of the thread stack, the one below `stack_bottom`. A
// suspended routine does not own a stack, it owns a heap copy ("image") of the bytes between its
// stack pointer at the suspension point and `stack_bottom`. Switching routines means: copy the
// running routine's bytes out, copy the target's bytes in, jump.
//
// At the core of the implementation there are 4 functions:
// * `stack_pointer() -> *mut u8`
// * `suspend(arg: *const c_void, f: extern "C" fn(*const c_void, *mut u8) -> !)`
// * `restore(sp: *mut u8, image: *const u8, len: usize, guard: *mut u8, copy: CopyFn) -> !`
// * `enter(bottom: *mut u8, arg: *const c_void, f: extern "C" fn(*const c_void) -> !) -> !`
//
// ### suspend
// Pushes a 4 word *resume frame* on the live stack and calls `f(arg, sp)` where `sp` points at the
// frame. `f` is expected to copy `[sp, stack_bottom)` to the heap and never return. Control comes
// back out of `suspend` only when someone later restores that image. On x86_64 the frame looks like
// this (aarch64 stores the same 4 words in a different order to keep `stp`/`ldp` pairs):
// ```
//      +------------------+  <- stack_bottom
//      |     .......      |
//      |  suspended frames|
//      |     .......      |
//      +------------------+
//      |Resume address    |
//      +------------------+
//      |Callee saved reg  |   (rbx / x19, LLVM won't let us mark them as clobbered)
//      +------------------+
//      |Frame pointer     |
//      +------------------+
//      |Padding           |  <- sp handed to `f`
//      +------------------+
// ```
// All other callee-saved registers are marked as clobbered, so the compiler spills whatever it needs
// into the suspended frames, which are part of the image.
//
// ### restore
// The image has to be written to `[sp, stack_bottom)`, but the code doing the copy is itself running
// somewhere on that same stack and could be overwritten mid-copy. So `restore` first moves the stack
// pointer to a separately mapped guard stack, calls `copy` there, then points the stack pointer at the
// restored resume frame, pops it and jumps to the resume address.
//
// ### enter
// A routine that never ran has no image. It gets a brand new frame chain starting at `stack_bottom`:
// the stack pointer is set there, a null return address is pushed (so unwinders stop), and `f` is
// jumped to. `f` must never return.

#[cfg(all(target_family = "unix", target_arch = "x86_64"))]
mod unix_x64;
#[cfg(all(target_family = "unix", target_arch = "x86_64"))]
pub use self::unix_x64::*;

#[cfg(all(target_family = "unix", target_arch = "aarch64"))]
mod unix_aarch64;
#[cfg(all(target_family = "unix", target_arch = "aarch64"))]
pub use self::unix_aarch64::*;

/// Size of the resume frame pushed by `suspend`, in bytes.
pub const RESUME_FRAME: usize = 4 * std::mem::size_of::<usize>();

/// Signature of the function `restore` runs on the guard stack.
pub type CopyFn = unsafe extern "C" fn(*mut u8, *const u8, usize);

/// Copies a stack image into place. Runs on the guard stack, called from `restore`.
pub unsafe extern "C" fn copy_image(dst: *mut u8, src: *const u8, len: usize) {
    std::ptr::copy_nonoverlapping(src, dst, len);
}
