use std::arch::asm;
use std::ffi::c_void;

use super::CopyFn;

/// Returns the current value of the stack pointer.
#[inline(always)]
pub fn stack_pointer() -> *mut u8 {
    let sp: *mut u8;
    unsafe {
        asm!("mov {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    sp
}

/// Pushes a resume frame and calls `f(arg, sp)`.
///
/// Returns only after the image captured by `f` is restored with [`restore`].
#[inline(never)]
pub unsafe fn suspend(arg: *const c_void, f: unsafe extern "C" fn(*const c_void, *mut u8) -> !) {
    asm!(
        "adr x9, 1337f",
        // [sp + 16] = frame pointer, [sp + 24] = resume address
        "stp x29, x9, [sp, #-16]!",
        // [sp] = padding, [sp + 8] = x19 (can't be marked as clobbered)
        "stp xzr, x19, [sp, #-16]!",
        "mov x1, sp",
        "blr x10",
        "1337:",
        inout("x0") arg => _,
        inout("x10") f => _,
        out("x20") _, out("x21") _, out("x22") _, out("x23") _,
        out("x24") _, out("x25") _, out("x26") _, out("x27") _,
        out("x28") _,
        clobber_abi("C"),
    );
}

/// Copies `len` bytes of `image` to `sp` while running on the guard stack, then pops the resume
/// frame at `sp` and jumps into it.
///
/// `guard` must be the 16 byte aligned top of a stack that doesn't overlap `[sp, sp + len)`.
#[inline(always)]
pub unsafe fn restore(sp: *mut u8, image: *const u8, len: usize, guard: *mut u8, copy: CopyFn) -> ! {
    asm!(
        // Step off the stack we are about to overwrite.
        "mov sp, x9",
        "blr x10",
        // x20 is preserved by `copy` and holds the resume frame.
        "mov sp, x20",
        "ldp x9, x19, [sp], #16",
        "ldp x29, x9, [sp], #16",
        "br x9",
        in("x9") guard,
        in("x10") copy,
        in("x0") sp,
        in("x1") image,
        in("x2") len,
        in("x20") sp,
        options(noreturn)
    )
}

/// Starts `f(arg)` on a fresh frame chain rooted at `bottom`.
#[inline(always)]
pub unsafe fn enter(bottom: *mut u8, arg: *const c_void, f: unsafe extern "C" fn(*const c_void) -> !) -> ! {
    asm!(
        "mov sp, x9",
        // Null frame and link registers, backtraces end here.
        "mov x29, xzr",
        "mov x30, xzr",
        "br x10",
        in("x9") bottom,
        in("x10") f,
        in("x0") arg,
        options(noreturn)
    )
}
