use std::arch::asm;
use std::ffi::c_void;

use super::CopyFn;

/// Returns the current value of the stack pointer.
#[inline(always)]
pub fn stack_pointer() -> *mut u8 {
    let sp: *mut u8;
    unsafe {
        asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    sp
}

/// Pushes a resume frame and calls `f(arg, sp)`.
///
/// Returns only after the image captured by `f` is restored with [`restore`].
#[inline(never)]
pub unsafe fn suspend(arg: *const c_void, f: unsafe extern "C" fn(*const c_void, *mut u8) -> !) {
    asm!(
        // Save the continuation spot after we jump back here to be after this asm block.
        "lea rax, [rip + 1337f]",
        "push rax",
        // rbx and rbp can't be marked as clobbered, preserve them inside the frame.
        "push rbx",
        "push rbp",
        // Keep the stack 16 byte aligned for the call.
        "push 0",
        // Pass the resume frame as the 2nd argument.
        "mov rsi, rsp",
        "call r11",
        "1337:",
        inout("rdi") arg => _,
        inout("r11") f => _,
        // Mark the callee-saved registers as clobbered, the rest is covered by the C abi.
        out("r12") _, out("r13") _, out("r14") _, out("r15") _,
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
        "mov rsp, {guard}",
        "call {copy}",
        // r12 is preserved by `copy` and holds the resume frame.
        "lea rsp, [r12 + 8]",
        "pop rbp",
        "pop rbx",
        // Pops the continuation spot saved by `suspend`.
        "ret",
        guard = in(reg) guard,
        copy = in(reg) copy,
        in("rdi") sp,
        in("rsi") image,
        in("rdx") len,
        in("r12") sp,
        options(noreturn)
    )
}

/// Starts `f(arg)` on a fresh frame chain rooted at `bottom`.
#[inline(always)]
pub unsafe fn enter(bottom: *mut u8, arg: *const c_void, f: unsafe extern "C" fn(*const c_void) -> !) -> ! {
    asm!(
        "mov rsp, {bottom}",
        "xor ebp, ebp",
        // Null return address, backtraces end here.
        "push 0",
        "jmp {f}",
        bottom = in(reg) bottom,
        f = in(reg) f,
        in("rdi") arg,
        options(noreturn)
    )
}
