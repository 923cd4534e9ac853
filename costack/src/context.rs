use std::fmt;
use std::ptr::NonNull;

use crate::arch;
use crate::stack::{GuardStack, StackImage};
use crate::Engine;

/// Entry point of a routine. Invoked once, the first time the routine is scheduled.
pub(crate) type Entry = Box<dyn FnOnce(&Engine) + 'static>;

/// Stable handle of a routine.
///
/// The slot index is reused after [`Engine::reap`](crate::Engine::reap), the generation is not, so
/// a handle kept past reaping is reported as unknown instead of naming a newer routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutineId {
    index: u32,
    generation: u32,
}

impl RoutineId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        RoutineId { index, generation }
    }

    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Observable lifecycle of a routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineState {
    /// Created, entry not invoked yet.
    Fresh,
    /// Suspended with a captured image. Runnable if queued, otherwise blocked.
    Suspended,
    /// Executing on the real stack.
    Running,
    /// Entry returned (or panicked). Never runs again.
    Finished,
}

/// Where a suspended routine continues.
///
/// Created only by a capture, right after the stack above it was copied. It is not `Clone`, and
/// restoring consumes it, so a suspension can be resumed at most once.
#[must_use]
pub(crate) struct ResumePoint {
    sp: NonNull<u8>,
}

impl ResumePoint {
    /// # Safety
    ///
    /// `sp` must be a resume frame pushed by `arch::suspend`.
    pub(crate) unsafe fn new(sp: NonNull<u8>) -> Self {
        ResumePoint { sp }
    }

    pub(crate) fn sp(&self) -> *mut u8 {
        self.sp.as_ptr()
    }

    /// Copies `len` bytes from `image` back to the live stack and continues after the
    /// `arch::suspend` that created this resume point.
    ///
    /// # Safety
    ///
    /// `image` must be the capture taken together with this resume point, under the current stack
    /// bottom. Nothing owned by the calling frames is dropped.
    pub(crate) unsafe fn resume(self, image: *const u8, len: usize, guard: &GuardStack) -> ! {
        arch::restore(self.sp.as_ptr(), image, len, guard.bottom(), arch::copy_image)
    }
}

pub(crate) enum Stage {
    Fresh(Entry),
    Suspended(ResumePoint),
    Running,
    Finished,
}

/// Position in the run-queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Links {
    pub next: Option<RoutineId>,
    pub prev: Option<RoutineId>,
    pub queued: bool,
}

/// One cooperatively scheduled routine.
pub(crate) struct Context {
    pub stage: Stage,
    /// Heap copy of the stack, `None` before the first capture and after finishing.
    pub image: Option<StackImage>,
    /// The routine that transferred control here.
    pub caller: Option<RoutineId>,
    /// The routine this one last transferred control to.
    pub callee: Option<RoutineId>,
    pub links: Links,
}

impl Context {
    pub fn new(entry: Entry) -> Self {
        Context {
            stage: Stage::Fresh(entry),
            image: None,
            caller: None,
            callee: None,
            links: Links::default(),
        }
    }

    pub fn state(&self) -> RoutineState {
        match self.stage {
            Stage::Fresh(_) => RoutineState::Fresh,
            Stage::Suspended(_) => RoutineState::Suspended,
            Stage::Running => RoutineState::Running,
            Stage::Finished => RoutineState::Finished,
        }
    }

    /// Replaces the image and resume point with a capture of `[sp, sp + len)`. The previous
    /// buffer is released before the new one is allocated.
    ///
    /// # Safety
    ///
    /// `sp` must be a resume frame pushed by `arch::suspend` and `sp + len` the stack bottom.
    pub unsafe fn capture(&mut self, sp: NonNull<u8>, len: usize) {
        self.image = None;
        self.image = Some(StackImage::capture(sp.as_ptr(), len));
        self.stage = Stage::Suspended(ResumePoint::new(sp));
    }

    /// Takes the resume point out, leaving the context marked as running.
    pub fn take_resume(&mut self) -> Option<ResumePoint> {
        match std::mem::replace(&mut self.stage, Stage::Running) {
            Stage::Suspended(resume) => Some(resume),
            other => {
                self.stage = other;
                None
            }
        }
    }

    /// Marks the routine finished and frees its image.
    pub fn finish(&mut self) {
        self.stage = Stage::Finished;
        self.image = None;
    }
}
