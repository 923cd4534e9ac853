//! Scheduler state: the context arena, the running routine and the run-queue.
//!
//! Nothing in here switches stacks. The scheduler decides *where* control goes and hands back a
//! [`Jump`], the engine performs it once every borrow of the scheduler has been released.

use std::any::Any;
use std::ptr::NonNull;

use crate::arch;
use crate::context::{Context, Entry, Links, ResumePoint, RoutineId, RoutineState, Stage};
use crate::error::{fatal, EngineError};
use crate::run_queue::{Linked, RunQueue};
use crate::stack::StackImage;
use crate::{kdebug, ktrace, kwarn};

/// How to continue after a transfer was planned.
pub(crate) enum Jump {
    /// Start a never-run routine on a fresh frame chain at `bottom`.
    Enter { bottom: *mut u8 },
    /// Copy `len` bytes from `image` back to the stack and continue at `resume`.
    Restore {
        resume: ResumePoint,
        image: *const u8,
        len: usize,
    },
}

struct Slot {
    generation: u32,
    context: Option<Context>,
}

#[derive(Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Arena {
    fn insert(&mut self, context: Context) -> RoutineId {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.context = Some(context);
                RoutineId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    context: Some(context),
                });
                RoutineId::new(index, 0)
            }
        }
    }

    fn get(&self, id: RoutineId) -> Option<&Context> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.context.as_ref())
    }

    fn get_mut(&mut self, id: RoutineId) -> Option<&mut Context> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.context.as_mut())
    }

    /// Context the scheduler itself refers to. A dangling internal id means the bookkeeping is
    /// broken, so there is no way to continue.
    fn expect_mut(&mut self, id: RoutineId) -> &mut Context {
        match self.get_mut(id) {
            Some(context) => context,
            None => fatal(format_args!("routine {} vanished from the arena", id)),
        }
    }

    fn remove(&mut self, id: RoutineId) -> Option<Context> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        let context = slot.context.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        self.len -= 1;
        Some(context)
    }

    fn iter(&self) -> impl Iterator<Item = &Context> {
        self.slots.iter().filter_map(|slot| slot.context.as_ref())
    }

    fn clear(&mut self) {
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if slot.context.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.len = 0;
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Linked for Arena {
    fn links(&mut self, id: RoutineId) -> &mut Links {
        &mut self.expect_mut(id).links
    }
}

/// The thread that called `Engine::start`. It is suspended like a routine while routines run.
#[derive(Default)]
struct Driver {
    image: Option<StackImage>,
    resume: Option<ResumePoint>,
}

#[derive(Default)]
pub(crate) struct Scheduler {
    arena: Arena,
    current: Option<RoutineId>,
    alive: RunQueue,
    bottom: Option<NonNull<u8>>,
    driver: Driver,
    // Target of the transfer in flight, consumed right after the capture.
    pending: Option<RoutineId>,
    panic: Option<Box<dyn Any + Send + 'static>>,
}

impl Scheduler {
    /// Marks the stack bottom. All later capture/restore arithmetic is relative to it.
    pub fn begin(&mut self, bottom: *mut u8) -> Result<(), EngineError> {
        if self.bottom.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        // Leftover contexts hold images of another run and could never be restored.
        if self.arena.len() > 0 {
            return Err(EngineError::RoutinesExist(self.arena.len()));
        }
        // Frames pushed by `enter` must start 16 byte aligned.
        let bottom = (bottom as usize & !15) as *mut u8;
        self.bottom = NonNull::new(bottom);
        Ok(())
    }

    /// Tears down the run after the driver was resumed. Returns the first panic raised by a
    /// routine, if any.
    pub fn end(&mut self) -> Option<Box<dyn Any + Send + 'static>> {
        let blocked = self
            .arena
            .iter()
            .filter(|context| context.state() != RoutineState::Finished)
            .count();
        if blocked > 0 {
            kwarn!("engine halted with {} blocked routine(s), discarding them", blocked);
        }
        self.arena.clear();
        self.alive.clear();
        self.current = None;
        self.pending = None;
        self.bottom = None;
        self.driver = Driver::default();
        self.panic.take()
    }

    pub fn is_running(&self) -> bool {
        self.bottom.is_some()
    }

    pub fn bottom(&self) -> Option<*mut u8> {
        self.bottom.map(NonNull::as_ptr)
    }

    pub fn current(&self) -> Option<RoutineId> {
        self.current
    }

    pub fn queued(&self) -> usize {
        self.alive.len()
    }

    pub fn state(&self, id: RoutineId) -> Option<RoutineState> {
        self.arena.get(id).map(Context::state)
    }

    pub fn saved_len(&self, id: RoutineId) -> Option<usize> {
        self.arena.get(id)?.image.as_ref().map(StackImage::len)
    }

    /// Creates a never-run context and queues it.
    pub fn spawn(&mut self, entry: Entry) -> Result<RoutineId, EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        let id = self.arena.insert(Context::new(entry));
        self.alive.push_back(&mut self.arena, id);
        kdebug!("spawned routine {}", id);
        Ok(id)
    }

    /// Appends `id` to the run-queue.
    pub fn ready(&mut self, id: RoutineId) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        let context = self.arena.get(id).ok_or(EngineError::UnknownRoutine(id))?;
        if context.state() == RoutineState::Finished {
            return Err(EngineError::Finished(id));
        }
        if context.links.queued {
            return Err(EngineError::AlreadyQueued(id));
        }
        self.alive.push_back(&mut self.arena, id);
        Ok(())
    }

    /// Checks that control can be handed to `id` from the running routine.
    pub fn check_resumable(&self, id: RoutineId) -> Result<(), EngineError> {
        if self.current.is_none() {
            return Err(EngineError::NotRunning);
        }
        let context = self.arena.get(id).ok_or(EngineError::UnknownRoutine(id))?;
        match context.state() {
            RoutineState::Finished => Err(EngineError::Finished(id)),
            RoutineState::Running => Err(EngineError::AlreadyRunningRoutine(id)),
            RoutineState::Fresh | RoutineState::Suspended => Ok(()),
        }
    }

    /// Dequeues the routine `yield` should hand control to. `None` when nothing else is runnable,
    /// including when the head is the running routine itself.
    pub fn next_runnable(&mut self) -> Option<RoutineId> {
        let current = self.current?;
        let next = self.alive.pop_front(&mut self.arena)?;
        if next == current {
            return None;
        }
        Some(next)
    }

    /// Records `target` as the destination of the next capture and links caller/callee.
    ///
    /// `caller` is only set when a routine is running; a transfer made by the driver leaves it
    /// empty.
    pub fn prepare_transfer(&mut self, target: RoutineId) {
        if let Some(current) = self.current {
            self.arena.expect_mut(current).callee = Some(target);
            self.arena.expect_mut(target).caller = Some(current);
        }
        self.pending = Some(target);
    }

    /// Copies `[sp, bottom)` into the running routine's image (or the driver's).
    ///
    /// # Safety
    ///
    /// `sp` must be the resume frame just pushed by `arch::suspend` on this thread.
    pub unsafe fn capture(&mut self, sp: *mut u8) {
        let bottom = self.bottom_or_die();
        let len = match capture_len(sp, bottom) {
            Some(len) => len,
            None => fatal(format_args!(
                "stack length {} (sp {:p}, bottom {:p}) can't hold a resume frame, the bottom mark is wrong",
                (bottom as isize) - (sp as isize),
                sp,
                bottom
            )),
        };
        let sp = NonNull::new_unchecked(sp);
        match self.current {
            Some(current) => self.arena.expect_mut(current).capture(sp, len),
            None => {
                self.driver.image = None;
                self.driver.image = Some(StackImage::capture(sp.as_ptr(), len));
                self.driver.resume = Some(ResumePoint::new(sp));
            }
        }
    }

    /// Makes the pending target current.
    pub fn switch_to_pending(&mut self) -> Jump {
        match self.pending.take() {
            Some(target) => self.switch_to(target),
            None => fatal(format_args!("transfer without a target")),
        }
    }

    /// Makes `target` the running routine and says how to get there.
    fn switch_to(&mut self, target: RoutineId) -> Jump {
        ktrace!("transfer {:?} -> {}", self.current, target);
        self.alive.remove(&mut self.arena, target);
        self.current = Some(target);
        let bottom = self.bottom_or_die();
        let context = self.arena.expect_mut(target);
        if let Stage::Fresh(_) = context.stage {
            return Jump::Enter { bottom };
        }
        let resume = match context.take_resume() {
            Some(resume) => resume,
            None => fatal(format_args!("routine {} can't be resumed", target)),
        };
        let (image, len) = match &context.image {
            Some(image) => (image.as_ptr(), image.len()),
            None => fatal(format_args!("routine {} has no stack image", target)),
        };
        check_image(&resume, len, bottom);
        Jump::Restore { resume, image, len }
    }

    /// Takes the entry of the routine that was just entered.
    pub fn take_entry(&mut self) -> (RoutineId, Entry) {
        let current = match self.current {
            Some(current) => current,
            None => fatal(format_args!("entered a routine with nothing current")),
        };
        let context = self.arena.expect_mut(current);
        match std::mem::replace(&mut context.stage, Stage::Running) {
            Stage::Fresh(entry) => (current, entry),
            _ => fatal(format_args!("routine {} entered twice", current)),
        }
    }

    /// Finishes the running routine and picks who runs next: its caller if still suspended, else
    /// the head of the run-queue, else the driver (the engine halts).
    pub fn finish_current(&mut self, panic: Option<Box<dyn Any + Send + 'static>>) -> Jump {
        let current = match self.current.take() {
            Some(current) => current,
            None => fatal(format_args!("finished with nothing current")),
        };
        // A routine may have queued itself before returning.
        self.alive.remove(&mut self.arena, current);
        let context = self.arena.expect_mut(current);
        context.finish();
        let caller = context.caller;
        match panic {
            Some(payload) => {
                kwarn!("routine {} panicked", current);
                self.panic.get_or_insert(payload);
            }
            None => kdebug!("routine {} finished", current),
        }

        if let Some(caller) = caller.and_then(|id| self.arena.get_mut(id)) {
            if caller.callee == Some(current) {
                caller.callee = None;
            }
        }

        let caller = caller.filter(|&id| self.state(id) == Some(RoutineState::Suspended));
        match caller.or_else(|| self.alive.pop_front(&mut self.arena)) {
            Some(next) => self.switch_to(next),
            None => self.halt(),
        }
    }

    /// Plans the return to the driver.
    fn halt(&mut self) -> Jump {
        kdebug!("run-queue drained, returning to the driver");
        let bottom = self.bottom_or_die();
        let resume = match self.driver.resume.take() {
            Some(resume) => resume,
            None => fatal(format_args!("no driver to return to")),
        };
        let (image, len) = match &self.driver.image {
            Some(image) => (image.as_ptr(), image.len()),
            None => fatal(format_args!("driver has no stack image")),
        };
        check_image(&resume, len, bottom);
        Jump::Restore { resume, image, len }
    }

    /// Frees the slot of a finished routine.
    pub fn reap(&mut self, id: RoutineId) -> Result<(), EngineError> {
        let context = self.arena.get(id).ok_or(EngineError::UnknownRoutine(id))?;
        if context.state() != RoutineState::Finished {
            return Err(EngineError::NotFinished(id));
        }
        self.arena.remove(id);
        kdebug!("reaped routine {}", id);
        Ok(())
    }

    fn bottom_or_die(&self) -> *mut u8 {
        match self.bottom() {
            Some(bottom) => bottom,
            None => fatal(format_args!("transfer without a stack bottom")),
        }
    }
}

/// Bytes between `sp` and `bottom`, `None` if that can't even hold a resume frame.
fn capture_len(sp: *const u8, bottom: *const u8) -> Option<usize> {
    let len = (bottom as usize).checked_sub(sp as usize)?;
    if len < arch::RESUME_FRAME {
        return None;
    }
    Some(len)
}

/// An image only fits the bottom mark it was captured under.
fn image_fits(sp: *const u8, len: usize, bottom: *const u8) -> bool {
    (sp as usize).checked_add(len) == Some(bottom as usize)
}

fn check_image(resume: &ResumePoint, len: usize, bottom: *mut u8) {
    if !image_fits(resume.sp(), len, bottom) {
        fatal(format_args!(
            "image of {} bytes at {:p} was captured under another stack bottom ({:p})",
            len,
            resume.sp(),
            bottom
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Engine;

    fn running() -> Scheduler {
        let mut scheduler = Scheduler::default();
        let mut mark = [0u8; 64];
        scheduler.begin(mark.as_mut_ptr_range().end).unwrap();
        scheduler
    }

    #[test]
    fn spawn_requires_bottom() {
        let mut scheduler = Scheduler::default();
        assert_eq!(
            scheduler.spawn(Box::new(|_: &Engine| {})).unwrap_err(),
            EngineError::NotRunning
        );
    }

    #[test]
    fn bottom_is_aligned_and_marked_once() {
        let mut scheduler = Scheduler::default();
        scheduler.begin(0x1007 as *mut u8).unwrap();
        assert_eq!(scheduler.bottom(), Some(0x1000 as *mut u8));
        assert_eq!(
            scheduler.begin(0x2000 as *mut u8).unwrap_err(),
            EngineError::AlreadyRunning
        );
    }

    #[test]
    fn spawned_routines_are_queued_fresh() {
        let mut scheduler = running();
        let a = scheduler.spawn(Box::new(|_: &Engine| {})).unwrap();
        let b = scheduler.spawn(Box::new(|_: &Engine| {})).unwrap();
        assert_eq!(scheduler.state(a), Some(RoutineState::Fresh));
        assert_eq!(scheduler.queued(), 2);
        assert_eq!(scheduler.ready(b).unwrap_err(), EngineError::AlreadyQueued(b));
        assert_eq!(scheduler.saved_len(a), None);
    }

    #[test]
    fn yield_needs_a_running_routine() {
        let mut scheduler = running();
        scheduler.spawn(Box::new(|_: &Engine| {})).unwrap();
        assert_eq!(scheduler.next_runnable(), None);
        assert_eq!(scheduler.queued(), 1);
    }

    #[test]
    fn stale_handles_are_unknown() {
        let mut scheduler = running();
        let a = scheduler.spawn(Box::new(|_: &Engine| {})).unwrap();
        scheduler.alive.remove(&mut scheduler.arena, a);
        scheduler.arena.expect_mut(a).finish();
        scheduler.reap(a).unwrap();
        assert_eq!(scheduler.state(a), None);
        assert_eq!(scheduler.reap(a).unwrap_err(), EngineError::UnknownRoutine(a));

        let b = scheduler.spawn(Box::new(|_: &Engine| {})).unwrap();
        assert_ne!(a, b);
        assert_eq!(scheduler.state(b), Some(RoutineState::Fresh));
    }

    #[test]
    fn leftover_contexts_block_a_new_run() {
        let mut scheduler = Scheduler::default();
        scheduler.arena.insert(Context::new(Box::new(|_: &Engine| {})));
        assert_eq!(
            scheduler.begin(0x1000 as *mut u8).unwrap_err(),
            EngineError::RoutinesExist(1)
        );
        assert!(!scheduler.is_running());
    }

    #[test]
    fn capture_needs_room_for_a_resume_frame() {
        let bottom = 0x10000 as *const u8;
        let sp = |offset: usize| (0x10000 - offset) as *const u8;
        assert_eq!(capture_len(sp(256), bottom), Some(256));
        assert_eq!(capture_len(sp(arch::RESUME_FRAME), bottom), Some(arch::RESUME_FRAME));
        assert_eq!(capture_len(sp(arch::RESUME_FRAME - 8), bottom), None);
        assert_eq!(capture_len(bottom, bottom), None);
        // A stack pointer above the bottom mark.
        assert_eq!(capture_len(0x10040 as *const u8, bottom), None);
    }

    #[test]
    fn image_must_end_at_the_bottom_mark() {
        let bottom = 0x10000 as *const u8;
        assert!(image_fits(0xff00 as *const u8, 0x100, bottom));
        assert!(!image_fits(0xff00 as *const u8, 0x80, bottom));
        assert!(!image_fits(0xfe00 as *const u8, 0x100, bottom));
        assert!(!image_fits(usize::MAX as *const u8, 2, bottom));
    }

    #[test]
    fn finished_routine_leaves_the_queue() {
        let mut scheduler = running();
        let a = scheduler.spawn(Box::new(|_: &Engine| {})).unwrap();
        let b = scheduler.spawn(Box::new(|_: &Engine| {})).unwrap();
        // `a` runs and queues itself again before returning.
        scheduler.alive.remove(&mut scheduler.arena, a);
        scheduler.current = Some(a);
        scheduler.arena.expect_mut(a).stage = Stage::Running;
        scheduler.ready(a).unwrap();
        assert_eq!(scheduler.queued(), 2);

        match scheduler.finish_current(None) {
            Jump::Enter { .. } => {}
            Jump::Restore { .. } => panic!("expected to enter the fresh routine"),
        }
        assert_eq!(scheduler.current(), Some(b));
        assert_eq!(scheduler.queued(), 0);
        assert_eq!(scheduler.state(a), Some(RoutineState::Finished));
    }

    #[test]
    fn end_discards_everything() {
        let mut scheduler = running();
        scheduler.spawn(Box::new(|_: &Engine| {})).unwrap();
        assert!(scheduler.end().is_none());
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.queued(), 0);
        assert_eq!(scheduler.arena.len(), 0);
    }
}
