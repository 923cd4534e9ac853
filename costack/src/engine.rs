use std::cell::RefCell;
use std::ffi::c_void;
use std::io::Error;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use crate::arch;
use crate::config::EngineConfig;
use crate::context::{RoutineId, RoutineState};
use crate::error::EngineError;
use crate::scheduler::{Jump, Scheduler};
use crate::stack::GuardStack;
use crate::{kdebug, kinfo};

/// Cooperative coroutine engine.
///
/// All routines of an engine share the region of the thread stack below the point where
/// [`start`](Engine::start) was called. Only one of them runs at a time; switching copies the stack
/// of the running routine to the heap and copies the target's saved stack back in.
///
/// Routines receive `&Engine` and use it to spawn more routines, to [`yield_now`](Engine::yield_now)
/// and to [`resume`](Engine::resume) a specific routine. The engine is not `Sync`, everything happens
/// on the thread that called `start`.
///
/// Memory on a suspended routine's stack doesn't exist while it is suspended (its bytes live in a
/// heap copy). Never hand out references to a routine's locals to other routines.
pub struct Engine {
    scheduler: RefCell<Scheduler>,
    guard: GuardStack,
}

impl Engine {
    /// Creates an engine configured from the environment (see [`EngineConfig::from_env`]).
    pub fn new() -> Result<Self, Error> {
        Self::with_config(EngineConfig::from_env())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, Error> {
        Ok(Self::with_guard(GuardStack::new(config.guard_size)?))
    }

    /// Creates an engine that restores images on an existing guard stack.
    pub fn with_guard(guard: GuardStack) -> Self {
        Engine {
            scheduler: RefCell::new(Scheduler::default()),
            guard,
        }
    }

    /// Consume the engine and extract the guard stack.
    pub fn into_guard(self) -> GuardStack {
        self.guard
    }

    /// Marks the stack bottom, runs `main` as the first routine and returns once no routine is
    /// runnable anymore.
    ///
    /// Routines still blocked at that point are discarded. If a routine panicked, the first panic
    /// is resumed here after the engine halted.
    pub fn start<F>(&self, main: F) -> Result<(), EngineError>
    where
        F: FnOnce(&Engine) + 'static,
    {
        // Everything `drive` and the routines push lives below this frame.
        let bottom = arch::stack_pointer();
        self.drive(bottom, Box::new(main))
    }

    #[inline(never)]
    fn drive(&self, bottom: *mut u8, main: Box<dyn FnOnce(&Engine) + 'static>) -> Result<(), EngineError> {
        let main = {
            let mut scheduler = self.scheduler.borrow_mut();
            scheduler.begin(bottom)?;
            scheduler.spawn(main)?
        };
        kinfo!("engine started, stack bottom {:p}", bottom);

        self.transfer(main);

        let panic = self.scheduler.borrow_mut().end();
        kinfo!("engine halted");
        if let Some(panic) = panic {
            resume_unwind(panic);
        }
        Ok(())
    }

    /// Creates a routine running `f` and appends it to the run-queue. It starts the first time
    /// something yields to or resumes it.
    pub fn spawn<F>(&self, f: F) -> Result<RoutineId, EngineError>
    where
        F: FnOnce(&Engine) + 'static,
    {
        self.scheduler.borrow_mut().spawn(Box::new(f))
    }

    /// Hands the processor to the head of the run-queue.
    ///
    /// The running routine is not queued again; call [`ready`](Engine::ready) with
    /// [`current`](Engine::current) first for round-robin. Returns immediately when nothing else is
    /// runnable, otherwise returns once this routine is resumed.
    pub fn yield_now(&self) {
        let next = self.scheduler.borrow_mut().next_runnable();
        if let Some(next) = next {
            self.transfer(next);
        }
    }

    /// Transfers control to `id`, returning once the running routine is resumed.
    ///
    /// `id` becomes the callee of the running routine, and the running routine its caller: when
    /// `id` finishes, control comes back here.
    pub fn resume(&self, id: RoutineId) -> Result<(), EngineError> {
        self.scheduler.borrow().check_resumable(id)?;
        self.transfer(id);
        Ok(())
    }

    /// Appends `id` to the run-queue so a later [`yield_now`](Engine::yield_now) picks it.
    pub fn ready(&self, id: RoutineId) -> Result<(), EngineError> {
        self.scheduler.borrow_mut().ready(id)
    }

    /// Returns true if `id` exists and its entry hasn't returned yet.
    pub fn is_alive(&self, id: RoutineId) -> bool {
        matches!(
            self.state(id),
            Some(RoutineState::Fresh | RoutineState::Suspended | RoutineState::Running)
        )
    }

    /// Releases a finished routine. Its handle is unknown afterwards.
    pub fn reap(&self, id: RoutineId) -> Result<(), EngineError> {
        self.scheduler.borrow_mut().reap(id)
    }

    pub fn state(&self, id: RoutineId) -> Option<RoutineState> {
        self.scheduler.borrow().state(id)
    }

    /// The running routine, `None` outside of [`start`](Engine::start).
    pub fn current(&self) -> Option<RoutineId> {
        self.scheduler.borrow().current()
    }

    /// Size of the stack image saved at the last suspension of `id`.
    pub fn saved_len(&self, id: RoutineId) -> Option<usize> {
        self.scheduler.borrow().saved_len(id)
    }

    /// Number of routines waiting in the run-queue.
    pub fn queued(&self) -> usize {
        self.scheduler.borrow().queued()
    }

    /// Returns true between the start and the halt of a run.
    pub fn is_running(&self) -> bool {
        self.scheduler.borrow().is_running()
    }

    /// Suspends the running routine (or the driver) and continues at `target`.
    ///
    /// Returns twice in a sense: `arch::suspend` calls `on_suspend`, which never comes back, and
    /// the function only returns once some later transfer restores the captured image.
    fn transfer(&self, target: RoutineId) {
        self.scheduler.borrow_mut().prepare_transfer(target);
        unsafe { arch::suspend(self as *const Engine as *const c_void, on_suspend) }
    }

    /// Leaves the current frame chain for good. No borrow of the scheduler and nothing that needs
    /// dropping may be alive in the calling frames.
    fn jump(&self, jump: Jump) -> ! {
        let engine = self as *const Engine as *const c_void;
        match jump {
            Jump::Enter { bottom } => unsafe { arch::enter(bottom, engine, routine_main) },
            Jump::Restore { resume, image, len } => {
                debug_assert!(!self.guard.overlaps(resume.sp(), len));
                unsafe { resume.resume(image, len, &self.guard) }
            }
        }
    }

    /// Body of every routine's first frame.
    fn run_current(&self) -> ! {
        let (id, entry) = self.scheduler.borrow_mut().take_entry();
        kdebug!("routine {} entered", id);

        // It is not safe to unwind past this frame, there is nothing above it.
        let panic = catch_unwind(AssertUnwindSafe(|| entry(self))).err();

        let jump = self.scheduler.borrow_mut().finish_current(panic);
        self.jump(jump)
    }
}

/// Called by `arch::suspend` with the resume frame of the routine being suspended.
unsafe extern "C" fn on_suspend(engine: *const c_void, sp: *mut u8) -> ! {
    let engine = &*(engine as *const Engine);
    let jump = {
        let mut scheduler = engine.scheduler.borrow_mut();
        scheduler.capture(sp);
        scheduler.switch_to_pending()
    };
    engine.jump(jump)
}

/// First frame of a never-run routine, entered by `arch::enter` at the stack bottom.
unsafe extern "C" fn routine_main(engine: *const c_void) -> ! {
    let engine = &*(engine as *const Engine);
    engine.run_current()
}
