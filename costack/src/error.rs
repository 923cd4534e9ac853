//! Errors reported by the engine.

use thiserror::Error;

use crate::context::RoutineId;

/// Precondition violations detected before a transfer is attempted.
///
/// Conditions that mean the stack images can no longer be trusted are not part of this type, they
/// abort the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The operation needs a running engine (`Engine::start` was not entered).
    #[error("engine is not running")]
    NotRunning,

    /// `Engine::start` was called while the engine is already driving routines.
    #[error("engine is already running")]
    AlreadyRunning,

    /// The stack bottom would be marked while contexts already exist.
    #[error("stack bottom marked after {0} routine(s) were created")]
    RoutinesExist(usize),

    /// The handle doesn't name a context of this engine (never existed or already reaped).
    #[error("unknown routine {0}")]
    UnknownRoutine(RoutineId),

    /// The routine's entry already returned, it can't be resumed or queued.
    #[error("routine {0} has finished")]
    Finished(RoutineId),

    /// The routine is the one executing right now.
    #[error("routine {0} is already running")]
    AlreadyRunningRoutine(RoutineId),

    /// The routine is already waiting in the run-queue.
    #[error("routine {0} is already queued")]
    AlreadyQueued(RoutineId),

    /// Only finished routines can be reaped.
    #[error("routine {0} has not finished")]
    NotFinished(RoutineId),
}

/// Logs `msg` and aborts the process.
///
/// Used when continuing would restore a corrupted stack image.
#[cold]
pub(crate) fn fatal(msg: std::fmt::Arguments<'_>) -> ! {
    crate::kerror!("fatal: {}", msg);
    std::process::abort()
}
