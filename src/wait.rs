use std::future::Future;
use std::task::{Context, Poll};

use costack::{Engine, EngineError, RoutineId};
use futures::task::noop_waker_ref;

/// Drives `future` to completion from inside a routine.
///
/// The future is polled once per turn. While it is pending the routine stays runnable and yields,
/// so other routines keep making progress (and may be the ones completing the future).
pub fn wait_on<Fut, R>(engine: &Engine, future: Fut) -> Result<R, EngineError>
where
    Fut: Future<Output = R>,
{
    let me = engine.current().ok_or(EngineError::NotRunning)?;
    pin_utils::pin_mut!(future);
    let mut cx = Context::from_waker(noop_waker_ref());
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => return Ok(result),
            Poll::Pending => {
                stay_runnable(engine, me)?;
                engine.yield_now();
            }
        }
    }
}

/// Queues `me` for the next turn. A routine that already queued itself is left where it is.
pub(crate) fn stay_runnable(engine: &Engine, me: RoutineId) -> Result<(), EngineError> {
    match engine.ready(me) {
        Ok(()) | Err(EngineError::AlreadyQueued(_)) => Ok(()),
        Err(err) => Err(err),
    }
}
