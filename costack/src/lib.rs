//! Costack provides single-thread cooperative coroutines that share one call stack.
//!
//! Instead of giving every routine its own stack, all routines run on the thread stack below the
//! point where [`Engine::start`] was called. Suspending a routine copies its part of the stack to a
//! heap buffer, resuming it copies the bytes back and jumps to where it left off.
//!
//! It consists of three parts:
//! 1. The [engine](struct.Engine.html), creating routines and moving control between them.
//! 2. A [guard stack](stack/struct.GuardStack.html) the engine steps onto while a stack image is
//!    being copied back.
//! 3. Architecture specific assembly (Unix x86_64 and aarch64).
//! ## Example
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use costack::Engine;
//!
//! fn main() {
//!     let log = Rc::new(RefCell::new(Vec::new()));
//!     let engine = Engine::new().unwrap();
//!     let out = log.clone();
//!     engine
//!         .start(move |engine| {
//!             let pong_log = out.clone();
//!             engine
//!                 .spawn(move |engine| {
//!                     pong_log.borrow_mut().push("pong");
//!                     engine.yield_now();
//!                 })
//!                 .unwrap();
//!             out.borrow_mut().push("ping");
//!             engine.yield_now();
//!             out.borrow_mut().push("ping again");
//!         })
//!         .unwrap();
//!     assert_eq!(*log.borrow(), vec!["ping", "pong", "ping again"]);
//! }
//! ```

#[cfg(not(all(unix, any(target_arch = "x86_64", target_arch = "aarch64"))))]
compile_error!("costack supports Unix on x86_64 and aarch64 only");

mod arch;
pub mod config;
mod context;
mod engine;
mod error;
pub mod kprint;
mod run_queue;
mod scheduler;
pub mod stack;

pub use config::EngineConfig;
pub use context::{RoutineId, RoutineState};
pub use engine::Engine;
pub use error::EngineError;
