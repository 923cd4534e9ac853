//! Afina runs a cooperative key-value server on top of [costack](costack).
//!
//! All client sessions of a server share one thread and one stack. Each session is a routine of a
//! [`costack::Engine`] executing its commands against a [`Storage`](storage::Storage) and yielding
//! between them.
//!
//! ## Example
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use afina::session::{serve_sessions, Response};
//! use afina::storage::{MapBasedGlobalLockImpl, Storage};
//! use costack::Engine;
//!
//! let storage = Rc::new(MapBasedGlobalLockImpl::default());
//! storage.start().unwrap();
//!
//! let scripts = vec![
//!     vec!["set greeting hello".to_owned(), "get greeting".to_owned()],
//!     vec!["add greeting hi".to_owned()],
//! ];
//! let responses = Rc::new(RefCell::new(Vec::new()));
//! let out = responses.clone();
//! let engine = Engine::new().unwrap();
//! engine
//!     .start(move |engine| {
//!         *out.borrow_mut() = serve_sessions(engine, storage, scripts).unwrap();
//!     })
//!     .unwrap();
//!
//! assert_eq!(
//!     *responses.borrow(),
//!     vec![
//!         vec![Response::Stored, Response::Value("hello".to_owned())],
//!         vec![Response::NotStored],
//!     ]
//! );
//! ```

pub mod pool;
pub mod session;
pub mod storage;
mod wait;

pub use wait::wait_on;
