//! Client sessions served as coroutines.
//!
//! Every session is a routine executing one command of its script per turn. After each command it
//! puts itself back at the tail of the run-queue and yields, so concurrent sessions interleave
//! command by command against the shared storage.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use costack::{kdebug, kwarn, Engine, EngineError, RoutineId};
use thiserror::Error;

use crate::storage::{Storage, StorageError};
use crate::wait::stay_runnable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `set <key> <value>`, stores unconditionally.
    Put { key: String, value: String },
    /// `add <key> <value>`, stores only a missing key.
    PutIfAbsent { key: String, value: String },
    /// `replace <key> <value>`, stores only an existing key.
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` is missing the {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("unexpected input after `{command}`: `{rest}`")]
    TrailingInput { command: &'static str, rest: String },
}

impl Command {
    /// Parses one memcached style line. The value is the rest of the line after the key and may
    /// contain spaces.
    pub fn parse(line: &str) -> Result<Command, ParseError> {
        let line = line.trim();
        let (name, rest) = split_word(line);
        match name {
            "" => Err(ParseError::Empty),
            "set" => {
                let (key, value) = key_value("set", rest)?;
                Ok(Command::Put { key, value })
            }
            "add" => {
                let (key, value) = key_value("add", rest)?;
                Ok(Command::PutIfAbsent { key, value })
            }
            "replace" => {
                let (key, value) = key_value("replace", rest)?;
                Ok(Command::Set { key, value })
            }
            "get" => Ok(Command::Get {
                key: key_only("get", rest)?,
            }),
            "delete" => Ok(Command::Delete {
                key: key_only("delete", rest)?,
            }),
            other => Err(ParseError::Unknown(other.to_owned())),
        }
    }

    /// Runs the command against `storage`.
    pub fn execute<S: Storage + ?Sized>(&self, storage: &S) -> Response {
        let result = match self {
            Command::Put { key, value } => storage.put(key, value).map(|_| Response::Stored),
            Command::PutIfAbsent { key, value } => {
                storage.put_if_absent(key, value).map(Response::stored_if)
            }
            Command::Set { key, value } => storage.set(key, value).map(Response::stored_if),
            Command::Get { key } => storage
                .get(key)
                .map(|value| value.map_or(Response::NotFound, Response::Value)),
            Command::Delete { key } => storage.delete(key).map(|deleted| {
                if deleted {
                    Response::Deleted
                } else {
                    Response::NotFound
                }
            }),
        };
        result.unwrap_or_else(|err: StorageError| Response::Error(err.to_string()))
    }
}

fn split_word(input: &str) -> (&str, &str) {
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (input, ""),
    }
}

fn key_value(command: &'static str, rest: &str) -> Result<(String, String), ParseError> {
    let (key, value) = split_word(rest);
    if key.is_empty() {
        return Err(ParseError::MissingArgument {
            command,
            argument: "key",
        });
    }
    if value.is_empty() {
        return Err(ParseError::MissingArgument {
            command,
            argument: "value",
        });
    }
    Ok((key.to_owned(), value.to_owned()))
}

fn key_only(command: &'static str, rest: &str) -> Result<String, ParseError> {
    let (key, rest) = split_word(rest);
    if key.is_empty() {
        return Err(ParseError::MissingArgument {
            command,
            argument: "key",
        });
    }
    if !rest.is_empty() {
        return Err(ParseError::TrailingInput {
            command,
            rest: rest.to_owned(),
        });
    }
    Ok(key.to_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Stored,
    NotStored,
    Deleted,
    NotFound,
    Value(String),
    Error(String),
}

impl Response {
    fn stored_if(stored: bool) -> Response {
        if stored {
            Response::Stored
        } else {
            Response::NotStored
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Stored => write!(f, "STORED"),
            Response::NotStored => write!(f, "NOT_STORED"),
            Response::Deleted => write!(f, "DELETED"),
            Response::NotFound => write!(f, "NOT_FOUND"),
            Response::Value(value) => write!(f, "VALUE {}", value),
            Response::Error(message) => write!(f, "ERROR {}", message),
        }
    }
}

/// Serves every script in its own routine and returns the responses, one list per script in the
/// order of `scripts`.
///
/// Must be called from a routine of a running engine. The calling routine stays runnable and
/// yields until all sessions finished.
pub fn serve_sessions<S>(
    engine: &Engine,
    storage: Rc<S>,
    scripts: Vec<Vec<String>>,
) -> Result<Vec<Vec<Response>>, EngineError>
where
    S: Storage + 'static,
{
    let me = engine.current().ok_or(EngineError::NotRunning)?;
    let outputs: Rc<RefCell<Vec<Vec<Response>>>> =
        Rc::new(RefCell::new(vec![Vec::new(); scripts.len()]));

    let mut sessions: Vec<RoutineId> = Vec::with_capacity(scripts.len());
    for (index, script) in scripts.into_iter().enumerate() {
        let storage = storage.clone();
        let outputs = outputs.clone();
        let id = engine.spawn(move |engine| session(engine, index, &*storage, script, &outputs))?;
        sessions.push(id);
    }

    while sessions.iter().any(|&id| engine.is_alive(id)) {
        stay_runnable(engine, me)?;
        engine.yield_now();
    }
    for id in sessions {
        engine.reap(id)?;
    }

    let outputs = outputs.replace(Vec::new());
    Ok(outputs)
}

fn session<S: Storage + ?Sized>(
    engine: &Engine,
    index: usize,
    storage: &S,
    script: Vec<String>,
    outputs: &RefCell<Vec<Vec<Response>>>,
) {
    let me = match engine.current() {
        Some(me) => me,
        None => return,
    };
    kdebug!("session {} started as routine {}", index, me);
    for line in script {
        let response = match Command::parse(&line) {
            Ok(command) => command.execute(storage),
            Err(err) => Response::Error(err.to_string()),
        };
        outputs.borrow_mut()[index].push(response);
        // The borrow above is released before switching.
        if let Err(err) = stay_runnable(engine, me) {
            kwarn!("session {} can't stay runnable: {}", index, err);
            outputs.borrow_mut()[index].push(Response::Error(err.to_string()));
            return;
        }
        engine.yield_now();
    }
    kdebug!("session {} done", index);
}
