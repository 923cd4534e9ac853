use std::io::Error;

use crossbeam::queue::ArrayQueue;

use costack::stack::GuardStack;
use costack::{Engine, EngineConfig};

/// Recycles guard stacks between engines, so creating an engine doesn't map a new one each time.
pub struct GuardStackPool {
    pool: ArrayQueue<GuardStack>,
    config: EngineConfig,
}

impl GuardStackPool {
    pub fn new(capacity: usize) -> Self {
        Self::with_config(capacity, EngineConfig::from_env())
    }

    pub fn with_config(capacity: usize, config: EngineConfig) -> Self {
        Self {
            pool: ArrayQueue::new(capacity.max(1)),
            config,
        }
    }

    /// Returns an engine using a pooled guard stack, or a freshly mapped one if the pool is empty.
    pub fn engine(&self) -> Result<Engine, Error> {
        match self.pool.pop() {
            None => Engine::with_config(self.config.clone()),
            Some(guard) => Ok(Engine::with_guard(guard)),
        }
    }

    pub fn recycle(&self, engine: Engine) {
        // If we push over the capacity just drop the stack.
        let _ = self.pool.push(engine.into_guard());
    }

    /// Number of guard stacks waiting for reuse.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
