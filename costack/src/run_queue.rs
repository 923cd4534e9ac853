//! Intrusive FIFO of runnable routines.
//!
//! The links live inside the contexts (see `Links`), the queue only remembers both ends. Removal
//! from the middle is O(1), which `resume` needs when it picks a routine that is also queued.

use crate::context::{Links, RoutineId};

/// Access to the links stored inside each context.
pub(crate) trait Linked {
    fn links(&mut self, id: RoutineId) -> &mut Links;
}

#[derive(Debug, Default)]
pub(crate) struct RunQueue {
    head: Option<RoutineId>,
    tail: Option<RoutineId>,
    len: usize,
}

impl RunQueue {
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[cfg(test)]
    pub fn head(&self) -> Option<RoutineId> {
        self.head
    }

    /// Appends `id`. The caller checks it isn't queued yet.
    pub fn push_back<L: Linked>(&mut self, arena: &mut L, id: RoutineId) {
        debug_assert!(!arena.links(id).queued);
        *arena.links(id) = Links {
            next: None,
            prev: self.tail,
            queued: true,
        };
        match self.tail {
            Some(tail) => arena.links(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    pub fn pop_front<L: Linked>(&mut self, arena: &mut L) -> Option<RoutineId> {
        let head = self.head?;
        self.remove(arena, head);
        Some(head)
    }

    /// Unlinks `id`. Returns false if it wasn't queued.
    pub fn remove<L: Linked>(&mut self, arena: &mut L, id: RoutineId) -> bool {
        let links = std::mem::take(arena.links(id));
        if !links.queued {
            return false;
        }
        match links.prev {
            Some(prev) => arena.links(prev).next = links.next,
            None => self.head = links.next,
        }
        match links.next {
            Some(next) => arena.links(next).prev = links.prev,
            None => self.tail = links.prev,
        }
        self.len -= 1;
        true
    }

    /// Forgets every entry. Links inside the contexts are left as they are.
    pub fn clear(&mut self) {
        *self = RunQueue::default();
    }
}
