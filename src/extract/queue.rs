//! FIFO admission queue with a single active head.

use std::collections::VecDeque;

/// Ordered list of submitted requests.
///
/// Requests are only ever appended at the tail and removed at the head. The
/// head is the one request allowed to drain its source and talk to the
/// worker; everything behind it waits untouched.
#[derive(Debug)]
pub struct RequestQueue<T> {
    items: VecDeque<T>,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append a request. Returns `true` if it became the head.
    pub fn enqueue(&mut self, item: T) -> bool {
        self.items.push_back(item);
        self.items.len() == 1
    }

    /// The active request, if any.
    pub fn head(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut T> {
        self.items.front_mut()
    }

    /// Remove the head once it reached a terminal outcome.
    pub fn pop_head(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Take every request out, head first. Used at shutdown only.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }
}
