use std::fmt;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::{Linked, List};

/// A FIFO queue of intrusive nodes, safe for any number of concurrent producers and consumers.
///
/// All operations take a single internal mutex for the duration of one list mutation. Popping
/// from an empty queue returns `None` right away; the queue never waits for data to arrive.
///
/// The queue does not own its nodes. It hands back exactly the pointers that were pushed.
pub struct Queue<T: Linked> {
    list: Mutex<List<T>>,
}

impl<T: Linked> Queue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            list: Mutex::new(List::new()),
        }
    }

    /// Appends `node` at the tail of the queue.
    ///
    /// # Safety
    ///
    /// * `node` must point to a live node that is not linked into any list or queue.
    /// * The node must stay alive and must not move until it has been popped again.
    pub unsafe fn push_back(&self, node: NonNull<T>) {
        // SAFETY: Forwarding the requirements to the caller.
        unsafe { self.list.lock().push_back(node) };
    }

    /// Removes and returns the node at the head of the queue, or `None` if the queue is empty.
    pub fn pop_front(&self) -> Option<NonNull<T>> {
        self.list.lock().pop_front()
    }

    /// Number of nodes in the queue at the moment of the call.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    /// Whether the queue was empty at the moment of the call.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }
}

impl<T: Linked> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked> fmt::Debug for Queue<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashSet;
    use std::iter;
    use std::sync::Arc;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::Links;

    struct Node {
        links: Links<Node>,
        value: usize,
    }

    // SAFETY: Returns the embedded field, always the same one.
    unsafe impl Linked for Node {
        unsafe fn links(node: NonNull<Self>) -> NonNull<Links<Self>> {
            // SAFETY: The caller guarantees that the node is alive.
            unsafe { NonNull::new_unchecked(&raw mut (*node.as_ptr()).links) }
        }
    }

    assert_impl_all!(Queue<Node>: Send, Sync, fmt::Debug, Default);

    fn node(value: usize) -> NonNull<Node> {
        NonNull::from(Box::leak(Box::new(Node {
            links: Links::new(),
            value,
        })))
    }

    fn take(node: NonNull<Node>) -> usize {
        // SAFETY: Every test node came from `Box::leak()` and is taken back exactly once.
        unsafe { Box::from_raw(node.as_ptr()) }.value
    }

    #[test]
    fn pop_from_empty_returns_none() {
        let queue = Queue::<Node>::new();

        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn preserves_fifo_order() {
        let queue = Queue::new();

        for value in 0..5 {
            // SAFETY: Nodes stay alive until taken back below.
            unsafe { queue.push_back(node(value)) };
        }

        assert_eq!(queue.len(), 5);

        let values: Vec<_> = iter::from_fn(|| queue.pop_front()).map(take).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn popped_node_can_be_pushed_again() {
        let queue = Queue::new();

        // SAFETY: The node stays alive until taken back below.
        unsafe { queue.push_back(node(9)) };

        let popped = queue.pop_front().unwrap();

        // SAFETY: Popping unlinked the node, so it may be pushed again.
        unsafe { queue.push_back(popped) };

        assert_eq!(queue.len(), 1);
        assert_eq!(take(queue.pop_front().unwrap()), 9);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Too slow under Miri.
    fn concurrent_producers_and_consumers_see_every_node_once() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let queue = Arc::new(Queue::new());

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        // SAFETY: The node stays alive until a consumer takes it back.
                        unsafe { queue.push_back(node(p * PER_PRODUCER + i)) };
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    let mut idle_rounds = 0;

                    while idle_rounds < 1000 {
                        match queue.pop_front() {
                            Some(node) => {
                                seen.push(take(node));
                                idle_rounds = 0;
                            }
                            None => {
                                idle_rounds += 1;
                                thread::yield_now();
                            }
                        }
                    }

                    seen
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        let mut all = HashSet::new();
        for consumer in consumers {
            for value in consumer.join().unwrap() {
                assert!(all.insert(value), "value {value} was popped twice");
            }
        }

        // Consumers may have given up before the last producer finished.
        while let Some(node) = queue.pop_front() {
            assert!(all.insert(take(node)));
        }

        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
    }
}
