//! A lock-free MPSC queue: many producer threads may `push`, exactly one
//! consumer thread may `pop`. Used both by [`crate::work_thread::WorkThread`]'s
//! packet queue and by [`crate::event_loop::EventLoop::channel`]'s generic
//! task queue.
//!
//! Implemented as a Michael-Scott-style intrusive singly linked list with a
//! dummy head node, the standard shape for a lock-free MPSC/MPMC queue:
//! producers CAS a new node onto the tail, the (single) consumer walks from
//! head without any synchronization against other consumers because there
//! is only ever one.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    value: Option<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn new(value: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            value,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// A multi-producer, single-consumer unbounded queue.
pub struct MpscQueue<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
}

unsafe impl<T: Send> Send for MpscQueue<T> {}
unsafe impl<T: Send> Sync for MpscQueue<T> {}

impl<T> MpscQueue<T> {
    pub fn new() -> MpscQueue<T> {
        let stub = Node::new(None);
        MpscQueue {
            head: AtomicPtr::new(stub),
            tail: AtomicPtr::new(stub),
        }
    }

    /// Many threads may call this concurrently.
    pub fn push(&self, value: T) {
        let node = Node::new(Some(value));
        let prev = self.tail.swap(node, Ordering::AcqRel);
        // SAFETY: `prev` was the tail; no other push can still be linking
        // off it since it has already been swapped out above.
        unsafe {
            (*prev).next.store(node, Ordering::Release);
        }
    }

    /// Only the single designated consumer thread may call this.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: `head` is always a live node owned by this queue; the
        // consumer is the only thread that ever reads through `head`.
        let next = unsafe { (*head).next.load(Ordering::Acquire) };
        if next.is_null() {
            return None;
        }
        // SAFETY: `next` was just checked non-null and is a live node.
        let value = unsafe { (*next).value.take() };
        self.head.store(next, Ordering::Release);
        // The old head (a stub with no payload) is now unreachable from any
        // producer; reclaim it.
        unsafe {
            drop(Box::from_raw(head));
        }
        value
    }
}

impl<T> Default for MpscQueue<T> {
    fn default() -> MpscQueue<T> {
        MpscQueue::new()
    }
}

impl<T> Drop for MpscQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
        let head = self.head.load(Ordering::Acquire);
        if !head.is_null() {
            unsafe {
                drop(Box::from_raw(head));
            }
        }
    }
}

/// A length-prefixed message moved through a work thread's queue.
#[derive(Clone, Debug)]
pub struct Packet {
    pub id: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(id: u16, payload: Vec<u8>) -> Packet {
        Packet { id, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_thread_fifo() {
        let q = MpscQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn many_producers_preserve_per_producer_order() {
        let q = Arc::new(MpscQueue::new());
        let producers = 8;
        let per_producer = 1000;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..per_producer {
                        q.push((p, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut last_seen = vec![-1i32; producers];
        let mut total = 0;
        while let Some((p, i)) = q.pop() {
            assert!(i as i32 > last_seen[p]);
            last_seen[p] = i as i32;
            total += 1;
        }
        assert_eq!(total, producers * per_producer);
    }
}
