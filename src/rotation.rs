//! Lock-free round-robin rotation
//!
//! Dispenses items from a fixed set in cyclic order using an atomic counter.
//! Simple, predictable, and lock-free.

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cyclic dispenser over a fixed, non-empty array
#[derive(Debug)]
pub struct RoundRobin<T> {
    items: Vec<T>,
    /// Current position in rotation (atomic for lock-free access)
    current: AtomicUsize,
}

impl<T> RoundRobin<T> {
    /// Create a rotator over `items`
    ///
    /// Fails if `items` is empty; an empty rotation has no meaningful
    /// `next()` and callers that may be empty should wrap in an `Option`.
    pub fn new(items: Vec<T>) -> Result<Self> {
        if items.is_empty() {
            anyhow::bail!("Cannot rotate over an empty set");
        }
        Ok(Self {
            items,
            current: AtomicUsize::new(0),
        })
    }

    /// Next item in rotation
    ///
    /// Atomically increments the counter and indexes modulo length, so the
    /// counter wrapping around `usize::MAX` only skews the cycle by one
    /// position rather than panicking or repeating.
    pub fn next(&self) -> &T {
        let index = self.current.fetch_add(1, Ordering::Relaxed);
        &self.items[index % self.items.len()]
    }

    /// Number of items in rotation
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        // Constructor rejects empty sets; kept for API completeness
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_is_construction_error() {
        let result = RoundRobin::<u32>::new(vec![]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_single_item() {
        let rotator = RoundRobin::new(vec!["only"]).unwrap();
        assert_eq!(*rotator.next(), "only");
        assert_eq!(*rotator.next(), "only");
        assert_eq!(*rotator.next(), "only");
    }

    #[test]
    fn test_cycles_in_order() {
        let rotator = RoundRobin::new(vec![1, 2, 3]).unwrap();
        let picked: Vec<i32> = (0..6).map(|_| *rotator.next()).collect();
        assert_eq!(picked, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_counter_wraparound() {
        let rotator = RoundRobin::new(vec![0usize, 1, 2]).unwrap();
        // Park the counter just below the wrap point
        rotator.current.store(usize::MAX, Ordering::Relaxed);
        let a = *rotator.next(); // index usize::MAX
        let b = *rotator.next(); // index 0 after wrap
        assert_eq!(a, usize::MAX % 3);
        assert_eq!(b, 0);
    }

    #[test]
    fn test_concurrent_distribution() {
        let rotator = Arc::new(RoundRobin::new(vec![0, 1, 2]).unwrap());
        let mut handles = vec![];
        let counts = Arc::new(std::sync::Mutex::new([0usize; 3]));

        for _ in 0..9 {
            let rotator = Arc::clone(&rotator);
            let counts = Arc::clone(&counts);
            handles.push(std::thread::spawn(move || {
                let item = *rotator.next();
                counts.lock().unwrap()[item] += 1;
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Nine draws over three items land three each
        assert_eq!(*counts.lock().unwrap(), [3, 3, 3]);
    }
}
