//! Policy for choosing one address out of several healthy candidates.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Rotate through candidates, one step per resolution.
    #[default]
    RoundRobin,
    /// Always the first candidate in registration order.
    First,
}

/// A `Selection` plus the rotation state it needs.
#[derive(Debug, Default)]
pub struct Selector {
    selection: Selection,
    counter: AtomicUsize,
}

impl Selector {
    pub fn new(selection: Selection) -> Self {
        Self {
            selection,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Picks one candidate, or `None` if there are none.
    pub fn pick<'a, T>(&self, candidates: &'a [T]) -> Option<&'a T> {
        if candidates.is_empty() {
            return None;
        }
        let index = match self.selection {
            Selection::First => 0,
            Selection::RoundRobin => self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len(),
        };
        candidates.get(index)
    }
}
