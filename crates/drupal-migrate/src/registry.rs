//! Priority-ordered hook lists keyed by extension point.
//!
//! Shared by the transform registry and the query hooks. Steps run in
//! ascending priority; steps with equal priority run in registration order.

use std::collections::HashMap;
use std::hash::Hash;

/// Priority used by the built-in steps.
pub const DEFAULT_PRIORITY: i32 = 10;

struct Entry<F> {
    name: String,
    priority: i32,
    seq: u64,
    step: F,
}

/// Ordered steps per extension point.
pub struct HookRegistry<P, F> {
    points: HashMap<P, Vec<Entry<F>>>,
    next_seq: u64,
}

impl<P, F> Default for HookRegistry<P, F> {
    fn default() -> Self {
        Self {
            points: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<P: Eq + Hash, F> HookRegistry<P, F> {
    /// Registers a step.
    pub fn register(&mut self, point: P, name: impl Into<String>, step: F, priority: i32) {
        let entry = Entry {
            name: name.into(),
            priority,
            seq: self.next_seq,
            step,
        };
        self.next_seq += 1;

        let entries = self.points.entry(point).or_default();
        let at = entries.partition_point(|e| (e.priority, e.seq) <= (entry.priority, entry.seq));
        entries.insert(at, entry);
    }

    /// Removes every step registered under `name` at `point`. Returns how many were removed.
    pub fn unregister(&mut self, point: &P, name: &str) -> usize {
        let Some(entries) = self.points.get_mut(point) else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|e| e.name != name);
        before - entries.len()
    }

    /// Steps at `point` in execution order.
    pub fn steps(&self, point: &P) -> impl Iterator<Item = (&str, &F)> {
        self.points
            .get(point)
            .into_iter()
            .flatten()
            .map(|e| (e.name.as_str(), &e.step))
    }

    /// Step names at `point` in execution order.
    #[must_use]
    pub fn names(&self, point: &P) -> Vec<&str> {
        self.steps(point).map(|(name, _)| name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascending_priority_and_stable_ties() {
        let mut registry: HookRegistry<&str, u8> = HookRegistry::default();
        registry.register("p", "late", 1, 20);
        registry.register("p", "first-tie", 2, 10);
        registry.register("p", "early", 3, 5);
        registry.register("p", "second-tie", 4, 10);

        assert_eq!(
            registry.names(&"p"),
            vec!["early", "first-tie", "second-tie", "late"]
        );
    }

    #[test]
    fn test_points_are_independent() {
        let mut registry: HookRegistry<&str, u8> = HookRegistry::default();
        registry.register("a", "x", 1, 10);
        assert!(registry.names(&"b").is_empty());
        assert_eq!(registry.unregister(&"a", "x"), 1);
        assert!(registry.names(&"a").is_empty());
    }
}
