//! Per-thread stack bridging "child" context events and the "parent" event that consumes them.
//!
//! A child event pushes its rendered text under the integer value of its leading `id` field. A
//! later parent event on the same thread pops that text back out by the values of its
//! `contextSequenceId*` fields. The low byte of the key encodes how many pushes make up a
//! complete context, so a partial context is still returned, but annotated.

use ahash::RandomState;
use hashbrown::HashMap;
use log::debug;

pub const INCOMPLETE_CONTEXT_MARKER: &str = " !!!Incomplete context!!! ";
pub const CONTEXT_NOT_FOUND_MARKER: &str = " !!!Context Data Not Found!!! ";

#[derive(Debug, Clone, PartialEq, Eq)]
struct ContextEntry {
    key: u64,
    expected_count: u32,
    seen_count: u32,
    text: String,
}

#[derive(Debug, Default)]
pub struct CorrelationStack {
    threads: HashMap<(u32, u32), Vec<ContextEntry>, RandomState>,
}

/// Number of pushes a complete context is made of, folded into the low byte of the key.
pub fn expected_count(key: u64) -> u32 {
    (key & 0xFF) as u32
}

impl CorrelationStack {
    pub fn new() -> Self {
        CorrelationStack::default()
    }

    /// Push `text` for `key` on the stack of `(pid, tid)`.
    ///
    /// Consecutive pushes with the same key accumulate into the top entry.
    pub fn push(&mut self, pid: u32, tid: u32, key: u64, text: &str) {
        let stack = self.threads.entry((pid, tid)).or_default();

        if let Some(top) = stack.last_mut().filter(|top| top.key == key) {
            top.text.push_str(text);
            top.seen_count += 1;
            debug!(
                "appended context {:#x} on ({}, {}), seen {}/{}",
                key, pid, tid, top.seen_count, top.expected_count
            );
            return;
        }

        debug!("pushed context {:#x} on ({}, {})", key, pid, tid);
        stack.push(ContextEntry {
            key,
            expected_count: expected_count(key),
            seen_count: 1,
            text: text.to_string(),
        });
    }

    /// Pop the topmost entry matching `key` from the stack of `(pid, tid)`.
    ///
    /// Everything above the match is discarded with it. When `clear_remainder` is set the
    /// thread's whole stack is dropped afterwards. Returns `None` when nothing matches.
    /// A key whose expected count is zero is a no-op returning an empty string.
    pub fn pop(&mut self, pid: u32, tid: u32, key: u64, clear_remainder: bool) -> Option<String> {
        if expected_count(key) == 0 {
            return Some(String::new());
        }

        let stack = self.threads.get_mut(&(pid, tid))?;
        let index = stack.iter().rposition(|entry| entry.key == key)?;

        let entry = stack.swap_remove(index);
        stack.truncate(index);
        if clear_remainder {
            stack.clear();
        }
        if stack.is_empty() {
            self.threads.remove(&(pid, tid));
        }

        debug!(
            "popped context {:#x} on ({}, {}), seen {}/{}",
            key, pid, tid, entry.seen_count, entry.expected_count
        );

        let mut text = entry.text;
        if entry.seen_count != entry.expected_count {
            text.push_str(INCOMPLETE_CONTEXT_MARKER);
        }
        Some(text)
    }

    /// Number of pending entries for `(pid, tid)`.
    pub fn depth(&self, pid: u32, tid: u32) -> usize {
        self.threads.get(&(pid, tid)).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn clear(&mut self) {
        self.threads.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expected_count_uses_low_byte() {
        assert_eq!(expected_count(1), 1);
        assert_eq!(expected_count(258), 2);
        assert_eq!(expected_count(0x1003), 3);
        assert_eq!(expected_count(256), 0);
        assert_eq!(expected_count(u64::MAX), 0xFF);
    }

    #[test]
    fn test_push_then_pop_round_trip() {
        let mut stack = CorrelationStack::new();
        stack.push(1, 1, 1, "X");
        assert_eq!(stack.pop(1, 1, 1, false), Some("X".to_string()));
        assert_eq!(stack.pop(1, 1, 1, false), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_incomplete_context_is_annotated() {
        let mut stack = CorrelationStack::new();
        stack.push(1, 1, 2, "X");
        assert_eq!(
            stack.pop(1, 1, 2, false),
            Some(format!("X{}", INCOMPLETE_CONTEXT_MARKER))
        );
    }

    #[test]
    fn test_repeated_pushes_accumulate() {
        let mut stack = CorrelationStack::new();
        stack.push(1, 1, 2, "part one;");
        stack.push(1, 1, 2, "part two");
        assert_eq!(stack.depth(1, 1), 1);
        assert_eq!(
            stack.pop(1, 1, 2, false),
            Some("part one;part two".to_string())
        );
    }

    #[test]
    fn test_pop_discards_entries_above_the_match() {
        let mut stack = CorrelationStack::new();
        stack.push(1, 1, 1, "outer");
        stack.push(1, 1, 257, "inner");
        stack.push(1, 1, 513, "orphan");
        assert_eq!(stack.pop(1, 1, 257, false), Some("inner".to_string()));
        assert_eq!(stack.depth(1, 1), 1);
        assert_eq!(stack.pop(1, 1, 513, false), None);
        assert_eq!(stack.pop(1, 1, 1, false), Some("outer".to_string()));
    }

    #[test]
    fn test_clear_remainder_drops_the_thread() {
        let mut stack = CorrelationStack::new();
        stack.push(1, 1, 1, "stale");
        stack.push(1, 1, 257, "inner");
        assert_eq!(stack.pop(1, 1, 257, true), Some("inner".to_string()));
        assert_eq!(stack.depth(1, 1), 0);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_threads_are_isolated() {
        let mut stack = CorrelationStack::new();
        stack.push(1, 1, 1, "X");
        assert_eq!(stack.pop(1, 2, 1, false), None);
        assert_eq!(stack.pop(2, 1, 1, false), None);
        assert_eq!(stack.depth(1, 1), 1);
    }

    #[test]
    fn test_zero_count_key_is_a_no_op() {
        let mut stack = CorrelationStack::new();
        stack.push(1, 1, 256, "X");
        assert_eq!(stack.pop(1, 1, 0, false), Some(String::new()));
        assert_eq!(stack.pop(1, 1, 256, false), Some(String::new()));
        assert_eq!(stack.depth(1, 1), 1);
    }
}
