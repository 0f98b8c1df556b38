use std::collections::HashMap;

use crate::trace::EMPTY_STACK_INDEX;

/// Interns raw address vectors from StackBlock payloads by (length, addresses) identity, so that
/// events sharing a stack-id — and, just as commonly, events with distinct stack-ids but an
/// identical address vector — end up pointing at the same equivalence class. Traces routinely
/// contain tens of thousands of structurally identical stacks.
#[derive(Default)]
pub struct StackIndex {
    /// stack-id (as seen in StackBlock / event headers) -> equivalence-class index.
    by_stack_id: HashMap<u32, usize>,
    /// equivalence-class index -> canonical address vector.
    classes: Vec<Vec<u64>>,
    /// canonical address vector -> equivalence-class index, for dedup on insert.
    class_lookup: HashMap<Vec<u64>, usize>,
}

impl StackIndex {
    pub fn new() -> Self {
        StackIndex::default()
    }

    /// Registers a stack-id with its raw address vector, interning by value.
    pub fn register(&mut self, stack_id: u32, addresses: Vec<u64>) {
        let class_index = if let Some(&existing) = self.class_lookup.get(&addresses) {
            existing
        } else {
            let index = self.classes.len();
            self.class_lookup.insert(addresses.clone(), index);
            self.classes.push(addresses);
            index
        };
        self.by_stack_id.insert(stack_id, class_index);
    }

    /// Maps a stack-id (as carried on an `Event`) to a dense equivalence-class index, or the
    /// empty-stack sentinel if the stack-id is zero or unregistered.
    pub fn class_index_for(&self, stack_id: u32) -> i64 {
        if stack_id == 0 {
            return EMPTY_STACK_INDEX;
        }
        self.by_stack_id
            .get(&stack_id)
            .map(|&i| i as i64)
            .unwrap_or(EMPTY_STACK_INDEX)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn addresses_for_class(&self, class_index: usize) -> &[u64] {
        &self.classes[class_index]
    }

    pub fn classes(&self) -> &[Vec<u64>] {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_address_vectors_share_a_class() {
        let mut index = StackIndex::new();
        index.register(1, vec![0x1000, 0x1040]);
        index.register(2, vec![0x1000, 0x1040]);
        index.register(3, vec![0x2000]);

        let a = index.class_index_for(1);
        let b = index.class_index_for(2);
        let c = index.class_index_for(3);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(index.class_count(), 2);
    }

    #[test]
    fn unregistered_stack_id_is_empty() {
        let index = StackIndex::new();
        assert_eq!(index.class_index_for(0), EMPTY_STACK_INDEX);
        assert_eq!(index.class_index_for(99), EMPTY_STACK_INDEX);
    }
}
