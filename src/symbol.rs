use std::collections::HashMap;

use crate::trace::MethodDescription;

/// One address-range symbol entry prior to sorting.
#[derive(Debug, Clone)]
struct SymbolEntry {
    start: u64,
    size: u64,
    description: MethodDescription,
}

/// A memory region registered by a V6+ `ProcessMapping` event, keyed by mapping-id so later
/// `ProcessSymbol` events can resolve their owning file.
#[derive(Debug, Clone)]
struct Mapping {
    file_name: String,
}

/// Collects method symbols from rundown events and V6+ process-mapping/process-symbol pairs;
/// resolves addresses to frames via sorted binary search once the stream is fully consumed.
#[derive(Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    mappings: HashMap<u64, Mapping>,
    sorted: bool,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Adds an entry from a `MethodDCEndVerbose` rundown event.
    pub fn add_rundown_method(
        &mut self,
        start: u64,
        size: u64,
        namespace: String,
        name: String,
        signature: String,
    ) {
        self.entries.push(SymbolEntry {
            start,
            size,
            description: MethodDescription {
                name,
                namespace,
                signature,
                address: start,
                size,
            },
        });
        self.sorted = false;
    }

    /// Registers a V6+ `ProcessMapping` memory region.
    pub fn add_process_mapping(&mut self, mapping_id: u64, file_name: String) {
        self.mappings.insert(mapping_id, Mapping { file_name });
    }

    /// Adds an entry from a V6+ `ProcessSymbol` event. Returns `false` (a soft failure, per
    /// `SymbolDomain`) if `mapping_id` was never registered by a `ProcessMapping`; the caller logs
    /// a warning and continues rather than treating this as fatal.
    pub fn add_process_symbol(
        &mut self,
        mapping_id: u64,
        start: u64,
        end: u64,
        name: String,
    ) -> bool {
        let Some(mapping) = self.mappings.get(&mapping_id) else {
            return false;
        };
        self.entries.push(SymbolEntry {
            start,
            size: end.saturating_sub(start),
            description: MethodDescription {
                name,
                namespace: mapping.file_name.clone(),
                signature: String::new(),
                address: start,
                size: end.saturating_sub(start),
            },
        });
        self.sorted = false;
        true
    }

    /// Sorts entries by start address. Must be called once after the stream is fully consumed
    /// and before any `resolve` call.
    pub fn finalize(&mut self) {
        self.entries.sort_by_key(|e| e.start);
        self.sorted = true;
    }

    /// Resolves an address to the method description whose range contains it, or the `"??"`
    /// sentinel if no entry matches.
    ///
    /// A range is `[start, start + size)` — except for the highest-addressed entry in the table,
    /// whose upper bound is treated as inclusive, since it is commonly the last symbol rundown
    /// observed before the trace stopped and its true extent past `size` is unknown; a return
    /// address landing exactly on `start + size` is still attributed to it rather than dropped.
    pub fn resolve(&self, address: u64) -> MethodDescription {
        debug_assert!(self.sorted, "SymbolTable::resolve called before finalize");

        let index = match self.entries.partition_point(|e| e.start <= address) {
            0 => return MethodDescription::unknown(),
            n => n - 1,
        };
        let candidate = &self.entries[index];
        let is_last = index == self.entries.len() - 1;
        let end = candidate.start + candidate.size;

        let matches = if is_last {
            address <= end
        } else {
            address < end
        };

        if matches {
            candidate.description.clone()
        } else {
            MethodDescription::unknown()
        }
    }
}
