// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::identifiable::FxIndexSet;

/// Holds unique strings and hands out pprof string table offsets that
/// correspond to the order the strings were inserted. Offset 0 is always the
/// empty string, as pprof requires.
#[derive(Debug)]
pub struct StringTable {
    strings: FxIndexSet<String>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    /// Creates a new string table, which initially holds the empty string and
    /// no others.
    pub fn new() -> Self {
        let mut strings = FxIndexSet::default();
        strings.insert(String::new());
        Self { strings }
    }

    /// Returns the offset of `s`, inserting it if needed.
    pub fn intern(&mut self, s: &str) -> i64 {
        let offset = match self.strings.get_index_of(s) {
            Some(offset) => offset,
            None => self.strings.insert_full(s.to_owned()).0,
        };
        // A table can't hold anywhere near i64::MAX strings.
        offset as i64
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        // Always holds at least the empty string.
        false
    }

    pub fn into_vec(self) -> Vec<String> {
        self.strings.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        let mut table = StringTable::new();
        assert_eq!(table.intern(""), 0);
        assert_eq!(table.intern("main"), 1);
        assert_eq!(table.intern("main"), 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.into_vec(), vec!["".to_string(), "main".to_string()]);
    }
}
