use std::collections::HashMap;
use std::fmt;

crate::id_type!(
    /// Handle of an interned string.
    Str
);

/// Append-only string interner.
///
/// Each distinct string is stored once and addressed through its [`Str`]
/// handle. Bytecode modules own their private table; the linker merges
/// source tables into the output table by re-interning on first use.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "Vec<String>", into = "Vec<String>"))]
pub struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, Str>,
}

impl From<Vec<String>> for StringTable {
    fn from(strings: Vec<String>) -> Self {
        let index = strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), Str::new(i as u32)))
            .collect();
        Self { strings, index }
    }
}

impl From<StringTable> for Vec<String> {
    fn from(table: StringTable) -> Self {
        table.strings
    }
}

impl StringTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `value`, returning the existing handle if it is already
    /// present.
    pub fn intern(&mut self, value: &str) -> Str {
        if let Some(&id) = self.index.get(value) {
            return id;
        }

        let id = Str::new(self.strings.len() as u32);
        self.strings.push(value.to_owned());
        self.index.insert(value.to_owned(), id);
        id
    }

    /// Returns the string associated with the given handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not belong to this table.
    pub fn value(&self, id: Str) -> &str {
        &self.strings[id.to_usize()]
    }

    /// Returns the string for the handle, if it belongs to this table.
    pub fn get(&self, id: Str) -> Option<&str> {
        self.strings.get(id.to_usize()).map(String::as_str)
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True if no strings have been interned.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Iterates over `(handle, string)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Str, &str)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (Str::new(i as u32), s.as_str()))
    }
}

impl fmt::Display for StringTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, value) in self.iter() {
            writeln!(f, "{id}: {value:?}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut table = StringTable::new();
        let a = table.intern("module");
        let b = table.intern("init");
        let c = table.intern("module");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.value(a), "module");
        assert_eq!(table.value(b), "init");
        assert_eq!(table.len(), 2);
    }
}
