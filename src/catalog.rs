//! Named MIDI catalog
//!
//! An ordered registry of named MIDI byte buffers, constructed by the
//! host and handed to the player. Ordering drives next/previous
//! navigation, which wraps around at both ends.

use std::path::Path;

/// Ordered collection of named MIDI files.
#[derive(Debug, Default)]
pub struct MidiCatalog {
    entries: Vec<CatalogEntry>,
}

#[derive(Debug)]
struct CatalogEntry {
    name: String,
    data: Vec<u8>,
}

impl MidiCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a byte buffer under `name`. A repeated name replaces the
    /// earlier entry in place, keeping its position.
    pub fn add(&mut self, name: impl Into<String>, data: Vec<u8>) -> &mut Self {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            log::warn!("catalog entry '{}' replaced", name);
            entry.data = data;
        } else {
            self.entries.push(CatalogEntry { name, data });
        }
        self
    }

    /// Read a file from disk and register it under its stem.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> std::io::Result<&mut Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let data = std::fs::read(path)?;
        Ok(self.add(name, data))
    }

    /// Bytes registered under `name`.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.name.as_str())
    }

    /// The entry after `name` in catalog order, wrapping to the first.
    /// `None` when `name` is not in the catalog.
    pub fn next_after(&self, name: &str) -> Option<&str> {
        let index = self.index_of(name)?;
        self.name_at((index + 1) % self.entries.len())
    }

    /// The entry before `name` in catalog order, wrapping to the last.
    pub fn previous_before(&self, name: &str) -> Option<&str> {
        let index = self.index_of(name)?;
        let previous = index.checked_sub(1).unwrap_or(self.entries.len() - 1);
        self.name_at(previous)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
