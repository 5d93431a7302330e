//! The files that we've claimed so far in this link.

use crate::host::HostHandle;
use crate::symbol_table::SymbolTable;
use std::fmt::Display;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug)]
pub struct ClaimedFile {
    /// Where the IR object can be read from. For archive members, this is our extracted copy.
    pub path: PathBuf,

    /// The linker's handle for the file. We only ever pass this back to the linker.
    pub handle: HostHandle,

    /// Whether `path` is a file that we created by extracting an archive member and that we
    /// therefore need to delete.
    pub is_temporary: bool,

    /// None once the symbols have been released. The backend only needs the path.
    symbols: Option<SymbolTable>,
}

/// Append-only list of claimed files. Indexes stay valid until the registry is cleared at the end
/// of the link.
#[derive(Debug, Default)]
pub struct Registry {
    files: Vec<ClaimedFile>,
}

impl ClaimedFile {
    #[must_use]
    pub fn new(path: PathBuf, handle: HostHandle, symbols: SymbolTable, is_temporary: bool) -> Self {
        Self {
            path,
            handle,
            is_temporary,
            symbols: Some(symbols),
        }
    }

    #[must_use]
    pub fn symbols(&self) -> Option<&SymbolTable> {
        self.symbols.as_ref()
    }

    pub fn symbols_mut(&mut self) -> Option<&mut SymbolTable> {
        self.symbols.as_mut()
    }

    #[must_use]
    pub fn num_symbols(&self) -> usize {
        self.symbols.as_ref().map_or(0, SymbolTable::len)
    }

    fn release_symbols(&mut self) {
        self.symbols = None;
    }
}

impl Registry {
    /// Adds a file, returning its index.
    pub fn push(&mut self, file: ClaimedFile) -> usize {
        self.files.push(file);
        self.files.len() - 1
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ClaimedFile> {
        self.files.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClaimedFile> {
        self.files.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClaimedFile> {
        self.files.iter_mut()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|file| file.path.as_path())
    }

    /// Drops the per-symbol data of every file. Paths, handles and temporary flags are kept.
    pub fn release_symbol_data(&mut self) {
        for file in &mut self.files {
            file.release_symbols();
        }
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}

impl Display for ClaimedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}`", self.path.display())?;
        if self.is_temporary {
            write!(f, " (extracted)")?;
        }
        Ok(())
    }
}
