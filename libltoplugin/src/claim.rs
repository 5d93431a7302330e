//! Deciding whether an input file is an IR object and, if it is, reading its symbol table.

use crate::error::Context as _;
use crate::error::Result;
use crate::host::HostHandle;
use crate::symbol_table;
use crate::symbol_table::SymbolTable;
use memmap2::MmapOptions;
use object::Object as _;
use object::ObjectSection as _;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

/// Name of the section holding the IR symbol table. Compilers may add a suffix after a `.`.
pub(crate) const IR_SYMTAB_SECTION: &[u8] = b".gnu.lto_.symtab";

/// A file that the linker is offering to us.
pub struct InputFile<'a> {
    pub path: &'a Path,

    /// The linker's open file. For an archive member, this is the whole archive.
    pub file: &'a File,

    /// Non-zero if the input is an archive member.
    pub offset: u64,

    pub size: u64,
    pub handle: HostHandle,
}

impl InputFile<'_> {
    #[must_use]
    pub fn is_archive_member(&self) -> bool {
        self.offset != 0
    }
}

/// Name of the file that we extract the `index`th archive member into.
pub(crate) fn extracted_member_path(temp_dir: &Path, index: u32) -> PathBuf {
    temp_dir.join(format!("obj{index}.o"))
}

/// Returns the symbol table of the first `len` bytes of `file`, or None if it isn't an IR object.
/// A file that is an IR object but whose symbol table can't be decoded is an error.
pub(crate) fn read_ir_symbol_table(
    file: &File,
    len: u64,
    path: &Path,
) -> Result<Option<SymbolTable>> {
    let Ok(len) = usize::try_from(len) else {
        return Ok(None);
    };
    if len == 0 {
        return Ok(None);
    }

    // Safety: We're relying on nobody modifying the file while we have it mapped.
    let mmap = match unsafe { MmapOptions::new().len(len).map(file) } {
        Ok(mmap) => mmap,
        Err(error) => {
            tracing::debug!("Failed to map `{}`: {error}", path.display());
            return Ok(None);
        }
    };

    let Some(section) = find_ir_symtab(&mmap) else {
        return Ok(None);
    };

    let table = symbol_table::translate(section)
        .with_context(|| format!("Invalid IR symbol table in `{}`", path.display()))?;

    Ok(Some(table))
}

/// Finds the IR symbol table in `data`. Returns None if `data` isn't an object file or doesn't
/// have the section.
pub(crate) fn find_ir_symtab(data: &[u8]) -> Option<&[u8]> {
    let object = object::File::parse(data).ok()?;
    let section = object
        .sections()
        .find(|section| section.name_bytes().is_ok_and(is_ir_symtab_name))?;
    section.data().ok()
}

fn is_ir_symtab_name(name: &[u8]) -> bool {
    name.strip_prefix(IR_SYMTAB_SECTION)
        .is_some_and(|suffix| suffix.is_empty() || suffix.starts_with(b"."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SlotId;
    use crate::symbol::SymbolKind;
    use crate::symbol::SymbolRecord;
    use crate::symbol::Visibility;
    use object::write;
    use std::io::Write as _;

    fn elf_with_section(name: &[u8], data: &[u8]) -> Vec<u8> {
        let mut obj = write::Object::new(
            object::BinaryFormat::Elf,
            object::Architecture::X86_64,
            object::Endianness::Little,
        );
        let section = obj.add_section(Vec::new(), name.to_vec(), object::SectionKind::Other);
        obj.append_section_data(section, data, 1);
        obj.write().unwrap()
    }

    fn sample_table() -> SymbolTable {
        let mut table = SymbolTable::new();
        table.push(
            SymbolRecord::new(
                c"main".to_owned(),
                None,
                SymbolKind::Def,
                Visibility::Default,
                0,
            ),
            SlotId(3),
        );
        table
    }

    #[test]
    fn test_section_names() {
        assert!(is_ir_symtab_name(b".gnu.lto_.symtab"));
        assert!(is_ir_symtab_name(b".gnu.lto_.symtab.4bb2fd1c"));
        assert!(!is_ir_symtab_name(b".gnu.lto_.symtabx"));
        assert!(!is_ir_symtab_name(b".gnu.lto_.decls"));
    }

    #[test]
    fn test_find_symtab() {
        let table = sample_table();
        let elf = elf_with_section(b".gnu.lto_.symtab.1", &table.encode());
        assert_eq!(find_ir_symtab(&elf), Some(table.encode().as_slice()));

        let native = elf_with_section(b".text", &[0x90]);
        assert_eq!(find_ir_symtab(&native), None);

        assert_eq!(find_ir_symtab(b"!<arch>\nnot an object"), None);
    }

    #[test]
    fn test_read_ir_symbol_table() {
        let mut file = tempfile::tempfile().unwrap();
        let elf = elf_with_section(b".gnu.lto_.symtab", &sample_table().encode());
        file.write_all(&elf).unwrap();
        let table = read_ir_symbol_table(&file, elf.len() as u64, Path::new("a.o"))
            .unwrap()
            .unwrap();
        assert_eq!(table, sample_table());

        let empty = tempfile::tempfile().unwrap();
        assert!(
            read_ir_symbol_table(&empty, 0, Path::new("empty.o"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_corrupt_symtab_is_an_error() {
        let mut file = tempfile::tempfile().unwrap();
        let elf = elf_with_section(b".gnu.lto_.symtab", b"foo\0\0\x09\x00");
        file.write_all(&elf).unwrap();
        let error = read_ir_symbol_table(&file, elf.len() as u64, Path::new("bad.o")).unwrap_err();
        let message = format!("{error:#}");
        assert!(message.contains("`bad.o`"), "{message}");
        assert!(message.contains("invalid symbol kind 9"), "{message}");
    }

    #[test]
    fn test_extracted_member_path() {
        assert_eq!(
            extracted_member_path(Path::new("/tmp/tmp_objectsAbc"), 3),
            Path::new("/tmp/tmp_objectsAbc/obj3.o")
        );
    }
}
