//! Writes the linker's symbol resolutions in the text format that the backend reads.
//!
//! ```text
//! <number of files>
//! <path> <number of symbols>
//! <slot> <resolution>
//! ...
//! ```

use crate::error::Context as _;
use crate::error::Result;
use crate::host::Host;
use crate::host::ResolutionQuery;
use crate::registry::Registry;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;

/// Asks the linker for the resolutions of every claimed file's symbols.
pub(crate) fn collect_resolutions<H: Host>(host: &mut H, registry: &mut Registry) -> Result {
    for file in registry.iter_mut() {
        let handle = file.handle;
        let Some(symbols) = file.symbols_mut() else {
            continue;
        };
        let query = host
            .get_symbols(handle, symbols.records_mut())
            .with_context(|| format!("Failed to get symbol resolutions for `{}`", file.path.display()))?;
        if query == ResolutionQuery::NotLoaded {
            tracing::debug!("Linker didn't load `{}`", file.path.display());
        }
    }
    Ok(())
}

pub(crate) fn write_resolution_file(path: &Path, registry: &Registry) -> Result {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create resolution file `{}`", path.display()))?;
    let mut out = BufWriter::new(file);
    write_resolutions(&mut out, registry)
        .and_then(|()| out.flush().map_err(Into::into))
        .with_context(|| format!("Failed to write resolution file `{}`", path.display()))?;
    tracing::debug!("Wrote resolutions to `{}`", path.display());
    Ok(())
}

pub fn write_resolutions(out: &mut impl Write, registry: &Registry) -> Result {
    writeln!(out, "{}", registry.len())?;
    for file in registry.iter() {
        out.write_all(file.path.as_os_str().as_encoded_bytes())?;
        writeln!(out, " {}", file.num_symbols())?;
        let Some(symbols) = file.symbols() else {
            continue;
        };
        for (record, slot) in symbols.iter() {
            writeln!(out, "{slot} {}", record.resolution)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostHandle;
    use crate::registry::ClaimedFile;
    use crate::symbol::Resolution;
    use crate::symbol::SlotId;
    use crate::symbol::SymbolKind;
    use crate::symbol::SymbolRecord;
    use crate::symbol::Visibility;
    use crate::symbol_table::SymbolTable;
    use std::path::PathBuf;

    fn table(slots: &[(u32, Resolution)]) -> SymbolTable {
        let mut table = SymbolTable::new();
        for (slot, resolution) in slots {
            let mut record = SymbolRecord::new(
                c"sym".to_owned(),
                None,
                SymbolKind::Def,
                Visibility::Default,
                0,
            );
            record.resolution = *resolution;
            table.push(record, SlotId(*slot));
        }
        table
    }

    #[test]
    fn test_format() {
        let mut registry = Registry::default();
        registry.push(ClaimedFile::new(
            PathBuf::from("a.o"),
            HostHandle(1),
            table(&[(0, Resolution::PrevailingDef), (1, Resolution::ResolvedIr)]),
            false,
        ));
        registry.push(ClaimedFile::new(
            PathBuf::from("/tmp/tmp_objectsX/obj0.o"),
            HostHandle(2),
            table(&[(5, Resolution::Unknown)]),
            true,
        ));
        let mut out = Vec::new();
        write_resolutions(&mut out, &registry).unwrap();
        assert_eq!(
            String::from_utf8(out.clone()).unwrap(),
            "2\na.o 2\n0 PREVAILING_DEF\n1 RESOLVED_IR\n/tmp/tmp_objectsX/obj0.o 1\n5 UNKNOWN\n"
        );

        // Writing the same registry again gives exactly the same bytes.
        let mut again = Vec::new();
        write_resolutions(&mut again, &registry).unwrap();
        assert_eq!(again, out);
    }

    #[test]
    fn test_empty_symbol_table() {
        let mut registry = Registry::default();
        registry.push(ClaimedFile::new(
            PathBuf::from("empty.o"),
            HostHandle(1),
            SymbolTable::new(),
            false,
        ));
        let mut out = Vec::new();
        write_resolutions(&mut out, &registry).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1\nempty.o 0\n");
    }
}
