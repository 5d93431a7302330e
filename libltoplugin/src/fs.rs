use crate::ensure;
use crate::error::Context as _;
use crate::error::Result;
use std::fs::File;
use std::io::ErrorKind;
use std::io::Write as _;
use std::os::unix::fs::FileExt as _;
use std::path::Path;

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Copies `len` bytes starting at `offset` in `source` into a new file at `dest`. Reads are
/// positional, so the source's file offset is left alone. The linker owns that descriptor.
pub(crate) fn copy_range(source: &File, offset: u64, len: u64, dest: &Path) -> Result {
    let mut out = File::create(dest)
        .with_context(|| format!("Failed to create `{}`", dest.display()))?;
    let mut buffer = vec![0_u8; COPY_CHUNK_SIZE];
    let mut position = offset;
    let end = offset + len;

    while position < end {
        let wanted = usize::try_from(end - position).map_or(COPY_CHUNK_SIZE, |n| {
            n.min(COPY_CHUNK_SIZE)
        });
        let read = match source.read_at(&mut buffer[..wanted], position) {
            Ok(read) => read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(error).context("Failed to read archive member"),
        };
        ensure!(
            read != 0,
            "Archive member ends after {} of {len} bytes",
            position - offset
        );
        out.write_all(&buffer[..read])
            .with_context(|| format!("Failed to write `{}`", dest.display()))?;
        position += read as u64;
    }

    Ok(())
}

/// Removes `path`, returning whether it existed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => {
            Err(error).with_context(|| format!("Failed to delete `{}`", path.display()))
        }
    }
}

#[cfg(test)]
pub(crate) fn make_executable(file: &File) -> Result {
    use std::os::unix::prelude::PermissionsExt;

    let mut permissions = file.metadata()?.permissions();
    let mut mode = PermissionsExt::mode(&permissions);
    // Set execute permission wherever we currently have read permission.
    mode = mode | ((mode & 0o444) >> 2);
    PermissionsExt::set_mode(&mut permissions, mode);
    file.set_permissions(permissions)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek as _;
    use std::io::SeekFrom;
    use std::io::Write as _;

    #[test]
    fn test_copy_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = tempfile::tempfile().unwrap();
        let data: Vec<u8> = (0..200_000_u32).map(|i| (i % 251) as u8).collect();
        source.write_all(&data).unwrap();
        source.seek(SeekFrom::Start(17)).unwrap();

        let dest = dir.path().join("obj0.o");
        copy_range(&source, 1000, 150_000, &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), &data[1000..151_000]);

        // The source's own position is untouched.
        assert_eq!(source.stream_position().unwrap(), 17);
    }

    #[test]
    fn test_copy_range_short_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = tempfile::tempfile().unwrap();
        source.write_all(&[1; 100]).unwrap();
        let error = copy_range(&source, 50, 100, &dir.path().join("obj0.o")).unwrap_err();
        assert!(error.to_string().contains("after 50 of 100 bytes"));
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arguments");
        assert!(!remove_if_exists(&path).unwrap());
        std::fs::write(&path, "x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!path.exists());
    }
}
