//! The state of the plugin for the duration of one link, from `onload` until cleanup.

use crate::args::Options;
use crate::args::PassThrough;
use crate::backend;
use crate::backend::ARGUMENTS_FILE_NAME;
use crate::claim;
use crate::claim::InputFile;
use crate::error::Context as _;
use crate::error::Result;
use crate::fs;
use crate::host::Host;
use crate::registry::ClaimedFile;
use crate::registry::Registry;
use crate::resolution_file;
use crate::symbol_table::SymbolTable;
use std::ffi::OsStr;
use std::path::Path;
use std::path::PathBuf;
use tempfile::TempDir;

/// Prefix of the temporary directory that holds extracted archive members and the backend's
/// arguments file.
const TEMP_DIR_PREFIX: &str = "tmp_objects";

pub struct Session<H: Host> {
    host: H,
    options: Options,

    /// None once we've been torn down.
    temp_dir: Option<TempDir>,

    registry: Registry,

    /// Number of archive members that we've extracted so far. Used to name the extracted files.
    num_extracted: u32,

    /// Native objects produced by the backend.
    output_files: Vec<PathBuf>,
}

impl<H: Host> Session<H> {
    /// Starts a session with the temporary directory in the current directory.
    pub fn new(host: H, options: Options) -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::new_in(host, options, &current_dir)
    }

    pub fn new_in(host: H, options: Options, parent: &Path) -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir_in(parent)
            .with_context(|| {
                format!("Failed to create temporary directory in `{}`", parent.display())
            })?;
        tracing::debug!("Using temporary directory `{}`", temp_dir.path().display());

        Ok(Self {
            host,
            options,
            temp_dir: Some(temp_dir),
            registry: Registry::default(),
            num_extracted: 0,
            output_files: Vec::new(),
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn output_files(&self) -> &[PathBuf] {
        &self.output_files
    }

    /// The session's temporary directory, or None if we've been torn down.
    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    fn live_temp_dir(&self) -> Result<&Path> {
        self.temp_dir()
            .context("Linker plugin session has already been cleaned up")
    }

    /// Decides whether to claim `input`. If it's an IR object, we take ownership of it, report its
    /// symbols to the linker and return true. Otherwise we return false and leave nothing behind.
    #[tracing::instrument(skip_all, name = "Claim file", fields(path = %input.path.display()))]
    pub fn claim_file(&mut self, input: &InputFile) -> Result<bool> {
        let temp_dir = self.live_temp_dir()?;

        let (path, loaded) = if input.is_archive_member() {
            let path = claim::extracted_member_path(temp_dir, self.num_extracted);
            self.num_extracted += 1;
            fs::copy_range(input.file, input.offset, input.size, &path).with_context(|| {
                format!(
                    "Failed to extract member at offset {} of `{}`",
                    input.offset,
                    input.path.display()
                )
            })?;
            let loaded = load_extracted(&path);
            (path, loaded)
        } else {
            let loaded = claim::read_ir_symbol_table(input.file, input.size, input.path);
            (input.path.to_owned(), loaded)
        };

        let symbols = match loaded {
            Ok(Some(symbols)) => symbols,
            other => {
                discard_unclaimed(input, &path)?;
                // Propagates decode errors. Otherwise it's not an IR object.
                other?;
                tracing::debug!("Not an IR object");
                return Ok(false);
            }
        };

        for symbol in symbols.records() {
            tracing::trace!("{symbol}");
        }

        if let Err(error) = self.host.add_symbols(input.handle, symbols.records()) {
            discard_unclaimed(input, &path)?;
            return Err(error.context(format!(
                "Failed to add symbols for `{}`",
                input.path.display()
            )));
        }

        tracing::debug!(
            "Claimed with {} symbols, {} of them definitions",
            symbols.len(),
            symbols
                .records()
                .iter()
                .filter(|symbol| symbol.kind.is_definition())
                .count()
        );
        self.registry.push(ClaimedFile::new(
            path,
            input.handle,
            symbols,
            input.is_archive_member(),
        ));

        Ok(true)
    }

    /// Called once the linker has read all input files. Writes resolutions if requested, then
    /// either hands the claimed files straight back to the linker or runs the backend and hands
    /// back what it produced.
    #[tracing::instrument(skip_all, name = "All symbols read")]
    pub fn all_symbols_read(&mut self) -> Result {
        if self.registry.is_empty() {
            tracing::debug!("No IR objects were claimed");
            return Ok(());
        }

        if let Some(path) = self.options.resolution_file.as_deref() {
            resolution_file::collect_resolutions(&mut self.host, &mut self.registry)?;
            resolution_file::write_resolution_file(path, &self.registry)?;
        }

        if self.options.bypass_backend {
            for path in self.registry.paths() {
                self.host.add_input_file(path)?;
            }
            return Ok(());
        }

        self.release_symbol_data();
        self.run_backend()?;
        self.forward_pass_through()
    }

    /// Frees the symbol data that was only needed up to resolution.
    pub fn release_symbol_data(&mut self) {
        self.registry.release_symbol_data();
        self.host.release_symbols();
    }

    fn run_backend(&mut self) -> Result {
        let arguments_file = self.live_temp_dir()?.join(ARGUMENTS_FILE_NAME);
        let executable = self
            .options
            .backend_executable()
            .context("No LTO backend was given in the plugin options")?;

        let args = self
            .options
            .backend_flags()
            .iter()
            .map(OsStr::new)
            .chain(self.registry.paths().map(Path::as_os_str));
        backend::write_arguments_file(&arguments_file, args)?;

        let host = &mut self.host;
        let output_files = &mut self.output_files;
        backend::run(executable, &arguments_file, self.options.verbose, |path| {
            host.add_input_file(&path)?;
            output_files.push(path);
            Ok(())
        })?;

        std::fs::remove_file(&arguments_file)
            .with_context(|| format!("Failed to delete `{}`", arguments_file.display()))?;
        Ok(())
    }

    fn forward_pass_through(&mut self) -> Result {
        for item in std::mem::take(&mut self.options.pass_through) {
            match item {
                PassThrough::Library(name) => self.host.add_input_library(&name)?,
                PassThrough::File(path) => self.host.add_input_file(&path)?,
            }
        }
        Ok(())
    }

    /// Deletes everything we created and resets the session. Calling this again does nothing.
    #[tracing::instrument(skip_all, name = "Cleanup")]
    pub fn cleanup(&mut self) -> Result {
        let Some(temp_dir) = self.temp_dir.take() else {
            return Ok(());
        };

        for file in self.registry.iter().filter(|file| file.is_temporary) {
            std::fs::remove_file(&file.path)
                .with_context(|| format!("Failed to delete `{}`", file.path.display()))?;
        }

        self.release_symbol_data();
        self.registry.clear();
        self.output_files.clear();
        self.options.pass_through.clear();
        self.num_extracted = 0;

        if self.options.verbose {
            let kept = temp_dir.keep();
            tracing::info!("Keeping temporary directory `{}`", kept.display());
            return Ok(());
        }

        fs::remove_if_exists(&temp_dir.path().join(ARGUMENTS_FILE_NAME))?;
        let path = temp_dir.path().to_owned();
        temp_dir
            .close()
            .with_context(|| format!("Failed to remove `{}`", path.display()))
    }
}

/// Deletes the copy of an archive member that we're not going to claim.
fn discard_unclaimed(input: &InputFile, path: &Path) -> Result {
    if input.is_archive_member() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to delete `{}`", path.display()))?;
    }
    Ok(())
}

fn load_extracted(path: &Path) -> Result<Option<SymbolTable>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open `{}`", path.display()))?;
    let len = file.metadata()?.len();
    claim::read_ir_symbol_table(&file, len, path)
}
