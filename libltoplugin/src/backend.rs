//! Running the LTO backend. The backend gets its arguments from a response file and prints the
//! paths of the native objects that it produced to stdout, one per line.

use crate::bail;
use crate::ensure;
use crate::error::Context as _;
use crate::error::Result;
use itertools::Itertools as _;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::io::BufRead as _;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::os::unix::ffi::OsStrExt as _;
use std::path::Path;
use std::path::PathBuf;
use std::process::Child;
use std::process::Command;
use std::process::ExitStatus;
use std::process::Stdio;

/// Name of the response file within the session's temporary directory.
pub(crate) const ARGUMENTS_FILE_NAME: &str = "arguments";

/// Writes `args` to `path`, one per line, escaped so that the backend's response-file parser gives
/// back exactly the original arguments.
pub(crate) fn write_arguments_file<'a>(
    path: &Path,
    args: impl Iterator<Item = &'a OsStr>,
) -> Result {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create `{}`", path.display()))?;
    let mut out = BufWriter::new(file);
    let mut escaped = Vec::new();
    for arg in args {
        escaped.clear();
        escape_argument(arg.as_bytes(), &mut escaped);
        escaped.push(b'\n');
        out.write_all(&escaped)
            .with_context(|| format!("Failed to write `{}`", path.display()))?;
    }
    out.flush()
        .with_context(|| format!("Failed to write `{}`", path.display()))?;
    Ok(())
}

/// Escapes whitespace, quotes and backslashes with a backslash. An empty argument becomes `""`.
pub(crate) fn escape_argument(arg: &[u8], out: &mut Vec<u8>) {
    if arg.is_empty() {
        out.extend_from_slice(b"\"\"");
        return;
    }
    for &byte in arg {
        if byte.is_ascii_whitespace() || byte == 0x0b || matches!(byte, b'\\' | b'\'' | b'"') {
            out.push(b'\\');
        }
        out.push(byte);
    }
}

/// A running backend. If we bail out before it's finished, it gets killed.
struct RunningBackend {
    child: Option<Child>,
}

impl RunningBackend {
    fn wait(mut self) -> Result<ExitStatus> {
        let Some(mut child) = self.child.take() else {
            bail!("Backend was already waited for");
        };
        Ok(child.wait()?)
    }
}

impl Drop for RunningBackend {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Runs `executable @arguments_file`, calling `on_output` with each path that the backend prints.
/// Returns once the backend has exited successfully.
pub(crate) fn run(
    executable: &Path,
    arguments_file: &Path,
    verbose: bool,
    mut on_output: impl FnMut(PathBuf) -> Result,
) -> Result {
    let mut at_file = OsString::from("@");
    at_file.push(arguments_file);

    if verbose {
        log_command_line(executable, arguments_file);
    }

    let mut command = Command::new(executable);
    command
        .arg(&at_file)
        .stdin(Stdio::null())
        .stdout(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to run backend `{}`", executable.display()))?;
    let stdout = child.stdout.take();
    let backend = RunningBackend { child: Some(child) };
    let stdout = stdout.context("Backend has no stdout")?;

    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .context("Failed to read backend output")?;
        if read == 0 {
            break;
        }
        let Some(path) = line.strip_suffix(b"\n") else {
            bail!(
                "Backend output `{}` isn't terminated by a newline",
                String::from_utf8_lossy(&line)
            );
        };
        ensure!(!path.is_empty(), "Backend output contains an empty line");
        on_output(PathBuf::from(OsStr::from_bytes(path)))?;
    }

    let status = backend.wait()?;
    ensure!(
        status.success(),
        "Backend `{}` failed: {status}",
        executable.display()
    );
    Ok(())
}

/// Logs the backend invocation, including the contents of the arguments file.
fn log_command_line(executable: &Path, arguments_file: &Path) {
    match std::fs::read(arguments_file) {
        Ok(contents) => tracing::info!(
            "{} @{} ({})",
            executable.display(),
            arguments_file.display(),
            String::from_utf8_lossy(&contents).lines().join(" ")
        ),
        Err(error) => tracing::warn!(
            "Couldn't read `{}` for logging: {error}",
            arguments_file.display()
        ),
    }
}
