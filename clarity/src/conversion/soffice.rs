//! Headless LibreOffice invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Install locations probed when no explicit path is configured, in order.
const SOFFICE_CANDIDATES: [&str; 5] = [
    "/usr/bin/libreoffice",
    "/usr/bin/soffice",
    "/usr/lib/libreoffice/program/soffice",
    "/opt/libreoffice/program/soffice",
    "/Applications/LibreOffice.app/Contents/MacOS/soffice",
];

const PATH_NAMES: [&str; 2] = ["soffice", "libreoffice"];

/// stderr is truncated to this many characters in error messages
const MAX_STDERR_CHARS: usize = 400;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("LibreOffice is not installed")]
    NotInstalled,

    #[error("Conversion timed out")]
    TimedOut,

    #[error("Conversion failed: {stderr}")]
    Failed { stderr: String },

    #[error("No output file produced")]
    MissingOutput,

    #[error("Conversion I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pdf,
    Html,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Html => "html",
        }
    }
}

/// Find a LibreOffice binary.
///
/// An explicitly configured path is used only if it exists. Otherwise the usual install locations
/// are probed, then `PATH`.
pub fn locate_soffice(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!(path = %path.display(), "Configured soffice path does not exist");
        return None;
    }

    SOFFICE_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
        .or_else(search_path)
}

fn search_path() -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .flat_map(|dir| PATH_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

/// Runs `soffice --headless --convert-to` with a deadline.
#[derive(Debug, Clone)]
pub struct DocumentConverter {
    soffice: Option<PathBuf>,
    timeout: Duration,
}

impl DocumentConverter {
    pub fn new(soffice: Option<PathBuf>, timeout: Duration) -> Self {
        Self { soffice, timeout }
    }

    pub fn soffice_path(&self) -> Option<&Path> {
        self.soffice.as_deref()
    }

    /// Convert `input` into `out_dir`, returning the produced file.
    ///
    /// The process is killed if it outlives the timeout. When LibreOffice names the output
    /// differently from the input stem, the newest file with the target extension is used.
    #[instrument(skip(self, input, out_dir), fields(input = %input.display()))]
    pub async fn convert(&self, input: &Path, out_dir: &Path, format: OutputFormat) -> Result<PathBuf, ConversionError> {
        let soffice = self.soffice.as_deref().ok_or(ConversionError::NotInstalled)?;
        tokio::fs::create_dir_all(out_dir).await?;

        let child = Command::new(soffice)
            .arg("--headless")
            .arg("--convert-to")
            .arg(format.extension())
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let started = tokio::time::Instant::now();
        // On timeout the child is dropped, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs_f64(), "LibreOffice timed out, process killed");
                return Err(ConversionError::TimedOut);
            }
        };

        debug!(
            status = %output.status,
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "LibreOffice exited"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let stderr = if stderr.is_empty() {
                format!("LibreOffice exited with {}", output.status)
            } else {
                stderr.chars().take(MAX_STDERR_CHARS).collect()
            };
            return Err(ConversionError::Failed { stderr });
        }

        let expected = input
            .file_stem()
            .map(|stem| out_dir.join(stem).with_extension(format.extension()));
        if let Some(expected) = expected
            && tokio::fs::try_exists(&expected).await?
        {
            return Ok(expected);
        }

        let found = newest_with_extension(out_dir, format.extension()).await?;
        match found {
            Some(path) => {
                info!(output = %path.display(), "Using output found by extension");
                Ok(path)
            }
            None => Err(ConversionError::MissingOutput),
        }
    }
}

async fn newest_with_extension(dir: &Path, extension: &str) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if !matches {
            continue;
        }
        let modified = entry.metadata().await?.modified()?;
        if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
            newest = Some((modified, path));
        }
    }

    Ok(newest.map(|(_, path)| path))
}
