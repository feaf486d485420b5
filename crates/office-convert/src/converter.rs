//! Conversion request handling
//!
//! [`OfficeConverter`] validates a source document once, then runs any
//! number of conversions of it:
//!
//! 1. check the requested target against the compatibility table
//! 2. run `<binary> --headless --convert-to <ext> <source> --outdir <dir>`
//! 3. move `<dir>/<source stem>.<ext>` to the requested name

use crate::command::{home_override, is_writable_dir, ConvertCommand};
use crate::config::ConverterConfig;
use crate::error::{ConvertError, Result};
use crate::formats::{allowed_outputs, can_convert, is_supported_input, normalize_extension};
use crate::process::{run_with_timeout, truncate_output, MAX_DIAGNOSTIC_CHARS};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// A validated source document and where its conversions go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    source_path: PathBuf,
    source_extension: String,
    file_name: String,
    working_dir: PathBuf,
    binary: String,
    filter: Option<String>,
}

impl ConversionRequest {
    /// Absolute, symlink-resolved path of the source document
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Lower-cased source extension
    pub fn extension(&self) -> &str {
        &self.source_extension
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Directory the converter writes into
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// File name the converter itself gives the `target` output
    fn converter_output_name(&self, target: &str) -> String {
        let stem = self
            .source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{stem}.{target}")
    }
}

/// Where a successful conversion left its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub output_path: PathBuf,
    /// False when the output kept the converter's default name because the
    /// move to the requested name failed
    pub renamed: bool,
}

impl ConversionResult {
    pub fn path(&self) -> &Path {
        &self.output_path
    }

    pub fn into_path(self) -> PathBuf {
        self.output_path
    }
}

/// Converts one source document with a headless office suite
///
/// # Example
/// ```no_run
/// use office_convert::OfficeConverter;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let converter = OfficeConverter::new("reports/q3.docx")?;
/// let result = converter.convert_to("q3-final.pdf")?;
/// println!("PDF written to {}", result.path().display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct OfficeConverter {
    request: ConversionRequest,
    config: ConverterConfig,
}

impl OfficeConverter {
    /// Validate `source` with the default configuration (`libreoffice`,
    /// output next to the source file)
    ///
    /// # Errors
    /// [`ConvertError::NotFound`] if `source` is not an existing file,
    /// [`ConvertError::UnsupportedInput`] if its extension is not convertible.
    pub fn new(source: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(source, ConverterConfig::default())
    }

    /// Validate `source`, writing conversions into `working_dir`
    pub fn with_working_dir(source: impl AsRef<Path>, working_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(source, ConverterConfig::default().with_working_dir(working_dir))
    }

    /// Validate `source` with explicit settings
    ///
    /// An unusable `config.working_dir` falls back to the source file's
    /// directory, then to the system temp directory. A config that fails
    /// [`ConverterConfig::validate`] is rejected with [`ConvertError::Config`].
    pub fn with_config(source: impl AsRef<Path>, config: ConverterConfig) -> Result<Self> {
        config.validate()?;
        let source = source.as_ref();
        if !source.is_file() {
            return Err(ConvertError::NotFound(source.to_path_buf()));
        }
        let source_path = source
            .canonicalize()
            .map_err(|_| ConvertError::NotFound(source.to_path_buf()))?;

        let raw_extension = source_path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !is_supported_input(&raw_extension) {
            return Err(ConvertError::UnsupportedInput(raw_extension));
        }

        let file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let working_dir = resolve_working_dir(config.working_dir.as_deref(), &source_path);

        debug!(
            "Opened {} (extension: {}, output dir: {})",
            source_path.display(),
            raw_extension,
            working_dir.display()
        );

        Ok(Self {
            request: ConversionRequest {
                source_path,
                source_extension: normalize_extension(&raw_extension),
                file_name,
                working_dir,
                binary: config.binary.clone(),
                filter: None,
            },
            config,
        })
    }

    pub fn request(&self) -> &ConversionRequest {
        &self.request
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Targets this source can be converted to
    pub fn supported_outputs(&self) -> &'static [&'static str] {
        allowed_outputs(&self.request.source_extension)
    }

    /// Attach an export filter to the target, e.g. `writer_pdf_Export`
    /// turns `--convert-to pdf` into `--convert-to pdf:writer_pdf_Export`.
    pub fn set_filter(&mut self, filter: impl Into<String>) {
        let filter = filter.into();
        self.request.filter = (!filter.is_empty()).then_some(filter);
    }

    pub fn clear_filter(&mut self) {
        self.request.filter = None;
    }

    /// Convert the source to `output_name`, resolved against the working
    /// directory. The target format is taken from its extension; a bare
    /// `.pdf` counts as extension `pdf`.
    ///
    /// A file already sitting at the converter's own output name is moved
    /// aside while the converter runs, so it can never be mistaken for this
    /// run's output. It is put back unless the run left a new file there.
    ///
    /// # Errors
    /// - [`ConvertError::UnsupportedOutput`] before anything runs if the
    ///   target is not reachable from the source type
    /// - [`ConvertError::Spawn`], [`ConvertError::Timeout`] or
    ///   [`ConvertError::ConversionFailed`] if the converter does not exit
    ///   cleanly
    /// - [`ConvertError::OutputMissing`] if it exits cleanly but leaves no file
    /// - [`ConvertError::RenameFailed`] in strict mode when the final move fails
    pub fn convert_to(&self, output_name: impl AsRef<Path>) -> Result<ConversionResult> {
        let output_name = output_name.as_ref();
        let target = target_extension(output_name);

        if !can_convert(&self.request.source_extension, &target) {
            return Err(ConvertError::UnsupportedOutput {
                from: self.request.source_extension.clone(),
                to: target,
            });
        }

        let produced = self
            .request
            .working_dir
            .join(self.request.converter_output_name(&target));
        let _stale = if produced == self.request.source_path {
            None
        } else {
            StaleOutput::park(&produced)?
        };

        let profile = self.create_profile_dir()?;
        let mut command = ConvertCommand::new(
            &self.request.binary,
            &target,
            &self.request.source_path,
            &self.request.working_dir,
        )
        .with_filter(self.request.filter.clone())
        .with_profile_dir(profile.as_ref().map(|p| p.path().to_path_buf()));

        if let Some(home) = home_override(self.config.home_override) {
            debug!("HOME is not writable, using {} for the converter", home.display());
            command = command.with_env("HOME", home);
        }

        debug!(
            "Converting {} to {} (filter: {:?})",
            self.request.source_path.display(),
            target,
            self.request.filter
        );

        let output = run_with_timeout(&mut command.to_command(), self.config.timeout())?;
        // Profile is only needed while the converter runs
        drop(profile);

        if !output.success() {
            return Err(ConvertError::ConversionFailed {
                exit_code: output.exit_code,
                output: truncate_output(&output.combined(), MAX_DIAGNOSTIC_CHARS),
            });
        }

        let desired = self.request.working_dir.join(output_name);
        let result = self.relocate(&produced, &desired)?;

        info!(
            "Converted {} -> {}",
            self.request.file_name,
            result.output_path.display()
        );
        Ok(result)
    }

    fn create_profile_dir(&self) -> Result<Option<TempDir>> {
        if !self.config.isolate_profile {
            return Ok(None);
        }
        let root = self
            .config
            .profile_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let dir = tempfile::Builder::new()
            .prefix("office-convert-profile-")
            .tempdir_in(root)?;
        Ok(Some(dir))
    }

    fn relocate(&self, produced: &Path, desired: &Path) -> Result<ConversionResult> {
        if !produced.is_file() {
            return Err(ConvertError::OutputMissing(produced.to_path_buf()));
        }
        if produced == desired {
            return Ok(ConversionResult {
                output_path: desired.to_path_buf(),
                renamed: true,
            });
        }

        match move_file(produced, desired) {
            Ok(()) => Ok(ConversionResult {
                output_path: desired.to_path_buf(),
                renamed: true,
            }),
            Err(source) if self.config.strict_rename => Err(ConvertError::RenameFailed {
                from: produced.to_path_buf(),
                to: desired.to_path_buf(),
                source,
            }),
            Err(e) => {
                warn!(
                    "Could not move {} to {} ({e}); keeping converter output name",
                    produced.display(),
                    desired.display()
                );
                Ok(ConversionResult {
                    output_path: produced.to_path_buf(),
                    renamed: false,
                })
            }
        }
    }
}

/// Lower-cased extension of `name`. A dot-file name like `.pdf` is all
/// extension.
fn target_extension(name: &Path) -> String {
    if let Some(ext) = name.extension() {
        return normalize_extension(&ext.to_string_lossy());
    }
    name.file_name()
        .map(|n| n.to_string_lossy())
        .and_then(|n| n.strip_prefix('.').map(normalize_extension))
        .unwrap_or_default()
}

/// A leftover file at the converter's output name, parked under a hidden
/// random name for the length of one run
struct StaleOutput {
    original: PathBuf,
    parked: PathBuf,
}

impl StaleOutput {
    fn park(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let parked = tempfile::Builder::new()
            .prefix(".office-convert-stale-")
            .tempfile_in(dir)?
            .into_temp_path()
            .keep()
            .map_err(|e| e.error)?;
        if let Err(e) = fs::rename(path, &parked) {
            let _ = fs::remove_file(&parked);
            return Err(e.into());
        }
        debug!("Moved stale {} aside", path.display());
        Ok(Some(Self {
            original: path.to_path_buf(),
            parked,
        }))
    }
}

impl Drop for StaleOutput {
    fn drop(&mut self) {
        let outcome = if self.original.exists() {
            fs::remove_file(&self.parked)
        } else {
            fs::rename(&self.parked, &self.original)
        };
        if let Err(e) = outcome {
            warn!(
                "Could not clean up stale output {}: {e}",
                self.parked.display()
            );
        }
    }
}

/// Rename, falling back to copy + remove across filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if fs::copy(from, to).is_err() {
                return Err(rename_err);
            }
            if let Err(e) = fs::remove_file(from) {
                warn!("Copied output but could not remove {}: {e}", from.display());
            }
            Ok(())
        }
    }
}

/// First usable of: the configured directory, the source's directory,
/// the system temp directory
fn resolve_working_dir(configured: Option<&Path>, source: &Path) -> PathBuf {
    if let Some(dir) = configured {
        if let Some(dir) = usable_dir(dir) {
            return dir;
        }
        debug!("Working directory {} unusable, falling back", dir.display());
    }
    if let Some(dir) = source.parent().and_then(usable_dir) {
        return dir;
    }
    let temp = std::env::temp_dir();
    temp.canonicalize().unwrap_or(temp)
}

fn usable_dir(dir: &Path) -> Option<PathBuf> {
    if is_writable_dir(dir) {
        dir.canonicalize().ok()
    } else {
        None
    }
}
