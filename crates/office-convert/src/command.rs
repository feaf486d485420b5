//! Converter command line construction
//!
//! Builds the argument vector for
//! `<binary> --headless --convert-to <ext>[:filter] [-env:UserInstallation=<url>] <source> --outdir <dir>`.
//! Arguments are passed to the OS individually, so paths never need shell
//! quoting.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Characters escaped in `file://` URLs handed to `-env:UserInstallation`
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One invocation of the converter binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertCommand {
    pub binary: String,
    pub target_extension: String,
    /// Export filter appended to the target, e.g. `writer_pdf_Export`
    pub filter: Option<String>,
    pub source: PathBuf,
    pub outdir: PathBuf,
    /// Isolated user profile for this run
    pub profile_dir: Option<PathBuf>,
    /// Variables set on top of the inherited environment
    pub env: Vec<(OsString, OsString)>,
}

impl ConvertCommand {
    pub fn new(
        binary: impl Into<String>,
        target_extension: impl Into<String>,
        source: impl Into<PathBuf>,
        outdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            target_extension: target_extension.into(),
            filter: None,
            source: source.into(),
            outdir: outdir.into(),
            profile_dir: None,
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.is_empty());
        self
    }

    #[must_use]
    pub fn with_profile_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.profile_dir = dir;
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Value of the `--convert-to` argument: `<ext>` or `<ext>:<filter>`
    pub fn convert_to_arg(&self) -> String {
        match &self.filter {
            Some(filter) => format!("{}:{}", self.target_extension, filter),
            None => self.target_extension.clone(),
        }
    }

    /// Arguments after the binary name, in invocation order
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--headless".into(),
            "--convert-to".into(),
            self.convert_to_arg().into(),
        ];
        if let Some(profile) = &self.profile_dir {
            args.push(format!("-env:UserInstallation={}", profile_url(profile)).into());
        }
        args.push(self.source.clone().into_os_string());
        args.push("--outdir".into());
        args.push(self.outdir.clone().into_os_string());
        args
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        debug!("Converter command: {:?}", cmd);
        cmd
    }
}

/// `file://` URL for a profile directory, as LibreOffice expects
pub fn profile_url(dir: &Path) -> String {
    let raw = dir.to_string_lossy().replace('\\', "/");
    let path = if raw.starts_with('/') {
        raw
    } else {
        // Windows drive paths: C:/... -> /C:/...
        format!("/{raw}")
    };
    format!("file://{}", utf8_percent_encode(&path, PATH_ENCODE_SET))
}

/// Directory to use as `HOME` for the converter, if the real one won't do.
///
/// LibreOffice refuses to start without a writable profile location, which
/// is common for service accounts and containers.
pub fn home_override(enabled: bool) -> Option<PathBuf> {
    home_override_for(enabled, std::env::var_os("HOME").as_deref())
}

/// [`home_override`] for an explicit `HOME` value
pub fn home_override_for(enabled: bool, home: Option<&OsStr>) -> Option<PathBuf> {
    if !enabled {
        return None;
    }
    match home {
        Some(home) if !home.is_empty() && is_writable_dir(Path::new(home)) => None,
        _ => Some(std::env::temp_dir()),
    }
}

/// Whether a file can be created inside `dir`
pub fn is_writable_dir(dir: &Path) -> bool {
    dir.is_dir() && tempfile::tempfile_in(dir).is_ok()
}

/// Whether the converter binary can be found (on `PATH` or as a path)
pub fn is_binary_available(binary: impl AsRef<OsStr>) -> bool {
    which::which(binary).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_basic_args() {
        let cmd = ConvertCommand::new("libreoffice", "pdf", "/docs/report.docx", "/out");
        assert_eq!(
            strings(&cmd.args()),
            vec![
                "--headless",
                "--convert-to",
                "pdf",
                "/docs/report.docx",
                "--outdir",
                "/out"
            ]
        );
    }

    #[test]
    fn test_filter_suffix() {
        let cmd = ConvertCommand::new("soffice", "pdf", "/a.docx", "/out")
            .with_filter(Some("writer_pdf_Export".to_string()));
        assert_eq!(cmd.convert_to_arg(), "pdf:writer_pdf_Export");

        let empty = ConvertCommand::new("soffice", "pdf", "/a.docx", "/out")
            .with_filter(Some(String::new()));
        assert_eq!(empty.convert_to_arg(), "pdf");
    }

    #[test]
    fn test_profile_flag_precedes_source() {
        let cmd = ConvertCommand::new("libreoffice", "odt", "/a b/c.doc", "/out")
            .with_profile_dir(Some(PathBuf::from("/tmp/lo profile")));
        let args = strings(&cmd.args());
        assert_eq!(args[3], "-env:UserInstallation=file:///tmp/lo%20profile");
        assert_eq!(args[4], "/a b/c.doc");
    }

    #[test]
    fn test_source_with_shell_metacharacters_is_single_arg() {
        let cmd = ConvertCommand::new("libreoffice", "pdf", "/in/$(rm -rf ~); a.docx", "/out");
        let args = strings(&cmd.args());
        assert_eq!(args.len(), 6);
        assert_eq!(args[3], "/in/$(rm -rf ~); a.docx");
    }

    #[test]
    fn test_to_command_sets_env_and_program() {
        let cmd = ConvertCommand::new("libreoffice", "pdf", "/a.docx", "/out")
            .with_env("HOME", "/tmp");
        let command = cmd.to_command();
        assert_eq!(command.get_program(), "libreoffice");
        let envs: Vec<_> = command.get_envs().collect();
        assert_eq!(envs, vec![(OsStr::new("HOME"), Some(OsStr::new("/tmp")))]);
        assert_eq!(command.get_args().count(), 6);
    }

    #[test]
    fn test_profile_url_encoding() {
        assert_eq!(
            profile_url(Path::new("/tmp/office-convert-Ab3")),
            "file:///tmp/office-convert-Ab3"
        );
        assert_eq!(profile_url(Path::new("/tmp/a#b%c")), "file:///tmp/a%23b%25c");
        assert_eq!(profile_url(Path::new("/tmp/文档")), "file:///tmp/%E6%96%87%E6%A1%A3");
        assert_eq!(profile_url(Path::new("C:\\Temp\\lo")), "file:///C:/Temp/lo");
    }

    #[test]
    fn test_home_override_disabled() {
        assert_eq!(home_override(false), None);
        assert_eq!(home_override_for(false, None), None);
        assert_eq!(home_override_for(false, Some(OsStr::new("/nonexistent"))), None);
    }

    #[test]
    fn test_home_override_unset_home() {
        assert_eq!(home_override_for(true, None), Some(std::env::temp_dir()));
        assert_eq!(home_override_for(true, Some(OsStr::new(""))), Some(std::env::temp_dir()));
    }

    #[test]
    fn test_home_override_missing_home() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-home");
        assert_eq!(
            home_override_for(true, Some(missing.as_os_str())),
            Some(std::env::temp_dir())
        );
    }

    #[test]
    fn test_home_override_writable_home() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(home_override_for(true, Some(dir.path().as_os_str())), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_home_override_read_only_home() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        std::fs::create_dir(&home).unwrap();
        std::fs::set_permissions(&home, std::fs::Permissions::from_mode(0o555)).unwrap();

        // root ignores directory permissions
        if !is_writable_dir(&home) {
            assert_eq!(
                home_override_for(true, Some(home.as_os_str())),
                Some(std::env::temp_dir())
            );
        }
        std::fs::set_permissions(&home, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_is_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_writable_dir(dir.path()));
        assert!(!is_writable_dir(&dir.path().join("missing")));
    }

    #[test]
    fn test_missing_binary_not_available() {
        assert!(!is_binary_available("office-convert-definitely-missing-binary"));
    }
}
