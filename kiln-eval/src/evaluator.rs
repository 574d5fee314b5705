//! The evaluator boundary: running the external configuration evaluator.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use kiln_core::{EvalError, EvalResult, KilnConfig};
use tracing::debug;

/// Output format requested from the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    /// JSON documents; batches are separated by `---` lines.
    #[default]
    Json,
    /// The evaluator's own output format.
    Native,
}

/// Captured result of one evaluator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stdout: String,
    pub stderr: String,
    /// Exit status; `-1` when the process was terminated by a signal.
    pub status: i32,
}

impl Invocation {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: 0,
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Trimmed standard output of a successful run.
    ///
    /// # Errors
    ///
    /// [`EvalError::ToolInvocationFailure`] carrying the trimmed standard
    /// error when the run failed.
    pub fn into_output(self) -> EvalResult<String> {
        if self.is_success() {
            Ok(self.stdout.trim().to_string())
        } else {
            Err(EvalError::ToolInvocationFailure {
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Something that evaluates configuration modules.
pub trait Evaluator {
    /// Evaluate `modules` in one run. A failing run is reported through the
    /// returned [`Invocation`], not as an error.
    fn invoke(&self, modules: &[&str], format: OutputFormat) -> EvalResult<Invocation>;

    /// Version banner of the evaluator.
    fn version(&self) -> EvalResult<String>;
}

/// Runs the `pkl` command line tool (or a compatible binary) as a subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvaluator {
    bin: PathBuf,
}

impl CommandEvaluator {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    /// Use the configured binary: explicit path, then `KILN_EVALUATOR_BIN`,
    /// then `pkl` from the search path.
    pub fn from_config(config: &KilnConfig) -> Self {
        Self::new(config.evaluator_bin())
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    fn eval_args(modules: &[&str], format: OutputFormat) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["eval".into()];
        if format == OutputFormat::Json {
            args.push("-f".into());
            args.push("json".into());
        }
        args.extend(modules.iter().map(OsString::from));
        args
    }

    fn run(&self, args: &[OsString]) -> EvalResult<Invocation> {
        debug!(bin = %self.bin.display(), ?args, "running evaluator");

        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => EvalError::ExecutableNotFound {
                    path: self.bin.display().to_string(),
                },
                _ => EvalError::Spawn {
                    path: self.bin.display().to_string(),
                    reason: e.to_string(),
                },
            })?;

        let invocation = Invocation {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        };
        debug!(status = invocation.status, "evaluator finished");
        Ok(invocation)
    }
}

impl Default for CommandEvaluator {
    fn default() -> Self {
        Self::from_config(&KilnConfig::default())
    }
}

impl Evaluator for CommandEvaluator {
    fn invoke(&self, modules: &[&str], format: OutputFormat) -> EvalResult<Invocation> {
        self.run(&Self::eval_args(modules, format))
    }

    fn version(&self) -> EvalResult<String> {
        self.run(&["--version".into()])?.into_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_eval_args() {
        let strings = |args: Vec<OsString>| -> Vec<String> {
            args.into_iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect()
        };

        let json = CommandEvaluator::eval_args(&["a.pkl", "b.pkl"], OutputFormat::Json);
        assert_eq!(strings(json), ["eval", "-f", "json", "a.pkl", "b.pkl"]);

        let native = CommandEvaluator::eval_args(&["a.pkl"], OutputFormat::Native);
        assert_eq!(strings(native), ["eval", "a.pkl"]);
    }

    #[test]
    fn test_into_output_trims() {
        let out = Invocation::success("  {\"a\": 1}\n\n").into_output();
        assert_eq!(out, Ok("{\"a\": 1}".to_string()));
    }

    #[test]
    fn test_into_output_surfaces_stderr() {
        let err = Invocation::failure(1, "–– Pkl Error ––\nCannot find module\n")
            .into_output()
            .expect_err("failed run");
        assert_eq!(
            err,
            EvalError::ToolInvocationFailure {
                status: 1,
                stderr: "–– Pkl Error ––\nCannot find module".to_string(),
            }
        );
    }

    #[test]
    #[serial]
    fn test_missing_binary() {
        let evaluator = CommandEvaluator::new("/nonexistent/kiln/bin/pkl");
        let err = evaluator
            .invoke(&["a.pkl"], OutputFormat::Json)
            .expect_err("no such binary");
        assert!(matches!(err, EvalError::ExecutableNotFound { .. }));
        assert!(err.to_string().contains("KILN_EVALUATOR_BIN"));
    }

    #[cfg(unix)]
    fn fake_bin(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("pkl");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        path
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_invoke_passes_modules_and_format() {
        let dir = tempfile::TempDir::new().expect("TempDir creation should succeed");
        let evaluator = CommandEvaluator::new(fake_bin(dir.path(), "echo \"$@\""));

        let invocation = evaluator
            .invoke(&["a.pkl", "b.pkl"], OutputFormat::Json)
            .expect("runs");
        assert!(invocation.is_success());
        assert_eq!(invocation.stdout.trim(), "eval -f json a.pkl b.pkl");
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_invoke_reports_failure_status() {
        let dir = tempfile::TempDir::new().expect("TempDir creation should succeed");
        let evaluator =
            CommandEvaluator::new(fake_bin(dir.path(), "echo 'Cannot find module' >&2\nexit 3"));

        let invocation = evaluator
            .invoke(&["nope.pkl"], OutputFormat::Json)
            .expect("runs");
        assert_eq!(invocation.status, 3);
        assert_eq!(invocation.stderr.trim(), "Cannot find module");
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_version() {
        let dir = tempfile::TempDir::new().expect("TempDir creation should succeed");
        let evaluator = CommandEvaluator::new(fake_bin(
            dir.path(),
            "[ \"$1\" = \"--version\" ] && echo 'Pkl 0.25.3 (macOS 14.3, native)'",
        ));
        assert_eq!(
            evaluator.version().expect("version"),
            "Pkl 0.25.3 (macOS 14.3, native)"
        );
    }
}
