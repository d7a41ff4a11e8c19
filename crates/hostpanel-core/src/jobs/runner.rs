//! Timeout-bounded script execution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::environment::{env_dir_for, interpreter_in};
use super::validate_env_names;
use crate::config::JobsConfig;
use crate::error::{CoreError, CoreResult};
use crate::process;
use crate::sandbox;

/// How long captured streams may keep draining after the process exited.
const READER_GRACE: Duration = Duration::from_secs(2);

/// An execution request. Not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    /// Script path relative to the tenant root.
    pub script_path: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Wall-clock bound; the runner's default applies when unset.
    #[serde(default, with = "optional_secs")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Job {
    pub fn new(script_path: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }
}

/// Result of a job that ran to completion, whatever its exit code.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutput {
    pub exit_code: Option<i32>,
    /// Set when the process was terminated by a signal.
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// At least one stream exceeded the capture limit.
    pub truncated: bool,
    pub duration_ms: u64,
    pub interpreter: PathBuf,
}

impl JobOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes scripts under their isolated environment or the default interpreter.
#[derive(Debug, Clone)]
pub struct JobRunner {
    pub(super) config: JobsConfig,
}

impl JobRunner {
    pub fn new(config: JobsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    /// Interpreter for `script`: its `.venv` interpreter when present, else the default.
    ///
    /// The environment directory is validated against the sandbox; the interpreter
    /// inside it is conventionally a link to a system binary and is used as is.
    pub fn interpreter_for(&self, root: &Path, script: &Path) -> CoreResult<PathBuf> {
        let env_dir = sandbox::resolve(root, env_dir_for(script)?)?;
        if env_dir.is_dir() {
            Ok(interpreter_in(&env_dir))
        } else {
            Ok(self.config.default_interpreter.clone())
        }
    }

    /// Run `job` once inside `root`.
    ///
    /// A non-zero exit code is still `Ok`; only dispatch failures are errors. When the
    /// timeout expires the process group is killed and its partial output discarded.
    pub async fn run_once(&self, root: &Path, job: &Job) -> CoreResult<JobOutput> {
        let script = sandbox::resolve_existing(root, &job.script_path)?;
        if !script.is_file() {
            return Err(CoreError::invalid(format!(
                "not a file: {}",
                job.script_path
            )));
        }
        validate_env_names(&job.env)?;

        let workdir = script.parent().unwrap_or(root).to_path_buf();
        let interpreter = self.interpreter_for(root, &script)?;
        let timeout = job.timeout.unwrap_or_else(|| self.config.default_timeout());
        let limit = self.config.max_output_bytes;

        let mut cmd = Command::new(&interpreter);
        cmd.arg(&script)
            .args(&job.args)
            .current_dir(&workdir)
            .envs(&job.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::isolate_process_group(&mut cmd);

        debug!(
            script = %script.display(),
            interpreter = %interpreter.display(),
            ?timeout,
            "spawning job"
        );
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|err| {
            CoreError::LaunchFailed(format!("{}: {}", interpreter.display(), err))
        })?;
        let pgid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::LaunchFailed("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CoreError::LaunchFailed("stderr was not captured".to_string()))?;
        let stdout_task = tokio::spawn(capture(stdout, limit));
        let stderr_task = tokio::spawn(capture(stderr, limit));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                process::kill_and_reap(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(CoreError::LaunchFailed(format!(
                    "waiting for {}: {}",
                    script.display(),
                    err
                )));
            }
            Err(_) => {
                warn!(script = %script.display(), ?timeout, "job timed out, killing");
                process::kill_and_reap(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(CoreError::TimedOut(timeout));
            }
        };

        // Background processes left by the script would otherwise hold the pipes open.
        process::sweep_group(pgid);
        let (stdout, stdout_truncated) = collect(stdout_task).await;
        let (stderr, stderr_truncated) = collect(stderr_task).await;

        let output = JobOutput {
            exit_code: status.code(),
            signal: process::exit_signal(&status),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            truncated: stdout_truncated || stderr_truncated,
            duration_ms: started.elapsed().as_millis() as u64,
            interpreter,
        };
        info!(
            script = %script.display(),
            exit_code = ?output.exit_code,
            duration_ms = output.duration_ms,
            "job finished"
        );
        Ok(output)
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes.
async fn capture<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> (Vec<u8>, bool) {
    let mut captured = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(captured.len());
                if n > room {
                    truncated = true;
                }
                captured.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(err) => {
                debug!("stream read error: {}", err);
                break;
            }
        }
    }

    (captured, truncated)
}

async fn collect(task: JoinHandle<(Vec<u8>, bool)>) -> (Vec<u8>, bool) {
    let abort = task.abort_handle();
    match tokio::time::timeout(READER_GRACE, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            warn!("output reader failed: {}", err);
            (Vec::new(), true)
        }
        Err(_) => {
            abort.abort();
            warn!("output stream still open after process exit");
            (Vec::new(), true)
        }
    }
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        match secs {
            Some(s) if s.is_finite() && s > 0.0 => Duration::try_from_secs_f64(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            Some(_) => Err(serde::de::Error::custom("timeout must be a positive number")),
            None => Ok(None),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn runner() -> JobRunner {
        JobRunner::new(JobsConfig {
            default_interpreter: PathBuf::from("/bin/sh"),
            max_output_bytes: 64,
            ..JobsConfig::default()
        })
    }

    fn root_with_script(body: &str) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("alice");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/job.sh"), body).unwrap();
        let root = root.canonicalize().unwrap();
        (temp, root)
    }

    #[tokio::test]
    async fn test_run_once_captures_output_and_exit_code() {
        let (_temp, root) = root_with_script("echo out; echo err >&2; pwd; exit 3\n");
        let output = runner()
            .run_once(&root, &Job::new("bin/job.sh"))
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert!(output.stdout.starts_with("out\n"));
        assert!(output.stdout.contains(&root.join("bin").display().to_string()));
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.interpreter, PathBuf::from("/bin/sh"));
    }

    #[tokio::test]
    async fn test_run_once_passes_args_and_env() {
        let (_temp, root) = root_with_script("echo \"$1-$2-$GREETING\"\n");
        let job = Job::new("bin/job.sh")
            .with_args(["a", "b"])
            .with_env("GREETING", "hello");
        let output = runner().run_once(&root, &job).await.unwrap();
        assert_eq!(output.stdout, "a-b-hello\n");
    }

    #[tokio::test]
    async fn test_run_once_truncates_large_output() {
        let (_temp, root) =
            root_with_script("i=0; while [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done\n");
        let output = runner()
            .run_once(&root, &Job::new("bin/job.sh"))
            .await
            .unwrap();
        assert!(output.truncated);
        assert_eq!(output.stdout.len(), 64);
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_run_once_times_out_and_discards_output() {
        let (_temp, root) = root_with_script("sleep 5; echo done\n");
        let started = Instant::now();
        let err = runner()
            .run_once(
                &root,
                &Job::new("bin/job.sh").with_timeout(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TimedOut(d) if d == Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_run_once_rejects_escape_and_missing() {
        let (_temp, root) = root_with_script("true\n");
        assert!(matches!(
            runner().run_once(&root, &Job::new("../bob/x.sh")).await,
            Err(CoreError::SandboxViolation(_))
        ));
        assert!(matches!(
            runner().run_once(&root, &Job::new("bin/missing.sh")).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_run_once_reports_launch_failure() {
        let (_temp, root) = root_with_script("true\n");
        let runner = JobRunner::new(JobsConfig {
            default_interpreter: PathBuf::from("/nonexistent/interpreter"),
            ..JobsConfig::default()
        });
        assert!(matches!(
            runner.run_once(&root, &Job::new("bin/job.sh")).await,
            Err(CoreError::LaunchFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_run_once_prefers_isolated_environment() {
        let (_temp, root) = root_with_script("echo ignored\n");
        let venv_bin = root.join("bin/.venv/bin");
        fs::create_dir_all(&venv_bin).unwrap();
        let python = venv_bin.join("python");
        fs::write(&python, "#!/bin/sh\necho from-venv\n").unwrap();
        fs::set_permissions(&python, fs::Permissions::from_mode(0o755)).unwrap();

        let output = runner()
            .run_once(&root, &Job::new("bin/job.sh"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "from-venv\n");
        assert_eq!(output.interpreter, python);
    }

    #[test]
    fn test_job_timeout_deserializes_from_seconds() {
        let job: Job =
            serde_json::from_str(r#"{"script_path":"a.py","timeout":2.5}"#).unwrap();
        assert_eq!(job.timeout, Some(Duration::from_millis(2500)));
        let job: Job = serde_json::from_str(r#"{"script_path":"a.py"}"#).unwrap();
        assert_eq!(job.timeout, None);
        assert!(serde_json::from_str::<Job>(r#"{"script_path":"a.py","timeout":0}"#).is_err());
        // Out of range for a Duration.
        assert!(serde_json::from_str::<Job>(r#"{"script_path":"a.py","timeout":1e30}"#).is_err());
    }
}
