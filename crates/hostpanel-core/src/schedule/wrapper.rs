//! Launcher scripts invoked by the schedule table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

const WRAPPER_SUFFIX: &str = "_wrapper.sh";
const SCRIPT_EXTENSION: &str = "py";

/// Inputs for one launcher.
#[derive(Debug)]
pub struct Wrapper<'a> {
    pub script: &'a Path,
    pub interpreter: &'a Path,
    /// Activation script of the isolated environment, if the script has one.
    pub activate: Option<&'a Path>,
    pub env: &'a BTreeMap<String, String>,
    pub log_file: &'a Path,
}

impl Wrapper<'_> {
    pub fn render(&self) -> String {
        let mut out = String::from("#!/bin/bash\n\n");
        for (name, value) in self.env {
            out.push_str(&format!("export {}={}\n", name, shell_quote(value)));
        }
        if let Some(activate) = self.activate {
            out.push_str(&format!("source {}\n", quote_path(activate)));
        }
        out.push_str(&format!(
            "\n{} {} > {} 2>&1\n",
            quote_path(self.interpreter),
            quote_path(self.script),
            quote_path(self.log_file)
        ));
        out
    }
}

/// `<dir>/<stem>_wrapper.sh` for `<dir>/<stem>.py`.
pub fn wrapper_path_for(script: &Path) -> CoreResult<PathBuf> {
    if script.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
        return Err(CoreError::invalid(format!(
            "only .{SCRIPT_EXTENSION} scripts can be scheduled: {}",
            script.display()
        )));
    }
    let stem = script
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CoreError::invalid(format!("invalid script name: {}", script.display())))?;
    Ok(script.with_file_name(format!("{stem}{WRAPPER_SUFFIX}")))
}

/// Inverse of [`wrapper_path_for`].
pub fn script_path_for(wrapper: &Path) -> Option<PathBuf> {
    let name = wrapper.file_name()?.to_str()?;
    let stem = name.strip_suffix(WRAPPER_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }
    Some(wrapper.with_file_name(format!("{stem}.{SCRIPT_EXTENSION}")))
}

/// Single-quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Write the launcher and make it executable.
pub async fn write_wrapper(path: &Path, contents: &str) -> CoreResult<()> {
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_paths() {
        let script = Path::new("/home/alice/app/report.py");
        let wrapper = wrapper_path_for(script).unwrap();
        assert_eq!(wrapper, PathBuf::from("/home/alice/app/report_wrapper.sh"));
        assert_eq!(script_path_for(&wrapper).unwrap(), script);

        assert!(wrapper_path_for(Path::new("/home/alice/run.sh")).is_err());
        assert!(script_path_for(Path::new("/home/alice/run.sh")).is_none());
        assert!(script_path_for(Path::new("/home/alice/_wrapper.sh")).is_none());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(rm -rf ~)"), "'$(rm -rf ~)'");
    }

    #[test]
    fn test_render_with_environment() {
        let mut env = BTreeMap::new();
        env.insert("TOKEN".to_string(), "a'b".to_string());
        env.insert("MODE".to_string(), "prod".to_string());

        let wrapper = Wrapper {
            script: Path::new("/home/alice/app/report.py"),
            interpreter: Path::new("/home/alice/app/.venv/bin/python"),
            activate: Some(Path::new("/home/alice/app/.venv/bin/activate")),
            env: &env,
            log_file: Path::new("/home/alice/app/cron_output.log"),
        };

        assert_eq!(
            wrapper.render(),
            "#!/bin/bash\n\n\
             export MODE='prod'\n\
             export TOKEN='a'\\''b'\n\
             source '/home/alice/app/.venv/bin/activate'\n\
             \n\
             '/home/alice/app/.venv/bin/python' '/home/alice/app/report.py' > '/home/alice/app/cron_output.log' 2>&1\n"
        );
    }

    #[test]
    fn test_render_without_environment() {
        let env = BTreeMap::new();
        let wrapper = Wrapper {
            script: Path::new("/srv/bob/job.py"),
            interpreter: Path::new("python3"),
            activate: None,
            env: &env,
            log_file: Path::new("/srv/bob/cron_output.log"),
        };
        let rendered = wrapper.render();
        assert!(!rendered.contains("export"));
        assert!(!rendered.contains("source"));
        assert!(rendered.ends_with("'python3' '/srv/bob/job.py' > '/srv/bob/cron_output.log' 2>&1\n"));
    }
}
