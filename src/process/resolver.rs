//! Worker executable resolution.
//!
//! Strategies are tried in priority order: explicit override, the binary
//! vendored in the working directory, the one vendored next to it, and
//! finally a transient `npx` invocation that fetches the CLI on demand.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Package `npx` runs when no local binary is found.
const CLI_PACKAGE: &str = "@slidev/cli";

#[cfg(target_os = "windows")]
const BIN_NAME: &str = "slidev.cmd";
#[cfg(not(target_os = "windows"))]
const BIN_NAME: &str = "slidev";

#[cfg(target_os = "windows")]
const NPX: &str = "npx.cmd";
#[cfg(not(target_os = "windows"))]
const NPX: &str = "npx";

#[derive(Debug, Clone)]
pub struct ResolveEnv {
    pub override_path: Option<PathBuf>,
    pub work_dir: PathBuf,
}

/// A resolved program plus the arguments that select the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: OsString,
    pub prefix_args: Vec<String>,
    /// Whether this is the fetch-and-run fallback.
    pub transient: bool,
}

impl WorkerCommand {
    fn local(path: PathBuf) -> Self {
        Self {
            program: path.into_os_string(),
            prefix_args: Vec::new(),
            transient: false,
        }
    }

    fn transient() -> Self {
        Self {
            program: OsString::from(NPX),
            prefix_args: vec!["-y".to_string(), CLI_PACKAGE.to_string()],
            transient: true,
        }
    }

    /// Full argument list: CLI selector followed by `args`.
    pub fn args_with<I, S>(&self, args: I) -> Vec<OsString>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.prefix_args
            .iter()
            .map(OsString::from)
            .chain(args.into_iter().map(Into::into))
            .collect()
    }
}

type Strategy = fn(&ResolveEnv) -> Option<PathBuf>;

const STRATEGIES: [(&str, Strategy); 3] = [
    ("override", from_override),
    ("local", local_vendored),
    ("sibling", sibling_vendored),
];

fn from_override(env: &ResolveEnv) -> Option<PathBuf> {
    env.override_path.clone().filter(|p| p.exists())
}

fn local_vendored(env: &ResolveEnv) -> Option<PathBuf> {
    existing(vendored_bin(&env.work_dir))
}

fn sibling_vendored(env: &ResolveEnv) -> Option<PathBuf> {
    existing(vendored_bin(&env.work_dir.join("..")))
}

fn vendored_bin(root: &Path) -> PathBuf {
    root.join("node_modules").join(".bin").join(BIN_NAME)
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}

pub fn resolve_worker_command(env: &ResolveEnv) -> WorkerCommand {
    for (name, strategy) in STRATEGIES {
        if let Some(path) = strategy(env) {
            log::debug!("Resolved slidev via {} strategy: {}", name, path.display());
            return WorkerCommand::local(path);
        }
    }
    WorkerCommand::transient()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn falls_back_to_npx() {
        let dir = tempfile::tempdir().unwrap();
        let env = ResolveEnv {
            override_path: Some(dir.path().join("missing")),
            work_dir: dir.path().join("app"),
        };
        let cmd = resolve_worker_command(&env);
        assert!(cmd.transient);
        assert_eq!(cmd.program, OsString::from(NPX));
        assert_eq!(
            cmd.args_with(["build"]),
            vec![
                OsString::from("-y"),
                OsString::from(CLI_PACKAGE),
                OsString::from("build")
            ]
        );
    }

    #[test]
    fn sibling_then_local_then_override() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("app");
        std::fs::create_dir_all(&work).unwrap();
        let env = ResolveEnv {
            override_path: Some(dir.path().join("custom-slidev")),
            work_dir: work.clone(),
        };

        touch(&vendored_bin(dir.path()));
        let cmd = resolve_worker_command(&env);
        assert!(!cmd.transient);
        assert_eq!(PathBuf::from(&cmd.program), vendored_bin(&work.join("..")));

        touch(&vendored_bin(&work));
        assert_eq!(
            PathBuf::from(resolve_worker_command(&env).program),
            vendored_bin(&work)
        );

        touch(&dir.path().join("custom-slidev"));
        let cmd = resolve_worker_command(&env);
        assert_eq!(PathBuf::from(&cmd.program), dir.path().join("custom-slidev"));
        assert!(cmd.prefix_args.is_empty());
    }
}
