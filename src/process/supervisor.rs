//! Spawning and supervising preview workers.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt as _, AsyncReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use super::control::{force_kill, is_process_alive, wait_for_port};
use super::resolver::{resolve_worker_command, ResolveEnv, WorkerCommand};
use super::{ExitNotice, Instance, LaunchSpec, Launcher, INSTALL_PROMPT, READINESS_TIMEOUT};
use crate::error::{AppError, Result};
use crate::instance::ResourceId;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Launches `slidev <source> --port <port> [--remote]` workers.
pub struct Supervisor {
    env: ResolveEnv,
    readiness_timeout: Duration,
}

impl Supervisor {
    pub fn new(env: ResolveEnv) -> Self {
        Self {
            env,
            readiness_timeout: READINESS_TIMEOUT,
        }
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }
}

fn preview_args(command: &WorkerCommand, spec: &LaunchSpec) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        spec.source_path.clone().into_os_string(),
        "--port".into(),
        spec.port.to_string().into(),
    ];
    if spec.remote {
        args.push("--remote".into());
    }
    command.args_with(args)
}

#[async_trait]
impl Launcher for Supervisor {
    async fn launch(
        &self,
        spec: LaunchSpec,
        exits: mpsc::UnboundedSender<ExitNotice>,
    ) -> Result<Instance> {
        let LaunchSpec {
            resource_id, port, ..
        } = spec;
        let command = resolve_worker_command(&self.env);
        let args = preview_args(&command, &spec);
        let cwd = spec.source_path.parent().unwrap_or_else(|| Path::new("."));

        log::info!(
            "Starting preview {} on port {}: {:?} {:?}",
            resource_id,
            port,
            command.program,
            args
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(target_os = "windows")]
        {
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| {
            AppError::spawn_failure(resource_id, port, format!("Failed to start worker: {e}"))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| AppError::spawn_failure(resource_id, port, "Failed to get process ID"))?;

        let stdin = child.stdin.take();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(watch_stdout(resource_id, stdout, stdin));
        }
        if let Some(stderr) = child.stderr.take() {
            let mut stderr_reader = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = stderr_reader.next_line().await {
                    log::error!("[slidev {} stderr] {}", resource_id, line);
                }
            });
        }

        let exited = Arc::new(AtomicBool::new(false));
        watch_exit(child, resource_id, pid, Arc::clone(&exited), exits);

        match wait_for_port(port, self.readiness_timeout, &exited).await {
            Ok(()) => {
                log::info!(
                    "Preview {} ready (pid: {}, port: {})",
                    resource_id,
                    pid,
                    port
                );
                Ok(Instance::new(resource_id, port, pid, exited))
            }
            Err(e) => {
                log::error!("Preview {} failed to start: {}", resource_id, e);
                if !exited.load(Ordering::SeqCst) && is_process_alive(pid) {
                    if let Err(kill_err) = force_kill(pid) {
                        log::warn!(
                            "Failed to kill unready preview {}: {}",
                            resource_id,
                            kill_err
                        );
                    }
                }
                Err(AppError::spawn_failure(resource_id, port, e))
            }
        }
    }
}

/// Log worker stdout and answer the on-demand install prompt.
async fn watch_stdout(resource_id: ResourceId, mut stdout: ChildStdout, mut stdin: Option<ChildStdin>) {
    let mut buf = [0u8; 4096];
    // The prompt has no trailing newline and may straddle two reads.
    let mut window = String::new();

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let text = String::from_utf8_lossy(&buf[..n]);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            log::debug!("[slidev {} stdout] {}", resource_id, line);
        }

        window.push_str(&text);
        if window.contains(INSTALL_PROMPT) {
            window.clear();
            if let Some(input) = stdin.as_mut() {
                log::info!("Preview {} asked to install the CLI, answering yes", resource_id);
                let answered = async {
                    input.write_all(b"y\n").await?;
                    input.flush().await
                }
                .await;
                if let Err(e) = answered {
                    log::warn!("Failed to answer install prompt for {}: {}", resource_id, e);
                }
            }
        } else if window.len() > INSTALL_PROMPT.len() {
            let mut cut = window.len() - INSTALL_PROMPT.len();
            while !window.is_char_boundary(cut) {
                cut += 1;
            }
            window.drain(..cut);
        }
    }
}

/// Reap `child` in the background, flag the exit and notify the registry.
pub(crate) fn watch_exit(
    mut child: Child,
    resource_id: ResourceId,
    pid: u32,
    exited: Arc<AtomicBool>,
    exits: mpsc::UnboundedSender<ExitNotice>,
) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => log::info!(
                "Preview {} process {} exited: {}",
                resource_id,
                pid,
                status
            ),
            Err(e) => log::warn!("Failed to wait for preview {} ({}): {}", resource_id, pid, e),
        }
        exited.store(true, Ordering::SeqCst);
        let _ = exits.send(ExitNotice { resource_id, pid });
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn spec(source: PathBuf, port: u16, remote: bool) -> LaunchSpec {
        LaunchSpec {
            resource_id: 7,
            source_path: source,
            port,
            remote,
        }
    }

    #[test]
    fn preview_args_embed_source_port_and_remote() {
        let local = WorkerCommand {
            program: "slidev".into(),
            prefix_args: Vec::new(),
            transient: false,
        };
        let args = preview_args(&local, &spec(PathBuf::from("/tmp/a/slides.md"), 5500, true));
        assert_eq!(
            args,
            vec![
                OsString::from("/tmp/a/slides.md"),
                OsString::from("--port"),
                OsString::from("5500"),
                OsString::from("--remote"),
            ]
        );

        let transient = WorkerCommand {
            program: "npx".into(),
            prefix_args: vec!["-y".into(), "@slidev/cli".into()],
            transient: true,
        };
        let args = preview_args(&transient, &spec(PathBuf::from("/tmp/a/slides.md"), 5501, false));
        assert_eq!(args.len(), 5);
        assert_eq!(args[1], OsString::from("@slidev/cli"));
        assert!(!args.contains(&OsString::from("--remote")));
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt as _;

        let path = dir.join("fake-slidev");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn supervisor_for(dir: &Path, script: PathBuf) -> Supervisor {
        Supervisor::new(ResolveEnv {
            override_path: Some(script),
            work_dir: dir.to_path_buf(),
        })
        .with_readiness_timeout(Duration::from_secs(2))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn answers_install_prompt_then_reports_early_exit() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("slides.md");
        std::fs::write(&source, "# demo").unwrap();
        let script = write_script(
            dir.path(),
            "printf 'Package not found, do you want to install it now? (Y/n) '\n\
             read answer\n\
             printf '%s' \"$answer\" > answer.txt",
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = supervisor_for(dir.path(), script)
            .launch(spec(source, 1, true), tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SpawnFailure);

        let answer = std::fs::read_to_string(dir.path().join("answer.txt")).unwrap();
        assert_eq!(answer, "y");

        let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.resource_id, 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unready_worker_is_killed_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("slides.md");
        std::fs::write(&source, "# demo").unwrap();
        let script = write_script(dir.path(), "exec sleep 30");

        let port = {
            let probe = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
            probe.local_addr().unwrap().port()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = supervisor_for(dir.path(), script)
            .launch(spec(source, port, false), tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SpawnFailure);

        let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!is_process_alive(notice.pid));
    }
}
