//! The per-service driver.
//!
//! One [`ServiceRuntime`] drives one service through its lifecycle state
//! machine: spawn the start command under a shell, wrap stdout and stderr in
//! pattern pipes that synthesize Started/Error transitions, wait for stream
//! EOF and process exit, and run the stop protocol on request. Every
//! transition is published on the service's status bus.

use crate::config::{ServiceConfig, StopSpec};
use crate::error::{Error, Result};
use crate::pipe::{LineSink, PatternPipe};
use crate::service::process_tree;
use crate::service::{Status, StatusEvent, STATUS_BUS_CAPACITY};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Build a command that evaluates `command_line` under the host shell.
pub(crate) fn shell_command(command_line: &str) -> Command {
    #[cfg(windows)]
    {
        let mut command = Command::new("cmd");
        command.arg("/c").arg(command_line);
        command
    }
    #[cfg(not(windows))]
    {
        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        command
    }
}

pub struct ServiceRuntime {
    config: Arc<ServiceConfig>,
    sink: Arc<dyn LineSink>,
    /// Guards the status field together with the duplicate-Started check.
    status: Mutex<Status>,
    status_tx: broadcast::Sender<StatusEvent>,
    pid: Mutex<Option<u32>>,
    /// Total started-pattern observations, across all lines and patterns.
    started_matches: AtomicUsize,
    /// Cancelling this token interrupts the current driver task.
    cancel: Mutex<CancellationToken>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceRuntime {
    pub fn new(config: Arc<ServiceConfig>, sink: Arc<dyn LineSink>) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_BUS_CAPACITY);
        let runtime = Self {
            config,
            sink,
            status: Mutex::new(Status::Loaded),
            status_tx,
            pid: Mutex::new(None),
            started_matches: AtomicUsize::new(0),
            cancel: Mutex::new(CancellationToken::new()),
            driver: Mutex::new(None),
        };
        runtime.emit(Status::Loaded);
        runtime
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &Arc<ServiceConfig> {
        &self.config
    }

    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock()
    }

    /// How many started-pattern lines have been observed so far.
    pub fn started_matches(&self) -> usize {
        self.started_matches.load(Ordering::SeqCst)
    }

    /// Subscribe to this service's status bus.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    /// Spawn the driver task for one run. Returns false when the service is
    /// not in a startable state. The check and the Starting transition are
    /// atomic, so concurrent callers cannot start the same service twice.
    pub fn spawn_run(self: &Arc<Self>) -> bool {
        {
            let mut status = self.status.lock();
            if !status.can_start() {
                return false;
            }
            *status = Status::Starting;
            self.emit(Status::Starting);
        }
        self.started_matches.store(0, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        let this = Arc::clone(self);
        let handle = tokio::spawn(this.drive(cancel));
        *self.driver.lock() = Some(handle);
        true
    }

    /// Interrupt the current driver task; it will destroy the process tree
    /// and transition through Stopping to Stopped.
    pub fn interrupt(&self) {
        self.cancel.lock().cancel();
    }

    /// Detach the current driver handle, if any.
    pub fn take_driver(&self) -> Option<JoinHandle<()>> {
        self.driver.lock().take()
    }

    /// Wait until the status bus carries `target`, up to `timeout`.
    pub async fn await_status(&self, target: Status, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        if self.status() == target {
            return true;
        }
        tokio::time::timeout(timeout, async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.status == target => return true,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// One run of the service. Entered only through [`Self::spawn_run`],
    /// which has already transitioned the status to Starting.
    async fn drive(self: Arc<Self>, cancel: CancellationToken) {
        let mut command = shell_command(&self.config.start);
        command
            .current_dir(&self.config.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        match &self.config.stdin {
            Some(path) => match std::fs::File::open(path) {
                Ok(file) => {
                    tracing::debug!(
                        "{} will serve as stdin for {}",
                        path.display(),
                        self.config.name
                    );
                    command.stdin(Stdio::from(file));
                }
                Err(e) => {
                    self.revert_to_loaded();
                    tracing::error!(
                        "{}",
                        Error::SpawnFailed(
                            self.config.name.clone(),
                            format!("cannot open stdin file '{}': {}", path.display(), e)
                        )
                    );
                    return;
                }
            },
            None => {
                command.stdin(Stdio::null());
            }
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.revert_to_loaded();
                tracing::error!(
                    "{}",
                    Error::SpawnFailed(self.config.name.clone(), e.to_string())
                );
                return;
            }
        };

        *self.pid.lock() = child.id();
        tracing::info!("{} PID: {:?}", self.config.name, child.id());

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => {
                tracing::error!("stdio pipes missing for {}", self.config.name);
                self.finish(&mut child, true).await;
                return;
            }
        };

        // stdout carries the started patterns, stderr the error patterns
        let mut stdout_pipe =
            PatternPipe::new(format!("[{}]: ", self.config.name), self.sink.clone());
        for pattern in &self.config.started_patterns {
            let this = Arc::clone(&self);
            stdout_pipe = stdout_pipe.hook(pattern.clone(), move |_line| this.observe_started());
        }
        let this = Arc::clone(&self);
        stdout_pipe = stdout_pipe.on_error(move |e| {
            tracing::error!(
                "{}",
                Error::StreamIo(this.config.name.clone(), e.to_string())
            );
        });

        let mut stderr_pipe =
            PatternPipe::new(format!("[{}!]: ", self.config.name), self.sink.clone());
        for pattern in &self.config.error_patterns {
            let this = Arc::clone(&self);
            stderr_pipe = stderr_pipe.hook(pattern.clone(), move |_line| this.observe_error());
        }
        let this = Arc::clone(&self);
        stderr_pipe = stderr_pipe.on_error(move |e| {
            tracing::error!(
                "{}",
                Error::StreamIo(this.config.name.clone(), e.to_string())
            );
        });

        let stdout_task = tokio::spawn(stdout_pipe.run(stdout));
        let stderr_task = tokio::spawn(stderr_pipe.run(stderr));

        // streams close when the process closes them
        tokio::select! {
            _ = cancel.cancelled() => {
                self.finish(&mut child, false).await;
                return;
            }
            _ = async { let _ = stdout_task.await; let _ = stderr_task.await; } => {}
        }

        // a process may close its streams and keep running; wait for exit
        let exit = tokio::select! {
            _ = cancel.cancelled() => None,
            result = child.wait() => result.ok(),
        };

        match exit {
            Some(status) => {
                self.transition(Status::Stopping);
                *self.pid.lock() = None;
                self.transition(Status::Stopped);
                self.sink.write_line(&format!(
                    "Service {} exited with {}",
                    self.config.name,
                    describe_exit(status)
                ));
            }
            None => self.finish(&mut child, false).await,
        }
    }

    /// Interrupted path: destroy the process tree, then Stopping -> Stopped.
    async fn finish(&self, child: &mut Child, quiet: bool) {
        self.transition(Status::Stopping);
        self.destroy_child(child).await;
        *self.pid.lock() = None;
        self.transition(Status::Stopped);
        if !quiet {
            self.sink.write_line(&format!(
                "Service {} exited because it was interrupted",
                self.config.name
            ));
        }
    }

    /// SIGTERM the tree, wait the destroy grace on the child itself, then
    /// SIGKILL whatever remains.
    async fn destroy_child(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            process_tree::signal_tree(pid, nix::sys::signal::Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        let _ = child.start_kill();

        if tokio::time::timeout(process_tree::DESTROY_GRACE, child.wait())
            .await
            .is_err()
        {
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                process_tree::signal_tree(pid, nix::sys::signal::Signal::SIGKILL);
            }
            let _ = child.kill().await;
        }
    }

    /// Run the stop protocol. The driver observes the process dying and
    /// performs the Stopping -> Stopped transitions itself.
    pub async fn stop(&self) -> Result<()> {
        let pid = self.pid();
        let Some(pid) = pid else {
            return Ok(());
        };
        if !self.is_running() {
            return Ok(());
        }

        match &self.config.stop {
            StopSpec::Signal(signal) => {
                #[cfg(unix)]
                {
                    tracing::info!(
                        "Sending {} to {} (pid: {}) and all subprocesses",
                        signal,
                        self.config.name,
                        pid
                    );
                    process_tree::signal_tree(pid, signal.to_nix());
                }
                #[cfg(not(unix))]
                {
                    tracing::warn!(
                        "Cannot deliver {} on this platform; destroying {} directly",
                        signal,
                        self.config.name
                    );
                    self.interrupt();
                }
                // no-op if the signal already did the job
                process_tree::destroy_tree(pid).await;
            }
            StopSpec::Command(command_line) => {
                self.run_stop_command(command_line, pid).await;
            }
        }
        Ok(())
    }

    async fn run_stop_command(&self, command_line: &str, pid: u32) {
        tracing::info!(
            "Executing stop command for {} (pid: {})",
            self.config.name,
            pid
        );

        let mut rx = self.subscribe();
        let stopped_seen = async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.status == Status::Stopped => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        let mut command = shell_command(command_line);
        command
            .current_dir(&self.config.work_dir)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        match &self.config.stop_stdin {
            Some(path) => match std::fs::File::open(path) {
                Ok(file) => {
                    command.stdin(Stdio::from(file));
                }
                Err(e) => {
                    tracing::error!(
                        "cannot open stop stdin file '{}' for {}: {}",
                        path.display(),
                        self.config.name,
                        e
                    );
                    command.stdin(Stdio::null());
                }
            },
            None => {
                command.stdin(Stdio::null());
            }
        }

        let name = self.config.name.clone();
        let stop_wait = async move {
            match command.spawn() {
                Ok(mut stop_child) => {
                    let _ = stop_child.wait().await;
                }
                Err(e) => {
                    // logged but never prevents the destroy below
                    tracing::error!("Error while executing stop command for {}: {}", name, e);
                }
            }
        };

        let timed_out = tokio::select! {
            outcome = tokio::time::timeout(self.config.stop_timeout, stop_wait) => outcome.is_err(),
            _ = stopped_seen => false,
        };

        if timed_out && process_tree::alive(pid) {
            tracing::warn!("{}", Error::StopTimedOut(self.config.name.clone()));
        }

        // whichever way the race went, nothing may remain afterwards
        process_tree::destroy_tree(pid).await;
    }

    /// Started-pattern observation. The first one (or the first after an
    /// Error) transitions the service; repeats are counted and logged only.
    fn observe_started(&self) {
        let mut status = self.status.lock();
        let previous = self.started_matches.fetch_add(1, Ordering::SeqCst);
        match *status {
            Status::Started => {
                tracing::info!(
                    "Service {} has notified again that it has started. Ignoring. \
                     Times it notified this before: {}",
                    self.config.name,
                    previous
                );
            }
            Status::Starting | Status::Error => {
                *status = Status::Started;
                self.emit(Status::Started);
            }
            _ => {} // late output after stop began
        }
    }

    /// Error-pattern observation.
    fn observe_error(&self) {
        let mut status = self.status.lock();
        match *status {
            Status::Starting | Status::Started => {
                *status = Status::Error;
                self.emit(Status::Error);
            }
            _ => {}
        }
    }

    fn transition(&self, new: Status) {
        let mut status = self.status.lock();
        *status = new;
        self.emit(new);
    }

    /// Spawn failures leave the service startable again; the Starting
    /// transition is rolled back without an event.
    fn revert_to_loaded(&self) {
        *self.status.lock() = Status::Loaded;
    }

    fn emit(&self, status: Status) {
        tracing::debug!("{} -> {}", self.config.name, status);
        let _ = self
            .status_tx
            .send(StatusEvent::now(&self.config.name, status));
    }
}

fn describe_exit(status: std::process::ExitStatus) -> String {
    match status.code() {
        Some(0) => "status code 0 (good)".to_string(),
        Some(143) => "status code 143 (SIGTERM)".to_string(),
        Some(code) => format!("status code {} (bad?)", code),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    let code = 128 + signal;
                    return if signal == 15 {
                        format!("status code {} (SIGTERM)", code)
                    } else {
                        format!("status code {} (bad?)", code)
                    };
                }
            }
            "an unknown status".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Rgb, StopSignal};
    use crate::pipe::BufferSink;
    use std::path::PathBuf;

    fn test_config(name: &str) -> Arc<ServiceConfig> {
        Arc::new(ServiceConfig {
            name: name.to_string(),
            aliases: vec![],
            start: "true".to_string(),
            work_dir: PathBuf::from("."),
            stdin: None,
            stop: StopSpec::Signal(StopSignal::Term),
            stop_timeout: Duration::from_secs(5),
            stop_stdin: None,
            started_patterns: vec![],
            error_patterns: vec![],
            color: Rgb::WHITE,
        })
    }

    fn test_runtime(name: &str) -> ServiceRuntime {
        ServiceRuntime::new(test_config(name), Arc::new(BufferSink::new(100)))
    }

    #[tokio::test]
    async fn repeated_started_observations_transition_once() {
        let runtime = test_runtime("t");
        let mut rx = runtime.subscribe();
        runtime.transition(Status::Starting);

        runtime.observe_started();
        runtime.observe_started();
        runtime.observe_started();

        assert_eq!(runtime.status(), Status::Started);
        assert_eq!(runtime.started_matches(), 3);

        // exactly one Started event on the bus
        let mut started_events = 0;
        while let Ok(event) = rx.try_recv() {
            if event.status == Status::Started {
                started_events += 1;
            }
        }
        assert_eq!(started_events, 1);
    }

    #[tokio::test]
    async fn error_observation_demotes_a_started_service() {
        let runtime = test_runtime("t");
        runtime.transition(Status::Starting);
        runtime.observe_started();
        runtime.observe_error();
        assert_eq!(runtime.status(), Status::Error);

        // a later started pattern recovers it
        runtime.observe_started();
        assert_eq!(runtime.status(), Status::Started);
    }

    #[tokio::test]
    async fn observations_after_stopping_are_ignored() {
        let runtime = test_runtime("t");
        runtime.transition(Status::Stopping);
        runtime.observe_started();
        runtime.observe_error();
        assert_eq!(runtime.status(), Status::Stopping);
    }

    #[tokio::test]
    async fn stop_without_process_is_a_no_op() {
        let runtime = test_runtime("t");
        assert!(runtime.stop().await.is_ok());
        assert_eq!(runtime.status(), Status::Loaded);
    }

    #[test]
    #[cfg(unix)]
    fn describe_exit_reports_conventions() {
        use std::os::unix::process::ExitStatusExt;
        let ok = std::process::ExitStatus::from_raw(0);
        assert!(describe_exit(ok).contains("(good)"));
        // raw wait status 15 = terminated by SIGTERM
        let term = std::process::ExitStatus::from_raw(15);
        assert!(describe_exit(term).contains("SIGTERM"));
    }
}
