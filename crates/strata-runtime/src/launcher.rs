//! Process launcher.
//!
//! Starts exactly one process-manager instance serving the image's
//! application object, and follows it through
//!
//! ```text
//! NotStarted ──launch──▶ Listening ──termination signal──▶ Stopped
//!      │                     │
//!      └── startup failure ──┴── crash ──────────────────▶ Stopped
//! ```
//!
//! Startup failures (port in use, unresolvable application object, process
//! manager exiting before the socket accepts connections) are reported
//! immediately and never retried. A crash after the socket is up is
//! reported as such; restarting is left to whatever supervises strata.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use strata_core::{AppRef, ImageRecord, LaunchConfig};
use tokio::process::Child;

use crate::executor::CommandExecutor;
use crate::toolchain::{PythonToolchain, ToolchainError, env_python};

/// gunicorn's exit status when the application cannot be loaded.
const APP_LOAD_ERROR: i32 = 4;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    NotStarted,
    Listening,
    Stopped,
}

/// Everything needed to start the process manager for one image.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub python: PathBuf,
    pub workdir: PathBuf,
    pub bind: SocketAddr,
    pub app: AppRef,
    pub process_manager: String,
    pub workers: Option<u32>,
    pub ready_timeout: Duration,
    pub stop_timeout: Duration,
}

impl LaunchPlan {
    /// Resolve a plan for `image` whose top layer is materialised at `top_layer`.
    ///
    /// Bind address and application object come from the image; timeouts
    /// come from the local launch settings.
    pub fn from_image(
        image: &ImageRecord,
        top_layer: &Path,
        launch: &LaunchConfig,
    ) -> Result<Self, LaunchError> {
        let config = &image.config;
        let bind = config
            .bind
            .parse()
            .map_err(|e: std::net::AddrParseError| LaunchError::InvalidPlan {
                detail: format!("bind address {:?}: {e}", config.bind),
            })?;
        let app = config
            .app
            .parse()
            .map_err(|e: strata_core::Error| LaunchError::InvalidPlan {
                detail: e.to_string(),
            })?;

        Ok(Self {
            python: env_python(&top_layer.join(&config.env_dir)),
            workdir: top_layer.join(&config.workdir),
            bind,
            app,
            process_manager: config.process_manager.clone(),
            workers: config.workers,
            ready_timeout: Duration::from_secs(launch.ready_timeout_secs),
            stop_timeout: Duration::from_secs(launch.stop_timeout_secs),
        })
    }

    /// Interpreter arguments: `-m <manager> --bind <addr> [--workers N] <module:object>`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-m".to_owned(),
            self.process_manager.clone(),
            "--bind".to_owned(),
            self.bind.to_string(),
        ];
        if let Some(workers) = self.workers {
            args.push("--workers".to_owned());
            args.push(workers.to_string());
        }
        args.push(self.app.to_string());
        args
    }

    /// Address used to check the socket accepts connections.
    pub fn ready_addr(&self) -> SocketAddr {
        let ip = match self.bind.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        SocketAddr::new(ip, self.bind.port())
    }
}

/// How a launched process manager came to a stop.
#[derive(Debug)]
pub struct LaunchOutcome {
    pub status: ExitStatus,
    /// Stopped by a termination signal rather than exiting on its own
    pub terminated: bool,
}

/// Drives one process-manager instance through its lifecycle.
pub struct Launcher<'a, E: CommandExecutor> {
    plan: LaunchPlan,
    toolchain: &'a PythonToolchain<E>,
    state: LaunchState,
}

enum Startup {
    Ready,
    Failed(LaunchError),
    TimedOut,
    Shutdown,
}

enum Running {
    Exited(std::io::Result<ExitStatus>),
    Shutdown,
}

impl<'a, E: CommandExecutor> Launcher<'a, E> {
    pub fn new(plan: LaunchPlan, toolchain: &'a PythonToolchain<E>) -> Self {
        Self {
            plan,
            toolchain,
            state: LaunchState::NotStarted,
        }
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// Launch and serve until `shutdown` resolves or the process manager exits.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<LaunchOutcome, LaunchError>
    where
        F: Future<Output = ()>,
    {
        if self.state != LaunchState::NotStarted {
            return Err(LaunchError::AlreadyStarted);
        }

        let result = self.serve(shutdown).await;
        self.state = LaunchState::Stopped;
        result
    }

    async fn serve<F>(&mut self, shutdown: F) -> Result<LaunchOutcome, LaunchError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        check_port_available(self.plan.bind)?;

        self.toolchain
            .resolve_app(&self.plan.python, &self.plan.app, &self.plan.workdir)
            .await
            .map_err(LaunchError::Resolve)?;

        tracing::info!(
            app = %self.plan.app,
            bind = %self.plan.bind,
            manager = %self.plan.process_manager,
            "starting process manager"
        );

        let mut child = tokio::process::Command::new(&self.plan.python)
            .args(self.plan.args())
            .current_dir(&self.plan.workdir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                program: self.plan.python.clone(),
                source: e,
            })?;

        let ready_addr = self.plan.ready_addr();
        let startup = tokio::select! {
            ready = tokio::time::timeout(
                self.plan.ready_timeout,
                wait_until_listening(&mut child, ready_addr),
            ) => match ready {
                Ok(Ok(())) => Startup::Ready,
                Ok(Err(e)) => Startup::Failed(e),
                Err(_) => Startup::TimedOut,
            },
            () = &mut shutdown => Startup::Shutdown,
        };

        match startup {
            Startup::Ready => {}
            Startup::Failed(e) => return Err(e),
            Startup::TimedOut => {
                child.kill().await.map_err(LaunchError::Wait)?;
                return Err(LaunchError::ReadyTimeout {
                    addr: self.plan.bind,
                    timeout: self.plan.ready_timeout,
                });
            }
            Startup::Shutdown => {
                let status = terminate(&mut child, self.plan.stop_timeout).await?;
                return Ok(LaunchOutcome {
                    status,
                    terminated: true,
                });
            }
        }

        self.state = LaunchState::Listening;
        tracing::info!(
            app = %self.plan.app,
            "listening on http://{} (Ctrl+C to stop)",
            self.plan.bind
        );

        let running = tokio::select! {
            status = child.wait() => Running::Exited(status),
            () = &mut shutdown => Running::Shutdown,
        };

        match running {
            Running::Exited(status) => {
                let status = status.map_err(LaunchError::Wait)?;
                if status.success() {
                    tracing::info!(%status, "process manager exited");
                    Ok(LaunchOutcome {
                        status,
                        terminated: false,
                    })
                } else {
                    Err(LaunchError::Crashed { status })
                }
            }
            Running::Shutdown => {
                tracing::info!("termination signal received, stopping");
                let status = terminate(&mut child, self.plan.stop_timeout).await?;
                tracing::info!(%status, "stopped");
                Ok(LaunchOutcome {
                    status,
                    terminated: true,
                })
            }
        }
    }
}

/// Fail if `addr` cannot be bound right now. The test socket is closed before returning.
pub fn check_port_available(addr: SocketAddr) -> Result<(), LaunchError> {
    match std::net::TcpListener::bind(addr) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            Err(LaunchError::BindConflict { addr })
        }
        Err(e) => Err(LaunchError::Bind { addr, source: e }),
    }
}

/// Classify a process manager that exited before its socket came up.
pub fn startup_failure(status: ExitStatus) -> LaunchError {
    match status.code() {
        Some(APP_LOAD_ERROR) => LaunchError::AppLoad { status },
        _ => LaunchError::StartupFailed { status },
    }
}

async fn wait_until_listening(child: &mut Child, addr: SocketAddr) -> Result<(), LaunchError> {
    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(LaunchError::Wait)?;
                return Err(startup_failure(status));
            }
            () = tokio::time::sleep(READY_POLL_INTERVAL) => {
                if tokio::net::TcpStream::connect(addr).await.is_ok() {
                    return Ok(());
                }
            }
        }
    }
}

/// Ask the child to stop, then kill it once `grace` has passed.
async fn terminate(child: &mut Child, grace: Duration) -> Result<ExitStatus, LaunchError> {
    send_sigterm(child)?;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map_err(LaunchError::Wait),
        Err(_) => {
            tracing::warn!(?grace, "process manager ignored SIGTERM, killing");
            child.kill().await.map_err(LaunchError::Wait)?;
            child.wait().await.map_err(LaunchError::Wait)
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) -> Result<(), LaunchError> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid).map_err(|_| LaunchError::Signal {
        source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
    })?;
    // SAFETY: `pid` belongs to a child we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(LaunchError::Signal {
            source: std::io::Error::last_os_error(),
        })
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) -> Result<(), LaunchError> {
    child
        .start_kill()
        .map_err(|e| LaunchError::Signal { source: e })
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("launcher already started")]
    AlreadyStarted,

    #[error("invalid launch configuration: {detail}")]
    InvalidPlan { detail: String },

    #[error("port {} is already in use ({addr})", addr.port())]
    BindConflict { addr: SocketAddr },

    #[error("cannot bind {addr}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Resolve(ToolchainError),

    #[error("failed to start {program}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("process manager could not load the application ({status})")]
    AppLoad { status: ExitStatus },

    #[error("process manager exited during startup ({status})")]
    StartupFailed { status: ExitStatus },

    #[error("{addr} did not accept connections within {timeout:?}")]
    ReadyTimeout { addr: SocketAddr, timeout: Duration },

    #[error("process manager crashed ({status})")]
    Crashed { status: ExitStatus },

    #[error("failed to signal process manager")]
    Signal { source: std::io::Error },

    #[error("failed to wait for process manager")]
    Wait(#[source] std::io::Error),
}
