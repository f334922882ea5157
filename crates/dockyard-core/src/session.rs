//! Interactive sessions over an attached container

use crate::terminal::{RawModeGuard, SizeMonitor, TerminalSizing};
use crate::{CoreError, LifecycleManager, Result};
use dockyard_provider::{ContainerId, ContainerSpec, EngineHandle};
use std::io::{self, IsTerminal};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Exit code reported when the container's exit status cannot be obtained
pub const UNKNOWN_EXIT_CODE: i64 = 1;

type Output = Pin<Box<dyn AsyncRead + Send>>;
type Input = Pin<Box<dyn AsyncWrite + Send>>;

/// A running interactive container with its stdio attached.
///
/// The exit code is delivered once by a background watcher. Dropping the
/// session aborts every background task it owns.
pub struct Session {
    engine: EngineHandle,
    container_id: ContainerId,
    output: Option<Output>,
    input: Option<Input>,
    exit_rx: Option<oneshot::Receiver<i64>>,
    exit_code: Option<i64>,
    exit_task: Option<JoinHandle<()>>,
    resize_task: Option<JoinHandle<()>>,
    interrupt_task: Option<JoinHandle<()>>,
}

impl Session {
    /// Create, attach to and start a container, like `docker run -it`.
    ///
    /// The container TTY follows the local terminal when there is one.
    pub async fn attach(
        lifecycle: &LifecycleManager,
        spec: ContainerSpec,
        name: &str,
    ) -> Result<Self> {
        Self::attach_with_sizing(lifecycle, spec, name, TerminalSizing::local()).await
    }

    pub async fn attach_with_sizing(
        lifecycle: &LifecycleManager,
        spec: ContainerSpec,
        name: &str,
        sizing: Option<TerminalSizing>,
    ) -> Result<Self> {
        let mut spec = spec.interactive();

        // Without a resize signal the first frames would render at the
        // engine's default size, so hand the size over at creation
        if !cfg!(unix) {
            spec.console_size = sizing.as_ref().and_then(|s| (s.size)());
        }

        let engine = lifecycle.engine().clone();

        let id = lifecycle
            .create(&spec, name)
            .await
            .map_err(|e| CoreError::action(format!("could not create container {}", name), e))?;

        lifecycle
            .network()
            .connect(&id)
            .await
            .map_err(|e| CoreError::action("could not connect to network", e))?;

        let stream = engine
            .attach(&id)
            .await
            .map_err(|e| CoreError::action("could not attach to container", e))?;

        engine
            .start(&id)
            .await
            .map_err(|e| CoreError::action(format!("could not start container {}", name), e))?;
        debug!("Attached to {} ({})", name, id.short());

        let (exit_tx, exit_rx) = oneshot::channel();
        let exit_task = {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let code = match engine.wait(&id).await {
                    Ok(code) => code,
                    Err(e) => {
                        warn!("Could not wait for container {}: {}", id.short(), e);
                        UNKNOWN_EXIT_CODE
                    }
                };
                let _ = exit_tx.send(code);
            })
        };

        let resize_task = sizing
            .map(|sizing| tokio::spawn(SizeMonitor::new(engine.clone(), id.clone(), sizing).run()));

        Ok(Self {
            engine,
            container_id: id,
            output: Some(stream.output),
            input: Some(stream.input),
            exit_rx: Some(exit_rx),
            exit_code: None,
            exit_task: Some(exit_task),
            resize_task,
            interrupt_task: None,
        })
    }

    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    /// Wait for the container to stop and return its exit code
    pub async fn exit_code(&mut self) -> i64 {
        if let Some(code) = self.exit_code {
            return code;
        }

        let code = match self.exit_rx.take() {
            Some(rx) => rx.await.unwrap_or(UNKNOWN_EXIT_CODE),
            None => UNKNOWN_EXIT_CODE,
        };
        self.exit_code = Some(code);
        // Delivered, the watcher has nothing left to do
        self.exit_task = None;
        code
    }

    fn take_streams(&mut self) -> Result<(Output, Input)> {
        match (self.output.take(), self.input.take()) {
            (Some(output), Some(input)) => Ok((output, input)),
            _ => Err(CoreError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "session streams already consumed",
            ))),
        }
    }

    /// Copy `local_in` to the container and the container's output to
    /// `local_out` until the container closes its output.
    ///
    /// When `local_in` ends first the container's stdin is closed and the
    /// remaining output is drained. A failure reading `local_in` ends the
    /// session right away.
    pub async fn pipe<R, W>(&mut self, mut local_in: R, mut local_out: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (mut output, mut input) = self.take_streams()?;

        let mut output_task = tokio::spawn(async move {
            let copied = tokio::io::copy(&mut output, &mut local_out).await;
            let flushed = local_out.flush().await;
            copied.and(flushed)
        });

        let mut input_task = tokio::spawn(async move {
            match tokio::io::copy(&mut local_in, &mut input).await {
                Ok(_) => input.shutdown().await,
                Err(e) => Err(e),
            }
        });

        tokio::select! {
            out = &mut output_task => {
                input_task.abort();
                joined(out)
            }
            inp = &mut input_task => match joined(inp) {
                Ok(()) => {
                    debug!("Local input closed, draining output");
                    joined(output_task.await)
                }
                Err(e) => {
                    output_task.abort();
                    Err(e)
                }
            },
        }
    }

    /// Connect the process stdio to the container.
    ///
    /// The terminal is in raw mode for the duration when stdin is one.
    pub async fn attach_stdio(&mut self) -> Result<()> {
        let _raw = if io::stdin().is_terminal() {
            Some(RawModeGuard::new()?)
        } else {
            None
        };
        self.pipe(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Copy the container's output to `local_out` and return its exit code.
    ///
    /// Meant for one-shot commands that need no input.
    pub async fn run_to_completion<W>(&mut self, mut local_out: W) -> Result<i64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (mut output, _input) = self.take_streams()?;
        tokio::io::copy(&mut output, &mut local_out).await?;
        local_out.flush().await?;
        Ok(self.exit_code().await)
    }

    /// Remove the container when the process is interrupted
    pub fn remove_on_interrupt(&mut self) {
        if self.interrupt_task.is_some() {
            return;
        }

        let engine = self.engine.clone();
        let id = self.container_id.clone();
        self.interrupt_task = Some(tokio::spawn(async move {
            if let Err(e) = interrupted().await {
                warn!("Could not listen for interrupts: {}", e);
                return;
            }
            info!("Interrupted, removing container {}", id.short());
            if let Err(e) = engine.remove(&id).await {
                warn!("Could not remove container {}: {}", id.short(), e);
            }
        }));
    }

    /// Stop background work. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(task) = self.resize_task.take() {
            task.abort();
        }
        if let Some(task) = self.interrupt_task.take() {
            task.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
        if let Some(task) = self.exit_task.take() {
            task.abort();
        }
    }
}

fn joined(result: std::result::Result<io::Result<()>, JoinError>) -> Result<()> {
    match result {
        Ok(inner) => Ok(inner?),
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(CoreError::Io(io::Error::new(io::ErrorKind::Other, e))),
    }
}

#[cfg(unix)]
async fn interrupted() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn interrupted() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
