//! Local terminal handling for interactive sessions

use async_trait::async_trait;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use dockyard_provider::{ContainerId, EngineHandle, TtySize};
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Poll period on platforms without a window-change signal
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

const INITIAL_RESIZE_ATTEMPTS: usize = 5;
const INITIAL_RESIZE_BACKOFF: Duration = Duration::from_millis(10);

/// Reads the current size of the terminal
pub type SizeFn = Arc<dyn Fn() -> Option<TtySize> + Send + Sync>;

/// Size of the terminal attached to stdout, `None` when there is none
pub fn current_size() -> Option<TtySize> {
    if !std::io::stdout().is_terminal() {
        return None;
    }
    crossterm::terminal::size()
        .ok()
        .map(|(cols, rows)| TtySize::new(rows, cols))
}

/// Puts the terminal in raw mode until dropped
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn new() -> std::io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Source of terminal size change notifications
#[async_trait]
pub trait SizeNotifier: Send {
    /// Resolves on the next size change, `None` once no more will come
    async fn changed(&mut self) -> Option<()>;
}

/// Notifies on SIGWINCH
#[cfg(unix)]
pub struct SignalNotifier {
    signal: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalNotifier {
    pub fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            signal: signal(SignalKind::window_change())?,
        })
    }
}

#[cfg(unix)]
#[async_trait]
impl SizeNotifier for SignalNotifier {
    async fn changed(&mut self) -> Option<()> {
        self.signal.recv().await
    }
}

/// Notifies when a periodically sampled size differs from the last sample
pub struct PollingNotifier {
    interval: Duration,
    size: SizeFn,
    last: Option<TtySize>,
}

impl PollingNotifier {
    pub fn new(interval: Duration, size: SizeFn) -> Self {
        let last = size();
        Self {
            interval,
            size,
            last,
        }
    }
}

#[async_trait]
impl SizeNotifier for PollingNotifier {
    async fn changed(&mut self) -> Option<()> {
        loop {
            tokio::time::sleep(self.interval).await;
            let now = (self.size)();
            if now != self.last {
                self.last = now;
                return Some(());
            }
        }
    }
}

/// The best notifier this platform offers for the local terminal
pub fn default_notifier() -> Box<dyn SizeNotifier> {
    #[cfg(unix)]
    {
        match SignalNotifier::new() {
            Ok(notifier) => return Box::new(notifier),
            Err(e) => debug!("Falling back to polling for terminal size: {}", e),
        }
    }
    Box::new(PollingNotifier::new(POLL_INTERVAL, Arc::new(current_size)))
}

/// Where a session learns about the local terminal size
pub struct TerminalSizing {
    pub notifier: Box<dyn SizeNotifier>,
    pub size: SizeFn,
}

impl TerminalSizing {
    /// Sizing for the process terminal, `None` when stdout is not a terminal
    pub fn local() -> Option<Self> {
        current_size()?;
        Some(Self {
            notifier: default_notifier(),
            size: Arc::new(current_size),
        })
    }
}

/// Keeps a container TTY the same size as the local terminal
pub struct SizeMonitor {
    engine: EngineHandle,
    id: ContainerId,
    sizing: TerminalSizing,
}

impl SizeMonitor {
    pub fn new(engine: EngineHandle, id: ContainerId, sizing: TerminalSizing) -> Self {
        Self { engine, id, sizing }
    }

    /// Apply the current size, then follow changes until the notifier ends
    pub async fn run(mut self) {
        self.apply_initial().await;

        while self.sizing.notifier.changed().await.is_some() {
            if let Some(size) = (self.sizing.size)() {
                if let Err(e) = self.engine.resize(&self.id, size).await {
                    debug!("Could not resize {}: {}", self.id.short(), e);
                }
            }
        }
    }

    // The container may still be starting, so the first resize gets retried
    async fn apply_initial(&mut self) {
        for attempt in 0..=INITIAL_RESIZE_ATTEMPTS {
            let Some(size) = (self.sizing.size)() else {
                return;
            };
            match self.engine.resize(&self.id, size).await {
                Ok(()) => return,
                Err(e) => {
                    debug!("Initial resize attempt {} failed: {}", attempt + 1, e);
                    tokio::time::sleep(INITIAL_RESIZE_BACKOFF).await;
                }
            }
        }
    }
}
