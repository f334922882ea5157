//! Polling an operation until it succeeds or a deadline passes

use crate::{CoreError, Result};
use dockyard_config::ReadinessConfig;
use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How long a wait may take before the user is told what is going on
pub const ANNOUNCE_AFTER: Duration = Duration::from_secs(5);

/// Bounds for a readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Budget for a single probe call
    pub attempt_timeout: Duration,
    /// Pause between failed attempts
    pub poll_interval: Duration,
    /// Budget for the whole wait
    pub deadline: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            deadline: Duration::from_secs(5 * 60),
        }
    }
}

impl From<&ReadinessConfig> for ReadinessPolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            attempt_timeout: config.attempt_timeout(),
            poll_interval: config.poll_interval(),
            deadline: config.deadline(),
        }
    }
}

/// Outcome of a failed probe
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Try again after the poll interval
    #[error("not ready: {0}")]
    NotReady(String),

    /// Stop waiting, this will not get better
    #[error("{0}")]
    Fatal(String),
}

/// Call `probe` until it succeeds, fails fatally or the deadline passes.
///
/// Each call gets `attempt_timeout`; a call that overruns counts as not
/// ready. When the deadline passes the in-flight call is dropped.
pub async fn wait_until_ready<F, Fut>(policy: &ReadinessPolicy, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<(), ProbeError>>,
{
    let attempts = async {
        loop {
            match tokio::time::timeout(policy.attempt_timeout, probe()).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(ProbeError::Fatal(reason))) => return Err(CoreError::ProbeFailed(reason)),
                Ok(Err(ProbeError::NotReady(reason))) => debug!("Not ready yet: {}", reason),
                Err(_) => debug!("Probe timed out after {:?}", policy.attempt_timeout),
            }
            tokio::time::sleep(policy.poll_interval).await;
        }
    };

    match tokio::time::timeout(policy.deadline, attempts).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::DeadlineExceeded(policy.deadline)),
    }
}

/// Logs `message` once if still alive after a delay.
///
/// Dropping it before then keeps quiet.
pub struct Announce {
    handle: JoinHandle<()>,
}

impl Announce {
    pub fn after(delay: Duration, message: impl Into<String>) -> Self {
        let message = message.into();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("{}", message);
        });
        Self { handle }
    }
}

impl Drop for Announce {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Readiness of a TCP listener
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    /// `addr` is `host:port`
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn check(&self) -> std::result::Result<(), ProbeError> {
        match TcpStream::connect(&self.addr).await {
            Ok(_) => Ok(()),
            Err(e) => Err(classify_connect_error(&self.addr, &e)),
        }
    }
}

fn classify_connect_error(addr: &str, err: &io::Error) -> ProbeError {
    match err.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput => {
            ProbeError::Fatal(format!("cannot connect to {}: {}", addr, err))
        }
        _ => ProbeError::NotReady(format!("{}: {}", addr, err)),
    }
}
