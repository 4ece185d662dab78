use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::command::RemoteCommand;
use crate::error::{Result, XlangAdapterError};

/// Asynchronous request/response link to the remote engine.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Establish the engine session.
    async fn connect(&self) -> Result<()>;

    /// Send one opaque request and wait for its opaque response.
    async fn send(&self, request: String) -> Result<String>;
}

/// Result of an operation that needs the gateway to itself.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum CallOutcome<T> {
    Completed(T),
    /// Another remote call was outstanding; nothing was done.
    Busy,
}

impl<T> CallOutcome<T> {
    pub fn is_busy(&self) -> bool {
        matches!(self, CallOutcome::Busy)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            CallOutcome::Completed(value) => Some(value),
            CallOutcome::Busy => None,
        }
    }
}

/// Serializes commands over a single-slot channel to the remote engine.
pub struct Gateway<C> {
    channel: C,
    busy: AtomicBool,
    connected: AtomicBool,
    timeout: Option<Duration>,
}

/// Clears the busy flag however the call ends, including when the caller's
/// future is dropped mid-call.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<C: RemoteChannel> Gateway<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            busy: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connect once; later calls reuse the session. A failed attempt leaves
    /// the session unset so the next call tries again.
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        debug!("Connecting to remote engine");
        self.channel.connect().await?;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    /// Issue `command` and decode its reply.
    ///
    /// Fails with [`XlangAdapterError::Busy`] without touching the channel if
    /// another call is outstanding. A failed or timed out exchange drops the
    /// session, so the following call reconnects. A reply that arrives but
    /// does not decode keeps it.
    pub async fn call<R: RemoteCommand>(&self, command: &R) -> Result<R::Reply> {
        self.ensure_connected().await?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(command = R::NAME, "Rejected remote call, gateway busy");
            return Err(XlangAdapterError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        let request = command.encode();
        debug!(command = R::NAME, request = %request, "Issuing remote call");

        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.channel.send(request))
                .await
                .unwrap_or(Err(XlangAdapterError::RemoteTimeout(limit.as_millis() as u64))),
            None => self.channel.send(request).await,
        }
        .inspect_err(|e| {
            error!(command = R::NAME, error = %e, "Remote call failed");
            // The exchange may be half done; the next call starts a fresh session.
            self.connected.store(false, Ordering::Release);
        })?;

        debug!(command = R::NAME, response = %response, "Remote call completed");
        R::decode(&response)
    }
}
