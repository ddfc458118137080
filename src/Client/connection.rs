use std::time::{Duration, Instant};

use log::{debug, info};

use crate::Core::error::{IpcError, Result};
use crate::Core::naming::ClientType;
use crate::SPSC::Message;
use crate::Scheduler::protocol::{Request, Response};
use crate::Transport::{Channel, Registry};

/// The client end of a registered channel.
///
/// Dropping the connection disconnects it.
pub struct ClientConnection {
    channel: Option<Box<dyn Channel>>,
    registry: Box<dyn Registry>,
    slot: usize,
    generation: u64,
    client_type: ClientType,
    unique_id: String,
    next_request: u64,
    inbox: Message,
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("client_type", &self.client_type)
            .field("unique_id", &self.unique_id)
            .field("next_request", &self.next_request)
            .finish_non_exhaustive()
    }
}

impl ClientConnection {
    pub(crate) fn new(
        registry: Box<dyn Registry>,
        channel: Box<dyn Channel>,
        slot: usize,
        generation: u64,
        client_type: ClientType,
        unique_id: String,
    ) -> Self {
        Self {
            channel: Some(channel),
            registry,
            slot,
            generation,
            client_type,
            unique_id,
            next_request: 1,
            inbox: Message::new(),
        }
    }

    fn channel(&self) -> Result<&dyn Channel> {
        self.channel.as_deref().ok_or(IpcError::Disconnected)
    }

    /// Ask for a decision on `kernel_type` with a generated request id.
    pub fn request(&mut self, kernel_type: &str, timeout: Duration) -> Result<Response> {
        let request_id = self.next_request.to_string();
        self.next_request += 1;
        self.request_with_id(kernel_type, &request_id, timeout)
    }

    /// Send one request frame and wait for the response carrying `request_id`.
    /// Responses to other ids (late answers to timed-out requests) are skipped.
    pub fn request_with_id(
        &mut self,
        kernel_type: &str,
        request_id: &str,
        timeout: Duration,
    ) -> Result<Response> {
        let frame = Request::new(kernel_type, request_id, self.client_type.as_str())
            .with_unique_id(&self.unique_id)
            .encode();
        let deadline = Instant::now() + timeout;
        self.send_raw(&frame, timeout)?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv_raw(remaining)? {
                Some(text) => {
                    let response = Response::parse(&text)?;
                    if response.request_id == request_id {
                        return Ok(response);
                    }
                    debug!("skipping stale response for {}", response.request_id);
                }
                None => {
                    return Err(IpcError::Timeout {
                        what: "scheduler response",
                        after: timeout,
                    })
                }
            }
        }
    }

    /// Push a frame as-is.
    pub fn send_raw(&self, frame: &str, timeout: Duration) -> Result<()> {
        if self
            .channel()?
            .request_queue()
            .send_blocking(frame.as_bytes(), Some(timeout))
        {
            Ok(())
        } else {
            Err(IpcError::Timeout {
                what: "request queue space",
                after: timeout,
            })
        }
    }

    /// Pop one response frame, or `None` if nothing arrived within `timeout`.
    pub fn recv_raw(&mut self, timeout: Duration) -> Result<Option<String>> {
        let channel = self.channel.as_deref().ok_or(IpcError::Disconnected)?;
        if channel
            .response_queue()
            .receive_blocking(&mut self.inbox, Some(timeout))
        {
            Ok(Some(String::from_utf8_lossy(self.inbox.as_bytes()).into_owned()))
        } else {
            Ok(None)
        }
    }

    /// Refresh this client's registry heartbeat. Fails with `SlotReclaimed`
    /// once the scheduler has reaped the registration.
    pub fn heartbeat(&self) -> Result<()> {
        self.channel()?;
        if self.registry.refresh_heartbeat(self.slot, self.generation) {
            Ok(())
        } else {
            Err(IpcError::SlotReclaimed { slot: self.slot })
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn channel_name(&self) -> Option<&str> {
        self.channel.as_deref().map(|c| c.name())
    }

    /// Whether the scheduler end is still serving the channel.
    pub fn is_connected(&self) -> bool {
        self.channel
            .as_deref()
            .map_or(false, |c| c.is_server_ready())
    }

    /// Clear `client_connected`, release the registry slot and drop the
    /// channel. Calling it again does nothing.
    pub fn disconnect(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.set_client_connected(false);
            self.registry.release_registration(self.slot, self.generation);
            info!("disconnected from {}", channel.name());
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
