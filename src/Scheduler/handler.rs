use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Acquire;
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use log::{debug, info, warn};

use super::observer::{SessionEnd, SessionInfo, SessionObserver, SessionSummary};
use super::policy::DecisionPolicy;
use super::protocol::{write_response, Request};
use crate::Core::config::{SchedulerConfig, MAX_MSG_SIZE};
use crate::Core::process::process_alive;
use crate::SPSC::Message;
use crate::Transport::Channel;

/// Lifecycle of one client handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Channel accepted, `server_ready` not yet set.
    Started,
    /// `server_ready` set.
    Ready,
    /// Inside the receive / decide / respond loop.
    Running,
    Stopped,
}

/// Receive loop of one client. Owns the scheduler end of the channel.
pub(crate) struct Handler {
    pub(crate) channel: Box<dyn Channel>,
    pub(crate) session: SessionInfo,
    pub(crate) policy: Arc<dyn DecisionPolicy>,
    pub(crate) observer: Arc<dyn SessionObserver>,
    pub(crate) config: SchedulerConfig,
    pub(crate) running: Arc<CachePadded<AtomicBool>>,
    pub(crate) state: HandlerState,
}

impl Handler {
    fn transition(&mut self, next: HandlerState) {
        debug!("{}: {:?} -> {:?}", self.session, self.state, next);
        self.state = next;
    }

    pub(crate) fn run(mut self) -> SessionSummary {
        self.channel.set_spin_policy(self.config.spin);
        self.channel.set_server_ready(true);
        self.transition(HandlerState::Ready);
        self.observer.session_started(&self.session);
        info!(
            "{} started ({}, unique id {:?})",
            self.session, self.session.client_type, self.session.unique_id
        );

        self.transition(HandlerState::Running);
        let mut summary = SessionSummary::default();
        let mut message = Message::new();
        let mut response = String::with_capacity(MAX_MSG_SIZE);
        let mut idle_polls: u32 = 0;

        summary.ended_by = loop {
            if !self.running.load(Acquire) {
                break SessionEnd::Shutdown;
            }
            if !self.channel.is_client_connected() {
                break SessionEnd::ClientDisconnected;
            }

            let received = self
                .channel
                .request_queue()
                .receive_blocking(&mut message, Some(self.config.recv_timeout));
            if !received {
                idle_polls = idle_polls.wrapping_add(1);
                let every = self.config.liveness_check_every;
                if every > 0 && idle_polls % every == 0 && !process_alive(self.channel.client_pid()) {
                    break SessionEnd::ClientExited;
                }
                continue;
            }

            idle_polls = 0;
            summary.received += 1;
            self.serve(&message, &mut response, &mut summary);
        };

        self.channel.set_server_ready(false);
        self.transition(HandlerState::Stopped);
        info!(
            "{} ended ({:?}): {} received, {} allowed, {} denied, {} malformed, {} send timeouts",
            self.session,
            summary.ended_by,
            summary.received,
            summary.allowed,
            summary.denied,
            summary.malformed,
            summary.send_timeouts
        );
        self.observer.session_ended(&self.session, &summary);
        summary
    }

    /// Decide one frame and push the answer. Malformed frames are dropped.
    fn serve(&self, message: &Message, response: &mut String, summary: &mut SessionSummary) {
        let request = match message.as_str().map(Request::parse) {
            Some(Ok(request)) => request,
            Some(Err(e)) => {
                summary.malformed += 1;
                debug!("{}: dropping frame: {}", self.session, e);
                return;
            }
            None => {
                summary.malformed += 1;
                debug!("{}: dropping non-UTF-8 frame {:?}", self.session, message);
                return;
            }
        };

        let decision = self.policy.decide(request.kernel_type);
        if decision.allowed {
            summary.allowed += 1;
        } else {
            summary.denied += 1;
        }
        self.observer.kernel_received(&self.session, &request, &decision);

        response.clear();
        write_response(response, request.request_id, decision.allowed, &decision.reason);
        let sent = self
            .channel
            .response_queue()
            .send_blocking(response.as_bytes(), Some(self.config.send_timeout));
        if !sent {
            summary.send_timeouts += 1;
            warn!(
                "{}: response to {} not delivered within {:?}",
                self.session, request.request_id, self.config.send_timeout
            );
            self.observer.response_dropped(&self.session, request.request_id);
        }
    }
}
