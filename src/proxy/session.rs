//! Proxy session and handoff controller
//!
//! ```text
//! Idle -> Running <-> TransferActive
//!            |
//!            +-> ShuttingDown -> Terminated
//! ```
//!
//! `Running -> ShuttingDown` happens on an accepted boot request (or
//! chain-load) or on terminal transport loss. The controller never jumps:
//! it hands the [`BootVector`] back to its caller.

use crate::config::ProxyConfig;
use crate::error::{NoHandoffRequested, TransportError};
use crate::handoff::Teardown;
use crate::platform::BootVector;
use crate::proxy::codec;
use crate::proxy::dispatch::ProxyContext;
use crate::proxy::framer::{Frame, FrameKind, Framer, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    /// At least one bulk transfer is open
    TransferActive,
    ShuttingDown,
    Terminated,
}

pub struct Session<'a> {
    state: SessionState,
    framer: Framer<'a>,
    ctx: ProxyContext<'a>,
    teardown: Teardown,
    send_attempts: u32,
}

impl<'a> Session<'a> {
    pub fn new(link: &'a mut dyn Transport, ctx: ProxyContext<'a>, config: &ProxyConfig) -> Self {
        Session {
            state: SessionState::Idle,
            framer: Framer::new(link, config.byte_timeout_us),
            ctx,
            teardown: Teardown::new(),
            send_attempts: config.send_attempts.max(1),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &ProxyContext<'a> {
        &self.ctx
    }

    /// Serve commands until handoff or terminal transport loss
    ///
    /// Consumes the session: one run per session.
    pub fn run(mut self) -> Result<BootVector, NoHandoffRequested> {
        loop {
            match self.poll() {
                Ok(Some(vector)) => return Ok(vector),
                Ok(None) => {}
                Err(cause) => return Err(NoHandoffRequested { cause }),
            }
        }
    }

    /// Serve at most one frame
    ///
    /// `Ok(Some(_))` once a boot request has been accepted and teardown ran.
    /// `Err` for terminal transport loss or a reply that could not be sent,
    /// after teardown. A boot accepted by an unsent reply is dropped.
    pub fn poll(&mut self) -> Result<Option<BootVector>, TransportError> {
        match self.state {
            SessionState::Idle => {
                log::info!("proxy: session started");
                self.state = SessionState::Running;
            }
            SessionState::ShuttingDown | SessionState::Terminated => {
                return Err(TransportError::Disconnected)
            }
            SessionState::Running | SessionState::TransferActive => {}
        }

        let frame = match self.framer.receive() {
            Ok(frame) => frame,
            Err(cause) => {
                log::error!("proxy: {}", cause);
                self.shut_down(false);
                return Err(cause);
            }
        };
        if frame.kind != FrameKind::Request {
            log::debug!("proxy: ignoring {:?} frame", frame.kind);
            return Ok(None);
        }

        let reply = match codec::decode(&frame) {
            Ok(cmd) => self.ctx.handle(&cmd, self.framer.stats()),
            Err(e) => {
                log::warn!("proxy: rejected {}", e);
                self.ctx.note_rejected();
                e.into()
            }
        };

        if let Err(e) = self.send_reply(&codec::encode(&reply)) {
            log::error!("proxy: reply seq {} lost: {}", reply.seq, e);
            self.shut_down(false);
            return Err(e);
        }

        if let Some(vector) = self.ctx.take_boot() {
            self.shut_down(vector.restore_logo());
            return Ok(Some(vector));
        }

        self.state = if self.ctx.open_transfers() > 0 {
            SessionState::TransferActive
        } else {
            SessionState::Running
        };
        Ok(None)
    }

    /// Retry recoverable send errors up to `send_attempts` times
    fn send_reply(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let mut attempt = 1;
        loop {
            match self.framer.send(frame.kind, &frame.payload) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() && attempt < self.send_attempts => {
                    log::warn!("proxy: reply send failed ({}), retrying", e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn shut_down(&mut self, restore_logo: bool) {
        self.state = SessionState::ShuttingDown;
        let stats = self.framer.stats();
        log::info!(
            "proxy: shutting down ({} frames in, {} out, {} commands)",
            stats.frames_rx,
            stats.frames_tx,
            self.ctx.stats().served
        );
        self.teardown
            .run(self.ctx.platform(), self.framer.link(), restore_logo);
        self.state = SessionState::Terminated;
    }
}
