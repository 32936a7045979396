//! The pipeline lifecycle manager.
//!
//! One task, one `tokio::select!` over three sources: the authentication
//! signal, transport events, and the flush timer. Every handler runs to
//! completion before the loop yields, so buffer writes and drains never
//! interleave.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{EntityKind, StreamMessage};
use crate::network::connection::{ConnectionSupervisor, TransportEvent};
use crate::sink::StateSink;

use super::buffer::CoalescingBuffer;
use super::router::{default_route, EventRouter, Registration};
use super::scheduler::FlushScheduler;

/// Pipeline lifecycle states. `Starting` and `Stopping` are transient:
/// both transitions complete within one synchronous turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Owns the full update pipeline: supervisor, router, buffer, scheduler
/// and the application's state sink.
pub struct UpdatePipeline {
    config: PipelineConfig,
    state: PipelineState,
    supervisor: ConnectionSupervisor,
    events: mpsc::Receiver<TransportEvent>,
    router: EventRouter,
    registrations: Vec<Registration>,
    buffer: CoalescingBuffer,
    scheduler: FlushScheduler,
    sink: Box<dyn StateSink>,
    /// Credential the live session was started with.
    active_credential: Option<String>,
}

impl UpdatePipeline {
    pub fn new(
        endpoint: &str,
        config: PipelineConfig,
        sink: Box<dyn StateSink>,
    ) -> Result<Self, PipelineError> {
        let (event_tx, events) = mpsc::channel(config.event_channel_capacity);
        let supervisor = ConnectionSupervisor::new(endpoint, &config, event_tx)?;

        Ok(Self {
            config,
            state: PipelineState::Idle,
            supervisor,
            events,
            router: EventRouter::new(),
            registrations: Vec::new(),
            buffer: CoalescingBuffer::new(),
            scheduler: FlushScheduler::new(),
            sink,
            active_credential: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Drive the pipeline from the authentication signal: `Some(token)`
    /// starts a session, `None` stops it. Returns after performing a final
    /// teardown when the signal's sender is dropped.
    pub async fn run(&mut self, mut auth: watch::Receiver<Option<String>>) {
        self.apply_auth(auth.borrow_and_update().clone());

        loop {
            tokio::select! {
                changed = auth.changed() => {
                    if changed.is_err() {
                        info!("Auth signal closed, shutting down pipeline");
                        self.stop_session();
                        return;
                    }
                    self.apply_auth(auth.borrow_and_update().clone());
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_transport_event(event),
                        // the supervisor holds the sender for the pipeline's
                        // lifetime, so this only happens if it is gone too
                        None => return,
                    }
                }
                _ = self.scheduler.tick() => {
                    self.flush_once();
                }
            }
        }
    }

    fn apply_auth(&mut self, credential: Option<String>) {
        match credential {
            Some(token) => {
                // the watch channel coalesces rapid changes: an off/on toggle
                // can arrive as a single change carrying only the new token.
                // A changed credential therefore implies an unobserved
                // teardown, which must still happen before the new session
                // starts. A lost off/on with the same token keeps the
                // session, which is equivalent by construction.
                if self.state == PipelineState::Running
                    && self.active_credential.as_deref() != Some(token.as_str())
                {
                    info!("Credential changed, restarting session");
                    self.stop_session();
                }
                self.start_session(&token);
            }
            None => self.stop_session(),
        }
    }

    /// Idle -> Starting -> Running. No-op in any other state.
    fn start_session(&mut self, credential: &str) {
        if self.state != PipelineState::Idle {
            debug!("Pipeline is {:?}, start ignored", self.state);
            return;
        }
        self.state = PipelineState::Starting;
        info!("Starting update pipeline");

        self.supervisor.start(credential);
        for kind in EntityKind::ALL {
            let registration = self.router.register(kind, default_route(kind));
            self.registrations.push(registration);
        }
        self.scheduler.start_periodic(self.config.flush_period);
        self.active_credential = Some(credential.to_string());

        // routes are registered synchronously; the transport connects in the
        // background and the buffer simply stays empty until frames arrive
        self.state = PipelineState::Running;
    }

    /// Running -> Stopping -> Idle, draining pending state on the way out.
    /// No-op when already Stopping or Idle.
    fn stop_session(&mut self) {
        if matches!(self.state, PipelineState::Idle | PipelineState::Stopping) {
            debug!("Pipeline is {:?}, stop ignored", self.state);
            return;
        }
        self.state = PipelineState::Stopping;
        info!("Stopping update pipeline");

        // timer first, so a pending tick cannot race the teardown flush
        self.scheduler.stop_periodic();
        self.flush_once();

        for registration in self.registrations.drain(..) {
            self.router.unregister(registration);
        }
        self.supervisor.stop();
        self.buffer.clear();
        self.active_credential = None;
        self.state = PipelineState::Idle;
    }

    fn flush_once(&mut self) {
        FlushScheduler::flush_once(&mut self.buffer, self.sink.as_mut());
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => info!("Update stream connected"),
            TransportEvent::Disconnected => {
                warn!("Update stream disconnected, transport will reconnect");
            }
            TransportEvent::ConnectError(reason) => {
                debug!("Connect attempt failed: {}", reason);
            }
            TransportEvent::Message(raw) => self.handle_message(&raw),
        }
    }

    /// Parse one inbound frame and route its payload(s) into the buffer.
    /// Malformed frames and unknown channels are dropped, never errors.
    fn handle_message(&mut self, raw: &str) {
        let message = match StreamMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping malformed frame: {}", e);
                return;
            }
        };
        let Some(kind) = message.kind() else {
            trace!("Ignoring frame on unknown channel {:?}", message.channel);
            return;
        };

        // updates may arrive singly or batched in an array
        match message.data {
            serde_json::Value::Array(items) => {
                for item in items {
                    self.router.dispatch(kind, item, &mut self.buffer);
                }
            }
            data => self.router.dispatch(kind, data, &mut self.buffer),
        }
    }
}
