//! Connection - one transport, one event bus, one fatal sink
//!
//! Starting a connection spawns exactly two tasks: the event pump, which
//! republishes every transport event onto the bus, and the fatal drain.
//! Both stop when the connection shuts down.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cdp::protocol::{CDPEvent, Command, SessionId};
use crate::cdp::transport::{EventStream, Transport};
use crate::error::{BrowserError, Result};
use crate::events::{EventBus, Subscription};
use crate::fatal::{FatalHandler, FatalSink};
use crate::scope::Scope;

#[derive(Clone, Default)]
pub struct ConnectionOptions {
    /// Delay applied before each input command
    pub slow_motion: Duration,
    pub on_fatal: Option<FatalHandler>,
}

pub struct Connection {
    transport: Arc<dyn Transport>,
    events: Arc<EventBus<CDPEvent>>,
    slow_motion: Duration,
    shutdown: CancellationToken,
    /// Set once a deliberate close starts; the socket ending is expected after that
    closing: CancellationToken,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Wrap a transport and start the event and fatal pumps
    pub fn start(transport: Arc<dyn Transport>, options: ConnectionOptions) -> Result<Arc<Self>> {
        let stream = transport.events().ok_or_else(|| {
            BrowserError::Connection("transport event stream already taken".to_string())
        })?;

        let shutdown = CancellationToken::new();
        let closing = CancellationToken::new();
        let events = Arc::new(EventBus::new());
        let (fatal, fatal_task) = FatalSink::spawn(options.on_fatal, shutdown.clone());
        let event_task = tokio::spawn(pump_events(
            stream,
            events.clone(),
            fatal,
            shutdown.clone(),
            closing.clone(),
        ));

        tracing::debug!("Connection started");

        Ok(Arc::new(Self {
            transport,
            events,
            slow_motion: options.slow_motion,
            shutdown,
            closing,
            pumps: Mutex::new(vec![event_task, fatal_task]),
        }))
    }

    /// Send a command under `scope`.
    ///
    /// Input commands are delayed by the slow-motion setting before they
    /// are dispatched. The call also aborts with `Closed` if the connection
    /// shuts down while it is in flight.
    pub async fn call(
        &self,
        scope: &Scope,
        method: &str,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(BrowserError::Closed);
        }

        if !self.slow_motion.is_zero() && is_input_command(method) {
            tracing::trace!("Slow motion {:?} before {}", self.slow_motion, method);
            scope.sleep(self.slow_motion).await?;
        }

        tracing::debug!(method, session = ?session_id, "CDP call");
        let command = Command::new(method, params).with_session(session_id);

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(BrowserError::Closed),
            res = self.transport.call(scope, command) => res,
        }
    }

    /// Subscribe to every event published from now on
    pub fn subscribe(&self) -> Subscription<CDPEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus<CDPEvent> {
        &self.events
    }

    pub fn slow_motion(&self) -> Duration {
        self.slow_motion
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Not shut down and the transport is still delivering events
    pub fn is_alive(&self) -> bool {
        !self.is_closed() && !self.events.is_closed()
    }

    /// Best-effort `Browser.close`, then tear everything down
    pub async fn close(&self, scope: &Scope) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.closing.cancel();
        if let Err(e) = self.call(scope, "Browser.close", None, None).await {
            tracing::warn!("Browser.close failed: {}", e);
        }
        self.shutdown().await
    }

    /// Stop both pumps, close the bus and release the transport. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.events.close();

        let result = self.transport.close().await;

        let pumps: Vec<_> = self.pumps.lock().drain(..).collect();
        for pump in pumps {
            if let Err(e) = pump.await {
                tracing::warn!("Connection pump ended abnormally: {}", e);
            }
        }

        tracing::debug!("Connection shut down");
        result
    }

    /// Number of pump tasks still running
    pub fn running_pumps(&self) -> usize {
        self.pumps.lock().iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Never leave pumps behind a dropped connection
        self.shutdown.cancel();
        self.events.close();
    }
}

fn is_input_command(method: &str) -> bool {
    method.starts_with("Input.")
}

async fn pump_events(
    mut stream: EventStream,
    bus: Arc<EventBus<CDPEvent>>,
    fatal: FatalSink,
    shutdown: CancellationToken,
    closing: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = stream.recv() => match event {
                Some(event) => bus.publish(event),
                None => {
                    if !shutdown.is_cancelled() && !closing.is_cancelled() {
                        fatal.report(BrowserError::TransportClosed(
                            "event stream ended".to_string(),
                        ));
                    }
                    break;
                }
            },
        }
    }
    bus.close();
    tracing::debug!("Event pump stopped");
}
