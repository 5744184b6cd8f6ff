// Channel-backed transport and recorders shared by the connector tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

use xrisk_stream::{
    ConnectionStatus, ConnectorConfig, Error, ReconnectPolicy, StreamConnector, Transport,
    TransportEvent, WorkflowEvent,
};

// ── FakeTransport ───────────────────────────────────────────────────

/// Records every `open` and hands the test the sending half.
#[derive(Clone, Default)]
pub struct FakeTransport {
    opened: Arc<Mutex<Vec<FakeConnection>>>,
}

#[derive(Clone)]
pub struct FakeConnection {
    pub url: Url,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl FakeConnection {
    pub fn open(&self) {
        let _ = self.tx.send(TransportEvent::Open);
    }

    pub fn send(&self, raw: &str) {
        let _ = self.tx.send(TransportEvent::Message(raw.to_owned()));
    }

    pub fn fail(&self) {
        let _ = self.tx.send(TransportEvent::Failed(Error::UnexpectedStatus { status: 503 }));
    }

    pub fn end(&self) {
        let _ = self.tx.send(TransportEvent::Closed);
    }

    /// `true` once the connector has dropped this connection's stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl FakeTransport {
    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn connection(&self, index: usize) -> FakeConnection {
        self.opened.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> FakeConnection {
        self.opened.lock().unwrap().last().cloned().expect("no connection opened")
    }
}

impl Transport for FakeTransport {
    fn open(&self, url: &Url) -> BoxStream<'static, TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.opened.lock().unwrap().push(FakeConnection {
            url: url.clone(),
            tx,
        });
        UnboundedReceiverStream::new(rx).boxed()
    }
}

// ── Recorders ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            items: Arc::default(),
        }
    }
}

impl<T: Clone> Recorder<T> {
    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push(item);
    }

    pub fn all(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }
}

pub fn record_statuses(connector: &StreamConnector) -> Recorder<ConnectionStatus> {
    let recorder = Recorder::default();
    let sink = recorder.clone();
    let _ = connector.on_status_change(move |status| sink.push(*status));
    recorder
}

pub fn record_events(connector: &StreamConnector) -> Recorder<WorkflowEvent> {
    let recorder = Recorder::default();
    let sink = recorder.clone();
    let _ = connector.on_event(move |event| sink.push(event.clone()));
    recorder
}

// ── Setup ───────────────────────────────────────────────────────────

pub const BASE_URL: &str = "http://backend.test";

pub fn connector_with(policy: ReconnectPolicy) -> (StreamConnector, FakeTransport) {
    let transport = FakeTransport::default();
    let config = ConnectorConfig::new(BASE_URL.parse().unwrap()).with_policy(policy);
    let connector = StreamConnector::new(config, transport.clone()).unwrap();
    (connector, transport)
}

pub fn connector() -> (StreamConnector, FakeTransport) {
    connector_with(ReconnectPolicy::default())
}

/// Let every spawned task run until it blocks. Under a paused clock this
/// also advances time by one millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Advance the paused clock by `ms`, running everything that becomes ready.
pub async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}
