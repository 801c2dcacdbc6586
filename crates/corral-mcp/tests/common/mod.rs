//! Shared stubs for MCP-server service tests.

#![allow(dead_code)]

use async_trait::async_trait;
use corral_core::{
    AuthRequiredError, Error, EventReason, EventSeverity, EventSink, ObjectRef, Result,
};
use corral_mcp::{McpClient, McpClientFactory, McpServerDefinition};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Remote (streamable-http) definition used across the suite.
pub fn remote_definition(name: &str) -> McpServerDefinition {
    serde_json::from_value(json!({
        "name": name,
        "type": "streamable-http",
        "url": format!("https://{name}.example/mcp")
    }))
    .expect("valid definition")
}

/// Local stdio definition.
pub fn stdio_definition(name: &str) -> McpServerDefinition {
    serde_json::from_value(json!({
        "name": name,
        "type": "stdio",
        "command": "mcp-server",
        "args": ["--stdio"]
    }))
    .expect("valid definition")
}

/// Scripted outcome for a single connection attempt.
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// Hand back a working client
    Ok,
    /// Fail with a transient-looking message
    Transient(&'static str),
    /// Fail with an OS-level network error in the chain
    Io(std::io::ErrorKind, &'static str),
    /// Fail with a structured auth-required error
    AuthRequired {
        url: &'static str,
        issuer: &'static str,
        scope: &'static str,
    },
    /// Fail with a certificate/TLS message
    Configuration(&'static str),
    /// Fail with something unclassifiable
    Other(&'static str),
}

/// Client whose ping behavior tests can flip at runtime.
pub struct StubClient {
    ping_ok: AtomicBool,
    closed: AtomicBool,
}

impl StubClient {
    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpClient for StubClient {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::other("connection closed"))
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that replays a script of connection outcomes. Once the script
/// is exhausted, further attempts succeed.
pub struct ScriptedFactory {
    script: Mutex<VecDeque<ConnectScript>>,
    connects: AtomicUsize,
    last_client: Mutex<Option<Arc<StubClient>>>,
}

impl ScriptedFactory {
    pub fn new(script: impl IntoIterator<Item = ConnectScript>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            connects: AtomicUsize::new(0),
            last_client: Mutex::new(None),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_client(&self) -> Option<Arc<StubClient>> {
        self.last_client.lock().unwrap().clone()
    }
}

#[async_trait]
impl McpClientFactory for ScriptedFactory {
    async fn connect(&self, _definition: &McpServerDefinition) -> Result<Arc<dyn McpClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or(ConnectScript::Ok) {
            ConnectScript::Ok => {
                let client = Arc::new(StubClient {
                    ping_ok: AtomicBool::new(true),
                    closed: AtomicBool::new(false),
                });
                *self.last_client.lock().unwrap() = Some(Arc::clone(&client));
                Ok(client)
            }
            ConnectScript::Transient(message) => Err(Error::other(message)),
            ConnectScript::Io(kind, message) => {
                Err(Error::from(std::io::Error::new(kind, message)))
            }
            ConnectScript::AuthRequired { url, issuer, scope } => {
                Err(AuthRequiredError::new(url, issuer, scope).into())
            }
            ConnectScript::Configuration(message) => Err(Error::other(message)),
            ConnectScript::Other(message) => Err(Error::other(message)),
        }
    }
}

/// One recorded sink event.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub object: ObjectRef,
    pub reason: EventReason,
    pub message: String,
    pub severity: EventSeverity,
}

/// Event sink that records everything for assertions.
pub struct RecordingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self, reason: EventReason) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.reason == reason)
            .count()
    }

    /// Poll until at least `count` events with this reason were recorded;
    /// some emissions land from detached tasks.
    pub async fn wait_for(&self, reason: EventReason, count: usize) {
        for _ in 0..200 {
            if self.count(reason) >= count {
                return;
            }
            smol::Timer::after(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for {count} {reason} events (saw {})",
            self.count(reason)
        );
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn create_event(
        &self,
        object: &ObjectRef,
        reason: EventReason,
        message: &str,
        severity: EventSeverity,
    ) -> Result<()> {
        self.events.lock().unwrap().push(RecordedEvent {
            object: object.clone(),
            reason,
            message: message.to_string(),
            severity,
        });
        Ok(())
    }
}
