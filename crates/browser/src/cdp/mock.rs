//! In-memory transport that behaves like a tiny browser.
//!
//! Knows just enough of the Target domain to back lifecycle tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::protocol::{CDPEvent, Command, TargetInfo};
use super::transport::{EventStream, Transport};
use crate::error::{BrowserError, Result};
use crate::scope::Scope;

#[derive(Default)]
struct MockState {
    targets: Vec<TargetInfo>,
    next_target: u32,
    calls: Vec<Command>,
    failing: HashSet<String>,
}

pub struct MockTransport {
    state: Mutex<MockState>,
    event_tx: Mutex<Option<mpsc::UnboundedSender<CDPEvent>>>,
    event_rx: Mutex<Option<EventStream>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
            event_tx: Mutex::new(Some(tx)),
            event_rx: Mutex::new(Some(rx)),
        })
    }

    /// Push an event as if the browser sent it
    pub fn emit(&self, event: CDPEvent) {
        if let Some(tx) = self.event_tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// End the event stream as if the socket died
    pub fn kill(&self) {
        self.event_tx.lock().take();
    }

    /// Make every call to `method` fail with a protocol error
    pub fn fail_method(&self, method: &str) {
        self.state.lock().failing.insert(method.to_string());
    }

    pub fn add_target(&self, target_id: &str, target_type: &str) {
        self.state.lock().targets.push(TargetInfo {
            target_id: target_id.to_string(),
            target_type: target_type.to_string(),
            title: String::new(),
            url: "about:blank".to_string(),
            attached: false,
        });
    }

    pub fn calls(&self) -> Vec<Command> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Command> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    fn respond(&self, command: &Command) -> Result<Value> {
        let params = command.params.clone().unwrap_or(Value::Null);
        let mut state = self.state.lock();

        if state.failing.contains(&command.method) {
            return Err(BrowserError::Protocol {
                code: -32000,
                message: format!("{} failed", command.method),
            });
        }

        match command.method.as_str() {
            "Test.echo" => Ok(if params.is_null() { json!({}) } else { params }),
            "Target.createTarget" => {
                state.next_target += 1;
                let info = TargetInfo {
                    target_id: format!("T{}", state.next_target),
                    target_type: "page".to_string(),
                    title: String::new(),
                    url: params["url"].as_str().unwrap_or("about:blank").to_string(),
                    attached: false,
                };
                state.targets.push(info.clone());
                drop(state);
                self.emit(CDPEvent::new(
                    "Target.targetCreated",
                    json!({ "targetInfo": info }),
                ));
                Ok(json!({ "targetId": info.target_id }))
            }
            "Target.getTargets" => Ok(json!({ "targetInfos": state.targets })),
            "Target.attachToTarget" | "Target.getTargetInfo" => {
                let target_id = params["targetId"].as_str().unwrap_or_default();
                let info = state
                    .targets
                    .iter()
                    .find(|t| t.target_id == target_id)
                    .cloned()
                    .ok_or_else(|| BrowserError::Protocol {
                        code: -32602,
                        message: "No target with given id found".to_string(),
                    })?;
                if command.method == "Target.attachToTarget" {
                    Ok(json!({ "sessionId": format!("S-{}", info.target_id) }))
                } else {
                    Ok(json!({ "targetInfo": info }))
                }
            }
            "Target.closeTarget" => {
                let target_id = params["targetId"].as_str().unwrap_or_default().to_string();
                state.targets.retain(|t| t.target_id != target_id);
                drop(state);
                self.emit(CDPEvent::new(
                    "Target.targetDestroyed",
                    json!({ "targetId": target_id }),
                ));
                Ok(json!({ "success": true }))
            }
            "Browser.close" => {
                drop(state);
                self.kill();
                Ok(json!({}))
            }
            _ => Ok(json!({})),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, scope: &Scope, command: Command) -> Result<Value> {
        scope
            .run(async {
                self.state.lock().calls.push(command.clone());
                if command.method == "Test.hang" {
                    return std::future::pending().await;
                }
                tokio::task::yield_now().await;
                self.respond(&command)
            })
            .await
    }

    fn events(&self) -> Option<EventStream> {
        self.event_rx.lock().take()
    }

    async fn close(&self) -> Result<()> {
        self.kill();
        Ok(())
    }
}
