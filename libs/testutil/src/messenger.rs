use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tsync_core::{
    AdapterError, EmitResponse, Emitter, EventRegistration, InboundEvent, Indicators, Listener,
    MetadataFormat, NoteFetcher, ReceiptContext, TransmitContext,
};

/// Scriptable in-memory chat service covering the listener, emitter and
/// note-fetcher capabilities at once.
///
/// Sent payloads are recorded and their bodies appended to the destination
/// thread's note history, so connection markers written through the emitter
/// become discoverable through the note fetcher, the way they would be on a
/// real service.
pub struct FakeMessenger {
    service: String,
    indicators: Indicators,
    registrations: Mutex<Vec<EventRegistration>>,
    notes: Mutex<HashMap<String, Vec<String>>>,
    sent: Mutex<Vec<Value>>,
    send_delays: Mutex<VecDeque<Duration>>,
    send_failures: Mutex<VecDeque<String>>,
    fetch_failures: Mutex<VecDeque<String>>,
    counter: AtomicUsize,
}

impl FakeMessenger {
    pub fn new(service: impl Into<String>, indicators: Indicators) -> Self {
        Self {
            service: service.into(),
            indicators,
            registrations: Mutex::new(Vec::new()),
            notes: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            send_delays: Mutex::new(VecDeque::new()),
            send_failures: Mutex::new(VecDeque::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            counter: AtomicUsize::new(1),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Raw payloads handed to `send_payload`, in send order.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn registration_names(&self) -> Vec<String> {
        self.registrations
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn registered_events(&self) -> Vec<String> {
        self.registrations
            .lock()
            .unwrap()
            .iter()
            .flat_map(|r| r.events.clone())
            .collect()
    }

    /// Seeds a pre-existing note body in a thread's history.
    pub fn push_note(&self, thread: &str, body: &str) {
        self.notes
            .lock()
            .unwrap()
            .entry(thread.to_string())
            .or_default()
            .push(body.to_string());
    }

    pub fn notes_in(&self, thread: &str) -> Vec<String> {
        self.notes
            .lock()
            .unwrap()
            .get(thread)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes the next `send_payload` call fail with an API error.
    pub fn fail_next_send(&self, reason: &str) {
        self.send_failures
            .lock()
            .unwrap()
            .push_back(reason.to_string());
    }

    /// Makes the next `fetch_notes` call fail with an API error.
    pub fn fail_next_fetch(&self, reason: &str) {
        self.fetch_failures
            .lock()
            .unwrap()
            .push_back(reason.to_string());
    }

    /// Delays the next `send_payload` call, for ordering tests.
    pub fn push_send_delay(&self, delay: Duration) {
        self.send_delays.lock().unwrap().push_back(delay);
    }

    /// Replays a vendor webhook into every registration listening for
    /// `event_type`.
    pub async fn emit_inbound(&self, context: &str, event_type: &str, raw: Value) {
        let handlers: Vec<_> = self
            .registrations
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.events.iter().any(|e| e == event_type))
            .map(|r| r.handler.clone())
            .collect();
        for handler in handlers {
            handler(InboundEvent {
                context: context.to_string(),
                event_type: event_type.to_string(),
                raw: raw.clone(),
            })
            .await;
        }
    }

    fn next_id(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Listener for FakeMessenger {
    fn service_name(&self) -> &str {
        &self.service
    }

    fn translate_event_name(&self, generic: &str) -> String {
        format!("{}-{}", self.service, generic)
    }

    fn register_event(&self, registration: EventRegistration) {
        self.registrations.lock().unwrap().push(registration);
    }

    async fn make_generic(&self, raw: &Value) -> Result<ReceiptContext, AdapterError> {
        let mut receipt: ReceiptContext =
            serde_json::from_value(raw.clone()).map_err(|err| AdapterError::InvalidPayload {
                service: self.service.clone(),
                reason: err.to_string(),
            })?;
        let meta = self.indicators.extract(&receipt.text);
        receipt.text = meta.content;
        if meta.genesis.is_some() {
            receipt.genesis = meta.genesis;
            receipt.hidden = meta.hidden;
        }
        Ok(receipt)
    }
}

#[async_trait]
impl Emitter for FakeMessenger {
    fn service_name(&self) -> &str {
        &self.service
    }

    async fn make_specific(&self, event: &TransmitContext) -> Result<Value, AdapterError> {
        if event.to_ids.thread.is_none() && event.title.is_none() {
            return Err(AdapterError::InvalidPayload {
                service: self.service.clone(),
                reason: "cannot open a thread without a title".to_string(),
            });
        }
        let origin = event
            .genesis
            .clone()
            .unwrap_or_else(|| event.source.clone());
        let marker = self
            .indicators
            .stringify(event.hidden, &origin, MetadataFormat::Markdown);
        Ok(json!({
            "service": self.service,
            "flow": event.to_ids.flow,
            "user": event.to_ids.user,
            "token": event.to_ids.token,
            "thread": event.to_ids.thread,
            "title": event.title,
            "hidden": event.hidden,
            "body": format!("{}\n{}", event.text, marker),
        }))
    }

    async fn send_payload(&self, payload: &Value) -> Result<EmitResponse, AdapterError> {
        let delay = self.send_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.send_failures.lock().unwrap().pop_front();
        if let Some(reason) = failure {
            return Err(AdapterError::Api {
                service: self.service.clone(),
                source: anyhow!(reason),
            });
        }
        let n = self.next_id();
        let thread = payload
            .get("thread")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-t{n}", self.service));
        if let Some(body) = payload.get("body").and_then(Value::as_str) {
            self.push_note(&thread, body);
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(EmitResponse {
            message: format!("{}-m{n}", self.service),
            thread: thread.clone(),
            url: Some(format!("https://{}.test/{thread}", self.service)),
        })
    }
}

#[async_trait]
impl NoteFetcher for FakeMessenger {
    async fn fetch_notes(
        &self,
        thread: &str,
        _flow: &str,
        filter: &Regex,
    ) -> Result<Vec<String>, AdapterError> {
        let failure = self.fetch_failures.lock().unwrap().pop_front();
        if let Some(reason) = failure {
            return Err(AdapterError::Api {
                service: self.service.clone(),
                source: anyhow!(reason),
            });
        }
        Ok(self
            .notes
            .lock()
            .unwrap()
            .get(thread)
            .map(|bodies| {
                bodies
                    .iter()
                    .filter(|body| filter.is_match(body))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
