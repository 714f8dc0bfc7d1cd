//! Scripted transports for dispatcher and outbox tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::TransportError;
use crate::transport::{Envelope, Transport};

/// Fixed test timestamp, `minute` minutes past noon.
pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
}

#[derive(Debug, Clone)]
enum Behaviour {
    Succeed,
    Fail(String),
    FailFor(HashSet<String>, String),
    Panic,
    Hang,
}

/// Transport whose result is decided up front.
#[derive(Clone)]
pub struct ScriptedTransport {
    behaviour: Behaviour,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Envelope>>>,
}

impl ScriptedTransport {
    fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_behaviour(Behaviour::Succeed)
    }

    pub fn failing(message: &str) -> Self {
        Self::with_behaviour(Behaviour::Fail(message.to_string()))
    }

    /// Fail only for the given record ids.
    pub fn failing_for(ids: &[&str], message: &str) -> Self {
        let ids = ids.iter().map(|id| id.to_string()).collect();
        Self::with_behaviour(Behaviour::FailFor(ids, message.to_string()))
    }

    pub fn panicking() -> Self {
        Self::with_behaviour(Behaviour::Panic)
    }

    pub fn hanging() -> Self {
        Self::with_behaviour(Behaviour::Hang)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<Envelope>>> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(envelope.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reject = |message: &str| TransportError::Rejected {
            status: 550,
            body: message.to_string(),
        };

        match &self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail(message) => Err(reject(message)),
            Behaviour::FailFor(ids, message) if ids.contains(&envelope.id) => Err(reject(message)),
            Behaviour::FailFor(..) => Ok(()),
            Behaviour::Panic => panic!("transport crashed"),
            Behaviour::Hang => std::future::pending().await,
        }
    }
}
