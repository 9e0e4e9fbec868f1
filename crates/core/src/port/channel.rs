// Duplex Channel Port
// Named bidirectional message channel opened by a UI surface against the
// engine; may disconnect at any time without warning.

use crate::domain::JobEvent;
use async_trait::async_trait;
use thiserror::Error;

/// Channel delivery errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel disconnected: {0}")]
    Disconnected(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// One named observer channel the bus can deliver events to
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Stable channel name; a reconnecting observer reuses its name
    fn name(&self) -> &str;

    /// Deliver one event; best-effort, the bus retries on failure
    async fn send(&self, event: &JobEvent) -> Result<(), ChannelError>;

    /// Transport-level liveness probe used by the heartbeat sweep
    async fn ping(&self) -> Result<(), ChannelError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Records every delivered event; can fail the next N sends or all pings
    pub struct RecordingChannel {
        name: String,
        sent: Mutex<Vec<JobEvent>>,
        fail_next_sends: AtomicU32,
        fail_pings: AtomicBool,
    }

    impl RecordingChannel {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                sent: Mutex::new(Vec::new()),
                fail_next_sends: AtomicU32::new(0),
                fail_pings: AtomicBool::new(false),
            }
        }

        pub fn fail_next_sends(&self, count: u32) {
            self.fail_next_sends.store(count, Ordering::SeqCst);
        }

        pub fn fail_pings(&self, fail: bool) {
            self.fail_pings.store(fail, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<JobEvent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_kinds(&self) -> Vec<&'static str> {
            self.sent.lock().unwrap().iter().map(|e| e.kind()).collect()
        }
    }

    #[async_trait]
    impl EventChannel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, event: &JobEvent) -> Result<(), ChannelError> {
            let remaining = self.fail_next_sends.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next_sends.store(remaining - 1, Ordering::SeqCst);
                return Err(ChannelError::SendFailed("send failure injected".to_string()));
            }
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn ping(&self) -> Result<(), ChannelError> {
            if self.fail_pings.load(Ordering::SeqCst) {
                return Err(ChannelError::Disconnected(self.name.clone()));
            }
            Ok(())
        }
    }
}
