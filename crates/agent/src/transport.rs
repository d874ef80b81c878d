//! Outbound side of the telephony boundary.
//!
//! The runtime never touches audio. It issues speak, transfer, and stop
//! commands; the adapter on the far side turns them into media.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use frontdesk_core::SessionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TransportCommand {
    Speak { text: String },
    StopAudio,
    Transfer { destination: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("call leg for session {0} is gone")]
    Disconnected(SessionId),
    #[error("transport failure: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn speak(&self, session_id: &SessionId, text: &str) -> Result<(), TransportError>;

    /// Resolves once playback has actually stopped.
    async fn stop_audio(&self, session_id: &SessionId) -> Result<(), TransportError>;

    async fn transfer(&self, session_id: &SessionId, destination: &str)
        -> Result<(), TransportError>;
}

/// Queues commands per session until the telephony adapter drains them.
/// Stopping audio drops any speech still queued for that session.
#[derive(Default)]
pub struct BufferedTransport {
    queues: Mutex<HashMap<SessionId, Vec<TransportCommand>>>,
    history: Mutex<HashMap<SessionId, Vec<TransportCommand>>>,
}

impl BufferedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the queued commands for one session, oldest first.
    pub fn drain(&self, session_id: &SessionId) -> Vec<TransportCommand> {
        lock(&self.queues).remove(session_id).unwrap_or_default()
    }

    /// Everything ever issued for the session, including drained commands.
    pub fn history(&self, session_id: &SessionId) -> Vec<TransportCommand> {
        lock(&self.history).get(session_id).cloned().unwrap_or_default()
    }

    pub fn spoken(&self, session_id: &SessionId) -> Vec<String> {
        self.history(session_id)
            .into_iter()
            .filter_map(|command| match command {
                TransportCommand::Speak { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn transfers(&self, session_id: &SessionId) -> Vec<String> {
        self.history(session_id)
            .into_iter()
            .filter_map(|command| match command {
                TransportCommand::Transfer { destination } => Some(destination),
                _ => None,
            })
            .collect()
    }

    fn enqueue(&self, session_id: &SessionId, command: TransportCommand) {
        lock(&self.history).entry(session_id.clone()).or_default().push(command.clone());
        lock(&self.queues).entry(session_id.clone()).or_default().push(command);
    }
}

#[async_trait]
impl Transport for BufferedTransport {
    async fn speak(&self, session_id: &SessionId, text: &str) -> Result<(), TransportError> {
        self.enqueue(session_id, TransportCommand::Speak { text: text.to_owned() });
        Ok(())
    }

    async fn stop_audio(&self, session_id: &SessionId) -> Result<(), TransportError> {
        if let Some(queue) = lock(&self.queues).get_mut(session_id) {
            queue.retain(|command| !matches!(command, TransportCommand::Speak { .. }));
        }
        self.enqueue(session_id, TransportCommand::StopAudio);
        Ok(())
    }

    async fn transfer(
        &self,
        session_id: &SessionId,
        destination: &str,
    ) -> Result<(), TransportError> {
        self.enqueue(session_id, TransportCommand::Transfer { destination: destination.to_owned() });
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use frontdesk_core::SessionId;

    use super::{BufferedTransport, Transport, TransportCommand};

    #[tokio::test]
    async fn stop_audio_discards_undelivered_speech() {
        let transport = BufferedTransport::new();
        let session = SessionId("s-1".to_owned());

        transport.speak(&session, "Your options are").await.expect("speak");
        transport.stop_audio(&session).await.expect("stop");
        transport.transfer(&session, "911").await.expect("transfer");

        assert_eq!(
            transport.drain(&session),
            vec![
                TransportCommand::StopAudio,
                TransportCommand::Transfer { destination: "911".to_owned() },
            ]
        );
        assert!(transport.drain(&session).is_empty());
        assert_eq!(transport.spoken(&session), vec!["Your options are".to_owned()]);
        assert_eq!(transport.transfers(&session), vec!["911".to_owned()]);
    }
}
