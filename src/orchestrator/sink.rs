use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::agents::Thought;

/// Receives the live thought feed of a request.
///
/// Thoughts of one request arrive in the order they were produced.
#[async_trait]
pub trait ThoughtSink: Send + Sync {
    /// Deliver one thought.
    async fn emit(&self, thought: &Thought);
}

/// Sink that drops every thought.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl ThoughtSink for NoopSink {
    async fn emit(&self, _thought: &Thought) {}
}

/// A bounded channel applies backpressure to the pipeline. A closed receiver
/// is ignored so a disconnected listener never fails the request.
#[async_trait]
impl ThoughtSink for mpsc::Sender<Thought> {
    async fn emit(&self, thought: &Thought) {
        if self.send(thought.clone()).await.is_err() {
            trace!("Thought receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRole;

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (tx, mut rx) = mpsc::channel(8);
        for i in 0..3 {
            tx.emit(&Thought::new(AgentRole::Orchestrator, format!("step {}", i))).await;
        }
        drop(tx);

        let mut received = Vec::new();
        while let Some(thought) = rx.recv().await {
            received.push(thought.content);
        }
        assert_eq!(received, vec!["step 0", "step 1", "step 2"]);
    }

    #[tokio::test]
    async fn test_closed_channel_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        tx.emit(&Thought::new(AgentRole::Orchestrator, "lost")).await;
        NoopSink.emit(&Thought::new(AgentRole::Orchestrator, "dropped")).await;
    }
}
