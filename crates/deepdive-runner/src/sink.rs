//! Destinations for a request's events.
//!
//! The orchestrator emits every event through an [`EventSink`]; the transport
//! behind it decides what reaches the client.

use async_trait::async_trait;
use deepdive_core::StreamEvent;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receives the events of one request, in order.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Delivery failures are the sink's problem.
    async fn emit(&self, event: StreamEvent);
}

/// Forwards events into an unbounded channel.
///
/// # Example
///
/// ```rust,no_run
/// use deepdive_runner::ChannelSink;
///
/// let (sink, mut rx) = ChannelSink::new();
///
/// tokio::spawn(async move {
///     while let Some(event) = rx.recv().await {
///         println!("{:?}", event);
///     }
/// });
/// ```
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver for its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// True once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the receiver has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            // Consumer went away; the event has nowhere to go.
            trace!("Event dropped, receiver closed");
        }
    }
}

/// Discards events after logging them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, event: StreamEvent) {
        if let StreamEvent::Progress(progress) = &event {
            debug!(
                request_id = %progress.request_id,
                stage = %progress.stage,
                progress = progress.progress,
                "Progress"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepdive_core::{ProgressEvent, RequestId};

    fn progress(stage: &str) -> StreamEvent {
        ProgressEvent::new(RequestId::new("req_1_sink"), stage, 10, None).into()
    }

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(progress("a")).await;
        sink.emit(progress("b")).await;

        for expected in ["a", "b"] {
            match rx.recv().await.unwrap() {
                StreamEvent::Progress(p) => assert_eq!(p.stage, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        assert!(sink.is_closed());
        sink.closed().await;
        sink.emit(progress("late")).await;
    }

    #[tokio::test]
    async fn test_null_sink_accepts_events() {
        NullSink.emit(progress("ignored")).await;
    }
}
