//! Event delivery for chain runs.
//!
//! The pipeline emits into a `StepEmitter`; the HTTP layer consumes a
//! `ChainEventStream`, either frame by frame (SSE) or drained down to the
//! terminal `ChatResponse`.

use helpdesk_shared::{ChainError, ChainEvent, ChatResponse};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

/// Sink for chain events
pub trait StepEmitter: Send + Sync {
    fn emit(&self, event: ChainEvent);
}

/// Forwards events into an unbounded channel
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<ChainEvent>,
}

impl ChannelEmitter {
    pub fn new(tx: mpsc::UnboundedSender<ChainEvent>) -> Self {
        Self { tx }
    }
}

impl StepEmitter for ChannelEmitter {
    fn emit(&self, event: ChainEvent) {
        // Receiver gone means the client disconnected; the run still completes
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

/// Discards everything
pub struct NoopEmitter;

impl StepEmitter for NoopEmitter {
    fn emit(&self, _event: ChainEvent) {}
}

/// Events of one run, in emission order.
///
/// Finite and single-use. Ends after the `result` event, or without one when
/// the run hit a hard failure; the failure itself is available through
/// [`ChainEventStream::into_response`].
pub struct ChainEventStream {
    events: UnboundedReceiverStream<ChainEvent>,
    task: Option<JoinHandle<Result<(), ChainError>>>,
}

impl ChainEventStream {
    pub fn new(
        rx: mpsc::UnboundedReceiver<ChainEvent>,
        task: JoinHandle<Result<(), ChainError>>,
    ) -> Self {
        Self {
            events: UnboundedReceiverStream::new(rx),
            task: Some(task),
        }
    }

    async fn finish(&mut self) -> Result<(), ChainError> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ChainError::Worker(format!("chain task failed: {}", e)))?,
            None => Ok(()),
        }
    }

    /// Drain the stream down to its terminal response
    pub async fn into_response(mut self) -> Result<ChatResponse, ChainError> {
        let mut response = None;
        while let Some(event) = self.events.next().await {
            if let ChainEvent::Result(result) = event {
                response = Some(result);
            }
        }
        let outcome = self.finish().await;
        match (response, outcome) {
            (Some(response), _) => Ok(response),
            (None, Err(e)) => Err(e),
            (None, Ok(())) => Err(ChainError::Incomplete),
        }
    }

    /// Every event plus the run's outcome
    pub async fn drain_events(mut self) -> (Vec<ChainEvent>, Result<(), ChainError>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.next().await {
            events.push(event);
        }
        let outcome = self.finish().await;
        (events, outcome)
    }

    /// SSE frames for a streaming response body
    pub fn into_sse_frames(self) -> impl Stream<Item = Result<String, Infallible>> + Send {
        self.filter_map(|event| match event.to_sse_frame() {
            Ok(frame) => Some(Ok(frame)),
            Err(e) => {
                warn!("Dropping {} event that failed to serialize: {}", event.kind(), e);
                None
            }
        })
    }
}

impl Stream for ChainEventStream {
    type Item = ChainEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}
