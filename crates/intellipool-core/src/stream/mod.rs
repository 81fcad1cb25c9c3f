// ── Reactive streams ──
//
// `Stream` adapters over the controller's broadcast and watch channels.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

use crate::controller::ConnectionState;
use crate::model::DataEvent;

/// Data events as a `Stream`.
///
/// A subscriber that falls behind by more than the channel capacity
/// skips the missed events; the gap is logged and the stream continues.
pub struct DataStream {
    inner: BroadcastStream<Arc<DataEvent>>,
}

impl DataStream {
    pub(crate) fn new(receiver: broadcast::Receiver<Arc<DataEvent>>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
        }
    }
}

impl Stream for DataStream {
    type Item = Arc<DataEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    tracing::warn!(skipped, "data stream lagged, events dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Connection state as a `Stream`, starting with the current value.
pub struct StateStream {
    inner: WatchStream<ConnectionState>,
}

impl StateStream {
    pub(crate) fn new(receiver: watch::Receiver<ConnectionState>) -> Self {
        Self {
            inner: WatchStream::new(receiver),
        }
    }
}

impl Stream for StateStream {
    type Item = ConnectionState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    fn event(n: u32) -> Arc<DataEvent> {
        let text = format!(r#"{{"n":{n}}}"#);
        let envelope = intellipool_api::protocol::decode(&text).unwrap().unwrap();
        Arc::new(DataEvent::from_envelope(envelope))
    }

    #[tokio::test]
    async fn lagged_subscriber_resumes_with_newest_events() {
        let (tx, rx) = broadcast::channel(2);
        let mut stream = DataStream::new(rx);

        for n in 0..4 {
            tx.send(event(n)).unwrap();
        }
        drop(tx);

        let seen: Vec<u64> = stream
            .by_ref()
            .map(|ev| ev.payload["n"].as_u64().unwrap())
            .collect()
            .await;
        assert_eq!(seen, vec![2, 3]);
    }

    #[tokio::test]
    async fn state_stream_starts_with_current_value() {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        let mut stream = StateStream::new(rx);
        assert_eq!(stream.next().await, Some(ConnectionState::Connecting));

        tx.send_replace(ConnectionState::Connected);
        assert_eq!(stream.next().await, Some(ConnectionState::Connected));
    }
}
