use crate::models::Notification;
use crate::view::ViewSnapshot;
use actix_web::web::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ping interval for SSE keep-alive (30 seconds)
const PING_INTERVAL: Duration = Duration::from_secs(30);

fn frame(event: &str, data: &impl Serialize) -> Bytes {
    let data = serde_json::to_string(data).unwrap_or_default();
    Bytes::from(format!("event: {}\ndata: {}\n\n", event, data))
}

fn ping() -> Bytes {
    frame("ping", &json!({ "timestamp": Utc::now().to_rfc3339() }))
}

/// SSE stream of one mounted view: its snapshots and transient notifications
pub struct SseStream {
    event_stream:
        Pin<Box<dyn Stream<Item = Result<Bytes, actix_web::Error>> + Send + 'static>>,
}

impl SseStream {
    pub fn new(
        view_id: Uuid,
        snapshots: watch::Receiver<ViewSnapshot>,
        notifications: broadcast::Receiver<Notification>,
        lifetime: CancellationToken,
    ) -> Self {
        info!(view_id = %view_id, "Creating new SSE stream");

        // starts with the current snapshot, then one per change
        let snapshot_stream =
            WatchStream::new(snapshots).map(|snapshot| Ok(frame("snapshot", &snapshot)));

        let notification_stream = BroadcastStream::new(notifications).filter_map(move |result| {
            async move {
                match result {
                    Ok(notification) => {
                        debug!(view_id = %view_id, level = ?notification.level, "Sending notification via SSE");
                        Some(Ok(frame("notification", &notification)))
                    }
                    Err(BroadcastStreamRecvError::Lagged(count)) => {
                        warn!(
                            view_id = %view_id,
                            lagged = count,
                            "SSE receiver lagged, notifications dropped"
                        );
                        None
                    }
                }
            }
        });

        let ping_stream = IntervalStream::new(interval_at(
            Instant::now() + PING_INTERVAL,
            PING_INTERVAL,
        ))
        .map(|_| {
            debug!("Sending SSE ping");
            Ok(ping())
        });

        let initial_ping = futures::stream::once(async { Ok::<_, actix_web::Error>(ping()) });

        // the stream ends once the view is unmounted
        let event_stream = initial_ping
            .chain(futures::stream::select(
                futures::stream::select(snapshot_stream, notification_stream),
                ping_stream,
            ))
            .take_until(lifetime.cancelled_owned());

        Self {
            event_stream: Box::pin(event_stream),
        }
    }
}

impl Stream for SseStream {
    type Item = Result<Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.event_stream.as_mut().poll_next(cx)
    }
}
