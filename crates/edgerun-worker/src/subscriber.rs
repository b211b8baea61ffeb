//! The Subscriber: a lazy tail of the trace log for one Queue Entry, used
//! to back server-sent trace streaming.
//!
//! Polls at the same 5 Hz cadence as the scheduler. After the Queue Entry
//! reaches a terminal status, it performs exactly one more delayed poll
//! before ending the stream, so a subscriber that polls status a tick
//! before the terminal trace is written still observes it.

use std::time::Duration;

use async_stream::stream;
use edgerun_core::TraceRecord;
use edgerun_db::QueueStore;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const FINAL_FLUSH_DELAY: Duration = Duration::from_millis(200);

/// Returns a lazy stream of trace records for `queue_id`. The stream ends
/// once the queue entry reaches a terminal status (after the final flush
/// read) or once `cancel` is triggered, whichever comes first.
pub fn subscribe(
    queue: QueueStore,
    queue_id: String,
    cancel: CancellationToken,
) -> impl Stream<Item = TraceRecord> {
    stream! {
        let mut last_seen_id: i64 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let batch = match queue.tail_traces(&queue_id, last_seen_id).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(error = %e, queue_id = %queue_id, "subscriber tail read failed");
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_INTERVAL) => continue,
                        _ = cancel.cancelled() => break,
                    }
                }
            };

            for record in &batch {
                if record.id > last_seen_id {
                    last_seen_id = record.id;
                }
            }
            for record in batch {
                yield record;
            }

            // A failed status lookup (store gone, entry vanished) is treated
            // as terminal so the stream ends rather than polling forever.
            let is_terminal = queue
                .get_entry(&queue_id)
                .await
                .map(|entry| entry.status.is_terminal())
                .unwrap_or(true);

            if is_terminal {
                tokio::select! {
                    _ = tokio::time::sleep(FINAL_FLUSH_DELAY) => {}
                    _ = cancel.cancelled() => break,
                }
                if let Ok(tail) = queue.tail_traces(&queue_id, last_seen_id).await {
                    for record in tail {
                        yield record;
                    }
                }
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }
}
