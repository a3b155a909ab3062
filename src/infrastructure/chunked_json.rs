// Chunked JSON streaming - length-prefixed snapshot frames
use crate::domain::telemetry::Snapshot;
use crate::infrastructure::http_response::brotli_compress;
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Streaming response of length-prefixed JSON frames.
///
/// Frames are compressed one by one, so Content-Encoding is not set: the
/// HTTP body itself is not a Brotli stream.
pub fn chunked_json_stream<S, T>(stream: S, compress: bool) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + Sync + 'static,
{
    let byte_stream = stream.then(move |msg| async move { encode_frame(&msg, compress).await });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson-framed")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(byte_stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// 4-byte big-endian length, then the (optionally compressed) JSON
pub async fn encode_frame<T: Serialize>(msg: &T, compress: bool) -> Result<Bytes, std::io::Error> {
    let json = serde_json::to_vec(msg).map_err(std::io::Error::other)?;
    let payload = if compress { brotli_compress(json).await? } else { json };

    let mut chunk = BytesMut::with_capacity(4 + payload.len());
    chunk.put_u32(payload.len() as u32);
    chunk.put_slice(&payload);
    Ok(chunk.freeze())
}

/// Snapshot updates as a stream, starting with the current snapshot.
/// A slow client skips the updates it lagged behind on.
pub fn snapshot_stream(
    current: Snapshot,
    mut rx: broadcast::Receiver<Snapshot>,
) -> impl Stream<Item = Snapshot> + Send + 'static {
    async_stream::stream! {
        yield current;
        loop {
            match rx.recv().await {
                Ok(snapshot) => yield snapshot,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Stream client lagging, skipping snapshots");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_frame_is_length_prefixed() {
        let snapshot = Snapshot::empty(Utc::now());
        let frame = encode_frame(&snapshot, false).await.unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        let decoded: Snapshot = serde_json::from_slice(&frame[4..]).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[tokio::test]
    async fn test_snapshot_stream_starts_with_current() {
        let (tx, rx) = broadcast::channel(4);
        let now = Utc::now();
        let mut stream = Box::pin(snapshot_stream(Snapshot::empty(now), rx));

        let mut update = Snapshot::empty(now);
        update.rpm = 15.0;
        tx.send(update).unwrap();
        drop(tx);

        assert_eq!(stream.next().await.unwrap().rpm, 0.0);
        assert_eq!(stream.next().await.unwrap().rpm, 15.0);
        assert!(stream.next().await.is_none());
    }
}
