//! One-directional relay loop shared by the raw TLS splice and the WebSocket tunnel.
//!
//! A pump owns the read side of one connection and the write side of the
//! other. What counts as an item, and how the end of the source is signalled
//! to the sink, is decided by a [`Transfer`].

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::debug;
use std::fmt::Display;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{BytesCodec, FramedWrite};
use tokio_util::io::ReaderStream;

/// What a pump does with one item read from its source.
#[derive(Debug, PartialEq, Eq)]
pub enum Step<T> {
    Forward(T),
    Skip,
    /// Stop reading; send the item, if any, then close the sink.
    Finish(Option<T>),
}

pub trait Transfer {
    type Item;
    type Error: Display;

    fn classify(&self, item: Self::Item) -> Step<Self::Item>;

    /// Item to send when the source ends (`None`) or fails (`Some(error)`).
    fn on_source_end(&self, error: Option<&Self::Error>) -> Option<Self::Item>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    pub forwarded: u64,
    pub read_failed: bool,
    pub write_failed: bool,
}

/// Relay items from `source` to `sink` until the source finishes or a write fails.
/// The sink is always closed before returning.
pub async fn pump<T, S, K>(label: &str, mut source: S, mut sink: K, transfer: &T) -> PumpReport
where
    T: Transfer,
    S: Stream<Item = Result<T::Item, T::Error>> + Unpin,
    K: Sink<T::Item> + Unpin,
    K::Error: Display,
{
    let mut report = PumpReport::default();
    let last = loop {
        match source.next().await {
            Some(Ok(item)) => match transfer.classify(item) {
                Step::Forward(item) => {
                    if let Err(e) = sink.send(item).await {
                        debug!("{}: write failed: {}", label, e);
                        report.write_failed = true;
                        let _ = sink.close().await;
                        return report;
                    }
                    report.forwarded += 1;
                }
                Step::Skip => {}
                Step::Finish(item) => break item,
            },
            Some(Err(e)) => {
                debug!("{}: read failed: {}", label, e);
                report.read_failed = true;
                break transfer.on_source_end(Some(&e));
            }
            None => break transfer.on_source_end(None),
        }
    };

    if let Some(item) = last {
        if let Err(e) = sink.send(item).await {
            debug!("{}: failed to signal end of stream: {}", label, e);
            report.write_failed = true;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("{}: close failed: {}", label, e);
    }
    report
}

/// When a pair of pumps is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// As soon as either direction finishes; the other is dropped mid-flight.
    EitherDone,
    /// Only after both directions have finished on their own.
    BothDone,
}

/// Drive both directions of a connection pair concurrently.
pub async fn run_pair<A, B>(outbound: A, inbound: B, teardown: Teardown) -> (Option<PumpReport>, Option<PumpReport>)
where
    A: Future<Output = PumpReport>,
    B: Future<Output = PumpReport>,
{
    match teardown {
        Teardown::BothDone => {
            let (outbound, inbound) = tokio::join!(outbound, inbound);
            (Some(outbound), Some(inbound))
        }
        Teardown::EitherDone => tokio::select! {
            report = outbound => (Some(report), None),
            report = inbound => (None, Some(report)),
        },
    }
}

/// Raw bytes, forwarded unmodified.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteTransfer;

impl Transfer for ByteTransfer {
    type Item = Bytes;
    type Error = std::io::Error;

    fn classify(&self, item: Bytes) -> Step<Bytes> {
        Step::Forward(item)
    }

    fn on_source_end(&self, _error: Option<&std::io::Error>) -> Option<Bytes> {
        None
    }
}

pub fn byte_source<R: AsyncRead>(reader: R) -> ReaderStream<R> {
    ReaderStream::new(reader)
}

pub fn byte_sink<W: AsyncWrite>(writer: W) -> FramedWrite<W, BytesCodec> {
    FramedWrite::new(writer, BytesCodec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Forwards even numbers, skips odd ones, stops at zero and sends a marker at the end.
    struct Numbers;

    impl Transfer for Numbers {
        type Item = u32;
        type Error = String;

        fn classify(&self, item: u32) -> Step<u32> {
            match item {
                0 => Step::Finish(Some(1000)),
                n if n % 2 == 0 => Step::Forward(n),
                _ => Step::Skip,
            }
        }

        fn on_source_end(&self, error: Option<&String>) -> Option<u32> {
            Some(if error.is_some() { 500 } else { 200 })
        }
    }

    #[tokio::test]
    async fn test_finish_item_stops_the_pump() {
        let source = stream::iter(vec![Ok(2), Ok(3), Ok(4), Ok(0), Ok(6)]);
        let mut sink: Vec<u32> = Vec::new();
        let report = pump("numbers", source, &mut sink, &Numbers).await;
        assert_eq!(sink, vec![2, 4, 1000]);
        assert_eq!(report.forwarded, 2);
        assert!(!report.read_failed);
    }

    #[tokio::test]
    async fn test_source_end_is_signalled() {
        let mut sink: Vec<u32> = Vec::new();
        pump("numbers", stream::iter(vec![Ok(2)]), &mut sink, &Numbers).await;
        assert_eq!(sink, vec![2, 200]);

        let mut sink: Vec<u32> = Vec::new();
        let report = pump("numbers", stream::iter(vec![Ok(4), Err("reset".to_string())]), &mut sink, &Numbers).await;
        assert_eq!(sink, vec![4, 500]);
        assert!(report.read_failed);
    }

    #[tokio::test]
    async fn test_byte_pump_copies_and_shuts_down() {
        let (mut client, proxy_side) = tokio::io::duplex(8192);
        let (upstream_side, mut upstream) = tokio::io::duplex(8192);
        let (proxy_read, _proxy_write) = tokio::io::split(proxy_side);
        let (_upstream_read, upstream_write) = tokio::io::split(upstream_side);

        let relay = tokio::spawn(async move { pump("bytes", byte_source(proxy_read), byte_sink(upstream_write), &ByteTransfer).await });

        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        let mut received = Vec::new();
        upstream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, payload);
        assert!(relay.await.unwrap().forwarded > 0);
    }

    #[tokio::test]
    async fn test_either_done_drops_the_other_direction() {
        let finished = async { PumpReport { forwarded: 1, ..Default::default() } };
        let stalled = std::future::pending::<PumpReport>();
        let (outbound, inbound) = run_pair(finished, stalled, Teardown::EitherDone).await;
        assert_eq!(outbound.map(|r| r.forwarded), Some(1));
        assert!(inbound.is_none());
    }

    #[tokio::test]
    async fn test_both_done_waits_for_both() {
        let (outbound, inbound) = run_pair(async { PumpReport::default() }, async { PumpReport::default() }, Teardown::BothDone).await;
        assert!(outbound.is_some() && inbound.is_some());
    }
}
