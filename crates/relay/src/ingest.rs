//! Ingestion transport: newline-delimited JSON frames over TCP.

use std::sync::Arc;

use storage::StoreHandle;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coordinator::WriteCoordinator;
use crate::record::EventRecord;
use crate::Result;

/// Default largest accepted frame (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Per-connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Non-empty frames read.
    pub frames: usize,
    /// Frames decoded and handed to the coordinator.
    pub accepted: usize,
    /// Frames dropped as oversized or invalid.
    pub rejected: usize,
    /// Accepted frames that ended up in the buffer.
    pub buffered: usize,
}

/// Accepts client connections and feeds their frames to the coordinator.
pub struct Listener<S> {
    coordinator: Arc<WriteCoordinator<S>>,
    connections: Arc<Semaphore>,
    max_frame_size: usize,
}

impl<S: StoreHandle> Listener<S> {
    pub fn new(
        coordinator: Arc<WriteCoordinator<S>>,
        max_connections: usize,
        max_frame_size: usize,
    ) -> Self {
        Self {
            coordinator,
            connections: Arc::new(Semaphore::new(max_connections)),
            max_frame_size,
        }
    }

    /// Accept connections until `shutdown` flips to `true`.
    ///
    /// Connections beyond the limit wait in the accept loop until a slot
    /// frees up.
    pub async fn serve(&self, tcp: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(addr = %tcp.local_addr()?, "listening for events");

        loop {
            let slot = tokio::select! {
                slot = Arc::clone(&self.connections).acquire_owned() => slot,
                _ = shutdown.changed() => return Ok(()),
            };
            // The semaphore is never closed.
            let Ok(slot) = slot else {
                return Ok(());
            };

            let accepted = tokio::select! {
                accepted = tcp.accept() => accepted,
                _ = shutdown.changed() => return Ok(()),
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            let coordinator = Arc::clone(&self.coordinator);
            let max_frame_size = self.max_frame_size;
            tokio::spawn(async move {
                let conn_id = Uuid::new_v4();
                info!(%conn_id, %peer, "client connected");

                let reader = BufReader::new(stream);
                match handle_connection(reader, &coordinator, conn_id, max_frame_size).await {
                    Ok(stats) => info!(
                        %conn_id,
                        frames = stats.frames,
                        accepted = stats.accepted,
                        rejected = stats.rejected,
                        buffered = stats.buffered,
                        "connection closed"
                    ),
                    Err(e) => warn!(%conn_id, error = %e, "connection terminated"),
                }
                drop(slot);
            });
        }
    }
}

/// One newline-terminated read from a client.
enum Frame {
    Line,
    /// Longer than the limit; the rest of the line was discarded unread.
    Oversized(usize),
    Eof,
}

/// Read one line into `line`, never holding more than `max_frame_size + 2`
/// bytes (the frame plus `\r\n`).
async fn read_frame<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max_frame_size: usize,
) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let limit = max_frame_size.saturating_add(2);
    let read = (&mut *reader).take(limit as u64).read_until(b'\n', line).await?;

    if read == 0 {
        return Ok(Frame::Eof);
    }
    if read < limit || line.last() == Some(&b'\n') {
        return Ok(Frame::Line);
    }

    let skipped = discard_line(reader).await?;
    line.clear();
    Ok(Frame::Oversized(read + skipped))
}

/// Consume input up to and including the next newline.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(skipped);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        skipped += used;
        if done {
            return Ok(skipped);
        }
    }
}

/// Read frames until EOF, submitting each valid record.
///
/// Oversized and undecodable frames are dropped; the connection continues.
/// A frame is never buffered beyond `max_frame_size` plus its line ending.
/// Read errors and a closed buffer end this connection only.
pub async fn handle_connection<R, S>(
    mut reader: R,
    coordinator: &WriteCoordinator<S>,
    conn_id: Uuid,
    max_frame_size: usize,
) -> Result<ConnectionStats>
where
    R: AsyncBufRead + Unpin,
    S: StoreHandle,
{
    let mut stats = ConnectionStats::default();
    let mut line = Vec::new();

    loop {
        match read_frame(&mut reader, &mut line, max_frame_size).await? {
            Frame::Eof => return Ok(stats),
            Frame::Oversized(size) => {
                warn!(%conn_id, size, max = max_frame_size, "dropping oversized frame");
                stats.frames += 1;
                stats.rejected += 1;
                continue;
            }
            Frame::Line => {}
        }

        let frame = line.trim_ascii();
        if frame.is_empty() {
            continue;
        }
        stats.frames += 1;

        if frame.len() > max_frame_size {
            warn!(%conn_id, size = frame.len(), max = max_frame_size, "dropping oversized frame");
            stats.rejected += 1;
            continue;
        }

        let Ok(frame) = std::str::from_utf8(frame) else {
            warn!(%conn_id, "dropping frame that is not valid UTF-8");
            stats.rejected += 1;
            continue;
        };

        debug!(%conn_id, frame, "frame received");
        let record = match EventRecord::decode(frame) {
            Ok(record) => record,
            Err(e) => {
                warn!(%conn_id, error = %e, "dropping invalid frame");
                stats.rejected += 1;
                continue;
            }
        };

        stats.accepted += 1;
        let outcome = coordinator.submit(record).await?;
        if outcome.buffered() {
            stats.buffered += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DurabilityBuffer;
    use crate::stores::StorePair;
    use crate::testing::{record, FlakyStore};
    use crate::Error;
    use std::time::Duration;
    use storage::SqliteStore;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn coordinator<S: StoreHandle>(
        stores: &Arc<StorePair<S>>,
        buffer: &Arc<DurabilityBuffer>,
    ) -> WriteCoordinator<S> {
        WriteCoordinator::new(Arc::clone(stores), Arc::clone(buffer), TIMEOUT)
    }

    #[tokio::test]
    async fn bad_frames_are_dropped_without_closing_connection() {
        let stores = Arc::new(StorePair::new(FlakyStore::new(), FlakyStore::new()));
        let buffer = Arc::new(DurabilityBuffer::new(4));
        let coordinator = coordinator(&stores, &buffer);

        let mut input = format!(
            "{}\n\nnot json\n{{\"departure_time\":\"08:00\"}}\n",
            record(1).to_frame()
        )
        .into_bytes();
        input.extend_from_slice(b"\xff\xfe\n");
        input.extend_from_slice(format!("{}\n", record(2).to_frame()).as_bytes());

        let stats = handle_connection(input.as_slice(), &coordinator, Uuid::nil(), 1024)
            .await
            .unwrap();

        assert_eq!(
            stats,
            ConnectionStats {
                frames: 5,
                accepted: 2,
                rejected: 3,
                buffered: 0,
            }
        );
        assert_eq!(stores.primary.rows().pauses, vec![1, 2]);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let stores = Arc::new(StorePair::new(FlakyStore::new(), FlakyStore::new()));
        let buffer = Arc::new(DurabilityBuffer::new(4));
        let coordinator = coordinator(&stores, &buffer);

        let frame = record(1).to_frame();
        let input = format!("{frame}\n");

        let stats = handle_connection(input.as_bytes(), &coordinator, Uuid::nil(), frame.len() - 1)
            .await
            .unwrap();

        assert_eq!(stats.rejected, 1);
        assert!(stores.primary.rows().pauses.is_empty());
    }

    #[tokio::test]
    async fn unterminated_flood_is_cut_off_and_connection_continues() {
        let stores = Arc::new(StorePair::new(FlakyStore::new(), FlakyStore::new()));
        let buffer = Arc::new(DurabilityBuffer::new(4));
        let coordinator = coordinator(&stores, &buffer);

        let flood = tokio::io::repeat(b'x').take(8 * 1024 * 1024);
        let tail = format!("\n{}\n", record(3).to_frame()).into_bytes();
        let reader = BufReader::new(flood.chain(tail.as_slice()));

        let stats = handle_connection(reader, &coordinator, Uuid::nil(), 1024)
            .await
            .unwrap();

        assert_eq!(
            stats,
            ConnectionStats {
                frames: 2,
                accepted: 1,
                rejected: 1,
                buffered: 0,
            }
        );
        assert_eq!(stores.primary.rows().pauses, vec![3]);
    }

    #[tokio::test]
    async fn flood_without_any_newline_ends_at_eof() {
        let stores = Arc::new(StorePair::new(FlakyStore::new(), FlakyStore::new()));
        let buffer = Arc::new(DurabilityBuffer::new(4));
        let coordinator = coordinator(&stores, &buffer);

        let reader = BufReader::new(tokio::io::repeat(b'{').take(1024 * 1024));
        let stats = handle_connection(reader, &coordinator, Uuid::nil(), 64)
            .await
            .unwrap();

        assert_eq!(stats.frames, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn frame_at_the_limit_with_crlf_is_accepted() {
        let stores = Arc::new(StorePair::new(FlakyStore::new(), FlakyStore::new()));
        let buffer = Arc::new(DurabilityBuffer::new(4));
        let coordinator = coordinator(&stores, &buffer);

        let frame = record(4).to_frame();
        let input = format!("{frame}\r\n");
        let stats = handle_connection(input.as_bytes(), &coordinator, Uuid::nil(), frame.len())
            .await
            .unwrap();

        assert_eq!(stats.accepted, 1);
        assert_eq!(stores.primary.rows().pauses, vec![4]);
    }

    #[tokio::test]
    async fn buffered_frames_are_counted() {
        let stores = Arc::new(StorePair::new(FlakyStore::down(), FlakyStore::new()));
        let buffer = Arc::new(DurabilityBuffer::new(4));
        let coordinator = coordinator(&stores, &buffer);

        let input = format!("{}\n", record(1).to_frame());
        let stats = handle_connection(input.as_bytes(), &coordinator, Uuid::nil(), 1024)
            .await
            .unwrap();

        assert_eq!(stats.buffered, 1);
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn closed_buffer_ends_connection() {
        let stores = Arc::new(StorePair::new(FlakyStore::down(), FlakyStore::new()));
        let buffer = Arc::new(DurabilityBuffer::new(4));
        buffer.close();
        let coordinator = coordinator(&stores, &buffer);

        let input = format!("{}\n", record(1).to_frame());
        let result = handle_connection(input.as_bytes(), &coordinator, Uuid::nil(), 1024).await;

        assert!(matches!(result, Err(Error::BufferClosed)));
    }

    #[tokio::test]
    async fn tcp_clients_reach_both_sqlite_stores() {
        let primary = SqliteStore::in_memory().unwrap();
        let secondary = SqliteStore::in_memory().unwrap();
        let stores = Arc::new(StorePair::new(primary.clone(), secondary.clone()));
        let buffer = Arc::new(DurabilityBuffer::new(4));
        let listener = Listener::new(Arc::new(coordinator(&stores, &buffer)), 4, 1024);

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(async move { listener.serve(tcp, rx).await });

        let frame = r#"{"departure_time":"08:00","return_time":"08:15","break_kind":1,"subject_id":"E1","action":"pause","hostname":"H1","source_ip":"10.0.0.1"}"#;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(frame.as_bytes()).await.unwrap();
        client.write_all(b"\n").await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while secondary.counts().unwrap().audits == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for store in [&primary, &secondary] {
            let counts = store.counts().unwrap();
            assert_eq!(counts.attendance, 1);
            assert_eq!(counts.pauses, 1);
            assert_eq!(counts.audits, 1);
        }
        assert!(buffer.is_empty());

        tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
