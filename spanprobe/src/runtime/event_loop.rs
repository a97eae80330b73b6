use aya::maps::{MapData, RingBuf};
use log::{debug, info, warn};
use std::io;
use std::os::fd::AsRawFd;
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::watch;

use crate::decoder::decode;
use crate::domain::TracerError;
use crate::export::SpanSink;
use crate::spans::{DescriptorStore, SpanReconstructor};

/// Pause after a failed readiness wait before polling again
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Counters for the consumer task, reported at shutdown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    pub records: u64,
    pub malformed: u64,
    pub read_errors: u64,
}

/// A pollable file descriptor yielding whole records
///
/// # Safety
/// `as_raw_fd` must return the same open descriptor for as long as the
/// source lives, and the source must own it.
pub unsafe trait RecordSource: AsRawFd {
    /// Hand every record available right now to `f`.
    ///
    /// # Errors
    /// [`TracerError::StreamClosed`] when the source will never yield again
    fn drain(&mut self, f: &mut dyn FnMut(&[u8])) -> Result<(), TracerError>;
}

// SAFETY: the ring buffer owns its map fd until dropped
#[allow(unsafe_code)]
unsafe impl RecordSource for RingBuf<MapData> {
    fn drain(&mut self, f: &mut dyn FnMut(&[u8])) -> Result<(), TracerError> {
        while let Some(item) = self.next() {
            f(&item);
        }
        Ok(())
    }
}

/// Decode one record and feed it to the reconstructor
pub fn process_record<S: DescriptorStore, E: SpanSink>(
    reconstructor: &mut SpanReconstructor<S, E>,
    bytes: &[u8],
    stats: &mut ConsumerStats,
) {
    stats.records += 1;
    match decode(bytes) {
        Ok(event) => reconstructor.handle(event),
        Err(e) => {
            stats.malformed += 1;
            warn!("Dropping record: {e}");
        }
    }
}

/// Register `source` with the tokio reactor for readiness polling.
///
/// Must run inside a tokio runtime.
///
/// # Errors
/// [`TracerError::Load`] if the descriptor cannot be polled
pub fn register_source<R: RecordSource>(source: R) -> Result<AsyncFd<R>, TracerError> {
    // SAFETY: upheld by the `RecordSource` contract
    #[allow(unsafe_code)]
    let registered = unsafe { AsyncFd::register_with_interest(source, Interest::READABLE) };
    registered.map_err(|e| TracerError::load("event stream", e))
}

/// Consume records until `shutdown` fires or the source closes.
///
/// Returns the reconstructor (with any spans still open) and the counters.
pub async fn consume_events<R, S, E>(
    mut fd: AsyncFd<R>,
    mut reconstructor: SpanReconstructor<S, E>,
    mut shutdown: watch::Receiver<bool>,
) -> (SpanReconstructor<S, E>, ConsumerStats)
where
    R: RecordSource,
    S: DescriptorStore,
    E: SpanSink,
{
    let mut stats = ConsumerStats::default();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Consumer received shutdown");
                break;
            }
            guard = fd.readable_mut() => {
                let mut guard = match guard {
                    Ok(guard) => guard,
                    Err(e) => match classify_read_error(e) {
                        TracerError::StreamClosed => {
                            info!("Event stream closed");
                            break;
                        }
                        err => {
                            stats.read_errors += 1;
                            warn!("{err}");
                            tokio::time::sleep(READ_ERROR_BACKOFF).await;
                            continue;
                        }
                    },
                };

                let drained = guard
                    .get_inner_mut()
                    .drain(&mut |bytes: &[u8]| process_record(&mut reconstructor, bytes, &mut stats));
                guard.clear_ready();

                if let Err(e) = drained {
                    info!("{e}");
                    break;
                }
            }
        }
    }

    (reconstructor, stats)
}

/// A closed descriptor ends the stream; every other failure is transient
fn classify_read_error(e: io::Error) -> TracerError {
    match e.raw_os_error() {
        Some(libc::EBADF) => TracerError::StreamClosed,
        _ => TracerError::Read(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TraceContext;
    use crate::spans::{MemoryDescriptorStore, Span};
    use crate::symbolization::{LoadBias, SymbolEntry, SymbolTable};
    use chrono::{DateTime, Utc};
    use std::io::{ErrorKind, Read, Write};
    use std::os::fd::RawFd;
    use std::os::unix::net::UnixStream;

    /// Length-prefixed records over a non-blocking socket
    struct FramedSocket {
        stream: UnixStream,
        pending: Vec<u8>,
    }

    impl AsRawFd for FramedSocket {
        fn as_raw_fd(&self) -> RawFd {
            self.stream.as_raw_fd()
        }
    }

    #[allow(unsafe_code)]
    unsafe impl RecordSource for FramedSocket {
        fn drain(&mut self, f: &mut dyn FnMut(&[u8])) -> Result<(), TracerError> {
            let mut buf = [0u8; 256];
            let closed = loop {
                match self.stream.read(&mut buf) {
                    Ok(0) => break true,
                    Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break false,
                    Err(e) => return Err(TracerError::Read(e)),
                }
            };

            while let Some(&len) = self.pending.first() {
                let len = usize::from(len);
                if self.pending.len() < 1 + len {
                    break;
                }
                f(&self.pending[1..=len]);
                self.pending.drain(..=len);
            }

            if closed {
                Err(TracerError::StreamClosed)
            } else {
                Ok(())
            }
        }
    }

    fn framed_pair() -> (FramedSocket, UnixStream) {
        let (reader, writer) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        (FramedSocket { stream: reader, pending: Vec::new() }, writer)
    }

    fn send(writer: &mut UnixStream, record: &[u8]) {
        writer.write_all(&[u8::try_from(record.len()).unwrap()]).unwrap();
        writer.write_all(record).unwrap();
    }

    fn reconstructor() -> SpanReconstructor<MemoryDescriptorStore, Vec<Span>> {
        let symbols = SymbolTable::from_entries(
            vec![SymbolEntry { start: 0x1000, end: 0x1100, name: "main.sample".to_string() }],
            0,
        );
        let context = TraceContext::new(symbols, LoadBias::default(), DateTime::<Utc>::UNIX_EPOCH);
        SpanReconstructor::new(context, MemoryDescriptorStore::default(), Vec::new())
    }

    fn span_start(tid: u32, ts: u64) -> Vec<u8> {
        [tid.to_le_bytes().as_slice(), &ts.to_le_bytes()].concat()
    }

    fn func_event(tid: u32, start: u64, end: u64, addr: u64) -> Vec<u8> {
        [tid.to_le_bytes().as_slice(), &start.to_le_bytes(), &end.to_le_bytes(), &addr.to_le_bytes(), &[0; 4]]
            .concat()
    }

    #[test]
    fn test_process_record_counts_malformed() {
        let mut r = reconstructor();
        let mut stats = ConsumerStats::default();
        process_record(&mut r, &span_start(1, 10), &mut stats);
        process_record(&mut r, &[0u8; 7], &mut stats);
        assert_eq!(stats, ConsumerStats { records: 2, malformed: 1, read_errors: 0 });
        assert_eq!(r.open_spans(), 1);
    }

    #[test]
    fn test_classify_read_error() {
        assert!(matches!(classify_read_error(io::Error::from_raw_os_error(libc::EBADF)), TracerError::StreamClosed));
        assert!(matches!(classify_read_error(io::Error::from_raw_os_error(libc::EINTR)), TracerError::Read(_)));
    }

    #[tokio::test]
    async fn test_consumes_until_stream_closes() {
        let (source, mut writer) = framed_pair();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        send(&mut writer, &span_start(7, 100));
        send(&mut writer, &func_event(7, 110, 150, 0x1010));
        send(&mut writer, &[0u8; 5]);
        send(&mut writer, &7u32.to_le_bytes());
        drop(writer);

        let fd = register_source(source).unwrap();
        let (r, stats) = consume_events(fd, reconstructor(), shutdown_rx).await;

        assert_eq!(stats.records, 4);
        assert_eq!(stats.malformed, 1);
        let spans = r.into_sink();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].events[0].function_name, "main.sample");
        assert_eq!(spans[0].events[0].duration, 40);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_consumer() {
        let (source, mut writer) = framed_pair();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        send(&mut writer, &span_start(3, 1));
        let fd = register_source(source).unwrap();
        let task = tokio::spawn(consume_events(fd, reconstructor(), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        let (mut r, stats) = task.await.unwrap();

        assert_eq!(stats.records, 1);
        assert_eq!(r.open_spans(), 1);
        assert_eq!(r.discard_open(), 1);
        assert!(r.sink().is_empty());
        drop(writer);
    }

    /// Open descriptor that epoll refuses to watch
    #[derive(Debug)]
    struct RegularFile(std::fs::File);

    impl AsRawFd for RegularFile {
        fn as_raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }
    }

    #[allow(unsafe_code)]
    unsafe impl RecordSource for RegularFile {
        fn drain(&mut self, _f: &mut dyn FnMut(&[u8])) -> Result<(), TracerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unpollable_source_is_fatal() {
        let source = RegularFile(tempfile::tempfile().unwrap());
        let err = register_source(source).unwrap_err();
        assert!(matches!(err, TracerError::Load { .. }));
        assert!(err.is_fatal());
    }
}
