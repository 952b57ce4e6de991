use std::collections::BTreeSet;
use std::io::{ErrorKind, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use oggplex_page::{encode_page, PageHeader, MAX_PAGE_PAYLOAD};
use tracing::debug;

use crate::error::{OggError, Result};

const INITIAL_SCRATCH_CAPACITY: usize = 8 * 1024;

/// Sink state shared between the muxer and its writers, so writers stay
/// valid regardless of which is dropped first.
struct MuxShared<W> {
    sink: Mutex<W>,
    serials: Mutex<BTreeSet<u32>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Galois step over taps 0, 1, 21, 31; walks the serial space without
/// revisiting until the cycle closes.
fn lfsr_next(lfsr: u32) -> u32 {
    let bit = (lfsr ^ (lfsr >> 1) ^ (lfsr >> 21) ^ (lfsr >> 31)) & 1;
    (lfsr << 1) | bit
}

/// Interleaves pages from multiple logical writers onto one sink.
///
/// Each emitted page reaches the sink whole: a mutex serializes page
/// emission, so pages from concurrent writers never interleave mid-page.
/// Ordering between writers is unspecified.
pub struct Muxer<W> {
    shared: Arc<MuxShared<W>>,
}

impl<W: Write> Muxer<W> {
    pub fn new(sink: W) -> Self {
        Self {
            shared: Arc::new(MuxShared {
                sink: Mutex::new(sink),
                serials: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    /// Open a logical stream on an automatically allocated serial.
    ///
    /// The serial is found by stepping the LFSR from the highest serial
    /// allocated so far until an unused value turns up.
    pub fn new_stream(&self) -> LogicalWriter<W> {
        let mut serials = lock(&self.shared.serials);
        let mut serial = match serials.iter().next_back() {
            None => 1,
            Some(&max) => lfsr_next(max),
        };
        while serials.contains(&serial) {
            serial = lfsr_next(serial);
        }
        serials.insert(serial);
        drop(serials);
        debug!(serial, "allocated logical stream");
        LogicalWriter::new(Arc::clone(&self.shared), serial)
    }

    /// Open a logical stream on a specific serial, or `None` if taken.
    pub fn new_stream_with_serial(&self, serial: u32) -> Option<LogicalWriter<W>> {
        let mut serials = lock(&self.shared.serials);
        if !serials.insert(serial) {
            return None;
        }
        drop(serials);
        debug!(serial, "claimed logical stream");
        Some(LogicalWriter::new(Arc::clone(&self.shared), serial))
    }

    /// Recover the sink. Succeeds once every writer has been dropped.
    pub fn into_inner(self) -> Option<W> {
        Arc::into_inner(self.shared)
            .map(|shared| shared.sink.into_inner().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Write side of one logical stream.
///
/// Not `Clone`: a logical stream has exactly one writer, which owns the
/// sequence counter and packet state. The writer may move to another
/// thread; emission synchronizes on the shared sink.
pub struct LogicalWriter<W> {
    shared: Arc<MuxShared<W>>,
    serial: u32,
    sequence: u32,
    packet_open: bool,
    first_write: bool,
    closed: bool,
    scratch: BytesMut,
}

impl<W: Write> LogicalWriter<W> {
    fn new(shared: Arc<MuxShared<W>>, serial: u32) -> Self {
        Self {
            shared,
            serial,
            sequence: 0,
            packet_open: false,
            first_write: true,
            closed: false,
            scratch: BytesMut::with_capacity(INITIAL_SCRATCH_CAPACITY),
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Write a packet, splitting it into as many pages as it needs.
    ///
    /// Every page but the last is emitted with the packet left open; the
    /// final page (possibly empty) carries the caller's `close_packet` and
    /// `close_stream`. `close_stream` ends the logical stream permanently.
    pub fn write(
        &mut self,
        data: &[u8],
        granule_position: i64,
        close_packet: bool,
        close_stream: bool,
    ) -> Result<()> {
        let full_pages = data.len() / MAX_PAGE_PAYLOAD;
        let mut written = 0;
        for _ in 0..full_pages {
            self.write_page(
                &data[written..written + MAX_PAGE_PAYLOAD],
                granule_position,
                false,
                false,
            )?;
            written += MAX_PAGE_PAYLOAD;
        }
        self.write_page(&data[written..], granule_position, close_packet, close_stream)
    }

    /// Emit exactly one page. Fails with `PayloadTooLarge` beyond 65025
    /// bytes; [`write`](Self::write) is the splitting form.
    pub fn write_page(
        &mut self,
        data: &[u8],
        granule_position: i64,
        close_packet: bool,
        close_stream: bool,
    ) -> Result<()> {
        if self.closed {
            return Err(OggError::StreamClosed {
                serial: self.serial,
            });
        }

        let header = PageHeader {
            continued_packet: self.packet_open,
            first_page: self.first_write,
            last_page: close_stream,
            granule_position,
            serial: self.serial,
            sequence: self.sequence,
        };
        self.scratch.clear();
        encode_page(&header, data, &mut self.scratch)?;

        {
            let mut sink = lock(&self.shared.sink);
            let mut offset = 0usize;
            while offset < self.scratch.len() {
                match sink.write(&self.scratch[offset..]) {
                    Ok(0) => {
                        return Err(OggError::Io(std::io::Error::new(
                            ErrorKind::WriteZero,
                            "sink accepted no bytes",
                        )))
                    }
                    Ok(written) => offset += written,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                    Err(err) => return Err(OggError::Io(err)),
                }
            }
            loop {
                match sink.flush() {
                    Ok(()) => break,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                    Err(err) => return Err(OggError::Io(err)),
                }
            }
        }

        self.sequence = self.sequence.wrapping_add(1);
        self.first_write = false;
        self.packet_open = !close_packet;
        if close_stream {
            self.closed = true;
        }
        Ok(())
    }
}
