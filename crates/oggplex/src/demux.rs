use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use oggplex_page::{decode_page, Page, CAPTURE_PATTERN};
use tracing::{debug, trace};

use crate::error::{OggError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Delivery metadata handed to data handlers alongside each page payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    /// Granule position of the delivering page; meaning is codec-defined.
    pub granule_position: i64,
    /// Pages missing between this page and the previous one.
    pub skipped_pages: u32,
    /// Set on the page tagged as the first of its logical stream.
    pub first_data: bool,
    /// The payload continues a packet left open by the previous page.
    pub continued_packet: bool,
    /// The logical stream ends with this page.
    pub closing: bool,
}

/// Receives payloads for one logical stream.
///
/// Errors propagate to the caller of [`Demuxer::process`].
pub trait DataHandler {
    fn on_data(&self, payload: &[u8], meta: PageMeta) -> Result<()>;
}

/// Notified when the demultiplexer first sights a serial number, before the
/// sighting page is dispatched. Register data handlers here.
pub trait NewStreamHandler {
    fn on_new_stream(&self, stream: &mut LogicalStream) -> Result<()>;
}

/// Read-side state of one logical stream, owned by the demultiplexer.
pub struct LogicalStream {
    serial: u32,
    last_sequence: Option<u32>,
    granule_position: Option<i64>,
    handlers: Vec<Arc<dyn DataHandler>>,
}

impl LogicalStream {
    fn new(serial: u32) -> Self {
        Self {
            serial,
            last_sequence: None,
            granule_position: None,
            handlers: Vec::new(),
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Granule position of the last page dispatched on this stream.
    pub fn granule_position(&self) -> Option<i64> {
        self.granule_position
    }

    pub fn add_data_handler(&mut self, handler: Arc<dyn DataHandler>) {
        self.handlers.push(handler);
    }

    /// Unregister a handler previously added; identity is the `Arc` handle.
    pub fn remove_data_handler(&mut self, handler: &Arc<dyn DataHandler>) {
        self.handlers.retain(|other| !Arc::ptr_eq(other, handler));
    }

    fn dispatch(&mut self, page: &Page) -> Result<()> {
        let header = &page.header;

        let skipped_pages = if header.first_page {
            0
        } else {
            // A stream first sighted mid-way behaves as if page 0 had been
            // seen, so sequence n reports n - 1 skipped pages.
            let last = self.last_sequence.unwrap_or(0);
            if header.sequence <= last {
                return Err(OggError::LatePage {
                    serial: self.serial,
                    sequence: header.sequence,
                    last,
                });
            }
            header.sequence - (last + 1)
        };

        let meta = PageMeta {
            granule_position: header.granule_position,
            skipped_pages,
            first_data: header.first_page,
            continued_packet: header.continued_packet,
            closing: header.last_page,
        };
        for handler in &self.handlers {
            handler.on_data(&page.payload, meta)?;
        }

        self.last_sequence = Some(header.sequence);
        self.granule_position = Some(header.granule_position);
        Ok(())
    }
}

/// Parses a physical Ogg stream into logical streams and dispatches page
/// payloads to their handlers.
///
/// Reading is single-threaded: [`process`](Self::process) drains the source
/// to EOF, and handler registration happens either before processing or
/// inside a [`NewStreamHandler`] callback.
pub struct Demuxer<R> {
    source: R,
    buf: BytesMut,
    streams: HashMap<u32, LogicalStream>,
    new_stream_handlers: Vec<Arc<dyn NewStreamHandler>>,
}

impl<R: Read> Demuxer<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            streams: HashMap::new(),
            new_stream_handlers: Vec::new(),
        }
    }

    pub fn add_new_stream_handler(&mut self, handler: Arc<dyn NewStreamHandler>) {
        self.new_stream_handlers.push(handler);
    }

    /// Unregister a handler previously added; identity is the `Arc` handle.
    pub fn remove_new_stream_handler(&mut self, handler: &Arc<dyn NewStreamHandler>) {
        self.new_stream_handlers
            .retain(|other| !Arc::ptr_eq(other, handler));
    }

    /// Look up a logical stream sighted during processing.
    pub fn stream(&self, serial: u32) -> Option<&LogicalStream> {
        self.streams.get(&serial)
    }

    /// Mutable lookup, for managing data handlers between `process` calls.
    pub fn stream_mut(&mut self, serial: u32) -> Option<&mut LogicalStream> {
        self.streams.get_mut(&serial)
    }

    /// All logical streams sighted so far.
    pub fn streams(&self) -> impl Iterator<Item = &LogicalStream> {
        self.streams.values()
    }

    /// Drain the source, dispatching every page to its logical stream.
    ///
    /// Bytes that do not line up on a capture pattern are skipped silently;
    /// everything after a matched capture pattern must form a valid page.
    /// Decode failures, late pages, and handler errors all abort processing.
    pub fn process(&mut self) -> Result<()> {
        loop {
            if !self.resync()? {
                return Ok(());
            }
            let page = loop {
                match decode_page(&mut self.buf)? {
                    Some(page) => break page,
                    None => {
                        if self.fill()? == 0 {
                            if self.buf.is_empty() {
                                // EOF flush with the capture pattern as the
                                // final bytes; nothing was truncated.
                                return Ok(());
                            }
                            return Err(OggError::UnexpectedEof);
                        }
                    }
                }
            };
            self.dispatch(page)?;
        }
    }

    /// Consume bytes until a full capture pattern has been matched.
    /// Returns `false` on EOF before a match.
    fn resync(&mut self) -> Result<bool> {
        let mut matches = 0usize;
        let mut consumed = 0usize;
        loop {
            while !self.buf.is_empty() {
                let byte = self.buf[0];
                self.buf.advance(1);
                consumed += 1;
                // A mismatching 'O' may start the next candidate match.
                matches = if byte == CAPTURE_PATTERN[matches] {
                    matches + 1
                } else if byte == CAPTURE_PATTERN[0] {
                    1
                } else {
                    0
                };
                if matches == CAPTURE_PATTERN.len() {
                    let skipped = consumed - CAPTURE_PATTERN.len();
                    if skipped > 0 {
                        debug!(skipped, "skipped bytes before capture pattern");
                    }
                    return Ok(true);
                }
            }
            if self.fill()? == 0 {
                return Ok(false);
            }
        }
    }

    fn fill(&mut self) -> Result<usize> {
        loop {
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            match self.source.read(&mut chunk) {
                Ok(read) => {
                    self.buf.extend_from_slice(&chunk[..read]);
                    return Ok(read);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(OggError::Io(err)),
            }
        }
    }

    fn dispatch(&mut self, page: Page) -> Result<()> {
        let serial = page.header.serial;
        trace!(
            serial,
            sequence = page.header.sequence,
            size = page.payload.len(),
            "dispatching page"
        );
        match self.streams.entry(serial) {
            Entry::Occupied(mut entry) => entry.get_mut().dispatch(&page),
            Entry::Vacant(entry) => {
                debug!(serial, "new logical stream");
                let stream = entry.insert(LogicalStream::new(serial));
                for handler in &self.new_stream_handlers {
                    handler.on_new_stream(stream)?;
                }
                stream.dispatch(&page)
            }
        }
    }

    /// Borrow the underlying source.
    pub fn get_ref(&self) -> &R {
        &self.source
    }

    /// Mutably borrow the underlying source.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }

    /// Consume the demuxer and return the source.
    pub fn into_inner(self) -> R {
        self.source
    }
}
