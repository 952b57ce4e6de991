/// Errors that can occur in the streaming engines.
#[derive(Debug, thiserror::Error)]
pub enum OggError {
    /// Page-framing error (bad checksum, bad version, oversized payload).
    #[error("page error: {0}")]
    Page(#[from] oggplex_page::PageError),

    /// The source ended inside a page.
    #[error("unexpected end of stream inside a page")]
    UnexpectedEof,

    /// A page's sequence number is not ahead of the last page seen on its
    /// logical stream.
    #[error("late page on stream {serial:#010x}: sequence {sequence} after {last}")]
    LatePage { serial: u32, sequence: u32, last: u32 },

    /// Write attempted on a logical stream that has been closed.
    #[error("logical stream {serial:#010x} is closed")]
    StreamClosed { serial: u32 },

    /// The source or sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OggError>;
