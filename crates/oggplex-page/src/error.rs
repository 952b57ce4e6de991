/// Errors that can occur during page encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    /// The header declares a stream structure version other than 0.
    #[error("unsupported stream structure version {0} (expected 0)")]
    UnsupportedVersion(u8),

    /// The page checksum does not match the bytes on the wire.
    #[error("page checksum mismatch (expected {expected:#010x}, computed {computed:#010x})")]
    BadChecksum { expected: u32, computed: u32 },

    /// The payload exceeds the 65025-byte page maximum.
    #[error("payload too large for one page ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, PageError>;
