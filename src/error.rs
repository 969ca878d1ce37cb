use crate::frame::DecodeError;

/// An error which occurred while receiving from the ByteBlaster network.
///
/// Errors are diagnostic: the stream reports them and keeps running.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A relay server could not be reached
    #[error("connect to {0} failed: {1}")]
    Connect(String, #[source] std::io::Error),
    /// The active connection failed
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection produced no data for a full watchdog interval
    #[error("connection to {0} went idle")]
    IdleTimeout(String),
    /// The connection produced too many decode errors
    #[error("connection to {0} produced {1} decode errors")]
    TooManyDecodeErrors(String, u32),
    /// The byte stream could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// A compressed product could not be processed
    #[error("archive format error: {0}")]
    ArchiveFormat(#[from] zip::result::ZipError),
    /// An entry within a compressed product could not be processed
    #[error("inner archive format error in {0:?}")]
    ArchiveMember(String),
}
