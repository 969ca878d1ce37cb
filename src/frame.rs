//! Quick Block Transfer frame decoding.
//!
//! The wire is a self-synchronizing octet stream: frames begin with a run
//! of at least six raw `0xFF` bytes, and every transmitted data byte is
//! XORed with `0xFF` ("positive polarity" obfuscation). The decoder is a
//! pure state machine over a growing byte buffer; it performs no I/O and
//! can be handed partial data at any state boundary.

use bytes::{Buf, Bytes, BytesMut};
use std::io::Read;

use crate::segment::{Segment, Timestamp, Version};
use crate::server_list::ServerList;

/// Frames are preceded by at least this many consecutive raw `0xFF` bytes.
const SYNC_RUN: usize = 6;
/// Fixed header size, bytes.
const HEADER_LEN: usize = 80;
/// Fixed V1 body size, bytes. Also the upper bound on a V2 body.
const V1_BODY_LEN: usize = 1024;
/// Worst-case bytes needed to make resynchronization worth attempting:
/// a full V1 body plus the sync preamble.
const RESYNC_THRESHOLD: usize = V1_BODY_LEN + SYNC_RUN;

/// Undo the wire's byte obfuscation. XOR with `0xFF` is an involution:
/// the same transform encodes and decodes.
pub(crate) fn obfuscate(bytes: &mut [u8]) {
    for byte in bytes.iter_mut() {
        *byte ^= 0xFF;
    }
}

fn deobfuscated(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|&b| b ^ 0xFF).collect()
}

/// Decode header and server-list bytes as text. The wire is ASCII; stray
/// high bytes from corruption decode to replacement characters and fail
/// grammar parsing downstream.
fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// A reason the decoder abandoned the current frame.
///
/// Every variant resets the decoder to resynchronization; none of them is
/// fatal to the connection or the client.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The frame type tag was neither a block nor a server list
    #[error("unknown frame type {0:?}")]
    UnknownFrameType(String),
    /// The 80-byte header did not match the grammar
    #[error("malformed block header {0:?}")]
    MalformedHeader(String),
    /// A V2 header declared a body length outside `1..=1024`
    #[error("block length {0} out of range")]
    LengthOutOfRange(u32),
    /// A header declared a zero block number or block count
    #[error("zero block number or count in header")]
    ZeroBlockCount,
    /// The body's byte sum disagreed with the header
    #[error("block checksum failed: header says {expected}, body sums to {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    /// A V2 body was too short to carry compressed data
    #[error("compressed block body too short to inflate")]
    ShortCompressedBody,
    /// A V2 body did not inflate
    #[error("compressed block failed to inflate: {0}")]
    Inflate(#[from] std::io::Error),
    /// The server list text did not match the grammar
    #[error("malformed server list {0:?}")]
    MalformedServerList(String),
}

/// A decoded wire frame.
#[derive(Debug)]
pub enum Frame {
    /// One block of a product.
    Segment(Segment),
    /// A replacement relay pool.
    ServerList(ServerList),
}

#[derive(Debug)]
struct BlockHeader {
    filename: String,
    block_number: u32,
    total_blocks: u32,
    checksum: u32,
    timestamp: Timestamp,
    version: Version,
    declared_length: u32,
}

#[derive(Debug)]
enum State {
    /// Scanning raw bytes for the sync run. The run count survives
    /// partial arrivals; the scanned bytes do not.
    ReSync { run: usize },
    /// Skipping raw `0xFF` filler between frames.
    StartFrame,
    /// Peeking the frame type tag.
    FrameType,
    /// Collecting server list text up to its raw `0xFF` terminator.
    ServerList,
    /// Collecting the fixed-size block header.
    BlockHeader,
    /// Collecting the block body.
    BlockBody { header: BlockHeader },
}

enum Step {
    /// The buffer ran dry mid-state; resume here on the next arrival.
    NeedMore,
    Goto(State),
    Emit(Frame, State),
}

/// Stream-oriented Quick Block Transfer decoder.
///
/// Feed arriving bytes into a [`BytesMut`] and call
/// [`next_frame`](FrameDecoder::next_frame) until it returns `None`. The
/// decoder consumes bytes as it goes and never blocks.
///
/// A decode error abandons the frame in progress, discards the buffered
/// bytes, and resynchronizes on the next sync run. The transport is left
/// open; closing misbehaving connections is connection-manager policy.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    source: String,
}

impl FrameDecoder {
    /// `source` names the originating server; it is stamped onto every
    /// decoded segment for diagnostics.
    pub fn new(source: impl Into<String>) -> Self {
        FrameDecoder {
            state: State::ReSync { run: 0 },
            source: source.into(),
        }
    }

    /// Pull the next frame out of `buf`.
    ///
    /// `None` means more bytes are needed. `Some(Err(_))` reports an
    /// abandoned frame; the decoder has already reset itself and may be
    /// called again once more bytes arrive.
    pub fn next_frame(&mut self, buf: &mut BytesMut) -> Option<Result<Frame, DecodeError>> {
        loop {
            let step = match &mut self.state {
                State::ReSync { run } => Self::resync(run, buf),
                State::StartFrame => Self::start_frame(buf),
                State::FrameType => Self::frame_type(buf),
                State::ServerList => Self::server_list(buf),
                State::BlockHeader => Self::block_header(buf),
                State::BlockBody { header } => Self::block_body(header, &self.source, buf),
            };
            match step {
                Ok(Step::NeedMore) => return None,
                Ok(Step::Goto(next)) => self.state = next,
                Ok(Step::Emit(frame, next)) => {
                    self.state = next;
                    return Some(Ok(frame));
                }
                Err(e) => {
                    // Self-healing: drop the frame attempt wholesale and
                    // hunt for the next sync run.
                    buf.clear();
                    self.state = State::ReSync { run: 0 };
                    return Some(Err(e));
                }
            }
        }
    }

    fn resync(run: &mut usize, buf: &mut BytesMut) -> Result<Step, DecodeError> {
        if buf.len() < RESYNC_THRESHOLD {
            return Ok(Step::NeedMore);
        }
        while buf.has_remaining() {
            if buf.get_u8() == 0xFF {
                *run += 1;
                if *run >= SYNC_RUN {
                    return Ok(Step::Goto(State::StartFrame));
                }
            } else {
                *run = 0;
            }
        }
        Ok(Step::NeedMore)
    }

    fn start_frame(buf: &mut BytesMut) -> Result<Step, DecodeError> {
        // Filler is raw 0xFF: an obfuscated NUL.
        let filler = buf.iter().take_while(|&&b| b == 0xFF).count();
        buf.advance(filler);
        if buf.is_empty() {
            Ok(Step::NeedMore)
        } else {
            Ok(Step::Goto(State::FrameType))
        }
    }

    fn frame_type(buf: &mut BytesMut) -> Result<Step, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Ok(Step::NeedMore);
        }
        let tag = deobfuscated(&buf[..3]);
        match tag.as_slice() {
            b"/PF" => Ok(Step::Goto(State::BlockHeader)),
            b"/Se" => Ok(Step::Goto(State::ServerList)),
            _ => Err(DecodeError::UnknownFrameType(text(&tag))),
        }
    }

    fn server_list(buf: &mut BytesMut) -> Result<Step, DecodeError> {
        // The terminator is a raw 0xFF: the first filler byte after the
        // obfuscated text. Scan raw bytes, decode afterwards.
        let terminator = match buf.iter().position(|&b| b == 0xFF) {
            Some(at) => at,
            None => return Ok(Step::NeedMore),
        };
        let raw = buf.split_to(terminator + 1);
        let list_text = text(&deobfuscated(&raw[..terminator]));
        match ServerList::parse(&list_text) {
            Some(list) => Ok(Step::Emit(Frame::ServerList(list), State::StartFrame)),
            None => Err(DecodeError::MalformedServerList(list_text)),
        }
    }

    fn block_header(buf: &mut BytesMut) -> Result<Step, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Ok(Step::NeedMore);
        }
        let raw = buf.split_to(HEADER_LEN);
        let header = parse_header(&text(&deobfuscated(&raw)))?;
        Ok(Step::Goto(State::BlockBody { header }))
    }

    fn block_body(
        header: &BlockHeader,
        source: &str,
        buf: &mut BytesMut,
    ) -> Result<Step, DecodeError> {
        let body_len = header.declared_length as usize;
        if buf.len() < body_len {
            return Ok(Step::NeedMore);
        }
        let body = deobfuscated(&buf.split_to(body_len));
        let content = match header.version {
            Version::V1 => body,
            Version::V2 => inflate(&body)?,
        };

        // Validate
        if header.block_number == 0 || header.total_blocks == 0 {
            return Err(DecodeError::ZeroBlockCount);
        }
        let actual = content
            .iter()
            .fold(0u32, |sum, &b| sum.wrapping_add(b as u32));
        if actual != header.checksum {
            return Err(DecodeError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        let segment = Segment {
            filename: header.filename.clone(),
            block_number: header.block_number,
            total_blocks: header.total_blocks,
            checksum: header.checksum,
            timestamp: header.timestamp,
            version: header.version,
            declared_length: header.declared_length,
            content: Bytes::from(content),
            source: source.to_string(),
        };
        Ok(Step::Emit(Frame::Segment(segment), State::StartFrame))
    }
}

/// Inflate a V2 body: a two-byte zlib prefix followed by raw deflate data.
fn inflate(body: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let compressed = body.get(2..).ok_or(DecodeError::ShortCompressedBody)?;
    let mut content = Vec::with_capacity(V1_BODY_LEN);
    flate2::read::DeflateDecoder::new(compressed).read_to_end(&mut content)?;
    Ok(content)
}

/// Parse the fixed 80-byte header grammar:
///
/// ```text
/// /PF<filename>/PN<block#>/PT<total#>/CS<checksum>/FD<timestamp>[/DL<length>]\r\n
/// ```
///
/// Fields may be space-padded; the header is NUL-padded out to 80 bytes.
/// Absence of `/DL` means V1 with its fixed 1024-byte body.
fn parse_header(header: &str) -> Result<BlockHeader, DecodeError> {
    let malformed = || DecodeError::MalformedHeader(clean(header).to_string());

    let rest = header.strip_prefix("/PF").ok_or_else(malformed)?;
    let (filename, rest) = split_field(rest, "/PN").ok_or_else(malformed)?;
    let (block_number, rest) = split_field(rest, "/PT").ok_or_else(malformed)?;
    let (total_blocks, rest) = split_field(rest, "/CS").ok_or_else(malformed)?;
    let (checksum, rest) = split_field(rest, "/FD").ok_or_else(malformed)?;
    let (timestamp, length) = match rest.find("/DL") {
        Some(at) => (&rest[..at], Some(&rest[at + 3..])),
        None => (rest, None),
    };

    let filename = clean(filename).to_uppercase();
    if filename.is_empty() {
        return Err(malformed());
    }
    let block_number = parse_u32(block_number).ok_or_else(malformed)?;
    let total_blocks = parse_u32(total_blocks).ok_or_else(malformed)?;
    let checksum = parse_u32(checksum).ok_or_else(malformed)?;
    let timestamp = Timestamp::parse(clean(timestamp)).ok_or_else(malformed)?;

    let (version, declared_length) = match length {
        None => (Version::V1, V1_BODY_LEN as u32),
        Some(length) => {
            let length = parse_u32(length).ok_or_else(malformed)?;
            if !(1..=V1_BODY_LEN as u32).contains(&length) {
                return Err(DecodeError::LengthOutOfRange(length));
            }
            (Version::V2, length)
        }
    };

    Ok(BlockHeader {
        filename,
        block_number,
        total_blocks,
        checksum,
        timestamp,
        version,
        declared_length,
    })
}

fn split_field<'a>(header: &'a str, tag: &str) -> Option<(&'a str, &'a str)> {
    let at = header.find(tag)?;
    Some((&header[..at], &header[at + tag.len()..]))
}

fn parse_u32(field: &str) -> Option<u32> {
    clean(field).parse().ok()
}

fn clean(field: &str) -> &str {
    field.trim_matches(|c: char| c.is_whitespace() || c == '\0' || c == '\u{FFFD}')
}
