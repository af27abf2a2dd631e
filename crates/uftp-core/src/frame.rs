//! Frame encoding and decoding for the UFTP wire protocol.
//!
//! Control frames are an ASCII tag optionally followed by `\0`-separated
//! fields. Chunk frames carry a fixed binary header:
//!
//! ```text
//! "FILE\0" (5) | digest (32, raw) | index (u32 BE) | length (u32 BE) | payload
//! ```
//!
//! Frames here never include the checksum trailer; see [`crate::checksum`].

use crate::CHUNK_HEADER_SIZE;
use crate::error::FrameError;
use std::fmt;
use uftp_files::Digest;
use uftp_files::hasher::{DIGEST_HEX_LEN, DIGEST_SIZE};

const FIELD_SEPARATOR: u8 = 0;
const CHUNK_PREFIX: &[u8] = b"FILE\0";
const DIGEST_OFFSET: usize = CHUNK_PREFIX.len();
const INDEX_OFFSET: usize = DIGEST_OFFSET + DIGEST_SIZE;
const LENGTH_OFFSET: usize = INDEX_OFFSET + 4;

/// Resend frames: `RE\0` + 64 hex + `\0` + 4 raw index bytes
const RESEND_SIZE: usize = 3 + DIGEST_HEX_LEN + 1 + 4;

/// Frame tags as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameTag {
    /// Open a session
    Connect,
    /// Close the session
    Exit,
    /// Working directory query
    Pwd,
    /// Directory listing
    Ls,
    /// Change directory
    Cd,
    /// Download request
    Get,
    /// Download announcement
    GetReady,
    /// Upload announcement
    Put,
    /// File data chunk
    File,
    /// Resend from an index
    Resend,
    /// Acknowledgement
    Ok,
    /// Integrity failure report
    Fail,
    /// Command result
    Res,
    /// Command failure
    Err,
}

impl FrameTag {
    /// Wire spelling of the tag
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Connect => b"CONNECT",
            Self::Exit => b"EXIT",
            Self::Pwd => b"PWD",
            Self::Ls => b"LS",
            Self::Cd => b"CD",
            Self::Get => b"GET",
            Self::GetReady => b"GETR",
            Self::Put => b"PUT",
            Self::File => b"FILE",
            Self::Resend => b"RE",
            Self::Ok => b"OK",
            Self::Fail => b"FAIL",
            Self::Res => b"RES",
            Self::Err => b"ERR",
        }
    }

    /// Wire spelling as a string
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Exit => "EXIT",
            Self::Pwd => "PWD",
            Self::Ls => "LS",
            Self::Cd => "CD",
            Self::Get => "GET",
            Self::GetReady => "GETR",
            Self::Put => "PUT",
            Self::File => "FILE",
            Self::Resend => "RE",
            Self::Ok => "OK",
            Self::Fail => "FAIL",
            Self::Res => "RES",
            Self::Err => "ERR",
        }
    }
}

impl TryFrom<&[u8]> for FrameTag {
    type Error = FrameError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            b"CONNECT" => Ok(Self::Connect),
            b"EXIT" => Ok(Self::Exit),
            b"PWD" => Ok(Self::Pwd),
            b"LS" => Ok(Self::Ls),
            b"CD" => Ok(Self::Cd),
            b"GET" => Ok(Self::Get),
            b"GETR" => Ok(Self::GetReady),
            b"PUT" => Ok(Self::Put),
            b"FILE" => Ok(Self::File),
            b"RE" => Ok(Self::Resend),
            b"OK" => Ok(Self::Ok),
            b"FAIL" => Ok(Self::Fail),
            b"RES" => Ok(Self::Res),
            b"ERR" => Ok(Self::Err),
            other => Err(FrameError::UnknownTag(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

impl fmt::Display for FrameTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of a file body in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// Digest of the whole file this chunk belongs to
    pub digest: Digest,
    /// Zero-based chunk index
    pub index: u32,
    /// Chunk bytes
    pub payload: Vec<u8>,
}

impl FileChunk {
    /// Payload length as carried in the header
    pub fn length(&self) -> usize {
        self.payload.len()
    }

    /// Encode as a chunk frame
    pub fn encode(&self) -> Vec<u8> {
        encode_chunk(&self.digest, self.index, &self.payload)
    }

    /// Decode a chunk frame.
    ///
    /// The payload is exactly the header's length; any bytes after it are
    /// ignored.
    ///
    /// # Errors
    /// Returns `FrameError` if the header is short, the prefix is wrong or the
    /// declared length runs past the end of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < CHUNK_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: CHUNK_HEADER_SIZE,
                actual: data.len(),
            });
        }
        if !data.starts_with(CHUNK_PREFIX) {
            return Err(FrameError::UnknownTag(
                String::from_utf8_lossy(&data[..CHUNK_PREFIX.len()]).into_owned(),
            ));
        }

        let digest = Digest::from_slice(&data[DIGEST_OFFSET..INDEX_OFFSET])?;
        let index = read_u32(&data[INDEX_OFFSET..LENGTH_OFFSET], "index")?;
        let length = read_u32(&data[LENGTH_OFFSET..CHUNK_HEADER_SIZE], "length")? as usize;

        let available = data.len() - CHUNK_HEADER_SIZE;
        if length > available {
            return Err(FrameError::PayloadOverflow {
                declared: length,
                available,
            });
        }

        Ok(Self {
            digest,
            index,
            payload: data[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + length].to_vec(),
        })
    }
}

/// Encode a chunk frame without building a [`FileChunk`]
pub fn encode_chunk(digest: &Digest, index: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHUNK_HEADER_SIZE + payload.len());
    buf.extend_from_slice(CHUNK_PREFIX);
    buf.extend_from_slice(digest.as_bytes());
    buf.extend_from_slice(&index.to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Decode a chunk frame
///
/// # Errors
/// See [`FileChunk::decode`].
pub fn decode_chunk(data: &[u8]) -> Result<FileChunk, FrameError> {
    FileChunk::decode(data)
}

/// A decoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `CONNECT`
    Connect,
    /// `EXIT`
    Exit,
    /// `PWD`
    Pwd,
    /// `LS`
    Ls,
    /// `CD\0<path>`
    Cd {
        /// Target directory, relative to the working directory or absolute
        path: String,
    },
    /// `GET\0<path>`
    Get {
        /// Remote file path
        path: String,
    },
    /// `GETR\0<filename>\0<hex>\0<size>`
    GetReady {
        /// Base name of the file being sent
        filename: String,
        /// Digest of the file body
        digest: Digest,
        /// File size in bytes
        size: u64,
    },
    /// `PUT\0<filename>\0<hex>\0<size>`
    Put {
        /// Base name of the file being uploaded
        filename: String,
        /// Digest of the file body
        digest: Digest,
        /// File size in bytes
        size: u64,
    },
    /// Binary chunk frame
    FileChunk(FileChunk),
    /// `RE\0<hex>\0<u32 BE>`
    Resend {
        /// Transfer digest
        digest: Digest,
        /// First index to stream again
        index: u32,
    },
    /// `OK` or `OK\0<hex>`
    Ack {
        /// Transfer digest, absent for command acknowledgements
        digest: Option<Digest>,
    },
    /// `FAIL\0<hex>`
    Fail {
        /// Digest of the rejected transfer
        digest: Digest,
    },
    /// `RES\0<body>`
    Reply {
        /// Command output
        body: String,
    },
    /// `ERR\0<message>`
    Error {
        /// Failure reason
        message: String,
    },
}

impl Frame {
    /// Tag of this frame
    pub fn tag(&self) -> FrameTag {
        match self {
            Self::Connect => FrameTag::Connect,
            Self::Exit => FrameTag::Exit,
            Self::Pwd => FrameTag::Pwd,
            Self::Ls => FrameTag::Ls,
            Self::Cd { .. } => FrameTag::Cd,
            Self::Get { .. } => FrameTag::Get,
            Self::GetReady { .. } => FrameTag::GetReady,
            Self::Put { .. } => FrameTag::Put,
            Self::FileChunk(_) => FrameTag::File,
            Self::Resend { .. } => FrameTag::Resend,
            Self::Ack { .. } => FrameTag::Ok,
            Self::Fail { .. } => FrameTag::Fail,
            Self::Reply { .. } => FrameTag::Res,
            Self::Error { .. } => FrameTag::Err,
        }
    }

    /// Encode to wire bytes (without checksum trailer)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.tag().as_bytes().to_vec();
        match self {
            Self::FileChunk(chunk) => return chunk.encode(),
            Self::Connect | Self::Exit | Self::Pwd | Self::Ls | Self::Ack { digest: None } => {}
            Self::Cd { path } | Self::Get { path } => push_field(&mut buf, path.as_bytes()),
            Self::GetReady {
                filename,
                digest,
                size,
            }
            | Self::Put {
                filename,
                digest,
                size,
            } => {
                push_field(&mut buf, filename.as_bytes());
                push_field(&mut buf, digest.to_hex().as_bytes());
                push_field(&mut buf, size.to_string().as_bytes());
            }
            Self::Resend { digest, index } => {
                push_field(&mut buf, digest.to_hex().as_bytes());
                push_field(&mut buf, &index.to_be_bytes());
            }
            Self::Ack {
                digest: Some(digest),
            }
            | Self::Fail { digest } => push_field(&mut buf, digest.to_hex().as_bytes()),
            Self::Reply { body } => push_field(&mut buf, body.as_bytes()),
            Self::Error { message } => push_field(&mut buf, message.as_bytes()),
        }
        buf
    }

    /// Decode wire bytes (checksum trailer already stripped)
    ///
    /// # Errors
    /// Returns `FrameError` for unknown tags and malformed fields.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.is_empty() {
            return Err(FrameError::TooShort {
                expected: 1,
                actual: 0,
            });
        }
        if data.starts_with(CHUNK_PREFIX) {
            return FileChunk::decode(data).map(Self::FileChunk);
        }

        let (tag_bytes, rest) = match data.iter().position(|&b| b == FIELD_SEPARATOR) {
            Some(pos) => (&data[..pos], Some(&data[pos + 1..])),
            None => (data, None),
        };
        let tag = FrameTag::try_from(tag_bytes)?;

        match tag {
            FrameTag::Connect => Ok(Self::Connect),
            FrameTag::Exit => Ok(Self::Exit),
            FrameTag::Pwd => Ok(Self::Pwd),
            FrameTag::Ls => Ok(Self::Ls),
            FrameTag::Cd => Ok(Self::Cd {
                path: text(required(rest, "path")?, "path")?,
            }),
            FrameTag::Get => Ok(Self::Get {
                path: text(required(rest, "path")?, "path")?,
            }),
            FrameTag::GetReady => {
                let (filename, digest, size) = file_announcement(rest)?;
                Ok(Self::GetReady {
                    filename,
                    digest,
                    size,
                })
            }
            FrameTag::Put => {
                let (filename, digest, size) = file_announcement(rest)?;
                Ok(Self::Put {
                    filename,
                    digest,
                    size,
                })
            }
            FrameTag::Resend => decode_resend(data),
            FrameTag::Ok => match rest {
                None => Ok(Self::Ack { digest: None }),
                Some(field) => Ok(Self::Ack {
                    digest: Some(hex_digest(field)?),
                }),
            },
            FrameTag::Fail => Ok(Self::Fail {
                digest: hex_digest(required(rest, "digest")?)?,
            }),
            FrameTag::Res => Ok(Self::Reply {
                body: text(rest.unwrap_or_default(), "body")?,
            }),
            FrameTag::Err => Ok(Self::Error {
                message: text(rest.unwrap_or_default(), "message")?,
            }),
            // "FILE" without the separator is too short for a header
            FrameTag::File => Err(FrameError::TooShort {
                expected: CHUNK_HEADER_SIZE,
                actual: data.len(),
            }),
        }
    }
}

fn push_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.push(FIELD_SEPARATOR);
    buf.extend_from_slice(field);
}

fn required<'a>(field: Option<&'a [u8]>, name: &'static str) -> Result<&'a [u8], FrameError> {
    match field {
        Some(bytes) if !bytes.is_empty() => Ok(bytes),
        _ => Err(FrameError::MissingField(name)),
    }
}

fn text(bytes: &[u8], name: &'static str) -> Result<String, FrameError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| FrameError::InvalidUtf8(name))
}

fn hex_digest(bytes: &[u8]) -> Result<Digest, FrameError> {
    let hex = std::str::from_utf8(bytes).map_err(|_| FrameError::InvalidUtf8("digest"))?;
    Ok(Digest::from_hex(hex)?)
}

fn read_u32(bytes: &[u8], name: &'static str) -> Result<u32, FrameError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| FrameError::InvalidNumber(name))?;
    Ok(u32::from_be_bytes(raw))
}

fn file_announcement(rest: Option<&[u8]>) -> Result<(String, Digest, u64), FrameError> {
    let mut fields = required(rest, "filename")?.splitn(3, |&b| b == FIELD_SEPARATOR);

    let filename = text(required(fields.next(), "filename")?, "filename")?;
    let digest = hex_digest(required(fields.next(), "digest")?)?;
    let size = text(required(fields.next(), "size")?, "size")?
        .parse::<u64>()
        .map_err(|_| FrameError::InvalidNumber("size"))?;

    Ok((filename, digest, size))
}

/// The index is four raw bytes that may contain `\0`, so `RE` frames are
/// parsed by position rather than by splitting.
fn decode_resend(data: &[u8]) -> Result<Frame, FrameError> {
    if data.len() < RESEND_SIZE {
        return Err(FrameError::TooShort {
            expected: RESEND_SIZE,
            actual: data.len(),
        });
    }
    let hex_end = 3 + DIGEST_HEX_LEN;
    if data[hex_end] != FIELD_SEPARATOR {
        return Err(FrameError::MissingField("index"));
    }

    Ok(Frame::Resend {
        digest: hex_digest(&data[3..hex_end])?,
        index: read_u32(&data[hex_end + 1..RESEND_SIZE], "index")?,
    })
}
