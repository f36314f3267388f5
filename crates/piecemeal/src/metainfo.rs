//! Metainfo is a .torrent file with information about the payload.
//!
//! Decoding happens in two steps: the raw buffer becomes a [`Value`] tree,
//! which is then projected into [`MetaInfo`]. Any shape that would lead to a
//! wrong piece geometry is rejected here with a [`MetafileError`].
use std::{fmt, ops::Range, path::PathBuf};

use thiserror::Error;

use crate::bencode::{BencodeError, Value};

/// Length in bytes of a SHA-1 digest, and of each entry of `info.pieces`.
pub const HASH_LEN: usize = 20;

/// Largest `piece length` accepted, 256 MiB. A piece is read whole into
/// memory while matching.
pub const MAX_PIECE_LENGTH: u64 = 256 * 1024 * 1024;

/// The metafile is malformed or incomplete.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetafileError {
    #[error("Failed to decode the bencode buffer: {0}")]
    Bencode(#[from] BencodeError),

    #[error("Missing required key `{0}`")]
    MissingKey(&'static str),

    #[error("The key `{0}` has an unexpected type")]
    WrongType(&'static str),

    #[error("The key `{0}` must not be negative")]
    Negative(&'static str),

    #[error("`piece length` must be greater than zero")]
    ZeroPieceLength,

    #[error("`piece length` of {0} bytes is larger than 256 MiB")]
    PieceLengthTooLarge(u64),

    #[error("`pieces` has {0} bytes, which is not a multiple of 20")]
    PiecesLength(usize),

    #[error("The info has both `length` and `files`, only one is allowed")]
    AmbiguousLayout,

    #[error("The file at position {0} of `files` has an empty path")]
    EmptyPath(usize),

    #[error("The sum of the file lengths does not fit in 64 bits")]
    PayloadTooLarge,

    #[error("The torrent describes an empty payload")]
    EmptyPayload,

    #[error(
        "The payload needs {expected} pieces but `pieces` has {actual} hashes"
    )]
    PieceCount { expected: u64, actual: u64 },
}

/// A SHA-1 digest. Comparison is always on the raw bytes, hex is only used
/// for display.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Sha1Hash(pub [u8; HASH_LEN]);

impl Sha1Hash {
    pub fn digest(buf: &[u8]) -> Self {
        Self(sha1_smol::Sha1::from(buf).digest().bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; HASH_LEN]> for Sha1Hash {
    fn from(value: [u8; HASH_LEN]) -> Self {
        Self(value)
    }
}

impl fmt::Display for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Hash({})", self.to_hex())
    }
}

/// The decoded .torrent file.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct MetaInfo {
    pub announce: Option<String>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub info: Info,
}

impl MetaInfo {
    /// Decode a bencoded .torrent buffer.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, MetafileError> {
        let value = Value::decode(buf)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, MetafileError> {
        if value.as_dict().is_none() {
            return Err(MetafileError::WrongType("<root>"));
        }

        let info = Info::from_value(required(value, "info")?)?;

        Ok(Self {
            announce: optional_string(value, "announce"),
            comment: optional_string(value, "comment"),
            created_by: optional_string(value, "created by"),
            info,
        })
    }
}

/// File related information.
///
/// In a single file torrent `file_length` is some and `name` is the name of
/// the file, in a multi file torrent `files` is some and `name` is the name
/// of the root directory.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Info {
    pub name: String,

    /// Length in bytes of each piece, the last piece may be shorter.
    pub piece_length: u64,

    /// One SHA-1 hash per piece, in payload order.
    pub pieces: Vec<Sha1Hash>,

    pub file_length: Option<u64>,

    pub files: Option<Vec<File>>,

    /// SHA-1 of the canonical encoding of the info dictionary.
    pub info_hash: Sha1Hash,
}

impl Info {
    pub fn from_value(value: &Value) -> Result<Self, MetafileError> {
        if value.as_dict().is_none() {
            return Err(MetafileError::WrongType("info"));
        }

        let name = string(required(value, "name")?, "name")?;

        let piece_length =
            length(required(value, "piece length")?, "piece length")?;
        if piece_length == 0 {
            return Err(MetafileError::ZeroPieceLength);
        }
        if piece_length > MAX_PIECE_LENGTH {
            return Err(MetafileError::PieceLengthTooLarge(piece_length));
        }

        let pieces = required(value, "pieces")?
            .as_bytes()
            .ok_or(MetafileError::WrongType("pieces"))?;
        if pieces.len() % HASH_LEN != 0 {
            return Err(MetafileError::PiecesLength(pieces.len()));
        }
        let pieces: Vec<Sha1Hash> = pieces
            .chunks_exact(HASH_LEN)
            .map(|chunk| {
                let mut hash = [0u8; HASH_LEN];
                hash.copy_from_slice(chunk);
                Sha1Hash(hash)
            })
            .collect();

        let (file_length, files) =
            match (value.get(b"length"), value.get(b"files")) {
                (Some(l), None) => (Some(length(l, "length")?), None),
                (None, Some(f)) => (None, Some(File::list_from_value(f)?)),
                (Some(_), Some(_)) => {
                    return Err(MetafileError::AmbiguousLayout)
                }
                (None, None) => return Err(MetafileError::MissingKey("length")),
            };

        // the decoder rejects unsorted keys and non canonical integers, so
        // the re-encoded dictionary is byte for byte the one in the file.
        let info_hash = Sha1Hash::digest(&value.to_bytes()?);

        let info =
            Self { name, piece_length, pieces, file_length, files, info_hash };

        let payload_size = info.checked_payload_size()?;
        if payload_size == 0 {
            return Err(MetafileError::EmptyPayload);
        }

        let expected = payload_size.div_ceil(piece_length);
        let actual = info.pieces.len() as u64;
        if expected != actual {
            return Err(MetafileError::PieceCount { expected, actual });
        }

        Ok(info)
    }

    fn checked_payload_size(&self) -> Result<u64, MetafileError> {
        match &self.files {
            Some(files) => files.iter().try_fold(0_u64, |acc, f| {
                acc.checked_add(f.length).ok_or(MetafileError::PayloadTooLarge)
            }),
            None => Ok(self.file_length.unwrap_or(0)),
        }
    }

    /// Size in bytes of the whole payload, all files concatenated.
    pub fn payload_size(&self) -> u64 {
        match &self.files {
            Some(files) => files.iter().map(|f| f.length).sum(),
            None => self.file_length.unwrap_or(0),
        }
    }

    /// How many pieces there are.
    #[inline]
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// `payload_size mod piece_length`. Zero means the payload is evenly
    /// divisible and the last piece is a full one.
    #[inline]
    pub fn final_piece_size(&self) -> u64 {
        self.payload_size() % self.piece_length
    }

    /// Size in bytes of the last piece.
    pub fn last_piece_size(&self) -> u64 {
        match self.final_piece_size() {
            0 => self.piece_length,
            remainder => remainder,
        }
    }

    /// Size in bytes of the piece with the 1-based `index`.
    pub fn piece_size(&self, index: usize) -> u64 {
        if index == self.piece_count() {
            self.last_piece_size()
        } else {
            self.piece_length
        }
    }

    pub fn is_multi_file(&self) -> bool {
        self.files.is_some()
    }

    /// The files of the payload, with their ranges in the logical stream.
    ///
    /// Multi file torrents are read as if all files were concatenated in the
    /// order they are listed.
    pub fn payload_files(&self) -> Vec<PayloadFile> {
        let Some(files) = &self.files else {
            return vec![PayloadFile {
                index: 0,
                path: PathBuf::from(&self.name),
                length: self.file_length.unwrap_or(0),
                offset: 0,
            }];
        };

        let mut offset = 0_u64;

        files
            .iter()
            .enumerate()
            .map(|(index, file)| {
                let mut path = PathBuf::from(&self.name);
                path.extend(&file.path);

                let payload_file =
                    PayloadFile { index, path, length: file.length, offset };
                offset += file.length;
                payload_file
            })
            .collect()
    }
}

/// An entry of `info.files`.
///
/// The path is relative to the root folder name, which is not included.
#[derive(Debug, PartialEq, Clone, Default, Hash, Eq)]
pub struct File {
    pub length: u64,
    pub path: Vec<String>,
}

impl File {
    fn list_from_value(value: &Value) -> Result<Vec<Self>, MetafileError> {
        let list = value.as_list().ok_or(MetafileError::WrongType("files"))?;

        list.iter()
            .enumerate()
            .map(|(i, entry)| {
                if entry.as_dict().is_none() {
                    return Err(MetafileError::WrongType("files"));
                }

                let length = length(required(entry, "length")?, "length")?;

                let path = required(entry, "path")?
                    .as_list()
                    .ok_or(MetafileError::WrongType("path"))?
                    .iter()
                    .map(|c| string(c, "path"))
                    .collect::<Result<Vec<String>, _>>()?;

                if path.is_empty() || path.iter().any(String::is_empty) {
                    return Err(MetafileError::EmptyPath(i));
                }

                Ok(Self { length, path })
            })
            .collect()
    }
}

/// A file of the payload placed in the logical stream.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PayloadFile {
    /// Position in the torrent's file list.
    pub index: usize,
    /// Path relative to the download directory, including the torrent name
    /// for multi file torrents.
    pub path: PathBuf,
    pub length: u64,
    /// Offset of the first byte of this file in the logical stream.
    pub offset: u64,
}

impl PayloadFile {
    /// Exclusive end of this file in the logical stream.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    #[inline]
    pub fn range(&self) -> Range<u64> {
        self.offset..self.end()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

fn required<'a>(
    dict: &'a Value,
    key: &'static str,
) -> Result<&'a Value, MetafileError> {
    dict.get(key.as_bytes()).ok_or(MetafileError::MissingKey(key))
}

fn length(value: &Value, key: &'static str) -> Result<u64, MetafileError> {
    let i = value.as_integer().ok_or(MetafileError::WrongType(key))?;
    u64::try_from(i).map_err(|_| MetafileError::Negative(key))
}

fn string(value: &Value, key: &'static str) -> Result<String, MetafileError> {
    value.as_str().map(str::to_owned).ok_or(MetafileError::WrongType(key))
}

fn optional_string(dict: &Value, key: &str) -> Option<String> {
    dict.get(key.as_bytes()).and_then(Value::as_str).map(str::to_owned)
}
