use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Which member of a shapefile set an error or warning refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Shp,
    Shx,
    Dbf,
    Prj,
    Cpg,
}

impl FileKind {
    pub fn extension(&self) -> &'static str {
        match *self {
            FileKind::Shp => "shp",
            FileKind::Shx => "shx",
            FileKind::Dbf => "dbf",
            FileKind::Prj => "prj",
            FileKind::Cpg => "cpg",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, ".{}", self.extension())
    }
}

#[derive(Debug, Error)]
pub enum ShapefileError {
    #[error("I/O error on {}: {source}", .file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{file} file has wrong file code: found {found}, expected 9994")]
    NotAShapefile { file: FileKind, found: i32 },

    #[error(".dbf file has unsupported version byte 0x{found:02X}, expected 0x03")]
    UnsupportedVersion { found: u8 },

    #[error("{file} header is corrupt at byte {offset}: {message}")]
    CorruptHeader {
        file: FileKind,
        offset: usize,
        message: String,
    },

    #[error("{file} file is truncated: header needs {expected} bytes, file has {actual}")]
    TruncatedFile {
        file: FileKind,
        expected: usize,
        actual: usize,
    },

    #[error("record counts disagree: .dbf has {dbf}, .shp has {shp}, .shx has {shx}")]
    RecordMismatch { dbf: usize, shp: usize, shx: usize },

    #[error("{file} record {} has unsupported shape type {shape_type}", .record.map(|r| r.to_string()).unwrap_or_else(|| "header".to_string()))]
    UnsupportedShapeType {
        file: FileKind,
        record: Option<usize>,
        shape_type: i32,
    },

    #[error(".dbf field {field:?} has unsupported type {type_code:?}")]
    UnsupportedFieldType { field: String, type_code: char },

    #[error("invalid field {name:?}: {message}")]
    InvalidField { name: String, message: String },

    #[error("invalid selection: {message}")]
    InvalidSelection { message: String },
}

impl ShapefileError {
    pub(crate) fn corrupt<S: Into<String>>(file: FileKind, offset: usize, message: S) -> ShapefileError {
        ShapefileError::CorruptHeader {
            file: file,
            offset: offset,
            message: message.into(),
        }
    }

    pub(crate) fn io<P: Into<PathBuf>>(file: P, source: io::Error) -> ShapefileError {
        ShapefileError::Io {
            file: file.into(),
            source: source,
        }
    }
}

/// A text value that didn't survive the code page intact: on read, the
/// replacement character was substituted; on write, unencodable characters
/// were dropped.
///
/// These never abort a read or write. Cadastral exports routinely mix
/// encodings, so they're collected per table or per write and logged once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingFallback {
    /// 0-based record position, or `None` for the field descriptors.
    pub record: Option<usize>,
    pub field: String,
}

impl fmt::Display for EncodingFallback {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.record {
            Some(record) => write!(f, "record {} field {}", record, self.field),
            None => write!(f, "field descriptor {}", self.field),
        }
    }
}
