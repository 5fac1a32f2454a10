//! Reads and writes dBase III ".dbf" attribute tables, as per
//! https://www.clicketyclick.dk/databases/xbase/format/dbf.html
//!
//! Only version 0x03 (no memo file) is supported. Every value is kept as the
//! string found in the file: Korean cadastral exports put placeholder text in
//! Numeric fields often enough that parsing numbers is left to the caller.

use std::fmt;
use std::fs;
use std::path::Path;
use super::cursor::{ByteCursor, ByteWriter};
use super::error::{EncodingFallback, FileKind, ShapefileError};
use super::text::{Justify, TextCodec};

const DBF_VERSION: u8 = 0x03;
const DBF_HEADER_LENGTH: usize = 32;
const DBF_FIELD_DESCRIPTOR_LENGTH: usize = 32;
const DBF_FIELD_NAME_LENGTH: usize = 11;
const DBF_HEADER_TERMINATOR: u8 = 0x0d;
const DBF_EOF: u8 = 0x1a;
const DBF_ACTIVE: u8 = b' ';
const DBF_DELETED: u8 = b'*';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Character,
    Numeric,
    Float,
    Date,
    Logical,
}

impl FieldType {
    pub fn from_code(code: u8) -> Option<FieldType> {
        match code {
            b'C' => Some(FieldType::Character),
            b'N' => Some(FieldType::Numeric),
            b'F' => Some(FieldType::Float),
            b'D' => Some(FieldType::Date),
            b'L' => Some(FieldType::Logical),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match *self {
            FieldType::Character => b'C',
            FieldType::Numeric => b'N',
            FieldType::Float => b'F',
            FieldType::Date => b'D',
            FieldType::Logical => b'L',
        }
    }

    fn justify(&self) -> Justify {
        match *self {
            FieldType::Numeric | FieldType::Float => Justify::Right,
            _ => Justify::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub length: u8,
    pub decimal_count: u8,
}

impl FieldDescriptor {
    pub fn new(name: &str, field_type: FieldType, length: u8, decimal_count: u8) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            field_type: field_type,
            length: length,
            decimal_count: decimal_count,
        }
    }

    pub fn character(name: &str, length: u8) -> FieldDescriptor {
        FieldDescriptor::new(name, FieldType::Character, length, 0)
    }

    pub fn numeric(name: &str, length: u8, decimal_count: u8) -> FieldDescriptor {
        FieldDescriptor::new(name, FieldType::Numeric, length, decimal_count)
    }

    /// YYYYMMDD
    pub fn date(name: &str) -> FieldDescriptor {
        FieldDescriptor::new(name, FieldType::Date, 8, 0)
    }

    pub fn logical(name: &str) -> FieldDescriptor {
        FieldDescriptor::new(name, FieldType::Logical, 1, 0)
    }

    /// Checks the name fits the 11-byte ASCII slot and the width is nonzero.
    fn validate(&self) -> Result<(), ShapefileError> {
        let invalid = |message: &str| Err(ShapefileError::InvalidField {
            name: self.name.clone(),
            message: message.to_string(),
        });

        if self.name.is_empty() {
            return invalid("name is empty");
        }
        if !self.name.is_ascii() || self.name.bytes().any(|b| b == 0) {
            return invalid("name must be ASCII without NUL bytes");
        }
        if self.name.len() > DBF_FIELD_NAME_LENGTH {
            return invalid("name is longer than 11 bytes");
        }
        if self.length == 0 {
            return invalid("length must be at least 1");
        }
        Ok(())
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}({},{})", self.name, self.field_type.code() as char, self.length, self.decimal_count)
    }
}

/// One row. `values[i]` belongs to the table's `fields()[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub deleted: bool,
    pub values: Vec<String>,
}

impl Record {
    pub fn new(values: Vec<String>) -> Record {
        Record {
            deleted: false,
            values: values,
        }
    }
}

/// A record viewed through its table's field list, so values can be looked
/// up by name.
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'a> {
    index: usize,
    fields: &'a [FieldDescriptor],
    record: &'a Record,
}

impl<'a> RecordRef<'a> {
    /// Position in the table, which is also the position of the paired
    /// geometry.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn deleted(&self) -> bool {
        self.record.deleted
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        find_field(self.fields, name).map(|i| self.record.values[i].as_str())
    }

    pub fn values(&self) -> &'a [String] {
        &self.record.values
    }

    /// (field name, value) pairs in declared order.
    pub fn iter(&self) -> impl Iterator<Item=(&'a str, &'a str)> + 'a {
        self.fields.iter().zip(self.record.values.iter()).map(|(f, v)| (f.name.as_str(), v.as_str()))
    }

    pub fn record(&self) -> &'a Record {
        self.record
    }
}

fn find_field(fields: &[FieldDescriptor], name: &str) -> Option<usize> {
    fields.iter().position(|f| f.name == name)
        .or_else(|| fields.iter().position(|f| f.name.eq_ignore_ascii_case(name)))
}

/// An in-memory ".dbf" table.
///
/// Soft-deleted records are always kept, so record `i` stays paired with
/// geometry `i`; `include_deleted` only decides whether `records()` shows
/// them.
///
/// Records read from a file keep their field bytes, and writing re-emits
/// those bytes instead of re-encoding the decoded text. A value that was cut
/// mid-character, or that isn't valid in the code page, therefore survives a
/// read and write unchanged.
#[derive(Debug, Clone)]
pub struct DbfTable {
    fields: Vec<FieldDescriptor>,
    records: Vec<Record>,
    /// Bytes of the first `raw_field_count` fields of each record, as read.
    /// `None` for records built in memory.
    raw: Vec<Option<Vec<u8>>>,
    raw_field_count: usize,
    codec: TextCodec,
    language_driver: u8,
    last_update: [u8; 3],
    include_deleted: bool,
    warnings: Vec<EncodingFallback>,
}

impl DbfTable {
    /// Creates an empty table.
    pub fn new(fields: Vec<FieldDescriptor>, codec: TextCodec) -> Result<DbfTable, ShapefileError> {
        for (i, field) in fields.iter().enumerate() {
            field.validate()?;
            if find_field(&fields[..i], &field.name).is_some() {
                return Err(ShapefileError::InvalidField {
                    name: field.name.clone(),
                    message: "duplicate field name".to_string(),
                });
            }
        }
        check_layout(&fields)?;

        Ok(DbfTable {
            fields: fields,
            records: vec![],
            raw: vec![],
            raw_field_count: 0,
            codec: codec,
            language_driver: codec.language_driver(),
            last_update: [ 0; 3 ],
            include_deleted: false,
            warnings: vec![],
        })
    }

    /// Parses a whole ".dbf" file.
    ///
    /// With no `codec`, the header's language driver byte picks one, falling
    /// back to CP949.
    pub fn parse(bytes: &[u8], codec: Option<TextCodec>, include_deleted: bool) -> Result<DbfTable, ShapefileError> {
        let mut cursor = ByteCursor::new(bytes, FileKind::Dbf);

        let version = cursor.u8()?;
        if version != DBF_VERSION {
            return Err(ShapefileError::UnsupportedVersion { found: version });
        }

        let mut last_update = [ 0u8; 3 ];
        last_update.copy_from_slice(cursor.take(3)?);
        let n_records = cursor.u32_le()? as usize;
        let header_length = cursor.u16_le()? as usize;
        let record_length = cursor.u16_le()? as usize;
        cursor.skip(17)?;
        let language_driver = cursor.u8()?;
        cursor.skip(2)?;

        let codec = codec
            .or_else(|| TextCodec::from_language_driver(language_driver))
            .unwrap_or_default();

        let mut warnings = Vec::<EncodingFallback>::new();
        let fields = read_fields(&mut cursor, header_length, codec, &mut warnings)?;

        let sum: usize = fields.iter().map(|f| f.length as usize).sum();
        if record_length != 1 + sum {
            return Err(ShapefileError::corrupt(FileKind::Dbf, 10, format!("record length is {}, but the {} fields need 1 + {} = {} bytes", record_length, fields.len(), sum, 1 + sum)));
        }

        let needed = header_length + n_records * record_length;
        if bytes.len() < needed {
            return Err(ShapefileError::TruncatedFile {
                file: FileKind::Dbf,
                expected: needed,
                actual: bytes.len(),
            });
        }

        let mut records = Vec::<Record>::with_capacity(n_records);
        let mut raw = Vec::<Option<Vec<u8>>>::with_capacity(n_records);
        for i in 0..n_records {
            cursor.seek(header_length + i * record_length)?;
            let deleted = cursor.u8()? == DBF_DELETED;
            let body = cursor.take(record_length - 1)?;

            let mut values = Vec::<String>::with_capacity(fields.len());
            let mut start = 0;
            for field in fields.iter() {
                let end = start + field.length as usize;
                let (value, lossy) = decode_value(codec, field, &body[start..end]);
                if lossy {
                    warnings.push(EncodingFallback { record: Some(i), field: field.name.clone() });
                }
                values.push(value);
                start = end;
            }

            records.push(Record {
                deleted: deleted,
                values: values,
            });
            raw.push(Some(body.to_vec()));
        }

        if let Some(first) = warnings.first() {
            warn!("{} .dbf values are not valid {}; substituted replacement characters (first at {})", warnings.len(), codec.label(), first);
        }
        debug!("Read .dbf: {} records, {} fields, {}", records.len(), fields.len(), codec.label());

        Ok(DbfTable {
            raw_field_count: fields.len(),
            fields: fields,
            records: records,
            raw: raw,
            codec: codec,
            language_driver: language_driver,
            last_update: last_update,
            include_deleted: include_deleted,
            warnings: warnings,
        })
    }

    pub fn open(path: &Path, codec: Option<TextCodec>, include_deleted: bool) -> Result<DbfTable, ShapefileError> {
        let bytes = fs::read(path).map_err(|err| ShapefileError::io(path, err))?;
        DbfTable::parse(&bytes, codec, include_deleted)
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a field by name; exact match first, then ASCII
    /// case-insensitive.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        find_field(&self.fields, name).map(|i| &self.fields[i])
    }

    /// Number of records in the file, deleted ones included.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn header_length(&self) -> usize {
        DBF_HEADER_LENGTH + DBF_FIELD_DESCRIPTOR_LENGTH * self.fields.len() + 1
    }

    pub fn record_length(&self) -> usize {
        1 + self.fields.iter().map(|f| f.length as usize).sum::<usize>()
    }

    pub fn codec(&self) -> TextCodec {
        self.codec
    }

    /// Changes the code page used when writing. The language driver byte
    /// follows, and every value is re-encoded on the next write.
    pub fn set_codec(&mut self, codec: TextCodec) {
        if codec != self.codec {
            self.forget_raw();
        }
        self.codec = codec;
        self.language_driver = codec.language_driver();
    }

    fn forget_raw(&mut self) {
        self.raw = vec![ None; self.records.len() ];
        self.raw_field_count = 0;
    }

    pub fn language_driver(&self) -> u8 {
        self.language_driver
    }

    pub fn include_deleted(&self) -> bool {
        self.include_deleted
    }

    pub fn set_include_deleted(&mut self, include_deleted: bool) {
        self.include_deleted = include_deleted;
    }

    /// Values that needed replacement characters while parsing.
    pub fn warnings(&self) -> &[EncodingFallback] {
        &self.warnings
    }

    /// Any record by position, deleted or not.
    pub fn record(&self, index: usize) -> Option<RecordRef> {
        self.records.get(index).map(|record| RecordRef {
            index: index,
            fields: &self.fields,
            record: record,
        })
    }

    /// Iterates records in file order, skipping deleted ones unless
    /// `include_deleted` is set.
    pub fn records<'a>(&'a self) -> impl Iterator<Item=RecordRef<'a>> + 'a {
        let include_deleted = self.include_deleted;
        let fields = &self.fields[..];
        self.records.iter().enumerate()
            .filter(move |&(_, r)| include_deleted || !r.deleted)
            .map(move |(i, r)| RecordRef { index: i, fields: fields, record: r })
    }

    /// Appends a record. It must have exactly one value per field.
    pub fn push_record(&mut self, record: Record) -> Result<(), ShapefileError> {
        if record.values.len() != self.fields.len() {
            return Err(ShapefileError::InvalidField {
                name: String::new(),
                message: format!("record has {} values, table has {} fields", record.values.len(), self.fields.len()),
            });
        }
        self.records.push(record);
        self.raw.push(None);
        Ok(())
    }

    /// Returns a table holding only the given records, in the given order.
    ///
    /// Indices must already be checked against `record_count()`.
    pub(crate) fn select(&self, indices: &[usize]) -> DbfTable {
        DbfTable {
            fields: self.fields.clone(),
            records: indices.iter().map(|&i| self.records[i].clone()).collect(),
            raw: indices.iter().map(|&i| self.raw[i].clone()).collect(),
            raw_field_count: self.raw_field_count,
            codec: self.codec,
            language_driver: self.language_driver,
            last_update: self.last_update,
            include_deleted: self.include_deleted,
            warnings: vec![],
        }
    }

    /// Adds a field to the end of the table; `value_fn` computes its value for
    /// every record, deleted ones included.
    pub fn with_additional_field<F>(mut self, descriptor: FieldDescriptor, mut value_fn: F) -> Result<DbfTable, ShapefileError>
        where F: FnMut(RecordRef) -> String
    {
        descriptor.validate()?;
        if find_field(&self.fields, &descriptor.name).is_some() {
            return Err(ShapefileError::InvalidField {
                name: descriptor.name,
                message: "a field with this name already exists".to_string(),
            });
        }

        let mut fields = self.fields.clone();
        fields.push(descriptor);
        check_layout(&fields)?;

        let values: Vec<String> = (0..self.records.len())
            .map(|i| value_fn(RecordRef { index: i, fields: &self.fields, record: &self.records[i] }))
            .collect();

        for (record, value) in self.records.iter_mut().zip(values.into_iter()) {
            record.values.push(value);
        }
        self.fields = fields;
        Ok(self)
    }

    pub fn rename_field(&mut self, from: &str, to: &str) -> Result<(), ShapefileError> {
        let index = find_field(&self.fields, from).ok_or_else(|| ShapefileError::InvalidField {
            name: from.to_string(),
            message: "no such field".to_string(),
        })?;

        let mut renamed = self.fields[index].clone();
        renamed.name = to.to_string();
        renamed.validate()?;
        if let Some(other) = find_field(&self.fields, to) {
            if other != index {
                return Err(ShapefileError::InvalidField {
                    name: to.to_string(),
                    message: "a field with this name already exists".to_string(),
                });
            }
        }

        self.fields[index] = renamed;
        Ok(())
    }

    /// Serializes the table. Header lengths and counts come from the fields
    /// and records, never from whatever file the table was read from.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_bytes_checked().0
    }

    /// Like `to_bytes()`, but also returns the values that lost characters
    /// the code page can't represent.
    pub fn to_bytes_checked(&self) -> (Vec<u8>, Vec<EncodingFallback>) {
        let mut w = ByteWriter::with_capacity(self.header_length() + self.records.len() * self.record_length() + 1);
        let mut fallbacks = Vec::<EncodingFallback>::new();

        w.u8(DBF_VERSION);
        w.bytes(&self.last_update);
        w.u32_le(self.records.len() as u32);
        w.u16_le(self.header_length() as u16);
        w.u16_le(self.record_length() as u16);
        w.zeroes(17);
        w.u8(self.language_driver);
        w.zeroes(2);

        for field in self.fields.iter() {
            let (mut name, lossy) = self.codec.encode_checked(&field.name, DBF_FIELD_NAME_LENGTH, Justify::Left);
            if lossy {
                fallbacks.push(EncodingFallback { record: None, field: field.name.clone() });
            }
            // names are NUL-padded, not space-padded
            let end = name.iter().rposition(|&b| b != b' ').map(|i| i + 1).unwrap_or(0);
            for b in name[end..].iter_mut() {
                *b = 0;
            }
            w.bytes(&name);
            w.u8(field.field_type.code());
            w.zeroes(4);
            w.u8(field.length);
            w.u8(field.decimal_count);
            w.zeroes(14);
        }
        w.u8(DBF_HEADER_TERMINATOR);

        for (i, (record, raw)) in self.records.iter().zip(self.raw.iter()).enumerate() {
            w.u8(if record.deleted { DBF_DELETED } else { DBF_ACTIVE });
            let reused = match *raw {
                Some(ref bytes) => {
                    w.bytes(bytes);
                    self.raw_field_count
                }
                None => 0,
            };
            for (field, value) in self.fields.iter().zip(record.values.iter()).skip(reused) {
                let (bytes, lossy) = self.codec.encode_checked(value, field.length as usize, field.field_type.justify());
                if lossy {
                    fallbacks.push(EncodingFallback { record: Some(i), field: field.name.clone() });
                }
                w.bytes(&bytes);
            }
        }
        w.u8(DBF_EOF);

        if let Some(first) = fallbacks.first() {
            warn!("{} .dbf values could not be encoded as {}; dropped the unencodable characters (first at {})", fallbacks.len(), self.codec.label(), first);
        }

        (w.into_inner(), fallbacks)
    }

    pub fn write(&self, path: &Path) -> Result<(), ShapefileError> {
        fs::write(path, self.to_bytes()).map_err(|err| ShapefileError::io(path, err))
    }
}

/// Reads field descriptors up to the 0x0D terminator.
///
/// Assumes the cursor is just past the 32-byte header. Leaves it just past the
/// terminator.
fn read_fields(cursor: &mut ByteCursor, header_length: usize, codec: TextCodec, warnings: &mut Vec<EncodingFallback>) -> Result<Vec<FieldDescriptor>, ShapefileError> {
    let mut fields = Vec::<FieldDescriptor>::new();

    loop {
        let pos = cursor.position();
        if pos >= header_length {
            return Err(ShapefileError::corrupt(FileKind::Dbf, 8, format!("header length is {}, but no 0x0D terminator was found before byte {}", header_length, pos)));
        }

        if cursor.peek()? == DBF_HEADER_TERMINATOR {
            cursor.skip(1)?;
            return Ok(fields);
        }

        if pos + DBF_FIELD_DESCRIPTOR_LENGTH > header_length {
            return Err(ShapefileError::corrupt(FileKind::Dbf, pos, format!("field descriptor at byte {} runs past the header length {}", pos, header_length)));
        }

        let block = cursor.take(DBF_FIELD_DESCRIPTOR_LENGTH)?;
        let name_end = block[..DBF_FIELD_NAME_LENGTH].iter().position(|&b| b == 0).unwrap_or(DBF_FIELD_NAME_LENGTH);
        let (name, lossy) = codec.decode_checked(&block[..name_end]);
        if lossy {
            warnings.push(EncodingFallback { record: None, field: name.clone() });
        }

        let type_code = block[11];
        let field_type = FieldType::from_code(type_code).ok_or_else(|| ShapefileError::UnsupportedFieldType {
            field: name.clone(),
            type_code: type_code as char,
        })?;

        fields.push(FieldDescriptor {
            name: name,
            field_type: field_type,
            length: block[16],
            decimal_count: block[17],
        });
    }
}

fn decode_value(codec: TextCodec, field: &FieldDescriptor, bytes: &[u8]) -> (String, bool) {
    let (value, lossy) = codec.decode_checked(bytes);
    match field.field_type {
        FieldType::Character => (value, lossy),
        _ => (value.trim_matches(|c| c == ' ' || c == '\0').to_string(), lossy),
    }
}

/// The header stores lengths as u16.
fn check_layout(fields: &[FieldDescriptor]) -> Result<(), ShapefileError> {
    let header_length = DBF_HEADER_LENGTH + DBF_FIELD_DESCRIPTOR_LENGTH * fields.len() + 1;
    let record_length = 1 + fields.iter().map(|f| f.length as usize).sum::<usize>();
    if header_length > u16::max_value() as usize || record_length > u16::max_value() as usize {
        return Err(ShapefileError::InvalidField {
            name: fields.last().map(|f| f.name.clone()).unwrap_or_default(),
            message: format!("table would need a {}-byte header and {}-byte records", header_length, record_length),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use byteorder::{ByteOrder, LittleEndian};
    use super::*;

    fn three_field_table() -> DbfTable {
        let mut table = DbfTable::new(vec![
            FieldDescriptor::character("PNU", 19),
            FieldDescriptor::character("JIBUN", 5),
            FieldDescriptor::character("A2", 14),
        ], TextCodec::korean()).unwrap();
        table.push_record(Record::new(vec![
            "5011025022100010000".to_string(),
            "1-12".to_string(),
            "제주시 행원리".to_string(),
        ])).unwrap();
        table.push_record(Record::new(vec![
            "50110250221000200001234".to_string(),
            "123456".to_string(),
            "행원리".to_string(),
        ])).unwrap();
        table
    }

    #[test]
    fn character_fields_are_padded_and_truncated() {
        let table = three_field_table();
        let bytes = table.to_bytes();
        assert_eq!(32 + 3 * 32 + 1 + 2 * (1 + 19 + 5 + 14) + 1, bytes.len());

        let parsed = DbfTable::parse(&bytes, None, false).unwrap();
        let values: Vec<Vec<String>> = parsed.records().map(|r| r.values().to_vec()).collect();
        assert_eq!(vec![
            vec![ "5011025022100010000".to_string(), "1-12".to_string(), "제주시 행원리".to_string() ],
            vec![ "5011025022100020000".to_string(), "12345".to_string(), "행원리".to_string() ],
        ], values);
        assert!(parsed.warnings().is_empty());
    }

    #[test]
    fn header_layout() {
        let bytes = three_field_table().to_bytes();
        assert_eq!(0x03, bytes[0]);
        assert_eq!(2, LittleEndian::read_u32(&bytes[4..8]));
        assert_eq!(32 + 3 * 32 + 1, LittleEndian::read_u16(&bytes[8..10]));
        assert_eq!(1 + 19 + 5 + 14, LittleEndian::read_u16(&bytes[10..12]));
        assert_eq!(0x79, bytes[29]);
        assert_eq!(b"PNU\0\0\0\0\0\0\0\0", &bytes[32..43]);
        assert_eq!(b'C', bytes[43]);
        assert_eq!(19, bytes[48]);
        assert_eq!(0x0d, bytes[32 + 3 * 32]);
        assert_eq!(0x1a, *bytes.last().unwrap());
    }

    #[test]
    fn numeric_fields_are_right_justified() {
        let mut table = DbfTable::new(vec![
            FieldDescriptor::numeric("A22", 8, 1),
            FieldDescriptor::date("DT"),
        ], TextCodec::korean()).unwrap();
        table.push_record(Record::new(vec![ "123.5".to_string(), "20250924".to_string() ])).unwrap();

        let bytes = table.to_bytes();
        let start = table.header_length();
        assert_eq!(b"   123.520250924", &bytes[start + 1..start + 1 + 16]);

        let parsed = DbfTable::parse(&bytes, None, false).unwrap();
        assert_eq!(Some("123.5"), parsed.record(0).unwrap().get("A22"));
        assert_eq!(Some("20250924"), parsed.record(0).unwrap().get("dt"));
    }

    #[test]
    fn deleted_records() {
        let mut table = three_field_table();
        table.push_record(Record {
            deleted: true,
            values: vec![ "x".to_string(), "y".to_string(), "z".to_string() ],
        }).unwrap();
        let bytes = table.to_bytes();
        assert_eq!(b'*', bytes[table.header_length() + 2 * table.record_length()]);

        let hidden = DbfTable::parse(&bytes, None, false).unwrap();
        assert_eq!(3, hidden.record_count());
        assert_eq!(2, hidden.records().count());

        let shown = DbfTable::parse(&bytes, None, true).unwrap();
        let last = shown.records().last().unwrap();
        assert_eq!(3, shown.records().count());
        assert!(last.deleted());
        assert_eq!(2, last.index());
        assert_eq!(Some("z"), last.get("A2"));
    }

    #[test]
    fn record_length_mismatch_is_corrupt_header() {
        let mut bytes = three_field_table().to_bytes();
        bytes[10] += 1;
        match DbfTable::parse(&bytes, None, false) {
            Err(ShapefileError::CorruptHeader { file: FileKind::Dbf, offset: 10, .. }) => {}
            other => panic!("expected CorruptHeader, got {:?}", other),
        }
    }

    #[test]
    fn short_file_is_truncated() {
        let bytes = three_field_table().to_bytes();
        match DbfTable::parse(&bytes[..bytes.len() - 10], None, false) {
            Err(ShapefileError::TruncatedFile { file: FileKind::Dbf, expected, actual }) => {
                assert_eq!(bytes.len() - 1, expected);
                assert_eq!(bytes.len() - 10, actual);
            }
            other => panic!("expected TruncatedFile, got {:?}", other),
        }
    }

    #[test]
    fn missing_eof_marker_is_fine() {
        let bytes = three_field_table().to_bytes();
        let parsed = DbfTable::parse(&bytes[..bytes.len() - 1], None, false).unwrap();
        assert_eq!(2, parsed.record_count());
    }

    #[test]
    fn unsupported_version() {
        let mut bytes = three_field_table().to_bytes();
        bytes[0] = 0x83;
        match DbfTable::parse(&bytes, None, false) {
            Err(ShapefileError::UnsupportedVersion { found: 0x83 }) => {}
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn memo_field_is_unsupported() {
        let mut bytes = three_field_table().to_bytes();
        bytes[32 + 11] = b'M';
        match DbfTable::parse(&bytes, None, false) {
            Err(ShapefileError::UnsupportedFieldType { field, type_code: 'M' }) => assert_eq!("PNU", field),
            other => panic!("expected UnsupportedFieldType, got {:?}", other),
        }
    }

    #[test]
    fn garbled_text_is_a_warning() {
        let mut table = DbfTable::new(vec![ FieldDescriptor::character("A2", 4) ], TextCodec::utf8()).unwrap();
        table.push_record(Record::new(vec![ "ok".to_string() ])).unwrap();
        let mut bytes = table.to_bytes();
        let start = table.header_length() + 1;
        bytes[start] = 0xff;

        let parsed = DbfTable::parse(&bytes, Some(TextCodec::utf8()), false).unwrap();
        assert_eq!(Some("\u{fffd}k"), parsed.record(0).unwrap().get("A2"));
        assert_eq!(&[ EncodingFallback { record: Some(0), field: "A2".to_string() } ], parsed.warnings());
    }

    #[test]
    fn additional_field() {
        let table = three_field_table();
        let header_length = table.header_length();
        let record_length = table.record_length();

        let table = table.with_additional_field(FieldDescriptor::character("CATEGORY", 10), |r| {
            if r.get("JIBUN") == Some("1-12") { "GREEN".to_string() } else { "OTHER_LONG_NAME".to_string() }
        }).unwrap();
        assert_eq!(header_length + 32, table.header_length());
        assert_eq!(record_length + 10, table.record_length());

        let bytes = table.to_bytes();
        let parsed = DbfTable::parse(&bytes, None, false).unwrap();
        assert_eq!(Some("GREEN"), parsed.record(0).unwrap().get("CATEGORY"));
        assert_eq!(Some("OTHER_LONG"), parsed.record(1).unwrap().get("CATEGORY"));
    }

    #[test]
    fn additional_field_rejects_duplicates_and_long_names() {
        match three_field_table().with_additional_field(FieldDescriptor::character("jibun", 3), |_| String::new()) {
            Err(ShapefileError::InvalidField { .. }) => {}
            other => panic!("expected InvalidField, got {:?}", other),
        }
        match three_field_table().with_additional_field(FieldDescriptor::character("TWELVE_CHARS", 3), |_| String::new()) {
            Err(ShapefileError::InvalidField { .. }) => {}
            other => panic!("expected InvalidField, got {:?}", other),
        }
    }

    #[test]
    fn rename() {
        let mut table = three_field_table();
        table.rename_field("A2", "ADDR").unwrap();
        assert_eq!(Some("행원리"), table.record(1).unwrap().get("ADDR"));
        assert!(table.rename_field("ADDR", "PNU").is_err());
        assert!(table.rename_field("NOPE", "X").is_err());
    }

    fn cut_character_table() -> DbfTable {
        let mut table = DbfTable::new(vec![ FieldDescriptor::character("A2", 5) ], TextCodec::korean()).unwrap();
        table.push_record(Record::new(vec![ "행원리".to_string() ])).unwrap();
        table
    }

    #[test]
    fn cut_character_is_rewritten_byte_for_byte() {
        let bytes = cut_character_table().to_bytes();
        let start = 32 + 32 + 1 + 1;
        assert_eq!(&[ 0xc7, 0xe0, 0xbf, 0xf8, 0xb8 ], &bytes[start..start + 5]);

        let parsed = DbfTable::parse(&bytes, None, false).unwrap();
        assert_eq!(Some("행원\u{fffd}"), parsed.record(0).unwrap().get("A2"));
        assert_eq!(1, parsed.warnings().len());
        assert_eq!(bytes, parsed.to_bytes());

        // an added field leaves the bytes already read alone
        let extended = parsed.with_additional_field(FieldDescriptor::character("CATEGORY", 3), |_| "RED".to_string()).unwrap();
        let extended_bytes = extended.to_bytes();
        let start = extended.header_length() + 1;
        assert_eq!(b"\xc7\xe0\xbf\xf8\xb8RED", &extended_bytes[start..start + 8]);
    }

    #[test]
    fn new_codec_reencodes_values() {
        let bytes = cut_character_table().to_bytes();
        let mut parsed = DbfTable::parse(&bytes, None, false).unwrap();

        parsed.set_codec(TextCodec::korean());
        assert_eq!(bytes, parsed.to_bytes());

        parsed.set_codec(TextCodec::utf8());
        let (reencoded, _) = parsed.to_bytes_checked();
        let start = parsed.header_length() + 1;
        // "행" is 3 bytes in UTF-8
        assert_eq!(&[ 0xed, 0x96, 0x89, 0xec, 0x9b ], &reencoded[start..start + 5]);
    }

    #[test]
    fn unencodable_values_are_reported_on_write() {
        let mut table = DbfTable::new(vec![
            FieldDescriptor::character("A1", 4),
            FieldDescriptor::character("A2", 4),
        ], TextCodec::with_encoding(encoding::all::WINDOWS_1252)).unwrap();
        table.push_record(Record::new(vec![ "ok".to_string(), "ok".to_string() ])).unwrap();
        table.push_record(Record::new(vec![ "ok".to_string(), "a행b".to_string() ])).unwrap();

        let (bytes, fallbacks) = table.to_bytes_checked();
        assert_eq!(vec![ EncodingFallback { record: Some(1), field: "A2".to_string() } ], fallbacks);
        let start = table.header_length() + table.record_length() + 1 + 4;
        assert_eq!(b"ab  ", &bytes[start..start + 4]);
    }

    #[test]
    fn push_record_rejects_partial_schema() {
        let mut table = three_field_table();
        assert!(table.push_record(Record::new(vec![ "only one".to_string() ])).is_err());
    }
}
