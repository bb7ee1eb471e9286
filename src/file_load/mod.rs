use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use csv::{ByteRecord, ReaderBuilder};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{LoadError, Result};

// Container formats the source can stream location rows out of
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum InputFormat {
    Delimited,
    Zip,
}

/// Text encoding of the delimited file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1, what the legacy GeoLite CSV files are written in.
    Latin1,
}

/// How to tokenize the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub encoding: Encoding,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            encoding: Encoding::Utf8,
        }
    }
}

/// One tokenized line of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number in the input where the row starts.
    pub line: u64,
    pub fields: Vec<String>,
}

/// A line the source could not tokenize or decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct MalformedRowError {
    pub line: u64,
    pub reason: String,
}

/// Lazy, forward-only sequence of rows read from a delimited file.
pub struct RecordSource {
    reader: csv::Reader<Box<dyn Read>>,
    record: ByteRecord,
    encoding: Encoding,
    finished: bool,
    // Keeps an extracted archive entry alive while it is being read
    _extracted: Option<NamedTempFile>,
}

impl RecordSource {
    /// Open a delimited file, or the location CSV inside a ZIP archive.
    pub fn open(path: impl AsRef<Path>, options: &SourceOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(file_access(path, "the file does not exist"));
        }

        let mut file = File::open(path).map_err(|e| file_access(path, e))?;
        let format = Self::determine_input_format(&mut file).map_err(|e| file_access(path, e))?;
        debug!(path = %path.display(), ?format, "Detected input format");

        match format {
            InputFormat::Delimited => Ok(Self::from_reader(Box::new(file), options)),
            InputFormat::Zip => {
                let extracted = Self::extract_csv_entry(file).map_err(|e| file_access(path, e))?;
                let reader = extracted.reopen().map_err(|e| file_access(path, e))?;
                let mut source = Self::from_reader(Box::new(reader), options);
                source._extracted = Some(extracted);
                Ok(source)
            }
        }
    }

    /// Read rows from any byte stream.
    pub fn from_reader(reader: Box<dyn Read>, options: &SourceOptions) -> Self {
        // A quote left open on a final line without a newline would otherwise close silently at EOF
        let terminated: Box<dyn Read> = Box::new(reader.chain(&b"\n"[..]));
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(options.delimiter)
            .quote(options.quote)
            .from_reader(terminated);

        Self {
            reader,
            record: ByteRecord::new(),
            encoding: options.encoding,
            finished: false,
            _extracted: None,
        }
    }

    // Sniff the leading bytes, then rewind so the reader sees the whole file
    fn determine_input_format(file: &mut File) -> io::Result<InputFormat> {
        let mut header = [0u8; 4];
        let bytes_read = file.read(&mut header)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self::match_magic_numbers(&header[..bytes_read]))
    }

    fn match_magic_numbers(buffer: &[u8]) -> InputFormat {
        match buffer {
            // PKZip signature
            [0x50, 0x4B, 0x03, 0x04, ..] => InputFormat::Zip,
            _ => InputFormat::Delimited,
        }
    }

    // Pick the location table out of a GeoLite City archive
    fn find_csv_entry<R: Read + Seek>(archive: &mut ZipArchive<R>) -> io::Result<usize> {
        let mut first_csv = None;
        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(io::Error::other)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name();
            if name.ends_with("-Location.csv") {
                return Ok(i);
            }
            if first_csv.is_none() && name.to_ascii_lowercase().ends_with(".csv") {
                first_csv = Some(i);
            }
        }

        first_csv.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no .csv file found in ZIP archive")
        })
    }

    // Stream the entry to disk so it can be read without holding the archive open
    fn extract_csv_entry(file: File) -> io::Result<NamedTempFile> {
        let mut archive = ZipArchive::new(file).map_err(io::Error::other)?;
        let index = Self::find_csv_entry(&mut archive)?;
        let mut entry = archive.by_index(index).map_err(io::Error::other)?;
        info!(entry = entry.name(), "Extracting location table from archive");

        let mut extracted = NamedTempFile::new()?;
        io::copy(&mut entry, &mut extracted)?;
        Ok(extracted)
    }

    fn read_row(&mut self) -> std::result::Result<Option<RawRow>, MalformedRowError> {
        let has_row = self.reader.read_byte_record(&mut self.record).map_err(|e| {
            let line = e.position().map(csv::Position::line).unwrap_or(0);
            MalformedRowError {
                line,
                reason: e.to_string(),
            }
        })?;
        if !has_row {
            return Ok(None);
        }

        let line = self.record.position().map(csv::Position::line).unwrap_or(0);
        let mut fields = Vec::with_capacity(self.record.len());
        for field in self.record.iter() {
            // Location fields never span lines; a line break inside a field means a quote was left open
            if field.iter().any(|b| *b == b'\n' || *b == b'\r') {
                return Err(MalformedRowError {
                    line,
                    reason: "unterminated quoted field".to_string(),
                });
            }
            fields.push(decode(field, self.encoding).map_err(|reason| MalformedRowError { line, reason })?);
        }

        Ok(Some(RawRow { line, fields }))
    }
}

impl Iterator for RecordSource {
    type Item = std::result::Result<RawRow, MalformedRowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn decode(bytes: &[u8], encoding: Encoding) -> std::result::Result<String, String> {
    match encoding {
        Encoding::Utf8 => std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| format!("invalid UTF-8: {e}")),
        Encoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

fn file_access(path: &Path, reason: impl ToString) -> LoadError {
    LoadError::FileAccess {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Drops a fixed number of leading rows (the dataset's copyright and header lines).
pub struct SkipRows<I> {
    inner: I,
    remaining: usize,
}

impl<I> SkipRows<I> {
    pub fn new(inner: I, count: usize) -> Self {
        Self {
            inner,
            remaining: count,
        }
    }
}

impl<I> Iterator for SkipRows<I>
where
    I: Iterator<Item = std::result::Result<RawRow, MalformedRowError>>,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            match self.inner.next()? {
                Ok(row) => {
                    debug!(line = row.line, "Skipping leading row");
                    self.remaining -= 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn source(text: &str, options: &SourceOptions) -> RecordSource {
        RecordSource::from_reader(Box::new(Cursor::new(text.as_bytes().to_vec())), options)
    }

    #[test]
    fn test_magic_numbers() {
        assert_eq!(
            RecordSource::match_magic_numbers(&[0x50, 0x4B, 0x03, 0x04]),
            InputFormat::Zip
        );
        assert_eq!(RecordSource::match_magic_numbers(b"Copy"), InputFormat::Delimited);
        assert_eq!(RecordSource::match_magic_numbers(b""), InputFormat::Delimited);
    }

    #[test]
    fn test_rows_have_line_numbers_and_fields() {
        let rows: Vec<RawRow> = source("a,\"b,c\"\n1,2\n", &SourceOptions::default())
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 1);
        assert_eq!(rows[0].fields, vec!["a", "b,c"]);
        assert_eq!(rows[1].line, 2);
    }

    #[test]
    fn test_custom_delimiter_and_quote() {
        let options = SourceOptions {
            delimiter: b';',
            quote: b'\'',
            ..SourceOptions::default()
        };
        let rows: Vec<RawRow> = source("1;'x;y';z\n", &options)
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(rows[0].fields, vec!["1", "x;y", "z"]);
    }

    #[test]
    fn test_unterminated_quote_is_malformed() {
        let mut rows = source("1,US\n2,\"open\n3,FR\n", &SourceOptions::default());
        assert!(rows.next().unwrap().is_ok());
        let err = rows.next().unwrap().unwrap_err();
        assert_eq!(err.line, 2);
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_unterminated_quote_on_last_line_without_newline() {
        let mut rows = source(
            "1,US,CA,SF,94105,37.7,-122.4,0,0\n2,US,\"CA,SF,94105,37.7,-122.4,0,0",
            &SourceOptions::default(),
        );
        assert_eq!(rows.next().unwrap().unwrap().line, 1);
        let err = rows.next().unwrap().unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.reason, "unterminated quoted field");
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_missing_final_newline_adds_no_rows() {
        let with_newline: Vec<RawRow> = source("1,US\n2,FR\n", &SourceOptions::default())
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        let without_newline: Vec<RawRow> = source("1,US\n2,FR", &SourceOptions::default())
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        assert_eq!(with_newline.len(), 2);
        assert_eq!(with_newline, without_newline);
    }

    #[test]
    fn test_invalid_utf8_is_malformed_unless_latin1() {
        let bytes = b"1,Z\xfcrich\n".to_vec();

        let mut utf8 = RecordSource::from_reader(
            Box::new(Cursor::new(bytes.clone())),
            &SourceOptions::default(),
        );
        assert!(utf8.next().unwrap().is_err());

        let latin1_options = SourceOptions {
            encoding: Encoding::Latin1,
            ..SourceOptions::default()
        };
        let mut latin1 = RecordSource::from_reader(Box::new(Cursor::new(bytes)), &latin1_options);
        assert_eq!(latin1.next().unwrap().unwrap().fields[1], "Zürich");
    }

    #[test]
    fn test_skip_rows_preserves_order() {
        let text = "Copyright (c) MaxMind\nlocId,country\n1,US\n2,FR\n3,DE\n";
        let rows: Vec<RawRow> = SkipRows::new(source(text, &SourceOptions::default()), 2)
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        let ids: Vec<&str> = rows.iter().map(|r| r.fields[0].as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_skip_more_rows_than_input() {
        let mut rows = SkipRows::new(source("a\nb\n", &SourceOptions::default()), 5);
        assert!(rows.next().is_none());
    }
}
