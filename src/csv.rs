//! CSV reading and writing for the tabular document sections.
//!
//! The dialect is fixed: comma separated, every field quoted, embedded
//! quotes doubled, one header row of keys, UTF-8. The writer emits `\r\n`
//! record ends; the reader also accepts bare `\n` and quoted fields
//! containing commas, quotes and line breaks.

use std::io::{self, BufRead, Read, Write};

/// Writes records in the fixed all-fields-quoted dialect.
///
/// The header row is written on construction; every record must carry the
/// same number of fields as the header.
pub struct CsvWriter<W: Write> {
    inner: W,
    columns: usize,
}

impl<W: Write> CsvWriter<W> {
    /// Create a writer and emit the header row.
    pub fn new(mut inner: W, keys: &[&str]) -> io::Result<Self> {
        write_record_raw(&mut inner, keys.iter().copied())?;
        Ok(CsvWriter {
            inner,
            columns: keys.len(),
        })
    }

    /// Write one record. The field count must match the header.
    pub fn write_record(&mut self, fields: &[&str]) -> io::Result<()> {
        debug_assert_eq!(
            fields.len(),
            self.columns,
            "field count does not match header"
        );
        write_record_raw(&mut self.inner, fields.iter().copied())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    /// Get the inner writer back.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn write_record_raw<'a, W: Write, I>(w: &mut W, fields: I) -> io::Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut first = true;
    for field in fields {
        if !first {
            w.write_all(b",")?;
        }
        first = false;
        w.write_all(b"\"")?;
        let mut rest = field;
        while let Some(q) = rest.find('"') {
            w.write_all(rest[..q].as_bytes())?;
            w.write_all(b"\"\"")?;
            rest = &rest[q + 1..];
        }
        w.write_all(rest.as_bytes())?;
        w.write_all(b"\"")?;
    }
    w.write_all(b"\r\n")
}

/// Reads records in the fixed dialect, header first.
pub struct CsvReader<R: BufRead> {
    inner: R,
    peeked: Option<u8>,
    keys: Vec<String>,
}

impl<R: BufRead> CsvReader<R> {
    /// Create a reader and consume the header row.
    ///
    /// Fails with `InvalidData` if the input holds no header record.
    pub fn new(inner: R) -> io::Result<Self> {
        let mut reader = CsvReader {
            inner,
            peeked: None,
            keys: Vec::new(),
        };
        match reader.read_record()? {
            Some(keys) => reader.keys = keys,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "table has no header row",
                ))
            }
        }
        Ok(reader)
    }

    /// The header keys, in column order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Column index of `key`, if the header carries it.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Read the next record, or `None` at end of input.
    pub fn read_record(&mut self) -> io::Result<Option<Vec<String>>> {
        // Skip blank lines between records.
        loop {
            match self.peek()? {
                Some(b'\r') | Some(b'\n') => {
                    self.next_byte()?;
                }
                Some(_) => break,
                None => return Ok(None),
            }
        }

        let mut fields = Vec::new();
        loop {
            let field = self.read_field()?;
            fields.push(field);
            match self.next_byte()? {
                Some(b',') => continue,
                Some(b'\r') => {
                    // Consume the \n of a \r\n pair, if present.
                    if self.peek()? == Some(b'\n') {
                        self.next_byte()?;
                    }
                    break;
                }
                Some(b'\n') | None => break,
                Some(other) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unexpected byte 0x{other:02X} after field"),
                    ))
                }
            }
        }
        Ok(Some(fields))
    }

    fn read_field(&mut self) -> io::Result<String> {
        let mut bytes = Vec::new();
        if self.peek()? == Some(b'"') {
            self.next_byte()?;
            loop {
                match self.next_byte()? {
                    Some(b'"') => {
                        if self.peek()? == Some(b'"') {
                            self.next_byte()?;
                            bytes.push(b'"');
                        } else {
                            break;
                        }
                    }
                    Some(b) => bytes.push(b),
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "unterminated quoted field",
                        ))
                    }
                }
            }
        } else {
            while let Some(b) = self.peek()? {
                if b == b',' || b == b'\r' || b == b'\n' {
                    break;
                }
                self.next_byte()?;
                bytes.push(b);
            }
        }
        String::from_utf8(bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "field is not valid UTF-8"))
    }

    fn peek(&mut self) -> io::Result<Option<u8>> {
        if self.peeked.is_none() {
            self.peeked = self.read_one()?;
        }
        Ok(self.peeked)
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        match self.peeked.take() {
            Some(b) => Ok(Some(b)),
            None => self.read_one(),
        }
    }

    fn read_one(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn parse(input: &str) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = CsvReader::new(BufReader::new(input.as_bytes())).unwrap();
        let keys = reader.keys().to_vec();
        let mut rows = Vec::new();
        while let Some(row) = reader.read_record().unwrap() {
            rows.push(row);
        }
        (keys, rows)
    }

    #[test]
    fn test_write_then_read() {
        let mut w = CsvWriter::new(Vec::new(), &["id", "value"]).unwrap();
        w.write_record(&["1", "plain"]).unwrap();
        w.write_record(&["2", "has \"quotes\" inside"]).unwrap();
        w.write_record(&["3", "comma, and\nnewline"]).unwrap();
        let bytes = w.into_inner();

        let (keys, rows) = parse(std::str::from_utf8(&bytes).unwrap());
        assert_eq!(keys, ["id", "value"]);
        assert_eq!(rows[0], ["1", "plain"]);
        assert_eq!(rows[1], ["2", "has \"quotes\" inside"]);
        assert_eq!(rows[2], ["3", "comma, and\nnewline"]);
    }

    #[test]
    fn test_every_field_quoted() {
        let mut w = CsvWriter::new(Vec::new(), &["a"]).unwrap();
        w.write_record(&["x"]).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(text, "\"a\"\r\n\"x\"\r\n");
    }

    #[test]
    fn test_reader_accepts_bare_newlines() {
        let (keys, rows) = parse("\"a\",\"b\"\n\"1\",\"2\"\n");
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(rows, [["1", "2"]]);
    }

    #[test]
    fn test_reader_accepts_unquoted_fields() {
        let (_, rows) = parse("\"a\",\"b\"\r\n1,2\r\n");
        assert_eq!(rows, [["1", "2"]]);
    }

    #[test]
    fn test_missing_final_newline() {
        let (_, rows) = parse("\"a\"\r\n\"last\"");
        assert_eq!(rows, [["last"]]);
    }

    #[test]
    fn test_index_of() {
        let reader = CsvReader::new(BufReader::new("\"x\",\"y\"\r\n".as_bytes())).unwrap();
        assert_eq!(reader.index_of("y"), Some(1));
        assert_eq!(reader.index_of("z"), None);
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(CsvReader::new(BufReader::new("".as_bytes())).is_err());
    }
}
