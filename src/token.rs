//! Component A: streaming tokenizer for Xcode's `SLF0` activity-log format.
//!
//! Xcode encodes each scalar as ASCII-decimal digits followed by a single sentinel byte naming
//! its kind (`#` integer, `^` double as hex-packed IEEE754 bytes, `(` array length, `%`/`"`
//! length-prefixed raw bytes for a class name / string, `@` instance reference, `-` null with no
//! payload). This mirrors the `tokenizer()` generator in `xcactivitylog.py`, but reads the gzip
//! stream in-process instead of piping through `gunzip`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::system::{self, Error};

const HEADER: &[u8; 4] = b"SLF0";
const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Null,
    Integer(i64),
    Double(f64),
    String(String),
    Array(i64),
    Class(String),
    Instance(i64),
}

enum Kind {
    Null,
    Integer,
    Double,
    String,
    Array,
    Class,
    Instance,
}

fn sentinel_kind(b: u8) -> Option<Kind> {
    match b {
        b'"' => Some(Kind::String),
        b'-' => Some(Kind::Null),
        b'#' => Some(Kind::Integer),
        b'^' => Some(Kind::Double),
        b'(' => Some(Kind::Array),
        b'%' => Some(Kind::Class),
        b'@' => Some(Kind::Instance),
        _ => None,
    }
}

pub struct Tokenizer<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    label: String,
}

impl Tokenizer<GzDecoder<BufReader<File>>> {
    /// Open an `.xcactivitylog`, decompress it in-process, and verify the `SLF0` header.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = system::open(path)?;
        let mut reader = GzDecoder::new(BufReader::new(file));
        let label = path.display().to_string();

        let mut header = [0u8; 4];
        read_exact_or_truncated(&mut reader, &mut header, &label)?;
        if &header != HEADER {
            return Err(Error::InvalidLogFormat(label));
        }

        Ok(Self {
            reader,
            buf: Vec::new(),
            pos: 0,
            eof: false,
            label,
        })
    }
}

impl<R: Read> Tokenizer<R> {
    fn fill_more(&mut self) -> Result<(), Error> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self
            .reader
            .read(&mut chunk)
            .map_err(|_| Error::TruncatedStream(self.label.clone()))?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    fn require(&mut self, want: usize) -> Result<bool, Error> {
        while self.buf.len() - self.pos < want && !self.eof {
            self.fill_more()?;
        }
        Ok(self.buf.len() - self.pos >= want)
    }

    fn drop_consumed(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    fn decode_token(&mut self, start: usize, sentinel_index: usize, kind: Kind) -> Result<Option<Token>, Error> {
        let digits_raw = String::from_utf8_lossy(&self.buf[start..sentinel_index]).into_owned();
        let digits = digits_raw.trim();

        match kind {
            Kind::Null => {
                self.pos = sentinel_index + 1;
                self.drop_consumed();
                Ok(Some(Token::Null))
            }
            Kind::Integer | Kind::Array | Kind::Instance => {
                let value: i64 = digits
                    .parse()
                    .map_err(|_| Error::InvalidLogFormat(self.label.clone()))?;
                self.pos = sentinel_index + 1;
                self.drop_consumed();
                Ok(Some(match kind {
                    Kind::Integer => Token::Integer(value),
                    Kind::Array => Token::Array(value),
                    _ => Token::Instance(value),
                }))
            }
            Kind::Double => {
                let bytes = decode_hex(digits).map_err(|_| Error::InvalidLogFormat(self.label.clone()))?;
                if bytes.len() != 8 {
                    return Err(Error::InvalidLogFormat(self.label.clone()));
                }
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&bytes);
                self.pos = sentinel_index + 1;
                self.drop_consumed();
                Ok(Some(Token::Double(f64::from_le_bytes(arr))))
            }
            Kind::String | Kind::Class => {
                let length: usize = digits
                    .parse()
                    .map_err(|_| Error::InvalidLogFormat(self.label.clone()))?;
                let payload_start = sentinel_index + 1;
                self.pos = payload_start;
                if !self.require(length)? {
                    return Err(Error::TruncatedStream(self.label.clone()));
                }
                let text = String::from_utf8_lossy(&self.buf[self.pos..self.pos + length]).into_owned();
                self.pos += length;
                self.drop_consumed();
                Ok(Some(match kind {
                    Kind::String => Token::String(text),
                    _ => Token::Class(text),
                }))
            }
        }
    }
}

impl<R: Read> Iterator for Tokenizer<R> {
    type Item = Result<Token, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // The digits of a scalar token live *before* its sentinel byte (see
            // `xcactivitylog.py`'s handlers reading `buffer[:index]`), so the scan must not
            // advance `self.pos` past them — only `decode_token` is allowed to move `self.pos`,
            // once it knows where the token actually ends.
            let start = self.pos;
            let mut scan = start;
            while scan < self.buf.len() {
                let byte = self.buf[scan];
                if let Some(kind) = sentinel_kind(byte) {
                    let sentinel_index = scan;
                    return match self.decode_token(start, sentinel_index, kind) {
                        Ok(Some(token)) => Some(Ok(token)),
                        Ok(None) => None,
                        Err(e) => Some(Err(e)),
                    };
                }
                scan += 1;
            }
            if self.eof {
                // trailing bytes with no sentinel: garbage at EOF, terminate gracefully.
                return None;
            }
            match self.fill_more() {
                Ok(()) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], label: &str) -> Result<(), Error> {
    reader
        .read_exact(buf)
        .map_err(|_| Error::TruncatedStream(label.to_string()))
}

fn decode_hex(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let hi = (bytes[i] as char).to_digit(16).ok_or(())?;
        let lo = (bytes[i + 1] as char).to_digit(16).ok_or(())?;
        out.push(((hi << 4) | lo) as u8);
        i += 2;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tokens_from_bytes(body: &[u8]) -> Vec<Token> {
        let mut all = Vec::new();
        all.extend_from_slice(HEADER);
        all.extend_from_slice(body);
        let mut buf = Vec::new();
        {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            use std::io::Write;
            let mut enc = GzEncoder::new(&mut buf, Compression::default());
            enc.write_all(&all).unwrap();
            enc.finish().unwrap();
        }
        let reader = GzDecoder::new(Cursor::new(buf));
        let mut header = [0u8; 4];
        let mut reader = reader;
        reader.read_exact(&mut header).unwrap();
        assert_eq!(&header, HEADER);
        let tok = Tokenizer {
            reader,
            buf: Vec::new(),
            pos: 0,
            eof: false,
            label: "test".to_string(),
        };
        tok.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn decodes_integer() {
        let tokens = tokens_from_bytes(b"1#");
        assert_eq!(tokens, vec![Token::Integer(1)]);
    }

    #[test]
    fn decodes_null_and_string() {
        let tokens = tokens_from_bytes(b"-5\"hello");
        assert_eq!(tokens, vec![Token::Null, Token::String("hello".to_string())]);
    }

    #[test]
    fn decodes_array_and_instance() {
        let tokens = tokens_from_bytes(b"3(2@");
        assert_eq!(tokens, vec![Token::Array(3), Token::Instance(2)]);
    }

    #[test]
    fn decodes_class_name() {
        let tokens = tokens_from_bytes(b"7%MyClass");
        assert_eq!(tokens, vec![Token::Class("MyClass".to_string())]);
    }

    #[test]
    fn string_length_can_straddle_reads() {
        // payload longer than one internal read chunk still decodes whole.
        let long = "x".repeat(READ_CHUNK + 10);
        let body = format!("{}\"{}", long.len(), long);
        let tokens = tokens_from_bytes(body.as_bytes());
        assert_eq!(tokens, vec![Token::String(long)]);
    }

    #[test]
    fn truncated_string_payload_errors() {
        let mut all = Vec::new();
        all.extend_from_slice(HEADER);
        all.extend_from_slice(b"10\"short");
        let mut buf = Vec::new();
        {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            use std::io::Write;
            let mut enc = GzEncoder::new(&mut buf, Compression::default());
            enc.write_all(&all).unwrap();
            enc.finish().unwrap();
        }
        let mut reader = GzDecoder::new(Cursor::new(buf));
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).unwrap();
        let tok = Tokenizer {
            reader,
            buf: Vec::new(),
            pos: 0,
            eof: false,
            label: "test".to_string(),
        };
        let results: Vec<_> = tok.collect();
        assert!(matches!(results.last(), Some(Err(Error::TruncatedStream(_)))));
    }

    #[test]
    fn rejects_bad_header() {
        let mut buf = Vec::new();
        {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            use std::io::Write;
            let mut enc = GzEncoder::new(&mut buf, Compression::default());
            enc.write_all(b"NOPE1234").unwrap();
            enc.finish().unwrap();
        }
        let tmp = tempfile_with(&buf);
        let result = Tokenizer::open(&tmp);
        assert!(matches!(result, Err(Error::InvalidLogFormat(_))));
        let _ = std::fs::remove_file(&tmp);
    }

    fn tempfile_with(bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("xcode-bsp-test-{}.gz", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        path
    }
}
