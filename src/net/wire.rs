use std::fmt;

use super::error::ProtocolError;

/// Terminates one message in either direction.
///
/// Record text may never carry this byte (or a newline), which keeps the
/// framing unambiguous: [`encode`] refuses such text, and a receiver cuts the
/// stream at the first marker it sees.
pub const END_OF_MESSAGE: u8 = 0x00;

/// One numbered line of the original file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub line_number: i64,
    pub text: String,
}

impl Record {
    pub fn new(line_number: i64, text: impl Into<String>) -> Self {
        Self {
            line_number,
            text: text.into(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.line_number, self.text)
    }
}

/// Appends `"<line_number> <text>\n"` to `buf`.
pub fn encode(record: &Record, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    if let Some(byte) = record
        .text
        .bytes()
        .find(|b| *b == b'\n' || *b == END_OF_MESSAGE)
    {
        return Err(ProtocolError::ForbiddenByte {
            line_number: record.line_number,
            byte,
        });
    }
    buf.extend_from_slice(record.line_number.to_string().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(record.text.as_bytes());
    buf.push(b'\n');
    Ok(())
}

/// Encodes `records` in the order given and terminates the message.
pub fn encode_message<'a, I>(records: I) -> Result<Vec<u8>, ProtocolError>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut buf = Vec::new();
    for record in records {
        encode(record, &mut buf)?;
    }
    buf.push(END_OF_MESSAGE);
    Ok(buf)
}

/// Decodes a message payload (the bytes before the marker).
///
/// Empty lines are skipped. A single bad line rejects the whole payload so a
/// caller never applies half a message.
pub fn decode(payload: &[u8]) -> Result<Vec<Record>, ProtocolError> {
    let text =
        std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
    text.split('\n')
        .filter(|line| !line.is_empty())
        .map(decode_line)
        .collect()
}

/// Decodes one line without its trailing newline.
pub fn decode_line(line: &str) -> Result<Record, ProtocolError> {
    let (number, text) = match line.split_once(' ') {
        Some(parts) => parts,
        None if is_decimal(line) => {
            return Err(ProtocolError::MissingSeparator { line: line.into() })
        }
        None => {
            return Err(ProtocolError::InvalidLineNumber { line: line.into() })
        }
    };
    if !is_decimal(number) {
        return Err(ProtocolError::InvalidLineNumber { line: line.into() });
    }
    let line_number = number
        .parse()
        .map_err(|_| ProtocolError::InvalidLineNumber { line: line.into() })?;
    Ok(Record {
        line_number,
        text: text.into(),
    })
}

/// An optional `-` followed by at least one ascii digit.
fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}
