//! RouterOS API framing
//!
//! A *word* is a length prefixed UTF-8 string, a *sentence* is a sequence of
//! words terminated by an empty word. Lengths use a variable width prefix:
//!
//! ```text
//! len < 0x80          1 byte    len
//! len < 0x4000        2 bytes   len | 0x8000
//! len < 0x200000      3 bytes   len | 0xC00000
//! len < 0x10000000    4 bytes   len | 0xE0000000
//! otherwise           5 bytes   0xF0, len (u32)
//! ```

use std::collections::BTreeMap;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{DeviceError, DeviceResult};

/// Attribute words of one reply, keyed by attribute name.
pub type Attributes = BTreeMap<String, String>;

/// Longest word accepted from a device. Real replies stay far below this.
pub const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

pub fn encode_length(len: usize) -> Vec<u8> {
    let len = len as u32;
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x4000 {
        ((len | 0x8000) as u16).to_be_bytes().to_vec()
    } else if len < 0x20_0000 {
        (len | 0xC0_0000).to_be_bytes()[1..].to_vec()
    } else if len < 0x1000_0000 {
        (len | 0xE000_0000).to_be_bytes().to_vec()
    } else {
        let mut out = vec![0xF0];
        out.extend_from_slice(&len.to_be_bytes());
        out
    }
}

pub fn encode_word(word: &str) -> Vec<u8> {
    let mut out = encode_length(word.len());
    out.extend_from_slice(word.as_bytes());
    out
}

pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for word in words {
        out.extend(encode_word(word.as_ref()));
    }
    out.push(0);
    out
}

async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> DeviceResult<usize> {
    let first = reader.read_u8().await.map_err(io_error)?;

    let len = if first & 0x80 == 0 {
        first as u32
    } else if first & 0xC0 == 0x80 {
        let rest = reader.read_u8().await.map_err(io_error)?;
        ((first as u32 & 0x3F) << 8) | rest as u32
    } else if first & 0xE0 == 0xC0 {
        let mut rest = [0u8; 2];
        reader.read_exact(&mut rest).await.map_err(io_error)?;
        ((first as u32 & 0x1F) << 16) | (rest[0] as u32) << 8 | rest[1] as u32
    } else if first & 0xF0 == 0xE0 {
        let mut rest = [0u8; 3];
        reader.read_exact(&mut rest).await.map_err(io_error)?;
        ((first as u32 & 0x0F) << 24)
            | (rest[0] as u32) << 16
            | (rest[1] as u32) << 8
            | rest[2] as u32
    } else if first == 0xF0 {
        reader.read_u32().await.map_err(io_error)?
    } else {
        return Err(DeviceError::ProtocolError(format!(
            "reserved control byte 0x{first:02x}"
        )));
    };

    Ok(len as usize)
}

/// Read one word. An empty string marks the end of a sentence.
///
/// Bytes that are not valid UTF-8 (comments in a legacy code page, for
/// instance) are replaced rather than failing the whole reply.
pub async fn read_word<R: AsyncRead + Unpin>(reader: &mut R) -> DeviceResult<String> {
    let len = read_length(reader).await?;
    if len == 0 {
        return Ok(String::new());
    }
    if len > MAX_WORD_LEN {
        return Err(DeviceError::ProtocolError(format!(
            "word of {len} bytes exceeds the {MAX_WORD_LEN} byte limit"
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(io_error)?;
    Ok(String::from_utf8(buf)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
}

pub async fn read_sentence<R: AsyncRead + Unpin>(reader: &mut R) -> DeviceResult<Vec<String>> {
    let mut words = Vec::new();
    loop {
        let word = read_word(reader).await?;
        if word.is_empty() {
            return Ok(words);
        }
        words.push(word);
    }
}

pub async fn write_sentence<W, S>(writer: &mut W, words: &[S]) -> DeviceResult<()>
where
    W: AsyncWrite + Unpin,
    S: AsRef<str>,
{
    writer
        .write_all(&encode_sentence(words))
        .await
        .map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

fn io_error(err: std::io::Error) -> DeviceError {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            DeviceError::ProtocolError("connection closed by device".to_string())
        }
        _ => DeviceError::ProtocolError(format!("connection lost: {err}")),
    }
}

/// A classified reply sentence
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `!re`: one data row
    Row(Attributes),

    /// `!done`: end of the command, may carry `=ret=`
    Done(Attributes),

    /// `!trap`: the command failed; the session stays usable
    Trap(String),

    /// `!fatal`: the device is closing the session
    Fatal(String),

    /// `!empty`: the command produced no rows
    Empty,
}

impl Reply {
    pub fn parse(sentence: &[String]) -> DeviceResult<Self> {
        let Some((kind, words)) = sentence.split_first() else {
            return Err(DeviceError::ProtocolError("empty reply sentence".to_string()));
        };

        match kind.as_str() {
            "!re" => Ok(Reply::Row(parse_attributes(words))),
            "!done" => Ok(Reply::Done(parse_attributes(words))),
            "!empty" => Ok(Reply::Empty),
            "!trap" => {
                let attrs = parse_attributes(words);
                let message = attrs
                    .get("message")
                    .cloned()
                    .unwrap_or_else(|| "unknown failure".to_string());
                Ok(Reply::Trap(message))
            }
            "!fatal" => Ok(Reply::Fatal(words.join(" "))),
            other => Err(DeviceError::ProtocolError(format!(
                "unexpected reply word {other}"
            ))),
        }
    }
}

/// Collect `=key=value` words. Tags and other API words are skipped.
pub fn parse_attributes(words: &[String]) -> Attributes {
    words
        .iter()
        .filter_map(|word| {
            let rest = word.strip_prefix('=')?;
            let (key, value) = rest.split_once('=').unwrap_or((rest, ""));
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
