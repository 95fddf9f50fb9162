//! RouterOS API wire format
//!
//! A sentence is a sequence of length-prefixed words terminated by an empty
//! word. Replies start with `!re`, `!done`, `!trap`, `!fatal` or `!empty`;
//! attributes are `=key=value` words.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::DeviceError;

/// Attributes of one reply sentence
pub type Attrs = HashMap<String, String>;

/// Words longer than this are treated as a corrupt stream
const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Re(Attrs),
    Done(Attrs),
    Trap(Attrs),
    Fatal(String),
    Empty,
}

/// Variable-length word length prefix
pub fn encode_length(len: usize) -> Vec<u8> {
    let len = len as u32;
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x4000 {
        let v = len | 0x8000;
        vec![(v >> 8) as u8, v as u8]
    } else if len < 0x20_0000 {
        let v = len | 0xC0_0000;
        vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else if len < 0x1000_0000 {
        let v = len | 0xE000_0000;
        vec![(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else {
        vec![0xF0, (len >> 24) as u8, (len >> 16) as u8, (len >> 8) as u8, len as u8]
    }
}

pub async fn read_length<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<usize, DeviceError> {
    let first = reader.read_u8().await? as u32;

    let (extra, initial) = if first & 0x80 == 0 {
        (0, first)
    } else if first & 0xC0 == 0x80 {
        (1, first & 0x3F)
    } else if first & 0xE0 == 0xC0 {
        (2, first & 0x1F)
    } else if first & 0xF0 == 0xE0 {
        (3, first & 0x0F)
    } else if first == 0xF0 {
        (4, 0)
    } else {
        return Err(DeviceError::Protocol(format!(
            "invalid length prefix 0x{:02x}",
            first
        )));
    };

    let mut len = initial;
    for _ in 0..extra {
        len = (len << 8) | reader.read_u8().await? as u32;
    }
    Ok(len as usize)
}

/// Encode a full sentence including the terminating empty word
pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut buf = Vec::new();
    for word in words {
        let bytes = word.as_ref().as_bytes();
        buf.extend(encode_length(bytes.len()));
        buf.extend_from_slice(bytes);
    }
    buf.push(0);
    buf
}

/// Read words until the empty terminator
pub async fn read_sentence<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
) -> Result<Vec<String>, DeviceError> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        if len > MAX_WORD_LEN {
            return Err(DeviceError::Protocol(format!("word of {} bytes", len)));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        words.push(String::from_utf8_lossy(&buf).into_owned());
    }
}

/// Classify a reply sentence and collect its attributes
pub fn parse_reply(words: &[String]) -> Result<Reply, DeviceError> {
    let (kind, rest) = words
        .split_first()
        .ok_or_else(|| DeviceError::Protocol("empty reply sentence".into()))?;

    let mut attrs = Attrs::new();
    for word in rest {
        if let Some(pair) = word.strip_prefix('=') {
            match pair.split_once('=') {
                Some((k, v)) => attrs.insert(k.to_string(), v.to_string()),
                None => attrs.insert(pair.to_string(), String::new()),
            };
        } else if let Some(tag) = word.strip_prefix(".tag=") {
            attrs.insert(".tag".to_string(), tag.to_string());
        }
    }

    match kind.as_str() {
        "!re" => Ok(Reply::Re(attrs)),
        "!done" => Ok(Reply::Done(attrs)),
        "!trap" => Ok(Reply::Trap(attrs)),
        "!empty" => Ok(Reply::Empty),
        "!fatal" => {
            // !fatal carries its reason as a bare word
            let reason = rest.first().cloned().unwrap_or_default();
            Ok(Reply::Fatal(reason))
        }
        other => Err(DeviceError::Protocol(format!("unexpected reply '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_length_boundaries() {
        assert_eq!(encode_length(0), vec![0x00]);
        assert_eq!(encode_length(0x7F), vec![0x7F]);
        assert_eq!(encode_length(0x80), vec![0x80, 0x80]);
        assert_eq!(encode_length(0x3FFF), vec![0xBF, 0xFF]);
        assert_eq!(encode_length(0x4000), vec![0xC0, 0x40, 0x00]);
        assert_eq!(encode_length(0x20_0000), vec![0xE0, 0x20, 0x00, 0x00]);
        assert_eq!(encode_length(0x1000_0000), vec![0xF0, 0x10, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_read_length_matches_encoding() {
        for len in [0usize, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000] {
            let bytes = encode_length(len);
            let mut reader = bytes.as_slice();
            assert_eq!(read_length(&mut reader).await.unwrap(), len);
        }
    }

    #[tokio::test]
    async fn test_read_sentence() {
        let bytes = encode_sentence(&["!re", "=name=ether1", "=mtu=1500"]);
        let mut reader = bytes.as_slice();
        let words = read_sentence(&mut reader).await.unwrap();
        assert_eq!(words, vec!["!re", "=name=ether1", "=mtu=1500"]);
    }

    #[tokio::test]
    async fn test_truncated_sentence_is_closed() {
        let bytes = encode_sentence(&["!re", "=name=ether1"]);
        let mut reader = &bytes[..5];
        let err = read_sentence(&mut reader).await.unwrap_err();
        assert!(matches!(err, DeviceError::Closed(_)));
    }

    #[test]
    fn test_parse_reply() {
        let words: Vec<String> = ["!re", "=comment=a=b", "=disabled=", ".tag=7"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        match parse_reply(&words).unwrap() {
            Reply::Re(attrs) => {
                assert_eq!(attrs["comment"], "a=b");
                assert_eq!(attrs["disabled"], "");
                assert_eq!(attrs[".tag"], "7");
            }
            other => panic!("unexpected {:?}", other),
        }

        let fatal = vec!["!fatal".to_string(), "session terminated on request".to_string()];
        assert_eq!(
            parse_reply(&fatal).unwrap(),
            Reply::Fatal("session terminated on request".into())
        );
        assert!(parse_reply(&[]).is_err());
    }
}
