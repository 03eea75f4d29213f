//! Chunked transfer encoding.

use super::FramingError;

/// Longest chunk size line accepted before the stream is considered corrupt.
const MAX_SIZE_LINE: usize = 1024;

/// Result of decoding one chunk from the front of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkStep<'a> {
    /// A data chunk; `consumed` bytes including size line and CRLF.
    Data { data: &'a [u8], consumed: usize },
    /// The terminal zero chunk and its closing CRLF.
    Last { consumed: usize },
    /// The buffer does not yet hold a complete chunk.
    NeedMore,
}

pub(crate) fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

/// Decode the chunk at the front of `data`.
///
/// Chunk extensions (`;name=value`) are ignored. Trailers after the zero
/// chunk are rejected.
pub fn decode_chunk(data: &[u8]) -> Result<ChunkStep<'_>, FramingError> {
    let crlf = match find_crlf(data) {
        Some(pos) => pos,
        None if data.len() > MAX_SIZE_LINE => {
            return Err(FramingError::InvalidChunkSize(
                String::from_utf8_lossy(&data[..32]).into_owned(),
            ));
        }
        None => return Ok(ChunkStep::NeedMore),
    };

    let line = &data[..crlf];
    let size_field = line.split(|b| *b == b';').next().unwrap_or(line);
    let size = parse_hex_size(size_field)
        .ok_or_else(|| FramingError::InvalidChunkSize(String::from_utf8_lossy(line).into_owned()))?;

    let chunk_start = crlf + 2;

    if size == 0 {
        return match data.get(chunk_start..chunk_start + 2) {
            None if data.len() > chunk_start && data[chunk_start] != b'\r' => {
                Err(FramingError::UnsupportedTrailer)
            }
            None => Ok(ChunkStep::NeedMore),
            Some(b"\r\n") => Ok(ChunkStep::Last {
                consumed: chunk_start + 2,
            }),
            Some(_) => Err(FramingError::UnsupportedTrailer),
        };
    }

    let chunk_end = chunk_start
        .checked_add(size)
        .ok_or_else(|| FramingError::InvalidChunkSize(String::from_utf8_lossy(line).into_owned()))?;
    let total = chunk_end + 2;
    if data.len() < total {
        return Ok(ChunkStep::NeedMore);
    }
    if &data[chunk_end..total] != b"\r\n" {
        return Err(FramingError::MissingChunkTerminator);
    }

    Ok(ChunkStep::Data {
        data: &data[chunk_start..chunk_end],
        consumed: total,
    })
}

fn parse_hex_size(field: &[u8]) -> Option<usize> {
    let trimmed = field.trim_ascii();
    if trimmed.is_empty() || trimmed.len() > 15 {
        return None;
    }
    let mut size: usize = 0;
    for &b in trimmed {
        let digit = (b as char).to_digit(16)? as usize;
        size = size.checked_mul(16)?.checked_add(digit)?;
    }
    Some(size)
}

/// Encode `body` as chunks of at most `chunk_size` bytes, followed by the
/// terminal zero chunk.
pub fn encode_chunked(body: &[u8], chunk_size: usize) -> Vec<u8> {
    let chunk_size = chunk_size.max(1);
    let mut out = Vec::with_capacity(body.len() + (body.len() / chunk_size + 1) * 8 + 5);
    for chunk in body.chunks(chunk_size) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_chunk_simple() {
        match decode_chunk(b"5\r\nhello\r\n").unwrap() {
            ChunkStep::Data { data, consumed } => {
                assert_eq!(data, b"hello");
                assert_eq!(consumed, 10);
            }
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_chunk_with_extension() {
        match decode_chunk(b"A;name=val\r\n0123456789\r\n").unwrap() {
            ChunkStep::Data { data, .. } => assert_eq!(data, b"0123456789"),
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_padded_size_line() {
        match decode_chunk(b" \ta \r\n0123456789\r\n").unwrap() {
            ChunkStep::Data { data, consumed } => {
                assert_eq!(data, b"0123456789");
                assert_eq!(consumed, 18);
            }
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_last_chunk() {
        assert_eq!(
            decode_chunk(b"0\r\n\r\n").unwrap(),
            ChunkStep::Last { consumed: 5 }
        );
        assert_eq!(decode_chunk(b"0\r\n").unwrap(), ChunkStep::NeedMore);
        assert_eq!(decode_chunk(b"0\r\n\r").unwrap(), ChunkStep::NeedMore);
    }

    #[test]
    fn test_decode_need_more() {
        assert_eq!(decode_chunk(b"5\r\nhel").unwrap(), ChunkStep::NeedMore);
        assert_eq!(decode_chunk(b"5").unwrap(), ChunkStep::NeedMore);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_chunk(b"zz\r\nhello\r\n"),
            Err(FramingError::InvalidChunkSize(_))
        ));
        assert!(matches!(
            decode_chunk(b"\r\n"),
            Err(FramingError::InvalidChunkSize(_))
        ));
        assert_eq!(
            decode_chunk(b"5\r\nhelloXX"),
            Err(FramingError::MissingChunkTerminator)
        );
        assert_eq!(
            decode_chunk(b"0\r\nX-Trailer: 1\r\n\r\n"),
            Err(FramingError::UnsupportedTrailer)
        );
        assert!(matches!(
            decode_chunk(&[b'1'; 2000]),
            Err(FramingError::InvalidChunkSize(_))
        ));
    }

    #[test]
    fn test_encode_chunked() {
        assert_eq!(
            encode_chunked(b"hello world", 5),
            b"5\r\nhello\r\n5\r\n worl\r\n1\r\nd\r\n0\r\n\r\n".to_vec()
        );
        assert_eq!(encode_chunked(b"", 5), b"0\r\n\r\n".to_vec());
    }
}
