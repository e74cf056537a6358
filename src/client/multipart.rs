//! `multipart/byteranges` and `Content-Range` parsing

use bytes::Bytes;

use super::ClientError;

/// One byte range returned by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RangePart {
    pub start: u64,
    pub data: Bytes,
}

/// Parsed `Content-Range: bytes first-last/total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub first: u64,
    pub last: u64,
    pub total: Option<u64>,
}

impl ContentRange {
    /// Number of bytes covered, `None` when it does not fit in a u64
    pub fn len(&self) -> Option<u64> {
        (self.last - self.first).checked_add(1)
    }
}

pub(crate) fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (first, last) = range.trim().split_once('-')?;
    let first: u64 = first.trim().parse().ok()?;
    let last: u64 = last.trim().parse().ok()?;
    if last < first {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some(ContentRange { first, last, total })
}

/// Boundary parameter of a `multipart/byteranges` content type
pub(crate) fn byteranges_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/byteranges") {
        return None;
    }
    params.find_map(|p| {
        let (k, v) = p.split_once('=')?;
        if k.trim().eq_ignore_ascii_case("boundary") {
            Some(v.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Split a `multipart/byteranges` body into its parts.
///
/// Each part's length comes from its `Content-Range` header, so part bodies
/// may contain the boundary string.
pub(crate) fn parse_byteranges(body: &Bytes, boundary: &str) -> Result<Vec<RangePart>, ClientError> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut pos = 0;

    loop {
        let Some(at) = find(body, delimiter, pos) else {
            break;
        };
        let mut cursor = at + delimiter.len();
        if body[cursor..].starts_with(b"--") {
            break;
        }

        let header_end = find(body, b"\r\n\r\n", cursor).ok_or_else(|| {
            ClientError::protocol("multipart/byteranges part without header terminator")
        })?;
        let headers = std::str::from_utf8(&body[cursor..header_end])
            .map_err(|_| ClientError::protocol("non UTF-8 multipart headers"))?;

        let range = headers
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-range"))
            .and_then(|(_, value)| parse_content_range(value))
            .ok_or_else(|| ClientError::protocol("multipart part without a valid Content-Range"))?;

        cursor = header_end + 4;
        let end = range
            .len()
            .and_then(|len| usize::try_from(len).ok())
            .and_then(|len| cursor.checked_add(len))
            .filter(|end| *end <= body.len())
            .ok_or_else(|| {
                ClientError::protocol(format!(
                    "multipart part for bytes {}-{} is truncated",
                    range.first, range.last
                ))
            })?;
        parts.push(RangePart {
            start: range.first,
            data: body.slice(cursor..end),
        });
        pos = end;
    }

    Ok(parts)
}
