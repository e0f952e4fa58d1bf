//! Byte-range slicing of cached responses.

use super::traits::ResponseRecord;

/// Inclusive byte range resolved against a body length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
  pub start: usize,
  pub end: usize,
}

/// Parse a `Range` header value against a body length.
///
/// Returns `None` when the header is malformed or unsatisfiable. Only a
/// single range is supported.
pub fn parse_range(header: &str, len: usize) -> Option<ByteRange> {
  let spec = header.trim().strip_prefix("bytes=")?;
  if spec.contains(',') || len == 0 {
    return None;
  }
  let (start, end) = spec.split_once('-')?;
  let (start, end) = (start.trim(), end.trim());

  let range = match (start.is_empty(), end.is_empty()) {
    // bytes=-n: the last n bytes
    (true, false) => {
      let suffix: usize = end.parse().ok()?;
      if suffix == 0 {
        return None;
      }
      ByteRange {
        start: len.saturating_sub(suffix),
        end: len - 1,
      }
    }
    (false, true) => ByteRange {
      start: start.parse().ok()?,
      end: len - 1,
    },
    (false, false) => ByteRange {
      start: start.parse().ok()?,
      end: end.parse::<usize>().ok()?.min(len - 1),
    },
    (true, true) => return None,
  };

  if range.start > range.end || range.start >= len {
    return None;
  }
  Some(range)
}

/// Build a 206 response from a full cached response.
pub fn slice_response(full: &ResponseRecord, range: ByteRange) -> ResponseRecord {
  let body = full.body[range.start..=range.end].to_vec();
  let mut headers: Vec<(String, String)> = full
    .headers
    .iter()
    .filter(|(k, _)| {
      !k.eq_ignore_ascii_case("content-length") && !k.eq_ignore_ascii_case("content-range")
    })
    .cloned()
    .collect();
  headers.push((
    "content-range".into(),
    format!("bytes {}-{}/{}", range.start, range.end, full.body.len()),
  ));
  headers.push(("content-length".into(), body.len().to_string()));

  ResponseRecord {
    url: full.url.clone(),
    status: 206,
    headers,
    body,
  }
}

/// Build the 416 response for an unsatisfiable range.
pub fn unsatisfiable(full: &ResponseRecord) -> ResponseRecord {
  ResponseRecord {
    url: full.url.clone(),
    status: 416,
    headers: vec![("content-range".into(), format!("bytes */{}", full.body.len()))],
    body: Vec::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_closed_range() {
    assert_eq!(parse_range("bytes=2-5", 10), Some(ByteRange { start: 2, end: 5 }));
  }

  #[test]
  fn test_parse_open_and_suffix_ranges() {
    assert_eq!(parse_range("bytes=4-", 10), Some(ByteRange { start: 4, end: 9 }));
    assert_eq!(parse_range("bytes=-3", 10), Some(ByteRange { start: 7, end: 9 }));
    assert_eq!(parse_range("bytes=-30", 10), Some(ByteRange { start: 0, end: 9 }));
  }

  #[test]
  fn test_end_is_clamped() {
    assert_eq!(parse_range("bytes=8-100", 10), Some(ByteRange { start: 8, end: 9 }));
  }

  #[test]
  fn test_unsatisfiable_and_malformed() {
    assert_eq!(parse_range("bytes=10-12", 10), None);
    assert_eq!(parse_range("bytes=5-2", 10), None);
    assert_eq!(parse_range("bytes=0-1,3-4", 10), None);
    assert_eq!(parse_range("items=0-1", 10), None);
    assert_eq!(parse_range("bytes=-", 10), None);
  }

  #[test]
  fn test_slice_response() {
    let full = ResponseRecord {
      url: "https://a/video.mp4".into(),
      status: 200,
      headers: vec![("content-length".into(), "10".into())],
      body: b"0123456789".to_vec(),
    };
    let sliced = slice_response(&full, ByteRange { start: 2, end: 4 });
    assert_eq!(sliced.status, 206);
    assert_eq!(sliced.body, b"234");
    assert_eq!(sliced.header("content-range"), Some("bytes 2-4/10"));
    assert_eq!(sliced.header("content-length"), Some("3"));
  }
}
