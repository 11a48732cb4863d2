//! Single-range `Range` header parsing for the streaming endpoint.

/// Outcome of interpreting a request's `Range` header against a file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No range requested (or a malformed header, served leniently in full).
    Full,
    /// An inclusive byte span within the file.
    Span(u64, u64),
    /// A syntactically valid range that cannot be satisfied.
    Unsatisfiable,
}

/// Parse `header` (e.g. `bytes=0-1023`, `bytes=500-`, `bytes=-200`) against
/// a file of `length` bytes. Multi-range requests fall back to `Full`.
pub fn parse_range(header: Option<&str>, length: u64) -> ByteRange {
    let Some(header) = header else {
        return ByteRange::Full;
    };
    let Some(spec) = header.strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return ByteRange::Full;
    };

    match (start.trim(), end.trim()) {
        ("", "") => ByteRange::Full,
        // Suffix form: the last N bytes.
        ("", suffix) => match suffix.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if length == 0 => ByteRange::Unsatisfiable,
            Ok(count) => {
                let start = length.saturating_sub(count);
                ByteRange::Span(start, length - 1)
            }
            Err(_) => ByteRange::Full,
        },
        (start, "") => match start.parse::<u64>() {
            Ok(start) if start < length => ByteRange::Span(start, length - 1),
            Ok(_) => ByteRange::Unsatisfiable,
            Err(_) => ByteRange::Full,
        },
        (start, end) => match (start.parse::<u64>(), end.parse::<u64>()) {
            (Ok(start), Ok(end)) if start <= end && start < length => {
                ByteRange::Span(start, end.min(length - 1))
            }
            (Ok(_), Ok(_)) => ByteRange::Unsatisfiable,
            _ => ByteRange::Full,
        },
    }
}
