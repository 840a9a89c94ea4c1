//! HTTP byte ranges (`Range: bytes=...`).

use std::ops::Range;
use std::str::FromStr;

use crate::error::RangeError;

/// A single byte range in HTTP syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`, both ends inclusive.
    Bounded {
        /// First byte offset.
        start: u64,
        /// Last byte offset, inclusive.
        end: u64,
    },
    /// `bytes=a-`, from `start` to the end.
    From {
        /// First byte offset.
        start: u64,
    },
    /// `bytes=-n`, the last `n` bytes.
    Suffix {
        /// Number of trailing bytes.
        len: u64,
    },
}

impl ByteRange {
    /// Resolves the range against a body of `len` bytes, clamping an end
    /// past the body to its last byte.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::Unsatisfiable`] when no byte of the body falls
    /// in the range.
    pub fn resolve(self, len: u64) -> Result<Range<u64>, RangeError> {
        let unsatisfiable = RangeError::Unsatisfiable { len };
        match self {
            Self::Bounded { start, end } if start < len => Ok(start..end.min(len - 1) + 1),
            Self::From { start } if start < len => Ok(start..len),
            Self::Suffix { len: n } if n > 0 && len > 0 => Ok(len.saturating_sub(n)..len),
            _ => Err(unsatisfiable),
        }
    }

    /// Returns the slice of `body` this range selects.
    ///
    /// # Errors
    ///
    /// Same as [`ByteRange::resolve`].
    pub fn slice(self, body: &[u8]) -> Result<&[u8], RangeError> {
        let range = self.resolve(body.len() as u64)?;
        Ok(&body[range.start as usize..range.end as usize])
    }
}

impl FromStr for ByteRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || RangeError::Malformed(s.to_string());
        let spec = s.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
        if spec.contains(',') {
            // Multi-range requests are not served.
            return Err(malformed());
        }
        let (first, last) = spec.split_once('-').ok_or_else(malformed)?;
        let number = |v: &str| v.trim().parse::<u64>().map_err(|_| malformed());

        match (first.trim().is_empty(), last.trim().is_empty()) {
            (true, true) => Err(malformed()),
            (true, false) => Ok(Self::Suffix { len: number(last)? }),
            (false, true) => Ok(Self::From {
                start: number(first)?,
            }),
            (false, false) => {
                let start = number(first)?;
                let end = number(last)?;
                if end < start {
                    return Err(malformed());
                }
                Ok(Self::Bounded { start, end })
            }
        }
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bounded { start, end } => write!(f, "bytes={start}-{end}"),
            Self::From { start } => write!(f, "bytes={start}-"),
            Self::Suffix { len } => write!(f, "bytes=-{len}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_forms() {
        assert_eq!(
            "bytes=0-99".parse::<ByteRange>(),
            Ok(ByteRange::Bounded { start: 0, end: 99 })
        );
        assert_eq!("bytes=10-".parse::<ByteRange>(), Ok(ByteRange::From { start: 10 }));
        assert_eq!("bytes=-5".parse::<ByteRange>(), Ok(ByteRange::Suffix { len: 5 }));
    }

    #[test]
    fn rejects_malformed_headers() {
        for raw in ["0-9", "bytes=", "bytes=-", "bytes=9-1", "bytes=a-b", "bytes=0-1,4-5"] {
            assert!(
                matches!(raw.parse::<ByteRange>(), Err(RangeError::Malformed(_))),
                "{raw} should be malformed"
            );
        }
    }

    #[test]
    fn resolve_clamps_and_rejects() {
        let body = b"0123456789";
        assert_eq!(
            ByteRange::Bounded { start: 2, end: 4 }.slice(body),
            Ok(&b"234"[..])
        );
        assert_eq!(
            ByteRange::Bounded { start: 8, end: 100 }.slice(body),
            Ok(&b"89"[..])
        );
        assert_eq!(ByteRange::From { start: 7 }.slice(body), Ok(&b"789"[..]));
        assert_eq!(ByteRange::Suffix { len: 3 }.slice(body), Ok(&b"789"[..]));
        assert_eq!(ByteRange::Suffix { len: 50 }.slice(body), Ok(&body[..]));

        assert_eq!(
            ByteRange::From { start: 10 }.resolve(10),
            Err(RangeError::Unsatisfiable { len: 10 })
        );
        assert!(ByteRange::Suffix { len: 0 }.resolve(10).is_err());
        assert!(ByteRange::Suffix { len: 4 }.resolve(0).is_err());
    }
}
