//! Content filters: pure transformations of object bytes.

use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use lifewire_types::{ObjectReference, OperationKind};

use crate::error::FilterError;
use crate::range::ByteRange;

/// Reference selecting [`FieldMatchFilter`].
pub const FIELD_MATCH_REF: &str = "field-match";
/// Reference selecting [`PassthroughFilter`].
pub const IDENTITY_REF: &str = "identity";

/// Default field separator for [`FieldMatchFilter`].
pub const DEFAULT_MATCH_DELIMITER: char = ' ';
/// Default 1-based field number for [`FieldMatchFilter`].
pub const DEFAULT_MATCH_FIELD: usize = 5;
/// Default value the field must equal for [`FieldMatchFilter`].
pub const DEFAULT_MATCH_VALUE: &str = "|app.DAGAppMaster|:";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One read as seen by a content filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// The operation being served.
    pub operation: OperationKind,
    /// Byte range of the transformed body, if requested.
    pub range: Option<ByteRange>,
    /// Requested part number, if any.
    pub part_number: Option<u32>,
}

impl ReadRequest {
    /// A whole-object request for `operation`.
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            range: None,
            part_number: None,
        }
    }

    /// Restricts the request to `range`.
    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }
}

/// A stateless, deterministic transformation applied to object content at
/// read time.
///
/// Implementations must not perform I/O or hold mutable shared state: the
/// same inputs always produce the same output, and any number of reads may
/// call a filter concurrently.
pub trait ContentFilter: Send + Sync {
    /// The reference this filter is registered under.
    fn name(&self) -> &str;

    /// Transforms a whole object.
    fn filter(&self, object: &ObjectReference, raw: &[u8]) -> Result<Bytes, FilterError>;

    /// Whether a listing shows `object`. Defaults to "the filtered body is
    /// non-empty".
    fn admits(&self, object: &ObjectReference, raw: &[u8]) -> Result<bool, FilterError> {
        Ok(!self.filter(object, raw)?.is_empty())
    }

    /// Serves `request`: the whole object is transformed, then the requested
    /// range is cut from the transformed bytes.
    fn transform(
        &self,
        object: &ObjectReference,
        raw: &[u8],
        request: &ReadRequest,
    ) -> Result<Bytes, FilterError> {
        let filtered = self.filter(object, raw)?;
        match request.range {
            Some(range) => {
                let window = range.resolve(filtered.len() as u64)?;
                Ok(filtered.slice(window.start as usize..window.end as usize))
            }
            None => Ok(filtered),
        }
    }
}

/// Returns bytes unchanged and shows every object.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughFilter;

impl ContentFilter for PassthroughFilter {
    fn name(&self) -> &str {
        IDENTITY_REF
    }

    fn filter(&self, _object: &ObjectReference, raw: &[u8]) -> Result<Bytes, FilterError> {
        Ok(Bytes::copy_from_slice(raw))
    }

    fn admits(&self, _object: &ObjectReference, _raw: &[u8]) -> Result<bool, FilterError> {
        Ok(true)
    }
}

/// Keeps the lines of a delimited text log whose `field`-th column equals a
/// fixed value.
///
/// Gzip input is inflated first. Consecutive delimiters produce empty
/// fields. Kept lines are emitted in order, each ending in `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatchFilter {
    delimiter: char,
    field: usize,
    equals: String,
}

impl FieldMatchFilter {
    /// Builds a filter matching 1-based column `field`.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidSettings`] when `field` is zero or the
    /// delimiter is a line break.
    pub fn new(delimiter: char, field: usize, equals: impl Into<String>) -> Result<Self, FilterError> {
        if field == 0 {
            return Err(FilterError::InvalidSettings(
                "field numbers start at 1".to_string(),
            ));
        }
        if delimiter == '\n' || delimiter == '\r' {
            return Err(FilterError::InvalidSettings(
                "delimiter cannot be a line break".to_string(),
            ));
        }
        Ok(Self {
            delimiter,
            field,
            equals: equals.into(),
        })
    }

    fn decode<'a>(&self, raw: &'a [u8]) -> Result<Cow<'a, str>, FilterError> {
        let encoding = |e: &dyn std::fmt::Display| FilterError::Encoding(e.to_string());
        if raw.starts_with(&GZIP_MAGIC) {
            let mut inflated = Vec::new();
            MultiGzDecoder::new(raw)
                .read_to_end(&mut inflated)
                .map_err(|e| FilterError::Decompress(e.to_string()))?;
            String::from_utf8(inflated)
                .map(Cow::Owned)
                .map_err(|e| encoding(&e))
        } else {
            std::str::from_utf8(raw)
                .map(Cow::Borrowed)
                .map_err(|e| encoding(&e))
        }
    }

    fn keeps(&self, line: &str) -> bool {
        line.split(self.delimiter).nth(self.field - 1) == Some(self.equals.as_str())
    }
}

impl Default for FieldMatchFilter {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_MATCH_DELIMITER,
            field: DEFAULT_MATCH_FIELD,
            equals: DEFAULT_MATCH_VALUE.to_string(),
        }
    }
}

impl ContentFilter for FieldMatchFilter {
    fn name(&self) -> &str {
        FIELD_MATCH_REF
    }

    fn filter(&self, _object: &ObjectReference, raw: &[u8]) -> Result<Bytes, FilterError> {
        let text = self.decode(raw)?;
        let mut out = String::new();
        for line in text.lines().filter(|line| self.keeps(line)) {
            out.push_str(line);
            out.push('\n');
        }
        Ok(Bytes::from(out))
    }

    fn admits(&self, _object: &ObjectReference, raw: &[u8]) -> Result<bool, FilterError> {
        Ok(self.decode(raw)?.lines().any(|line| self.keeps(line)))
    }
}

/// Resolves a `transform_ref` to a filter.
///
/// `field_match` supplies the settings used when the reference is
/// [`FIELD_MATCH_REF`].
///
/// # Errors
///
/// Returns [`FilterError::UnknownTransform`] for any other reference.
pub fn filter_from_ref(
    transform_ref: &str,
    field_match: FieldMatchFilter,
) -> Result<Arc<dyn ContentFilter>, FilterError> {
    match transform_ref {
        FIELD_MATCH_REF => Ok(Arc::new(field_match)),
        IDENTITY_REF => Ok(Arc::new(PassthroughFilter)),
        other => Err(FilterError::UnknownTransform(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    const LOG: &str = "\
2023-01-05 10:00:00,001 INFO [main] |app.DAGAppMaster|: Created DAG
2023-01-05 10:00:00,002 INFO [main] |app.Other|: ignored
2023-01-05 10:00:00,003 WARN [rpc] |app.DAGAppMaster|: Slow heartbeat
short line
";

    fn object() -> ObjectReference {
        ObjectReference::new("logs", "tez/app.log.gz")
    }

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).expect("write");
        encoder.finish().expect("finish")
    }

    const EXPECTED: &str = "\
2023-01-05 10:00:00,001 INFO [main] |app.DAGAppMaster|: Created DAG
2023-01-05 10:00:00,003 WARN [rpc] |app.DAGAppMaster|: Slow heartbeat
";

    #[test]
    fn keeps_lines_whose_fifth_field_matches() {
        let filter = FieldMatchFilter::default();
        let out = filter.filter(&object(), LOG.as_bytes()).expect("filter");
        assert_eq!(out, Bytes::from_static(EXPECTED.as_bytes()));
    }

    #[test]
    fn gzip_input_is_inflated() {
        let filter = FieldMatchFilter::default();
        let plain = filter.filter(&object(), LOG.as_bytes()).expect("plain");
        let zipped = filter.filter(&object(), &gzip(LOG)).expect("gzip");
        assert_eq!(plain, zipped);
    }

    #[test]
    fn truncated_gzip_is_an_error() {
        let mut zipped = gzip(LOG);
        zipped.truncate(12);
        let err = FieldMatchFilter::default()
            .filter(&object(), &zipped)
            .expect_err("truncated");
        assert!(matches!(err, FilterError::Decompress(_)), "{err:?}");
    }

    #[test]
    fn binary_input_is_an_encoding_error() {
        let err = FieldMatchFilter::default()
            .filter(&object(), &[0xff, 0xfe, 0x00])
            .expect_err("binary");
        assert!(matches!(err, FilterError::Encoding(_)));
    }

    #[test]
    fn consecutive_delimiters_yield_empty_fields() {
        let filter = FieldMatchFilter::new(',', 3, "").expect("settings");
        let out = filter
            .filter(&object(), b"a,b,,d\na,b,c,d\n")
            .expect("filter");
        assert_eq!(out, Bytes::from_static(b"a,b,,d\n"));
    }

    #[test]
    fn range_applies_after_transformation() {
        let filter = FieldMatchFilter::default();
        let request = ReadRequest::new(OperationKind::GetObject)
            .with_range(ByteRange::Bounded { start: 0, end: 9 });
        let out = filter
            .transform(&object(), &gzip(LOG), &request)
            .expect("transform");
        assert_eq!(out, Bytes::from_static(&EXPECTED.as_bytes()[..10]));
    }

    #[test]
    fn admits_reflects_matching_lines() {
        let filter = FieldMatchFilter::default();
        assert!(filter.admits(&object(), LOG.as_bytes()).expect("admits"));
        assert!(!filter
            .admits(&object(), b"nothing to see here at all\n")
            .expect("admits"));
        assert!(PassthroughFilter.admits(&object(), b"").expect("admits"));
    }

    #[test]
    fn transform_is_deterministic() {
        let filter = FieldMatchFilter::default();
        let request = ReadRequest::new(OperationKind::GetObject);
        let raw = gzip(LOG);
        let first = filter.transform(&object(), &raw, &request).expect("first");
        let second = filter.transform(&object(), &raw, &request).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn settings_are_validated() {
        assert!(matches!(
            FieldMatchFilter::new(' ', 0, "x"),
            Err(FilterError::InvalidSettings(_))
        ));
        assert!(FieldMatchFilter::new('\n', 1, "x").is_err());
    }

    #[test]
    fn filters_resolve_by_reference() {
        let filter = filter_from_ref("identity", FieldMatchFilter::default()).expect("identity");
        assert_eq!(filter.name(), IDENTITY_REF);
        let filter =
            filter_from_ref("field-match", FieldMatchFilter::default()).expect("field-match");
        assert_eq!(filter.name(), FIELD_MATCH_REF);
        assert!(matches!(
            filter_from_ref("s3-select", FieldMatchFilter::default()),
            Err(FilterError::UnknownTransform(_))
        ));
    }
}
