//! Bounded URL query handling.
//!
//! The raw query is copied into a fixed-capacity buffer once per request;
//! values are then extracted by key into buffers sized to the longest legal
//! representation of each parameter. Nothing here is percent-decoded: every
//! legal control value is plain ASCII.

use heapless::String;

/// Capacity of the per-request query buffer.
pub const QUERY_CAPACITY: usize = 64;

/// Failure to take the query string in at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    /// The query does not fit [`QUERY_CAPACITY`].
    TooLarge { len: usize },
    /// A pair has an empty key, or the query holds non-printable bytes.
    Malformed,
}

/// Failure to extract a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractError {
    NotFound,
    /// The value is longer than the destination buffer.
    Truncated,
}

/// A validated, owned copy of a request's query string.
#[derive(Debug, Clone)]
pub struct QueryString {
    raw: String<QUERY_CAPACITY>,
}

impl QueryString {
    /// Copy `raw` into the request buffer, checking it splits into `key[=value]` pairs.
    ///
    /// Empty segments (`a=1&&b=2`) are tolerated; a segment with an empty key
    /// (`=1`) is not.
    pub fn new(raw: &str) -> Result<Self, QueryError> {
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(QueryError::Malformed);
        }

        let mut buf = String::new();
        buf.push_str(raw)
            .map_err(|_| QueryError::TooLarge { len: raw.len() })?;

        let query = QueryString { raw: buf };
        if query.pairs().any(|(key, _)| key.is_empty()) {
            return Err(QueryError::Malformed);
        }

        Ok(query)
    }

    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }

    /// Whether `key` appears at all, with or without a value.
    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.find(key).is_some()
    }

    /// Copy the value of `key` into a buffer of capacity `N`.
    ///
    /// A key written without `=` yields an empty value.
    pub fn extract<const N: usize>(
        &self,
        key: &str,
    ) -> Result<String<N>, ExtractError> {
        let value = self.find(key).ok_or(ExtractError::NotFound)?;
        let mut out = String::new();
        out.push_str(value).map_err(|_| ExtractError::Truncated)?;
        Ok(out)
    }

    /// First value bound to `key`.
    fn find(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.pairs().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.raw
            .split('&')
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.split_once('=').unwrap_or((segment, "")))
    }
}
