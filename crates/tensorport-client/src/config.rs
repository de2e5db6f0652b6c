use std::time::Duration;

use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};

use crate::{Error, Result};

/// Extra gRPC metadata sent with every call (or once, when a stream opens).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.push((name.into(), value.into()));
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_metadata(&self) -> Result<MetadataMap> {
        let mut map = MetadataMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            let key = AsciiMetadataKey::from_bytes(name.to_ascii_lowercase().as_bytes())
                .map_err(|_| Error::InvalidParameter(format!("invalid header name {name:?}")))?;
            let value = AsciiMetadataValue::try_from(value.as_str()).map_err(|_| {
                Error::InvalidParameter(format!("invalid value for header {name:?}"))
            })?;
            map.append(key, value);
        }
        Ok(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    pub connect_timeout: Option<Duration>,
    /// Deadline for unary calls. Streams are not bounded by it.
    pub request_timeout: Option<Duration>,
    pub headers: Headers,
}

impl ClientConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_become_lowercase_metadata() {
        let headers = Headers::new().with("X-Request-Source", "batch").with("x-trace", "1");
        let md = headers.to_metadata().unwrap();
        let value = |k: &str| md.get(k).and_then(|v| v.to_str().ok()).map(str::to_string);
        assert_eq!(value("x-request-source").as_deref(), Some("batch"));
        assert_eq!(value("x-trace").as_deref(), Some("1"));
    }

    #[test]
    fn invalid_headers_are_rejected() {
        let bad_name = Headers::new().with("bad header", "x");
        assert!(matches!(bad_name.to_metadata(), Err(Error::InvalidParameter(_))));

        let bad_value = Headers::new().with("x-ok", "line\nbreak");
        assert!(matches!(bad_value.to_metadata(), Err(Error::InvalidParameter(_))));
    }
}
