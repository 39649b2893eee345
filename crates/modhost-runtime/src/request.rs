//! HTTP request and response state shared between guest and host.
//!
//! A guest builds an [`HttpRequest`] field-by-field through the `http`
//! capability, the host executes it, and the resulting [`HttpResponse`] is
//! stored back on the request for the guest to read out.  Requests live in
//! the handle table and never leave the host.

use std::collections::HashMap;
use std::fmt;

use url::Url;

use crate::error::{Result, RuntimeError};

/// HTTP method, encoded as a small integer on the ABI.
///
/// Unknown codes fall back to [`HttpMethod::Get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Decode an ABI method code.  Codes outside `0..=4` fall back to `GET`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Post,
            2 => Self::Put,
            3 => Self::Patch,
            4 => Self::Delete,
            _ => Self::Get,
        }
    }

    /// The ABI code for this method.
    pub fn code(self) -> i32 {
        match self {
            Self::Get => 0,
            Self::Post => 1,
            Self::Put => 2,
            Self::Patch => 3,
            Self::Delete => 4,
        }
    }

    /// The method name as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A guest-built HTTP request.
///
/// Created empty by `http.create` and mutated by the setter imports.  The
/// `response` field is written only by `http.send`: a completed exchange
/// stores `Some`, a failed one stores `None` (the absent state guests probe
/// through `get_status_code` and `get_data_len`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequest {
    pub url: Option<String>,
    pub method: HttpMethod,
    /// Header keys are stored case-sensitively; last write wins.
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub response: Option<HttpResponse>,
}

impl HttpRequest {
    /// Create an empty request with the given method.
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Validate this request and produce the transport-ready form.
    ///
    /// Fails with [`RuntimeError::MalformedRequest`] when the URL is missing
    /// or unparseable.
    pub fn to_outbound(&self) -> Result<OutboundRequest> {
        let raw = self
            .url
            .as_deref()
            .ok_or_else(|| RuntimeError::MalformedRequest {
                reason: "url not set".into(),
            })?;
        let url = Url::parse(raw).map_err(|e| RuntimeError::MalformedRequest {
            reason: format!("invalid url '{raw}': {e}"),
        })?;
        Ok(OutboundRequest {
            url,
            method: self.method,
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}

/// The outcome of one completed HTTP exchange.
///
/// At most one of `data` and `error` is populated; readers check `data`
/// first.  A send that never reached a server stores no response at all.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub data: Option<Vec<u8>>,
    pub error: Option<String>,
}

impl HttpResponse {
    /// Length of the response body in bytes, 0 when absent.
    pub fn data_len(&self) -> usize {
        self.data.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// A validated request ready to hand to an [`HttpTransport`].
///
/// [`HttpTransport`]: crate::transport::HttpTransport
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_codes_round_trip() {
        for code in 0..=4 {
            assert_eq!(HttpMethod::from_code(code).code(), code);
        }
    }

    #[test]
    fn unknown_method_code_falls_back_to_get() {
        assert_eq!(HttpMethod::from_code(99), HttpMethod::Get);
        assert_eq!(HttpMethod::from_code(-3), HttpMethod::Get);
    }

    #[test]
    fn method_display() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
    }

    #[test]
    fn new_request_is_empty() {
        let req = HttpRequest::new(HttpMethod::Post);
        assert_eq!(req.method, HttpMethod::Post);
        assert!(req.url.is_none());
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
        assert!(req.response.is_none());
    }

    #[test]
    fn to_outbound_requires_url() {
        let req = HttpRequest::new(HttpMethod::Get);
        let err = req.to_outbound().unwrap_err();
        assert!(matches!(err, RuntimeError::MalformedRequest { .. }));
    }

    #[test]
    fn to_outbound_rejects_invalid_url() {
        let mut req = HttpRequest::new(HttpMethod::Get);
        req.url = Some("not a url".into());
        assert!(req.to_outbound().is_err());
    }

    #[test]
    fn to_outbound_carries_fields() {
        let mut req = HttpRequest::new(HttpMethod::Put);
        req.url = Some("http://example.com/path".into());
        req.headers.insert("X-Token".into(), "abc".into());
        req.body = Some(b"payload".to_vec());

        let out = req.to_outbound().unwrap();
        assert_eq!(out.url.as_str(), "http://example.com/path");
        assert_eq!(out.method, HttpMethod::Put);
        assert_eq!(out.headers.get("X-Token").map(String::as_str), Some("abc"));
        assert_eq!(out.body.as_deref(), Some(b"payload".as_slice()));
    }

    #[test]
    fn response_data_len() {
        let with_data = HttpResponse {
            status: 200,
            data: Some(b"hi".to_vec()),
            error: None,
        };
        assert_eq!(with_data.data_len(), 2);

        let without = HttpResponse {
            status: 502,
            data: None,
            error: Some("bad gateway".into()),
        };
        assert_eq!(without.data_len(), 0);
    }
}
