//! The HTTP seam between the ACME protocol and the network.
use crate::api::ApiProblem;
use crate::Result;

pub(crate) type ReqResult<T> = std::result::Result<T, ApiProblem>;

/// Blocking HTTP client used for all calls against the ACME API.
///
/// The library ships with [`UReq`]. Implement this to route the calls through
/// something else (a proxy aware client, or a fake in tests).
///
/// A response with a 4xx/5xx status is *not* an error at this level, it must be
/// returned as a normal [`HttpResponse`] so the problem document can be read.
/// Only failing to talk to the server at all is an `Err`.
///
/// [`UReq`]: ../struct.UReq.html
pub trait HttpClient: Clone {
    /// Unsigned GET, only used for the directory.
    fn get(&self, url: &str) -> Result<HttpResponse>;

    /// HEAD, only used to fetch a fresh nonce.
    fn head(&self, url: &str) -> Result<HttpResponse>;

    /// POST of a JWS body with `content-type: application/jose+json`.
    fn post(&self, url: &str, body: &str) -> Result<HttpResponse>;
}

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<String>) -> Self {
        HttpResponse {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Header value by case insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }

    fn content_type(&self) -> &str {
        self.header("content-type")
            .and_then(|c| c.split(';').next())
            .map(|c| c.trim())
            .unwrap_or("")
    }

    pub(crate) fn expect_header(&self, name: &str) -> ReqResult<&str> {
        self.header(name).ok_or_else(|| ApiProblem {
            _type: format!("Missing header: {}", name),
            detail: None,
            subproblems: None,
        })
    }

    /// Turn non-2xx responses into an [`ApiProblem`].
    pub(crate) fn handle_errors(self) -> ReqResult<Self> {
        // ok responses pass through
        if self.is_success() {
            return Ok(self);
        }

        let problem = if self.content_type() == "application/problem+json" {
            // if we were sent a problem+json, deserialize it
            serde_json::from_str(&self.body).unwrap_or_else(|e| ApiProblem {
                _type: "problemJsonFail".into(),
                detail: Some(format!(
                    "Failed to deserialize application/problem+json ({}) body: {}",
                    e, self.body
                )),
                subproblems: None,
            })
        } else {
            // some other problem
            let detail = format!("{} body: {}", self.status, self.body);
            ApiProblem {
                _type: "httpReqError".into(),
                detail: Some(detail),
                subproblems: None,
            }
        };

        Err(problem)
    }
}
