use std::io::Read;
use std::time::Duration;

use crate::req::{HttpClient, HttpResponse};
use crate::{Error, Result};

const USER_AGENT: &str = concat!("acme-dns-tiny/", env!("CARGO_PKG_VERSION"));

/// [`HttpClient`] backed by a [ureq](https://docs.rs/ureq) agent.
///
/// [`HttpClient`]: trait.HttpClient.html
#[derive(Clone)]
pub struct UReq {
    agent: ::ureq::Agent,
}

impl UReq {
    /// Client where `timeout` applies to connect, read and write separately.
    pub fn new(timeout: Duration) -> Self {
        let agent = ::ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(USER_AGENT)
            .build();
        UReq { agent }
    }
}

impl Default for UReq {
    fn default() -> Self {
        UReq::new(Duration::from_secs(30))
    }
}

impl HttpClient for UReq {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        trace!("GET {}", url);
        into_response(self.agent.get(url).call())
    }

    fn head(&self, url: &str) -> Result<HttpResponse> {
        trace!("HEAD {}", url);
        into_response(self.agent.head(url).call())
    }

    fn post(&self, url: &str, body: &str) -> Result<HttpResponse> {
        trace!("POST {} {}", url, body);
        let req = self
            .agent
            .post(url)
            .set("content-type", "application/jose+json");
        into_response(req.send_string(body))
    }
}

fn into_response(res: std::result::Result<::ureq::Response, ::ureq::Error>) -> Result<HttpResponse> {
    let res = match res {
        Ok(res) => res,
        // 4xx/5xx carry the problem document we want to read.
        Err(::ureq::Error::Status(_, res)) => res,
        Err(::ureq::Error::Transport(t)) => return Err(Error::Call(t.to_string())),
    };

    let status = res.status();
    let headers = res
        .headers_names()
        .into_iter()
        .filter_map(|name| {
            let value = res.header(&name)?.to_string();
            Some((name, value))
        })
        .collect();

    let mut body = String::new();
    // letsencrypt sometimes closes the TLS abruptly causing io error
    // even though we did capture the body.
    res.into_reader().read_to_string(&mut body).ok();
    trace!("{} {}", status, body);

    Ok(HttpResponse::new(status, headers, body))
}
