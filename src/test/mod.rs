//! In-process fake of an ACME API.
//!
//! Routes are queues of replies per `(method, path)`. Each request pops the front reply
//! until one is left, the last one then answers every further request. This lets a test
//! script an authorization going `pending -> processing -> valid` and then staying there.
#![allow(clippy::trivial_regex)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use lazy_static::lazy_static;
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::Id;
use openssl::sign::Verifier;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::acc::AcmeKey;
use crate::hook::DnsHook;
use crate::jwt::Jws;
use crate::poll::{Backoff, IssueConfig, PollPolicy, Sleep};
use crate::req::{HttpClient, HttpResponse};
use crate::{create_p256_key, Result};

lazy_static! {
    static ref RE_URL: regex::Regex = regex::Regex::new("<URL>").unwrap();
    static ref RE_STATUS: regex::Regex = regex::Regex::new("<STATUS>").unwrap();
}

pub const BASE: &str = "https://acme.test";

pub fn url(path: &str) -> String {
    format!("{}{}", BASE, path)
}

fn with_url(body: &str) -> String {
    RE_URL.replace_all(body, BASE).into_owned()
}

fn with_status(body: &str, status: &str) -> String {
    with_url(&RE_STATUS.replace_all(body, status))
}

#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Reply {
    pub fn new(status: u16, content_type: &str, body: &str) -> Self {
        Reply {
            status,
            headers: vec![("Content-Type".into(), content_type.into())],
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

pub fn json_response(status: u16, body: &str) -> Reply {
    Reply::new(status, "application/json", body)
}

pub fn problem_response(status: u16, _type: &str, detail: &str) -> Reply {
    let body = serde_json::json!({ "type": _type, "detail": detail, "status": status });
    Reply::new(status, "application/problem+json", &body.to_string())
}

pub fn bad_nonce_response() -> Reply {
    problem_response(
        400,
        "urn:ietf:params:acme:error:badNonce",
        "JWS has an invalid anti-replay nonce",
    )
}

/// A request as seen by the fake server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl Recorded {
    pub fn jws(&self) -> Jws {
        serde_json::from_str(&self.body).expect("JWS body")
    }

    pub fn protected(&self) -> Value {
        decode_part(&self.jws().protected)
    }

    pub fn payload(&self) -> Value {
        decode_part(&self.jws().payload)
    }
}

fn decode_part(part: &str) -> Value {
    if part.is_empty() {
        return Value::Null;
    }
    let bytes = URL_SAFE_NO_PAD.decode(part).expect("base64url");
    serde_json::from_slice(&bytes).expect("json")
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<(String, String), VecDeque<Reply>>,
    requests: Vec<Recorded>,
    nonce_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    state: Rc<RefCell<State>>,
}

impl FakeServer {
    pub fn dir_url(&self) -> String {
        url("/directory")
    }

    /// Queue one more reply for the route.
    pub fn on(&self, method: &str, path: &str, reply: Reply) {
        let key = (method.to_string(), path.to_string());
        self.state
            .borrow_mut()
            .routes
            .entry(key)
            .or_insert_with(VecDeque::new)
            .push_back(reply);
    }

    /// Replace all replies queued for the route.
    pub fn route(&self, method: &str, path: &str, replies: Vec<Reply>) {
        let key = (method.to_string(), path.to_string());
        self.state
            .borrow_mut()
            .routes
            .insert(key, replies.into_iter().collect());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.borrow().requests.clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests_to(method, path).len()
    }

    fn respond(&self, method: &str, url: &str, body: &str) -> HttpResponse {
        let path = url.strip_prefix(BASE).unwrap_or(url).to_string();
        let mut state = self.state.borrow_mut();
        state.requests.push(Recorded {
            method: method.into(),
            path: path.clone(),
            body: body.into(),
        });

        let key = (method.to_string(), path);
        let reply = match state.routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        let reply = reply.unwrap_or_else(|| Reply::new(404, "text/plain", "not found"));

        state.nonce_count += 1;
        let mut headers = reply.headers;
        if !headers.iter().any(|(n, _)| n == "Replay-Nonce") {
            headers.push(("Replay-Nonce".into(), format!("nonce-{}", state.nonce_count)));
        }
        HttpResponse::new(reply.status, headers, reply.body)
    }
}

impl HttpClient for FakeServer {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        Ok(self.respond("GET", url, ""))
    }

    fn head(&self, url: &str) -> Result<HttpResponse> {
        Ok(self.respond("HEAD", url, ""))
    }

    fn post(&self, url: &str, body: &str) -> Result<HttpResponse> {
        Ok(self.respond("POST", url, body))
    }
}

pub fn directory_body() -> String {
    with_url(
        r#"{
    "keyChange": "<URL>/acme/key-change",
    "newAccount": "<URL>/acme/new-acct",
    "newNonce": "<URL>/acme/new-nonce",
    "newOrder": "<URL>/acme/new-order",
    "revokeCert": "<URL>/acme/revoke-cert",
    "meta": {
        "termsOfService": "<URL>/terms",
        "caaIdentities": [
        "testdir.org"
        ]
    }
    }"#,
    )
}

pub fn account_response(status: u16, account_status: &str) -> Reply {
    const BODY: &str = r#"{
    "id": 7728515,
    "contact": [
        "mailto:foo@bar.com"
    ],
    "initialIp": "90.171.37.12",
    "createdAt": "2018-12-31T17:15:40.399104457Z",
    "status": "<STATUS>"
    }"#;
    json_response(status, &with_status(BODY, account_status))
        .header("Location", &url("/acme/acct/7728515"))
}

pub fn order_response(status: u16, order_status: &str) -> Reply {
    const BODY: &str = r#"{
    "status": "<STATUS>",
    "expires": "2019-01-09T08:26:43.570360537Z",
    "identifiers": [
        {
        "type": "dns",
        "value": "example.org"
        }
    ],
    "authorizations": [
        "<URL>/acme/authz/YTqpYUthlVfwBncUufE8IRWLMSRqcSs"
    ],
    "finalize": "<URL>/acme/finalize/7738992/18234324",
    "certificate": "<URL>/acme/cert/fae41c070f967713109028"
    }"#;
    json_response(status, &with_status(BODY, order_status))
        .header("Location", &url("/acme/order/YTqpYUthlVfwBncUufE8"))
}

pub fn invalid_order_response() -> Reply {
    const BODY: &str = r#"{
    "status": "invalid",
    "identifiers": [{ "type": "dns", "value": "example.org" }],
    "authorizations": ["<URL>/acme/authz/YTqpYUthlVfwBncUufE8IRWLMSRqcSs"],
    "finalize": "<URL>/acme/finalize/7738992/18234324",
    "error": {
        "type": "urn:ietf:params:acme:error:badCSR",
        "detail": "Error finalizing order"
    }
    }"#;
    json_response(200, &with_url(BODY))
}

pub fn authz_response(domain: &str, auth_status: &str) -> Reply {
    json_response(200, &authz_body(domain, auth_status))
}

pub fn authz_body(domain: &str, auth_status: &str) -> String {
    const BODY: &str = r#"{
        "identifier": {
            "type": "dns",
            "value": "<DOMAIN>"
        },
        "status": "<STATUS>",
        "expires": "2019-01-09T08:26:43Z",
        "challenges": [
        {
            "type": "http-01",
            "status": "pending",
            "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789597",
            "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
        },
        {
            "type": "dns-01",
            "status": "pending",
            "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789599",
            "token": "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8"
        }
        ]
    }"#;
    with_status(BODY, auth_status).replace("<DOMAIN>", domain)
}

pub fn invalid_authz_response(domain: &str) -> Reply {
    const BODY: &str = r#"{
        "identifier": { "type": "dns", "value": "<DOMAIN>" },
        "status": "invalid",
        "challenges": [
        {
            "type": "dns-01",
            "status": "invalid",
            "error": {
                "type": "urn:ietf:params:acme:error:dns",
                "detail": "DNS problem: NXDOMAIN looking up TXT for _acme-challenge.<DOMAIN>",
                "status": 400
            },
            "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789599",
            "token": "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8"
        }
        ]
    }"#;
    json_response(200, &with_url(BODY).replace("<DOMAIN>", domain))
}

pub const CERT_CHAIN: &str = "-----BEGIN CERTIFICATE-----
MIIBLEAFCERTIFICATE
-----END CERTIFICATE-----
-----BEGIN CERTIFICATE-----
MIIBINTERMEDIATE
-----END CERTIFICATE-----
";

pub const AUTHZ: &str = "/acme/authz/YTqpYUthlVfwBncUufE8IRWLMSRqcSs";
pub const CHALLENGE: &str = "/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789599";
pub const ORDER: &str = "/acme/order/YTqpYUthlVfwBncUufE8";
pub const FINALIZE: &str = "/acme/finalize/7738992/18234324";
pub const CERT: &str = "/acme/cert/fae41c070f967713109028";
pub const ACCOUNT: &str = "/acme/acct/7728515";

/// A fake ACME API where a single domain `example.org` goes through the happy path.
pub fn with_directory_server() -> FakeServer {
    let server = FakeServer::default();
    server.on("GET", "/directory", json_response(200, &directory_body()));
    server.on("HEAD", "/acme/new-nonce", Reply::new(200, "text/plain", ""));
    server.on("POST", "/acme/new-acct", account_response(201, "valid"));
    server.on("POST", ACCOUNT, account_response(200, "valid"));
    server.on("POST", "/acme/new-order", order_response(201, "pending"));
    server.route(
        "POST",
        AUTHZ,
        vec![
            authz_response("example.org", "pending"),
            authz_response("example.org", "processing"),
            authz_response("example.org", "valid"),
        ],
    );
    server.on(
        "POST",
        CHALLENGE,
        json_response(
            200,
            &with_url(
                r#"{
            "type": "dns-01",
            "status": "processing",
            "url": "<URL>/acme/challenge/YTqpYUthlVfwBncUufE8IRWLMSRqcSs/216789599",
            "token": "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8"
        }"#,
            ),
        ),
    );
    server.route(
        "POST",
        ORDER,
        vec![
            order_response(200, "ready"),
            order_response(200, "processing"),
            order_response(200, "valid"),
        ],
    );
    server.on("POST", FINALIZE, order_response(200, "processing"));
    server.on(
        "POST",
        CERT,
        Reply::new(200, "application/pem-certificate-chain", CERT_CHAIN),
    );
    server.on("POST", "/acme/key-change", account_response(200, "valid"));
    server
}

pub fn account_key() -> AcmeKey {
    AcmeKey::from_key(create_p256_key().expect("p256")).expect("account key")
}

/// Check `jws` is signed by `key` and return the decoded protected header and payload.
pub fn verify_jws(jws: &Jws, key: &AcmeKey) -> Option<(Value, Value)> {
    let input = format!("{}.{}", jws.protected, jws.payload);
    let signature = URL_SAFE_NO_PAD.decode(&jws.signature).ok()?;
    let pkey = key.private_key();

    let verified = match pkey.id() {
        Id::RSA => {
            let mut verifier = Verifier::new(MessageDigest::sha256(), pkey).ok()?;
            verifier.update(input.as_bytes()).ok()?;
            verifier.verify(&signature).ok()?
        }
        Id::EC => {
            let half = signature.len() / 2;
            let r = BigNum::from_slice(&signature[..half]).ok()?;
            let s = BigNum::from_slice(&signature[half..]).ok()?;
            let sig = EcdsaSig::from_private_components(r, s).ok()?;
            let digest = match half {
                32 => openssl::sha::sha256(input.as_bytes()).to_vec(),
                48 => openssl::sha::sha384(input.as_bytes()).to_vec(),
                _ => return None,
            };
            let ec = pkey.ec_key().ok()?;
            sig.verify(&digest, &ec).ok()?
        }
        _ => false,
    };
    if !verified {
        return None;
    }

    Some((decode_part(&jws.protected), decode_part(&jws.payload)))
}

/// Records the requested sleeps instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleep {
    slept: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingSleep {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

impl Sleep for RecordingSleep {
    fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
    }
}

/// Small poll budgets that never actually wait.
pub fn fast_config() -> IssueConfig {
    let policy = PollPolicy::new(5, Backoff::Fixed(Duration::from_millis(1)));
    IssueConfig {
        authorization: policy.clone(),
        order: policy,
    }
    .with_sleeper(Rc::new(RecordingSleep::default()))
}

/// DNS hook keeping the records in memory.
#[derive(Debug, Default)]
pub struct FakeHook {
    pub created: Vec<(String, String)>,
    pub cleaned: Vec<(String, String)>,
    /// Identifier for which `create` fails.
    pub fail_create: Option<String>,
    /// Identifier for which `cleanup` fails.
    pub fail_cleanup: Option<String>,
}

impl DnsHook for FakeHook {
    fn create(&mut self, identifier: &str, value: &str) -> Result<()> {
        if self.fail_create.as_deref() == Some(identifier) {
            return Err("zone not found".into());
        }
        self.created.push((identifier.into(), value.into()));
        Ok(())
    }

    fn cleanup(&mut self, identifier: &str, value: &str) -> Result<()> {
        self.cleaned.push((identifier.into(), value.into()));
        if self.fail_cleanup.as_deref() == Some(identifier) {
            return Err("record already gone".into());
        }
        Ok(())
    }
}

#[test]
fn test_queue_last_reply_is_sticky() {
    let server = FakeServer::default();
    server.on("POST", "/x", json_response(200, "1"));
    server.on("POST", "/x", json_response(200, "2"));
    let bodies: Vec<String> = (0..3)
        .map(|_| server.post(&url("/x"), "").unwrap().into_body())
        .collect();
    assert_eq!(bodies, vec!["1", "2", "2"]);
    assert_eq!(server.count("POST", "/x"), 3);
}

#[test]
fn test_unknown_route_is_404_with_nonce() {
    let server = FakeServer::default();
    let res = server.get(&url("/nope")).unwrap();
    assert_eq!(res.status(), 404);
    assert!(res.header("replay-nonce").is_some());
}
