use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

use crate::acc::AcmeKey;
use crate::jwt::*;
use crate::req::{HttpClient, HttpResponse};
use crate::{Error, Result};

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `call_jwk()` against newAccount url
/// 3. `set_key_id` from the returned `Location` header.
/// 4. `call()` for all calls after that.
#[derive(Clone, Debug)]
pub(crate) struct Transport<H: HttpClient> {
    acme_key: AcmeKey,
    client: H,
    nonce_store: Rc<NonceStore<H>>,
}

impl<H: HttpClient> Transport<H> {
    pub fn new(nonce_store: &Rc<NonceStore<H>>, client: H, acme_key: AcmeKey) -> Self {
        Transport {
            acme_key,
            client,
            nonce_store: nonce_store.clone(),
        }
    }

    /// Update the key id once it is known (part of setting up the transport).
    pub fn set_key_id(&mut self, kid: String) {
        self.acme_key.set_key_id(kid);
    }

    /// The key used in the transport
    pub fn acme_key(&self) -> &AcmeKey {
        &self.acme_key
    }

    pub fn nonce_store(&self) -> &Rc<NonceStore<H>> {
        &self.nonce_store
    }

    pub fn client(&self) -> &H {
        &self.client
    }

    /// Make call using the full jwk. Only for the first newAccount request.
    pub fn call_jwk<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<HttpResponse> {
        self.do_call(url, body, jws_with_jwk)
    }

    /// Make call using the key id
    pub fn call<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<HttpResponse> {
        self.do_call(url, body, jws_with_kid)
    }

    fn do_call<T: Serialize + ?Sized, F: Fn(&str, String, &AcmeKey, &T) -> Result<Jws>>(
        &self,
        url: &str,
        body: &T,
        make_body: F,
    ) -> Result<HttpResponse> {
        // The ACME API may at any point invalidate the nonce. We retry exactly
        // once on badNonce, a second one in a row is fatal.
        let mut retried = false;
        loop {
            // Either the nonce from the previous response, or a fresh one.
            let nonce = self.nonce_store.take()?;

            // Sign the body.
            let jws = make_body(url, nonce, &self.acme_key, body)?;
            let jws = serde_json::to_string(&jws)?;

            debug!("Call endpoint {}", url);

            // Post it to the URL
            let response = self.client.post(url, &jws)?;

            // Regardless of the request being a success or not, there might be
            // a nonce in the response.
            self.nonce_store.extract_nonce(&response);

            // Turn errors into ApiProblem.
            match response.handle_errors() {
                Ok(res) => return Ok(res),
                Err(problem) if problem.is_bad_nonce() => {
                    if retried {
                        return Err(Error::NonceRetryExhausted(problem));
                    }
                    debug!("Retrying on bad nonce: {}", problem);
                    retried = true;
                }
                Err(problem) => return Err(problem.into()),
            }
        }
    }
}

/// Holder of the single current nonce.
///
/// Every signed request consumes the held nonce and every response carrying a
/// `Replay-Nonce` replaces it. The run is single threaded, the `RefCell` only
/// lets the account, its orders and a rollover transport share one store.
#[derive(Debug)]
pub(crate) struct NonceStore<H: HttpClient> {
    nonce_url: String,
    client: H,
    held: RefCell<Option<String>>,
}

impl<H: HttpClient> NonceStore<H> {
    pub fn new(client: H, nonce_url: &str) -> Self {
        NonceStore {
            nonce_url: nonce_url.into(),
            client,
            held: RefCell::new(None),
        }
    }

    /// The held nonce, fetching one from newNonce if none is held.
    pub fn current(&self) -> Result<String> {
        if let Some(nonce) = self.held.borrow().as_ref() {
            trace!("Use previous nonce");
            return Ok(nonce.clone());
        }
        let nonce = self.fetch()?;
        self.record(nonce.clone());
        Ok(nonce)
    }

    /// Overwrite the held nonce.
    pub fn record(&self, nonce: String) {
        *self.held.borrow_mut() = Some(nonce);
    }

    /// Like `current()` but leaves the store empty, the nonce is single use.
    fn take(&self) -> Result<String> {
        let nonce = self.current()?;
        self.held.borrow_mut().take();
        Ok(nonce)
    }

    fn extract_nonce(&self, res: &HttpResponse) {
        if let Some(nonce) = res.header("replay-nonce") {
            trace!("Extract nonce");
            self.record(nonce.to_string());
        }
    }

    fn fetch(&self) -> Result<String> {
        debug!("Request new nonce");
        let res = self.client.head(&self.nonce_url)?.handle_errors()?;
        Ok(res.expect_header("replay-nonce")?.to_string())
    }
}
