//
use std::rc::Rc;

use crate::acc::AccountInner;
use crate::api::{ApiAuth, ApiChallenge, ApiEmptyObject, ApiEmptyString};
use crate::hook::dns_record_name;
use crate::jwt::dns_key_authorization;
use crate::poll::PollPolicy;
use crate::req::HttpClient;
use crate::util::read_json;
use crate::{Error, Result};

/// An authorization ([ownership proof]) for a domain name.
///
/// Each authorization for an order much be progressed to a valid state before the ACME API
/// will issue a certificate.
///
/// Authorizations may or may not be required depending on previous orders against the same
/// ACME account. The ACME API decides if the authorization is needed.
///
/// Only the DNS-01 way of proving ownership is supported: a `TXT` record under the domain
/// being authorized.
///
/// [ownership proof]: ../index.html#domain-ownership
pub struct Auth<H: HttpClient> {
    inner: Rc<AccountInner<H>>,
    api_auth: ApiAuth,
    auth_url: String,
}

impl<H: HttpClient> Auth<H> {
    pub(crate) fn new(inner: &Rc<AccountInner<H>>, api_auth: ApiAuth, auth_url: &str) -> Self {
        Auth {
            inner: inner.clone(),
            api_auth,
            auth_url: auth_url.into(),
        }
    }

    /// Domain name for this authorization.
    ///
    /// For a wildcard order this is the base domain, without `*.`.
    pub fn domain_name(&self) -> &str {
        &self.api_auth.identifier.value
    }

    /// Whether we actually need to do the authorization. This might not be needed if we have
    /// proven ownership of the domain recently in a previous order.
    pub fn need_challenge(&self) -> bool {
        !self.api_auth.is_status_valid()
    }

    /// Get the dns challenge.
    ///
    /// The dns challenge is a `TXT` record that must put created under:
    ///
    /// ```text
    /// _acme-challenge.<domain-to-be-proven>.  TXT  <proof>
    /// ```
    ///
    /// The <proof> contains the signed token proving this account update it.
    ///
    /// ```no_run
    /// use acme_dns_tiny::order::Auth;
    /// use acme_dns_tiny::{Error, HttpClient, PollPolicy};
    ///
    /// fn dns_authorize<H: HttpClient>(auth: &Auth<H>, poll: &PollPolicy) -> Result<(), Error> {
    ///   let challenge = auth.dns_challenge()?;
    ///   let record = challenge.record_name();
    ///   // route_53_set_record(&record, "TXT", &challenge.dns_proof()?);
    ///   challenge.validate(poll)?;
    ///   Ok(())
    /// }
    /// ```
    pub fn dns_challenge(&self) -> Result<Challenge<H>> {
        let api_challenge = self.api_auth.dns_challenge().ok_or_else(|| {
            Error::Other(format!(
                "No dns-01 challenge offered for {}",
                self.domain_name()
            ))
        })?;
        Ok(Challenge {
            inner: self.inner.clone(),
            api_challenge: api_challenge.clone(),
            auth_url: self.auth_url.clone(),
            identifier: self.domain_name().to_string(),
        })
    }

    /// The authorization URL.
    pub fn url(&self) -> &str {
        &self.auth_url
    }

    /// Access the underlying JSON object for debugging. We don't
    /// refresh the authorization when the corresponding challenge is validated,
    /// so there will be no changes to see here.
    pub fn api_auth(&self) -> &ApiAuth {
        &self.api_auth
    }
}

/// A DNS-01 challenge as obtained from the [`Auth`].
///
/// [`Auth`]: struct.Auth.html
pub struct Challenge<H: HttpClient> {
    inner: Rc<AccountInner<H>>,
    api_challenge: ApiChallenge,
    auth_url: String,
    identifier: String,
}

impl<H: HttpClient> Challenge<H> {
    /// The domain name being proven.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Where the `TXT` record goes: `_acme-challenge.<domain>`.
    pub fn record_name(&self) -> String {
        dns_record_name(&self.identifier)
    }

    /// The `proof` is the `TXT` record placed under:
    ///
    /// ```text
    /// _acme-challenge.<domain-to-be-proven>.  TXT  <proof>
    /// ```
    pub fn dns_proof(&self) -> Result<String> {
        let acme_key = self.inner.transport.acme_key();
        dns_key_authorization(&self.api_challenge.token, acme_key)
    }

    /// Check whether this challlenge really need validation. It might already been
    /// done in a previous order for the same account.
    pub fn need_validate(&self) -> bool {
        self.api_challenge.is_status_pending()
    }

    /// Tell the ACME API the record is in place and it may start validating.
    pub fn signal_ready(&self) -> Result<()> {
        let url_chall = &self.api_challenge.url;
        debug!("Signal challenge ready for {}", self.identifier);
        let res = self.inner.transport.call(url_chall, &ApiEmptyObject)?;
        let _: ApiChallenge = read_json(res)?;
        Ok(())
    }

    /// Poll the authorization until the ACME API has decided.
    ///
    /// Returns the `valid` authorization. Any other final status is an
    /// [`Error::ValidationRejected`] carrying the challenge error reported by the API.
    ///
    /// [`Error::ValidationRejected`]: ../enum.Error.html#variant.ValidationRejected
    pub fn wait_for_auth_status(&self, poll: &PollPolicy) -> Result<ApiAuth> {
        let what = format!("authorization for {}", self.identifier);
        poll.poll(&what, || {
            let res = self.inner.transport.call(&self.auth_url, &ApiEmptyString)?;
            let auth: ApiAuth = read_json(res)?;
            if auth.is_status_valid() {
                return Ok(Some(auth));
            }
            if auth.is_status_final() {
                warn!("Authorization for {} is {}", self.identifier, auth.status);
                return Err(Error::ValidationRejected {
                    identifier: self.identifier.clone(),
                    problem: auth.challenge_error().cloned(),
                });
            }
            Ok(None)
        })
    }

    /// Signal the challenge and wait for the outcome.
    ///
    /// The user must first publish the `TXT` record.
    pub fn validate(&self, poll: &PollPolicy) -> Result<()> {
        self.signal_ready()?;
        self.wait_for_auth_status(poll)?;
        Ok(())
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_challenge(&self) -> &ApiChallenge {
        &self.api_challenge
    }
}
