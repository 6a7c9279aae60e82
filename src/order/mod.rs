//! Order life cycle.
//!
//! An order goes through a life cycle of different states that require various actions by
//! the user. To ensure the user only use appropriate actions, this library have simple façade
//! structs that wraps the actual [`ApiOrder`].
//!
//! 1. First prove ownership:
//!    * [`NewOrder`] -> [`Auth`]* -> [`Challenge`]
//! 2. Then submit CSR and download the cert.
//!    * [`NewOrder`] -> [`CsrOrder`] -> [`CertOrder`]
//!
//! \* Possibly multiple auths.
//!
//! [`Account::issue`] drives all of it with a [`DnsHook`].
//!
//! [`ApiOrder`]: ../api/struct.ApiOrder.html
//! [`NewOrder`]: struct.NewOrder.html
//! [`Auth`]: struct.Auth.html
//! [`Challenge`]: struct.Challenge.html
//! [`CsrOrder`]: struct.CsrOrder.html
//! [`CertOrder`]: struct.CertOrder.html
//! [`Account::issue`]: ../struct.Account.html#method.issue
//! [`DnsHook`]: ../hook/trait.DnsHook.html
use openssl::pkey::{self, PKey};
use std::rc::Rc;

use crate::acc::AccountInner;
use crate::api::{ApiAuth, ApiEmptyString, ApiFinalize, ApiOrder};
use crate::cert::{Certificate, Csr};
use crate::poll::PollPolicy;
use crate::req::HttpClient;
use crate::util::{base64url, read_json};
use crate::{Error, Result};

mod auth;
mod issue;

pub use self::auth::{Auth, Challenge};
pub(crate) use self::issue::issue;

/// The order wrapped with an outer façade.
pub(crate) struct Order<H: HttpClient> {
    inner: Rc<AccountInner<H>>,
    api_order: ApiOrder,
    url: String,
}

impl<H: HttpClient> Order<H> {
    pub(crate) fn new(inner: &Rc<AccountInner<H>>, api_order: ApiOrder, url: String) -> Self {
        Order {
            inner: inner.clone(),
            api_order,
            url,
        }
    }
}

/// Helper to refresh an order status (POST-as-GET).
pub(crate) fn refresh_order<H: HttpClient>(
    inner: &Rc<AccountInner<H>>,
    url: String,
) -> Result<Order<H>> {
    let res = inner.transport.call(&url, &ApiEmptyString)?;
    let api_order: ApiOrder = read_json(res)?;
    Ok(Order {
        inner: inner.clone(),
        api_order,
        url,
    })
}

/// Poll the order until `done` says it reached the wanted status.
///
/// An `invalid` order can't progress any further and ends polling with an error.
fn wait_for_order<H: HttpClient, F: Fn(&ApiOrder) -> bool>(
    inner: &Rc<AccountInner<H>>,
    url: &str,
    poll: &PollPolicy,
    what: &str,
    done: F,
) -> Result<Order<H>> {
    poll.poll(what, || {
        let order = refresh_order(inner, url.to_string())?;
        if order.api_order.is_status_invalid() {
            return Err(Error::OrderInvalid(order.api_order.error.clone()));
        }
        Ok(if done(&order.api_order) {
            Some(order)
        } else {
            None
        })
    })
}

/// A new order created by [`Account::new_order`].
///
/// An order is created using one or many domains (a primary `CN` and possible multiple
/// alt names). All domains in the order must have authorizations ([confirmed ownership])
/// before the order can progress to submitting a [CSR].
///
/// This order façade provides calls to provide such authorizations and to progress the order
/// when ready.
///
/// The ACME API provider might "remember" for a time that you already own a domain, which
/// means you might not need to prove the ownership every time. Use appropriate methods to
/// first check whether you really need to handle authorizations.
///
/// [`Account::new_order`]: ../struct.Account.html#method.new_order
/// [confirmed ownership]: ../index.html#domain-ownership
/// [CSR]: https://en.wikipedia.org/wiki/Certificate_signing_request
pub struct NewOrder<H: HttpClient> {
    pub(crate) order: Order<H>,
}

impl<H: HttpClient> NewOrder<H> {
    /// Tell if the domains in this order have been authorized.
    ///
    /// This doesn't do any calls against the API. You must manually call [`refresh`].
    ///
    /// In ACME API terms, the order can either be `ready` or `valid`, which both would
    /// mean we have passed the authorization stage.
    ///
    /// [`refresh`]: struct.NewOrder.html#method.refresh
    pub fn is_validated(&self) -> bool {
        self.order.api_order.is_status_ready() || self.order.api_order.is_status_valid()
    }

    /// If the order [`is_validated`] progress it to a [`CsrOrder`].
    ///
    /// This doesn't do any calls against the API. You must manually call [`refresh`].
    ///
    /// [`is_validated`]: struct.NewOrder.html#method.is_validated
    /// [`CsrOrder`]: struct.CsrOrder.html
    /// [`refresh`]: struct.NewOrder.html#method.refresh
    pub fn confirm_validations(&self) -> Option<CsrOrder<H>> {
        if self.is_validated() {
            Some(CsrOrder {
                order: Order::new(
                    &self.order.inner,
                    self.order.api_order.clone(),
                    self.order.url.clone(),
                ),
            })
        } else {
            None
        }
    }

    /// Refresh the order state against the ACME API.
    ///
    /// The specification calls this a "POST-as-GET" against the order URL.
    pub fn refresh(&mut self) -> Result<()> {
        let order = refresh_order(&self.order.inner, self.order.url.clone())?;
        self.order = order;
        Ok(())
    }

    /// Poll the order until all authorizations are done and it is `ready`.
    ///
    /// Fails with [`Error::OrderInvalid`] if the order goes `invalid` instead.
    ///
    /// [`Error::OrderInvalid`]: ../enum.Error.html#variant.OrderInvalid
    pub fn wait_ready(self, poll: &PollPolicy) -> Result<CsrOrder<H>> {
        let order = wait_for_order(&self.order.inner, &self.order.url, poll, "order ready", |o| {
            o.is_status_ready() || o.is_status_valid()
        })?;
        Ok(CsrOrder { order })
    }

    /// Provide the authorizations. The number of authorizations will be the same as
    /// the number of domains requests, i.e. at least one (the primary CN), but possibly
    /// more (for alt names).
    ///
    /// If the order includes new domain names that have not been authorized before, this
    /// list might contain a mix of already valid and not yet valid auths.
    pub fn authorizations(&self) -> Result<Vec<Auth<H>>> {
        let mut result = vec![];
        for auth_url in &self.order.api_order.authorizations {
            let res = self.order.inner.transport.call(auth_url, &ApiEmptyString)?;
            let api_auth: ApiAuth = read_json(res)?;
            result.push(Auth::new(&self.order.inner, api_auth, auth_url));
        }
        Ok(result)
    }

    /// The order URL.
    pub fn url(&self) -> &str {
        &self.order.url
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &ApiOrder {
        &self.order.api_order
    }
}

/// An order that is ready for a [CSR] submission.
///
/// To submit the CSR is called "finalizing" the order.
///
/// The CSR is either built by the user (see [`Csr`]), or created here from a private
/// key and the domains of the order with [`finalize_pkey`].
///
/// This library makes no attempt at validating which key algorithms are used. Unsupported
/// algorithms will show as an error when finalizing the order. It is up to the ACME API
/// provider to decide which key algorithms to support.
///
/// [CSR]: https://en.wikipedia.org/wiki/Certificate_signing_request
/// [`Csr`]: ../struct.Csr.html
/// [`finalize_pkey`]: struct.CsrOrder.html#method.finalize_pkey
pub struct CsrOrder<H: HttpClient> {
    pub(crate) order: Order<H>,
}

impl<H: HttpClient> CsrOrder<H> {
    /// Finalize the order by submitting `csr`.
    ///
    /// Once the CSR has been submitted, the order goes into a `processing` status,
    /// where we poll according to `poll` until it is `valid`.
    pub fn finalize(self, csr: &Csr, poll: &PollPolicy) -> Result<CertOrder<H>> {
        // this is not the same as PEM.
        let csr_der = csr.to_der()?;
        let finalize = ApiFinalize {
            csr: base64url(&csr_der),
        };

        let inner = self.order.inner;
        let order_url = self.order.url;
        let finalize_url = &self.order.api_order.finalize;

        // if the CSR is invalid, we will get a 4xx code back.
        debug!("Finalize order {}", order_url);
        inner.transport.call(finalize_url, &finalize)?;

        // valid -> cert is issued
        // invalid -> the whole thing is off
        let order = wait_for_order(&inner, &order_url, poll, "order valid", |o| {
            o.is_status_valid()
        })?;

        Ok(CertOrder {
            private_key: csr.private_key().map(|k| k.to_string()),
            order,
        })
    }

    /// Finalize with a CSR created from `private_key` and the domains of the order.
    pub fn finalize_pkey(
        self,
        private_key: &PKey<pkey::Private>,
        poll: &PollPolicy,
    ) -> Result<CertOrder<H>> {
        let csr = {
            let domains = self.order.api_order.domains();
            Csr::new(private_key, &domains)?
        };
        self.finalize(&csr, poll)
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &ApiOrder {
        &self.order.api_order
    }
}

/// Order for an issued certificate that is ready to download.
pub struct CertOrder<H: HttpClient> {
    private_key: Option<String>,
    order: Order<H>,
}

impl<H: HttpClient> CertOrder<H> {
    /// Download the issued certificate chain (POST-as-GET).
    ///
    /// The chain is returned as PEM, leaf certificate first.
    pub fn download_cert(self) -> Result<Certificate> {
        let url = self
            .order
            .api_order
            .certificate
            .as_ref()
            .ok_or("Valid order has no certificate URL")?;

        let res = self.order.inner.transport.call(url, &ApiEmptyString)?;
        let cert = res.into_body();
        if !cert.contains("-----BEGIN CERTIFICATE-----") {
            return Err(format!("Downloaded certificate is not PEM: {}", cert).into());
        }
        debug!("Downloaded certificate from {}", url);

        Ok(Certificate::new(self.private_key, cert))
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &ApiOrder {
        &self.order.api_order
    }
}
