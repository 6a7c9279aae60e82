//
use std::rc::Rc;

use crate::api::{ApiAccount, ApiDirectory, ApiEmptyString, ApiIdentifier, ApiKeyChange, ApiNewOrder, ApiOrder};
use crate::cert::{Certificate, Csr};
use crate::hook::DnsHook;
use crate::jwt::jws_key_change;
use crate::order::{self, NewOrder, Order};
use crate::poll::IssueConfig;
use crate::req::HttpClient;
use crate::trans::Transport;
use crate::util::read_json;
use crate::{Error, Result};

mod akey;

pub use self::akey::AcmeKey;

#[derive(Clone, Debug)]
pub(crate) struct AccountInner<H: HttpClient> {
    pub transport: Transport<H>,
    pub url: String,
    pub api_account: ApiAccount,
    pub api_directory: ApiDirectory,
}

/// Account with an ACME provider.
///
/// Accounts are created using [`Directory::account`] and consist of the account URL
/// handed out by the API and the private key signing every request.
///
/// The account key can be RSA, or elliptic curve P-256 or P-384. This does not affect
/// which key algorithms can be used for the issued certificates.
///
/// [`Directory::account`]: struct.Directory.html#method.account
#[derive(Clone)]
pub struct Account<H: HttpClient> {
    inner: Rc<AccountInner<H>>,
}

impl<H: HttpClient> Account<H> {
    pub(crate) fn new(
        transport: Transport<H>,
        url: String,
        api_account: ApiAccount,
        api_directory: ApiDirectory,
    ) -> Self {
        Account {
            inner: Rc::new(AccountInner {
                transport,
                url,
                api_account,
                api_directory,
            }),
        }
    }

    fn with_api_account(&self, api_account: ApiAccount) -> Self {
        Account::new(
            self.inner.transport.clone(),
            self.inner.url.clone(),
            api_account,
            self.inner.api_directory.clone(),
        )
    }

    /// The account URL, used as key id (`kid`) in signed requests.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// The key signing requests for this account.
    pub fn acme_key(&self) -> &AcmeKey {
        self.inner.transport.acme_key()
    }

    /// Fetch the account object again (POST-as-GET).
    pub fn refresh(&self) -> Result<Account<H>> {
        let res = self.inner.transport.call(&self.inner.url, &ApiEmptyString)?;
        let api_account: ApiAccount = read_json(res)?;
        Ok(self.with_api_account(api_account))
    }

    /// Replace the contact URLs (i.e. `mailto:admin@example.org`) of the account.
    pub fn update_contact<S: AsRef<str>>(&self, contact: &[S]) -> Result<Account<H>> {
        let acc = ApiAccount {
            contact: Some(contact.iter().map(|c| c.as_ref().to_string()).collect()),
            ..Default::default()
        };
        let res = self.inner.transport.call(&self.inner.url, &acc)?;
        let api_account: ApiAccount = read_json(res)?;
        Ok(self.with_api_account(api_account))
    }

    /// Create a new order to issue a certificate for this account.
    ///
    /// Each order has a required `primary_name` (which will be set as the certificates `CN`)
    /// and a variable number of `alt_names`.
    ///
    /// This library doesn't constrain the number of `alt_names`, but it is limited by the ACME
    /// API provider. Let's Encrypt sets a max of [100 names] per certificate.
    ///
    /// Every call creates a new order with the ACME API provider, even when the domain
    /// names supplied are exactly the same.
    ///
    /// [100 names]: https://letsencrypt.org/docs/rate-limits/
    pub fn new_order(&self, primary_name: &str, alt_names: &[&str]) -> Result<NewOrder<H>> {
        // construct the identifiers
        let prim_arr = [primary_name];
        let domains = prim_arr.iter().chain(alt_names);
        let order = ApiNewOrder {
            identifiers: domains.map(|s| ApiIdentifier::dns(s)).collect(),
        };

        let new_order_url = &self.inner.api_directory.newOrder;

        let res = self.inner.transport.call(new_order_url, &order)?;
        let order_url = res.expect_header("location")?.to_string();
        let api_order: ApiOrder = read_json(res)?;
        debug!("Created order {} in status {}", order_url, api_order.status);

        let order = Order::new(&self.inner, api_order, order_url);
        Ok(NewOrder { order })
    }

    /// Issue a certificate for the domains of `csr`, proving control over them with
    /// DNS-01 records published through `hook`.
    ///
    /// Creates a new order, provisions and validates every pending authorization,
    /// finalizes the order with `csr` and downloads the certificate chain.
    ///
    /// Every record created through `hook` is cleaned up again before this returns,
    /// whether issuance succeeded or not.
    pub fn issue(
        &self,
        csr: &Csr,
        hook: &mut dyn DnsHook,
        config: &IssueConfig,
    ) -> Result<Certificate> {
        order::issue(self, csr, hook, config)
    }

    /// Replace the account key with `new_key`.
    ///
    /// The account URL stays the same. The returned account signs with the new key, the
    /// old key is of no further use after this call.
    pub fn rollover(&self, mut new_key: AcmeKey) -> Result<Account<H>> {
        let key_change_url = &self.inner.api_directory.keyChange;
        let old_key = self.inner.transport.acme_key();

        let change = ApiKeyChange {
            account: self.inner.url.clone(),
            oldKey: old_key.jwk()?,
        };
        // inner JWS signed by the new key, wrapped in an outer one signed by the old.
        let inner_jws = jws_key_change(key_change_url, &new_key, &change)?;
        self.inner.transport.call(key_change_url, &inner_jws)?;
        info!("Rolled over key for account {}", self.inner.url);

        new_key.set_key_id(self.inner.url.clone());
        let transport = Transport::new(
            self.inner.transport.nonce_store(),
            self.inner.transport.client().clone(),
            new_key,
        );
        Ok(Account::new(
            transport,
            self.inner.url.clone(),
            self.inner.api_account.clone(),
            self.inner.api_directory.clone(),
        ))
    }

    /// Deactivate the account.
    ///
    /// Deactivating an already deactivated account succeeds.
    pub fn deactivate(&self) -> Result<ApiAccount> {
        let acc = ApiAccount {
            status: Some("deactivated".into()),
            ..Default::default()
        };
        let api_account: ApiAccount = match self.inner.transport.call(&self.inner.url, &acc) {
            Ok(res) => read_json(res)?,
            Err(Error::Api(problem)) if is_already_deactivated(&problem) => {
                debug!("Account already deactivated: {}", problem);
                acc
            }
            Err(e) => return Err(e),
        };
        if !api_account.is_status_deactivated() {
            return Err(format!("Account is in status: {:?}", api_account.status).into());
        }
        info!("Deactivated account {}", self.inner.url);
        Ok(api_account)
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_account(&self) -> &ApiAccount {
        &self.inner.api_account
    }
}

// The API refuses requests signed for a deactivated account with `unauthorized`.
fn is_already_deactivated(problem: &crate::api::ApiProblem) -> bool {
    problem.is_unauthorized()
        && problem
            .detail
            .as_deref()
            .map(|d| d.contains("deactivated"))
            .unwrap_or(false)
}
