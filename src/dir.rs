//
use std::rc::Rc;

use crate::acc::AcmeKey;
use crate::api::{ApiAccount, ApiDirectory};
use crate::req::HttpClient;
use crate::trans::{NonceStore, Transport};
use crate::util::read_json;
use crate::{Account, Result};

const LETSENCRYPT: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory. Not appropriate for testing and dev.
    LetsEncrypt,
    /// The staging Let's Encrypt directory. Use for testing and dev. Doesn't issue
    /// "valid" certificates. The root signing certificate is not supposed
    /// to be in any trust chains.
    LetsEncryptStaging,
    /// Provide an arbitrary director URL to connect to.
    Other(&'a str),
}

impl<'a> DirectoryUrl<'a> {
    fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING,
            DirectoryUrl::Other(s) => s,
        }
    }
}

/// Entry point for accessing an ACME API.
///
/// The directory is fetched once and then used for the rest of the run. It also owns
/// the nonce store shared by every request made through accounts created from it.
#[derive(Clone)]
pub struct Directory<H: HttpClient> {
    client: H,
    nonce_store: Rc<NonceStore<H>>,
    api_directory: ApiDirectory,
}

impl<H: HttpClient> Directory<H> {
    /// Fetch the directory from `url`.
    ///
    /// Fails if the directory can't be read or lacks any of the required endpoints.
    pub fn from_url(client: H, url: DirectoryUrl) -> Result<Directory<H>> {
        let dir_url = url.to_url();
        debug!("Fetch directory {}", dir_url);
        let res = client.get(dir_url)?.handle_errors()?;
        let api_directory: ApiDirectory = read_json(res)?;
        let nonce_store = Rc::new(NonceStore::new(client.clone(), &api_directory.newNonce));
        Ok(Directory {
            client,
            nonce_store,
            api_directory,
        })
    }

    /// Register a new account for `acme_key`, or look up the existing one.
    ///
    /// The `newAccount` endpoint is called either way. For a key that is already
    /// registered the API answers `200` with the existing account URL, for a new one
    /// `201`. The terms of service are agreed to.
    ///
    /// If the existing account has a different contact list than a non-empty
    /// `contact`, the account is updated with `contact`. An empty `contact` leaves
    /// the registered contacts alone.
    pub fn account(&self, acme_key: AcmeKey, contact: &[&str]) -> Result<Account<H>> {
        if self.api_directory.externalAccountRequired() {
            return Err("The ACME API requires external account binding, which is not supported".into());
        }
        if let Some(tos) = self.api_directory.termsOfService() {
            info!("Agreeing to terms of service: {}", tos);
        }

        let contact: Vec<String> = contact.iter().map(|c| c.to_string()).collect();
        let acc = ApiAccount {
            contact: Some(contact.clone()),
            termsOfServiceAgreed: Some(true),
            ..Default::default()
        };

        let (account, status) = self.new_account(acme_key, &acc)?;
        match status {
            201 => info!("Registered new account: {}", account.url()),
            200 => {
                info!("Account already registered: {}", account.url());
                if !contact.is_empty() && account.api_account().contact() != &contact[..] {
                    info!("Update account contact");
                    return account.update_contact(&contact);
                }
            }
            _ => {
                return Err(format!("Unexpected status {} from newAccount", status).into());
            }
        }
        Ok(account)
    }

    /// Look up the account of `acme_key` without creating one.
    ///
    /// Fails with an `accountDoesNotExist` problem if the key is unknown to the API.
    pub fn existing_account(&self, acme_key: AcmeKey) -> Result<Account<H>> {
        let acc = ApiAccount {
            onlyReturnExisting: Some(true),
            ..Default::default()
        };
        let (account, status) = self.new_account(acme_key, &acc)?;
        if status != 200 {
            return Err(format!("Unexpected status {} looking up account", status).into());
        }
        debug!("Found account: {}", account.url());
        Ok(account)
    }

    fn new_account(&self, acme_key: AcmeKey, acc: &ApiAccount) -> Result<(Account<H>, u16)> {
        let mut transport = Transport::new(&self.nonce_store, self.client.clone(), acme_key);
        let res = transport.call_jwk(&self.api_directory.newAccount, acc)?;
        let status = res.status();
        let kid = res.expect_header("location")?.to_string();
        debug!("Key id is: {}", kid);
        // fill in the server returned key id
        transport.set_key_id(kid.clone());

        let api_account: ApiAccount = read_json(res)?;

        let account = Account::new(transport, kid, api_account, self.api_directory.clone());
        Ok((account, status))
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_directory(&self) -> &ApiDirectory {
        &self.api_directory
    }
}
