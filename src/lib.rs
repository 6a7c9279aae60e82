#![warn(clippy::all)]
//! acme-dns-tiny is a small client for ACME (Automatic Certificate Management Environment)
//! services such as [Let's Encrypt](https://letsencrypt.org/), proving domain control with
//! DNS-01 challenges only.
//!
//! Uses ACME v2 ([RFC 8555](https://tools.ietf.org/html/rfc8555)) to issue/renew certificates.
//!
//! # Quick start
//!
//! ```no_run
//! use acme_dns_tiny::{create_p384_key, AcmeKey, CommandHook, Csr, Error};
//! use acme_dns_tiny::{Directory, DirectoryUrl, IssueConfig, UReq};
//!
//! fn request_cert() -> Result<(), Error> {
//!
//! // Use DirectoryUrl::LetsEncryptStaging for dev/testing.
//! let url = DirectoryUrl::LetsEncrypt;
//!
//! // Create a directory entrypoint.
//! let dir = Directory::from_url(UReq::default(), url)?;
//!
//! // The account key. Keep it around, it is the account.
//! let key = AcmeKey::from_pem(&std::fs::read("account.key")?)?;
//!
//! // Registers the key, or finds the account already registered for it.
//! let acc = dir.account(key, &["mailto:foo@bar.com"])?;
//!
//! // The CSR names the domains of the certificate. Build one from a fresh key,
//! // or read one made elsewhere with Csr::from_pem.
//! let csr = Csr::new(&create_p384_key()?, &["myfancydomain.com", "*.myfancydomain.com"])?;
//!
//! // Creates and removes the _acme-challenge TXT records.
//! let mut hook = CommandHook::new("./dns-hook.sh");
//!
//! // Order, prove control over every domain, finalize and download.
//! let cert = acc.issue(&csr, &mut hook, &IssueConfig::default())?;
//!
//! std::fs::write("chain.pem", cert.certificate())?;
//!
//! Ok(())
//! }
//! ```
//!
//! ## Domain ownership
//!
//! Every domain of a certificate needs an authorization. For DNS-01 that means publishing
//! a `TXT` record `_acme-challenge.<domain>` with a value derived from the account key and
//! the challenge token. The library never talks to DNS itself, it calls a [`DnsHook`] to
//! create and later remove the records.
//!
//! The lower level [`order`] module exposes the individual steps for those who want to drive
//! the order themselves.
//!
//! [`DnsHook`]: hook/trait.DnsHook.html
//! [`order`]: order/index.html
//!
//! ## Accounts
//!
//! Besides [`Directory::account`], an [`Account`] can [roll over] to a new key and
//! [deactivate] itself.
//!
//! [`Directory::account`]: struct.Directory.html#method.account
//! [`Account`]: struct.Account.html
//! [roll over]: struct.Account.html#method.rollover
//! [deactivate]: struct.Account.html#method.deactivate
//!
//! ## Rate limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API i not being
//! abused. It might be tempting to poll really often with a tight [`PollPolicy`], but
//! balance this against the real risk of having access cut off.
//!
//! [rate limits]: https://letsencrypt.org/docs/rate-limits/
//! [`PollPolicy`]: struct.PollPolicy.html
//!
//! ### Use staging for dev!
//!
//! Especially take care to use the Let`s Encrypt staging environment for development
//! where the rate limits are more relaxed.
//!
//! See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [`DirectoryUrl::LetsEncryptStaging`]: enum.DirectoryUrl.html#variant.LetsEncryptStaging
//!
//! ## Implementation details
//!
//! Synchronous I/O and blocking calls, one run at a time. All HTTP goes through the
//! [`HttpClient`] trait, [`UReq`] is the default implementation.
//!
//! Relies heavily on the [openssl](https://docs.rs/openssl/) crate to make JWK/JWS and
//! sign requests to the API.
//!
//! [`HttpClient`]: trait.HttpClient.html
//! [`UReq`]: struct.UReq.html
//!
#[macro_use]
extern crate log;

mod acc;
mod cert;
mod dir;
mod error;
mod jwt;
mod poll;
mod req;
mod trans;
mod ureq;
mod util;

pub mod api;
pub mod hook;
pub mod order;

#[cfg(test)]
mod test;

pub use crate::acc::{Account, AcmeKey};
pub use crate::cert::{create_p256_key, create_p384_key, create_rsa_key, Certificate, Csr};
pub use crate::dir::{Directory, DirectoryUrl};
pub use crate::error::{Error, Result};
pub use crate::hook::{CommandHook, DnsHook};
pub use crate::jwt::{Jwk, Jws};
pub use crate::poll::{Backoff, IssueConfig, PollPolicy, Sleep, ThreadSleep};
pub use crate::req::{HttpClient, HttpResponse};
pub use crate::ureq::UReq;
