//! Issue a certificate against Let's Encrypt staging using an external DNS hook.
//!
//! ```text
//! DOMAINS=example.org,*.example.org \
//! CONTACT=mailto:admin@example.org \
//! cargo run --example dns01-hook -- ./my-dns-hook.sh
//! ```
//!
//! The hook is called as `./my-dns-hook.sh create|cleanup <domain> <value>`.
use std::env;
use std::fs;
use std::path::Path;

use acme_dns_tiny::{create_p256_key, create_p384_key};
use acme_dns_tiny::{AcmeKey, CommandHook, Csr, Directory, DirectoryUrl, Error, IssueConfig, UReq};

const ACCOUNT_KEY: &str = "account.key";

fn load_or_create_key() -> Result<AcmeKey, Error> {
    if Path::new(ACCOUNT_KEY).exists() {
        return AcmeKey::from_pem(&fs::read(ACCOUNT_KEY)?);
    }
    let key = AcmeKey::from_key(create_p256_key()?)?;
    fs::write(ACCOUNT_KEY, key.to_pem()?)?;
    Ok(key)
}

fn main() -> Result<(), Error> {
    env_logger::init();

    let hook_program = env::args().nth(1).ok_or("usage: dns01-hook <hook-program>")?;
    let domains = env::var("DOMAINS").map_err(|_| "DOMAINS is not set")?;
    let domains: Vec<&str> = domains.split(',').map(|d| d.trim()).collect();
    let contact = env::var("CONTACT").ok();
    let contact: Vec<&str> = contact.iter().map(|c| c.as_str()).collect();

    let dir = Directory::from_url(UReq::default(), DirectoryUrl::LetsEncryptStaging)?;
    let acc = dir.account(load_or_create_key()?, &contact)?;

    let csr = Csr::new(&create_p384_key()?, &domains)?;
    let mut hook = CommandHook::new(hook_program);
    let cert = acc.issue(&csr, &mut hook, &IssueConfig::default())?;

    fs::write("chain.pem", cert.certificate())?;
    if let Some(key) = cert.private_key() {
        fs::write("domain.key", key)?;
    }
    println!(
        "Wrote chain.pem, valid for {} days",
        cert.valid_days_left()?
    );
    Ok(())
}
