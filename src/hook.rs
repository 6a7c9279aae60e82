//! Provisioning of the DNS-01 `TXT` records.
//!
//! The library never touches DNS itself. Between discovering a challenge and telling the
//! ACME API to validate it, [`Account::issue`] calls a [`DnsHook`] to publish
//! `_acme-challenge.<domain> TXT <value>`, and afterwards to remove it again.
//!
//! [`Account::issue`]: ../struct.Account.html#method.issue
//! [`DnsHook`]: trait.DnsHook.html
use std::ffi::OsString;
use std::process::Command;

use crate::Result;

/// Name of the `TXT` record validated for `domain`.
///
/// A wildcard domain is validated on its base domain.
///
/// ```
/// use acme_dns_tiny::hook::dns_record_name;
/// assert_eq!(dns_record_name("example.org"), "_acme-challenge.example.org");
/// assert_eq!(dns_record_name("*.example.org"), "_acme-challenge.example.org");
/// ```
pub fn dns_record_name(domain: &str) -> String {
    format!("_acme-challenge.{}", domain.trim_start_matches("*."))
}

/// Creates and removes DNS-01 `TXT` records.
///
/// `create` must only return once the record is in a state the hook considers ready
/// for validation. The engine does not check DNS propagation itself. Any `Err` is fatal
/// for the order, but `cleanup` is still called for every record already created.
pub trait DnsHook {
    /// Publish `value` at `_acme-challenge.<identifier>`.
    fn create(&mut self, identifier: &str, value: &str) -> Result<()>;

    /// Remove the record published by `create`.
    fn cleanup(&mut self, identifier: &str, value: &str) -> Result<()>;
}

/// A [`DnsHook`] running an external program.
///
/// The program is invoked as
///
/// ```text
/// <program> [args...] create <identifier> <value>
/// <program> [args...] cleanup <identifier> <value>
/// ```
///
/// with the full record name in the `ACME_DNS_RECORD` environment variable. A non-zero
/// exit status is a failure.
///
/// [`DnsHook`]: trait.DnsHook.html
#[derive(Debug, Clone)]
pub struct CommandHook {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandHook {
    pub fn new(program: impl Into<OsString>) -> Self {
        CommandHook {
            program: program.into(),
            args: vec![],
        }
    }

    /// Fixed arguments put before the action.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn run(&self, action: &str, identifier: &str, value: &str) -> Result<()> {
        debug!("Run dns hook {:?} {} {}", self.program, action, identifier);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(action)
            .arg(identifier)
            .arg(value)
            .env("ACME_DNS_RECORD", dns_record_name(identifier))
            .output()?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!("{}: {}", output.status, stderr.trim()).into())
    }
}

impl DnsHook for CommandHook {
    fn create(&mut self, identifier: &str, value: &str) -> Result<()> {
        self.run("create", identifier, value)
    }

    fn cleanup(&mut self, identifier: &str, value: &str) -> Result<()> {
        self.run("cleanup", identifier, value)
    }
}
