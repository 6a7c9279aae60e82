use lazy_static::lazy_static;
use openssl::ec::{Asn1Flag, EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{self, PKey};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509Req, X509ReqBuilder, X509};
use regex::Regex;

use crate::Result;

lazy_static! {
    static ref RE_SAN: Regex =
        Regex::new(r"X509v3 Subject Alternative Name:\s*(?:critical)?\s*\n\s*([^\n]+)").unwrap();
    static ref RE_PEM_BLOCK: Regex =
        Regex::new(r"(?s)-----BEGIN CERTIFICATE-----.*?-----END CERTIFICATE-----\r?\n?").unwrap();
}

fn ec_group(nid: Nid) -> Result<EcGroup> {
    let mut g = EcGroup::from_curve_name(nid)?;
    // this is required for openssl 1.0.x (but not 1.1.x)
    g.set_asn1_flag(Asn1Flag::NAMED_CURVE);
    Ok(g)
}

/// Make an RSA private key (from which we can derive a public key).
///
/// This library does not check the number of bits used to create the key pair.
/// For Let's Encrypt, the bits must be between 2048 and 4096.
pub fn create_rsa_key(bits: u32) -> Result<PKey<pkey::Private>> {
    let pri_key_rsa = Rsa::generate(bits)?;
    Ok(PKey::from_rsa(pri_key_rsa)?)
}

/// Make a P-256 private key (from which we can derive a public key).
pub fn create_p256_key() -> Result<PKey<pkey::Private>> {
    let group = ec_group(Nid::X9_62_PRIME256V1)?;
    let pri_key_ec = EcKey::generate(&group)?;
    Ok(PKey::from_ec_key(pri_key_ec)?)
}

/// Make a P-384 private key pair (from which we can derive a public key).
pub fn create_p384_key() -> Result<PKey<pkey::Private>> {
    let group = ec_group(Nid::SECP384R1)?;
    let pri_key_ec = EcKey::generate(&group)?;
    Ok(PKey::from_ec_key(pri_key_ec)?)
}

/// A PKCS#10 certificate signing request.
///
/// Either built here from a private key and the domains, or read from an externally
/// made request.
pub struct Csr {
    req: X509Req,
    private_key: Option<String>,
}

impl Csr {
    /// Build a CSR with `domains[0]` as `CN` and all domains as DNS alt names.
    pub fn new(pkey: &PKey<pkey::Private>, domains: &[&str]) -> Result<Csr> {
        let primary = domains.first().ok_or("CSR needs at least one domain")?;

        let mut req_bld = X509ReqBuilder::new()?;
        req_bld.set_pubkey(pkey)?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_nid(Nid::COMMONNAME, primary)?;
        req_bld.set_subject_name(&name.build())?;

        // set all domains as alt names
        let mut stack = Stack::new()?;
        let ctx = req_bld.x509v3_context(None);
        let mut an = SubjectAlternativeName::new();
        for domain in domains {
            an.dns(domain);
        }
        let ext = an.build(&ctx)?;
        stack.push(ext)?;
        req_bld.add_extensions(&stack)?;

        req_bld.sign(pkey, MessageDigest::sha256())?;

        let pem = pkey.private_key_to_pem_pkcs8()?;
        Ok(Csr {
            req: req_bld.build(),
            private_key: Some(String::from_utf8_lossy(&pem).into_owned()),
        })
    }

    pub fn from_pem(pem: &[u8]) -> Result<Csr> {
        Ok(Csr {
            req: X509Req::from_pem(pem)?,
            private_key: None,
        })
    }

    pub fn from_der(der: &[u8]) -> Result<Csr> {
        Ok(Csr {
            req: X509Req::from_der(der)?,
            private_key: None,
        })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.req.to_der()?)
    }

    /// The PEM private key, when the CSR was built by [`Csr::new`].
    ///
    /// [`Csr::new`]: struct.Csr.html#method.new
    pub fn private_key(&self) -> Option<&str> {
        self.private_key.as_deref()
    }

    /// Domains requested by the CSR: the `CN` followed by the DNS alt names,
    /// without duplicates.
    pub fn domains(&self) -> Result<Vec<String>> {
        let mut domains: Vec<String> = vec![];
        let mut push = |d: &str| {
            if !d.is_empty() && !domains.iter().any(|e| e == d) {
                domains.push(d.to_string());
            }
        };

        for entry in self.req.subject_name().entries_by_nid(Nid::COMMONNAME) {
            let cn = std::str::from_utf8(entry.data().as_slice())
                .map_err(|e| format!("CSR common name is not UTF-8: {}", e))?;
            push(cn);
        }

        // openssl doesn't expose the requested extensions in a structured
        // way, so read them off the text form.
        let text = String::from_utf8_lossy(&self.req.to_text()?).into_owned();
        if let Some(caps) = RE_SAN.captures(&text) {
            for san in caps[1].split(',') {
                if let Some(dns) = san.trim().strip_prefix("DNS:") {
                    push(dns);
                }
            }
        }

        if domains.is_empty() {
            return Err("CSR has no common name nor DNS alt names".into());
        }
        Ok(domains)
    }
}

impl std::fmt::Debug for Csr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a certificate signing request")
    }
}

/// An issued certificate chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    private_key: Option<String>,
    certificate: String,
}

impl Certificate {
    /// Create Certificate from a PEM chain and, if known, its PEM private key.
    pub fn new(private_key: Option<String>, certificate: impl Into<String>) -> Self {
        Self {
            private_key,
            certificate: certificate.into(),
        }
    }

    /// The PEM encoded private key, if the CSR was made by this library.
    pub fn private_key(&self) -> Option<&str> {
        self.private_key.as_deref()
    }

    /// The PEM encoded certificate chain, leaf first.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// The PEM blocks of the chain, leaf first.
    pub fn certificates(&self) -> Vec<&str> {
        RE_PEM_BLOCK
            .find_iter(&self.certificate)
            .map(|m| m.as_str())
            .collect()
    }

    /// The leaf certificate as DER.
    pub fn certificate_der(&self) -> Result<Vec<u8>> {
        let x509 = X509::from_pem(self.certificate.as_bytes())?;
        Ok(x509.to_der()?)
    }

    /// Inspect the leaf certificate to count the number of (whole) valid days left.
    ///
    /// It's up to the ACME API provider to decide how long an issued certificate is valid.
    /// Let's Encrypt sets the validity to 90 days. This function reports 89 days for newly
    /// issued cert, since it counts _whole_ days.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> Result<i64> {
        let x509 = X509::from_pem(self.certificate.as_bytes())?;

        // convert asn1 time to Tm
        let not_after = format!("{}", x509.not_after());
        // Display trait produces this format, which is kinda dumb.
        // Apr 19 08:48:46 2019 GMT
        let expires = parse_date(&not_after)?;
        let dur = expires - time::now();

        Ok(dur.num_days())
    }
}

fn parse_date(s: &str) -> Result<time::Tm> {
    debug!("Parse date/time: {}", s);
    time::strptime(s, "%h %e %H:%M:%S %Y %Z")
        .map_err(|e| format!("Failed to parse date {:?}: {}", s, e).into())
}
