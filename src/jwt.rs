//! JWS envelopes for requests against the ACME API.
use serde::{Deserialize, Serialize};

use crate::acc::AcmeKey;
use crate::util::base64url;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct JwsProtected {
    alg: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl JwsProtected {
    fn new_jwk(key: &AcmeKey, url: &str, nonce: Option<String>) -> Result<Self> {
        Ok(JwsProtected {
            alg: key.alg().into(),
            url: url.into(),
            nonce,
            jwk: Some(key.jwk()?),
            ..Default::default()
        })
    }
    fn new_kid(key: &AcmeKey, url: &str, nonce: String) -> Result<Self> {
        let kid = key
            .key_id()
            .ok_or("Account key has no key id (account URL) yet")?;
        Ok(JwsProtected {
            alg: key.alg().into(),
            url: url.into(),
            nonce: Some(nonce),
            kid: Some(kid.into()),
            ..Default::default()
        })
    }
}

/// Public account key in JWK form.
///
/// Only the members required for the key type are kept, declared in lexical order.
/// Serializing the value therefore yields the canonical form hashed for the RFC 7638
/// thumbprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Jwk {
    Ec {
        crv: String,
        kty: String,
        x: String,
        y: String,
    },
    Rsa {
        e: String,
        kty: String,
        n: String,
    },
}

/// A flattened JSON JWS, the body of every signed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// JWS with the full `jwk` in the header. Only for the newAccount request.
pub(crate) fn jws_with_jwk<T: Serialize + ?Sized>(
    url: &str,
    nonce: String,
    key: &AcmeKey,
    payload: &T,
) -> Result<Jws> {
    let protected = JwsProtected::new_jwk(key, url, Some(nonce))?;
    jws_with(protected, key, payload)
}

/// JWS with the account URL as `kid`. Every request after newAccount.
pub(crate) fn jws_with_kid<T: Serialize + ?Sized>(
    url: &str,
    nonce: String,
    key: &AcmeKey,
    payload: &T,
) -> Result<Jws> {
    let protected = JwsProtected::new_kid(key, url, nonce)?;
    jws_with(protected, key, payload)
}

/// The inner JWS of a key change. Signed by the new key, carries its `jwk` and no nonce.
pub(crate) fn jws_key_change<T: Serialize + ?Sized>(
    url: &str,
    new_key: &AcmeKey,
    payload: &T,
) -> Result<Jws> {
    let protected = JwsProtected::new_jwk(new_key, url, None)?;
    jws_with(protected, new_key, payload)
}

fn jws_with<T: Serialize + ?Sized>(
    protected: JwsProtected,
    key: &AcmeKey,
    payload: &T,
) -> Result<Jws> {
    let protected = {
        let pro_json = serde_json::to_string(&protected)?;
        base64url(pro_json.as_bytes())
    };
    let payload = {
        let pay_json = serde_json::to_string(payload)?;
        if pay_json == "\"\"" {
            // This is a special case produced by ApiEmptyString and should
            // not be further base64url encoded.
            "".to_string()
        } else {
            base64url(pay_json.as_bytes())
        }
    };

    let to_sign = format!("{}.{}", protected, payload);
    let signature = base64url(&key.sign(to_sign.as_bytes())?);

    Ok(Jws {
        protected,
        payload,
        signature,
    })
}

/// The value of the `_acme-challenge` TXT record for a dns-01 `token`.
///
/// `base64url(sha256(token "." thumbprint))`
pub(crate) fn dns_key_authorization(token: &str, key: &AcmeKey) -> Result<String> {
    let key_auth = format!("{}.{}", token, key.thumbprint()?);
    Ok(base64url(&openssl::sha::sha256(key_auth.as_bytes())))
}
