use openssl::bn::{BigNum, BigNumContext};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::sign::Signer;

use crate::jwt::Jwk;
use crate::util::base64url;
use crate::Result;

/// Signature algorithm of an account key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAlg {
    Rs256,
    Es256,
    Es384,
}

impl KeyAlg {
    fn digest(self) -> MessageDigest {
        match self {
            KeyAlg::Rs256 | KeyAlg::Es256 => MessageDigest::sha256(),
            KeyAlg::Es384 => MessageDigest::sha384(),
        }
    }

    /// Byte width of one EC coordinate, and of `r`/`s` in a signature.
    fn coord_len(self) -> i32 {
        match self {
            KeyAlg::Rs256 => 0,
            KeyAlg::Es256 => 32,
            KeyAlg::Es384 => 48,
        }
    }
}

/// The private key identifying an ACME account.
///
/// RSA keys sign with `RS256`, EC keys on P-256 and P-384 with `ES256`/`ES384`.
/// Other key types are refused when the key is loaded.
#[derive(Clone, Debug)]
pub struct AcmeKey {
    private_key: PKey<Private>,
    alg: KeyAlg,
    /// set once we contacted the ACME API to figure out the key id
    key_id: Option<String>,
}

impl AcmeKey {
    /// Read a PEM encoded private key (PKCS#1, SEC1 or PKCS#8).
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pem)?;
        Self::from_key(pri_key)
    }

    /// Use an already loaded openssl key.
    pub fn from_key(private_key: PKey<Private>) -> Result<Self> {
        let alg = match private_key.id() {
            Id::RSA => KeyAlg::Rs256,
            Id::EC => {
                let curve = private_key.ec_key()?.group().curve_name();
                match curve {
                    Some(Nid::X9_62_PRIME256V1) => KeyAlg::Es256,
                    Some(Nid::SECP384R1) => KeyAlg::Es384,
                    _ => return Err("Unsupported EC curve for account key".into()),
                }
            }
            _ => return Err("Unsupported account key type".into()),
        };
        Ok(AcmeKey {
            private_key,
            alg,
            key_id: None,
        })
    }

    pub fn to_pem(&self) -> Result<String> {
        let pem = self.private_key.private_key_to_pem_pkcs8()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    /// JWS `alg` header value for this key.
    pub fn alg(&self) -> &'static str {
        match self.alg {
            KeyAlg::Rs256 => "RS256",
            KeyAlg::Es256 => "ES256",
            KeyAlg::Es384 => "ES384",
        }
    }

    /// The account URL, once the key is bound to an account.
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.key_id = Some(kid)
    }

    /// The public part of the key as a JWK.
    pub fn jwk(&self) -> Result<Jwk> {
        if self.alg == KeyAlg::Rs256 {
            let rsa = self.private_key.rsa()?;
            return Ok(Jwk::Rsa {
                e: base64url(&rsa.e().to_vec()),
                kty: "RSA".into(),
                n: base64url(&rsa.n().to_vec()),
            });
        }
        let ec = self.private_key.ec_key()?;
        let mut ctx = BigNumContext::new()?;
        let mut x = BigNum::new()?;
        let mut y = BigNum::new()?;
        ec.public_key()
            .affine_coordinates_gfp(ec.group(), &mut x, &mut y, &mut ctx)?;
        let len = self.alg.coord_len();
        let crv = if self.alg == KeyAlg::Es256 {
            "P-256"
        } else {
            "P-384"
        };
        Ok(Jwk::Ec {
            crv: crv.into(),
            kty: "EC".into(),
            x: base64url(&x.to_vec_padded(len)?),
            y: base64url(&y.to_vec_padded(len)?),
        })
    }

    /// RFC 7638 thumbprint, base64url encoded.
    pub fn thumbprint(&self) -> Result<String> {
        let jwk_json = serde_json::to_string(&self.jwk()?)?;
        let digest = hash(MessageDigest::sha256(), jwk_json.as_bytes())?;
        Ok(base64url(&*digest))
    }

    /// Sign `data` as a JWS signature value.
    ///
    /// ECDSA signatures are the fixed width concatenation `r || s`, not DER.
    pub(crate) fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        if self.alg == KeyAlg::Rs256 {
            let mut signer = Signer::new(self.alg.digest(), &self.private_key)?;
            signer.update(data)?;
            return Ok(signer.sign_to_vec()?);
        }
        let digest = hash(self.alg.digest(), data)?;
        let sig = EcdsaSig::sign(&digest, &*self.private_key.ec_key()?)?;
        let len = self.alg.coord_len();
        let mut v = sig.r().to_vec_padded(len)?;
        v.extend_from_slice(&sig.s().to_vec_padded(len)?);
        Ok(v)
    }
}
