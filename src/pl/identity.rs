//! Ed25519 node identities and their text form.
//!
//! Serialized as `<address>:0:<public-hex>[:<secret-hex>]`, where the address is
//! the first five bytes of SHA-256 over the public key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ADDRESS_LENGTH: usize = 5;
pub const ADDRESS_HEX_LENGTH: usize = ADDRESS_LENGTH * 2;
const KEY_TYPE_ED25519: &str = "0";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid identity: {0}")]
    Parse(String),
    #[error("identity does not contain a private key")]
    NoPrivate,
    #[error("random source unavailable: {0}")]
    Random(String),
}

#[derive(Clone)]
pub struct Identity {
    address: [u8; ADDRESS_LENGTH],
    public: VerifyingKey,
    secret: Option<SigningKey>,
}

fn derive_address(public: &VerifyingKey) -> [u8; ADDRESS_LENGTH] {
    let digest = Sha256::digest(public.as_bytes());
    let mut addr = [0u8; ADDRESS_LENGTH];
    addr.copy_from_slice(&digest[..ADDRESS_LENGTH]);
    addr
}

fn decode_fixed<const N: usize>(what: &str, s: &str) -> Result<[u8; N], IdentityError> {
    let bytes = hex::decode(s).map_err(|e| IdentityError::Parse(format!("{what}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| IdentityError::Parse(format!("{what}: expected {N} bytes")))
}

impl Identity {
    pub fn generate() -> Result<Self, IdentityError> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).map_err(|e| IdentityError::Random(e.to_string()))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&seed)))
    }

    pub fn from_signing_key(secret: SigningKey) -> Self {
        let public = secret.verifying_key();
        Self {
            address: derive_address(&public),
            public,
            secret: Some(secret),
        }
    }

    pub fn address(&self) -> String {
        hex::encode(self.address)
    }

    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    /// Text form; the secret half is included only when asked for and present.
    pub fn to_string_with(&self, include_private: bool) -> String {
        let mut s = format!(
            "{}:{KEY_TYPE_ED25519}:{}",
            self.address(),
            hex::encode(self.public.as_bytes())
        );
        if include_private {
            if let Some(secret) = &self.secret {
                s.push(':');
                s.push_str(&hex::encode(secret.to_bytes()));
            }
        }
        s
    }

    pub fn public_only(&self) -> Self {
        Self {
            address: self.address,
            public: self.public,
            secret: None,
        }
    }

    /// The address matches the public key, and the secret half (if any) matches too.
    pub fn locally_validate(&self) -> bool {
        if derive_address(&self.public) != self.address {
            return false;
        }
        match &self.secret {
            Some(secret) => secret.verifying_key() == self.public,
            None => true,
        }
    }

    pub fn sign(&self, data: &[u8]) -> Result<Signature, IdentityError> {
        let secret = self.secret.as_ref().ok_or(IdentityError::NoPrivate)?;
        Ok(secret.sign(data))
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(sig) => self.public.verify(data, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        if fields.len() != 3 && fields.len() != 4 {
            return Err(IdentityError::Parse(format!(
                "expected 3 or 4 ':'-separated fields, got {}",
                fields.len()
            )));
        }
        if fields[0].len() != ADDRESS_HEX_LENGTH {
            return Err(IdentityError::Parse(format!(
                "address must be {ADDRESS_HEX_LENGTH} hex digits"
            )));
        }
        if fields[1] != KEY_TYPE_ED25519 {
            return Err(IdentityError::Parse(format!("unsupported key type {:?}", fields[1])));
        }
        let address = decode_fixed::<ADDRESS_LENGTH>("address", fields[0])?;
        let public_bytes = decode_fixed::<32>("public key", fields[2])?;
        let public = VerifyingKey::from_bytes(&public_bytes)
            .map_err(|e| IdentityError::Parse(format!("public key: {e}")))?;
        let secret = match fields.get(3) {
            Some(hex_secret) if !hex_secret.is_empty() => {
                let bytes = decode_fixed::<32>("secret key", hex_secret)?;
                Some(SigningKey::from_bytes(&bytes))
            }
            _ => None,
        };
        Ok(Self {
            address,
            public,
            secret,
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(false))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address())
            .field("has_private", &self.has_private())
            .finish()
    }
}
