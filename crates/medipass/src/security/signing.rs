//! HMAC-SHA256 signatures for time-limited storage links

use crate::error::{HealthError, HealthResult};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Signs `path:expires` pairs so storage objects can be served without a session
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, path: &str, expires: i64) -> HealthResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| HealthError::Internal(format!("Invalid signing key: {}", e)))?;
        mac.update(format!("{}:{}", path, expires).as_bytes());
        Ok(mac)
    }

    /// Hex signature for `path` valid until the unix timestamp `expires`
    pub fn sign(&self, path: &str, expires: i64) -> HealthResult<String> {
        Ok(hex::encode(self.mac(path, expires)?.finalize().into_bytes()))
    }

    /// Constant-time check of signature and expiry against `now`
    pub fn verify(&self, path: &str, expires: i64, signature: &str, now: i64) -> HealthResult<()> {
        if expires < now {
            return Err(HealthError::InvalidSignature);
        }
        let provided = hex::decode(signature).map_err(|_| HealthError::InvalidSignature)?;
        self.mac(path, expires)?
            .verify_slice(&provided)
            .map_err(|_| HealthError::InvalidSignature)
    }
}

/// Hex SHA-256 digest of file content
pub fn content_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = UrlSigner::new("secret");
        let sig = signer.sign("u1/1_a.pdf", 1_000).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(signer.verify("u1/1_a.pdf", 1_000, &sig, 999).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let signer = UrlSigner::new("secret");
        let sig = signer.sign("u1/1_a.pdf", 1_000).unwrap();

        assert!(signer.verify("u2/1_a.pdf", 1_000, &sig, 0).is_err());
        assert!(signer.verify("u1/1_a.pdf", 2_000, &sig, 0).is_err());
        assert!(signer.verify("u1/1_a.pdf", 1_000, "zz", 0).is_err());
        assert!(UrlSigner::new("other")
            .verify("u1/1_a.pdf", 1_000, &sig, 0)
            .is_err());
    }

    #[test]
    fn test_verify_rejects_expired() {
        let signer = UrlSigner::new("secret");
        let sig = signer.sign("u1/1_a.pdf", 1_000).unwrap();
        let err = signer.verify("u1/1_a.pdf", 1_000, &sig, 1_001).unwrap_err();
        assert!(matches!(err, HealthError::InvalidSignature));
    }

    #[test]
    fn test_content_sha256() {
        assert_eq!(
            content_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
