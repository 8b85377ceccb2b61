//! Wallet identity: the Ed25519 keypair that binds the replicated store.
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::BackupError;

/// Signing identity of one wallet.
///
/// The store namespace is the z-base-32 encoding of the public key.
#[derive(Clone)]
pub struct WalletIdentity {
    signing_key: SigningKey,
}

impl WalletIdentity {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Store namespace (z-base-32 public key).
    pub fn namespace(&self) -> String {
        z32::encode(self.public_key().as_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for WalletIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ns = self.namespace();
        let short = if ns.len() > 12 { &ns[..12] } else { &ns };
        write!(f, "WalletIdentity({short}...)")
    }
}

/// Verify a signature made by the owner of `namespace`.
pub fn verify_signature(namespace: &str, message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = z32::decode(namespace.as_bytes()) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

/// Resolves the active wallet's signing identity. Only succeeds once secure
/// key storage is unlocked.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn signing_identity(&self) -> Result<WalletIdentity, BackupError>;
}

/// An identity that is already in memory.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub WalletIdentity);

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentity {
    async fn signing_identity(&self) -> Result<WalletIdentity, BackupError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_is_stable_per_seed() {
        let a = WalletIdentity::from_seed([1; 32]);
        let b = WalletIdentity::from_seed([1; 32]);
        let c = WalletIdentity::from_seed([2; 32]);
        assert_eq!(a.namespace(), b.namespace());
        assert_ne!(a.namespace(), c.namespace());
        assert_eq!(a.namespace().len(), 52);
    }

    #[test]
    fn sign_and_verify() {
        let identity = WalletIdentity::from_seed([7; 32]);
        let sig = identity.sign(b"payload");
        assert!(verify_signature(&identity.namespace(), b"payload", &sig));
        assert!(!verify_signature(&identity.namespace(), b"tampered", &sig));

        let other = WalletIdentity::from_seed([8; 32]);
        assert!(!verify_signature(&other.namespace(), b"payload", &sig));
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(!verify_signature("not-z32!", b"x", &[0; 64]));
        let identity = WalletIdentity::from_seed([7; 32]);
        assert!(!verify_signature(&identity.namespace(), b"x", &[0; 3]));
    }

    #[tokio::test]
    async fn static_provider_returns_identity() {
        let identity = WalletIdentity::from_seed([3; 32]);
        let provider = StaticIdentity(identity.clone());
        let resolved = provider.signing_identity().await.unwrap();
        assert_eq!(resolved.namespace(), identity.namespace());
    }
}
