//! Group and server key material.
//!
//! A group's secrets are derived from its 32-byte master key with
//! HKDF-SHA256; each purpose gets its own subkey. The group identifier the
//! server sees is a BLAKE3 derivation of the same master key.
//!
//! Primitive layouts:
//! - blob:        `0x00 || nonce(12) || ChaCha20-Poly1305(ct || tag)`
//! - identity:    `nonce(12) || ct || tag`, nonce = HMAC-SHA256(nonce key, pt)[..12]
//! - profile key: `nonce(12) || ct || tag`, owner's ACI as associated data

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::cipher::CipherError;
use crate::crypto::signing;
use crate::limits::MIN_ENCRYPTED_BLOB_LEN;

type HmacSha256 = Hmac<Sha256>;

const HKDF_SALT: &[u8] = b"shield-groups/group-secret-params/v1";
const INFO_BLOB: &[u8] = b"blob";
const INFO_UUID: &[u8] = b"uuid";
const INFO_UUID_NONCE: &[u8] = b"uuid-nonce";
const INFO_PROFILE_KEY: &[u8] = b"profile-key";
const GROUP_IDENTIFIER_CONTEXT: &str = "shield-groups 2024-01-01 group identifier";

const BLOB_VERSION: u8 = 0;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Group keys
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct GroupMasterKey(pub [u8; 32]);

impl GroupMasterKey {
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        GroupMasterKey(key)
    }
}

impl std::fmt::Debug for GroupMasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupMasterKey(..)")
    }
}

/// Public group identifier, the only group-derived value the server sees.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, Zeroize)]
pub struct GroupPublicParams(pub [u8; 32]);

impl GroupPublicParams {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Per-group secret parameters. Owned by the caller and passed by reference
/// into every operation; never persisted here.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct GroupSecretParams {
    master_key: [u8; 32],
    blob_key: [u8; 32],
    uuid_key: [u8; 32],
    uuid_nonce_key: [u8; 32],
    profile_key_key: [u8; 32],
    public: GroupPublicParams,
}

fn expand(master: &[u8; 32], info: &[u8]) -> Result<[u8; 32], CipherError> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), master);
    let mut out = [0u8; 32];
    hk.expand(info, &mut out)
        .map_err(|_| CipherError::InvalidInput("HKDF expand failed".into()))?;
    Ok(out)
}

fn aead(key: &[u8; 32]) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key))
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

impl GroupSecretParams {
    pub fn derive_from_master_key(master_key: &GroupMasterKey) -> Result<Self, CipherError> {
        let master = master_key.0;
        Ok(Self {
            master_key: master,
            blob_key: expand(&master, INFO_BLOB)?,
            uuid_key: expand(&master, INFO_UUID)?,
            uuid_nonce_key: expand(&master, INFO_UUID_NONCE)?,
            profile_key_key: expand(&master, INFO_PROFILE_KEY)?,
            public: GroupPublicParams(blake3::derive_key(GROUP_IDENTIFIER_CONTEXT, &master)),
        })
    }

    pub fn generate() -> Result<Self, CipherError> {
        Self::derive_from_master_key(&GroupMasterKey::generate())
    }

    pub fn master_key(&self) -> GroupMasterKey {
        GroupMasterKey(self.master_key)
    }

    pub fn public_params(&self) -> GroupPublicParams {
        self.public
    }

    // -----------------------------------------------------------------------
    // Blobs
    // -----------------------------------------------------------------------

    pub fn encrypt_blob(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = random_nonce();
        let ciphertext = aead(&self.blob_key)
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(BLOB_VERSION);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt_blob(&self, blob: &[u8]) -> Result<Vec<u8>, CipherError> {
        if blob.len() < MIN_ENCRYPTED_BLOB_LEN {
            return Err(CipherError::InvalidInput(format!(
                "blob too short ({} < {})",
                blob.len(),
                MIN_ENCRYPTED_BLOB_LEN
            )));
        }
        if blob[0] != BLOB_VERSION {
            return Err(CipherError::InvalidInput(format!(
                "unknown blob version {}",
                blob[0]
            )));
        }
        let (nonce, ciphertext) = blob[1..].split_at(NONCE_LEN);
        aead(&self.blob_key)
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)
    }

    // -----------------------------------------------------------------------
    // Identities (deterministic)
    // -----------------------------------------------------------------------

    fn synthetic_nonce(&self, plaintext: &[u8]) -> Result<[u8; NONCE_LEN], CipherError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.uuid_nonce_key)
            .map_err(|_| CipherError::InvalidInput("bad nonce key".into()))?;
        mac.update(plaintext);
        let tag = mac.finalize().into_bytes();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&tag[..NONCE_LEN]);
        Ok(nonce)
    }

    pub fn encrypt_uuid_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = self.synthetic_nonce(plaintext)?;
        let ciphertext = aead(&self.uuid_key)
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: self.public.as_bytes(),
                },
            )
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt_uuid_bytes(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::InvalidInput("identity ciphertext too short".into()));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        let plaintext = aead(&self.uuid_key)
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: body,
                    aad: self.public.as_bytes(),
                },
            )
            .map_err(|_| CipherError::DecryptionFailed)?;

        // A ciphertext is only canonical if its nonce is the synthetic one.
        let expected = self.synthetic_nonce(&plaintext)?;
        if !bool::from(expected[..].ct_eq(nonce)) {
            return Err(CipherError::DecryptionFailed);
        }
        Ok(plaintext)
    }

    // -----------------------------------------------------------------------
    // Profile keys
    // -----------------------------------------------------------------------

    pub fn encrypt_profile_key_bytes(
        &self,
        key: &[u8; 32],
        owner: &[u8; 16],
    ) -> Result<Vec<u8>, CipherError> {
        let nonce = random_nonce();
        let ciphertext = aead(&self.profile_key_key)
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: key,
                    aad: owner,
                },
            )
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt_profile_key_bytes(
        &self,
        ciphertext: &[u8],
        owner: &[u8; 16],
    ) -> Result<[u8; 32], CipherError> {
        if ciphertext.len() != NONCE_LEN + 32 + TAG_LEN {
            return Err(CipherError::InvalidInput(
                "profile key ciphertext has wrong length".into(),
            ));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        let mut plaintext = aead(&self.profile_key_key)
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: body,
                    aad: owner,
                },
            )
            .map_err(|_| CipherError::DecryptionFailed)?;

        let mut key = [0u8; 32];
        key.copy_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// Server keys
// ---------------------------------------------------------------------------

/// Server-side signing key. Used by the server (and by tests standing in for
/// it) to notarize changes and issue credentials.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ServerSecretParams {
    signing_key: [u8; 32],
}

impl ServerSecretParams {
    pub fn generate() -> Self {
        let (_, signing_key) = signing::generate_keypair();
        Self { signing_key }
    }

    pub fn from_bytes(signing_key: [u8; 32]) -> Self {
        Self { signing_key }
    }

    pub fn public_params(&self) -> ServerPublicParams {
        ServerPublicParams {
            verifying_key: signing::derive_public_key(&self.signing_key),
        }
    }

    pub fn sign(&self, context: &[u8], data: &[u8]) -> [u8; 64] {
        signing::sign_with_context(context, data, &self.signing_key)
    }

    /// Notarize an encoded change-actions payload.
    pub fn sign_change_actions(&self, actions: &[u8]) -> Vec<u8> {
        self.sign(signing::NOTARY_CONTEXT, actions).to_vec()
    }
}

/// The server's public parameters, distributed with the client.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ServerPublicParams {
    pub verifying_key: [u8; 32],
}

impl ServerPublicParams {
    pub fn verify(&self, context: &[u8], data: &[u8], signature: &[u8]) -> Result<(), CipherError> {
        match signing::verify_with_context(context, data, signature, &self.verifying_key) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(CipherError::VerificationFailed),
        }
    }

    /// Check the notary signature over an encoded change-actions payload.
    pub fn verify_change_signature(
        &self,
        actions: &[u8],
        signature: &[u8],
    ) -> Result<(), CipherError> {
        self.verify(signing::NOTARY_CONTEXT, actions, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const MASTER: [u8; 32] =
        hex!("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f");

    fn params() -> GroupSecretParams {
        GroupSecretParams::derive_from_master_key(&GroupMasterKey(MASTER)).unwrap()
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = params();
        let b = params();
        assert_eq!(a.public_params(), b.public_params());
        assert_eq!(a.master_key(), GroupMasterKey(MASTER));
    }

    #[test]
    fn test_different_groups_have_different_identifiers() {
        let a = GroupSecretParams::generate().unwrap();
        let b = GroupSecretParams::generate().unwrap();
        assert_ne!(a.public_params(), b.public_params());
    }

    #[test]
    fn test_blob_roundtrip_and_layout() {
        let p = params();
        let blob = p.encrypt_blob(b"").unwrap();
        assert_eq!(blob.len(), MIN_ENCRYPTED_BLOB_LEN);
        assert_eq!(blob[0], BLOB_VERSION);
        assert_eq!(p.decrypt_blob(&blob).unwrap(), b"");
    }

    #[test]
    fn test_blob_wrong_group_fails() {
        let blob = params().encrypt_blob(b"title").unwrap();
        let other = GroupSecretParams::generate().unwrap();
        assert!(matches!(
            other.decrypt_blob(&blob),
            Err(CipherError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_blob_too_short() {
        assert!(matches!(
            params().decrypt_blob(&[0u8; 28]),
            Err(CipherError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_uuid_encryption_is_deterministic() {
        let p = params();
        let a = p.encrypt_uuid_bytes(&[9u8; 16]).unwrap();
        let b = p.encrypt_uuid_bytes(&[9u8; 16]).unwrap();
        assert_eq!(a, b);
        assert_eq!(p.decrypt_uuid_bytes(&a).unwrap(), vec![9u8; 16]);
        assert_ne!(a, p.encrypt_uuid_bytes(&[8u8; 16]).unwrap());
    }

    #[test]
    fn test_uuid_ciphertext_tamper_fails() {
        let p = params();
        let mut c = p.encrypt_uuid_bytes(&[9u8; 16]).unwrap();
        let last = c.len() - 1;
        c[last] ^= 1;
        assert!(p.decrypt_uuid_bytes(&c).is_err());
    }

    #[test]
    fn test_profile_key_bound_to_owner() {
        let p = params();
        let c = p.encrypt_profile_key_bytes(&[5u8; 32], &[1u8; 16]).unwrap();
        assert_eq!(p.decrypt_profile_key_bytes(&c, &[1u8; 16]).unwrap(), [5u8; 32]);
        assert!(p.decrypt_profile_key_bytes(&c, &[2u8; 16]).is_err());
    }

    #[test]
    fn test_server_notary_signature() {
        let server = ServerSecretParams::generate();
        let public = server.public_params();
        let sig = server.sign_change_actions(b"actions");
        assert!(public.verify_change_signature(b"actions", &sig).is_ok());
        assert!(matches!(
            public.verify_change_signature(b"other", &sig),
            Err(CipherError::VerificationFailed)
        ));
    }
}
