use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("Invalid signature")]
    InvalidSignature,
}

pub type Result<T> = std::result::Result<T, SigningError>;

/// Domain labels. Each server key use signs under its own label so a
/// signature for one purpose never verifies for another.
pub const NOTARY_CONTEXT: &[u8] = b"shield-groups/notary/v1";
pub const PROFILE_KEY_CREDENTIAL_CONTEXT: &[u8] = b"shield-groups/profile-key-credential/v1";
pub const AUTH_CREDENTIAL_CONTEXT: &[u8] = b"shield-groups/auth-credential/v1";

/// Generate an Ed25519 keypair
///
/// # Returns
/// (public_key, private_key) - Both as 32-byte arrays
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let signing_key = SigningKey::generate(&mut OsRng);
    (
        signing_key.verifying_key().to_bytes(),
        signing_key.to_bytes(),
    )
}

/// BLAKE3(len(context) || context || data)
fn contextual_digest(context: &[u8], data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(context.len() as u64).to_le_bytes());
    hasher.update(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Sign `data` under a domain label with an Ed25519 private key.
///
/// # Returns
/// 64-byte signature over BLAKE3(context, data)
pub fn sign_with_context(context: &[u8], data: &[u8], private_key: &[u8; 32]) -> [u8; 64] {
    let signing_key = SigningKey::from_bytes(private_key);
    signing_key.sign(&contextual_digest(context, data)).to_bytes()
}

/// Verify a signature produced by [`sign_with_context`].
///
/// # Returns
/// `Ok(true)` if valid, `Ok(false)` if the signature does not match,
/// `Err` if the key or signature is malformed.
pub fn verify_with_context(
    context: &[u8],
    data: &[u8],
    signature: &[u8],
    public_key: &[u8; 32],
) -> Result<bool> {
    if signature.len() != 64 {
        return Err(SigningError::InvalidSignature);
    }

    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| SigningError::InvalidKeyLength)?;

    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(signature);
    let sig = Signature::from_bytes(&sig_bytes);

    Ok(verifying_key
        .verify(&contextual_digest(context, data), &sig)
        .is_ok())
}

pub fn derive_public_key(private_key: &[u8; 32]) -> [u8; 32] {
    SigningKey::from_bytes(private_key).verifying_key().to_bytes()
}
