//! Ciphertext codec: the only surface the group operations use to touch
//! group-encrypted values.

use thiserror::Error;

use crate::crypto::credentials::{ProfileKeyCredential, ProfileKeyCredentialPresentation};
use crate::crypto::params::{GroupPublicParams, GroupSecretParams, ServerPublicParams};
use crate::ids::{Aci, ProfileKey, ServiceId, UuidCiphertext};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Verification failed")]
    VerificationFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// What a member learns by opening a profile-key presentation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenedPresentation {
    pub aci: Aci,
    pub profile_key: ProfileKey,
    pub uuid_ciphertext: UuidCiphertext,
}

// ---------------------------------------------------------------------------
// GroupCipher
// ---------------------------------------------------------------------------

/// Group-parameterized encrypt/decrypt and credential presentation.
pub trait GroupCipher {
    fn group_public_params(&self) -> GroupPublicParams;

    fn encrypt_blob(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    fn decrypt_blob(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Deterministic: the same identity always yields the same ciphertext.
    fn encrypt_service_id(&self, id: ServiceId) -> Result<UuidCiphertext, CipherError>;

    fn decrypt_service_id(&self, ciphertext: &UuidCiphertext) -> Result<ServiceId, CipherError>;

    fn encrypt_profile_key(&self, key: &ProfileKey, owner: Aci) -> Result<Vec<u8>, CipherError>;

    fn decrypt_profile_key(&self, ciphertext: &[u8], owner: Aci)
        -> Result<ProfileKey, CipherError>;

    fn create_presentation(&self, credential: &ProfileKeyCredential)
        -> Result<Vec<u8>, CipherError>;

    /// Open a presentation and check it against the issuing authority.
    /// A bad issuer signature is `VerificationFailed`.
    fn open_presentation(&self, presentation: &[u8]) -> Result<OpenedPresentation, CipherError>;
}

/// [`GroupCipher`] over a group's secret params and the server's public
/// params.
#[derive(Clone)]
pub struct ClientGroupCipher {
    params: GroupSecretParams,
    server: ServerPublicParams,
}

impl ClientGroupCipher {
    pub fn new(params: GroupSecretParams, server: ServerPublicParams) -> Self {
        Self { params, server }
    }

    pub fn secret_params(&self) -> &GroupSecretParams {
        &self.params
    }

    pub fn server_public_params(&self) -> &ServerPublicParams {
        &self.server
    }
}

impl GroupCipher for ClientGroupCipher {
    fn group_public_params(&self) -> GroupPublicParams {
        self.params.public_params()
    }

    fn encrypt_blob(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.params.encrypt_blob(plaintext)
    }

    fn decrypt_blob(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.params.decrypt_blob(ciphertext)
    }

    fn encrypt_service_id(&self, id: ServiceId) -> Result<UuidCiphertext, CipherError> {
        self.params
            .encrypt_uuid_bytes(&id.to_bytes())
            .map(UuidCiphertext)
    }

    fn decrypt_service_id(&self, ciphertext: &UuidCiphertext) -> Result<ServiceId, CipherError> {
        let bytes = self.params.decrypt_uuid_bytes(ciphertext.as_bytes())?;
        ServiceId::from_bytes(&bytes)
            .ok_or_else(|| CipherError::InvalidInput("not a service id".into()))
    }

    fn encrypt_profile_key(&self, key: &ProfileKey, owner: Aci) -> Result<Vec<u8>, CipherError> {
        self.params
            .encrypt_profile_key_bytes(key.as_bytes(), owner.as_bytes())
    }

    fn decrypt_profile_key(
        &self,
        ciphertext: &[u8],
        owner: Aci,
    ) -> Result<ProfileKey, CipherError> {
        self.params
            .decrypt_profile_key_bytes(ciphertext, owner.as_bytes())
            .map(ProfileKey::from_bytes)
    }

    fn create_presentation(
        &self,
        credential: &ProfileKeyCredential,
    ) -> Result<Vec<u8>, CipherError> {
        let presentation = ProfileKeyCredentialPresentation {
            uuid_ciphertext: self.encrypt_service_id(ServiceId::Aci(credential.aci))?,
            profile_key_ciphertext: self
                .encrypt_profile_key(&credential.profile_key, credential.aci)?,
            expiration: credential.expiration,
            signature: credential.signature,
        };
        presentation.to_bytes()
    }

    fn open_presentation(&self, presentation: &[u8]) -> Result<OpenedPresentation, CipherError> {
        let presentation = ProfileKeyCredentialPresentation::from_bytes(presentation)?;

        let aci = match self.decrypt_service_id(&presentation.uuid_ciphertext)? {
            ServiceId::Aci(aci) => aci,
            ServiceId::Pni(_) => {
                return Err(CipherError::InvalidInput(
                    "presentation carries a PNI".into(),
                ))
            }
        };
        let profile_key = self.decrypt_profile_key(&presentation.profile_key_ciphertext, aci)?;

        self.server.verify_profile_key_credential(
            &aci,
            &profile_key,
            presentation.expiration,
            &presentation.signature,
        )?;

        Ok(OpenedPresentation {
            aci,
            profile_key,
            uuid_ciphertext: presentation.uuid_ciphertext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::params::ServerSecretParams;
    use crate::ids::Pni;
    use uuid::Uuid;

    fn setup() -> (ServerSecretParams, ClientGroupCipher) {
        let server = ServerSecretParams::generate();
        let cipher = ClientGroupCipher::new(
            GroupSecretParams::generate().unwrap(),
            server.public_params(),
        );
        (server, cipher)
    }

    #[test]
    fn test_service_id_roundtrip() {
        let (_, cipher) = setup();
        let aci = ServiceId::Aci(Aci(Uuid::new_v4()));
        let pni = ServiceId::Pni(Pni(Uuid::new_v4()));
        for id in [aci, pni] {
            let ct = cipher.encrypt_service_id(id).unwrap();
            assert_eq!(cipher.decrypt_service_id(&ct).unwrap(), id);
        }
    }

    #[test]
    fn test_service_id_from_other_group_fails() {
        let (server, cipher) = setup();
        let other = ClientGroupCipher::new(
            GroupSecretParams::generate().unwrap(),
            server.public_params(),
        );
        let ct = other
            .encrypt_service_id(ServiceId::Aci(Aci(Uuid::new_v4())))
            .unwrap();
        assert_eq!(
            cipher.decrypt_service_id(&ct),
            Err(CipherError::DecryptionFailed)
        );
    }

    #[test]
    fn test_presentation_open() {
        let (server, cipher) = setup();
        let aci = Aci(Uuid::new_v4());
        let key = ProfileKey::generate();
        let credential = server.issue_profile_key_credential(aci, &key, 42).unwrap();

        let presentation = cipher.create_presentation(&credential).unwrap();
        let opened = cipher.open_presentation(&presentation).unwrap();
        assert_eq!(opened.aci, aci);
        assert_eq!(opened.profile_key, key);
        assert_eq!(
            opened.uuid_ciphertext,
            cipher.encrypt_service_id(ServiceId::Aci(aci)).unwrap()
        );
    }

    #[test]
    fn test_presentation_from_other_issuer_fails_verification() {
        let (_, cipher) = setup();
        let rogue = ServerSecretParams::generate();
        let credential = rogue
            .issue_profile_key_credential(Aci(Uuid::new_v4()), &ProfileKey::generate(), 42)
            .unwrap();

        let presentation = cipher.create_presentation(&credential).unwrap();
        assert_eq!(
            cipher.open_presentation(&presentation),
            Err(CipherError::VerificationFailed)
        );
    }
}
