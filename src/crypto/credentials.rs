//! Server-issued credentials and the presentations derived from them.
//!
//! A profile-key credential binds `(aci, profile_key, expiration)` under the
//! server's issuing key. Clients never send it as-is: they present it to a
//! group as an encrypted identity plus encrypted profile key, which group
//! members can open and check against the issuer.
//!
//! Auth credentials bind `(aci, redemption_day)` and back the per-day group
//! authorization token.
//!
//! Signable bytes are bincode tuples (fixed field order, deterministic).

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::crypto::cipher::CipherError;
use crate::crypto::params::{
    GroupPublicParams, GroupSecretParams, ServerPublicParams, ServerSecretParams,
};
use crate::crypto::signing::{AUTH_CREDENTIAL_CONTEXT, PROFILE_KEY_CREDENTIAL_CONTEXT};
use crate::ids::{Aci, ProfileKey, ServiceId, UuidCiphertext};

fn bincode_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CipherError> {
    bincode::serialize(value).map_err(|e| CipherError::InvalidInput(e.to_string()))
}

fn profile_key_credential_message(
    aci: &Aci,
    profile_key: &ProfileKey,
    expiration: u64,
) -> Result<Vec<u8>, CipherError> {
    bincode_bytes(&(aci.as_bytes(), profile_key.as_bytes(), expiration))
}

fn auth_credential_message(aci: &Aci, redemption_day: i64) -> Result<Vec<u8>, CipherError> {
    bincode_bytes(&(aci.as_bytes(), redemption_day))
}

// ---------------------------------------------------------------------------
// Profile key credentials
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileKeyCredential {
    pub aci: Aci,
    pub profile_key: ProfileKey,
    /// Expiration, seconds since the Unix epoch.
    pub expiration: u64,
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

/// Wire form of a presented profile-key credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileKeyCredentialPresentation {
    pub uuid_ciphertext: UuidCiphertext,
    pub profile_key_ciphertext: Vec<u8>,
    pub expiration: u64,
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

impl ProfileKeyCredentialPresentation {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CipherError> {
        bincode_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        bincode::deserialize(bytes)
            .map_err(|e| CipherError::InvalidInput(format!("malformed presentation: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Auth credentials
// ---------------------------------------------------------------------------

/// One day's auth credential as returned by the server, before verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCredentialResponse {
    /// Days since the Unix epoch.
    pub redemption_day: i64,
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

/// A verified auth credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthCredential {
    pub aci: Aci,
    pub redemption_day: i64,
    signature: [u8; 64],
}

/// Authorization presented to the server for one group on one day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCredentialPresentation {
    pub group_public_params: GroupPublicParams,
    pub uuid_ciphertext: UuidCiphertext,
    pub redemption_day: i64,
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

impl AuthCredentialPresentation {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CipherError> {
        bincode_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        bincode::deserialize(bytes)
            .map_err(|e| CipherError::InvalidInput(format!("malformed auth presentation: {}", e)))
    }
}

impl AuthCredential {
    /// Present this credential for the group described by `params`.
    pub fn present(
        &self,
        params: &GroupSecretParams,
    ) -> Result<AuthCredentialPresentation, CipherError> {
        let uuid_ciphertext = params.encrypt_uuid_bytes(&ServiceId::Aci(self.aci).to_bytes())?;
        Ok(AuthCredentialPresentation {
            group_public_params: params.public_params(),
            uuid_ciphertext: UuidCiphertext(uuid_ciphertext),
            redemption_day: self.redemption_day,
            signature: self.signature,
        })
    }
}

// ---------------------------------------------------------------------------
// Issuance (server side)
// ---------------------------------------------------------------------------

impl ServerSecretParams {
    pub fn issue_profile_key_credential(
        &self,
        aci: Aci,
        profile_key: &ProfileKey,
        expiration: u64,
    ) -> Result<ProfileKeyCredential, CipherError> {
        let message = profile_key_credential_message(&aci, profile_key, expiration)?;
        Ok(ProfileKeyCredential {
            aci,
            profile_key: profile_key.clone(),
            expiration,
            signature: self.sign(PROFILE_KEY_CREDENTIAL_CONTEXT, &message),
        })
    }

    /// Issue one auth credential per day in `start_day..=end_day`.
    pub fn issue_auth_credentials(
        &self,
        aci: Aci,
        start_day: i64,
        end_day: i64,
    ) -> Result<Vec<AuthCredentialResponse>, CipherError> {
        (start_day..=end_day)
            .map(|day| -> Result<AuthCredentialResponse, CipherError> {
                let message = auth_credential_message(&aci, day)?;
                Ok(AuthCredentialResponse {
                    redemption_day: day,
                    signature: self.sign(AUTH_CREDENTIAL_CONTEXT, &message),
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Verification (client side)
// ---------------------------------------------------------------------------

impl ServerPublicParams {
    pub fn verify_profile_key_credential(
        &self,
        aci: &Aci,
        profile_key: &ProfileKey,
        expiration: u64,
        signature: &[u8],
    ) -> Result<(), CipherError> {
        let message = profile_key_credential_message(aci, profile_key, expiration)?;
        self.verify(PROFILE_KEY_CREDENTIAL_CONTEXT, &message, signature)
    }

    /// Verify a server auth credential response for `aci`.
    pub fn receive_auth_credential(
        &self,
        aci: Aci,
        response: &AuthCredentialResponse,
    ) -> Result<AuthCredential, CipherError> {
        let message = auth_credential_message(&aci, response.redemption_day)?;
        self.verify(AUTH_CREDENTIAL_CONTEXT, &message, &response.signature)?;
        Ok(AuthCredential {
            aci,
            redemption_day: response.redemption_day,
            signature: response.signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn aci() -> Aci {
        Aci(Uuid::new_v4())
    }

    #[test]
    fn test_profile_key_credential_verifies() {
        let server = ServerSecretParams::generate();
        let who = aci();
        let key = ProfileKey::generate();
        let cred = server
            .issue_profile_key_credential(who, &key, 1_700_000_000)
            .unwrap();

        let public = server.public_params();
        assert!(public
            .verify_profile_key_credential(&who, &key, cred.expiration, &cred.signature)
            .is_ok());
        assert!(matches!(
            public.verify_profile_key_credential(&aci(), &key, cred.expiration, &cred.signature),
            Err(CipherError::VerificationFailed)
        ));
    }

    #[test]
    fn test_auth_credentials_cover_window() {
        let server = ServerSecretParams::generate();
        let who = aci();
        let batch = server.issue_auth_credentials(who, 100, 106).unwrap();
        assert_eq!(batch.len(), 7);
        assert_eq!(batch[0].redemption_day, 100);
        assert_eq!(batch[6].redemption_day, 106);

        let public = server.public_params();
        for response in &batch {
            let cred = public.receive_auth_credential(who, response).unwrap();
            assert_eq!(cred.redemption_day, response.redemption_day);
        }
    }

    #[test]
    fn test_auth_credential_for_wrong_user_rejected() {
        let server = ServerSecretParams::generate();
        let batch = server.issue_auth_credentials(aci(), 5, 5).unwrap();
        assert!(matches!(
            server.public_params().receive_auth_credential(aci(), &batch[0]),
            Err(CipherError::VerificationFailed)
        ));
    }

    #[test]
    fn test_auth_presentation_roundtrip() {
        let server = ServerSecretParams::generate();
        let who = aci();
        let batch = server.issue_auth_credentials(who, 9, 9).unwrap();
        let cred = server
            .public_params()
            .receive_auth_credential(who, &batch[0])
            .unwrap();

        let group = GroupSecretParams::generate().unwrap();
        let presentation = cred.present(&group).unwrap();
        assert_eq!(presentation.group_public_params, group.public_params());
        let bytes = presentation.to_bytes().unwrap();
        assert_eq!(
            AuthCredentialPresentation::from_bytes(&bytes).unwrap(),
            presentation
        );
    }

    #[test]
    fn test_malformed_presentation_bytes() {
        assert!(matches!(
            ProfileKeyCredentialPresentation::from_bytes(&[1, 2, 3]),
            Err(CipherError::InvalidInput(_))
        ));
    }
}
