//! Identity types for group membership.
//!
//! - `Aci` / `Pni`: account-based and phone-number-based user identities
//! - `ServiceId`: either of the two, with a stable binary encoding
//! - `ProfileKey`: 32-byte per-user profile key
//! - `UuidCiphertext`: deterministic identity ciphertext, usable as a map key
//! - `PendingIdentity`: an invitee identity that may not be decryptable yet

use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Leading byte of a binary-encoded PNI. ACIs are encoded as the bare 16 bytes.
const PNI_PREFIX: u8 = 0x01;

fn short_hex(uuid: &Uuid) -> String {
    hex::encode(&uuid.as_bytes()[..4])
}

// ---------------------------------------------------------------------------
// Aci / Pni
// ---------------------------------------------------------------------------

/// Account identity. Every full group member is addressed by one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Aci(pub Uuid);

impl Aci {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Aci(uuid)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Aci(Uuid::from_bytes(bytes))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Aci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aci({})", short_hex(&self.0))
    }
}

impl fmt::Display for Aci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phone-number identity. Only ever appears on pending invitations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pni(pub Uuid);

impl Pni {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Pni(uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for Pni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pni({})", short_hex(&self.0))
    }
}

impl fmt::Display for Pni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PNI:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ServiceId
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceId {
    Aci(Aci),
    Pni(Pni),
}

impl ServiceId {
    pub fn uuid(&self) -> Uuid {
        match self {
            ServiceId::Aci(aci) => aci.0,
            ServiceId::Pni(pni) => pni.0,
        }
    }

    pub fn aci(&self) -> Option<Aci> {
        match self {
            ServiceId::Aci(aci) => Some(*aci),
            ServiceId::Pni(_) => None,
        }
    }

    pub fn pni(&self) -> Option<Pni> {
        match self {
            ServiceId::Pni(pni) => Some(*pni),
            ServiceId::Aci(_) => None,
        }
    }

    /// Binary form fed to identity encryption: 16 bytes for an ACI,
    /// `0x01 || 16 bytes` for a PNI.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ServiceId::Aci(aci) => aci.as_bytes().to_vec(),
            ServiceId::Pni(pni) => {
                let mut out = Vec::with_capacity(17);
                out.push(PNI_PREFIX);
                out.extend_from_slice(pni.0.as_bytes());
                out
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            16 => Uuid::from_slice(bytes).ok().map(|u| ServiceId::Aci(Aci(u))),
            17 if bytes[0] == PNI_PREFIX => Uuid::from_slice(&bytes[1..])
                .ok()
                .map(|u| ServiceId::Pni(Pni(u))),
            _ => None,
        }
    }
}

impl From<Aci> for ServiceId {
    fn from(aci: Aci) -> Self {
        ServiceId::Aci(aci)
    }
}

impl From<Pni> for ServiceId {
    fn from(pni: Pni) -> Self {
        ServiceId::Pni(pni)
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceId::Aci(aci) => write!(f, "{:?}", aci),
            ServiceId::Pni(pni) => write!(f, "{:?}", pni),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceId::Aci(aci) => write!(f, "{}", aci),
            ServiceId::Pni(pni) => write!(f, "{}", pni),
        }
    }
}

// ---------------------------------------------------------------------------
// ProfileKey
// ---------------------------------------------------------------------------

/// A user's profile key. Compared in constant time, wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ProfileKey(pub [u8; 32]);

impl ProfileKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ProfileKey(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(ProfileKey(arr))
    }

    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        ProfileKey(key)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PartialEq for ProfileKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for ProfileKey {}

impl fmt::Debug for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileKey(..)")
    }
}

// ---------------------------------------------------------------------------
// UuidCiphertext
// ---------------------------------------------------------------------------

/// Encrypted identity. Encryption is deterministic per group, so two
/// ciphertexts are equal exactly when the identities are.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct UuidCiphertext(pub Vec<u8>);

impl UuidCiphertext {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for UuidCiphertext {
    fn from(bytes: Vec<u8>) -> Self {
        UuidCiphertext(bytes)
    }
}

impl fmt::Debug for UuidCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.0[..self.0.len().min(6)];
        write!(f, "UuidCiphertext({})", hex::encode(head))
    }
}

// ---------------------------------------------------------------------------
// PendingIdentity
// ---------------------------------------------------------------------------

/// Identity of an invitee. Invitations may outlive the client's ability to
/// open them, so the identity can be `Unknown`. Two `Unknown` values say
/// nothing about each other; pending records are keyed by ciphertext.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum PendingIdentity {
    Known(ServiceId),
    Unknown,
}

impl PendingIdentity {
    pub fn known(&self) -> Option<ServiceId> {
        match self {
            PendingIdentity::Known(id) => Some(*id),
            PendingIdentity::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PendingIdentity::Unknown)
    }

    /// True only for a known identity equal to `id`.
    pub fn is(&self, id: &ServiceId) -> bool {
        matches!(self, PendingIdentity::Known(known) if known == id)
    }
}

impl From<ServiceId> for PendingIdentity {
    fn from(id: ServiceId) -> Self {
        PendingIdentity::Known(id)
    }
}
