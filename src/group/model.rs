//! Decrypted group state.
//!
//! Membership collections are ordered maps keyed the way lookups happen:
//! members and requesting members by ACI, pending members by identity
//! ciphertext (their identity may be `Unknown`), banned members by service id.
//! A map key can only appear once, so "unique identity per list" holds by
//! construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{Aci, PendingIdentity, Pni, ProfileKey, ServiceId, UuidCiphertext};
pub use crate::wire::{AccessControl, AccessRequired, Role};

/// Tri-state flag for optional group features.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum EnabledState {
    #[default]
    Unknown,
    Enabled,
    Disabled,
}

impl From<bool> for EnabledState {
    fn from(enabled: bool) -> Self {
        if enabled {
            EnabledState::Enabled
        } else {
            EnabledState::Disabled
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DecryptedMember {
    pub aci: Aci,
    pub role: Role,
    pub profile_key: ProfileKey,
    pub joined_at_revision: u32,
    /// Set only when the member joined by accepting a PNI invitation.
    pub pni: Option<Pni>,
}

impl DecryptedMember {
    pub fn new(aci: Aci, role: Role, profile_key: ProfileKey, joined_at_revision: u32) -> Self {
        Self {
            aci,
            role,
            profile_key,
            joined_at_revision,
            pni: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DecryptedPendingMember {
    pub identity: PendingIdentity,
    /// Always present, and the record's key.
    pub uuid_ciphertext: UuidCiphertext,
    pub role: Role,
    pub added_by: Aci,
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DecryptedRequestingMember {
    pub aci: Aci,
    pub profile_key: ProfileKey,
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DecryptedBannedMember {
    pub service_id: ServiceId,
    pub timestamp: u64,
}

/// A full group snapshot at one revision.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct DecryptedGroup {
    pub title: String,
    pub avatar: String,
    /// Seconds; 0 disables the timer.
    pub disappearing_messages_timer: u32,
    pub access_control: AccessControl,
    pub revision: u32,
    pub members: BTreeMap<Aci, DecryptedMember>,
    pub pending_members: BTreeMap<UuidCiphertext, DecryptedPendingMember>,
    pub requesting_members: BTreeMap<Aci, DecryptedRequestingMember>,
    pub invite_link_password: Vec<u8>,
    pub description: String,
    pub is_announcement_group: EnabledState,
    pub banned_members: BTreeMap<ServiceId, DecryptedBannedMember>,
}

impl DecryptedGroup {
    pub fn member(&self, aci: &Aci) -> Option<&DecryptedMember> {
        self.members.get(aci)
    }

    pub fn is_member(&self, aci: &Aci) -> bool {
        self.members.contains_key(aci)
    }

    pub fn is_admin(&self, aci: &Aci) -> bool {
        self.members.get(aci).map_or(false, DecryptedMember::is_admin)
    }

    pub fn admins(&self) -> impl Iterator<Item = &DecryptedMember> {
        self.members.values().filter(|m| m.is_admin())
    }

    /// Pending record whose decrypted identity is `id`.
    pub fn pending_by_identity(&self, id: &ServiceId) -> Option<&DecryptedPendingMember> {
        self.pending_members.values().find(|p| p.identity.is(id))
    }

    pub fn is_pending(&self, id: &ServiceId) -> bool {
        self.pending_by_identity(id).is_some()
    }

    pub fn requesting(&self, aci: &Aci) -> Option<&DecryptedRequestingMember> {
        self.requesting_members.get(aci)
    }

    pub fn is_pending_or_requesting(&self, aci: &Aci) -> bool {
        self.is_pending(&ServiceId::Aci(*aci)) || self.requesting_members.contains_key(aci)
    }

    pub fn is_banned(&self, id: &ServiceId) -> bool {
        self.banned_members.contains_key(id)
    }

    /// Drop pending and requesting records for identities that are members.
    pub(crate) fn remove_pending_and_requesting_now_in_group(&mut self) {
        let members = &self.members;
        self.pending_members.retain(|_, pending| {
            !matches!(pending.identity, PendingIdentity::Known(ServiceId::Aci(aci)) if members.contains_key(&aci))
        });
        self.requesting_members
            .retain(|aci, _| !members.contains_key(aci));
    }

    /// Local view after leaving: `aci` is gone from every membership list and
    /// the revision is set to `revision`.
    pub fn without_member(&self, aci: &Aci, revision: u32) -> DecryptedGroup {
        let mut group = self.clone();
        group.members.remove(aci);
        group
            .pending_members
            .retain(|_, p| !p.identity.is(&ServiceId::Aci(*aci)));
        group.requesting_members.remove(aci);
        group.revision = revision;
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn aci() -> Aci {
        Aci(Uuid::new_v4())
    }

    fn member(aci: Aci, role: Role) -> DecryptedMember {
        DecryptedMember::new(aci, role, ProfileKey::from_bytes([1; 32]), 0)
    }

    fn pending(id: ServiceId, ciphertext: u8) -> DecryptedPendingMember {
        DecryptedPendingMember {
            identity: PendingIdentity::Known(id),
            uuid_ciphertext: UuidCiphertext(vec![ciphertext; 4]),
            role: Role::Default,
            added_by: Aci(Uuid::nil()),
            timestamp: 0,
        }
    }

    #[test]
    fn test_member_lookup_and_admins() {
        let (a, b) = (aci(), aci());
        let mut group = DecryptedGroup::default();
        group.members.insert(a, member(a, Role::Administrator));
        group.members.insert(b, member(b, Role::Default));

        assert!(group.is_member(&a));
        assert!(group.is_admin(&a));
        assert!(!group.is_admin(&b));
        assert_eq!(group.admins().count(), 1);
    }

    #[test]
    fn test_pending_lookup_by_identity() {
        let a = aci();
        let mut group = DecryptedGroup::default();
        let p = pending(ServiceId::Aci(a), 1);
        group.pending_members.insert(p.uuid_ciphertext.clone(), p);

        assert!(group.is_pending(&ServiceId::Aci(a)));
        assert!(group.is_pending_or_requesting(&a));
        assert!(!group.is_pending(&ServiceId::Aci(aci())));
    }

    #[test]
    fn test_remove_pending_and_requesting_now_in_group() {
        let (a, b) = (aci(), aci());
        let mut group = DecryptedGroup::default();
        let p = pending(ServiceId::Aci(a), 1);
        group.pending_members.insert(p.uuid_ciphertext.clone(), p);
        group.requesting_members.insert(
            b,
            DecryptedRequestingMember {
                aci: b,
                profile_key: ProfileKey::from_bytes([2; 32]),
                timestamp: 0,
            },
        );
        group.members.insert(a, member(a, Role::Default));
        group.members.insert(b, member(b, Role::Default));

        group.remove_pending_and_requesting_now_in_group();
        assert!(group.pending_members.is_empty());
        assert!(group.requesting_members.is_empty());
    }

    #[test]
    fn test_unknown_pending_survives_normalization() {
        let a = aci();
        let mut group = DecryptedGroup::default();
        let mut p = pending(ServiceId::Aci(a), 1);
        p.identity = PendingIdentity::Unknown;
        group.pending_members.insert(p.uuid_ciphertext.clone(), p);
        group.members.insert(a, member(a, Role::Default));

        group.remove_pending_and_requesting_now_in_group();
        assert_eq!(group.pending_members.len(), 1);
    }

    #[test]
    fn test_without_member() {
        let (a, b) = (aci(), aci());
        let mut group = DecryptedGroup {
            revision: 4,
            ..Default::default()
        };
        group.members.insert(a, member(a, Role::Default));
        group.members.insert(b, member(b, Role::Default));

        let left = group.without_member(&a, 5);
        assert!(!left.is_member(&a));
        assert!(left.is_member(&b));
        assert_eq!(left.revision, 5);
        assert_eq!(group.revision, 4);
    }

    #[test]
    fn test_enabled_state_from_bool() {
        assert_eq!(EnabledState::from(true), EnabledState::Enabled);
        assert_eq!(EnabledState::from(false), EnabledState::Disabled);
        assert_eq!(EnabledState::default(), EnabledState::Unknown);
    }
}
