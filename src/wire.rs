//! Encrypted wire shapes exchanged with the group server.
//!
//! - Everything is CBOR via ciborium.
//! - Every struct is `#[serde(default)]`: absent fields decode to their
//!   defaults and unknown fields are ignored.
//! - `GroupChangeActions` additionally skips action variants this build does
//!   not know, so newer servers can add action kinds without breaking us.
//! - A `GroupChange` carries the encoded actions as raw bytes; the server's
//!   notary signature covers exactly those bytes.

use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::MAX_ACTIONS_PAYLOAD_BYTES;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Payload exceeds max size ({size} > {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("CBOR encoding failed: {0}")]
    CborEncode(String),

    #[error("CBOR decoding failed: {0}")]
    CborDecode(String),
}

// ---------------------------------------------------------------------------
// Enums shared with the decrypted model
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Role {
    Default,
    Administrator,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Role {
    /// Only these two roles may be assigned to a member.
    pub fn is_assignable(&self) -> bool {
        matches!(self, Role::Default | Role::Administrator)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum AccessRequired {
    Any,
    Member,
    Administrator,
    Unsatisfiable,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AccessControl {
    pub attributes: AccessRequired,
    pub members: AccessRequired,
    pub add_from_invite_link: AccessRequired,
}

// ---------------------------------------------------------------------------
// Member records
// ---------------------------------------------------------------------------

/// A member record. Either `user_id` + `profile_key` ciphertexts are set
/// (legacy), or `presentation` carries both.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Member {
    pub user_id: Vec<u8>,
    pub role: Role,
    pub profile_key: Vec<u8>,
    pub presentation: Vec<u8>,
    pub joined_at_revision: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PendingMember {
    pub member: Member,
    pub added_by_user_id: Vec<u8>,
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RequestingMember {
    pub user_id: Vec<u8>,
    pub profile_key: Vec<u8>,
    pub presentation: Vec<u8>,
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct BannedMember {
    pub user_id: Vec<u8>,
    pub timestamp: u64,
}

// ---------------------------------------------------------------------------
// Group snapshot
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Group {
    pub public_key: Vec<u8>,
    pub title: Vec<u8>,
    pub avatar: Vec<u8>,
    pub disappearing_messages_timer: Vec<u8>,
    pub access_control: AccessControl,
    pub revision: u32,
    pub members: Vec<Member>,
    pub pending_members: Vec<PendingMember>,
    pub requesting_members: Vec<RequestingMember>,
    pub invite_link_password: Vec<u8>,
    pub description: Vec<u8>,
    pub announcements_only: bool,
    pub banned_members: Vec<BannedMember>,
}

impl Group {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        cbor_encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        cbor_decode(bytes)
    }
}

/// Plaintext inside an encrypted attribute blob.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum GroupAttributeBlob {
    Title(String),
    Avatar(String),
    DisappearingMessagesDuration(u32),
    DescriptionText(String),
}

// ---------------------------------------------------------------------------
// Change actions
// ---------------------------------------------------------------------------

/// Kind of a change action, with its field number in the actions message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    AddMember,
    DeleteMember,
    ModifyMemberRole,
    ModifyMemberProfileKey,
    AddPendingMember,
    DeletePendingMember,
    PromotePendingMember,
    ModifyTitle,
    ModifyAvatar,
    ModifyDisappearingMessagesTimer,
    ModifyAttributesAccess,
    ModifyMembersAccess,
    ModifyAddFromInviteLinkAccess,
    AddRequestingMember,
    DeleteRequestingMember,
    PromoteRequestingMember,
    ModifyInviteLinkPassword,
    ModifyDescription,
    ModifyAnnouncementsOnly,
    AddBannedMember,
    DeleteBannedMember,
    PromotePendingPniAciMember,
}

impl ActionKind {
    pub const ALL: [ActionKind; 22] = [
        ActionKind::AddMember,
        ActionKind::DeleteMember,
        ActionKind::ModifyMemberRole,
        ActionKind::ModifyMemberProfileKey,
        ActionKind::AddPendingMember,
        ActionKind::DeletePendingMember,
        ActionKind::PromotePendingMember,
        ActionKind::ModifyTitle,
        ActionKind::ModifyAvatar,
        ActionKind::ModifyDisappearingMessagesTimer,
        ActionKind::ModifyAttributesAccess,
        ActionKind::ModifyMembersAccess,
        ActionKind::ModifyAddFromInviteLinkAccess,
        ActionKind::AddRequestingMember,
        ActionKind::DeleteRequestingMember,
        ActionKind::PromoteRequestingMember,
        ActionKind::ModifyInviteLinkPassword,
        ActionKind::ModifyDescription,
        ActionKind::ModifyAnnouncementsOnly,
        ActionKind::AddBannedMember,
        ActionKind::DeleteBannedMember,
        ActionKind::PromotePendingPniAciMember,
    ];

    pub fn field_number(&self) -> u32 {
        match self {
            ActionKind::AddMember => 3,
            ActionKind::DeleteMember => 4,
            ActionKind::ModifyMemberRole => 5,
            ActionKind::ModifyMemberProfileKey => 6,
            ActionKind::AddPendingMember => 7,
            ActionKind::DeletePendingMember => 8,
            ActionKind::PromotePendingMember => 9,
            ActionKind::ModifyTitle => 10,
            ActionKind::ModifyAvatar => 11,
            ActionKind::ModifyDisappearingMessagesTimer => 12,
            ActionKind::ModifyAttributesAccess => 13,
            ActionKind::ModifyMembersAccess => 14,
            ActionKind::ModifyAddFromInviteLinkAccess => 15,
            ActionKind::AddRequestingMember => 16,
            ActionKind::DeleteRequestingMember => 17,
            ActionKind::PromoteRequestingMember => 18,
            ActionKind::ModifyInviteLinkPassword => 19,
            ActionKind::ModifyDescription => 20,
            ActionKind::ModifyAnnouncementsOnly => 21,
            ActionKind::AddBannedMember => 22,
            ActionKind::DeleteBannedMember => 23,
            ActionKind::PromotePendingPniAciMember => 24,
        }
    }

    /// Variant name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::AddMember => "AddMember",
            ActionKind::DeleteMember => "DeleteMember",
            ActionKind::ModifyMemberRole => "ModifyMemberRole",
            ActionKind::ModifyMemberProfileKey => "ModifyMemberProfileKey",
            ActionKind::AddPendingMember => "AddPendingMember",
            ActionKind::DeletePendingMember => "DeletePendingMember",
            ActionKind::PromotePendingMember => "PromotePendingMember",
            ActionKind::ModifyTitle => "ModifyTitle",
            ActionKind::ModifyAvatar => "ModifyAvatar",
            ActionKind::ModifyDisappearingMessagesTimer => "ModifyDisappearingMessagesTimer",
            ActionKind::ModifyAttributesAccess => "ModifyAttributesAccess",
            ActionKind::ModifyMembersAccess => "ModifyMembersAccess",
            ActionKind::ModifyAddFromInviteLinkAccess => "ModifyAddFromInviteLinkAccess",
            ActionKind::AddRequestingMember => "AddRequestingMember",
            ActionKind::DeleteRequestingMember => "DeleteRequestingMember",
            ActionKind::PromoteRequestingMember => "PromoteRequestingMember",
            ActionKind::ModifyInviteLinkPassword => "ModifyInviteLinkPassword",
            ActionKind::ModifyDescription => "ModifyDescription",
            ActionKind::ModifyAnnouncementsOnly => "ModifyAnnouncementsOnly",
            ActionKind::AddBannedMember => "AddBannedMember",
            ActionKind::DeleteBannedMember => "DeleteBannedMember",
            ActionKind::PromotePendingPniAciMember => "PromotePendingPniAciMember",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == tag)
    }
}

/// One encrypted field-level mutation. Field numbers in the variant docs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// 3
    AddMember {
        added: Member,
        #[serde(default)]
        join_from_invite_link: bool,
    },
    /// 4
    DeleteMember { deleted_user_id: Vec<u8> },
    /// 5
    ModifyMemberRole { user_id: Vec<u8>, role: Role },
    /// 6
    ModifyMemberProfileKey {
        #[serde(default)]
        presentation: Vec<u8>,
        #[serde(default)]
        user_id: Vec<u8>,
        #[serde(default)]
        profile_key: Vec<u8>,
    },
    /// 7
    AddPendingMember { added: PendingMember },
    /// 8
    DeletePendingMember { deleted_user_id: Vec<u8> },
    /// 9
    PromotePendingMember {
        #[serde(default)]
        presentation: Vec<u8>,
        #[serde(default)]
        user_id: Vec<u8>,
        #[serde(default)]
        profile_key: Vec<u8>,
    },
    /// 10
    ModifyTitle { title: Vec<u8> },
    /// 11
    ModifyAvatar { avatar: Vec<u8> },
    /// 12
    ModifyDisappearingMessagesTimer { timer: Vec<u8> },
    /// 13
    ModifyAttributesAccess { access: AccessRequired },
    /// 14
    ModifyMembersAccess { access: AccessRequired },
    /// 15
    ModifyAddFromInviteLinkAccess { access: AccessRequired },
    /// 16
    AddRequestingMember { added: RequestingMember },
    /// 17
    DeleteRequestingMember { deleted_user_id: Vec<u8> },
    /// 18
    PromoteRequestingMember { user_id: Vec<u8>, role: Role },
    /// 19
    ModifyInviteLinkPassword { password: Vec<u8> },
    /// 20
    ModifyDescription { description: Vec<u8> },
    /// 21
    ModifyAnnouncementsOnly { announcements_only: bool },
    /// 22
    AddBannedMember { added: BannedMember },
    /// 23
    DeleteBannedMember { deleted_user_id: Vec<u8> },
    /// 24
    PromotePendingPniAciMember {
        #[serde(default)]
        presentation: Vec<u8>,
        #[serde(default)]
        user_id: Vec<u8>,
        #[serde(default)]
        pni: Vec<u8>,
        #[serde(default)]
        profile_key: Vec<u8>,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::AddMember { .. } => ActionKind::AddMember,
            Action::DeleteMember { .. } => ActionKind::DeleteMember,
            Action::ModifyMemberRole { .. } => ActionKind::ModifyMemberRole,
            Action::ModifyMemberProfileKey { .. } => ActionKind::ModifyMemberProfileKey,
            Action::AddPendingMember { .. } => ActionKind::AddPendingMember,
            Action::DeletePendingMember { .. } => ActionKind::DeletePendingMember,
            Action::PromotePendingMember { .. } => ActionKind::PromotePendingMember,
            Action::ModifyTitle { .. } => ActionKind::ModifyTitle,
            Action::ModifyAvatar { .. } => ActionKind::ModifyAvatar,
            Action::ModifyDisappearingMessagesTimer { .. } => {
                ActionKind::ModifyDisappearingMessagesTimer
            }
            Action::ModifyAttributesAccess { .. } => ActionKind::ModifyAttributesAccess,
            Action::ModifyMembersAccess { .. } => ActionKind::ModifyMembersAccess,
            Action::ModifyAddFromInviteLinkAccess { .. } => {
                ActionKind::ModifyAddFromInviteLinkAccess
            }
            Action::AddRequestingMember { .. } => ActionKind::AddRequestingMember,
            Action::DeleteRequestingMember { .. } => ActionKind::DeleteRequestingMember,
            Action::PromoteRequestingMember { .. } => ActionKind::PromoteRequestingMember,
            Action::ModifyInviteLinkPassword { .. } => ActionKind::ModifyInviteLinkPassword,
            Action::ModifyDescription { .. } => ActionKind::ModifyDescription,
            Action::ModifyAnnouncementsOnly { .. } => ActionKind::ModifyAnnouncementsOnly,
            Action::AddBannedMember { .. } => ActionKind::AddBannedMember,
            Action::DeleteBannedMember { .. } => ActionKind::DeleteBannedMember,
            Action::PromotePendingPniAciMember { .. } => ActionKind::PromotePendingPniAciMember,
        }
    }
}

/// The encrypted action set for one revision transition.
#[derive(Serialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct GroupChangeActions {
    /// Encrypted identity of the editor.
    pub source_uuid: Vec<u8>,
    pub revision: u32,
    pub actions: Vec<Action>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawGroupChangeActions {
    source_uuid: Vec<u8>,
    revision: u32,
    actions: Vec<ciborium::Value>,
}

/// The variant tag of an externally tagged enum value.
fn variant_tag(value: &ciborium::Value) -> Option<&str> {
    match value {
        ciborium::Value::Map(entries) if entries.len() == 1 => entries[0].0.as_text(),
        ciborium::Value::Text(tag) => Some(tag.as_str()),
        _ => None,
    }
}

impl<'de> Deserialize<'de> for GroupChangeActions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawGroupChangeActions::deserialize(deserializer)?;

        let mut actions = Vec::with_capacity(raw.actions.len());
        for value in &raw.actions {
            match variant_tag(value).and_then(ActionKind::from_tag) {
                Some(_) => actions.push(value.deserialized::<Action>().map_err(D::Error::custom)?),
                None => log::debug!("Skipping unknown change action {:?}", variant_tag(value)),
            }
        }

        Ok(GroupChangeActions {
            source_uuid: raw.source_uuid,
            revision: raw.revision,
            actions,
        })
    }
}

impl GroupChangeActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Append another fragment's actions. Revision and source are kept.
    pub fn merge(mut self, other: GroupChangeActions) -> Self {
        self.actions.extend(other.actions);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let bytes = cbor_encode(self)?;
        if bytes.len() > MAX_ACTIONS_PAYLOAD_BYTES {
            return Err(WireError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_ACTIONS_PAYLOAD_BYTES,
            });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() > MAX_ACTIONS_PAYLOAD_BYTES {
            return Err(WireError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_ACTIONS_PAYLOAD_BYTES,
            });
        }
        cbor_decode(bytes)
    }
}

/// A notarized change as served by the group server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GroupChange {
    /// CBOR-encoded [`GroupChangeActions`].
    pub actions: Vec<u8>,
    pub server_signature: Vec<u8>,
    pub change_epoch: u32,
}

impl GroupChange {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        cbor_encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        cbor_decode(bytes)
    }

    pub fn decode_actions(&self) -> Result<GroupChangeActions, WireError> {
        GroupChangeActions::decode(&self.actions)
    }
}

// ---------------------------------------------------------------------------
// CBOR helpers
// ---------------------------------------------------------------------------

/// CBOR-encode a value to bytes.
pub fn cbor_encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| WireError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// CBOR-decode a value from bytes.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(bytes).map_err(|e| WireError::CborDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::Value;

    fn sample_actions() -> GroupChangeActions {
        GroupChangeActions {
            source_uuid: vec![1, 2, 3],
            revision: 7,
            actions: vec![
                Action::ModifyTitle {
                    title: vec![9; 40],
                },
                Action::DeleteMember {
                    deleted_user_id: vec![4; 44],
                },
                Action::ModifyAnnouncementsOnly {
                    announcements_only: true,
                },
            ],
        }
    }

    #[test]
    fn test_field_numbers_are_unique_and_ordered() {
        let numbers: Vec<u32> = ActionKind::ALL.iter().map(|k| k.field_number()).collect();
        assert_eq!(numbers, (3..=24).collect::<Vec<_>>());
    }

    #[test]
    fn test_tag_lookup() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(ActionKind::from_tag("ModifyGroupColour"), None);
    }

    #[test]
    fn test_actions_encode_decode() {
        let actions = sample_actions();
        let bytes = actions.encode().unwrap();
        assert_eq!(GroupChangeActions::decode(&bytes).unwrap(), actions);
    }

    #[test]
    fn test_unknown_action_variant_is_skipped() {
        let known = Value::serialized(&Action::ModifyTitle { title: vec![1; 30] }).unwrap();
        let unknown = Value::Map(vec![(
            Value::Text("ModifyGroupColour".into()),
            Value::Map(vec![(Value::Text("colour".into()), Value::Integer(3u8.into()))]),
        )]);
        let raw = Value::Map(vec![
            (Value::Text("revision".into()), Value::Integer(2u8.into())),
            (Value::Text("actions".into()), Value::Array(vec![unknown, known])),
        ]);
        let bytes = cbor_encode(&raw).unwrap();

        let decoded = GroupChangeActions::decode(&bytes).unwrap();
        assert_eq!(decoded.revision, 2);
        assert_eq!(decoded.actions.len(), 1);
        assert_eq!(decoded.actions[0].kind(), ActionKind::ModifyTitle);
    }

    #[test]
    fn test_unknown_struct_fields_are_ignored() {
        let raw = Value::Map(vec![
            (Value::Text("user_id".into()), Value::Array(vec![])),
            (Value::Text("timestamp".into()), Value::Integer(99u8.into())),
            (Value::Text("reason".into()), Value::Text("spam".into())),
        ]);
        let bytes = cbor_encode(&raw).unwrap();
        let banned: BannedMember = cbor_decode(&bytes).unwrap();
        assert_eq!(banned.timestamp, 99);
    }

    #[test]
    fn test_unknown_role_decodes_as_unknown() {
        let bytes = cbor_encode(&Value::Text("Moderator".into())).unwrap();
        let role: Role = cbor_decode(&bytes).unwrap();
        assert_eq!(role, Role::Unknown);
        assert!(!role.is_assignable());
    }

    #[test]
    fn test_malformed_known_action_fails() {
        let bad = Value::Map(vec![(
            Value::Text("ModifyMemberRole".into()),
            Value::Text("not a struct".into()),
        )]);
        let raw = Value::Map(vec![(Value::Text("actions".into()), Value::Array(vec![bad]))]);
        let bytes = cbor_encode(&raw).unwrap();
        assert!(matches!(
            GroupChangeActions::decode(&bytes),
            Err(WireError::CborDecode(_))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let actions = GroupChangeActions::new().with(Action::ModifyInviteLinkPassword {
            password: vec![0xFF; MAX_ACTIONS_PAYLOAD_BYTES],
        });
        assert!(matches!(
            actions.encode(),
            Err(WireError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_group_change_carries_raw_actions() {
        let actions_bytes = sample_actions().encode().unwrap();
        let change = GroupChange {
            actions: actions_bytes.clone(),
            server_signature: vec![0; 64],
            change_epoch: 2,
        };
        let decoded = GroupChange::decode(&change.encode().unwrap()).unwrap();
        assert_eq!(decoded.actions, actions_bytes);
        assert_eq!(decoded.decode_actions().unwrap(), sample_actions());
    }

    #[test]
    fn test_merge_fragments() {
        let a = GroupChangeActions::new().with(Action::ModifyTitle { title: vec![] });
        let b = GroupChangeActions::new().with(Action::ModifyAvatar { avatar: vec![] });
        let merged = a.merge(b);
        assert_eq!(merged.actions.len(), 2);
        assert_eq!(merged.count(ActionKind::ModifyAvatar), 1);
    }
}
