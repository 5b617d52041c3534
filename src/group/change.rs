//! Decrypted group changes.
//!
//! A change is a target revision, an optional editor and a list of actions.
//! Each action is one variant of [`DecryptedAction`]; its position in the
//! list mirrors the encrypted action it was decrypted from.

use serde::{Deserialize, Serialize};

use crate::group::model::{
    AccessRequired, DecryptedBannedMember, DecryptedMember, DecryptedPendingMember,
    DecryptedRequestingMember, EnabledState, Role,
};
use crate::ids::{Aci, PendingIdentity, ProfileKey, ServiceId, UuidCiphertext};
use crate::wire::ActionKind;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum DecryptedAction {
    AddMember(DecryptedMember),
    DeleteMember(Aci),
    ModifyMemberRole {
        aci: Aci,
        role: Role,
    },
    ModifyMemberProfileKey {
        aci: Aci,
        profile_key: ProfileKey,
    },
    AddPendingMember(DecryptedPendingMember),
    DeletePendingMember {
        identity: PendingIdentity,
        uuid_ciphertext: UuidCiphertext,
    },
    PromotePendingMember(DecryptedMember),
    ModifyTitle(String),
    ModifyAvatar(String),
    ModifyDisappearingMessagesTimer(u32),
    ModifyAttributesAccess(AccessRequired),
    ModifyMembersAccess(AccessRequired),
    ModifyAddFromInviteLinkAccess(AccessRequired),
    AddRequestingMember(DecryptedRequestingMember),
    DeleteRequestingMember(Aci),
    PromoteRequestingMember {
        aci: Aci,
        role: Role,
    },
    ModifyInviteLinkPassword(Vec<u8>),
    ModifyDescription(String),
    ModifyAnnouncementsOnly(EnabledState),
    AddBannedMember(DecryptedBannedMember),
    DeleteBannedMember(ServiceId),
    /// The member carries the PNI it was invited under in `pni`.
    PromotePendingPniAciMember(DecryptedMember),
}

impl DecryptedAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            DecryptedAction::AddMember(_) => ActionKind::AddMember,
            DecryptedAction::DeleteMember(_) => ActionKind::DeleteMember,
            DecryptedAction::ModifyMemberRole { .. } => ActionKind::ModifyMemberRole,
            DecryptedAction::ModifyMemberProfileKey { .. } => ActionKind::ModifyMemberProfileKey,
            DecryptedAction::AddPendingMember(_) => ActionKind::AddPendingMember,
            DecryptedAction::DeletePendingMember { .. } => ActionKind::DeletePendingMember,
            DecryptedAction::PromotePendingMember(_) => ActionKind::PromotePendingMember,
            DecryptedAction::ModifyTitle(_) => ActionKind::ModifyTitle,
            DecryptedAction::ModifyAvatar(_) => ActionKind::ModifyAvatar,
            DecryptedAction::ModifyDisappearingMessagesTimer(_) => {
                ActionKind::ModifyDisappearingMessagesTimer
            }
            DecryptedAction::ModifyAttributesAccess(_) => ActionKind::ModifyAttributesAccess,
            DecryptedAction::ModifyMembersAccess(_) => ActionKind::ModifyMembersAccess,
            DecryptedAction::ModifyAddFromInviteLinkAccess(_) => {
                ActionKind::ModifyAddFromInviteLinkAccess
            }
            DecryptedAction::AddRequestingMember(_) => ActionKind::AddRequestingMember,
            DecryptedAction::DeleteRequestingMember(_) => ActionKind::DeleteRequestingMember,
            DecryptedAction::PromoteRequestingMember { .. } => ActionKind::PromoteRequestingMember,
            DecryptedAction::ModifyInviteLinkPassword(_) => ActionKind::ModifyInviteLinkPassword,
            DecryptedAction::ModifyDescription(_) => ActionKind::ModifyDescription,
            DecryptedAction::ModifyAnnouncementsOnly(_) => ActionKind::ModifyAnnouncementsOnly,
            DecryptedAction::AddBannedMember(_) => ActionKind::AddBannedMember,
            DecryptedAction::DeleteBannedMember(_) => ActionKind::DeleteBannedMember,
            DecryptedAction::PromotePendingPniAciMember(_) => {
                ActionKind::PromotePendingPniAciMember
            }
        }
    }

    fn is_profile_key_change(&self) -> bool {
        matches!(self, DecryptedAction::ModifyMemberProfileKey { .. })
    }

    fn is_ban_change(&self) -> bool {
        matches!(
            self,
            DecryptedAction::AddBannedMember(_) | DecryptedAction::DeleteBannedMember(_)
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct DecryptedGroupChange {
    /// `None` for changes reconstructed from snapshots.
    pub editor: Option<ServiceId>,
    pub revision: u32,
    pub actions: Vec<DecryptedAction>,
}

impl DecryptedGroupChange {
    pub fn new(revision: u32) -> Self {
        Self {
            revision,
            ..Default::default()
        }
    }

    pub fn with(mut self, action: DecryptedAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_editor(mut self, editor: ServiceId) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn is_empty_except_for_profile_key_changes(&self) -> bool {
        self.actions.iter().all(DecryptedAction::is_profile_key_change)
    }

    /// At least one ban change, and nothing else but profile key changes.
    pub fn is_empty_except_for_ban_changes_and_optional_profile_key_changes(&self) -> bool {
        self.actions.iter().any(DecryptedAction::is_ban_change)
            && self
                .actions
                .iter()
                .all(|a| a.is_ban_change() || a.is_profile_key_change())
    }

    /// Changes not worth surfacing to the user.
    pub fn is_silent(&self) -> bool {
        self.is_empty_except_for_profile_key_changes()
            || self.is_empty_except_for_ban_changes_and_optional_profile_key_changes()
    }
}
