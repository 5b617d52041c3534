//! Group crypto operations.
//!
//! [`GroupsV2Operations`] holds what is shared across groups (server public
//! params, configuration). [`GroupOperations`] binds that to one group's
//! cipher and is the only code that touches the ciphertext codec.
//!
//! | Area | Where |
//! |------|-------|
//! | Attribute blobs, identities, member records, snapshots, changes | this module |
//! | Mutation builders, group creation | [`builders`] |

pub mod builders;

use crate::config::GroupsConfig;
use crate::crypto::{
    ClientGroupCipher, GroupCipher, GroupPublicParams, GroupSecretParams, ServerPublicParams,
};
use crate::error::{GroupsError, Result};
use crate::group::change::{DecryptedAction, DecryptedGroupChange};
use crate::group::model::{
    DecryptedBannedMember, DecryptedGroup, DecryptedMember, DecryptedPendingMember,
    DecryptedRequestingMember, EnabledState, Role,
};
use crate::ids::{Aci, PendingIdentity, Pni, ProfileKey, ServiceId, UuidCiphertext};
use crate::wire::{
    AccessRequired, Action, BannedMember, Group, GroupAttributeBlob, GroupChange,
    GroupChangeActions, Member, PendingMember, RequestingMember,
};

pub use builders::{GroupCandidate, NewGroup};

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Operations shared by every group of one client session.
#[derive(Clone, Debug)]
pub struct GroupsV2Operations {
    server: ServerPublicParams,
    config: GroupsConfig,
}

impl GroupsV2Operations {
    pub fn new(server: ServerPublicParams, config: GroupsConfig) -> Self {
        Self { server, config }
    }

    pub fn server_public_params(&self) -> &ServerPublicParams {
        &self.server
    }

    pub fn config(&self) -> &GroupsConfig {
        &self.config
    }

    pub fn for_group(&self, params: &GroupSecretParams) -> GroupOperations<ClientGroupCipher> {
        GroupOperations::with_cipher(
            ClientGroupCipher::new(params.clone(), self.server),
            self.server,
            self.config.clone(),
        )
    }
}

/// Per-group encryption, decryption and change construction.
#[derive(Clone)]
pub struct GroupOperations<C: GroupCipher> {
    cipher: C,
    server: ServerPublicParams,
    config: GroupsConfig,
}

/// Decrypted subset of a group shown before joining via link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptedGroupJoinInfo {
    pub title: String,
    pub avatar: String,
    pub member_count: u32,
    pub add_from_invite_link: AccessRequired,
    pub revision: u32,
    pub pending_admin_approval: bool,
    pub description: String,
}

/// Wire form of [`DecryptedGroupJoinInfo`].
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GroupJoinInfo {
    pub public_key: Vec<u8>,
    pub title: Vec<u8>,
    pub avatar: Vec<u8>,
    pub member_count: u32,
    pub add_from_invite_link: AccessRequired,
    pub revision: u32,
    pub pending_admin_approval: bool,
    pub description: Vec<u8>,
}

impl<C: GroupCipher> GroupOperations<C> {
    pub fn with_cipher(cipher: C, server: ServerPublicParams, config: GroupsConfig) -> Self {
        Self {
            cipher,
            server,
            config,
        }
    }

    pub fn cipher(&self) -> &C {
        &self.cipher
    }

    pub fn public_params(&self) -> GroupPublicParams {
        self.cipher.group_public_params()
    }

    pub fn config(&self) -> &GroupsConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Attribute blobs
    // -----------------------------------------------------------------------

    fn encrypt_attribute(&self, blob: &GroupAttributeBlob) -> Result<Vec<u8>> {
        let plaintext = crate::wire::cbor_encode(blob)?;
        self.cipher
            .encrypt_blob(&plaintext)
            .map_err(GroupsError::from_encrypt)
    }

    /// `None` for an empty blob, and for any blob that cannot be decrypted or
    /// parsed. Callers substitute the attribute's default.
    fn decrypt_attribute(&self, blob: &[u8]) -> Option<GroupAttributeBlob> {
        if blob.is_empty() {
            return None;
        }
        let plaintext = match self.cipher.decrypt_blob(blob) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                log::warn!("Bad encrypted attribute blob ({} bytes): {}", blob.len(), e);
                return None;
            }
        };
        match crate::wire::cbor_decode::<GroupAttributeBlob>(&plaintext) {
            Ok(attribute) => Some(attribute),
            Err(e) => {
                log::warn!("Unreadable attribute blob: {}", e);
                None
            }
        }
    }

    pub fn encrypt_title(&self, title: &str) -> Result<Vec<u8>> {
        self.encrypt_attribute(&GroupAttributeBlob::Title(title.to_string()))
    }

    pub fn decrypt_title(&self, ciphertext: &[u8]) -> String {
        match self.decrypt_attribute(ciphertext) {
            Some(GroupAttributeBlob::Title(title)) => title.trim().to_string(),
            _ => String::new(),
        }
    }

    pub fn encrypt_description(&self, description: &str) -> Result<Vec<u8>> {
        self.encrypt_attribute(&GroupAttributeBlob::DescriptionText(
            description.to_string(),
        ))
    }

    pub fn decrypt_description(&self, ciphertext: &[u8]) -> String {
        match self.decrypt_attribute(ciphertext) {
            Some(GroupAttributeBlob::DescriptionText(text)) => text.trim().to_string(),
            _ => String::new(),
        }
    }

    pub fn encrypt_avatar(&self, avatar_key: &str) -> Result<Vec<u8>> {
        self.encrypt_attribute(&GroupAttributeBlob::Avatar(avatar_key.to_string()))
    }

    pub fn decrypt_avatar(&self, ciphertext: &[u8]) -> String {
        match self.decrypt_attribute(ciphertext) {
            Some(GroupAttributeBlob::Avatar(key)) => key,
            _ => String::new(),
        }
    }

    pub fn encrypt_timer(&self, seconds: u32) -> Result<Vec<u8>> {
        self.encrypt_attribute(&GroupAttributeBlob::DisappearingMessagesDuration(seconds))
    }

    pub fn decrypt_timer(&self, ciphertext: &[u8]) -> u32 {
        match self.decrypt_attribute(ciphertext) {
            Some(GroupAttributeBlob::DisappearingMessagesDuration(seconds)) => seconds,
            _ => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Identities
    // -----------------------------------------------------------------------

    pub fn encrypt_service_id(&self, id: ServiceId) -> Result<UuidCiphertext> {
        self.cipher
            .encrypt_service_id(id)
            .map_err(GroupsError::from_encrypt)
    }

    pub fn encrypt_aci(&self, aci: Aci) -> Result<Vec<u8>> {
        Ok(self.encrypt_service_id(ServiceId::Aci(aci))?.0)
    }

    pub fn decrypt_service_id(&self, ciphertext: &[u8]) -> Result<ServiceId> {
        self.cipher
            .decrypt_service_id(&UuidCiphertext(ciphertext.to_vec()))
            .map_err(|e| GroupsError::from_decrypt(e, "identity"))
    }

    pub fn decrypt_aci(&self, ciphertext: &[u8]) -> Result<Aci> {
        match self.decrypt_service_id(ciphertext)? {
            ServiceId::Aci(aci) => Ok(aci),
            ServiceId::Pni(_) => Err(GroupsError::InvalidGroupState(
                "expected an ACI, found a PNI".into(),
            )),
        }
    }

    pub fn decrypt_pni(&self, ciphertext: &[u8]) -> Result<Pni> {
        match self.decrypt_service_id(ciphertext)? {
            ServiceId::Pni(pni) => Ok(pni),
            ServiceId::Aci(_) => Err(GroupsError::InvalidGroupState(
                "expected a PNI, found an ACI".into(),
            )),
        }
    }

    /// Never fails: an identity this client cannot open is `Unknown`.
    pub fn decrypt_service_id_or_unknown(&self, ciphertext: &[u8]) -> PendingIdentity {
        match self
            .cipher
            .decrypt_service_id(&UuidCiphertext(ciphertext.to_vec()))
        {
            Ok(id) => PendingIdentity::Known(id),
            Err(e) => {
                log::debug!("Pending identity not decryptable: {}", e);
                PendingIdentity::Unknown
            }
        }
    }

    fn decrypt_profile_key(&self, ciphertext: &[u8], owner: Aci) -> Result<ProfileKey> {
        self.cipher
            .decrypt_profile_key(ciphertext, owner)
            .map_err(|e| GroupsError::from_decrypt(e, "profile key"))
    }

    fn open_presentation(&self, presentation: &[u8]) -> Result<(Aci, ProfileKey)> {
        let opened = self
            .cipher
            .open_presentation(presentation)
            .map_err(|e| GroupsError::from_decrypt(e, "presentation"))?;
        Ok((opened.aci, opened.profile_key))
    }

    /// Identity and profile key from either a presentation or the legacy
    /// `user_id` + `profile_key` pair. An empty half of the legacy pair
    /// selects the presentation.
    fn decrypt_aci_and_profile_key(
        &self,
        presentation: &[u8],
        user_id: &[u8],
        profile_key: &[u8],
    ) -> Result<(Aci, ProfileKey)> {
        if user_id.is_empty() || profile_key.is_empty() {
            self.open_presentation(presentation)
        } else {
            let aci = self.decrypt_aci(user_id)?;
            let profile_key = self.decrypt_profile_key(profile_key, aci)?;
            Ok((aci, profile_key))
        }
    }

    // -----------------------------------------------------------------------
    // Member records
    // -----------------------------------------------------------------------

    pub fn decrypt_member(&self, member: &Member) -> Result<DecryptedMember> {
        let (aci, profile_key) = if member.presentation.is_empty() {
            let aci = self.decrypt_aci(&member.user_id)?;
            (aci, self.decrypt_profile_key(&member.profile_key, aci)?)
        } else {
            self.open_presentation(&member.presentation)?
        };
        Ok(DecryptedMember::new(
            aci,
            member.role,
            profile_key,
            member.joined_at_revision,
        ))
    }

    pub fn decrypt_pending_member(&self, pending: &PendingMember) -> Result<DecryptedPendingMember> {
        let user_id = &pending.member.user_id;
        let role = if pending.member.role.is_assignable() {
            pending.member.role
        } else {
            Role::Default
        };
        Ok(DecryptedPendingMember {
            identity: self.decrypt_service_id_or_unknown(user_id),
            uuid_ciphertext: UuidCiphertext(user_id.clone()),
            role,
            added_by: self.decrypt_aci(&pending.added_by_user_id)?,
            timestamp: pending.timestamp,
        })
    }

    pub fn decrypt_requesting_member(
        &self,
        requesting: &RequestingMember,
    ) -> Result<DecryptedRequestingMember> {
        let (aci, profile_key) = if requesting.presentation.is_empty() {
            let aci = self.decrypt_aci(&requesting.user_id)?;
            (aci, self.decrypt_profile_key(&requesting.profile_key, aci)?)
        } else {
            self.open_presentation(&requesting.presentation)?
        };
        Ok(DecryptedRequestingMember {
            aci,
            profile_key,
            timestamp: requesting.timestamp,
        })
    }

    pub fn decrypt_banned_member(&self, banned: &BannedMember) -> Result<DecryptedBannedMember> {
        Ok(DecryptedBannedMember {
            service_id: self.decrypt_service_id(&banned.user_id)?,
            timestamp: banned.timestamp,
        })
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Decrypt a full snapshot. All or nothing: one bad record fails the group.
    pub fn decrypt_group(&self, group: &Group) -> Result<DecryptedGroup> {
        let mut decrypted = DecryptedGroup {
            title: self.decrypt_title(&group.title),
            avatar: self.decrypt_avatar(&group.avatar),
            disappearing_messages_timer: self.decrypt_timer(&group.disappearing_messages_timer),
            access_control: group.access_control,
            revision: group.revision,
            invite_link_password: group.invite_link_password.clone(),
            description: self.decrypt_description(&group.description),
            is_announcement_group: EnabledState::from(group.announcements_only),
            ..Default::default()
        };

        for member in &group.members {
            let member = self.decrypt_member(member)?;
            decrypted.members.insert(member.aci, member);
        }
        for pending in &group.pending_members {
            let pending = self.decrypt_pending_member(pending)?;
            decrypted
                .pending_members
                .insert(pending.uuid_ciphertext.clone(), pending);
        }
        for requesting in &group.requesting_members {
            let requesting = self.decrypt_requesting_member(requesting)?;
            decrypted
                .requesting_members
                .insert(requesting.aci, requesting);
        }
        for banned in &group.banned_members {
            let banned = self.decrypt_banned_member(banned)?;
            decrypted.banned_members.insert(banned.service_id, banned);
        }

        Ok(decrypted)
    }

    pub fn decrypt_group_join_info(&self, info: &GroupJoinInfo) -> DecryptedGroupJoinInfo {
        DecryptedGroupJoinInfo {
            title: self.decrypt_title(&info.title),
            avatar: self.decrypt_avatar(&info.avatar),
            member_count: info.member_count,
            add_from_invite_link: info.add_from_invite_link,
            revision: info.revision,
            pending_admin_approval: info.pending_admin_approval,
            description: self.decrypt_description(&info.description),
        }
    }

    // -----------------------------------------------------------------------
    // Changes
    // -----------------------------------------------------------------------

    /// Decrypt a notarized change.
    ///
    /// Returns `Ok(None)` when the change's epoch is newer than this build
    /// understands; the caller should fall back to snapshot reconstruction.
    pub fn decrypt_change(
        &self,
        change: &GroupChange,
        verify_signature: bool,
    ) -> Result<Option<DecryptedGroupChange>> {
        if change.change_epoch > self.config.highest_known_epoch {
            log::warn!(
                "Ignoring change from future epoch {} (highest known {})",
                change.change_epoch,
                self.config.highest_known_epoch
            );
            return Ok(None);
        }

        if verify_signature {
            self.server
                .verify_change_signature(&change.actions, &change.server_signature)
                .map_err(|_| GroupsError::VerificationFailed)?;
        }

        let actions = GroupChangeActions::decode(&change.actions)?;
        self.decrypt_change_actions(&actions).map(Some)
    }

    pub fn decrypt_change_actions(
        &self,
        actions: &GroupChangeActions,
    ) -> Result<DecryptedGroupChange> {
        let mut change = DecryptedGroupChange::new(actions.revision);
        if !actions.source_uuid.is_empty() {
            change.editor = Some(self.decrypt_service_id(&actions.source_uuid)?);
        }

        for action in &actions.actions {
            let decrypted = self.decrypt_action(action, actions.revision)?;
            if let DecryptedAction::PromotePendingPniAciMember(member) = &decrypted {
                // The acting identity of a PNI acceptance is the new ACI.
                change.editor = Some(ServiceId::Aci(member.aci));
            }
            change.actions.push(decrypted);
        }

        Ok(change)
    }

    fn decrypt_action(&self, action: &Action, revision: u32) -> Result<DecryptedAction> {
        Ok(match action {
            Action::AddMember { added, .. } => {
                let mut member = self.decrypt_member(added)?;
                member.joined_at_revision = revision;
                DecryptedAction::AddMember(member)
            }
            Action::DeleteMember { deleted_user_id } => {
                DecryptedAction::DeleteMember(self.decrypt_aci(deleted_user_id)?)
            }
            Action::ModifyMemberRole { user_id, role } => DecryptedAction::ModifyMemberRole {
                aci: self.decrypt_aci(user_id)?,
                role: *role,
            },
            Action::ModifyMemberProfileKey {
                presentation,
                user_id,
                profile_key,
            } => {
                let (aci, profile_key) =
                    self.decrypt_aci_and_profile_key(presentation, user_id, profile_key)?;
                DecryptedAction::ModifyMemberProfileKey { aci, profile_key }
            }
            Action::AddPendingMember { added } => {
                DecryptedAction::AddPendingMember(self.decrypt_pending_member(added)?)
            }
            Action::DeletePendingMember { deleted_user_id } => {
                DecryptedAction::DeletePendingMember {
                    identity: self.decrypt_service_id_or_unknown(deleted_user_id),
                    uuid_ciphertext: UuidCiphertext(deleted_user_id.clone()),
                }
            }
            Action::PromotePendingMember {
                presentation,
                user_id,
                profile_key,
            } => {
                let (aci, profile_key) =
                    self.decrypt_aci_and_profile_key(presentation, user_id, profile_key)?;
                DecryptedAction::PromotePendingMember(DecryptedMember::new(
                    aci,
                    Role::Default,
                    profile_key,
                    revision,
                ))
            }
            Action::ModifyTitle { title } => DecryptedAction::ModifyTitle(self.decrypt_title(title)),
            Action::ModifyAvatar { avatar } => {
                DecryptedAction::ModifyAvatar(self.decrypt_avatar(avatar))
            }
            Action::ModifyDisappearingMessagesTimer { timer } => {
                DecryptedAction::ModifyDisappearingMessagesTimer(self.decrypt_timer(timer))
            }
            Action::ModifyAttributesAccess { access } => {
                DecryptedAction::ModifyAttributesAccess(*access)
            }
            Action::ModifyMembersAccess { access } => DecryptedAction::ModifyMembersAccess(*access),
            Action::ModifyAddFromInviteLinkAccess { access } => {
                DecryptedAction::ModifyAddFromInviteLinkAccess(*access)
            }
            Action::AddRequestingMember { added } => {
                DecryptedAction::AddRequestingMember(self.decrypt_requesting_member(added)?)
            }
            Action::DeleteRequestingMember { deleted_user_id } => {
                DecryptedAction::DeleteRequestingMember(self.decrypt_aci(deleted_user_id)?)
            }
            Action::PromoteRequestingMember { user_id, role } => {
                DecryptedAction::PromoteRequestingMember {
                    aci: self.decrypt_aci(user_id)?,
                    role: *role,
                }
            }
            Action::ModifyInviteLinkPassword { password } => {
                DecryptedAction::ModifyInviteLinkPassword(password.clone())
            }
            Action::ModifyDescription { description } => {
                DecryptedAction::ModifyDescription(self.decrypt_description(description))
            }
            Action::ModifyAnnouncementsOnly { announcements_only } => {
                DecryptedAction::ModifyAnnouncementsOnly(EnabledState::from(*announcements_only))
            }
            Action::AddBannedMember { added } => {
                DecryptedAction::AddBannedMember(self.decrypt_banned_member(added)?)
            }
            Action::DeleteBannedMember { deleted_user_id } => {
                DecryptedAction::DeleteBannedMember(self.decrypt_service_id(deleted_user_id)?)
            }
            Action::PromotePendingPniAciMember {
                presentation,
                user_id,
                pni,
                profile_key,
            } => {
                let (aci, profile_key) =
                    self.decrypt_aci_and_profile_key(presentation, user_id, profile_key)?;
                let mut member = DecryptedMember::new(aci, Role::Default, profile_key, revision);
                member.pni = Some(self.decrypt_pni(pni)?);
                DecryptedAction::PromotePendingPniAciMember(member)
            }
        })
    }
}
