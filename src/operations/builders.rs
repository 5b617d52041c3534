//! Mutation builders.
//!
//! Every builder returns a [`GroupChangeActions`] fragment with no revision
//! or source set; callers combine fragments with [`GroupChangeActions::merge`]
//! and the directory client stamps the revision before sending.

use std::collections::BTreeMap;

use crate::crypto::{GroupCipher, GroupSecretParams, ProfileKeyCredential};
use crate::error::{GroupsError, Result};
use crate::group::model::{AccessControl, DecryptedBannedMember, Role};
use crate::ids::{Aci, ServiceId, UuidCiphertext};
use crate::limits::{check_ban_list, BanListStatus};
use crate::operations::{GroupOperations, GroupsV2Operations};
use crate::wire::{
    AccessRequired, Action, BannedMember, Group, GroupChangeActions, Member, PendingMember,
    RequestingMember,
};

/// Someone to add to a group. Without a credential they can only be invited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupCandidate {
    pub service_id: ServiceId,
    pub credential: Option<ProfileKeyCredential>,
}

impl GroupCandidate {
    pub fn new(service_id: ServiceId, credential: Option<ProfileKeyCredential>) -> Self {
        Self {
            service_id,
            credential,
        }
    }
}

/// A freshly built group, ready to be created on the server.
#[derive(Clone)]
pub struct NewGroup {
    pub secret_params: GroupSecretParams,
    pub group: Group,
    pub avatar: Option<Vec<u8>>,
}

impl GroupsV2Operations {
    /// Build revision 0 of a new group under fresh secret params.
    pub fn create_new_group(
        &self,
        secret_params: GroupSecretParams,
        title: &str,
        avatar: Option<Vec<u8>>,
        self_candidate: &GroupCandidate,
        members: &[GroupCandidate],
        member_role: Role,
        disappearing_messages_timer: u32,
    ) -> Result<NewGroup> {
        let ops = self.for_group(&secret_params);
        let group = ops.create_new_group(
            title,
            self_candidate,
            members,
            member_role,
            disappearing_messages_timer,
        )?;
        Ok(NewGroup {
            secret_params,
            group,
            avatar,
        })
    }
}

impl<C: GroupCipher> GroupOperations<C> {
    // -----------------------------------------------------------------------
    // Record helpers
    // -----------------------------------------------------------------------

    fn presentation(&self, credential: &ProfileKeyCredential) -> Result<Vec<u8>> {
        self.cipher
            .create_presentation(credential)
            .map_err(GroupsError::from_encrypt)
    }

    fn member(&self, credential: &ProfileKeyCredential, role: Role) -> Result<Member> {
        Ok(Member {
            role,
            presentation: self.presentation(credential)?,
            ..Default::default()
        })
    }

    fn invitee(&self, id: ServiceId, role: Role, added_by: Aci) -> Result<PendingMember> {
        Ok(PendingMember {
            member: Member {
                user_id: self.encrypt_service_id(id)?.0,
                role,
                ..Default::default()
            },
            added_by_user_id: self.encrypt_aci(added_by)?,
            timestamp: 0,
        })
    }

    fn ban_action(&self, id: ServiceId) -> Result<Action> {
        Ok(Action::AddBannedMember {
            added: BannedMember {
                user_id: self.encrypt_service_id(id)?.0,
                timestamp: 0,
            },
        })
    }

    fn unban_action(&self, id: ServiceId) -> Result<Action> {
        Ok(Action::DeleteBannedMember {
            deleted_user_id: self.encrypt_service_id(id)?.0,
        })
    }

    // -----------------------------------------------------------------------
    // Group creation
    // -----------------------------------------------------------------------

    /// Revision 0 of a new group. `self_candidate` becomes the sole
    /// administrator; `members` must not contain it.
    pub fn create_new_group(
        &self,
        title: &str,
        self_candidate: &GroupCandidate,
        members: &[GroupCandidate],
        member_role: Role,
        disappearing_messages_timer: u32,
    ) -> Result<Group> {
        if members
            .iter()
            .any(|m| m.service_id == self_candidate.service_id)
        {
            return Err(GroupsError::InvalidInput(
                "members must not contain self".into(),
            ));
        }
        let self_credential = self_candidate.credential.as_ref().ok_or_else(|| {
            GroupsError::InvalidInput("self candidate has no credential".into())
        })?;
        let self_aci = self_credential.aci;

        let mut group = Group {
            public_key: self.public_params().as_bytes().to_vec(),
            title: self.encrypt_title(title)?,
            disappearing_messages_timer: self.encrypt_timer(disappearing_messages_timer)?,
            access_control: AccessControl {
                attributes: AccessRequired::Member,
                members: AccessRequired::Member,
                add_from_invite_link: AccessRequired::Unknown,
            },
            revision: 0,
            ..Default::default()
        };

        group
            .members
            .push(self.member(self_credential, Role::Administrator)?);

        for candidate in members {
            match &candidate.credential {
                Some(credential) => group.members.push(self.member(credential, member_role)?),
                None => group.pending_members.push(self.invitee(
                    candidate.service_id,
                    member_role,
                    self_aci,
                )?),
            }
        }

        Ok(group)
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    pub fn create_modify_group_title(&self, title: &str) -> Result<GroupChangeActions> {
        Ok(GroupChangeActions::new().with(Action::ModifyTitle {
            title: self.encrypt_title(title)?,
        }))
    }

    pub fn create_modify_group_description(
        &self,
        description: &str,
    ) -> Result<GroupChangeActions> {
        Ok(GroupChangeActions::new().with(Action::ModifyDescription {
            description: self.encrypt_description(description)?,
        }))
    }

    pub fn create_modify_group_avatar(&self, avatar_key: &str) -> Result<GroupChangeActions> {
        Ok(GroupChangeActions::new().with(Action::ModifyAvatar {
            avatar: self.encrypt_avatar(avatar_key)?,
        }))
    }

    pub fn create_modify_group_timer_change(&self, seconds: u32) -> Result<GroupChangeActions> {
        Ok(
            GroupChangeActions::new().with(Action::ModifyDisappearingMessagesTimer {
                timer: self.encrypt_timer(seconds)?,
            }),
        )
    }

    pub fn create_announcement_group_change(&self, announcements_only: bool) -> GroupChangeActions {
        GroupChangeActions::new().with(Action::ModifyAnnouncementsOnly { announcements_only })
    }

    // -----------------------------------------------------------------------
    // Access control and invite link
    // -----------------------------------------------------------------------

    pub fn create_change_attributes_rights(&self, access: AccessRequired) -> GroupChangeActions {
        GroupChangeActions::new().with(Action::ModifyAttributesAccess { access })
    }

    pub fn create_change_membership_rights(&self, access: AccessRequired) -> GroupChangeActions {
        GroupChangeActions::new().with(Action::ModifyMembersAccess { access })
    }

    pub fn create_change_join_by_link_rights(&self, access: AccessRequired) -> GroupChangeActions {
        GroupChangeActions::new().with(Action::ModifyAddFromInviteLinkAccess { access })
    }

    pub fn create_modify_group_link_password_change(&self, password: &[u8]) -> GroupChangeActions {
        GroupChangeActions::new().with(Action::ModifyInviteLinkPassword {
            password: password.to_vec(),
        })
    }

    pub fn create_modify_group_link_password_and_rights_change(
        &self,
        password: &[u8],
        access: AccessRequired,
    ) -> GroupChangeActions {
        self.create_modify_group_link_password_change(password)
            .merge(self.create_change_join_by_link_rights(access))
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Add candidates: members if they carry a credential, invitees
    /// otherwise. Banned candidates are unbanned first.
    pub fn create_modify_group_membership_change(
        &self,
        candidates: &[GroupCandidate],
        banned: &BTreeMap<ServiceId, DecryptedBannedMember>,
        self_aci: Aci,
    ) -> Result<GroupChangeActions> {
        let to_unban: Vec<ServiceId> = candidates
            .iter()
            .map(|c| c.service_id)
            .filter(|id| banned.contains_key(id))
            .collect();
        let mut actions = self.create_unban_service_ids_change(&to_unban)?;

        for candidate in candidates {
            match &candidate.credential {
                Some(credential) => actions.push(Action::AddMember {
                    added: self.member(credential, Role::Default)?,
                    join_from_invite_link: false,
                }),
                None => actions.push(Action::AddPendingMember {
                    added: self.invitee(candidate.service_id, Role::Default, self_aci)?,
                }),
            }
        }

        Ok(actions)
    }

    /// Swap the AddMember records of a prepared change for fresh ones built
    /// from `candidates`, keeping each record's role.
    pub fn replace_add_members(
        &self,
        change: GroupChangeActions,
        candidates: &[GroupCandidate],
    ) -> Result<GroupChangeActions> {
        let adds = change
            .actions
            .iter()
            .filter(|a| matches!(a, Action::AddMember { .. }))
            .count();
        if adds != candidates.len() {
            return Err(GroupsError::InvalidInput(format!(
                "{} replacement candidates for {} added members",
                candidates.len(),
                adds
            )));
        }

        let mut candidates = candidates.iter();
        let mut replaced = GroupChangeActions {
            source_uuid: change.source_uuid,
            revision: change.revision,
            actions: Vec::with_capacity(change.actions.len()),
        };
        for action in change.actions {
            match action {
                Action::AddMember {
                    added,
                    join_from_invite_link,
                } => {
                    let credential = candidates
                        .next()
                        .and_then(|c| c.credential.as_ref())
                        .ok_or_else(|| {
                            GroupsError::InvalidInput(
                                "replacement candidate missing credential".into(),
                            )
                        })?;
                    replaced.push(Action::AddMember {
                        added: self.member(credential, added.role)?,
                        join_from_invite_link,
                    });
                }
                other => replaced.push(other),
            }
        }
        Ok(replaced)
    }

    pub fn create_group_join_request(
        &self,
        credential: &ProfileKeyCredential,
    ) -> Result<GroupChangeActions> {
        Ok(GroupChangeActions::new().with(Action::AddRequestingMember {
            added: RequestingMember {
                presentation: self.presentation(credential)?,
                ..Default::default()
            },
        }))
    }

    pub fn create_group_join_direct(
        &self,
        credential: &ProfileKeyCredential,
    ) -> Result<GroupChangeActions> {
        Ok(GroupChangeActions::new().with(Action::AddMember {
            added: self.member(credential, Role::Default)?,
            join_from_invite_link: true,
        }))
    }

    pub fn create_refuse_group_join_request(
        &self,
        requesters: &[Aci],
        also_ban: bool,
        banned: &BTreeMap<ServiceId, DecryptedBannedMember>,
    ) -> Result<GroupChangeActions> {
        let mut actions = if also_ban {
            let ids: Vec<ServiceId> = requesters.iter().copied().map(ServiceId::Aci).collect();
            self.create_ban_service_ids_change(&ids, false, banned)?
        } else {
            GroupChangeActions::new()
        };

        for aci in requesters {
            actions.push(Action::DeleteRequestingMember {
                deleted_user_id: self.encrypt_aci(*aci)?,
            });
        }
        Ok(actions)
    }

    pub fn create_approve_group_join_request(
        &self,
        requesters: &[Aci],
    ) -> Result<GroupChangeActions> {
        let mut actions = GroupChangeActions::new();
        for aci in requesters {
            actions.push(Action::PromoteRequestingMember {
                user_id: self.encrypt_aci(*aci)?,
                role: Role::Default,
            });
        }
        Ok(actions)
    }

    pub fn create_remove_members_change(
        &self,
        members: &[Aci],
        also_ban: bool,
        banned: &BTreeMap<ServiceId, DecryptedBannedMember>,
    ) -> Result<GroupChangeActions> {
        let mut actions = if also_ban {
            let ids: Vec<ServiceId> = members.iter().copied().map(ServiceId::Aci).collect();
            self.create_ban_service_ids_change(&ids, false, banned)?
        } else {
            GroupChangeActions::new()
        };

        for aci in members {
            actions.push(Action::DeleteMember {
                deleted_user_id: self.encrypt_aci(*aci)?,
            });
        }
        Ok(actions)
    }

    pub fn create_leave_and_promote_members_to_admin(
        &self,
        self_aci: Aci,
        new_admins: &[Aci],
    ) -> Result<GroupChangeActions> {
        let mut actions = GroupChangeActions::new().with(Action::DeleteMember {
            deleted_user_id: self.encrypt_aci(self_aci)?,
        });
        for aci in new_admins {
            actions.push(Action::ModifyMemberRole {
                user_id: self.encrypt_aci(*aci)?,
                role: Role::Administrator,
            });
        }
        Ok(actions)
    }

    pub fn create_change_member_role(&self, aci: Aci, role: Role) -> Result<GroupChangeActions> {
        Ok(GroupChangeActions::new().with(Action::ModifyMemberRole {
            user_id: self.encrypt_aci(aci)?,
            role,
        }))
    }

    pub fn create_update_profile_key_credential_change(
        &self,
        credential: &ProfileKeyCredential,
    ) -> Result<GroupChangeActions> {
        Ok(GroupChangeActions::new().with(Action::ModifyMemberProfileKey {
            presentation: self.presentation(credential)?,
            user_id: Vec::new(),
            profile_key: Vec::new(),
        }))
    }

    // -----------------------------------------------------------------------
    // Invitations
    // -----------------------------------------------------------------------

    pub fn create_accept_invite_change(
        &self,
        credential: &ProfileKeyCredential,
    ) -> Result<GroupChangeActions> {
        Ok(GroupChangeActions::new().with(Action::PromotePendingMember {
            presentation: self.presentation(credential)?,
            user_id: Vec::new(),
            profile_key: Vec::new(),
        }))
    }

    /// Accept an invitation addressed to our PNI. The server fills in the
    /// PNI ciphertext it matched.
    pub fn create_accept_pni_invite_change(
        &self,
        credential: &ProfileKeyCredential,
    ) -> Result<GroupChangeActions> {
        Ok(
            GroupChangeActions::new().with(Action::PromotePendingPniAciMember {
                presentation: self.presentation(credential)?,
                user_id: Vec::new(),
                pni: Vec::new(),
                profile_key: Vec::new(),
            }),
        )
    }

    pub fn create_remove_invitation_change(
        &self,
        invitations: &[UuidCiphertext],
    ) -> GroupChangeActions {
        let mut actions = GroupChangeActions::new();
        for ciphertext in invitations {
            actions.push(Action::DeletePendingMember {
                deleted_user_id: ciphertext.0.clone(),
            });
        }
        actions
    }

    // -----------------------------------------------------------------------
    // Bans
    // -----------------------------------------------------------------------

    /// Ban `ids`, lifting the oldest existing bans when the banned list would
    /// exceed the group size limit.
    pub fn create_ban_service_ids_change(
        &self,
        ids: &[ServiceId],
        reject_join_request: bool,
        banned: &BTreeMap<ServiceId, DecryptedBannedMember>,
    ) -> Result<GroupChangeActions> {
        let mut actions = if reject_join_request {
            let acis: Vec<Aci> = ids.iter().filter_map(ServiceId::aci).collect();
            self.create_refuse_group_join_request(&acis, false, banned)?
        } else {
            GroupChangeActions::new()
        };

        if let BanListStatus::MustEvict { evict } =
            check_ban_list(banned.len(), ids.len(), self.config.max_group_size)
        {
            let mut oldest: Vec<&DecryptedBannedMember> = banned.values().collect();
            oldest.sort_by_key(|b| b.timestamp);
            log::debug!("Lifting {} oldest bans to make room", evict);
            for ban in oldest.into_iter().take(evict) {
                actions.push(self.unban_action(ban.service_id)?);
            }
        }

        for id in ids {
            actions.push(self.ban_action(*id)?);
        }
        Ok(actions)
    }

    pub fn create_unban_service_ids_change(&self, ids: &[ServiceId]) -> Result<GroupChangeActions> {
        let mut actions = GroupChangeActions::new();
        for id in ids {
            actions.push(self.unban_action(*id)?);
        }
        Ok(actions)
    }

    // -----------------------------------------------------------------------
    // Peeking at outgoing changes
    // -----------------------------------------------------------------------

    /// Identities added by the AddMember actions of an encrypted change.
    pub fn decrypt_add_members(&self, change: &GroupChangeActions) -> Result<Vec<ServiceId>> {
        let mut ids = Vec::new();
        for action in &change.actions {
            if let Action::AddMember { added, .. } = action {
                if added.presentation.is_empty() {
                    ids.push(ServiceId::Aci(self.decrypt_aci(&added.user_id)?));
                } else {
                    ids.push(ServiceId::Aci(self.open_presentation(&added.presentation)?.0));
                }
            }
        }
        Ok(ids)
    }
}
