//! Applying a decrypted change to a decrypted group.
//!
//! Actions are applied by category in a fixed order rather than list order:
//! later categories rely on earlier ones having normalized membership
//! (a promoted or added member is never also pending or requesting).
//! A fatal condition rejects the whole change; the input state is never
//! partially modified because work happens on a clone.

use thiserror::Error;

use crate::group::change::{DecryptedAction, DecryptedGroupChange};
use crate::group::model::{DecryptedGroup, DecryptedMember, EnabledState};
use crate::ids::{PendingIdentity, ServiceId};
use crate::wire::AccessRequired;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("Revision mismatch: expected {expected}, got {actual}")]
    RevisionMismatch { expected: u32, actual: u32 },

    /// The change refers to membership that does not exist in the state.
    /// Re-fetch and resolve rather than retrying the same apply.
    #[error("Not able to apply group change: {0}")]
    NotAbleToApplyGroupChange(String),
}

pub type Result<T> = std::result::Result<T, ApplyError>;

fn not_able(reason: impl Into<String>) -> ApplyError {
    ApplyError::NotAbleToApplyGroupChange(reason.into())
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Apply `change` to `group`. The change must be for exactly the next revision.
pub fn apply(group: &DecryptedGroup, change: &DecryptedGroupChange) -> Result<DecryptedGroup> {
    let expected = group.revision.wrapping_add(1);
    if change.revision != expected {
        return Err(ApplyError::RevisionMismatch {
            expected,
            actual: change.revision,
        });
    }
    apply_without_revision_check(group, change)
}

/// Apply `change` regardless of the revision gap, as when replaying history.
/// The resulting revision is the change's.
pub fn apply_without_revision_check(
    group: &DecryptedGroup,
    change: &DecryptedGroupChange,
) -> Result<DecryptedGroup> {
    let mut next = group.clone();
    let actions = &change.actions;

    apply_add_members(&mut next, actions);
    apply_delete_members(&mut next, actions);
    apply_member_modifications(&mut next, actions)?;
    apply_add_pending(&mut next, actions)?;
    apply_delete_pending(&mut next, actions);
    apply_promote_pending(&mut next, actions)?;
    apply_attributes(&mut next, actions);
    apply_access_control(&mut next, actions);
    apply_requesting(&mut next, actions, change.revision)?;
    apply_invite_link_password(&mut next, actions);
    apply_banned(&mut next, actions);
    apply_promote_pni_pending(&mut next, actions)?;

    next.revision = change.revision;
    Ok(next)
}

// ---------------------------------------------------------------------------
// Members
// ---------------------------------------------------------------------------

fn apply_add_members(group: &mut DecryptedGroup, actions: &[DecryptedAction]) {
    let mut added = false;
    for action in actions {
        if let DecryptedAction::AddMember(member) = action {
            group.members.insert(member.aci, member.clone());
            added = true;
        }
    }
    if added {
        group.remove_pending_and_requesting_now_in_group();
    }
}

fn apply_delete_members(group: &mut DecryptedGroup, actions: &[DecryptedAction]) {
    for action in actions {
        if let DecryptedAction::DeleteMember(aci) = action {
            if group.members.remove(aci).is_none() {
                log::warn!("Deleted member {:?} was not in the group", aci);
            }
        }
    }
}

fn apply_member_modifications(
    group: &mut DecryptedGroup,
    actions: &[DecryptedAction],
) -> Result<()> {
    for action in actions {
        match action {
            DecryptedAction::ModifyMemberRole { aci, role } => {
                if !role.is_assignable() {
                    return Err(not_able(format!("role {:?} is not assignable", role)));
                }
                let member = group
                    .members
                    .get_mut(aci)
                    .ok_or_else(|| not_able(format!("role change for non-member {:?}", aci)))?;
                member.role = *role;
            }
            DecryptedAction::ModifyMemberProfileKey { aci, profile_key } => {
                let member = group.members.get_mut(aci).ok_or_else(|| {
                    not_able(format!("profile key change for non-member {:?}", aci))
                })?;
                member.profile_key = profile_key.clone();
            }
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pending members
// ---------------------------------------------------------------------------

fn apply_add_pending(group: &mut DecryptedGroup, actions: &[DecryptedAction]) -> Result<()> {
    for action in actions {
        if let DecryptedAction::AddPendingMember(pending) = action {
            if let PendingIdentity::Known(ServiceId::Aci(aci)) = pending.identity {
                if group.is_member(&aci) {
                    return Err(not_able(format!("invited {:?} is already a member", aci)));
                }
            }
            if group.pending_members.contains_key(&pending.uuid_ciphertext) {
                log::warn!("{:?} is already pending", pending.uuid_ciphertext);
                continue;
            }
            group
                .pending_members
                .insert(pending.uuid_ciphertext.clone(), pending.clone());
        }
    }
    Ok(())
}

fn apply_delete_pending(group: &mut DecryptedGroup, actions: &[DecryptedAction]) {
    for action in actions {
        if let DecryptedAction::DeletePendingMember {
            uuid_ciphertext, ..
        } = action
        {
            if group.pending_members.remove(uuid_ciphertext).is_none() {
                log::warn!("Deleted pending member {:?} was not pending", uuid_ciphertext);
            }
        }
    }
}

fn apply_promote_pending(group: &mut DecryptedGroup, actions: &[DecryptedAction]) -> Result<()> {
    let mut promoted = false;
    for action in actions {
        if let DecryptedAction::PromotePendingMember(member) = action {
            let id = ServiceId::Aci(member.aci);
            let key = group
                .pending_by_identity(&id)
                .map(|p| p.uuid_ciphertext.clone())
                .ok_or_else(|| not_able(format!("promoted {:?} was not pending", member.aci)))?;
            group.pending_members.remove(&key);
            group.members.insert(member.aci, member.clone());
            promoted = true;
        }
    }
    if promoted {
        group.remove_pending_and_requesting_now_in_group();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scalar attributes
// ---------------------------------------------------------------------------

fn apply_attributes(group: &mut DecryptedGroup, actions: &[DecryptedAction]) {
    for action in actions {
        match action {
            DecryptedAction::ModifyTitle(title) => group.title = title.clone(),
            DecryptedAction::ModifyAvatar(avatar) => group.avatar = avatar.clone(),
            DecryptedAction::ModifyDisappearingMessagesTimer(seconds) => {
                group.disappearing_messages_timer = *seconds
            }
            DecryptedAction::ModifyDescription(description) => {
                group.description = description.clone()
            }
            DecryptedAction::ModifyAnnouncementsOnly(state) if *state != EnabledState::Unknown => {
                group.is_announcement_group = *state
            }
            _ => {}
        }
    }
}

fn apply_access_control(group: &mut DecryptedGroup, actions: &[DecryptedAction]) {
    let known = |access: &AccessRequired| *access != AccessRequired::Unknown;
    for action in actions {
        match action {
            DecryptedAction::ModifyAttributesAccess(access) if known(access) => {
                group.access_control.attributes = *access
            }
            DecryptedAction::ModifyMembersAccess(access) if known(access) => {
                group.access_control.members = *access
            }
            DecryptedAction::ModifyAddFromInviteLinkAccess(access) if known(access) => {
                group.access_control.add_from_invite_link = *access
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Requesting members
// ---------------------------------------------------------------------------

fn apply_requesting(
    group: &mut DecryptedGroup,
    actions: &[DecryptedAction],
    revision: u32,
) -> Result<()> {
    for action in actions {
        if let DecryptedAction::AddRequestingMember(requesting) = action {
            if group.is_member(&requesting.aci) {
                return Err(not_able(format!(
                    "requester {:?} is already a member",
                    requesting.aci
                )));
            }
            group
                .requesting_members
                .insert(requesting.aci, requesting.clone());
        }
    }

    for action in actions {
        if let DecryptedAction::DeleteRequestingMember(aci) = action {
            if group.requesting_members.remove(aci).is_none() {
                log::warn!("Deleted requesting member {:?} was not requesting", aci);
            }
        }
    }

    let mut promoted = false;
    for action in actions {
        if let DecryptedAction::PromoteRequestingMember { aci, role } = action {
            if !role.is_assignable() {
                return Err(not_able(format!("role {:?} is not assignable", role)));
            }
            let requesting = group
                .requesting_members
                .remove(aci)
                .ok_or_else(|| not_able(format!("approved {:?} was not requesting", aci)))?;
            group.members.insert(
                *aci,
                DecryptedMember::new(*aci, *role, requesting.profile_key, revision),
            );
            promoted = true;
        }
    }
    if promoted {
        group.remove_pending_and_requesting_now_in_group();
    }
    Ok(())
}

fn apply_invite_link_password(group: &mut DecryptedGroup, actions: &[DecryptedAction]) {
    for action in actions {
        if let DecryptedAction::ModifyInviteLinkPassword(password) = action {
            if !password.is_empty() {
                group.invite_link_password = password.clone();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Banned members
// ---------------------------------------------------------------------------

fn apply_banned(group: &mut DecryptedGroup, actions: &[DecryptedAction]) {
    for action in actions {
        match action {
            DecryptedAction::AddBannedMember(banned) => {
                if group.is_banned(&banned.service_id) {
                    log::warn!("{:?} is already banned", banned.service_id);
                } else {
                    group
                        .banned_members
                        .insert(banned.service_id, banned.clone());
                }
            }
            DecryptedAction::DeleteBannedMember(id) => {
                if group.banned_members.remove(id).is_none() {
                    log::warn!("Unbanned {:?} was not banned", id);
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// PNI promotion
// ---------------------------------------------------------------------------

/// Promote an invitation addressed to a PNI. The pending record is found by
/// the member's PNI, unlike [`apply_promote_pending`] which looks it up by ACI.
fn apply_promote_pni_pending(
    group: &mut DecryptedGroup,
    actions: &[DecryptedAction],
) -> Result<()> {
    let mut promoted = false;
    for action in actions {
        if let DecryptedAction::PromotePendingPniAciMember(member) = action {
            let pni = member
                .pni
                .ok_or_else(|| not_able(format!("PNI promotion of {:?} without PNI", member.aci)))?;
            let key = group
                .pending_by_identity(&ServiceId::Pni(pni))
                .map(|p| p.uuid_ciphertext.clone())
                .ok_or_else(|| not_able(format!("promoted {:?} was not pending", pni)))?;
            group.pending_members.remove(&key);
            group.members.insert(member.aci, member.clone());
            promoted = true;
        }
    }
    if promoted {
        group.remove_pending_and_requesting_now_in_group();
    }
    Ok(())
}
