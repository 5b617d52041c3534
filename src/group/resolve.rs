//! Conflict resolution for changes built against a stale revision.
//!
//! The resolver decides, per action, whether it is still meaningful against
//! the latest state: keep it, drop it as a no-op, or retarget it to the
//! promotion that now expresses the same intent. Decisions are made from the
//! decrypted change and carried out through [`ChangeSetModifier`], which both
//! the decrypted change and the encrypted action set implement. The two lists
//! are parallel, so one plan serves either.

use thiserror::Error;

use crate::group::change::{DecryptedAction, DecryptedGroupChange};
use crate::group::model::{DecryptedGroup, DecryptedMember, Role};
use crate::ids::{PendingIdentity, ServiceId};
use crate::wire::{Action, GroupChangeActions};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The encrypted actions are not the ones the decrypted change describes.
    #[error("Encrypted and decrypted changes are not aligned")]
    MisalignedChange,
}

// ---------------------------------------------------------------------------
// Mutation contract
// ---------------------------------------------------------------------------

/// Edits a change in place by action index.
pub trait ChangeSetModifier {
    fn remove_action(&mut self, index: usize);

    /// Turn an add-member action into a promote-pending action for the same
    /// identity.
    fn move_add_to_promote(&mut self, index: usize);

    /// Turn an add-requesting action into a promote-pending action for the
    /// same identity.
    fn move_add_requesting_to_promote(&mut self, index: usize);
}

impl ChangeSetModifier for DecryptedGroupChange {
    fn remove_action(&mut self, index: usize) {
        self.actions.remove(index);
    }

    fn move_add_to_promote(&mut self, index: usize) {
        if let DecryptedAction::AddMember(member) = &self.actions[index] {
            self.actions[index] = DecryptedAction::PromotePendingMember(member.clone());
        }
    }

    fn move_add_requesting_to_promote(&mut self, index: usize) {
        if let DecryptedAction::AddRequestingMember(requesting) = &self.actions[index] {
            let member = DecryptedMember::new(
                requesting.aci,
                Role::Default,
                requesting.profile_key.clone(),
                self.revision,
            );
            self.actions[index] = DecryptedAction::PromotePendingMember(member);
        }
    }
}

impl ChangeSetModifier for GroupChangeActions {
    fn remove_action(&mut self, index: usize) {
        self.actions.remove(index);
    }

    fn move_add_to_promote(&mut self, index: usize) {
        if let Action::AddMember { added, .. } = &self.actions[index] {
            self.actions[index] = Action::PromotePendingMember {
                presentation: added.presentation.clone(),
                user_id: added.user_id.clone(),
                profile_key: added.profile_key.clone(),
            };
        }
    }

    fn move_add_requesting_to_promote(&mut self, index: usize) {
        if let Action::AddRequestingMember { added } = &self.actions[index] {
            self.actions[index] = Action::PromotePendingMember {
                presentation: added.presentation.clone(),
                user_id: added.user_id.clone(),
                profile_key: added.profile_key.clone(),
            };
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resolution {
    Keep,
    Remove,
    PromoteAdd,
    PromoteRequesting,
}

fn resolve_action(latest: &DecryptedGroup, action: &DecryptedAction) -> Resolution {
    use DecryptedAction as A;
    use Resolution::*;

    let prune_if = |redundant: bool| if redundant { Remove } else { Keep };

    match action {
        A::AddMember(member) => {
            if latest.is_member(&member.aci) {
                Remove
            } else if latest.is_pending(&ServiceId::Aci(member.aci)) {
                PromoteAdd
            } else {
                Keep
            }
        }
        A::DeleteMember(aci) => prune_if(!latest.is_member(aci)),
        A::ModifyMemberRole { aci, role } => {
            prune_if(latest.member(aci).map_or(true, |m| m.role == *role))
        }
        A::ModifyMemberProfileKey { aci, profile_key } => prune_if(
            latest
                .member(aci)
                .map_or(true, |m| m.profile_key == *profile_key),
        ),
        A::AddPendingMember(pending) => {
            let already_member = matches!(
                pending.identity,
                PendingIdentity::Known(ServiceId::Aci(aci)) if latest.is_member(&aci)
            );
            let already_pending = latest.pending_members.contains_key(&pending.uuid_ciphertext)
                || pending
                    .identity
                    .known()
                    .map_or(false, |id| latest.is_pending(&id));
            prune_if(already_member || already_pending)
        }
        A::DeletePendingMember {
            uuid_ciphertext, ..
        } => prune_if(!latest.pending_members.contains_key(uuid_ciphertext)),
        A::PromotePendingMember(member) => {
            prune_if(!latest.is_pending(&ServiceId::Aci(member.aci)))
        }
        A::ModifyTitle(title) => prune_if(latest.title == *title),
        A::ModifyAvatar(avatar) => prune_if(latest.avatar == *avatar),
        A::ModifyDisappearingMessagesTimer(seconds) => {
            prune_if(latest.disappearing_messages_timer == *seconds)
        }
        A::ModifyAttributesAccess(access) => {
            prune_if(latest.access_control.attributes == *access)
        }
        A::ModifyMembersAccess(access) => prune_if(latest.access_control.members == *access),
        A::ModifyAddFromInviteLinkAccess(access) => {
            prune_if(latest.access_control.add_from_invite_link == *access)
        }
        A::AddRequestingMember(requesting) => {
            if latest.is_member(&requesting.aci) {
                Remove
            } else if latest.is_pending(&ServiceId::Aci(requesting.aci)) {
                PromoteRequesting
            } else {
                prune_if(latest.requesting_members.contains_key(&requesting.aci))
            }
        }
        A::DeleteRequestingMember(aci) => prune_if(!latest.requesting_members.contains_key(aci)),
        A::PromoteRequestingMember { aci, .. } => {
            prune_if(!latest.requesting_members.contains_key(aci))
        }
        // A password rotation always wins.
        A::ModifyInviteLinkPassword(_) => Keep,
        A::ModifyDescription(description) => prune_if(latest.description == *description),
        A::ModifyAnnouncementsOnly(state) => prune_if(latest.is_announcement_group == *state),
        A::AddBannedMember(banned) => prune_if(latest.is_banned(&banned.service_id)),
        A::DeleteBannedMember(id) => prune_if(!latest.is_banned(id)),
        A::PromotePendingPniAciMember(member) => prune_if(latest.is_member(&member.aci)),
    }
}

/// Apply the resolution of `decrypted` against `latest` through `modifier`.
/// `modifier` must hold the same action list as `decrypted`, index for index.
pub fn resolve_with<M: ChangeSetModifier>(
    latest: &DecryptedGroup,
    decrypted: &DecryptedGroupChange,
    modifier: &mut M,
) {
    let plan: Vec<Resolution> = decrypted
        .actions
        .iter()
        .map(|action| resolve_action(latest, action))
        .collect();

    // Retarget in place first; removals shift indices.
    for (index, resolution) in plan.iter().enumerate() {
        match resolution {
            Resolution::PromoteAdd => modifier.move_add_to_promote(index),
            Resolution::PromoteRequesting => modifier.move_add_requesting_to_promote(index),
            Resolution::Keep | Resolution::Remove => {}
        }
    }

    let mut removed = 0;
    for (index, resolution) in plan.iter().enumerate().rev() {
        if *resolution == Resolution::Remove {
            modifier.remove_action(index);
            removed += 1;
        }
    }
    if removed > 0 {
        log::debug!(
            "Resolved stale change to revision {}: pruned {} of {} actions",
            decrypted.revision,
            removed,
            plan.len()
        );
    }
}

/// Resolve a stale decrypted change against the latest state.
pub fn resolve(latest: &DecryptedGroup, stale: &DecryptedGroupChange) -> DecryptedGroupChange {
    let mut resolved = stale.clone();
    resolve_with(latest, stale, &mut resolved);
    resolved
}

/// Resolve a stale encrypted action set, using its decryption to decide.
pub fn resolve_encrypted(
    latest: &DecryptedGroup,
    decrypted: &DecryptedGroupChange,
    encrypted: &GroupChangeActions,
) -> Result<GroupChangeActions, ResolveError> {
    let aligned = decrypted.actions.len() == encrypted.actions.len()
        && decrypted
            .actions
            .iter()
            .zip(&encrypted.actions)
            .all(|(d, e)| d.kind() == e.kind());
    if !aligned {
        return Err(ResolveError::MisalignedChange);
    }

    let mut resolved = encrypted.clone();
    resolve_with(latest, decrypted, &mut resolved);
    Ok(resolved)
}
