//! Rebuild a change from two snapshots, for when the server only hands back
//! full group states.

use crate::group::change::{DecryptedAction, DecryptedGroupChange};
use crate::group::model::DecryptedGroup;
use crate::ids::{Aci, PendingIdentity, ServiceId};

/// The change that takes `from` to `to`, at `to.revision` and with no editor.
///
/// Membership moves are classified rather than split: pending → member is a
/// promotion by invitation (by PNI when the member carries the invited PNI),
/// requesting → member is an approval when the approval reproduces the
/// member record, and an add otherwise. Scalars appear only when they differ.
pub fn reconstruct(from: &DecryptedGroup, to: &DecryptedGroup) -> DecryptedGroupChange {
    let mut change = DecryptedGroupChange::new(to.revision);
    let actions = &mut change.actions;

    // Identities whose pending or requesting record became membership.
    let mut promoted_pending: Vec<ServiceId> = Vec::new();
    let mut approved: Vec<Aci> = Vec::new();

    for (aci, member) in &to.members {
        if from.is_member(aci) {
            continue;
        }
        let invited_pni = member
            .pni
            .map(ServiceId::Pni)
            .filter(|pni| from.is_pending(pni));

        if let Some(pni) = invited_pni {
            promoted_pending.push(pni);
            actions.push(DecryptedAction::PromotePendingPniAciMember(member.clone()));
        } else if from.is_pending(&ServiceId::Aci(*aci)) {
            promoted_pending.push(ServiceId::Aci(*aci));
            actions.push(DecryptedAction::PromotePendingMember(member.clone()));
        } else if let Some(requesting) = from.requesting_members.get(aci) {
            approved.push(*aci);
            // An approval only carries the role. Anything else it cannot
            // reproduce travels as a full add, which also clears the request.
            let reproducible = member.pni.is_none()
                && member.joined_at_revision == to.revision
                && member.profile_key == requesting.profile_key;
            if reproducible {
                actions.push(DecryptedAction::PromoteRequestingMember {
                    aci: *aci,
                    role: member.role,
                });
            } else {
                actions.push(DecryptedAction::AddMember(member.clone()));
            }
        } else {
            actions.push(DecryptedAction::AddMember(member.clone()));
        }
    }

    for aci in from.members.keys() {
        if !to.is_member(aci) {
            actions.push(DecryptedAction::DeleteMember(*aci));
        }
    }

    for (aci, before) in &from.members {
        let Some(after) = to.members.get(aci) else {
            continue;
        };
        if before.role != after.role {
            actions.push(DecryptedAction::ModifyMemberRole {
                aci: *aci,
                role: after.role,
            });
        }
        if before.profile_key != after.profile_key {
            actions.push(DecryptedAction::ModifyMemberProfileKey {
                aci: *aci,
                profile_key: after.profile_key.clone(),
            });
        }
    }

    // Pending records are keyed by ciphertext so Unknown identities diff too.
    for (ciphertext, pending) in &to.pending_members {
        if !from.pending_members.contains_key(ciphertext) {
            actions.push(DecryptedAction::AddPendingMember(pending.clone()));
        }
    }
    for (ciphertext, pending) in &from.pending_members {
        if to.pending_members.contains_key(ciphertext) {
            continue;
        }
        let was_promoted = match pending.identity {
            PendingIdentity::Known(id) => promoted_pending.contains(&id),
            PendingIdentity::Unknown => false,
        };
        if !was_promoted {
            actions.push(DecryptedAction::DeletePendingMember {
                identity: pending.identity,
                uuid_ciphertext: ciphertext.clone(),
            });
        }
    }

    if from.title != to.title {
        actions.push(DecryptedAction::ModifyTitle(to.title.clone()));
    }
    if from.avatar != to.avatar {
        actions.push(DecryptedAction::ModifyAvatar(to.avatar.clone()));
    }
    if from.disappearing_messages_timer != to.disappearing_messages_timer {
        actions.push(DecryptedAction::ModifyDisappearingMessagesTimer(
            to.disappearing_messages_timer,
        ));
    }

    let (before, after) = (&from.access_control, &to.access_control);
    if before.attributes != after.attributes {
        actions.push(DecryptedAction::ModifyAttributesAccess(after.attributes));
    }
    if before.members != after.members {
        actions.push(DecryptedAction::ModifyMembersAccess(after.members));
    }
    if before.add_from_invite_link != after.add_from_invite_link {
        actions.push(DecryptedAction::ModifyAddFromInviteLinkAccess(
            after.add_from_invite_link,
        ));
    }

    for (aci, requesting) in &to.requesting_members {
        if !from.requesting_members.contains_key(aci) {
            actions.push(DecryptedAction::AddRequestingMember(requesting.clone()));
        }
    }
    for aci in from.requesting_members.keys() {
        if !to.requesting_members.contains_key(aci) && !approved.contains(aci) {
            actions.push(DecryptedAction::DeleteRequestingMember(*aci));
        }
    }

    if from.invite_link_password != to.invite_link_password {
        actions.push(DecryptedAction::ModifyInviteLinkPassword(
            to.invite_link_password.clone(),
        ));
    }
    if from.description != to.description {
        actions.push(DecryptedAction::ModifyDescription(to.description.clone()));
    }
    if from.is_announcement_group != to.is_announcement_group {
        actions.push(DecryptedAction::ModifyAnnouncementsOnly(
            to.is_announcement_group,
        ));
    }

    for (id, banned) in &to.banned_members {
        if !from.is_banned(id) {
            actions.push(DecryptedAction::AddBannedMember(banned.clone()));
        }
    }
    for id in from.banned_members.keys() {
        if !to.is_banned(id) {
            actions.push(DecryptedAction::DeleteBannedMember(*id));
        }
    }

    change
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::apply::apply;
    use crate::group::model::{DecryptedMember, EnabledState, Role};
    use crate::testkit::{self, aci, banned, group_with_admin, member, pending, profile_key};
    use crate::wire::{AccessRequired, ActionKind};

    fn next(group: &DecryptedGroup) -> DecryptedGroup {
        DecryptedGroup {
            revision: group.revision + 1,
            ..group.clone()
        }
    }

    fn assert_round_trip(from: &DecryptedGroup, to: &DecryptedGroup) -> DecryptedGroupChange {
        let change = reconstruct(from, to);
        assert_eq!(&apply(from, &change).unwrap(), to);
        change
    }

    #[test]
    fn test_identical_states_reconstruct_empty() {
        let group = group_with_admin(aci(), 3);
        let change = reconstruct(&group, &group);
        assert!(change.is_empty());
        assert_eq!(change.revision, 3);
        assert_eq!(change.editor, None);
    }

    #[test]
    fn test_add_and_remove_members() {
        let (a, b, c) = (aci(), aci(), aci());
        let mut from = group_with_admin(a, 5);
        from.members.insert(c, member(c, Role::Default));
        let mut to = next(&from);
        to.members.insert(b, member(b, Role::Default));
        to.members.remove(&c);

        let change = assert_round_trip(&from, &to);
        assert_eq!(change.revision, 6);
        assert_eq!(change.count(ActionKind::AddMember), 1);
        assert_eq!(change.count(ActionKind::DeleteMember), 1);
    }

    #[test]
    fn test_invited_member_is_promoted() {
        let (a, b) = (aci(), aci());
        let mut from = group_with_admin(a, 1);
        let p = pending(ServiceId::Aci(b), a);
        from.pending_members.insert(p.uuid_ciphertext.clone(), p);
        let mut to = next(&from);
        to.pending_members.clear();
        to.members.insert(b, member(b, Role::Default));

        let change = assert_round_trip(&from, &to);
        assert_eq!(change.count(ActionKind::PromotePendingMember), 1);
        assert_eq!(change.count(ActionKind::AddMember), 0);
        assert_eq!(change.count(ActionKind::DeletePendingMember), 0);
    }

    #[test]
    fn test_pni_invite_is_promoted_by_pni() {
        let (a, b, pni) = (aci(), aci(), testkit::pni());
        let mut from = group_with_admin(a, 1);
        let p = pending(ServiceId::Pni(pni), a);
        from.pending_members.insert(p.uuid_ciphertext.clone(), p);
        let mut to = next(&from);
        to.pending_members.clear();
        let mut joined = member(b, Role::Default);
        joined.pni = Some(pni);
        to.members.insert(b, joined);

        let change = assert_round_trip(&from, &to);
        assert_eq!(change.count(ActionKind::PromotePendingPniAciMember), 1);
        assert_eq!(change.count(ActionKind::DeletePendingMember), 0);
    }

    #[test]
    fn test_approved_request_is_promoted() {
        let (a, b) = (aci(), aci());
        let mut from = group_with_admin(a, 1);
        from.requesting_members
            .insert(b, testkit::requesting(b, profile_key(4)));
        let mut to = next(&from);
        to.requesting_members.clear();
        to.members.insert(
            b,
            DecryptedMember::new(b, Role::Default, profile_key(4), to.revision),
        );

        let change = assert_round_trip(&from, &to);
        assert_eq!(
            change.actions,
            vec![DecryptedAction::PromoteRequestingMember {
                aci: b,
                role: Role::Default
            }]
        );
    }

    #[test]
    fn test_approval_that_cannot_reproduce_member_becomes_add() {
        let (a, b, c) = (aci(), aci(), aci());
        let mut from = group_with_admin(a, 1);
        from.requesting_members
            .insert(b, testkit::requesting(b, profile_key(4)));
        from.requesting_members
            .insert(c, testkit::requesting(c, profile_key(5)));
        let mut to = next(&from);
        to.requesting_members.clear();

        let mut with_pni = DecryptedMember::new(b, Role::Default, profile_key(4), 0);
        with_pni.pni = Some(testkit::pni());
        to.members.insert(b, with_pni);
        to.members.insert(
            c,
            DecryptedMember::new(c, Role::Administrator, profile_key(9), to.revision),
        );

        let change = assert_round_trip(&from, &to);
        assert_eq!(change.count(ActionKind::AddMember), 2);
        assert_eq!(change.count(ActionKind::PromoteRequestingMember), 0);
        assert_eq!(change.count(ActionKind::DeleteRequestingMember), 0);
    }

    #[test]
    fn test_role_and_profile_key_changes_stay_separate() {
        let (a, b) = (aci(), aci());
        let mut from = group_with_admin(a, 1);
        from.members.insert(b, member(b, Role::Default));
        let mut to = next(&from);
        let updated = to.members.get_mut(&b).unwrap();
        updated.role = Role::Administrator;
        updated.profile_key = profile_key(7);

        let change = assert_round_trip(&from, &to);
        assert_eq!(change.count(ActionKind::ModifyMemberRole), 1);
        assert_eq!(change.count(ActionKind::ModifyMemberProfileKey), 1);
        assert_eq!(change.count(ActionKind::DeleteMember), 0);
    }

    #[test]
    fn test_unknown_pending_is_diffed_by_ciphertext() {
        let a = aci();
        let mut from = group_with_admin(a, 1);
        let mut gone = pending(ServiceId::Aci(aci()), a);
        gone.identity = crate::ids::PendingIdentity::Unknown;
        from.pending_members.insert(gone.uuid_ciphertext.clone(), gone);
        let mut to = next(&from);
        to.pending_members.clear();
        let added = pending(ServiceId::Aci(aci()), a);
        to.pending_members.insert(added.uuid_ciphertext.clone(), added);

        let change = assert_round_trip(&from, &to);
        assert_eq!(change.count(ActionKind::AddPendingMember), 1);
        assert_eq!(change.count(ActionKind::DeletePendingMember), 1);
    }

    #[test]
    fn test_scalars_only_when_changed() {
        let from = group_with_admin(aci(), 1);
        let mut to = next(&from);
        to.title = "Renamed".into();
        to.access_control.add_from_invite_link = AccessRequired::Administrator;
        to.invite_link_password = vec![5; 16];
        to.is_announcement_group = EnabledState::Enabled;

        let change = assert_round_trip(&from, &to);
        assert_eq!(change.actions.len(), 4);
        assert_eq!(change.count(ActionKind::ModifyAvatar), 0);
        assert_eq!(change.count(ActionKind::ModifyAttributesAccess), 0);
    }

    #[test]
    fn test_requests_and_bans() {
        let (a, b, c) = (aci(), aci(), aci());
        let mut from = group_with_admin(a, 1);
        from.requesting_members
            .insert(c, testkit::requesting(c, profile_key(2)));
        let old_ban = ServiceId::Aci(aci());
        from.banned_members.insert(old_ban, banned(old_ban, 1));

        let mut to = next(&from);
        to.requesting_members.clear();
        to.requesting_members
            .insert(b, testkit::requesting(b, profile_key(3)));
        to.banned_members.clear();
        to.banned_members
            .insert(ServiceId::Aci(c), banned(ServiceId::Aci(c), 2));

        let change = assert_round_trip(&from, &to);
        assert_eq!(change.count(ActionKind::AddRequestingMember), 1);
        assert_eq!(change.count(ActionKind::DeleteRequestingMember), 1);
        assert_eq!(change.count(ActionKind::AddBannedMember), 1);
        assert_eq!(change.count(ActionKind::DeleteBannedMember), 1);
    }
}
