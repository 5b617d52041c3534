//! Group directory client.
//!
//! Thin orchestration over a server transport: every request is authorized
//! through the [`GroupsV2Authorization`] cache, every response is decrypted
//! through the group's operations, and history is folded into local state by
//! [`GroupStatePatcher`].

use thiserror::Error;

use crate::auth::{
    AuthCredentialSource, AuthError, DayClock, GroupAuthorization, GroupsV2Authorization,
    SystemClock,
};
use crate::crypto::GroupSecretParams;
use crate::error::GroupsError;
use crate::group::apply::{apply_without_revision_check, ApplyError};
use crate::group::change::DecryptedGroupChange;
use crate::group::model::DecryptedGroup;
use crate::group::reconstruct::reconstruct;
use crate::group::resolve::{resolve_encrypted, ResolveError};
use crate::operations::{DecryptedGroupJoinInfo, GroupJoinInfo, GroupsV2Operations};
use crate::wire::{Group, GroupChange, GroupChangeActions, WireError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error(transparent)]
    Groups(#[from] GroupsError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Wire(#[from] WireError),

    /// The server rejected a patch because the group moved on.
    #[error("Conflicting group revision")]
    Conflict,

    #[error("Group not found")]
    NotFound,

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

// ---------------------------------------------------------------------------
// Transport contract (app implements)
// ---------------------------------------------------------------------------

/// One step of server history. Either half may be absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupHistoryEntry {
    pub group: Option<Group>,
    pub change: Option<GroupChange>,
}

pub trait GroupsV2Transport {
    fn fetch_group(&self, auth: &GroupAuthorization) -> Result<Group>;

    /// History entries starting at `from_revision`, oldest first.
    fn fetch_history(
        &self,
        auth: &GroupAuthorization,
        from_revision: u32,
    ) -> Result<Vec<GroupHistoryEntry>>;

    /// Submit `actions`. Fails with [`DirectoryError::Conflict`] when
    /// `actions.revision` is not the next revision.
    fn patch_group(
        &self,
        auth: &GroupAuthorization,
        actions: &GroupChangeActions,
    ) -> Result<GroupChange>;

    fn fetch_group_join_info(
        &self,
        auth: &GroupAuthorization,
        invite_link_password: &[u8],
    ) -> Result<GroupJoinInfo>;
}

// ---------------------------------------------------------------------------
// History processing
// ---------------------------------------------------------------------------

/// A decrypted history step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecryptedGroupHistoryEntry {
    pub group: Option<DecryptedGroup>,
    /// `None` when absent on the server or from an unknown epoch.
    pub change: Option<DecryptedGroupChange>,
}

impl DecryptedGroupHistoryEntry {
    fn revision(&self) -> Option<u32> {
        self.group
            .as_ref()
            .map(|g| g.revision)
            .or_else(|| self.change.as_ref().map(|c| c.revision))
    }
}

/// One transition taken while patching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedGroupChange {
    pub state: DecryptedGroup,
    pub change: DecryptedGroupChange,
    /// The change was rebuilt from snapshots rather than taken from the server.
    pub reconstructed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchedGroupState {
    pub state: Option<DecryptedGroup>,
    pub applied: Vec<AppliedGroupChange>,
}

/// Walks server history forward from a local state.
pub struct GroupStatePatcher;

impl GroupStatePatcher {
    /// Fold `entries` into `local`. Entries at or below the current revision
    /// are skipped. A step uses the server change when it applies; otherwise
    /// it falls back to the snapshot and a reconstructed change.
    pub fn apply_history(
        local: Option<&DecryptedGroup>,
        entries: &[DecryptedGroupHistoryEntry],
    ) -> Result<PatchedGroupState> {
        let mut current = local.cloned();
        let mut applied = Vec::new();

        for entry in entries {
            if let (Some(group), Some(change)) = (&entry.group, &entry.change) {
                if group.revision != change.revision {
                    return Err(GroupsError::InvalidGroupState(format!(
                        "change revision {} paired with snapshot revision {}",
                        change.revision, group.revision
                    ))
                    .into());
                }
            }
            let Some(revision) = entry.revision() else {
                continue;
            };
            if current.as_ref().map_or(false, |c| revision <= c.revision) {
                continue;
            }

            let step = match (&current, &entry.change, &entry.group) {
                (Some(state), Some(change), snapshot) => {
                    match apply_without_revision_check(state, change) {
                        Ok(next) => AppliedGroupChange {
                            state: next,
                            change: change.clone(),
                            reconstructed: false,
                        },
                        Err(e) => match snapshot {
                            Some(snapshot) => {
                                log::warn!(
                                    "Change to revision {} did not apply ({}), using snapshot",
                                    revision,
                                    e
                                );
                                AppliedGroupChange {
                                    state: snapshot.clone(),
                                    change: reconstruct(state, snapshot),
                                    reconstructed: true,
                                }
                            }
                            None => return Err(e.into()),
                        },
                    }
                }
                (Some(state), None, Some(snapshot)) => AppliedGroupChange {
                    state: snapshot.clone(),
                    change: reconstruct(state, snapshot),
                    reconstructed: true,
                },
                (None, change, Some(snapshot)) => AppliedGroupChange {
                    state: snapshot.clone(),
                    change: change
                        .clone()
                        .unwrap_or_else(|| reconstruct(&DecryptedGroup::default(), snapshot)),
                    reconstructed: change.is_none(),
                },
                (None, Some(_), None) => {
                    log::warn!("No base state for change to revision {}, skipping", revision);
                    continue;
                }
                (_, None, None) => continue,
            };

            current = Some(step.state.clone());
            applied.push(step);
        }

        Ok(PatchedGroupState {
            state: current,
            applied,
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

fn next_revision(revision: u32) -> Result<u32> {
    revision.checked_add(1).ok_or_else(|| {
        GroupsError::InvalidGroupState(format!("revision {} has no successor", revision)).into()
    })
}

/// Result of a successful patch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupPatchResult {
    /// The notarized change as returned by the server.
    pub signed_change: GroupChange,
    pub change: DecryptedGroupChange,
}

pub struct GroupsV2Client<'a, T, S, K = SystemClock>
where
    T: GroupsV2Transport,
    S: AuthCredentialSource,
    K: DayClock,
{
    transport: T,
    auth: &'a GroupsV2Authorization<S, K>,
    ops: GroupsV2Operations,
}

impl<'a, T, S, K> GroupsV2Client<'a, T, S, K>
where
    T: GroupsV2Transport,
    S: AuthCredentialSource,
    K: DayClock,
{
    pub fn new(transport: T, auth: &'a GroupsV2Authorization<S, K>, ops: GroupsV2Operations) -> Self {
        Self {
            transport,
            auth,
            ops,
        }
    }

    pub fn operations(&self) -> &GroupsV2Operations {
        &self.ops
    }

    pub fn fetch_group(&self, params: &GroupSecretParams) -> Result<DecryptedGroup> {
        let auth = self.auth.authorization_for_today(params)?;
        let group = self.transport.fetch_group(&auth)?;
        Ok(self.ops.for_group(params).decrypt_group(&group)?)
    }

    pub fn fetch_history(
        &self,
        params: &GroupSecretParams,
        from_revision: u32,
    ) -> Result<Vec<DecryptedGroupHistoryEntry>> {
        let auth = self.auth.authorization_for_today(params)?;
        let entries = self.transport.fetch_history(&auth, from_revision)?;
        let ops = self.ops.for_group(params);
        let verify = self.ops.config().verify_change_signatures;

        let mut decrypted = Vec::with_capacity(entries.len());
        for entry in &entries {
            let group = entry
                .group
                .as_ref()
                .map(|g| ops.decrypt_group(g))
                .transpose()?;
            let change = match &entry.change {
                Some(change) => ops.decrypt_change(change, verify)?,
                None => None,
            };
            if let (Some(g), Some(c)) = (&group, &change) {
                if g.revision != c.revision {
                    return Err(GroupsError::InvalidGroupState(format!(
                        "history change revision {} paired with snapshot revision {}",
                        c.revision, g.revision
                    ))
                    .into());
                }
            }
            decrypted.push(DecryptedGroupHistoryEntry { group, change });
        }
        Ok(decrypted)
    }

    /// Bring `local` up to date with the server.
    pub fn update_group(
        &self,
        params: &GroupSecretParams,
        local: Option<&DecryptedGroup>,
    ) -> Result<PatchedGroupState> {
        let entries = match local {
            Some(state) => self.fetch_history(params, next_revision(state.revision)?)?,
            None => vec![DecryptedGroupHistoryEntry {
                group: Some(self.fetch_group(params)?),
                change: None,
            }],
        };
        GroupStatePatcher::apply_history(local, &entries)
    }

    /// Submit `actions` as-is and decrypt the notarized result.
    pub fn patch_group(
        &self,
        params: &GroupSecretParams,
        actions: &GroupChangeActions,
    ) -> Result<GroupPatchResult> {
        actions.encode()?;
        let auth = self.auth.authorization_for_today(params)?;
        let signed_change = self.transport.patch_group(&auth, actions)?;
        let change = self
            .ops
            .for_group(params)
            .decrypt_change(&signed_change, true)?
            .ok_or_else(|| {
                GroupsError::InvalidGroupState("server returned change from unknown epoch".into())
            })?;
        Ok(GroupPatchResult {
            signed_change,
            change,
        })
    }

    /// Commit `actions` on top of `base`. On a revision conflict, fetch the
    /// latest state, resolve the actions against it and try once more.
    pub fn commit_change(
        &self,
        params: &GroupSecretParams,
        base: &DecryptedGroup,
        mut actions: GroupChangeActions,
    ) -> Result<GroupPatchResult> {
        actions.revision = next_revision(base.revision)?;
        match self.patch_group(params, &actions) {
            Err(DirectoryError::Conflict) => {}
            other => return other,
        }

        let latest = self.fetch_group(params)?;
        let ops = self.ops.for_group(params);
        let decrypted = ops.decrypt_change_actions(&actions)?;
        let mut resolved = resolve_encrypted(&latest, &decrypted, &actions)?;
        if resolved.is_empty() {
            log::info!("Change already reflected at revision {}", latest.revision);
            return Err(DirectoryError::Conflict);
        }
        resolved.revision = next_revision(latest.revision)?;
        log::debug!("Retrying change as revision {}", resolved.revision);
        self.patch_group(params, &resolved)
    }

    pub fn fetch_group_join_info(
        &self,
        params: &GroupSecretParams,
        invite_link_password: &[u8],
    ) -> Result<DecryptedGroupJoinInfo> {
        let auth = self.auth.authorization_for_today(params)?;
        let info = self
            .transport
            .fetch_group_join_info(&auth, invite_link_password)?;
        Ok(self.ops.for_group(params).decrypt_group_join_info(&info))
    }
}
