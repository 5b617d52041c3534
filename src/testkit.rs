//! Shared fixtures for unit tests.

use uuid::Uuid;

use crate::config::GroupsConfig;
use crate::crypto::{
    ClientGroupCipher, GroupSecretParams, ProfileKeyCredential, ServerSecretParams,
};
use crate::group::change::DecryptedGroupChange;
use crate::group::model::{
    DecryptedBannedMember, DecryptedGroup, DecryptedMember, DecryptedPendingMember,
    DecryptedRequestingMember, Role,
};
use crate::ids::{Aci, PendingIdentity, Pni, ProfileKey, ServiceId, UuidCiphertext};
use crate::operations::{GroupOperations, GroupsV2Operations};
use crate::wire::{GroupChange, GroupChangeActions};

pub fn aci() -> Aci {
    Aci(Uuid::new_v4())
}

pub fn pni() -> Pni {
    Pni(Uuid::new_v4())
}

pub fn profile_key(byte: u8) -> ProfileKey {
    ProfileKey::from_bytes([byte; 32])
}

pub fn member(aci: Aci, role: Role) -> DecryptedMember {
    DecryptedMember::new(aci, role, profile_key(1), 0)
}

pub fn pending(id: ServiceId, added_by: Aci) -> DecryptedPendingMember {
    let mut ciphertext = id.to_bytes();
    ciphertext.push(0xEE);
    DecryptedPendingMember {
        identity: PendingIdentity::Known(id),
        uuid_ciphertext: UuidCiphertext(ciphertext),
        role: Role::Default,
        added_by,
        timestamp: 100,
    }
}

pub fn requesting(aci: Aci, key: ProfileKey) -> DecryptedRequestingMember {
    DecryptedRequestingMember {
        aci,
        profile_key: key,
        timestamp: 100,
    }
}

pub fn banned(id: ServiceId, timestamp: u64) -> DecryptedBannedMember {
    DecryptedBannedMember {
        service_id: id,
        timestamp,
    }
}

/// A group at `revision` whose only member is an administrator.
pub fn group_with_admin(admin: Aci, revision: u32) -> DecryptedGroup {
    let mut group = DecryptedGroup {
        title: "Group".into(),
        revision,
        ..Default::default()
    };
    group.members.insert(admin, member(admin, Role::Administrator));
    group
}

pub fn change(revision: u32) -> DecryptedGroupChange {
    DecryptedGroupChange::new(revision)
}

/// Server and one group's client-side operations.
pub struct Fixture {
    pub server: ServerSecretParams,
    pub ops: GroupsV2Operations,
    pub params: GroupSecretParams,
    pub group: GroupOperations<ClientGroupCipher>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(GroupsConfig::default())
    }

    pub fn with_config(config: GroupsConfig) -> Self {
        let server = ServerSecretParams::generate();
        let ops = GroupsV2Operations::new(server.public_params(), config);
        let params = GroupSecretParams::generate().expect("params");
        let group = ops.for_group(&params);
        Self {
            server,
            ops,
            params,
            group,
        }
    }

    pub fn credential(&self, aci: Aci, key: &ProfileKey) -> ProfileKeyCredential {
        self.server
            .issue_profile_key_credential(aci, key, 4_000_000_000)
            .expect("credential")
    }

    /// Notarize `actions` the way the server would.
    pub fn notarize(&self, actions: &GroupChangeActions, epoch: u32) -> GroupChange {
        let bytes = actions.encode().expect("encode");
        GroupChange {
            server_signature: self.server.sign_change_actions(&bytes),
            actions: bytes,
            change_epoch: epoch,
        }
    }
}
