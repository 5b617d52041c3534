//! # Shield Groups
//!
//! **Server-stored encrypted groups: state, changes, and conflict resolution.**
//!
//! The server holds a group's state and its change log, with every member
//! identity, profile key and attribute encrypted under the group's secret
//! params. Clients build signed change sets, apply notarized changes to a
//! local decrypted snapshot, rebuild changes from snapshots when the log has
//! gaps, and resolve stale changes against newer state before resubmitting.
//!
//! ## Quick Start
//!
//! ```rust
//! use shield_groups::crypto::{GroupSecretParams, ServerSecretParams};
//! use shield_groups::{GroupsConfig, GroupsV2Operations};
//!
//! let server = ServerSecretParams::generate();
//! let ops = GroupsV2Operations::new(server.public_params(), GroupsConfig::default());
//! let params = GroupSecretParams::generate().unwrap();
//! let group = ops.for_group(&params);
//!
//! let title = group.encrypt_title("  Weekend plans ").unwrap();
//! assert_eq!(group.decrypt_title(&title), "Weekend plans");
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`crypto`] | Group secret params, server params, credentials and presentations |
//! | [`wire`] | Encrypted wire shapes and the CBOR codec |
//! | [`operations`] | Encrypt and decrypt group state, build change sets |
//! | [`group`] | Decrypted snapshot, change application, reconstruction, resolution |
//! | [`auth`] | Per-day auth credential cache and group authorization |
//! | [`directory`] | Transport contract, history patching and the group client |
//! | [`config`] | Tunable limits |
//! | [`limits`] | Constants and ban-list capacity checks |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `std` | Yes | Standard library support |
//! | `wasm` | No | WebAssembly support (`getrandom/js`) |

// Crate-level lint configuration: suppress stylistic warnings that don't affect correctness.
// Security-relevant lints (unsafe, unchecked, etc.) remain enforced.
#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::too_many_arguments,
    clippy::type_complexity,
    clippy::large_enum_variant,
    dead_code,
    unused_assignments
)]

// ── Public modules ──────────────────────────────────────────────────────────

/// Group and server key material, credentials and the group cipher.
pub mod crypto;

/// Identifiers: ACI, PNI, service ids and profile keys.
pub mod ids;

/// Wire shapes exchanged with the server.
pub mod wire;

/// Operations on one group: encryption, decryption and change builders.
pub mod operations;

/// Decrypted group state and the pure functions over it.
pub mod group;

/// Per-day group authorization.
pub mod auth;

/// Server-facing client.
pub mod directory;

pub mod config;
pub mod error;
pub mod limits;

#[cfg(test)]
mod testkit;

// ── Re-export main types ────────────────────────────────────────────────────
pub use auth::{AuthCredentialSource, AuthError, DayClock, GroupAuthorization, GroupsV2Authorization};
pub use config::GroupsConfig;
pub use directory::{
    DirectoryError, GroupStatePatcher, GroupsV2Client, GroupsV2Transport, PatchedGroupState,
};
pub use error::GroupsError;
pub use group::{
    apply, apply_without_revision_check, reconstruct, resolve, resolve_encrypted, ApplyError,
    ChangeSetModifier, DecryptedAction, DecryptedGroup, DecryptedGroupChange, ResolveError,
};
pub use ids::{Aci, Pni, ProfileKey, ServiceId};
pub use operations::{GroupCandidate, GroupOperations, GroupsV2Operations, NewGroup};

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version
pub fn get_version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = get_version();
        assert!(!version.is_empty());
    }
}
