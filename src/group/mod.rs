//! Decrypted group state and the pure functions over it.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`model`] | Decrypted group snapshot and member records |
//! | [`change`] | Decrypted change and its emptiness predicates |
//! | [`apply`] | Apply a change to a snapshot |
//! | [`reconstruct`] | Derive a change from two snapshots |
//! | [`resolve`] | Prune or retarget a stale change against the latest snapshot |

pub mod apply;
pub mod change;
pub mod model;
pub mod reconstruct;
pub mod resolve;

pub use apply::{apply, apply_without_revision_check, ApplyError};
pub use change::{DecryptedAction, DecryptedGroupChange};
pub use model::{
    DecryptedBannedMember, DecryptedGroup, DecryptedMember, DecryptedPendingMember,
    DecryptedRequestingMember, EnabledState,
};
pub use reconstruct::reconstruct;
pub use resolve::{resolve, resolve_encrypted, ChangeSetModifier, ResolveError};
