//! Group protocol guardrails.
//!
//! Constants that bound wire payloads and pin down the format versions this
//! build understands.

/// Smallest attribute blob that can carry an authenticated value:
/// 1 reserved byte + 12-byte nonce + 16-byte tag.
pub const MIN_ENCRYPTED_BLOB_LEN: usize = 1 + 12 + 16;

/// Highest change-actions format epoch this build can interpret.
/// Changes from a newer epoch are skipped, not rejected.
pub const HIGHEST_KNOWN_EPOCH: u32 = 5;

/// Max CBOR-encoded action payload accepted from or sent to the server.
pub const MAX_ACTIONS_PAYLOAD_BYTES: usize = 256 * 1024; // 256 KB

/// Default cap on members, also used to bound the banned list.
pub const DEFAULT_MAX_GROUP_SIZE: usize = 1001;

/// Days of auth credentials requested per fetch.
pub const DEFAULT_AUTH_WINDOW_DAYS: i64 = 7;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// How a ban request fits into the banned list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanListStatus {
    /// Room for every new ban.
    Ok,
    /// The oldest `evict` bans must be lifted to make room.
    MustEvict { evict: usize },
}

/// Check whether adding `adding` bans to a list of `current` exceeds `max`.
pub fn check_ban_list(current: usize, adding: usize, max: usize) -> BanListStatus {
    let total = current.saturating_add(adding);
    if total > max {
        BanListStatus::MustEvict {
            evict: (total - max).min(current),
        }
    } else {
        BanListStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_blob_len() {
        assert_eq!(MIN_ENCRYPTED_BLOB_LEN, 29);
    }

    #[test]
    fn test_ban_list_room() {
        assert_eq!(check_ban_list(0, 1, 10), BanListStatus::Ok);
        assert_eq!(check_ban_list(9, 1, 10), BanListStatus::Ok);
    }

    #[test]
    fn test_ban_list_evicts_oldest() {
        assert_eq!(
            check_ban_list(10, 1, 10),
            BanListStatus::MustEvict { evict: 1 }
        );
        assert_eq!(
            check_ban_list(10, 3, 10),
            BanListStatus::MustEvict { evict: 3 }
        );
    }

    #[test]
    fn test_ban_list_never_evicts_more_than_present() {
        assert_eq!(
            check_ban_list(2, 20, 10),
            BanListStatus::MustEvict { evict: 2 }
        );
    }
}
