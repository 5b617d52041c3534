//! Per-day group authorization.
//!
//! The server issues one auth credential per day for a window of days. The
//! cache holds the verified batch and turns today's credential into a group
//! authorization on demand. One mutex guards the table for the whole
//! check-then-fetch sequence so concurrent callers never issue duplicate
//! fetches.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::config::GroupsConfig;
use crate::crypto::{
    AuthCredential, AuthCredentialResponse, CipherError, GroupSecretParams, ServerPublicParams,
};
use crate::ids::Aci;
use crate::limits::SECONDS_PER_DAY;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// A credential in the fetched batch did not verify. Nothing was cached.
    #[error("Auth credential verification failed")]
    VerificationFailed,

    /// The cached batch has no credential for this day. Handled internally
    /// by one refetch.
    #[error("No auth credential for day {0}")]
    NoCredentialForRedemptionTime(i64),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Could not create presentation: {0}")]
    Presentation(#[from] CipherError),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Collaborators (app implements)
// ---------------------------------------------------------------------------

/// Fetches raw auth credentials from the server.
pub trait AuthCredentialSource {
    /// Credentials for every day in `start_day..=end_day`.
    fn fetch_auth_credentials(
        &self,
        start_day: i64,
        end_day: i64,
    ) -> Result<Vec<AuthCredentialResponse>>;
}

/// Current day as days since the Unix epoch.
pub trait DayClock {
    fn today(&self) -> i64;
}

/// [`DayClock`] over the system clock, in UTC.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl DayClock for SystemClock {
    fn today(&self) -> i64 {
        chrono::Utc::now().timestamp().div_euclid(SECONDS_PER_DAY)
    }
}

// ---------------------------------------------------------------------------
// Authorization token
// ---------------------------------------------------------------------------

/// Credentials for one group request: the group's public params and an auth
/// credential presentation, both hex.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupAuthorization {
    pub username: String,
    pub password: String,
}

impl GroupAuthorization {
    /// HTTP basic authorization header value.
    pub fn to_header(&self) -> String {
        format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Session-scoped authorization cache. Construct one per client session and
/// share it by reference.
pub struct GroupsV2Authorization<S: AuthCredentialSource, K: DayClock = SystemClock> {
    server: ServerPublicParams,
    aci: Aci,
    source: S,
    clock: K,
    window_days: i64,
    cache: Mutex<BTreeMap<i64, AuthCredential>>,
}

impl<S: AuthCredentialSource> GroupsV2Authorization<S, SystemClock> {
    pub fn new(server: ServerPublicParams, aci: Aci, source: S, config: &GroupsConfig) -> Self {
        Self::with_clock(server, aci, source, SystemClock, config)
    }
}

impl<S: AuthCredentialSource, K: DayClock> GroupsV2Authorization<S, K> {
    pub fn with_clock(
        server: ServerPublicParams,
        aci: Aci,
        source: S,
        clock: K,
        config: &GroupsConfig,
    ) -> Self {
        Self {
            server,
            aci,
            source,
            clock,
            window_days: config.auth_credential_window_days.max(1),
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<i64, AuthCredential>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop every cached credential.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn cached_days(&self) -> Vec<i64> {
        self.lock().keys().copied().collect()
    }

    /// Authorization for `params` valid today. On a miss, refetches the
    /// credential batch once before giving up with [`AuthError::Io`].
    pub fn authorization_for_today(&self, params: &GroupSecretParams) -> Result<GroupAuthorization> {
        let today = self.clock.today();
        let mut cache = self.lock();

        match self.authorization_for_day(&mut cache, today, params) {
            Err(AuthError::NoCredentialForRedemptionTime(_)) | Err(AuthError::Unauthorized) => {
                log::warn!("Auth credentials stale for day {}, refetching", today);
                cache.clear();
            }
            other => return other,
        }

        self.authorization_for_day(&mut cache, today, params)
            .map_err(|e| match e {
                AuthError::NoCredentialForRedemptionTime(day) => {
                    AuthError::Io(format!("server issued no auth credential for day {}", day))
                }
                AuthError::Unauthorized => AuthError::Io("auth credential fetch unauthorized".into()),
                other => other,
            })
    }

    fn authorization_for_day(
        &self,
        cache: &mut BTreeMap<i64, AuthCredential>,
        day: i64,
        params: &GroupSecretParams,
    ) -> Result<GroupAuthorization> {
        if cache.is_empty() {
            let batch = self.fetch_verified(day)?;
            cache.extend(batch.into_iter().map(|c| (c.redemption_day, c)));
        } else {
            log::debug!("Using cached auth credentials for day {}", day);
        }

        let credential = cache
            .get(&day)
            .ok_or(AuthError::NoCredentialForRedemptionTime(day))?;
        let presentation = credential.present(params)?;

        Ok(GroupAuthorization {
            username: params.public_params().to_hex(),
            password: hex::encode(presentation.to_bytes()?),
        })
    }

    /// Fetch and verify a batch starting at `today`. All or nothing.
    fn fetch_verified(&self, today: i64) -> Result<Vec<AuthCredential>> {
        let end = today + self.window_days - 1;
        log::debug!("Fetching auth credentials for days {}..={}", today, end);
        let responses = self.source.fetch_auth_credentials(today, end)?;

        responses
            .iter()
            .map(|response| {
                self.server
                    .receive_auth_credential(self.aci, response)
                    .map_err(|_| AuthError::VerificationFailed)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AuthCredentialPresentation, ServerSecretParams};
    use crate::testkit;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
    use std::time::Duration;

    struct FakeServer {
        server: ServerSecretParams,
        aci: Aci,
        fetches: Cell<u32>,
        /// Days the server issues, relative to the requested start.
        offset: i64,
        tamper: bool,
    }

    impl FakeServer {
        fn new(aci: Aci) -> Self {
            Self {
                server: ServerSecretParams::generate(),
                aci,
                fetches: Cell::new(0),
                offset: 0,
                tamper: false,
            }
        }
    }

    impl AuthCredentialSource for &FakeServer {
        fn fetch_auth_credentials(
            &self,
            start_day: i64,
            end_day: i64,
        ) -> Result<Vec<AuthCredentialResponse>> {
            self.fetches.set(self.fetches.get() + 1);
            let mut batch = self
                .server
                .issue_auth_credentials(self.aci, start_day + self.offset, end_day + self.offset)
                .map_err(|e| AuthError::Io(e.to_string()))?;
            if self.tamper {
                batch[1].signature[0] ^= 1;
            }
            Ok(batch)
        }
    }

    struct FixedClock(AtomicI64);

    impl DayClock for &FixedClock {
        fn today(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Thread-safe source that is slow enough for callers to pile up.
    struct CountingServer {
        server: ServerSecretParams,
        aci: Aci,
        fetches: AtomicU32,
    }

    impl AuthCredentialSource for &CountingServer {
        fn fetch_auth_credentials(
            &self,
            start_day: i64,
            end_day: i64,
        ) -> Result<Vec<AuthCredentialResponse>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.server
                .issue_auth_credentials(self.aci, start_day, end_day)
                .map_err(|e| AuthError::Io(e.to_string()))
        }
    }

    fn config() -> GroupsConfig {
        GroupsConfig {
            auth_credential_window_days: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_fetches_once_and_caches() {
        let aci = testkit::aci();
        let server = FakeServer::new(aci);
        let clock = FixedClock(AtomicI64::new(19_000));
        let auth = GroupsV2Authorization::with_clock(
            server.server.public_params(),
            aci,
            &server,
            &clock,
            &config(),
        );
        let params = GroupSecretParams::generate().unwrap();

        let first = auth.authorization_for_today(&params).unwrap();
        let second = auth.authorization_for_today(&params).unwrap();
        assert_eq!(server.fetches.get(), 1);
        assert_eq!(auth.cached_days(), vec![19_000, 19_001, 19_002]);
        assert_eq!(first.username, params.public_params().to_hex());

        let presentation =
            AuthCredentialPresentation::from_bytes(&hex::decode(&second.password).unwrap())
                .unwrap();
        assert_eq!(presentation.redemption_day, 19_000);
        assert_eq!(presentation.group_public_params, params.public_params());
    }

    #[test]
    fn test_concurrent_callers_share_one_fetch() {
        let aci = testkit::aci();
        let server = CountingServer {
            server: ServerSecretParams::generate(),
            aci,
            fetches: AtomicU32::new(0),
        };
        let clock = FixedClock(AtomicI64::new(19_000));
        let auth = GroupsV2Authorization::with_clock(
            server.server.public_params(),
            aci,
            &server,
            &clock,
            &config(),
        );
        let params = GroupSecretParams::generate().unwrap();

        let results: Vec<GroupAuthorization> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| auth.authorization_for_today(&params).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(server.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 8);
        for result in &results {
            assert_eq!(result.username, params.public_params().to_hex());
            let presentation =
                AuthCredentialPresentation::from_bytes(&hex::decode(&result.password).unwrap())
                    .unwrap();
            assert_eq!(presentation.redemption_day, 19_000);
        }
        assert_eq!(auth.cached_days(), vec![19_000, 19_001, 19_002]);
    }

    #[test]
    fn test_day_rollover_within_window_uses_cache() {
        let aci = testkit::aci();
        let server = FakeServer::new(aci);
        let clock = FixedClock(AtomicI64::new(100));
        let auth = GroupsV2Authorization::with_clock(
            server.server.public_params(),
            aci,
            &server,
            &clock,
            &config(),
        );
        let params = GroupSecretParams::generate().unwrap();

        auth.authorization_for_today(&params).unwrap();
        clock.0.store(102, Ordering::SeqCst);
        auth.authorization_for_today(&params).unwrap();
        assert_eq!(server.fetches.get(), 1);

        clock.0.store(103, Ordering::SeqCst);
        auth.authorization_for_today(&params).unwrap();
        assert_eq!(server.fetches.get(), 2);
        assert_eq!(auth.cached_days(), vec![103, 104, 105]);
    }

    #[test]
    fn test_missing_day_retries_once_then_fails() {
        let aci = testkit::aci();
        let mut server = FakeServer::new(aci);
        server.offset = 10;
        let clock = FixedClock(AtomicI64::new(100));
        let auth = GroupsV2Authorization::with_clock(
            server.server.public_params(),
            aci,
            &server,
            &clock,
            &config(),
        );
        let params = GroupSecretParams::generate().unwrap();

        assert!(matches!(
            auth.authorization_for_today(&params),
            Err(AuthError::Io(_))
        ));
        assert_eq!(server.fetches.get(), 2);
    }

    #[test]
    fn test_bad_credential_rejects_whole_batch() {
        let aci = testkit::aci();
        let mut server = FakeServer::new(aci);
        server.tamper = true;
        let clock = FixedClock(AtomicI64::new(100));
        let auth = GroupsV2Authorization::with_clock(
            server.server.public_params(),
            aci,
            &server,
            &clock,
            &config(),
        );
        let params = GroupSecretParams::generate().unwrap();

        assert_eq!(
            auth.authorization_for_today(&params),
            Err(AuthError::VerificationFailed)
        );
        assert!(auth.cached_days().is_empty());
        assert_eq!(server.fetches.get(), 1);
    }

    #[test]
    fn test_credentials_for_other_aci_fail_verification() {
        let aci = testkit::aci();
        let server = FakeServer::new(testkit::aci());
        let clock = FixedClock(AtomicI64::new(100));
        let auth = GroupsV2Authorization::with_clock(
            server.server.public_params(),
            aci,
            &server,
            &clock,
            &config(),
        );
        let params = GroupSecretParams::generate().unwrap();
        assert_eq!(
            auth.authorization_for_today(&params),
            Err(AuthError::VerificationFailed)
        );
    }

    #[test]
    fn test_clear_forces_refetch() {
        let aci = testkit::aci();
        let server = FakeServer::new(aci);
        let clock = FixedClock(AtomicI64::new(7));
        let auth = GroupsV2Authorization::with_clock(
            server.server.public_params(),
            aci,
            &server,
            &clock,
            &config(),
        );
        let params = GroupSecretParams::generate().unwrap();

        auth.authorization_for_today(&params).unwrap();
        auth.clear();
        auth.authorization_for_today(&params).unwrap();
        assert_eq!(server.fetches.get(), 2);
    }

    #[test]
    fn test_header_format() {
        let authorization = GroupAuthorization {
            username: "ab".into(),
            password: "cd".into(),
        };
        assert_eq!(authorization.to_header(), "Basic YWI6Y2Q=");
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.today() > 18_262);
    }
}
