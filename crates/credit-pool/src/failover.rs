//! Credit failover controller
//!
//! Owns the active session and is the only writer of the credential store's
//! active pointer. Every quota-sensitive operation goes through `guard`:
//!
//! 1. Query credits on the active session
//! 2. Enough credits → run the operation on it (no store write)
//! 3. Otherwise walk the store's candidates in order, initializing a session
//!    for each and reading its credits
//! 4. First candidate with enough credits is persisted as active, becomes the
//!    active session, and runs the operation
//! 5. No candidate qualifies → run the operation on the original session
//!    anyway (degraded mode)
//!
//! The quota read runs unlocked. Only the candidate search and promotion run
//! under a mutex, so concurrent guarded calls cannot each promote a different
//! candidate, and a caller that waited on the mutex re-checks the session the
//! winner installed. The operation itself runs outside the lock.

use std::future::Future;
use std::sync::Arc;

use credential_store::{Credential, CredentialStore};
use studio_client::{Connector, Session};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::quota::{OperationClass, Thresholds};

/// Outcome label for the failover counter.
fn record_failover(outcome: &'static str) {
    metrics::counter!("credit_failover_total", "outcome" => outcome).increment(1);
}

fn record_remaining(account: &str, remaining: Option<i64>) {
    if let Some(remaining) = remaining {
        metrics::gauge!("credit_quota_remaining", "account" => account.to_string())
            .set(remaining as f64);
    }
}

/// Holds the active session and decides when to replace it.
pub struct FailoverController {
    connector: Connector,
    store: Arc<dyn CredentialStore>,
    thresholds: Thresholds,
    active: RwLock<Arc<Session>>,
    promotion: Mutex<()>,
}

impl FailoverController {
    /// Wrap an already-initialized session.
    pub fn new(
        connector: Connector,
        store: Arc<dyn CredentialStore>,
        thresholds: Thresholds,
        session: Session,
    ) -> Self {
        info!(account = %session.account(), "failover controller ready");
        Self {
            connector,
            store,
            thresholds,
            active: RwLock::new(Arc::new(session)),
            promotion: Mutex::new(()),
        }
    }

    /// Pick the starting session.
    ///
    /// Preference order: `explicit`, then the store's active pointer, then the
    /// first candidate that initializes. A preferred credential the identity
    /// provider rejects is skipped. Promoting a candidate here writes the
    /// active pointer; using `explicit` or the existing pointer does not.
    pub async fn bootstrap(
        connector: Connector,
        store: Arc<dyn CredentialStore>,
        thresholds: Thresholds,
        explicit: Option<Credential>,
    ) -> Result<Self> {
        let preferred = match explicit {
            Some(credential) => Some(credential),
            None => match store.get_active().await {
                Ok(active) => active,
                Err(e) => {
                    warn!(error = %e, "could not read active credential, trying candidates");
                    None
                }
            },
        };

        if let Some(credential) = &preferred {
            match connector.connect(credential.clone()).await {
                Ok(session) => return Ok(Self::new(connector, store, thresholds, session)),
                Err(e) if e.rejects_credential() => {
                    warn!(account = %credential.label, error = %e, "preferred credential rejected");
                }
                Err(e) => return Err(e.into()),
            }
        }

        for candidate in store.list_candidates().await? {
            if preferred.as_ref().is_some_and(|p| p.same_account(&candidate)) {
                continue;
            }
            match connector.connect(candidate.clone()).await {
                Ok(session) => {
                    store
                        .set_active(&candidate.label, candidate.secret.expose())
                        .await?;
                    info!(account = %candidate.label, "bootstrapped from candidate");
                    return Ok(Self::new(connector, store, thresholds, session));
                }
                Err(e) => {
                    warn!(account = %candidate.label, error = %e, "candidate failed to initialize");
                }
            }
        }

        Err(Error::NoActiveCredential(
            "no explicit, active, or candidate credential could start a session".into(),
        ))
    }

    /// The session guarded operations currently run on.
    pub async fn current(&self) -> Arc<Session> {
        self.active.read().await.clone()
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Run `operation` under the threshold configured for `class`.
    pub async fn guard_class<T, F, Fut>(&self, class: OperationClass, operation: F) -> Result<T>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = studio_client::Result<T>>,
    {
        self.guard(self.thresholds.for_class(class), operation).await
    }

    /// Run `operation` on a session holding at least `threshold` credits if
    /// one can be found, otherwise on the current session.
    ///
    /// An unreadable quota on the active session is a hard failure and is
    /// returned as-is; only a low quota triggers the candidate search. This
    /// never fails because no candidate qualified.
    pub async fn guard<T, F, Fut>(&self, threshold: i64, operation: F) -> Result<T>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = studio_client::Result<T>>,
    {
        let session = self.ensure_credits(threshold).await?;
        operation(session).await.map_err(Error::from)
    }

    async fn ensure_credits(&self, threshold: i64) -> Result<Arc<Session>> {
        let observed = self.current().await;
        let quota = observed.quota(false).await?;
        record_remaining(observed.account(), quota.remaining);
        if quota.meets(threshold) {
            debug!(
                account = %observed.account(),
                remaining = ?quota.remaining,
                threshold,
                "credits sufficient"
            );
            return Ok(observed);
        }

        let _promotion = self.promotion.lock().await;
        let current = self.current().await;
        let quota = if Arc::ptr_eq(&current, &observed) {
            quota
        } else {
            // Another call swapped the session while we waited for the lock.
            let quota = current.quota(false).await?;
            record_remaining(current.account(), quota.remaining);
            if quota.meets(threshold) {
                debug!(
                    account = %current.account(),
                    remaining = ?quota.remaining,
                    threshold,
                    "already promoted by a concurrent call"
                );
                return Ok(current);
            }
            quota
        };

        info!(
            account = %current.account(),
            remaining = ?quota.remaining,
            threshold,
            "credits below threshold, searching candidates"
        );

        match self.find_viable(&current, threshold).await {
            Some(promoted) => {
                *self.active.write().await = promoted.clone();
                record_failover("promoted");
                Ok(promoted)
            }
            None => {
                warn!(
                    account = %current.account(),
                    threshold,
                    "no candidate has enough credits, continuing on current account"
                );
                record_failover("degraded");
                Ok(current)
            }
        }
    }

    /// First-fit search through the store's candidates. A candidate that
    /// fails to initialize or report credits is skipped, not fatal. The winner
    /// is persisted as active before it is returned.
    async fn find_viable(&self, current: &Session, threshold: i64) -> Option<Arc<Session>> {
        let candidates = match self.store.list_candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "could not list candidate credentials");
                return None;
            }
        };

        for candidate in candidates {
            if candidate.same_account(current.credential()) {
                continue;
            }

            let label = candidate.label.clone();
            let session = match self.connector.connect(candidate).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(account = %label, error = %e, "skipping candidate, session failed");
                    continue;
                }
            };

            let quota = match session.quota(true).await {
                Ok(quota) => quota,
                Err(e) => {
                    warn!(account = %label, error = %e, "skipping candidate, quota unreadable");
                    continue;
                }
            };
            record_remaining(&label, quota.remaining);

            if !quota.meets(threshold) {
                debug!(account = %label, remaining = ?quota.remaining, "candidate below threshold");
                continue;
            }

            let secret = session.credential().secret.clone();
            if let Err(e) = self.store.set_active(&label, secret.expose()).await {
                warn!(account = %label, error = %e, "failed to persist promotion, skipping candidate");
                continue;
            }

            info!(
                from = %current.account(),
                to = %label,
                remaining = ?quota.remaining,
                "promoted candidate credential"
            );
            return Some(Arc::new(session));
        }

        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use studio_client::mock::MockStudio;

    /// In-memory store that counts active-pointer writes.
    #[derive(Default)]
    pub(crate) struct RecordingStore {
        candidates: Vec<Credential>,
        active: StdMutex<Option<Credential>>,
        pub writes: AtomicUsize,
        pub fail_list: bool,
    }

    impl RecordingStore {
        pub(crate) fn with(candidates: &[(&str, &str)]) -> Self {
            Self {
                candidates: candidates
                    .iter()
                    .map(|(label, cookie)| Credential::new(*label, *cookie))
                    .collect(),
                ..Default::default()
            }
        }

        pub(crate) fn active_label(&self) -> Option<String> {
            self.active.lock().unwrap().as_ref().map(|c| c.label.clone())
        }
    }

    impl CredentialStore for RecordingStore {
        fn list_candidates(
            &self,
        ) -> Pin<Box<dyn Future<Output = credential_store::Result<Vec<Credential>>> + Send + '_>>
        {
            Box::pin(async move {
                if self.fail_list {
                    return Err(credential_store::Error::Backend("sheet offline".into()));
                }
                Ok(self.candidates.clone())
            })
        }

        fn get_active(
            &self,
        ) -> Pin<Box<dyn Future<Output = credential_store::Result<Option<Credential>>> + Send + '_>>
        {
            Box::pin(async move { Ok(self.active.lock().unwrap().clone()) })
        }

        fn set_active<'a>(
            &'a self,
            label: &'a str,
            secret: &'a str,
        ) -> Pin<Box<dyn Future<Output = credential_store::Result<()>> + Send + 'a>> {
            Box::pin(async move {
                self.writes.fetch_add(1, Ordering::SeqCst);
                *self.active.lock().unwrap() = Some(Credential::new(label, secret));
                Ok(())
            })
        }
    }

    pub(crate) fn connector(mock: &MockStudio) -> Connector {
        Connector::new(reqwest::Client::new(), mock.session_config())
    }

    pub(crate) async fn controller(
        mock: &MockStudio,
        store: Arc<RecordingStore>,
        active_cookie: &str,
    ) -> FailoverController {
        let connector = connector(mock);
        let session = connector
            .connect(Credential::new("primary", active_cookie))
            .await
            .unwrap();
        FailoverController::new(connector, store, Thresholds::default(), session)
    }

    /// Operation that reports which session ran it.
    async fn whoami(session: Arc<Session>) -> studio_client::Result<String> {
        Ok(session.session_id().to_string())
    }

    #[tokio::test]
    async fn sufficient_credits_run_on_current_without_store_write() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(100));
        mock.add_account("cookie-b", "sess_b", Some(500));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));
        let ctl = controller(&mock, store.clone(), "cookie-p").await;

        let ran_on = ctl.guard(44, whoami).await.unwrap();

        assert_eq!(ran_on, "sess_p");
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(ctl.current().await.session_id(), "sess_p");
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(10));
        let store = Arc::new(RecordingStore::with(&[]));
        let ctl = controller(&mock, store.clone(), "cookie-p").await;

        assert_eq!(ctl.guard(10, whoami).await.unwrap(), "sess_p");
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn low_credits_promote_first_viable_candidate_before_running() {
        // remaining=5, threshold 10, one candidate with 50
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(5));
        mock.add_account("cookie-b", "sess_b", Some(50));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));
        let ctl = controller(&mock, store.clone(), "cookie-p").await;

        let observed = store.clone();
        let ran_on = ctl
            .guard(10, move |session| async move {
                // The pointer must already name the new account when the operation starts.
                assert_eq!(observed.active_label().as_deref(), Some("b"));
                Ok(session.session_id().to_string())
            })
            .await
            .unwrap();

        assert_eq!(ran_on, "sess_b");
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.current().await.account(), "b");
    }

    #[tokio::test]
    async fn first_fit_not_best_fit() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(0));
        mock.add_account("cookie-low", "sess_low", Some(3));
        mock.add_account("cookie-ok", "sess_ok", Some(60));
        mock.add_account("cookie-rich", "sess_rich", Some(5000));
        let store = Arc::new(RecordingStore::with(&[
            ("low", "cookie-low"),
            ("ok", "cookie-ok"),
            ("rich", "cookie-rich"),
        ]));
        let ctl = controller(&mock, store.clone(), "cookie-p").await;

        assert_eq!(ctl.guard(44, whoami).await.unwrap(), "sess_ok");
        assert_eq!(store.active_label().as_deref(), Some("ok"));
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broken_candidates_are_skipped() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(0));
        mock.add_account("cookie-billing", "sess_billing", Some(999));
        mock.fail_billing("sess_billing", true);
        mock.add_account("cookie-good", "sess_good", Some(100));
        let store = Arc::new(RecordingStore::with(&[
            ("expired", "cookie-expired"),
            ("billing", "cookie-billing"),
            ("good", "cookie-good"),
        ]));
        let ctl = controller(&mock, store.clone(), "cookie-p").await;

        assert_eq!(ctl.guard(10, whoami).await.unwrap(), "sess_good");
        assert_eq!(store.active_label().as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn no_viable_candidate_falls_back_to_current() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(2));
        mock.add_account("cookie-b", "sess_b", Some(3));
        mock.add_account("cookie-c", "sess_c", None);
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b"), ("c", "cookie-c")]));
        let ctl = controller(&mock, store.clone(), "cookie-p").await;

        let ran_on = ctl.guard(44, whoami).await.unwrap();

        assert_eq!(ran_on, "sess_p");
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(ctl.current().await.account(), "primary");
    }

    #[tokio::test]
    async fn unreadable_store_degrades_instead_of_failing() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(0));
        let store = Arc::new(RecordingStore {
            fail_list: true,
            ..Default::default()
        });
        let ctl = controller(&mock, store, "cookie-p").await;

        assert_eq!(ctl.guard(10, whoami).await.unwrap(), "sess_p");
    }

    #[tokio::test]
    async fn current_account_listed_as_candidate_is_not_promoted() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(1));
        let store = Arc::new(RecordingStore::with(&[("primary-again", "cookie-p")]));
        let ctl = controller(&mock, store.clone(), "cookie-p").await;

        ctl.guard(10, whoami).await.unwrap();
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreadable_active_quota_is_a_hard_failure() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(100));
        mock.add_account("cookie-b", "sess_b", Some(100));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));
        let ctl = controller(&mock, store.clone(), "cookie-p").await;
        mock.fail_billing("sess_p", true);

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let err = ctl
            .guard(10, move |session| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                whoami(session).await
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "quota_query_error");
        assert_eq!(ran.load(Ordering::SeqCst), 0, "operation must not run");
        assert_eq!(store.writes.load(Ordering::SeqCst), 0, "must not fail over");
    }

    #[tokio::test]
    async fn operation_errors_propagate_unchanged() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(100));
        let ctl = controller(&mock, Arc::new(RecordingStore::with(&[])), "cookie-p").await;

        let err = ctl
            .guard(10, |_session| async {
                Err::<(), _>(studio_client::Error::Upstream("502 bad gateway".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_request_error");
    }

    #[tokio::test]
    async fn promotion_sticks_for_later_calls() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(0));
        mock.add_account("cookie-b", "sess_b", Some(100));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));
        let ctl = controller(&mock, store.clone(), "cookie-p").await;

        ctl.guard(10, whoami).await.unwrap();
        assert_eq!(ctl.guard(10, whoami).await.unwrap(), "sess_b");
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_guards_promote_once() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(0));
        mock.add_account("cookie-b", "sess_b", Some(100));
        mock.add_account("cookie-c", "sess_c", Some(100));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b"), ("c", "cookie-c")]));
        let ctl = Arc::new(controller(&mock, store.clone(), "cookie-p").await);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let ctl = ctl.clone();
            handles.push(tokio::spawn(async move { ctl.guard(10, whoami).await.unwrap() }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "sess_b");
        }
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sufficient_credit_checks_run_in_parallel() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(1000));
        let store = Arc::new(RecordingStore::with(&[]));
        let ctl = Arc::new(controller(&mock, store.clone(), "cookie-p").await);
        mock.delay_billing(std::time::Duration::from_millis(400));

        let started = std::time::Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let ctl = ctl.clone();
            handles.push(tokio::spawn(async move { ctl.guard(10, whoami).await.unwrap() }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "sess_p");
        }

        // Four serialized billing calls would take at least 1.6s.
        let elapsed = started.elapsed();
        assert!(elapsed < std::time::Duration::from_millis(1200), "took {elapsed:?}");
        assert_eq!(mock.sessions_for("billing").len(), 4);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn guard_class_uses_configured_thresholds() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(20));
        mock.add_account("cookie-b", "sess_b", Some(100));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));
        let ctl = controller(&mock, store.clone(), "cookie-p").await;

        assert_eq!(ctl.guard_class(OperationClass::Feed, whoami).await.unwrap(), "sess_p");
        assert_eq!(
            ctl.guard_class(OperationClass::Generation, whoami).await.unwrap(),
            "sess_b"
        );
    }

    #[tokio::test]
    async fn promotion_is_persisted_to_file_store() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-p", "sess_p", Some(1));
        mock.add_account("cookie-b", "sess_b", Some(100));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let doc = serde_json::json!({
            "active": null,
            "candidates": [{ "label": "b", "secret": "cookie-b" }],
        });
        tokio::fs::write(&path, doc.to_string()).await.unwrap();
        let store = credential_store::FileCredentialStore::load(path.clone())
            .await
            .unwrap();

        let connector = connector(&mock);
        let session = connector
            .connect(Credential::new("primary", "cookie-p"))
            .await
            .unwrap();
        let ctl = FailoverController::new(connector, Arc::new(store), Thresholds::default(), session);
        ctl.guard(10, whoami).await.unwrap();

        let reloaded = credential_store::FileCredentialStore::load(path).await.unwrap();
        let active = reloaded.get_active().await.unwrap().unwrap();
        assert_eq!(active.label, "b");
        assert_eq!(active.secret.expose(), "cookie-b");
    }

    #[tokio::test]
    async fn bootstrap_prefers_explicit_credential() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-x", "sess_x", Some(100));
        mock.add_account("cookie-b", "sess_b", Some(100));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));

        let ctl = FailoverController::bootstrap(
            connector(&mock),
            store.clone(),
            Thresholds::default(),
            Some(Credential::new("explicit", "cookie-x")),
        )
        .await
        .unwrap();

        assert_eq!(ctl.current().await.session_id(), "sess_x");
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bootstrap_reads_active_pointer() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-a", "sess_a", Some(100));
        mock.add_account("cookie-b", "sess_b", Some(100));
        let store = Arc::new(RecordingStore::with(&[("b", "cookie-b")]));
        store.set_active("a", "cookie-a").await.unwrap();

        let ctl = FailoverController::bootstrap(
            connector(&mock),
            store.clone(),
            Thresholds::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(ctl.current().await.session_id(), "sess_a");
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bootstrap_skips_stale_pointer_and_promotes_candidate() {
        let mock = MockStudio::start().await;
        mock.add_account("cookie-b", "sess_b", Some(100));
        let store = Arc::new(RecordingStore::with(&[
            ("expired", "cookie-expired"),
            ("b", "cookie-b"),
        ]));
        store.set_active("stale", "cookie-stale").await.unwrap();

        let ctl = FailoverController::bootstrap(
            connector(&mock),
            store.clone(),
            Thresholds::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(ctl.current().await.session_id(), "sess_b");
        assert_eq!(store.active_label().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn bootstrap_without_any_usable_credential_fails() {
        let mock = MockStudio::start().await;
        let store = Arc::new(RecordingStore::with(&[("expired", "cookie-expired")]));

        let result = FailoverController::bootstrap(
            connector(&mock),
            store,
            Thresholds::default(),
            None,
        )
        .await;

        assert!(matches!(result, Err(Error::NoActiveCredential(_))));
    }
}
