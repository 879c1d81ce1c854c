use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::{Condvar, Mutex};

use crate::{
    data::Session,
    error::Error,
    fetch::{self, FetchScope},
};

/// Session-state change pushed by the identity provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

pub type SessionCallback = Box<dyn Fn(AuthEvent, Option<&Session>) + Send + Sync>;

/// Registry of session-change subscribers.  Callbacks are invoked under the
/// registry lock, so events are observed in emission order and unsubscribing
/// returns only after any in-flight delivery has finished.  Callbacks must
/// not subscribe or unsubscribe from inside the delivery.
#[derive(Clone, Default)]
pub struct SessionDispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    subscribers: Mutex<Vec<(u64, SessionCallback)>>,
    next_id: AtomicU64,
}

impl SessionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: SessionCallback) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.lock().push((id, callback));
        Subscription {
            id,
            dispatcher: self.clone(),
        }
    }

    pub fn emit(&self, event: AuthEvent, session: Option<&Session>) {
        log::debug!("dispatching session event: {:?}", event);
        let subscribers = self.inner.subscribers.lock();
        for (_, callback) in subscribers.iter() {
            callback(event, session);
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.inner
            .subscribers
            .lock()
            .retain(|(subscriber, _)| *subscriber != id);
    }
}

/// Standing registration for session-change notifications.  Dropping it
/// without calling `unsubscribe` leaves the callback installed for the rest
/// of the process lifetime.
pub struct Subscription {
    id: u64,
    dispatcher: SessionDispatcher,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.dispatcher.unsubscribe(self.id);
    }
}

/// Capability surface of the remote identity provider, as consumed by the
/// session store.  `webapi::Client` is the production implementation.
pub trait AuthBackend: Send + Sync {
    /// One-shot retrieval of the restored session.  Failures fold into
    /// `None`, absence of a session is the fail-open answer.
    fn get_session(&self) -> Option<Session>;

    fn on_session_change(&self, callback: SessionCallback) -> Subscription;

    fn sign_in_with_password(&self, email: &str, password: &str) -> Result<(), Error>;

    fn sign_up(&self, email: &str, password: &str) -> Result<(), Error>;

    fn sign_out(&self) -> Result<(), Error>;
}

struct StoreState {
    current: Option<Session>,
    // Set once any change notification has been applied.  A later-resolving
    // initial fetch must not clobber state the notification already wrote.
    notified: bool,
    // Set once the bootstrap has settled: the initial fetch resolved, an
    // event was applied, or the store was torn down.
    bootstrapped: bool,
}

struct StoreLifecycle {
    subscription: Subscription,
    bootstrap: FetchScope,
    fetch_thread: std::thread::JoinHandle<()>,
}

/// Process-wide holder of the current authenticated identity.  Cheap to
/// clone, all clones share state.  The only writers are the change
/// subscription and the resolution of the initial fetch; everything else
/// reads through `current()`.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn AuthBackend>,
    state: Arc<Mutex<StoreState>>,
    bootstrapped: Arc<Condvar>,
    lifecycle: Arc<Mutex<Option<StoreLifecycle>>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(StoreState {
                current: None,
                notified: false,
                bootstrapped: false,
            })),
            bootstrapped: Arc::new(Condvar::new()),
            lifecycle: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe to session changes and start the initial session fetch in
    /// the background.  The subscription is registered before the fetch is
    /// issued, so an event arriving while the fetch is still in flight cannot
    /// be missed; the fetch result is discarded once any event has been
    /// applied.
    pub fn initialize(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_some() {
            log::warn!("session store is already initialized");
            return;
        }
        {
            let mut state = self.state.lock();
            state.notified = false;
            state.bootstrapped = false;
        }

        let subscription = self.backend.on_session_change(Box::new({
            let state = Arc::clone(&self.state);
            let bootstrapped = Arc::clone(&self.bootstrapped);
            move |event, session| {
                log::info!("session changed: {:?}", event);
                let mut state = state.lock();
                state.current = session.cloned();
                state.notified = true;
                state.bootstrapped = true;
                bootstrapped.notify_all();
            }
        }));

        let bootstrap = FetchScope::new();
        let fetch_thread = fetch::spawn(
            bootstrap.token(),
            {
                let backend = Arc::clone(&self.backend);
                move || backend.get_session()
            },
            {
                let state = Arc::clone(&self.state);
                let bootstrapped = Arc::clone(&self.bootstrapped);
                move |token, fetched| {
                    let mut state = state.lock();
                    if state.notified {
                        log::info!("initial session fetch superseded by a session event");
                    } else if token.is_live() {
                        log::info!(
                            "initial session fetch resolved, authenticated: {}",
                            fetched.is_some()
                        );
                        state.current = fetched;
                    }
                    state.bootstrapped = true;
                    bootstrapped.notify_all();
                }
            },
        );

        *lifecycle = Some(StoreLifecycle {
            subscription,
            bootstrap,
            fetch_thread,
        });
    }

    /// Latest known session.  Never blocks on the backend and may be
    /// momentarily stale relative to it.
    pub fn current(&self) -> Option<Session> {
        self.state.lock().current.clone()
    }

    /// Block until the bootstrap started by `initialize` has settled, either
    /// by the initial fetch resolving or by a change notification arriving
    /// first, and return the session known at that point.  For callers whose
    /// first render must not race the restored session; `current()` stays the
    /// non-blocking read.
    pub fn wait_for_bootstrap(&self) -> Option<Session> {
        if self.lifecycle.lock().is_none() {
            log::warn!("session store is not initialized");
            return self.current();
        }
        let mut state = self.state.lock();
        while !state.bootstrapped {
            self.bootstrapped.wait(&mut state);
        }
        state.current.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Cancel the change subscription and the bootstrap fetch.  Events
    /// delivered after this returns no longer touch the store; a delivery
    /// already in flight is waited out.
    pub fn teardown(&self) {
        let lifecycle = self.lifecycle.lock().take();
        if let Some(lifecycle) = lifecycle {
            {
                // Disposing under the state lock orders the disposal against
                // a bootstrap resolution currently applying itself.
                let _state = self.state.lock();
                lifecycle.bootstrap.dispose();
            }
            lifecycle.subscription.unsubscribe();
            if lifecycle.fetch_thread.join().is_err() {
                log::warn!("session fetch thread panicked");
            }
            {
                // A disposed fetch never reports back; release anyone still
                // blocked on the bootstrap.
                let mut state = self.state.lock();
                state.bootstrapped = true;
                self.bootstrapped.notify_all();
            }
            log::info!("session store torn down");
        } else {
            log::warn!("session store is not initialized");
        }
    }

    /// Credential sign-in.  On success the current session updates through
    /// the change notification, not through the return value.
    pub fn sign_in(&self, email: &str, password: &str) -> Result<(), Error> {
        self.backend.sign_in_with_password(email, password)
    }

    pub fn sign_up(&self, email: &str, password: &str) -> Result<(), Error> {
        self.backend.sign_up(email, password)
    }

    /// Sign-out.  The current session clears upon the subsequent change
    /// notification, not synchronously.
    pub fn sign_out(&self) -> Result<(), Error> {
        self.backend.sign_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::UserProfile;
    use crossbeam_channel::{bounded, Receiver};
    use std::{
        sync::atomic::AtomicBool,
        thread,
        time::{Duration, Instant},
    };

    fn session(user: &str) -> Session {
        Session {
            access_token: format!("at-{user}"),
            refresh_token: format!("rt-{user}"),
            expires_at: i64::MAX,
            user: UserProfile {
                id: user.into(),
                email: Some(format!("{user}@example.com").into()),
            },
        }
    }

    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        dispatcher: SessionDispatcher,
        stored: Mutex<Option<Session>>,
        fetch_gate: Mutex<Option<Receiver<()>>>,
        fail_sign_in: AtomicBool,
        fail_sign_up: AtomicBool,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self::default()
        }

        fn emit(&self, event: AuthEvent, session: Option<&Session>) {
            self.dispatcher.emit(event, session);
        }
    }

    impl AuthBackend for FakeBackend {
        fn get_session(&self) -> Option<Session> {
            if let Some(gate) = self.fetch_gate.lock().as_ref() {
                let _ = gate.recv();
            }
            self.stored.lock().clone()
        }

        fn on_session_change(&self, callback: SessionCallback) -> Subscription {
            self.dispatcher.subscribe(callback)
        }

        fn sign_in_with_password(&self, email: &str, _password: &str) -> Result<(), Error> {
            if self.fail_sign_in.load(Ordering::SeqCst) {
                return Err(Error::InvalidCredentials);
            }
            let session = session(email);
            *self.stored.lock() = Some(session.clone());
            self.emit(AuthEvent::SignedIn, Some(&session));
            Ok(())
        }

        fn sign_up(&self, email: &str, _password: &str) -> Result<(), Error> {
            if self.fail_sign_up.load(Ordering::SeqCst) {
                return Err(Error::AccountCreationFailed);
            }
            let session = session(email);
            *self.stored.lock() = Some(session.clone());
            self.emit(AuthEvent::SignedIn, Some(&session));
            Ok(())
        }

        fn sign_out(&self) -> Result<(), Error> {
            *self.stored.lock() = None;
            self.emit(AuthEvent::SignedOut, None);
            Ok(())
        }
    }

    #[test]
    fn initial_fetch_populates_the_store() {
        let backend = Arc::new(FakeBackend::new());
        *backend.stored.lock() = Some(session("alice"));
        let store = SessionStore::new(backend.clone());

        store.initialize();
        wait_until(|| store.is_authenticated());
        assert_eq!(store.current(), Some(session("alice")));
        store.teardown();
    }

    #[test]
    fn wait_for_bootstrap_returns_the_restored_session() {
        let backend = Arc::new(FakeBackend::new());
        *backend.stored.lock() = Some(session("alice"));
        let store = SessionStore::new(backend.clone());

        store.initialize();
        assert_eq!(store.wait_for_bootstrap(), Some(session("alice")));
        store.teardown();
    }

    #[test]
    fn wait_for_bootstrap_is_satisfied_by_an_early_notification() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let backend = Arc::new(FakeBackend::new());
        *backend.fetch_gate.lock() = Some(gate_rx);
        let store = SessionStore::new(backend.clone());
        store.initialize();

        // The initial fetch is still blocked on the gate; the notification
        // alone settles the bootstrap.
        backend.emit(AuthEvent::SignedIn, Some(&session("bob")));
        assert_eq!(store.wait_for_bootstrap(), Some(session("bob")));

        gate_tx.send(()).unwrap();
        store.teardown();
    }

    #[test]
    fn notification_wins_over_a_slower_initial_fetch() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let backend = Arc::new(FakeBackend::new());
        *backend.fetch_gate.lock() = Some(gate_rx);
        let store = SessionStore::new(backend.clone());

        store.initialize();
        backend.emit(AuthEvent::SignedIn, Some(&session("alice")));
        assert_eq!(store.current(), Some(session("alice")));

        // Let the initial fetch resolve with no session; teardown joins the
        // fetch thread, so by the time it returns the resolution has been
        // processed and discarded.
        gate_tx.send(()).unwrap();
        store.teardown();
        assert_eq!(store.current(), Some(session("alice")));
    }

    #[test]
    fn events_apply_in_emission_order() {
        let backend = Arc::new(FakeBackend::new());
        let store = SessionStore::new(backend.clone());
        store.initialize();

        backend.emit(AuthEvent::SignedIn, Some(&session("alice")));
        backend.emit(AuthEvent::TokenRefreshed, Some(&session("bob")));
        assert_eq!(store.current(), Some(session("bob")));

        backend.emit(AuthEvent::SignedOut, None);
        assert_eq!(store.current(), None);
        store.teardown();
    }

    #[test]
    fn teardown_makes_the_subscription_inert() {
        let backend = Arc::new(FakeBackend::new());
        let store = SessionStore::new(backend.clone());

        store.initialize();
        backend.emit(AuthEvent::SignedIn, Some(&session("alice")));
        store.teardown();

        backend.emit(AuthEvent::SignedOut, None);
        assert_eq!(store.current(), Some(session("alice")));
    }

    #[test]
    fn repeated_initialize_does_not_double_subscribe() {
        let backend = Arc::new(FakeBackend::new());
        let store = SessionStore::new(backend.clone());

        store.initialize();
        store.initialize();
        backend.emit(AuthEvent::SignedIn, Some(&session("alice")));
        store.teardown();

        // Had the second initialize subscribed again, this event would still
        // be applied through the leftover callback.
        backend.emit(AuthEvent::SignedOut, None);
        assert_eq!(store.current(), Some(session("alice")));
    }

    #[test]
    fn sign_in_updates_through_the_notification() {
        let backend = Arc::new(FakeBackend::new());
        let store = SessionStore::new(backend.clone());
        store.initialize();

        store.sign_in("alice@example.com", "pw").unwrap();
        assert_eq!(store.current(), Some(session("alice@example.com")));
        store.teardown();
    }

    #[test]
    fn failed_sign_in_leaves_the_store_untouched() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_sign_in.store(true, Ordering::SeqCst);
        let store = SessionStore::new(backend.clone());
        store.initialize();

        let result = store.sign_in("alice@example.com", "wrong");
        assert!(matches!(result, Err(Error::InvalidCredentials)));
        assert_eq!(store.current(), None);
        store.teardown();
    }

    #[test]
    fn failed_sign_up_leaves_the_store_untouched() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_sign_up.store(true, Ordering::SeqCst);
        let store = SessionStore::new(backend.clone());
        store.initialize();

        let result = store.sign_up("alice@example.com", "pw");
        assert!(matches!(result, Err(Error::AccountCreationFailed)));
        assert_eq!(store.current(), None);
        store.teardown();
    }

    #[test]
    fn sign_out_clears_through_the_notification() {
        let backend = Arc::new(FakeBackend::new());
        let store = SessionStore::new(backend.clone());
        store.initialize();

        store.sign_in("alice@example.com", "pw").unwrap();
        store.sign_out().unwrap();
        assert_eq!(store.current(), None);
        store.teardown();
    }

    #[test]
    fn unsubscribed_callbacks_are_not_invoked() {
        let dispatcher = SessionDispatcher::new();
        let count = Arc::new(AtomicU64::new(0));
        let subscription = dispatcher.subscribe(Box::new({
            let count = Arc::clone(&count);
            move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        }));

        dispatcher.emit(AuthEvent::SignedOut, None);
        subscription.unsubscribe();
        dispatcher.emit(AuthEvent::SignedOut, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribers_observe_events_in_subscription_order() {
        let dispatcher = SessionDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = dispatcher.subscribe(Box::new({
            let order = Arc::clone(&order);
            move |_, _| order.lock().push("first")
        }));
        let second = dispatcher.subscribe(Box::new({
            let order = Arc::clone(&order);
            move |_, _| order.lock().push("second")
        }));

        dispatcher.emit(AuthEvent::SignedOut, None);
        assert_eq!(*order.lock(), vec!["first", "second"]);
        first.unsubscribe();
        second.unsubscribe();
    }
}
