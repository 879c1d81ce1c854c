use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

/// Liveness flag shared between a background request and the scope it was
/// started under.  Once the scope is disposed, completions still in flight
/// are dropped instead of delivered.
#[derive(Clone, Debug, Default)]
pub struct ScopeToken {
    disposed: Arc<AtomicBool>,
}

impl ScopeToken {
    pub fn is_live(&self) -> bool {
        !self.disposed.load(Ordering::SeqCst)
    }
}

/// Cancellation scope tied to the lifetime of a view.  Disposing it does not
/// abort requests already on the wire, it only discards their completions.
#[derive(Debug, Default)]
pub struct FetchScope {
    token: ScopeToken,
}

impl FetchScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> ScopeToken {
        self.token.clone()
    }

    pub fn dispose(&self) {
        self.token.disposed.store(true, Ordering::SeqCst);
    }
}

/// Run `work` on a background thread and hand the result to `deliver`, unless
/// `token` was disposed in the meantime.  `deliver` receives the token again
/// so it can re-check liveness under its own locks.
pub fn spawn<T>(
    token: ScopeToken,
    work: impl FnOnce() -> T + Send + 'static,
    deliver: impl FnOnce(&ScopeToken, T) + Send + 'static,
) -> JoinHandle<()>
where
    T: Send + 'static,
{
    thread::spawn(move || {
        let result = work();
        if token.is_live() {
            deliver(&token, result);
        } else {
            log::debug!("fetch scope disposed, dropping the result");
        }
    })
}
