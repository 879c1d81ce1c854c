use crate::{data::Nav, session::SessionStore};

/// Outcome of a navigation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    Render(Nav),
    RedirectToSignIn,
    RedirectToHome,
}

/// Stateless navigation rules over the session store, evaluated fresh on
/// every navigation.
#[derive(Clone)]
pub struct RouteGuard {
    store: SessionStore,
}

impl RouteGuard {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Decision for `nav` under the given authentication state.  The two
    /// redirect rules cannot both apply: one fires only without a session,
    /// the other only with one.
    pub fn evaluate(nav: &Nav, authenticated: bool) -> RouteDecision {
        if nav.requires_auth() && !authenticated {
            RouteDecision::RedirectToSignIn
        } else if nav.is_auth_entry() && authenticated {
            RouteDecision::RedirectToHome
        } else {
            RouteDecision::Render(nav.clone())
        }
    }

    pub fn decide(&self, nav: &Nav) -> RouteDecision {
        Self::evaluate(nav, self.store.is_authenticated())
    }

    /// Follow the decision to the view that will actually render.  Redirect
    /// targets always render under the state that produced the redirect, so
    /// a single hop settles it.
    pub fn resolve(&self, nav: &Nav) -> Nav {
        match self.decide(nav) {
            RouteDecision::Render(nav) => nav,
            RouteDecision::RedirectToSignIn => Nav::SignIn,
            RouteDecision::RedirectToHome => Nav::Home,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{Session, UserProfile},
        error::Error,
        session::{AuthBackend, AuthEvent, SessionCallback, SessionDispatcher, Subscription},
    };
    use std::sync::Arc;

    fn all_navs() -> Vec<Nav> {
        vec![
            Nav::Home,
            Nav::Library,
            Nav::SearchResults("nina simone".into()),
            Nav::SignIn,
            Nav::SignUp,
        ]
    }

    #[test]
    fn unauthenticated_navigation_redirects_to_sign_in() {
        for nav in all_navs() {
            let expected = match nav {
                Nav::SignIn | Nav::SignUp => RouteDecision::Render(nav.clone()),
                _ => RouteDecision::RedirectToSignIn,
            };
            assert_eq!(RouteGuard::evaluate(&nav, false), expected);
        }
    }

    #[test]
    fn authenticated_navigation_redirects_away_from_auth_entries() {
        for nav in all_navs() {
            let expected = match nav {
                Nav::SignIn | Nav::SignUp => RouteDecision::RedirectToHome,
                _ => RouteDecision::Render(nav.clone()),
            };
            assert_eq!(RouteGuard::evaluate(&nav, true), expected);
        }
    }

    #[test]
    fn redirect_targets_render_without_further_redirects() {
        for authenticated in [false, true] {
            for nav in all_navs() {
                let landed = match RouteGuard::evaluate(&nav, authenticated) {
                    RouteDecision::Render(nav) => nav,
                    RouteDecision::RedirectToSignIn => Nav::SignIn,
                    RouteDecision::RedirectToHome => Nav::Home,
                };
                assert_eq!(
                    RouteGuard::evaluate(&landed, authenticated),
                    RouteDecision::Render(landed.clone()),
                );
            }
        }
    }

    #[derive(Default)]
    struct StaticBackend {
        dispatcher: SessionDispatcher,
    }

    impl AuthBackend for StaticBackend {
        fn get_session(&self) -> Option<Session> {
            None
        }

        fn on_session_change(&self, callback: SessionCallback) -> Subscription {
            self.dispatcher.subscribe(callback)
        }

        fn sign_in_with_password(&self, _email: &str, _password: &str) -> Result<(), Error> {
            Ok(())
        }

        fn sign_up(&self, _email: &str, _password: &str) -> Result<(), Error> {
            Ok(())
        }

        fn sign_out(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn sign_in_event_turns_redirects_into_renders() {
        let backend = Arc::new(StaticBackend::default());
        let store = SessionStore::new(backend.clone());
        let guard = RouteGuard::new(store.clone());

        store.initialize();
        assert_eq!(guard.decide(&Nav::Library), RouteDecision::RedirectToSignIn);
        assert_eq!(guard.resolve(&Nav::Library), Nav::SignIn);

        let session = Session {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: i64::MAX,
            user: UserProfile {
                id: "user-1".into(),
                email: None,
            },
        };
        backend.dispatcher.emit(AuthEvent::SignedIn, Some(&session));

        assert_eq!(
            guard.decide(&Nav::Library),
            RouteDecision::Render(Nav::Library)
        );
        assert_eq!(guard.decide(&Nav::SignIn), RouteDecision::RedirectToHome);
        store.teardown();
    }
}
