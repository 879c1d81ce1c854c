use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Nav {
    Home,
    Library,
    SearchResults(Arc<str>),
    SignIn,
    SignUp,
}

impl Nav {
    pub fn title(&self) -> String {
        match self {
            Nav::Home => "Home".to_string(),
            Nav::Library => "Library".to_string(),
            Nav::SearchResults(query) => query.to_string(),
            Nav::SignIn => "Sign In".to_string(),
            Nav::SignUp => "Sign Up".to_string(),
        }
    }

    pub fn full_title(&self) -> String {
        match self {
            Nav::SearchResults(query) => format!("Search “{}”", query),
            _ => self.title(),
        }
    }

    /// Views behind the signed-in layout.  Only the auth entry points are
    /// reachable without a session.
    pub fn requires_auth(&self) -> bool {
        match self {
            Nav::Home | Nav::Library | Nav::SearchResults(_) => true,
            Nav::SignIn | Nav::SignUp => false,
        }
    }

    pub fn is_auth_entry(&self) -> bool {
        matches!(self, Nav::SignIn | Nav::SignUp)
    }
}
