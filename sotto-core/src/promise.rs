use crate::error::Error;

/// State of a view-local asynchronous value.  `D` is the deferral token the
/// request was started with; a completion is applied only while the promise
/// is still deferred with an equal token, so results of superseded requests
/// fall through.
#[derive(Clone, Debug)]
pub enum Promise<T, D = (), E = Error> {
    Empty,
    Deferred(D),
    Resolved(T),
    Rejected(E),
}

#[derive(Eq, PartialEq, Debug)]
pub enum PromiseState {
    Empty,
    Deferred,
    Resolved,
    Rejected,
}

impl<T, D, E> Promise<T, D, E> {
    pub fn state(&self) -> PromiseState {
        match self {
            Self::Empty => PromiseState::Empty,
            Self::Deferred(_) => PromiseState::Deferred,
            Self::Resolved(_) => PromiseState::Resolved,
            Self::Rejected(_) => PromiseState::Rejected,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn is_deferred(&self, def: &D) -> bool
    where
        D: PartialEq,
    {
        matches!(self, Self::Deferred(d) if d == def)
    }

    pub fn resolved(&self) -> Option<&T> {
        match self {
            Self::Resolved(val) => Some(val),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::Empty;
    }

    pub fn defer(&mut self, def: D) {
        *self = Self::Deferred(def);
    }

    pub fn resolve(&mut self, val: T) {
        *self = Self::Resolved(val);
    }

    pub fn reject(&mut self, err: E) {
        *self = Self::Rejected(err);
    }

    pub fn resolve_or_reject(&mut self, res: Result<T, E>) {
        *self = match res {
            Ok(ok) => Self::Resolved(ok),
            Err(err) => Self::Rejected(err),
        };
    }

    pub fn update(&mut self, (def, res): (D, Result<T, E>))
    where
        D: PartialEq,
    {
        if self.is_deferred(&def) {
            self.resolve_or_reject(res);
        }
    }
}

impl<T, D: Default, E> Promise<T, D, E> {
    pub fn defer_default(&mut self) {
        *self = Self::Deferred(D::default())
    }
}

impl<T, D, E> Default for Promise<T, D, E> {
    fn default() -> Self {
        Self::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_applies_only_to_the_matching_deferral() {
        let mut promise: Promise<&str, u64, &str> = Promise::Empty;
        promise.defer(2);

        promise.update((1, Ok("stale")));
        assert_eq!(promise.state(), PromiseState::Deferred);

        promise.update((2, Ok("fresh")));
        assert_eq!(promise.resolved(), Some(&"fresh"));
    }

    #[test]
    fn update_does_not_disturb_a_settled_promise() {
        let mut promise: Promise<&str, u64, &str> = Promise::Empty;
        promise.defer(1);
        promise.update((1, Ok("first")));

        promise.update((1, Ok("second")));
        assert_eq!(promise.resolved(), Some(&"first"));
    }

    #[test]
    fn rejection_is_recorded() {
        let mut promise: Promise<&str, u64, &str> = Promise::Empty;
        promise.defer(7);
        promise.update((7, Err("nope")));
        assert!(promise.is_rejected());
        assert!(promise.resolved().is_none());
    }
}
