//! The authentication collaborator.

use crate::model::OwnerRef;

/// Resolves the caller the storage service acts for.
///
/// Used by [`StorageService::for_current_user`](crate::StorageService::for_current_user).
pub trait IdentityProvider: Send + Sync {
    /// The authenticated user, if any.
    fn current_user(&self) -> Option<OwnerRef>;
}

impl<F> IdentityProvider for F
where
    F: Fn() -> Option<OwnerRef> + Send + Sync,
{
    fn current_user(&self) -> Option<OwnerRef> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_provider() {
        let provider = || Some(OwnerRef::user(5));
        assert_eq!(provider.current_user(), Some(OwnerRef::user(5)));

        let anonymous = || None::<OwnerRef>;
        assert_eq!(anonymous.current_user(), None);
    }
}
