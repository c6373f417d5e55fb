use std::error;

/// Failure reported by a collaborator the crate does not own, e.g. a [`crate::Wallet`].
pub type ImplementationError = Box<dyn error::Error + Send + Sync>;
