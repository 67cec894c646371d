use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::ObjRef;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum NamingError {
    #[error("name `{name}` is not bound")]
    #[diagnostic(code(platform::name_not_found))]
    NotFound { name: String },

    #[error("name `{name}` is already bound")]
    #[diagnostic(code(platform::name_already_bound))]
    AlreadyBound { name: String },

    #[error("naming context has been destroyed")]
    #[diagnostic(code(platform::context_destroyed))]
    Destroyed,

    #[error("naming context is not empty")]
    #[diagnostic(code(platform::context_not_empty))]
    NotEmpty,
}

/// One level of the hierarchical naming service.
pub trait NamingContext: Send + Sync {
    fn bind(&self, name: &str, object: ObjRef) -> Result<(), NamingError>;

    fn resolve(&self, name: &str) -> Result<ObjRef, NamingError>;

    fn is_bound(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    fn bind_new_context(&self, name: &str) -> Result<Arc<dyn NamingContext>, NamingError>;

    fn unbind(&self, name: &str) -> Result<(), NamingError>;

    /// Removes every binding in this context, leaving the context itself
    /// alive.
    fn unbind_all(&self) -> Result<(), NamingError>;

    fn destroy(&self) -> Result<(), NamingError>;
}
