//! Transaction options and request methods.

use std::fmt;
use std::str::FromStr;

use crate::storage::UserId;
use crate::transaction::context::Context;
use crate::transaction::error::TransactionError;

/// HTTP request method of the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Methods that imply a read-write transaction.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch | Method::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Method {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(TransactionError::UnknownMethod(s.to_string())),
        }
    }
}

/// Options of a wrapped unit of work.
///
/// Every field is optional: `readonly` wins over `method`, and with
/// neither the transaction is read-only. A missing `user` means the
/// configured default principal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxOptions {
    pub readonly: Option<bool>,
    pub user: Option<UserId>,
    pub context: Option<Context>,
    pub method: Option<Method>,
}

impl TxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_only() -> Self {
        Self {
            readonly: Some(true),
            ..Default::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            readonly: Some(false),
            ..Default::default()
        }
    }

    /// Options inferring the mode from a request method.
    pub fn for_method(method: Method) -> Self {
        Self {
            method: Some(method),
            ..Default::default()
        }
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = Some(readonly);
        self
    }

    pub fn user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Whether any option is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Effective mode of the transaction.
    pub fn resolve_readonly(&self) -> bool {
        match (self.readonly, self.method) {
            (Some(readonly), _) => readonly,
            (None, Some(method)) => !method.is_mutating(),
            (None, None) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_inference() {
        assert!(TxOptions::new().resolve_readonly());
        assert!(TxOptions::for_method(Method::Get).resolve_readonly());
        assert!(TxOptions::for_method(Method::Head).resolve_readonly());
        assert!(!TxOptions::for_method(Method::Post).resolve_readonly());
        assert!(!TxOptions::for_method(Method::Delete).resolve_readonly());
    }

    #[test]
    fn test_explicit_mode_wins() {
        assert!(TxOptions::for_method(Method::Post).readonly(true).resolve_readonly());
        assert!(!TxOptions::for_method(Method::Get).readonly(false).resolve_readonly());
        assert!(!TxOptions::read_write().resolve_readonly());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert_eq!(Method::Put.to_string(), "PUT");
        assert!("BREW".parse::<Method>().is_err());
    }

    #[test]
    fn test_is_empty() {
        assert!(TxOptions::default().is_empty());
        assert!(!TxOptions::new().user(UserId::new(2)).is_empty());
    }
}
