//! Account management module.
//!
//! Provides the account model, validation and `SQLite` storage.

mod model;
mod repository;
mod validation;

pub use model::{
    Account, AccountId, AuthMethod, ImapConfig, OAuthTokens, Security, SmtpConfig, UserId, Vendor,
};
pub use repository::{AccountStore, SqliteAccountRepository};
pub use validation::{ValidationError, ValidationResult, validate_account};
