//! # mailbridge-oauth
//!
//! `OAuth2` token refresh and SASL helpers for IMAP/SMTP.
//!
//! ## Features
//!
//! - **Token refresh**: exchange a stored refresh token for a new access token
//! - **Provider configurations**: token endpoints for Google and Microsoft
//! - **SASL mechanisms**: PLAIN (RFC 4616), XOAUTH2 and OAUTHBEARER (RFC 7628)
//!
//! Authorization itself (consent screens, redirect handling) happens outside
//! mailbridge; this crate only keeps already-granted tokens fresh.
//!
//! ## Token Refresh
//!
//! ```ignore
//! use mailbridge_oauth::{OAuthClient, Provider, Token};
//!
//! let client = OAuthClient::new("client-id", Provider::microsoft()?)?
//!     .with_client_secret("secret");
//! let stored = Token::bearer("old").with_refresh_token("refresh");
//! let fresh = client.refresh_token(&stored).await?;
//! ```
//!
//! ## Using with IMAP/SMTP
//!
//! ```ignore
//! use mailbridge_oauth::sasl::Mechanism;
//!
//! let initial = Mechanism::XOAuth2.initial_response("user@outlook.com", &fresh.access_token);
//! // Send: AUTH XOAUTH2 {initial}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod error;
pub mod provider;
pub mod sasl;
pub mod token;

pub use client::OAuthClient;
pub use error::{Error, Result};
pub use provider::Provider;
pub use token::Token;
