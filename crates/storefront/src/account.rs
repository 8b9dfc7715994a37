//! Buyer account and wishlist.
//!
//! Two ways in:
//!
//! - [`Account::sign_up`] / [`Account::sign_in`] go through the service's
//!   account endpoints and keep the issued bearer tokens in memory.
//! - [`Account::register`] / [`Account::login`] only record who the buyer is,
//!   for hosts running without an account backend.
//!
//! Either way the signed-in buyer pre-fills checkout and is attached to
//! Sentry events. Tokens are never serialized.

use bioapp_core::{Email, EmailError, ProductId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::api::{AccountApi, ApiError, AuthTokens, PasswordReset, Registration};
use crate::error::{clear_sentry_user, set_sentry_user};
use crate::notify::Toast;

/// Display name for buyers who signed in without registering.
pub const DEFAULT_DISPLAY_NAME: &str = "Customer";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    #[error("Name cannot be empty")]
    EmptyName,

    #[error("Missing {0}")]
    MissingField(&'static str),

    #[error("Passwords do not match")]
    PasswordMismatch,

    /// The service refused the request (bad credentials, taken email,
    /// expired reset link...).
    #[error("Rejected ({status}): {}", .detail.as_deref().unwrap_or("no detail provided"))]
    Rejected { status: u16, detail: Option<String> },

    /// The service could not be reached or answered garbage.
    #[error("Account service unavailable: {0}")]
    Unavailable(String),
}

impl From<ApiError> for AccountError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Status { status, detail } => Self::Rejected { status, detail },
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl AccountError {
    /// Message shown when an account action fails.
    #[must_use]
    pub fn toast(&self) -> Toast {
        match self {
            Self::InvalidEmail(_) => Toast::warning("Please enter a valid email address"),
            Self::EmptyName => Toast::warning("Please enter your name"),
            Self::MissingField(field) => Toast::warning(format!("Please enter your {field}")),
            Self::PasswordMismatch => Toast::warning("Passwords do not match"),
            Self::Rejected { detail, .. } => {
                Toast::error(detail.clone().unwrap_or_else(|| "The request was rejected".to_string()))
            }
            Self::Unavailable(_) => Toast::error("Could not reach the server. Try again later."),
        }
    }
}

/// What the buyer typed on the sign-up form.
#[derive(Debug, Clone)]
pub struct SignUpForm {
    /// Falls back to the email when blank.
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: SecretString,
    pub password_confirmation: SecretString,
}

/// How far [`Account::sign_up`] got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// Registered and holding tokens.
    SignedIn,
    /// Registered, but tokens could not be obtained. The buyer signs in by hand.
    Registered,
}

impl SignUpOutcome {
    #[must_use]
    pub fn toast(self) -> Toast {
        match self {
            Self::SignedIn => Toast::success("Account created. Welcome!"),
            Self::Registered => Toast::success("Account created. You can sign in now."),
        }
    }
}

/// The signed-in buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: Email,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    user: Option<User>,
    wishlist: Vec<ProductId>,
    #[serde(skip)]
    tokens: Option<AuthTokens>,
}

impl Account {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign up and sign in.
    ///
    /// # Errors
    ///
    /// Returns `AccountError` if the name is blank or the email is invalid.
    pub fn register(&mut self, name: &str, email: &str) -> Result<&User, AccountError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AccountError::EmptyName);
        }
        let email = Email::parse(email)?;
        Ok(self.set_user(
            User {
                name: name.to_string(),
                email,
            },
            None,
        ))
    }

    /// Sign in with an email only. The display name is the default.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::InvalidEmail` if the email is invalid.
    pub fn login(&mut self, email: &str) -> Result<&User, AccountError> {
        let email = Email::parse(email)?;
        Ok(self.set_user(
            User {
                name: DEFAULT_DISPLAY_NAME.to_string(),
                email,
            },
            None,
        ))
    }

    /// Create an account on the service, then sign in with the new
    /// credentials.
    ///
    /// A token failure after a successful registration is not an error: the
    /// account exists and the buyer can sign in later.
    ///
    /// # Errors
    ///
    /// Returns `AccountError` if the form is incomplete, the passwords
    /// differ, or the service refuses the registration.
    #[instrument(skip(self, api, form), fields(email = %form.email.trim()))]
    pub async fn sign_up<A: AccountApi>(
        &mut self,
        api: &A,
        form: &SignUpForm,
    ) -> Result<SignUpOutcome, AccountError> {
        let first_name = form.first_name.trim();
        if first_name.is_empty() {
            return Err(AccountError::EmptyName);
        }
        let email = Email::parse(&form.email)?;
        let password = form.password.expose_secret();
        if password.is_empty() {
            return Err(AccountError::MissingField("password"));
        }
        if password != form.password_confirmation.expose_secret() {
            return Err(AccountError::PasswordMismatch);
        }

        let username = match form.username.trim() {
            "" => email.as_str(),
            name => name,
        };
        let registration = Registration {
            username: username.to_string(),
            email,
            first_name: first_name.to_string(),
            last_name: form.last_name.trim().to_string(),
            password: form.password.clone(),
        };
        api.register(&registration).await.map_err(|e| {
            warn!(error = %e, "Registration refused");
            AccountError::from(e)
        })?;
        info!("Account registered");

        match api
            .obtain_tokens(registration.email.as_str(), &registration.password)
            .await
        {
            Ok(tokens) => {
                let name = format!("{} {}", registration.first_name, registration.last_name);
                self.set_user(
                    User {
                        name: name.trim().to_string(),
                        email: registration.email,
                    },
                    Some(tokens),
                );
                Ok(SignUpOutcome::SignedIn)
            }
            Err(e) => {
                warn!(error = %e, "Registered but could not obtain tokens");
                Ok(SignUpOutcome::Registered)
            }
        }
    }

    /// Sign in against the service with email and password.
    ///
    /// # Errors
    ///
    /// Returns `AccountError` if the email is invalid, the password is
    /// empty, or the service refuses the credentials.
    #[instrument(skip(self, api, password))]
    pub async fn sign_in<A: AccountApi>(
        &mut self,
        api: &A,
        email: &str,
        password: &SecretString,
    ) -> Result<&User, AccountError> {
        let email = Email::parse(email)?;
        if password.expose_secret().is_empty() {
            return Err(AccountError::MissingField("password"));
        }
        let tokens = api
            .obtain_tokens(email.as_str(), password)
            .await
            .map_err(|e| {
                warn!(error = %e, "Sign-in refused");
                AccountError::from(e)
            })?;
        Ok(self.set_user(
            User {
                name: DEFAULT_DISPLAY_NAME.to_string(),
                email,
            },
            Some(tokens),
        ))
    }

    /// Ask the service to email a password reset link.
    ///
    /// # Errors
    ///
    /// Returns `AccountError` if the email is invalid or the service refuses.
    pub async fn request_password_reset<A: AccountApi>(api: &A, email: &str) -> Result<(), AccountError> {
        let email = Email::parse(email)?;
        api.request_password_reset(&email).await?;
        info!(%email, "Password reset requested");
        Ok(())
    }

    /// Set a new password from a reset link's `uid` and `token`.
    ///
    /// # Errors
    ///
    /// Returns `AccountError` if a field is blank, the passwords differ, or
    /// the service refuses the link.
    pub async fn reset_password<A: AccountApi>(
        api: &A,
        uid: &str,
        token: &SecretString,
        new_password: &SecretString,
        confirmation: &SecretString,
    ) -> Result<(), AccountError> {
        let uid = uid.trim();
        if uid.is_empty() || token.expose_secret().trim().is_empty() {
            return Err(AccountError::MissingField("reset link"));
        }
        if new_password.expose_secret().is_empty() {
            return Err(AccountError::MissingField("new password"));
        }
        if new_password.expose_secret() != confirmation.expose_secret() {
            return Err(AccountError::PasswordMismatch);
        }

        let reset = PasswordReset {
            uid: uid.to_string(),
            token: token.clone(),
            new_password: new_password.clone(),
        };
        api.confirm_password_reset(&reset).await?;
        info!("Password reset");
        Ok(())
    }

    /// Bearer token for authenticated requests, if signed in through the
    /// service.
    #[must_use]
    pub fn access_token(&self) -> Option<&SecretString> {
        self.tokens.as_ref().map(|t| &t.access)
    }

    /// Sign out and drop any tokens. The wishlist is kept.
    pub fn logout(&mut self) {
        self.tokens = None;
        if self.user.take().is_some() {
            clear_sentry_user();
            info!("Buyer signed out");
        }
    }

    #[must_use]
    pub const fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    #[must_use]
    pub const fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }

    /// Add a product to the wishlist. Returns `false` if it was already there.
    pub fn wishlist_add(&mut self, product_id: ProductId) -> bool {
        if self.wishlist_contains(&product_id) {
            return false;
        }
        self.wishlist.push(product_id);
        true
    }

    /// Remove a product from the wishlist. Returns whether it was there.
    pub fn wishlist_remove(&mut self, product_id: &ProductId) -> bool {
        let before = self.wishlist.len();
        self.wishlist.retain(|id| id != product_id);
        self.wishlist.len() != before
    }

    #[must_use]
    pub fn wishlist_contains(&self, product_id: &ProductId) -> bool {
        self.wishlist.contains(product_id)
    }

    #[must_use]
    pub fn wishlist(&self) -> &[ProductId] {
        &self.wishlist
    }

    fn set_user(&mut self, user: User, tokens: Option<AuthTokens>) -> &User {
        set_sentry_user(user.email.as_str(), &user.name);
        info!(email = %user.email, with_tokens = tokens.is_some(), "Buyer signed in");
        self.tokens = tokens;
        self.user.insert(user)
    }
}
