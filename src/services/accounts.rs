use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::Store,
    error::{AppError, AppResult},
    models::{
        AccountToken, AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
        RegisterRequest, ResetPasswordRequest, Session, TokenPurpose, User, UserSummary,
    },
    services::mail::{activation_email, password_reset_email, Mailer},
};

const INVALID_CREDENTIALS: &str = "Incorrect email or password";

/// Security settings for account flows
#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub bcrypt_cost: u32,
    pub token_ttl: Duration,
    /// Base URL for links in emails, without a trailing slash
    pub public_url: String,
}

/// Registration, activation, login sessions and password management
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    settings: AccountSettings,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>, mailer: Arc<dyn Mailer>, settings: AccountSettings) -> Self {
        Self {
            store,
            mailer,
            settings: AccountSettings {
                public_url: settings.public_url.trim_end_matches('/').to_string(),
                ..settings
            },
        }
    }

    /// Creates an inactive account and emails its activation link
    pub async fn register(&self, request: RegisterRequest) -> AppResult<User> {
        request.validate()?;

        let email = normalize_email(&request.email);
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict(
                "A user with this email already exists".to_string(),
            ));
        }

        let user = User {
            uid: Uuid::new_v4(),
            name: request
                .name
                .map(|n| n.trim().to_string())
                .unwrap_or_default(),
            email,
            password_hash: self.hash_password(request.password).await?,
            is_active: false,
            is_admin: false,
            created_at: Utc::now(),
        };
        self.store.insert_user(&user).await?;

        let token = self.issue_token(user.uid, TokenPurpose::Activation).await?;
        let link = format!(
            "{}/api/v1/auth/active?token={}",
            self.settings.public_url, token
        );
        if let Err(e) = self.mailer.send(activation_email(&user.email, link)).await {
            tracing::warn!(
                user_uid = %user.uid,
                mailer = self.mailer.name(),
                error = %e,
                "Activation mail failed, rolling back registration"
            );
            self.store.delete_user(user.uid).await?;
            return Err(e);
        }

        tracing::info!(user_uid = %user.uid, email = %user.email, "User registered");
        Ok(user)
    }

    /// Activates the account owning `token`. Tokens are single use.
    pub async fn activate(&self, token: &str) -> AppResult<()> {
        let token = self
            .take_valid_token(token, TokenPurpose::Activation)
            .await
            .map_err(|e| match e {
                AppError::InvalidArgument(_) => {
                    AppError::InvalidArgument("Cannot active account".to_string())
                }
                other => other,
            })?;

        self.store.set_user_active(token.user_uid, true).await?;
        tracing::info!(user_uid = %token.user_uid, "User activated");
        Ok(())
    }

    /// Checks credentials and opens a session
    pub async fn login(&self, request: LoginRequest) -> AppResult<AuthResponse> {
        request.validate()?;

        let user = self
            .verify_credentials(&normalize_email(&request.email), request.password)
            .await?;
        if !user.is_active {
            return Err(AppError::Forbidden(
                "Account is not activated".to_string(),
            ));
        }

        let session = Session {
            token: new_token(),
            user_uid: user.uid,
            expires_at: Utc::now() + self.settings.token_ttl,
        };
        self.store.insert_session(&session).await?;

        tracing::info!(user_uid = %user.uid, "User logged in");
        Ok(AuthResponse {
            uid: user.uid,
            email: user.email,
            name: user.name,
            is_admin: user.is_admin,
            token: session.token,
        })
    }

    /// Resolves a session token to its active user
    pub async fn authenticate(&self, token: &str) -> AppResult<User> {
        let session = self
            .store
            .find_session(token)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))?;

        if session.expires_at <= Utc::now() {
            self.store.delete_session(token).await?;
            return Err(AppError::Unauthorized("Token has expired".to_string()));
        }

        match self.store.find_user(session.user_uid).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AppError::Unauthorized(
                "User inactive or deleted".to_string(),
            )),
        }
    }

    pub async fn logout(&self, token: &str) -> AppResult<()> {
        self.store.delete_session(token).await
    }

    /// Sets a new password after re-checking the current one
    pub async fn change_password(&self, user: &User, request: ChangePasswordRequest) -> AppResult<()> {
        request.validate()?;

        self.verify_credentials(&user.email, request.current_password)
            .await?;
        let hash = self.hash_password(request.new_password).await?;
        self.store.set_password_hash(user.uid, &hash).await?;

        tracing::info!(user_uid = %user.uid, "Password changed");
        Ok(())
    }

    /// Emails a reset link. Unknown addresses are silently ignored.
    pub async fn forgot_password(&self, request: ForgotPasswordRequest) -> AppResult<()> {
        request.validate()?;

        let email = normalize_email(&request.email);
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = self
            .issue_token(user.uid, TokenPurpose::PasswordReset)
            .await?;
        let link = format!("{}/reset-password?token={}", self.settings.public_url, token);
        self.mailer
            .send(password_reset_email(&user.email, link))
            .await?;

        tracing::info!(user_uid = %user.uid, "Password reset requested");
        Ok(())
    }

    /// Consumes a reset token, sets the password and closes all sessions
    pub async fn reset_password(&self, request: ResetPasswordRequest) -> AppResult<()> {
        request.validate()?;

        let token = self
            .take_valid_token(&request.token, TokenPurpose::PasswordReset)
            .await?;
        let hash = self.hash_password(request.new_password).await?;
        self.store.set_password_hash(token.user_uid, &hash).await?;
        self.store.delete_user_sessions(token.user_uid).await?;

        tracing::info!(user_uid = %token.user_uid, "Password reset");
        Ok(())
    }

    pub async fn list_users(&self) -> AppResult<Vec<UserSummary>> {
        let users = self.store.list_users().await?;
        Ok(users.iter().map(UserSummary::from).collect())
    }

    async fn issue_token(&self, user_uid: Uuid, purpose: TokenPurpose) -> AppResult<String> {
        let token = AccountToken {
            token: new_token(),
            user_uid,
            purpose,
            expires_at: Utc::now() + self.settings.token_ttl,
        };
        self.store.insert_token(&token).await?;
        Ok(token.token)
    }

    async fn take_valid_token(&self, token: &str, purpose: TokenPurpose) -> AppResult<AccountToken> {
        let invalid = || AppError::InvalidArgument("Invalid or expired token".to_string());
        let token = self
            .store
            .take_token(token, purpose)
            .await?
            .ok_or_else(invalid)?;
        if token.expires_at <= Utc::now() {
            return Err(invalid());
        }
        Ok(token)
    }

    async fn verify_credentials(&self, email: &str, password: String) -> AppResult<User> {
        let user = self
            .store
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| AppError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))??;

        if !matches {
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }
        Ok(user)
    }

    async fn hash_password(&self, password: String) -> AppResult<String> {
        let cost = self.settings.bcrypt_cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))??;
        Ok(hash)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::MemoryStore, services::mail::MockMailer};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    fn settings() -> AccountSettings {
        AccountSettings {
            bcrypt_cost: 4,
            token_ttl: Duration::hours(1),
            public_url: "http://books.test/".to_string(),
        }
    }

    /// Mailer mock that records every link it is asked to send
    fn recording_mailer(links: Arc<Mutex<Vec<String>>>) -> MockMailer {
        let mut mailer = MockMailer::new();
        mailer.expect_send().returning(move |email| {
            links.lock().unwrap().push(email.link);
            Ok(())
        });
        mailer.expect_name().return_const("mock");
        mailer
    }

    fn token_from(link: &str) -> String {
        link.rsplit("token=").next().unwrap().to_string()
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "correct horse".to_string(),
            name: Some("  Reader ".to_string()),
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn service(links: Arc<Mutex<Vec<String>>>) -> AccountService {
        AccountService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(recording_mailer(links)),
            settings(),
        )
    }

    #[tokio::test]
    async fn test_register_sends_activation_link() {
        let links = Arc::new(Mutex::new(Vec::new()));
        let accounts = service(links.clone());

        let user = accounts
            .register(register_request("Reader@Example.com"))
            .await
            .unwrap();

        assert_eq!(user.email, "reader@example.com");
        assert_eq!(user.name, "Reader");
        assert!(!user.is_active);
        let links = links.lock().unwrap();
        assert_eq!(links.len(), 1);
        assert!(links[0].starts_with("http://books.test/api/v1/auth/active?token="));
    }

    #[tokio::test]
    async fn test_register_retry_after_mail_failure() {
        let links = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut mailer = MockMailer::new();
        {
            let links = links.clone();
            let calls = calls.clone();
            mailer.expect_send().returning(move |email| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(AppError::ExternalApi("relay down".to_string()));
                }
                links.lock().unwrap().push(email.link);
                Ok(())
            });
        }
        mailer.expect_name().return_const("mock");
        let accounts = AccountService::new(Arc::new(MemoryStore::new()), Arc::new(mailer), settings());

        let err = accounts
            .register(register_request("reader@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalApi(_)));

        accounts
            .register(register_request("reader@example.com"))
            .await
            .unwrap();
        let token = token_from(&links.lock().unwrap()[0]);
        accounts.activate(&token).await.unwrap();
        tokio_test::assert_ok!(
            accounts
                .login(login_request("reader@example.com", "correct horse"))
                .await
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_bad_input() {
        let links = Arc::new(Mutex::new(Vec::new()));
        let accounts = service(links);

        accounts
            .register(register_request("reader@example.com"))
            .await
            .unwrap();
        let err = accounts
            .register(register_request("READER@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = accounts
            .register(RegisterRequest {
                email: "nope".to_string(),
                password: "x".to_string(),
                name: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref errors) if errors.len() == 2));
    }

    #[tokio::test]
    async fn test_login_requires_activation() {
        let links = Arc::new(Mutex::new(Vec::new()));
        let accounts = service(links.clone());
        accounts
            .register(register_request("reader@example.com"))
            .await
            .unwrap();

        let err = accounts
            .login(login_request("reader@example.com", "correct horse"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let token = token_from(&links.lock().unwrap()[0]);
        accounts.activate(&token).await.unwrap();
        let err = accounts.activate(&token).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let auth = accounts
            .login(login_request("reader@example.com", "correct horse"))
            .await
            .unwrap();
        let user = accounts.authenticate(&auth.token).await.unwrap();
        assert_eq!(user.uid, auth.uid);

        accounts.logout(&auth.token).await.unwrap();
        tokio_test::assert_err!(accounts.authenticate(&auth.token).await);
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let links = Arc::new(Mutex::new(Vec::new()));
        let accounts = service(links);
        let err = accounts
            .login(login_request("ghost@example.com", "whatever"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_password_reset_flow_closes_sessions() {
        let links = Arc::new(Mutex::new(Vec::new()));
        let accounts = service(links.clone());
        accounts
            .register(register_request("reader@example.com"))
            .await
            .unwrap();
        let activation = token_from(&links.lock().unwrap()[0]);
        accounts.activate(&activation).await.unwrap();
        let auth = accounts
            .login(login_request("reader@example.com", "correct horse"))
            .await
            .unwrap();

        accounts
            .forgot_password(ForgotPasswordRequest {
                email: "reader@example.com".to_string(),
            })
            .await
            .unwrap();
        let reset = token_from(&links.lock().unwrap()[1]);
        accounts
            .reset_password(ResetPasswordRequest {
                token: reset,
                new_password: "battery staple".to_string(),
            })
            .await
            .unwrap();

        tokio_test::assert_err!(accounts.authenticate(&auth.token).await);
        tokio_test::assert_err!(
            accounts
                .login(login_request("reader@example.com", "correct horse"))
                .await
        );
        tokio_test::assert_ok!(
            accounts
                .login(login_request("reader@example.com", "battery staple"))
                .await
        );
    }

    #[tokio::test]
    async fn test_forgot_password_for_unknown_email_sends_nothing() {
        let mut mailer = MockMailer::new();
        mailer.expect_send().never();
        let accounts = AccountService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(mailer),
            settings(),
        );

        tokio_test::assert_ok!(
            accounts
                .forgot_password(ForgotPasswordRequest {
                    email: "ghost@example.com".to_string(),
                })
                .await
        );
    }
}
