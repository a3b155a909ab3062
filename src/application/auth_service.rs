// Login stub - checks configured accounts and hands out the static token
use crate::domain::user::{Credentials, Session, User};
use crate::infrastructure::config::AuthSettings;

#[derive(Debug, Clone)]
pub struct AuthService {
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(settings: AuthSettings) -> Self {
        Self { settings }
    }

    pub fn login(&self, credentials: &Credentials) -> Option<Session> {
        let account = self
            .settings
            .accounts
            .iter()
            .find(|a| a.username == credentials.username && a.password == credentials.password)?;

        tracing::info!(username = %account.username, "Login succeeded");
        Some(Session {
            success: true,
            user: User {
                id: account.id,
                username: account.username.clone(),
                role: account.role,
                name: account.name.clone(),
            },
            token: self.settings.token.clone(),
        })
    }

    /// Resolve a bearer token. Every account shares the one configured token,
    /// so it maps to the first account.
    pub fn user_for_token(&self, token: &str) -> Option<User> {
        if token != self.settings.token {
            return None;
        }
        self.settings.accounts.first().map(|account| User {
            id: account.id,
            username: account.username.clone(),
            role: account.role,
            name: account.name.clone(),
        })
    }
}
