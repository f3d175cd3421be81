use std::sync::Arc;
use tracing::instrument;

use crate::errors::ServiceError;
use crate::models::session::Session;
use crate::repositories::SessionRepository;

/// Single point of session mutation. Callers own the returned record
/// exclusively until it is saved back; the dispatcher enforces that with the
/// per-customer keyed lock.
#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
}

impl SessionStore {
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }

    /// Loads the customer's session, creating a fresh one on first contact.
    #[instrument(skip(self))]
    pub async fn get(&self, customer_id: &str) -> Result<Session, ServiceError> {
        Ok(self
            .repo
            .load_session(customer_id)
            .await?
            .unwrap_or_default())
    }

    #[instrument(skip(self, session))]
    pub async fn save(&self, customer_id: &str, session: &Session) -> Result<(), ServiceError> {
        self.repo.save_session(customer_id, session).await
    }
}
