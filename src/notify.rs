use sqlx::{Pool, Sqlite};

use crate::db::create_notification;
use crate::error::AppError;

/// Post-transition hook invoked by the enrollment engine after a status
/// write has landed. Implementations must be fire-and-forget from the
/// engine's point of view: a failed notification never fails the
/// transition that triggered it.
#[rocket::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i64, title: &str, message: &str) -> Result<(), AppError>;
}

/// Production notifier: inserts a row the user reads and acknowledges later.
pub struct SqlNotifier {
    pool: Pool<Sqlite>,
}

impl SqlNotifier {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl Notifier for SqlNotifier {
    async fn notify(&self, user_id: i64, title: &str, message: &str) -> Result<(), AppError> {
        create_notification(&self.pool, user_id, title, message).await?;
        Ok(())
    }
}
