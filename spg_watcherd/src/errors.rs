use storefront_payment_engine::StorefrontError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherdError {
    #[error("Could not initialize the daemon. {0}")]
    InitializeError(String),
    #[error("Database error. {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Could not apply database migrations. {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Engine error. {0}")]
    EngineError(#[from] StorefrontError),
    #[error("An I/O error happened in the daemon. {0}")]
    IOError(#[from] std::io::Error),
}
