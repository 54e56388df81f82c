use std::sync::Arc;

use sqlx::SqlitePool;

use crate::{
    catalog::SqliteCatalog,
    config::Config,
    dispatch::{
        Dispatcher,
        mailer::{LogMailer, Mailer},
    },
    enrollment::EnrollmentService,
    notification::NotificationStore,
    realtime::RealtimeHub,
};

/// Shared state behind every handler and the admin CLI.
pub struct Server {
    pub database: SqlitePool,
    pub enrollments: EnrollmentService,
    pub notifications: NotificationStore,
    pub realtime: Arc<RealtimeHub>,
}

impl Server {
    /// Wire the services over one pool, delivering email through the log.
    pub fn new(database: SqlitePool, config: &Config) -> Self {
        Self::with_mailer(database, Arc::new(LogMailer::new(config.mail.clone())))
    }

    pub fn with_mailer(database: SqlitePool, mailer: Arc<dyn Mailer>) -> Self {
        let catalog = Arc::new(SqliteCatalog::new(database.clone()));
        let realtime = Arc::new(RealtimeHub::default());
        let notifications = NotificationStore::new(database.clone(), realtime.clone());
        let dispatcher = Dispatcher::new(
            catalog.clone(),
            catalog.clone(),
            Arc::new(notifications.clone()),
            mailer,
            realtime.clone(),
        );
        let enrollments = EnrollmentService::new(database.clone(), catalog, dispatcher);
        Self {
            database,
            enrollments,
            notifications,
            realtime,
        }
    }

    /// Wait for in-flight side effects, used on shutdown.
    pub async fn shutdown(&self) {
        let pending = self.enrollments.dispatcher().pending();
        if pending > 0 {
            tracing::info!(pending, "waiting for side effects");
        }
        self.enrollments.dispatcher().flush().await;
    }
}
