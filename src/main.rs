#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod db;
mod enrollment;
mod error;
mod models;
mod notify;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use std::sync::Arc;

use api::{
    api_cancel_group_enrollment, api_cancel_slot_enrollment, api_create_group, api_create_slot,
    api_enroll_in_group, api_enroll_in_slot, api_get_groups, api_get_notifications,
    api_get_schedule, api_get_subscriptions, api_group_members, api_login, api_logout,
    api_mark_notification_read, api_me, api_me_unauthorized, api_purchase_subscription,
    api_register_user, api_remove_group_member, health,
};
use auth::{forbidden_api, unauthorized_api};
use db::clean_expired_sessions;
use enrollment::EnrollmentEngine;
use error::AppError;
use notify::SqlNotifier;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, tokio};
use telemetry::TelemetryFairing;
use telemetry::init_tracing;
use thiserror::Error;

use sqlx::SqlitePool;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Figment(rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(value)
    }
}

#[launch]
async fn rocket() -> _ {
    init_tracing();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_default();

    let pool = SqlitePool::connect(&database_url)
        .await
        .expect("Failed to connect to SQLite database");

    let pool_clone = pool.clone();

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    init_rocket(pool).await
}

pub async fn init_rocket(pool: SqlitePool) -> Rocket<Build> {
    info!("Starting pool facility backend");

    let notifier = Arc::new(SqlNotifier::new(pool.clone()));
    let engine = EnrollmentEngine::new(pool.clone(), notifier);

    rocket::build()
        .manage(pool)
        .manage(engine)
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                api_me_unauthorized,
                api_register_user,
                api_get_groups,
                api_create_group,
                api_enroll_in_group,
                api_cancel_group_enrollment,
                api_group_members,
                api_remove_group_member,
                api_get_schedule,
                api_create_slot,
                api_enroll_in_slot,
                api_cancel_slot_enrollment,
                api_get_subscriptions,
                api_purchase_subscription,
                api_get_notifications,
                api_mark_notification_read,
            ],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
        .attach(AdHoc::on_shutdown("Telemetry shutdown", |_| {
            Box::pin(async {
                telemetry::shutdown_telemetry();
            })
        }))
}
