use std::sync::Arc;

use chrono::Utc;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::auth::{Permission, Role, User};
use crate::db;
use crate::error::AppError;
use crate::models::{EnrollmentStatus, Member};
use crate::notify::Notifier;

/// A guard failure, reported to the caller as a stable machine-readable
/// code. The client maps codes to localized prose; the code is the
/// contract, the message is a courtesy.
#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("An active subscription is required to enroll")]
    NoSubscription,

    #[error("Group not found")]
    GroupNotFound,

    #[error("You were removed from this group by the coach")]
    RemovedByCoach,

    #[error("Already enrolled")]
    AlreadyEnrolled,

    #[error("No places left")]
    NoCapacity,

    #[error("No active enrollment found")]
    NotEnrolled,

    #[error("Scheduled session not found")]
    SlotNotFound,

    #[error("Group not found or not owned by you")]
    NotFoundOrForbidden,

    #[error("You don't have permission to perform this action")]
    Forbidden,

    #[error("Internal server error")]
    Db(#[source] AppError),
}

impl From<AppError> for EnrollmentError {
    fn from(err: AppError) -> Self {
        EnrollmentError::Db(err)
    }
}

impl EnrollmentError {
    pub fn code(&self) -> &'static str {
        match self {
            EnrollmentError::NoSubscription => "NO_SUBSCRIPTION",
            EnrollmentError::GroupNotFound => "GROUP_NOT_FOUND",
            EnrollmentError::RemovedByCoach => "REMOVED_BY_COACH",
            EnrollmentError::AlreadyEnrolled => "ALREADY_ENROLLED",
            EnrollmentError::NoCapacity => "NO_CAPACITY",
            EnrollmentError::NotEnrolled => "NOT_ENROLLED",
            EnrollmentError::SlotNotFound => "SCHEDULE_NOT_FOUND",
            EnrollmentError::NotFoundOrForbidden => "NOT_FOUND_OR_FORBIDDEN",
            EnrollmentError::Forbidden => "FORBIDDEN",
            EnrollmentError::Db(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            EnrollmentError::NoSubscription
            | EnrollmentError::AlreadyEnrolled
            | EnrollmentError::NoCapacity => Status::BadRequest,
            EnrollmentError::RemovedByCoach | EnrollmentError::Forbidden => Status::Forbidden,
            EnrollmentError::GroupNotFound
            | EnrollmentError::NotEnrolled
            | EnrollmentError::SlotNotFound
            | EnrollmentError::NotFoundOrForbidden => Status::NotFound,
            EnrollmentError::Db(_) => Status::InternalServerError,
        }
    }
}

#[derive(Serialize)]
pub struct EnrollmentErrorBody {
    #[serde(rename = "errorCode")]
    pub error_code: &'static str,
    pub message: String,
}

impl<'r> rocket::response::Responder<'r, 'static> for EnrollmentError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        match &self {
            EnrollmentError::Db(err) => {
                err.log_and_record(&format!("Request to {} {}", req.method(), req.uri()));
            }
            other => {
                warn!(code = other.code(), "Enrollment request rejected");
            }
        }

        let body = Json(EnrollmentErrorBody {
            error_code: self.code(),
            message: self.to_string(),
        });

        Custom(self.status_code(), body).respond_to(req)
    }
}

/// Decides whether an enrollment transition is legal and applies it.
///
/// Holds an explicitly injected pool handle and a notifier hook; the
/// notifier runs after the status write and its failures are logged,
/// never surfaced.
pub struct EnrollmentEngine {
    pool: Pool<Sqlite>,
    notifier: Arc<dyn Notifier>,
}

impl EnrollmentEngine {
    pub fn new(pool: Pool<Sqlite>, notifier: Arc<dyn Notifier>) -> Self {
        Self { pool, notifier }
    }

    async fn require_entitlement(&self, user_id: i64) -> Result<(), EnrollmentError> {
        let now = Utc::now();
        let subscriptions = db::get_user_subscriptions(&self.pool, user_id).await?;
        if subscriptions.iter().any(|s| s.is_entitled(now)) {
            Ok(())
        } else {
            Err(EnrollmentError::NoSubscription)
        }
    }

    async fn fire_notification(&self, user_id: i64, title: &str, message: &str) {
        if let Err(err) = self.notifier.notify(user_id, title, message).await {
            err.log_and_record("enrollment notification");
        }
    }

    /// Guards run in order; the first failure wins. On success a
    /// `cancelled` row is reactivated with today's date, otherwise a
    /// fresh `active` row is inserted.
    #[instrument(skip(self))]
    pub async fn enroll_in_group(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> Result<(), EnrollmentError> {
        self.require_entitlement(user_id).await?;

        let group = db::find_group(&self.pool, group_id)
            .await?
            .ok_or(EnrollmentError::GroupNotFound)?;

        let existing = db::get_group_enrollment(&self.pool, user_id, group_id).await?;
        match existing.as_ref().map(|e| e.status) {
            Some(EnrollmentStatus::RemovedByCoach) => return Err(EnrollmentError::RemovedByCoach),
            Some(EnrollmentStatus::Active) => return Err(EnrollmentError::AlreadyEnrolled),
            _ => {}
        }

        // The count and the write below are separate statements with no
        // surrounding transaction; two concurrent enrolls can both pass
        // this check and push the group past capacity.
        let active = db::count_active_group_enrollments(&self.pool, group_id).await?;
        if active >= group.capacity {
            return Err(EnrollmentError::NoCapacity);
        }

        let today = Utc::now().date_naive();
        match existing {
            Some(enrollment) => {
                db::reactivate_group_enrollment(&self.pool, enrollment.id, today).await?;
            }
            None => {
                db::insert_group_enrollment(&self.pool, user_id, group_id, today).await?;
            }
        }

        info!(user_id, group_id, "User enrolled in group");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn cancel_group_enrollment(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> Result<(), EnrollmentError> {
        let enrollment = db::get_group_enrollment(&self.pool, user_id, group_id)
            .await?
            .filter(|e| e.status == EnrollmentStatus::Active)
            .ok_or(EnrollmentError::NotEnrolled)?;

        db::set_group_enrollment_status(&self.pool, enrollment.id, EnrollmentStatus::Cancelled)
            .await?;

        let group_name = db::find_group(&self.pool, group_id)
            .await?
            .map(|g| g.name)
            .unwrap_or_else(|| format!("group {}", group_id));

        self.fire_notification(
            user_id,
            "Enrollment cancelled",
            &format!("Your enrollment in {} has been cancelled.", group_name),
        )
        .await;

        info!(user_id, group_id, "User cancelled group enrollment");
        Ok(())
    }

    /// Coach-initiated removal. The target row moves to the terminal
    /// `removed_by_coach` status; the enroll guard permanently rejects
    /// the pair afterwards.
    #[instrument(skip(self))]
    pub async fn remove_group_member(
        &self,
        coach_id: i64,
        group_id: i64,
        member_id: i64,
    ) -> Result<(), EnrollmentError> {
        let group = db::find_group_owned_by(&self.pool, group_id, coach_id)
            .await?
            .ok_or(EnrollmentError::NotFoundOrForbidden)?;

        let enrollment = db::get_group_enrollment(&self.pool, member_id, group_id)
            .await?
            .filter(|e| e.status == EnrollmentStatus::Active)
            .ok_or(EnrollmentError::NotEnrolled)?;

        db::set_group_enrollment_status(
            &self.pool,
            enrollment.id,
            EnrollmentStatus::RemovedByCoach,
        )
        .await?;

        self.fire_notification(
            member_id,
            "Removed from group",
            &format!("The coach has removed you from {}.", group.name),
        )
        .await;

        info!(coach_id, group_id, member_id, "Coach removed group member");
        Ok(())
    }

    /// Admins may list any group, coaches only a group they own.
    #[instrument(skip(self, caller), fields(caller_id = caller.id))]
    pub async fn group_members(
        &self,
        caller: &User,
        group_id: i64,
    ) -> Result<Vec<Member>, EnrollmentError> {
        if caller.has_permission(Permission::ViewAllGroupMembers) {
            db::find_group(&self.pool, group_id)
                .await?
                .ok_or(EnrollmentError::GroupNotFound)?;
        } else if caller.role == Role::Coach
            && caller.has_permission(Permission::ViewOwnGroupMembers)
        {
            db::find_group_owned_by(&self.pool, group_id, caller.id)
                .await?
                .ok_or(EnrollmentError::Forbidden)?;
        } else {
            return Err(EnrollmentError::Forbidden);
        }

        Ok(db::get_active_group_members(&self.pool, group_id).await?)
    }

    /// Schedule-slot mirror of [`enroll_in_group`]. Slots have no
    /// coach-removal path, so only `active` and `cancelled` occur here.
    #[instrument(skip(self))]
    pub async fn enroll_in_slot(
        &self,
        user_id: i64,
        schedule_id: i64,
    ) -> Result<(), EnrollmentError> {
        self.require_entitlement(user_id).await?;

        let slot = db::find_schedule_slot(&self.pool, schedule_id)
            .await?
            .ok_or(EnrollmentError::SlotNotFound)?;

        let existing = db::get_slot_enrollment(&self.pool, user_id, schedule_id).await?;
        if existing
            .as_ref()
            .is_some_and(|e| e.status == EnrollmentStatus::Active)
        {
            return Err(EnrollmentError::AlreadyEnrolled);
        }

        // Same unguarded count-then-write sequence as the group path.
        let active = db::count_active_slot_enrollments(&self.pool, schedule_id).await?;
        if active >= slot.capacity {
            return Err(EnrollmentError::NoCapacity);
        }

        let today = Utc::now().date_naive();
        match existing {
            Some(enrollment) => {
                db::reactivate_slot_enrollment(&self.pool, enrollment.id, today).await?;
            }
            None => {
                db::insert_slot_enrollment(&self.pool, user_id, schedule_id, today).await?;
            }
        }

        info!(user_id, schedule_id, "User enrolled in schedule slot");
        Ok(())
    }

    /// Slot cancellation does not notify the user; only the group path
    /// does.
    #[instrument(skip(self))]
    pub async fn cancel_slot_enrollment(
        &self,
        user_id: i64,
        schedule_id: i64,
    ) -> Result<(), EnrollmentError> {
        let enrollment = db::get_slot_enrollment(&self.pool, user_id, schedule_id)
            .await?
            .filter(|e| e.status == EnrollmentStatus::Active)
            .ok_or(EnrollmentError::NotEnrolled)?;

        db::set_slot_enrollment_status(&self.pool, enrollment.id, EnrollmentStatus::Cancelled)
            .await?;

        info!(user_id, schedule_id, "User cancelled schedule enrollment");
        Ok(())
    }
}
