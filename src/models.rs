use anyhow::Error;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Status of one user's relationship to one group or scheduled slot.
///
/// `RemovedByCoach` is terminal: nothing transitions out of it, and the
/// enroll guard rejects any pair that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnrollmentStatus {
    Active,
    Cancelled,
    RemovedByCoach,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Cancelled => "cancelled",
            EnrollmentStatus::RemovedByCoach => "removed_by_coach",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "cancelled" => Ok(EnrollmentStatus::Cancelled),
            "removed_by_coach" => Ok(EnrollmentStatus::RemovedByCoach),
            _ => Err(Error::msg(format!("Unknown enrollment status: {}", s))),
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub capacity: i64,
    pub coach_id: i64,
    pub pool_id: i64,
    pub coach_name: String, // Denormalized for convenience
    pub pool_name: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbGroup {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub capacity: Option<i64>,
    pub coach_id: Option<i64>,
    pub pool_id: Option<i64>,
    pub coach_name: Option<String>,
    pub pool_name: Option<String>,
}

impl From<DbGroup> for Group {
    fn from(group: DbGroup) -> Self {
        Self {
            id: group.id.unwrap_or_default(),
            name: group.name.unwrap_or_default(),
            category: group.category.unwrap_or_default(),
            capacity: group.capacity.unwrap_or_default(),
            coach_id: group.coach_id.unwrap_or_default(),
            pool_id: group.pool_id.unwrap_or_default(),
            coach_name: group.coach_name.unwrap_or_default(),
            pool_name: group.pool_name.unwrap_or_default(),
        }
    }
}

#[derive(Serialize, Clone)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub target_id: i64,
    pub status: EnrollmentStatus,
    pub enrollment_date: NaiveDate,
}

/// Row shape shared by `group_enrollments` and `schedule_enrollments`; the
/// target column is aliased to `target_id` in the queries that load it.
#[derive(sqlx::FromRow, Clone)]
pub struct DbEnrollment {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub target_id: Option<i64>,
    pub status: Option<String>,
    pub enrollment_date: Option<NaiveDate>,
}

impl From<DbEnrollment> for Enrollment {
    fn from(e: DbEnrollment) -> Self {
        Self {
            id: e.id.unwrap_or_default(),
            user_id: e.user_id.unwrap_or_default(),
            target_id: e.target_id.unwrap_or_default(),
            status: EnrollmentStatus::from_str(&e.status.unwrap_or_default()).unwrap(),
            enrollment_date: e.enrollment_date.unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
pub struct ScheduleSlot {
    pub id: i64,
    pub pool_id: i64,
    pub coach_id: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub capacity: i64,
    pub coach_name: String,
    pub pool_name: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbScheduleSlot {
    pub id: Option<i64>,
    pub pool_id: Option<i64>,
    pub coach_id: Option<i64>,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    pub capacity: Option<i64>,
    pub coach_name: Option<String>,
    pub pool_name: Option<String>,
}

impl From<DbScheduleSlot> for ScheduleSlot {
    fn from(slot: DbScheduleSlot) -> Self {
        Self {
            id: slot.id.unwrap_or_default(),
            pool_id: slot.pool_id.unwrap_or_default(),
            coach_id: slot.coach_id.unwrap_or_default(),
            starts_at: slot
                .starts_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
            ends_at: slot
                .ends_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
            capacity: slot.capacity.unwrap_or_default(),
            coach_name: slot.coach_name.unwrap_or_default(),
            pool_name: slot.pool_name.unwrap_or_default(),
        }
    }
}

#[derive(Serialize, Clone)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub plan: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub visits_left: Option<i64>,
    pub status: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSubscription {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub plan: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub visits_left: Option<i64>,
    pub status: Option<String>,
}

impl From<DbSubscription> for Subscription {
    fn from(sub: DbSubscription) -> Self {
        Self {
            id: sub.id.unwrap_or_default(),
            user_id: sub.user_id.unwrap_or_default(),
            plan: sub.plan.unwrap_or_default(),
            start_date: sub.start_date.unwrap_or_default(),
            end_date: sub.end_date.unwrap_or_default(),
            visits_left: sub.visits_left,
            status: sub.status.unwrap_or_default(),
        }
    }
}

impl Subscription {
    /// The one entitlement predicate. Every caller that needs to know
    /// whether a subscription currently authorizes enrollment goes through
    /// here; there is no second definition anywhere in the crate.
    pub fn is_entitled(&self, now: DateTime<Utc>) -> bool {
        self.status == "active"
            && self.end_date >= now.date_naive()
            && self.visits_left.is_none_or(|v| v > 0)
    }
}

#[derive(Serialize, Clone)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbNotification {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub is_read: Option<bool>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbNotification> for Notification {
    fn from(n: DbNotification) -> Self {
        Self {
            id: n.id.unwrap_or_default(),
            user_id: n.user_id.unwrap_or_default(),
            title: n.title.unwrap_or_default(),
            message: n.message.unwrap_or_default(),
            is_read: n.is_read.unwrap_or_default(),
            created_at: n
                .created_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
        }
    }
}

/// One active member of a group or slot, as returned by the member listing.
#[derive(Serialize, Debug)]
pub struct Member {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub enrollment_date: NaiveDate,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbMember {
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub enrollment_date: Option<NaiveDate>,
}

impl From<DbMember> for Member {
    fn from(m: DbMember) -> Self {
        Self {
            user_id: m.user_id.unwrap_or_default(),
            username: m.username.unwrap_or_default(),
            display_name: m.display_name.unwrap_or_default(),
            enrollment_date: m.enrollment_date.unwrap_or_default(),
        }
    }
}
