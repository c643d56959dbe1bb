use crate::{
    auth::{DbUser, DbUserSession, User, UserSession},
    error::AppError,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::models::{
    DbEnrollment, DbGroup, DbMember, DbNotification, DbScheduleSlot, DbSubscription, Enrollment,
    EnrollmentStatus, Group, Member, Notification, ScheduleSlot, Subscription,
};

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, archived FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Getting user by username");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, archived FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip_all, fields(username, role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: &str,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let existing = find_user_by_username(pool, username).await?;
    if existing.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (username, password, role, display_name) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(hashed_password)
    .bind(role)
    .bind(display_name.unwrap_or_default())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[derive(sqlx::FromRow)]
struct AuthRow {
    id: i64,
    password: String,
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row = sqlx::query_as::<_, AuthRow>("SELECT id, password FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(auth) => {
            let valid = bcrypt::verify(password, &auth.password).unwrap_or(false);
            if valid {
                Ok(Some(get_user(pool, auth.id).await?))
            } else {
                Ok(None)
            }
        }
        _ => Ok(None),
    }
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res =
        sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(token)
            .bind(expires_at)
            .execute(pool)
            .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument]
pub async fn create_pool_site(
    pool: &Pool<Sqlite>,
    name: &str,
    address: &str,
) -> Result<i64, AppError> {
    info!("Creating pool site");
    let res = sqlx::query("INSERT INTO pools (name, address) VALUES (?, ?)")
        .bind(name)
        .bind(address)
        .execute(pool)
        .await?;
    Ok(res.last_insert_rowid())
}

const GROUP_COLUMNS: &str = "g.id, g.name, g.category, g.capacity, g.coach_id, g.pool_id,
            u.display_name AS coach_name, p.name AS pool_name";

#[instrument]
pub async fn create_group(
    pool: &Pool<Sqlite>,
    name: &str,
    category: &str,
    capacity: i64,
    coach_id: i64,
    pool_id: i64,
) -> Result<i64, AppError> {
    info!("Creating group");
    let res = sqlx::query(
        "INSERT INTO groups (name, category, capacity, coach_id, pool_id)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(category)
    .bind(capacity)
    .bind(coach_id)
    .bind(pool_id)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_all_groups(pool: &Pool<Sqlite>) -> Result<Vec<Group>, AppError> {
    info!("Getting all groups");
    let rows = sqlx::query_as::<_, DbGroup>(&format!(
        "SELECT {GROUP_COLUMNS}
         FROM groups g
         JOIN users u ON u.id = g.coach_id
         JOIN pools p ON p.id = g.pool_id
         ORDER BY g.name"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Group::from).collect())
}

#[instrument]
pub async fn find_group(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Group>, AppError> {
    info!("Fetching group by ID");
    let row = sqlx::query_as::<_, DbGroup>(&format!(
        "SELECT {GROUP_COLUMNS}
         FROM groups g
         JOIN users u ON u.id = g.coach_id
         JOIN pools p ON p.id = g.pool_id
         WHERE g.id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Group::from))
}

#[instrument]
pub async fn find_group_owned_by(
    pool: &Pool<Sqlite>,
    group_id: i64,
    coach_id: i64,
) -> Result<Option<Group>, AppError> {
    info!("Fetching group by ID and owning coach");
    let row = sqlx::query_as::<_, DbGroup>(&format!(
        "SELECT {GROUP_COLUMNS}
         FROM groups g
         JOIN users u ON u.id = g.coach_id
         JOIN pools p ON p.id = g.pool_id
         WHERE g.id = ? AND g.coach_id = ?"
    ))
    .bind(group_id)
    .bind(coach_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Group::from))
}

#[instrument]
pub async fn get_group_enrollment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    group_id: i64,
) -> Result<Option<Enrollment>, AppError> {
    info!("Fetching group enrollment");
    let row = sqlx::query_as::<_, DbEnrollment>(
        "SELECT id, user_id, group_id AS target_id, status, enrollment_date
         FROM group_enrollments
         WHERE user_id = ? AND group_id = ?",
    )
    .bind(user_id)
    .bind(group_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Enrollment::from))
}

#[instrument]
pub async fn count_active_group_enrollments(
    pool: &Pool<Sqlite>,
    group_id: i64,
) -> Result<i64, AppError> {
    info!("Counting active group enrollments");
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM group_enrollments WHERE group_id = ? AND status = 'active'",
    )
    .bind(group_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

#[instrument]
pub async fn insert_group_enrollment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    group_id: i64,
    enrollment_date: NaiveDate,
) -> Result<i64, AppError> {
    info!("Inserting group enrollment");
    let res = sqlx::query(
        "INSERT INTO group_enrollments (user_id, group_id, enrollment_date, status)
         VALUES (?, ?, ?, 'active')",
    )
    .bind(user_id)
    .bind(group_id)
    .bind(enrollment_date)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn set_group_enrollment_status(
    pool: &Pool<Sqlite>,
    enrollment_id: i64,
    status: EnrollmentStatus,
) -> Result<(), AppError> {
    info!(status = %status, "Updating group enrollment status");
    sqlx::query("UPDATE group_enrollments SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(enrollment_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument]
pub async fn reactivate_group_enrollment(
    pool: &Pool<Sqlite>,
    enrollment_id: i64,
    enrollment_date: NaiveDate,
) -> Result<(), AppError> {
    info!("Reactivating cancelled group enrollment");
    sqlx::query(
        "UPDATE group_enrollments SET status = 'active', enrollment_date = ? WHERE id = ?",
    )
    .bind(enrollment_date)
    .bind(enrollment_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument]
pub async fn get_active_group_members(
    pool: &Pool<Sqlite>,
    group_id: i64,
) -> Result<Vec<Member>, AppError> {
    info!("Getting active group members");
    let rows = sqlx::query_as::<_, DbMember>(
        "SELECT u.id AS user_id, u.username, u.display_name, e.enrollment_date
         FROM group_enrollments e
         JOIN users u ON u.id = e.user_id
         WHERE e.group_id = ? AND e.status = 'active'
         ORDER BY u.display_name",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Member::from).collect())
}

const SLOT_COLUMNS: &str = "s.id, s.pool_id, s.coach_id, s.starts_at, s.ends_at, s.capacity,
            u.display_name AS coach_name, p.name AS pool_name";

#[instrument]
pub async fn create_schedule_slot(
    pool: &Pool<Sqlite>,
    pool_id: i64,
    coach_id: i64,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
    capacity: i64,
) -> Result<i64, AppError> {
    info!("Creating schedule slot");
    let res = sqlx::query(
        "INSERT INTO schedule (pool_id, coach_id, starts_at, ends_at, capacity)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(pool_id)
    .bind(coach_id)
    .bind(starts_at)
    .bind(ends_at)
    .bind(capacity)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn find_schedule_slot(
    pool: &Pool<Sqlite>,
    id: i64,
) -> Result<Option<ScheduleSlot>, AppError> {
    info!("Fetching schedule slot by ID");
    let row = sqlx::query_as::<_, DbScheduleSlot>(&format!(
        "SELECT {SLOT_COLUMNS}
         FROM schedule s
         JOIN users u ON u.id = s.coach_id
         JOIN pools p ON p.id = s.pool_id
         WHERE s.id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(ScheduleSlot::from))
}

#[instrument]
pub async fn get_upcoming_slots(
    pool: &Pool<Sqlite>,
    after: NaiveDateTime,
) -> Result<Vec<ScheduleSlot>, AppError> {
    info!("Getting upcoming schedule slots");
    let rows = sqlx::query_as::<_, DbScheduleSlot>(&format!(
        "SELECT {SLOT_COLUMNS}
         FROM schedule s
         JOIN users u ON u.id = s.coach_id
         JOIN pools p ON p.id = s.pool_id
         WHERE s.starts_at >= ?
         ORDER BY s.starts_at"
    ))
    .bind(after)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ScheduleSlot::from).collect())
}

#[instrument]
pub async fn get_slot_enrollment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    schedule_id: i64,
) -> Result<Option<Enrollment>, AppError> {
    info!("Fetching schedule enrollment");
    let row = sqlx::query_as::<_, DbEnrollment>(
        "SELECT id, user_id, schedule_id AS target_id, status, enrollment_date
         FROM schedule_enrollments
         WHERE user_id = ? AND schedule_id = ?",
    )
    .bind(user_id)
    .bind(schedule_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Enrollment::from))
}

#[instrument]
pub async fn count_active_slot_enrollments(
    pool: &Pool<Sqlite>,
    schedule_id: i64,
) -> Result<i64, AppError> {
    info!("Counting active schedule enrollments");
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schedule_enrollments WHERE schedule_id = ? AND status = 'active'",
    )
    .bind(schedule_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

#[instrument]
pub async fn insert_slot_enrollment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    schedule_id: i64,
    enrollment_date: NaiveDate,
) -> Result<i64, AppError> {
    info!("Inserting schedule enrollment");
    let res = sqlx::query(
        "INSERT INTO schedule_enrollments (user_id, schedule_id, enrollment_date, status)
         VALUES (?, ?, ?, 'active')",
    )
    .bind(user_id)
    .bind(schedule_id)
    .bind(enrollment_date)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn set_slot_enrollment_status(
    pool: &Pool<Sqlite>,
    enrollment_id: i64,
    status: EnrollmentStatus,
) -> Result<(), AppError> {
    info!(status = %status, "Updating schedule enrollment status");
    sqlx::query("UPDATE schedule_enrollments SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(enrollment_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument]
pub async fn reactivate_slot_enrollment(
    pool: &Pool<Sqlite>,
    enrollment_id: i64,
    enrollment_date: NaiveDate,
) -> Result<(), AppError> {
    info!("Reactivating cancelled schedule enrollment");
    sqlx::query(
        "UPDATE schedule_enrollments SET status = 'active', enrollment_date = ? WHERE id = ?",
    )
    .bind(enrollment_date)
    .bind(enrollment_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument]
pub async fn create_subscription(
    pool: &Pool<Sqlite>,
    user_id: i64,
    plan: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    visits_left: Option<i64>,
    status: &str,
) -> Result<i64, AppError> {
    info!("Creating subscription");
    let res = sqlx::query(
        "INSERT INTO subscriptions (user_id, plan, start_date, end_date, visits_left, status)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(plan)
    .bind(start_date)
    .bind(end_date)
    .bind(visits_left)
    .bind(status)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_user_subscriptions(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<Subscription>, AppError> {
    info!("Getting user subscriptions");
    let rows = sqlx::query_as::<_, DbSubscription>(
        "SELECT id, user_id, plan, start_date, end_date, visits_left, status
         FROM subscriptions
         WHERE user_id = ?
         ORDER BY end_date DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Subscription::from).collect())
}

#[instrument(skip(message))]
pub async fn create_notification(
    pool: &Pool<Sqlite>,
    user_id: i64,
    title: &str,
    message: &str,
) -> Result<i64, AppError> {
    info!("Creating notification");
    let now = Utc::now().naive_utc();
    let res = sqlx::query(
        "INSERT INTO notifications (user_id, title, message, is_read, created_at)
         VALUES (?, ?, ?, 0, ?)",
    )
    .bind(user_id)
    .bind(title)
    .bind(message)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_user_notifications(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<Notification>, AppError> {
    info!("Getting user notifications");
    let rows = sqlx::query_as::<_, DbNotification>(
        "SELECT id, user_id, title, message, is_read, created_at
         FROM notifications
         WHERE user_id = ?
         ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Notification::from).collect())
}

#[instrument]
pub async fn mark_notification_read(
    pool: &Pool<Sqlite>,
    notification_id: i64,
    user_id: i64,
) -> Result<u64, AppError> {
    info!("Marking notification as read");
    let res = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
        .bind(notification_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(res.rows_affected())
}
