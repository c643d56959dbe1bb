use chrono::{Duration, Utc};
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{BearerToken, Permission, Role, User, UserSession};
use crate::db::{
    authenticate_user, count_active_group_enrollments, count_active_slot_enrollments,
    create_group, create_schedule_slot, create_subscription, create_user, create_user_session,
    find_user_by_username, get_all_groups, get_upcoming_slots, get_user, get_user_notifications,
    get_user_subscriptions, invalidate_session, mark_notification_read,
};
use crate::enrollment::{EnrollmentEngine, EnrollmentError};
use crate::models::{Member, Notification};
use crate::validation::AppErrorExt;
use crate::validation::JsonValidateExt;
use crate::validation::PermissionCheckExt;
use crate::validation::ValidationResponse;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: Option<String>,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub archived: bool,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            role: user.role.to_string(),
            archived: user.archived,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LoginResponse>, Custom<Json<ValidationResponse>>> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + Duration::hours(12);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            Ok(Json(LoginResponse {
                success: true,
                token: Some(token),
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            token: None,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(token: BearerToken, db: &State<Pool<Sqlite>>) -> Status {
    let _ = invalidate_session(db, &token.0).await;
    Status::Ok
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[get("/me", rank = 2)]
pub async fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}

#[derive(Deserialize, Validate, Clone)]
pub struct UserRegistrationRequest {
    #[validate(length(min = 3, message = "Username must be at least 3 characters"))]
    username: String,
    display_name: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    role: String,
}

#[post("/register", data = "<registration>")]
pub async fn api_register_user(
    registration: Json<UserRegistrationRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    let validated = registration.validate_custom()?;

    if Role::from_str(&validated.role).is_err() {
        return Err(Custom(
            Status::UnprocessableEntity,
            Json(ValidationResponse::with_error("role", "Unknown role")),
        ));
    }

    let existing_user = find_user_by_username(db, &validated.username)
        .await
        .validate_custom()?;

    if existing_user.is_some() {
        return Err(Custom(
            Status::Conflict,
            Json(ValidationResponse::with_error(
                "username",
                "Username already exists",
            )),
        ));
    }

    match validated.role.as_str() {
        "admin" => user
            .require_all_permissions(&[Permission::EditUserRoles, Permission::RegisterUsers])
            .validate_custom()?,
        _ => user
            .require_permission(Permission::RegisterUsers)
            .validate_custom()?,
    };

    create_user(
        db,
        &validated.username,
        &validated.password,
        &validated.role,
        Some(&validated.display_name),
    )
    .await
    .validate_custom()?;

    Ok(Status::Created)
}

#[derive(Serialize, Deserialize)]
pub struct GroupResponse {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub capacity: i64,
    pub coach_name: String,
    pub pool_name: String,
    pub active_count: i64,
}

#[get("/groups")]
pub async fn api_get_groups(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<GroupResponse>>, Status> {
    let groups = get_all_groups(db).await?;

    let mut responses = Vec::with_capacity(groups.len());
    for group in groups {
        let active_count = count_active_group_enrollments(db, group.id).await?;
        responses.push(GroupResponse {
            id: group.id,
            name: group.name,
            category: group.category,
            capacity: group.capacity,
            coach_name: group.coach_name,
            pool_name: group.pool_name,
            active_count,
        });
    }

    Ok(Json(responses))
}

#[derive(Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, message = "Group name is required"))]
    name: String,
    category: Option<String>,
    #[validate(range(min = 1, message = "Capacity must be positive"))]
    capacity: i64,
    coach_id: i64,
    pool_id: i64,
}

#[post("/groups", data = "<request>")]
pub async fn api_create_group(
    request: Json<CreateGroupRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::ManageGroups)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let coach = get_user(db, validated.coach_id).await.validate_custom()?;
    if coach.role != Role::Coach {
        return Err(Custom(
            Status::UnprocessableEntity,
            Json(ValidationResponse::with_error(
                "coach_id",
                "Assigned user is not a coach",
            )),
        ));
    }

    create_group(
        db,
        &validated.name,
        validated.category.as_deref().unwrap_or("general"),
        validated.capacity,
        validated.coach_id,
        validated.pool_id,
    )
    .await
    .validate_custom()?;

    Ok(Status::Created)
}

#[post("/group/<id>/enroll")]
pub async fn api_enroll_in_group(
    id: i64,
    user: User,
    engine: &State<EnrollmentEngine>,
) -> Result<Json<MessageResponse>, EnrollmentError> {
    engine.enroll_in_group(user.id, id).await?;

    Ok(Json(MessageResponse {
        message: "Enrolled successfully".to_string(),
    }))
}

#[delete("/group/<id>/enroll")]
pub async fn api_cancel_group_enrollment(
    id: i64,
    user: User,
    engine: &State<EnrollmentEngine>,
) -> Result<Json<MessageResponse>, EnrollmentError> {
    engine.cancel_group_enrollment(user.id, id).await?;

    Ok(Json(MessageResponse {
        message: "Enrollment cancelled".to_string(),
    }))
}

#[get("/group/<id>/members")]
pub async fn api_group_members(
    id: i64,
    user: User,
    engine: &State<EnrollmentEngine>,
) -> Result<Json<Vec<Member>>, EnrollmentError> {
    let members = engine.group_members(&user, id).await?;
    Ok(Json(members))
}

#[delete("/coach/groups/<group_id>/members/<member_id>")]
pub async fn api_remove_group_member(
    group_id: i64,
    member_id: i64,
    user: User,
    engine: &State<EnrollmentEngine>,
) -> Result<Json<MessageResponse>, EnrollmentError> {
    if !user.has_permission(Permission::RemoveGroupMembers) {
        return Err(EnrollmentError::Forbidden);
    }

    engine
        .remove_group_member(user.id, group_id, member_id)
        .await?;

    Ok(Json(MessageResponse {
        message: "Member removed".to_string(),
    }))
}

#[derive(Serialize, Deserialize)]
pub struct SlotResponse {
    pub id: i64,
    pub starts_at: String,
    pub ends_at: String,
    pub capacity: i64,
    pub coach_name: String,
    pub pool_name: String,
    pub active_count: i64,
}

#[get("/schedule")]
pub async fn api_get_schedule(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<SlotResponse>>, Status> {
    let slots = get_upcoming_slots(db, Utc::now().naive_utc()).await?;

    let mut responses = Vec::with_capacity(slots.len());
    for slot in slots {
        let active_count = count_active_slot_enrollments(db, slot.id).await?;
        responses.push(SlotResponse {
            id: slot.id,
            starts_at: slot.starts_at.to_rfc3339(),
            ends_at: slot.ends_at.to_rfc3339(),
            capacity: slot.capacity,
            coach_name: slot.coach_name,
            pool_name: slot.pool_name,
            active_count,
        });
    }

    Ok(Json(responses))
}

#[derive(Deserialize, Validate)]
pub struct CreateSlotRequest {
    pool_id: i64,
    coach_id: i64,
    starts_at: chrono::NaiveDateTime,
    ends_at: chrono::NaiveDateTime,
    #[validate(range(min = 1, message = "Capacity must be positive"))]
    capacity: i64,
}

#[post("/schedule", data = "<request>")]
pub async fn api_create_slot(
    request: Json<CreateSlotRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::ManageSchedule)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    create_schedule_slot(
        db,
        validated.pool_id,
        validated.coach_id,
        validated.starts_at,
        validated.ends_at,
        validated.capacity,
    )
    .await
    .validate_custom()?;

    Ok(Status::Created)
}

#[post("/schedule/enroll/<schedule_id>")]
pub async fn api_enroll_in_slot(
    schedule_id: i64,
    user: User,
    engine: &State<EnrollmentEngine>,
) -> Result<Json<MessageResponse>, EnrollmentError> {
    engine.enroll_in_slot(user.id, schedule_id).await?;

    Ok(Json(MessageResponse {
        message: "Enrolled successfully".to_string(),
    }))
}

#[delete("/schedule/enroll/<schedule_id>")]
pub async fn api_cancel_slot_enrollment(
    schedule_id: i64,
    user: User,
    engine: &State<EnrollmentEngine>,
) -> Result<Json<MessageResponse>, EnrollmentError> {
    engine.cancel_slot_enrollment(user.id, schedule_id).await?;

    Ok(Json(MessageResponse {
        message: "Enrollment cancelled".to_string(),
    }))
}

#[derive(Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub id: i64,
    pub plan: String,
    pub start_date: String,
    pub end_date: String,
    pub visits_left: Option<i64>,
    pub status: String,
    pub entitled: bool,
}

#[get("/subscriptions")]
pub async fn api_get_subscriptions(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<SubscriptionResponse>>, Status> {
    let now = Utc::now();
    let subscriptions = get_user_subscriptions(db, user.id).await?;

    let responses = subscriptions
        .into_iter()
        .map(|s| SubscriptionResponse {
            id: s.id,
            plan: s.plan.clone(),
            start_date: s.start_date.to_string(),
            end_date: s.end_date.to_string(),
            visits_left: s.visits_left,
            status: s.status.clone(),
            entitled: s.is_entitled(now),
        })
        .collect();

    Ok(Json(responses))
}

#[derive(Deserialize, Validate)]
pub struct PurchaseSubscriptionRequest {
    plan: String,
}

#[post("/subscriptions", data = "<request>")]
pub async fn api_purchase_subscription(
    request: Json<PurchaseSubscriptionRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    let validated = request.validate_custom()?;

    let today = Utc::now().date_naive();
    let (end_date, visits_left) = match validated.plan.as_str() {
        "monthly" => (today + Duration::days(30), None),
        "punch_card" => (today + Duration::days(90), Some(10)),
        _ => {
            return Err(Custom(
                Status::UnprocessableEntity,
                Json(ValidationResponse::with_error("plan", "Unknown plan")),
            ));
        }
    };

    create_subscription(
        db,
        user.id,
        &validated.plan,
        today,
        end_date,
        visits_left,
        "active",
    )
    .await
    .validate_custom()?;

    Ok(Status::Created)
}

#[get("/notifications")]
pub async fn api_get_notifications(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Notification>>, Status> {
    let notifications = get_user_notifications(db, user.id).await?;
    Ok(Json(notifications))
}

#[put("/notifications/<id>/read")]
pub async fn api_mark_notification_read(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    let updated = mark_notification_read(db, id, user.id).await?;

    if updated == 0 {
        return Err(Status::NotFound);
    }

    Ok(Status::Ok)
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
