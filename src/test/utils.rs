#[cfg(test)]
pub mod test_utils {
    use crate::auth::Role;
    use crate::db::{
        create_group, create_pool_site, create_schedule_slot, create_subscription, create_user,
        insert_group_enrollment, set_group_enrollment_status,
    };
    use crate::enrollment::EnrollmentEngine;
    use crate::error::AppError;
    use crate::models::EnrollmentStatus;
    use crate::notify::Notifier;
    use chrono::{Duration, Utc};
    use rocket::http::{ContentType, Header};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use sqlx::{Pool, Sqlite, SqlitePool};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, Once};

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    /// Stands in for the SQL notifier so engine tests can assert on what
    /// was sent without reading the notifications table.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(i64, String, String)>>,
    }

    #[rocket::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            user_id: i64,
            title: &str,
            message: &str,
        ) -> Result<(), AppError> {
            self.sent
                .lock()
                .unwrap()
                .push((user_id, title.to_string(), message.to_string()));
            Ok(())
        }
    }

    impl RecordingNotifier {
        pub fn titles_for(&self, user_id: i64) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _, _)| *id == user_id)
                .map(|(_, title, _)| title.clone())
                .collect()
        }
    }

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
        pub password: String,
    }

    pub struct TestGroup {
        pub name: String,
        pub capacity: i64,
        pub coach_username: Option<String>,
    }

    pub struct TestSubscription {
        pub username: String,
        pub plan: String,
        pub end_in_days: i64,
        pub visits_left: Option<i64>,
        pub status: String,
    }

    pub struct TestEnrollment {
        pub username: String,
        pub group_name: String,
        pub status: EnrollmentStatus,
    }

    pub struct TestSlot {
        pub label: String,
        pub capacity: i64,
        pub starts_in_hours: i64,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        groups: Vec<TestGroup>,
        subscriptions: Vec<TestSubscription>,
        enrollments: Vec<TestEnrollment>,
        slots: Vec<TestSlot>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn client(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Client,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn coach(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Coach,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn admin(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Admin,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn group(mut self, name: &str, capacity: i64, coach_username: Option<&str>) -> Self {
            self.groups.push(TestGroup {
                name: name.to_string(),
                capacity,
                coach_username: coach_username.map(String::from),
            });
            self
        }

        /// Monthly subscription valid for another 30 days.
        pub fn active_subscription(self, username: &str) -> Self {
            self.subscription(username, "monthly", 30, None, "active")
        }

        pub fn subscription(
            mut self,
            username: &str,
            plan: &str,
            end_in_days: i64,
            visits_left: Option<i64>,
            status: &str,
        ) -> Self {
            self.subscriptions.push(TestSubscription {
                username: username.to_string(),
                plan: plan.to_string(),
                end_in_days,
                visits_left,
                status: status.to_string(),
            });
            self
        }

        pub fn enrollment(
            mut self,
            username: &str,
            group_name: &str,
            status: EnrollmentStatus,
        ) -> Self {
            self.enrollments.push(TestEnrollment {
                username: username.to_string(),
                group_name: group_name.to_string(),
                status,
            });
            self
        }

        pub fn slot(mut self, label: &str, capacity: i64, starts_in_hours: i64) -> Self {
            self.slots.push(TestSlot {
                label: label.to_string(),
                capacity,
                starts_in_hours,
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter("info")
                    .with_test_writer()
                    .try_init();
            });

            let pool = SqlitePool::connect("sqlite::memory:").await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut group_id_map: HashMap<String, i64> = HashMap::new();
            let mut slot_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.username,
                    &user.password,
                    user.role.as_str(),
                    user.display_name.as_deref(),
                )
                .await?;

                user_id_map.insert(user.username.clone(), user_id);
            }

            let mut default_site_id = None;
            if !(self.groups.is_empty() && self.slots.is_empty()) {
                let site_id = create_pool_site(&pool, "Main Pool", "").await?;
                default_site_id = Some(site_id);
            }

            let first_coach_id = self
                .users
                .iter()
                .find(|u| matches!(u.role, Role::Coach))
                .map(|u| user_id_map[&u.username]);

            for group in &self.groups {
                let coach_id = match &group.coach_username {
                    Some(coach_name) => user_id_map.get(coach_name).copied(),
                    None => first_coach_id,
                };

                if let (Some(coach_id), Some(site_id)) = (coach_id, default_site_id) {
                    let group_id = create_group(
                        &pool,
                        &group.name,
                        "general",
                        group.capacity,
                        coach_id,
                        site_id,
                    )
                    .await?;

                    group_id_map.insert(group.name.clone(), group_id);
                }
            }

            let today = Utc::now().date_naive();
            for sub in &self.subscriptions {
                if let Some(user_id) = user_id_map.get(&sub.username).copied() {
                    create_subscription(
                        &pool,
                        user_id,
                        &sub.plan,
                        today - Duration::days(1),
                        today + Duration::days(sub.end_in_days),
                        sub.visits_left,
                        &sub.status,
                    )
                    .await?;
                }
            }

            for enrollment in &self.enrollments {
                let user_id = user_id_map.get(&enrollment.username).copied();
                let group_id = group_id_map.get(&enrollment.group_name).copied();

                if let (Some(user_id), Some(group_id)) = (user_id, group_id) {
                    let enrollment_id =
                        insert_group_enrollment(&pool, user_id, group_id, today).await?;

                    if enrollment.status != EnrollmentStatus::Active {
                        set_group_enrollment_status(&pool, enrollment_id, enrollment.status)
                            .await?;
                    }
                }
            }

            let now = Utc::now();
            for slot in &self.slots {
                if let (Some(coach_id), Some(site_id)) = (first_coach_id, default_site_id) {
                    let starts_at = (now + Duration::hours(slot.starts_in_hours)).naive_utc();
                    let slot_id = create_schedule_slot(
                        &pool,
                        site_id,
                        coach_id,
                        starts_at,
                        starts_at + Duration::hours(1),
                        slot.capacity,
                    )
                    .await?;

                    slot_id_map.insert(slot.label.clone(), slot_id);
                }
            }

            Ok(TestDb {
                pool,
                user_id_map,
                group_id_map,
                slot_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub group_id_map: HashMap<String, i64>,
        pub slot_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn group_id(&self, name: &str) -> Option<i64> {
            self.group_id_map.get(name).copied()
        }

        pub fn slot_id(&self, label: &str) -> Option<i64> {
            self.slot_id_map.get(label).copied()
        }

        pub async fn group_status(
            &self,
            username: &str,
            group_name: &str,
        ) -> Result<Option<EnrollmentStatus>, AppError> {
            let user_id = self.user_id(username).expect("user not found");
            let group_id = self.group_id(group_name).expect("group not found");

            let enrollment =
                crate::db::get_group_enrollment(&self.pool, user_id, group_id).await?;

            Ok(enrollment.map(|e| e.status))
        }

        pub async fn enrollment_row_count(
            &self,
            username: &str,
            group_name: &str,
        ) -> Result<i64, sqlx::Error> {
            let user_id = self.user_id(username).expect("user not found");
            let group_id = self.group_id(group_name).expect("group not found");

            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM group_enrollments WHERE user_id = ? AND group_id = ?",
            )
            .bind(user_id)
            .bind(group_id)
            .fetch_one(&self.pool)
            .await
        }
    }

    pub fn test_engine(test_db: &TestDb) -> (EnrollmentEngine, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = EnrollmentEngine::new(test_db.pool.clone(), notifier.clone());
        (engine, notifier)
    }

    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin("admin_user", Some("Admin User"))
            .coach("coach_user", Some("Coach User"))
            .coach("other_coach", Some("Other Coach"))
            .client("client_user", Some("Client User"))
            .client("second_client", Some("Second Client"))
            .client("no_sub_client", Some("No Sub Client"))
            .active_subscription("client_user")
            .active_subscription("second_client")
            .group("Sharks", 2, Some("coach_user"))
            .group("Minnows", 1, Some("other_coach"))
            .slot("morning_lanes", 2, 24)
            .build()
            .await
            .expect("Failed to build test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = crate::init_rocket(test_db.pool.clone()).await;
        let client = Client::tracked(rocket)
            .await
            .expect("valid rocket instance");
        (client, test_db)
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }

    pub async fn login_test_user(client: &Client, username: &str, password: &str) -> String {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        let body = response.into_string().await.unwrap();
        let login_response: crate::api::LoginResponse = serde_json::from_str(&body).unwrap();

        login_response.token.expect("login did not return a token")
    }
}
