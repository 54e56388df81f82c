//! Seed data and recording collaborators for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::{
    catalog::{CourseStatus, Role},
    dispatch::mailer::{EmailTemplate, Mailer},
    notification::{NotificationKind, Notifier},
    realtime::RealtimePush,
};

pub async fn seed_user(database: &SqlitePool, first: &str, last: &str, role: Role) -> i64 {
    let email = format!("{}.{}@example.com", first.to_lowercase(), last.to_lowercase());
    sqlx::query("INSERT INTO users (first_name, last_name, email, role) VALUES (?, ?, ?, ?)")
        .bind(first)
        .bind(last)
        .bind(email)
        .bind(role)
        .execute(database)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub struct SeededCourse {
    pub id: i64,
    pub lessons: Vec<i64>,
}

pub async fn seed_course(
    database: &SqlitePool,
    instructor_id: i64,
    title: &str,
    status: CourseStatus,
    lessons: usize,
) -> SeededCourse {
    let id = sqlx::query(
        "INSERT INTO courses (instructor_id, title, thumbnail_url, price_cents, status) \
         VALUES (?, ?, ?, 4900, ?)",
    )
    .bind(instructor_id)
    .bind(title)
    .bind(format!("https://cdn.example.com/{}.png", title.to_lowercase().replace(' ', "-")))
    .bind(status)
    .execute(database)
    .await
    .unwrap()
    .last_insert_rowid();
    let mut lesson_ids = Vec::with_capacity(lessons);
    for position in 1..=lessons {
        let lesson = add_lesson(database, id, &format!("Lesson {position}"), position as i64).await;
        lesson_ids.push(lesson);
    }
    SeededCourse {
        id,
        lessons: lesson_ids,
    }
}

pub async fn add_lesson(database: &SqlitePool, course_id: i64, title: &str, position: i64) -> i64 {
    sqlx::query("INSERT INTO lessons (course_id, title, position) VALUES (?, ?, ?)")
        .bind(course_id)
        .bind(title)
        .bind(position)
        .execute(database)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn set_course_status(database: &SqlitePool, course_id: i64, status: CourseStatus) {
    sqlx::query("UPDATE courses SET status = ? WHERE id = ?")
        .bind(status)
        .bind(course_id)
        .execute(database)
        .await
        .unwrap();
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, EmailTemplate)>>,
    attempts: Mutex<usize>,
    fail_for: Option<String>,
}

impl RecordingMailer {
    /// Every send to `address` fails
    pub fn failing_for(address: &str) -> Self {
        Self {
            fail_for: Some(address.to_string()),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, EmailTemplate)> {
        self.sent.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, email: EmailTemplate) -> anyhow::Result<()> {
        *self.attempts.lock() += 1;
        if self.fail_for.as_deref() == Some(to) {
            anyhow::bail!("smtp relay refused {to}");
        }
        self.sent.lock().push((to.to_string(), email));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        user_id: i64,
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> anyhow::Result<()> {
        self.sent.lock().push(SentNotification {
            user_id,
            title: title.to_string(),
            message: message.to_string(),
            kind,
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPush {
    events: Mutex<Vec<(i64, String, Value)>>,
}

impl RecordingPush {
    pub fn events(&self) -> Vec<(i64, String, Value)> {
        self.events.lock().clone()
    }
}

impl RealtimePush for RecordingPush {
    fn push(&self, user_id: i64, event: &str, payload: Value) {
        self.events.lock().push((user_id, event.to_string(), payload));
    }
}
