//! Read-only views of the course catalog and user accounts.
//!
//! Both are owned by other services; enrollment only consumes them through
//! [`CourseCatalog`] and [`UserDirectory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourseStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Instructor,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

/// The authenticated user behind a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: i64,
    pub role: Role,
}

/// The course as it is at the moment of the lookup
#[derive(Debug, Clone)]
pub struct CourseSnapshot {
    pub id: i64,
    pub status: CourseStatus,
    pub instructor_id: i64,
    pub title: String,
    pub thumbnail_url: Option<String>,
    /// Lesson ids in course order
    pub lessons: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ContactInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl ContactInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn course(&self, course_id: i64) -> anyhow::Result<Option<CourseSnapshot>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn contact(&self, user_id: i64) -> anyhow::Result<Option<ContactInfo>>;
}

/// Catalog backed by the shared database tables.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    database: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(database: SqlitePool) -> Self {
        Self { database }
    }

    pub async fn list(&self) -> anyhow::Result<Vec<CourseListing>> {
        let courses = sqlx::query_as::<_, CourseListing>(
            "SELECT c.id, c.title, c.status, c.instructor_id, \
                    (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id) AS lesson_count \
             FROM courses c ORDER BY c.id",
        )
        .fetch_all(&self.database)
        .await?;
        Ok(courses)
    }
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: i64,
    status: CourseStatus,
    instructor_id: i64,
    title: String,
    thumbnail_url: Option<String>,
}

/// One line of the course list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CourseListing {
    pub id: i64,
    pub title: String,
    pub status: CourseStatus,
    pub instructor_id: i64,
    pub lesson_count: i64,
}

#[async_trait]
impl CourseCatalog for SqliteCatalog {
    async fn course(&self, course_id: i64) -> anyhow::Result<Option<CourseSnapshot>> {
        let Some(course) = sqlx::query_as::<_, CourseRow>(
            "SELECT id, status, instructor_id, title, thumbnail_url FROM courses WHERE id = ?",
        )
        .bind(course_id)
        .fetch_optional(&self.database)
        .await?
        else {
            return Ok(None);
        };
        let lessons = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM lessons WHERE course_id = ? ORDER BY position, id",
        )
        .bind(course_id)
        .fetch_all(&self.database)
        .await?;
        Ok(Some(CourseSnapshot {
            id: course.id,
            status: course.status,
            instructor_id: course.instructor_id,
            title: course.title,
            thumbnail_url: course.thumbnail_url,
            lessons,
        }))
    }
}

#[async_trait]
impl UserDirectory for SqliteCatalog {
    async fn contact(&self, user_id: i64) -> anyhow::Result<Option<ContactInfo>> {
        let contact = sqlx::query_as::<_, ContactInfo>(
            "SELECT first_name, last_name, email FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.database)
        .await?;
        Ok(contact)
    }
}
