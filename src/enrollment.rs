//! The enrollment state machine.
//!
//! ```text
//! (none) --enroll--> ACTIVE --last lesson--> COMPLETED
//!                      |
//!                      +----drop----------> DROPPED
//! ```
//!
//! Every operation runs its read-check-write in one write-locked transaction
//! ([`store::begin_write`]), so concurrent callers for the same enrollment run
//! one after another. Side effects are handed to the [`Dispatcher`] after
//! commit.

pub mod progress;

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::{
    catalog::{CourseCatalog, CourseStatus},
    dispatch::Dispatcher,
    error::{Error, Result},
    query::{self, EnrollmentView},
    store::{self, Enrollment, EnrollmentStatus, enrollments},
    utils::now,
};

#[derive(Clone)]
pub struct EnrollmentService {
    database: SqlitePool,
    catalog: Arc<dyn CourseCatalog>,
    dispatcher: Dispatcher,
}

impl EnrollmentService {
    pub fn new(database: SqlitePool, catalog: Arc<dyn CourseCatalog>, dispatcher: Dispatcher) -> Self {
        Self {
            database,
            catalog,
            dispatcher,
        }
    }

    pub fn database(&self) -> &SqlitePool {
        &self.database
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Enroll a student in a published course with one progress row per lesson.
    pub async fn enroll(&self, student_id: i64, course_id: i64) -> Result<EnrollmentView> {
        let course = self
            .catalog
            .course(course_id)
            .await
            .map_err(Error::Fatal)?
            .ok_or(Error::NotFound("Course"))?;
        if course.status != CourseStatus::Published {
            return Err(Error::InvalidTransition(
                "Cannot enroll in an unpublished course".to_string(),
            ));
        }

        let mut tx = store::begin_write(&self.database).await?;
        match enrollments::find(&mut tx, student_id, course_id).await? {
            Some(existing) if existing.status == EnrollmentStatus::Dropped => {
                return Err(Error::InvalidTransition(
                    "You previously dropped this course. Contact support to re-enroll.".to_string(),
                ));
            }
            Some(_) => {
                return Err(Error::Conflict(
                    "You are already enrolled in this course".to_string(),
                ));
            }
            None => {}
        }
        // the lesson set at creation time, read under the write lock
        let lessons = enrollments::course_lessons(&mut tx, course_id).await?;
        let enrollment =
            enrollments::insert_with_lessons(&mut tx, student_id, course_id, &lessons, now())
                .await?;
        tx.commit().await?;
        info!(
            student_id,
            course_id,
            enrollment_id = enrollment.id,
            lessons = lessons.len(),
            "student enrolled"
        );

        self.dispatcher.enrollment_created(student_id, course);
        query::enrollment_view(&self.database, enrollment.id).await
    }

    /// ACTIVE -> DROPPED. Lesson progress is kept.
    pub async fn drop(&self, student_id: i64, course_id: i64) -> Result<EnrollmentView> {
        let mut tx = store::begin_write(&self.database).await?;
        let enrollment = enrollments::find(&mut tx, student_id, course_id)
            .await?
            .ok_or(Error::NotFound("Enrollment"))?;
        if enrollment.student_id != student_id {
            return Err(Error::Forbidden("Not your enrollment".to_string()));
        }
        let not_active =
            || Error::InvalidTransition("Can only drop active enrollments".to_string());
        if enrollment.status != EnrollmentStatus::Active {
            return Err(not_active());
        }
        let dropped = enrollments::mark_dropped(&mut tx, enrollment.id, now())
            .await?
            .ok_or_else(not_active)?;
        tx.commit().await?;
        info!(student_id, course_id, enrollment_id = dropped.id, "enrollment dropped");

        query::enrollment_view(&self.database, dropped.id).await
    }

    /// Flag a lesson completed and re-derive the enrollment's progress.
    pub async fn mark_lesson_complete(
        &self,
        student_id: i64,
        course_id: i64,
        lesson_id: i64,
    ) -> Result<Enrollment> {
        let now = now();
        let mut tx = store::begin_write(&self.database).await?;
        let enrollment = enrollments::find(&mut tx, student_id, course_id)
            .await?
            .ok_or(Error::NotFound("Enrollment"))?;
        if enrollment.status != EnrollmentStatus::Active {
            return Err(Error::InvalidTransition(
                "Enrollment is not active".to_string(),
            ));
        }
        if !enrollments::complete_lesson(&mut tx, enrollment.id, lesson_id, now).await? {
            return Err(Error::NotFound("Lesson progress"));
        }
        let recalculated = progress::recalculate(&mut tx, &enrollment, now).await?;
        tx.commit().await?;

        let enrollment = recalculated.enrollment;
        if recalculated.newly_completed {
            info!(student_id, course_id, enrollment_id = enrollment.id, "course completed");
            self.dispatcher.course_completed(student_id, course_id);
        } else {
            info!(
                student_id,
                course_id,
                lesson_id,
                progress = enrollment.progress,
                "lesson completed"
            );
        }
        Ok(enrollment)
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::{
        catalog::{CourseSnapshot, Role, SqliteCatalog},
        dispatch::mailer::EmailTemplate,
        notification::NotificationKind,
        store,
        testing::{self, RecordingMailer, RecordingNotifier, RecordingPush, SeededCourse},
    };

    struct Fixture {
        service: EnrollmentService,
        database: SqlitePool,
        mailer: Arc<RecordingMailer>,
        notifier: Arc<RecordingNotifier>,
        push: Arc<RecordingPush>,
        student: i64,
        instructor: i64,
    }

    async fn fixture() -> Fixture {
        fixture_on(store::test_pool().await).await
    }

    async fn fixture_on(database: SqlitePool) -> Fixture {
        let student = testing::seed_user(&database, "Sam", "Student", Role::Student).await;
        let instructor = testing::seed_user(&database, "Ian", "Structor", Role::Instructor).await;
        let catalog = Arc::new(SqliteCatalog::new(database.clone()));
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let push = Arc::new(RecordingPush::default());
        let dispatcher = Dispatcher::new(
            catalog.clone(),
            catalog.clone(),
            notifier.clone(),
            mailer.clone(),
            push.clone(),
        );
        let service = EnrollmentService::new(database.clone(), catalog, dispatcher);
        Fixture {
            service,
            database,
            mailer,
            notifier,
            push,
            student,
            instructor,
        }
    }

    impl Fixture {
        async fn course(&self, lessons: usize) -> SeededCourse {
            testing::seed_course(
                &self.database,
                self.instructor,
                "Rust 101",
                CourseStatus::Published,
                lessons,
            )
            .await
        }

        async fn lesson_rows(&self, enrollment_id: i64) -> i64 {
            sqlx::query_scalar("SELECT COUNT(*) FROM lesson_progress WHERE enrollment_id = ?")
                .bind(enrollment_id)
                .fetch_one(&self.database)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn enroll_creates_progress_rows_and_fans_out() {
        let f = fixture().await;
        let course = f.course(5).await;

        let view = f.service.enroll(f.student, course.id).await.unwrap();
        assert_eq!(view.enrollment.status, EnrollmentStatus::Active);
        assert_eq!(view.enrollment.progress, 0);
        assert_eq!(view.course.lesson_count, 5);
        assert_eq!(view.course.instructor_name, "Ian Structor");
        assert_eq!(f.lesson_rows(view.enrollment.id).await, 5);

        f.service.dispatcher().flush().await;
        let notes = f.notifier.sent();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].user_id, f.instructor);
        assert_eq!(notes[0].kind, NotificationKind::Enrollment);
        assert_eq!(f.push.events().len(), 1);
        assert_eq!(f.mailer.sent().len(), 2);
    }

    #[tokio::test]
    async fn progress_climbs_then_completes_once() {
        let f = fixture().await;
        let course = f.course(5).await;
        f.service.enroll(f.student, course.id).await.unwrap();
        f.service.dispatcher().flush().await;
        let emails_after_enroll = f.mailer.sent().len();

        for lesson in &course.lessons[..4] {
            let enrollment = f
                .service
                .mark_lesson_complete(f.student, course.id, *lesson)
                .await
                .unwrap();
            assert_eq!(enrollment.status, EnrollmentStatus::Active);
        }
        let enrollment = f
            .service
            .mark_lesson_complete(f.student, course.id, course.lessons[3])
            .await
            .unwrap();
        assert_eq!(enrollment.progress, 80);

        let done = f
            .service
            .mark_lesson_complete(f.student, course.id, course.lessons[4])
            .await
            .unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.status, EnrollmentStatus::Completed);
        assert!(done.completed_at.is_some());

        f.service.dispatcher().flush().await;
        let completions: Vec<_> = f
            .notifier
            .sent()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::CourseCompleted)
            .collect();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].user_id, f.student);
        assert_eq!(completions[0].message, "Congratulations! You've completed \"Rust 101\"");
        let sent = f.mailer.sent();
        assert_eq!(sent.len(), emails_after_enroll + 1);
        assert!(matches!(sent.last(), Some((_, EmailTemplate::CourseCompleted { .. }))));

        // completed is terminal for lesson writes
        let again = f
            .service
            .mark_lesson_complete(f.student, course.id, course.lessons[0])
            .await;
        assert!(matches!(again, Err(Error::InvalidTransition(_))));
        let report = query::get_progress(&f.database, f.student, course.id).await.unwrap();
        assert_eq!(report.enrollment.progress, 100);
    }

    #[tokio::test]
    async fn second_enroll_conflicts() {
        let f = fixture().await;
        let course = f.course(2).await;
        f.service.enroll(f.student, course.id).await.unwrap();
        let again = f.service.enroll(f.student, course.id).await;
        assert!(matches!(again, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn concurrent_enrolls_admit_exactly_one() {
        let (_dir, database) = store::file_pool().await;
        let f = fixture_on(database).await;
        let course = f.course(3).await;
        let tasks = (0..8).map(|_| {
            let service = f.service.clone();
            let (student, course_id) = (f.student, course.id);
            tokio::spawn(async move { service.enroll(student, course_id).await })
        });
        let results: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(Error::Conflict(_))))
            .count();
        assert_eq!((ok, conflicts), (1, 7), "{results:?}");
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments")
            .fetch_one(&f.database)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        let enrollment_id = results.into_iter().find_map(|r| r.ok()).unwrap().enrollment.id;
        assert_eq!(f.lesson_rows(enrollment_id).await, 3);
    }

    #[tokio::test]
    async fn concurrent_lesson_completions_all_land() {
        let (_dir, database) = store::file_pool().await;
        let f = fixture_on(database).await;
        let course = f.course(8).await;
        f.service.enroll(f.student, course.id).await.unwrap();
        f.service.dispatcher().flush().await;

        let tasks = course.lessons.iter().map(|&lesson| {
            let service = f.service.clone();
            let (student, course_id) = (f.student, course.id);
            tokio::spawn(async move { service.mark_lesson_complete(student, course_id, lesson).await })
        });
        let results: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();
        assert!(results.iter().all(|r| r.is_ok()), "{results:?}");

        let completed = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .filter(|e| e.status == EnrollmentStatus::Completed)
            .count();
        assert_eq!(completed, 1);
        let report = query::get_progress(&f.database, f.student, course.id).await.unwrap();
        assert_eq!(report.enrollment.progress, 100);
        assert_eq!(report.enrollment.status, EnrollmentStatus::Completed);
        assert!(report.lessons.iter().all(|l| l.is_completed));

        f.service.dispatcher().flush().await;
        let completions = f
            .notifier
            .sent()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::CourseCompleted)
            .count();
        assert_eq!(completions, 1);
        let completion_emails = f
            .mailer
            .sent()
            .into_iter()
            .filter(|(_, template)| matches!(template, EmailTemplate::CourseCompleted { .. }))
            .count();
        assert_eq!(completion_emails, 1);
    }

    /// Serves one snapshot taken earlier, whatever the tables say now.
    struct FrozenCatalog(CourseSnapshot);

    #[async_trait::async_trait]
    impl CourseCatalog for FrozenCatalog {
        async fn course(&self, course_id: i64) -> anyhow::Result<Option<CourseSnapshot>> {
            Ok((self.0.id == course_id).then(|| self.0.clone()))
        }
    }

    #[tokio::test]
    async fn enroll_takes_lessons_from_inside_the_transaction() {
        let f = fixture().await;
        let course = f.course(3).await;
        let snapshot = SqliteCatalog::new(f.database.clone())
            .course(course.id)
            .await
            .unwrap()
            .unwrap();
        sqlx::query("DELETE FROM lessons WHERE id = ?")
            .bind(course.lessons[2])
            .execute(&f.database)
            .await
            .unwrap();
        let late = testing::add_lesson(&f.database, course.id, "Appendix", 4).await;

        let service = EnrollmentService::new(
            f.database.clone(),
            Arc::new(FrozenCatalog(snapshot)),
            f.service.dispatcher().clone(),
        );
        let view = service.enroll(f.student, course.id).await.unwrap();
        let detail = query::get_enrollment_detail(&f.database, f.student, course.id)
            .await
            .unwrap();
        let lessons: Vec<_> = detail.lessons.iter().map(|l| l.lesson_id).collect();
        assert_eq!(lessons, vec![course.lessons[0], course.lessons[1], late]);
        assert_eq!(view.course.lesson_count, 3);
    }

    #[tokio::test]
    async fn dropped_enrollment_is_locked() {
        let f = fixture().await;
        let course = f.course(3).await;
        f.service.enroll(f.student, course.id).await.unwrap();
        f.service
            .mark_lesson_complete(f.student, course.id, course.lessons[0])
            .await
            .unwrap();

        let dropped = f.service.drop(f.student, course.id).await.unwrap();
        assert_eq!(dropped.enrollment.status, EnrollmentStatus::Dropped);
        assert!(dropped.enrollment.dropped_at.is_some());
        assert_eq!(dropped.enrollment.progress, 33);
        assert_eq!(f.lesson_rows(dropped.enrollment.id).await, 3);

        assert!(matches!(
            f.service.enroll(f.student, course.id).await,
            Err(Error::InvalidTransition(_))
        ));
        assert!(matches!(
            f.service.drop(f.student, course.id).await,
            Err(Error::InvalidTransition(_))
        ));
        assert!(matches!(
            f.service
                .mark_lesson_complete(f.student, course.id, course.lessons[1])
                .await,
            Err(Error::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn unknown_lesson_is_not_found() {
        let f = fixture().await;
        let course = f.course(2).await;
        let other = testing::seed_course(
            &f.database,
            f.instructor,
            "Other",
            CourseStatus::Published,
            1,
        )
        .await;
        f.service.enroll(f.student, course.id).await.unwrap();

        let result = f
            .service
            .mark_lesson_complete(f.student, course.id, other.lessons[0])
            .await;
        assert!(matches!(result, Err(Error::NotFound("Lesson progress"))));

        // a lesson added after enrolling has no progress row either
        let late = testing::add_lesson(&f.database, course.id, "Late", 3).await;
        let result = f.service.mark_lesson_complete(f.student, course.id, late).await;
        assert!(matches!(result, Err(Error::NotFound("Lesson progress"))));
    }

    #[tokio::test]
    async fn recompleting_a_lesson_is_idempotent() {
        let f = fixture().await;
        let course = f.course(4).await;
        f.service.enroll(f.student, course.id).await.unwrap();

        let first = f
            .service
            .mark_lesson_complete(f.student, course.id, course.lessons[0])
            .await
            .unwrap();
        let detail = query::get_enrollment_detail(&f.database, f.student, course.id)
            .await
            .unwrap();
        let completed_at = detail.lessons[0].completed_at;

        let second = f
            .service
            .mark_lesson_complete(f.student, course.id, course.lessons[0])
            .await
            .unwrap();
        assert_eq!(first.progress, 25);
        assert_eq!(second, first);
        let detail = query::get_enrollment_detail(&f.database, f.student, course.id)
            .await
            .unwrap();
        assert_eq!(detail.lessons[0].completed_at, completed_at);
    }

    #[tokio::test]
    async fn zero_lesson_course_stays_active() {
        let f = fixture().await;
        let course = f.course(0).await;
        let view = f.service.enroll(f.student, course.id).await.unwrap();
        assert_eq!(view.enrollment.status, EnrollmentStatus::Active);
        assert_eq!(view.enrollment.progress, 0);
        assert_eq!(f.lesson_rows(view.enrollment.id).await, 0);

        let report = query::get_progress(&f.database, f.student, course.id).await.unwrap();
        assert_eq!(report.enrollment.status, EnrollmentStatus::Active);
        assert!(report.lessons.is_empty());
    }

    #[tokio::test]
    async fn unpublished_or_missing_course_is_rejected() {
        let f = fixture().await;
        let draft =
            testing::seed_course(&f.database, f.instructor, "Draft", CourseStatus::Draft, 1).await;
        assert!(matches!(
            f.service.enroll(f.student, draft.id).await,
            Err(Error::InvalidTransition(_))
        ));
        assert!(matches!(
            f.service.enroll(f.student, draft.id + 100).await,
            Err(Error::NotFound("Course"))
        ));

        let course = f.course(1).await;
        f.service.enroll(f.student, course.id).await.unwrap();
        testing::set_course_status(&f.database, course.id, CourseStatus::Archived).await;
        // archiving does not affect an existing enrollment
        let done = f
            .service
            .mark_lesson_complete(f.student, course.id, course.lessons[0])
            .await
            .unwrap();
        assert_eq!(done.status, EnrollmentStatus::Completed);
    }

    #[tokio::test]
    async fn missing_enrollment_is_not_found() {
        let f = fixture().await;
        let course = f.course(1).await;
        assert!(matches!(
            f.service.drop(f.student, course.id).await,
            Err(Error::NotFound("Enrollment"))
        ));
        assert!(matches!(
            f.service
                .mark_lesson_complete(f.student, course.id, course.lessons[0])
                .await,
            Err(Error::NotFound("Enrollment"))
        ));
    }
}
