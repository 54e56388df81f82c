//! Side effects of enrollment state transitions.
//!
//! Each trigger runs as a detached task once the primary transaction has
//! committed. Failures are logged with the user and event they belong to and
//! never reach the caller. Delivery is at most once.

pub mod mailer;

use std::sync::Arc;

use serde_json::json;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::{
    catalog::{CourseCatalog, CourseSnapshot, UserDirectory},
    notification::{NotificationKind, Notifier},
    realtime::RealtimePush,
};
use mailer::{EmailTemplate, Mailer};

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    directory: Arc<dyn UserDirectory>,
    catalog: Arc<dyn CourseCatalog>,
    notifier: Arc<dyn Notifier>,
    mailer: Arc<dyn Mailer>,
    realtime: Arc<dyn RealtimePush>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        catalog: Arc<dyn CourseCatalog>,
        notifier: Arc<dyn Notifier>,
        mailer: Arc<dyn Mailer>,
        realtime: Arc<dyn RealtimePush>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                directory,
                catalog,
                notifier,
                mailer,
                realtime,
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Instructor notification, student push and both emails for a new enrollment.
    pub fn enrollment_created(&self, student_id: i64, course: CourseSnapshot) {
        let inner = self.inner.clone();
        self.inner.tasks.spawn(async move {
            let course_id = course.id;
            if let Err(e) = inner.on_enrollment(student_id, course).await {
                error!(student_id, course_id, error = %e, "post-enrollment side effects failed");
            }
        });
    }

    /// Student notification and email once a course is completed.
    pub fn course_completed(&self, student_id: i64, course_id: i64) {
        let inner = self.inner.clone();
        self.inner.tasks.spawn(async move {
            if let Err(e) = inner.on_course_complete(student_id, course_id).await {
                error!(student_id, course_id, error = %e, "post-completion side effects failed");
            }
        });
    }

    /// Number of side-effect tasks still running
    pub fn pending(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Wait until every side effect dispatched so far has finished.
    pub async fn flush(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }
}

impl Inner {
    async fn on_enrollment(&self, student_id: i64, course: CourseSnapshot) -> anyhow::Result<()> {
        let (student, instructor) = tokio::try_join!(
            self.directory.contact(student_id),
            self.directory.contact(course.instructor_id)
        )?;
        let (Some(student), Some(instructor)) = (student, instructor) else {
            warn!(
                student_id,
                instructor_id = course.instructor_id,
                "contact info missing, skipping enrollment side effects"
            );
            return Ok(());
        };
        let student_name = student.full_name();
        let instructor_name = instructor.full_name();

        if let Err(e) = self
            .notifier
            .notify(
                course.instructor_id,
                "New Enrollment",
                &format!("{} enrolled in \"{}\"", student_name, course.title),
                NotificationKind::Enrollment,
            )
            .await
        {
            error!(
                user_id = course.instructor_id,
                event = "enrollment",
                error = %e,
                "failed to create notification"
            );
        }

        self.realtime
            .push(student_id, "enrollment:new", json!({ "courseId": course.id }));

        let (confirmation, alert) = tokio::join!(
            self.mailer.send(
                &student.email,
                EmailTemplate::EnrollmentConfirmation {
                    student_name: student.first_name.clone(),
                    course_title: course.title.clone(),
                },
            ),
            self.mailer.send(
                &instructor.email,
                EmailTemplate::NewEnrollment {
                    instructor_name,
                    student_name,
                    course_title: course.title.clone(),
                },
            )
        );
        if let Err(e) = confirmation {
            error!(user_id = student_id, email = "enrollment_confirmation", error = %e, "failed to send email");
        }
        if let Err(e) = alert {
            error!(user_id = course.instructor_id, email = "new_enrollment", error = %e, "failed to send email");
        }
        info!(student_id, course_id = course.id, "enrollment side effects done");
        Ok(())
    }

    async fn on_course_complete(&self, student_id: i64, course_id: i64) -> anyhow::Result<()> {
        let (student, course) = tokio::try_join!(
            self.directory.contact(student_id),
            self.catalog.course(course_id)
        )?;
        let (Some(student), Some(course)) = (student, course) else {
            warn!(student_id, course_id, "student or course missing, skipping completion side effects");
            return Ok(());
        };

        if let Err(e) = self
            .notifier
            .notify(
                student_id,
                "Course Completed!",
                &format!("Congratulations! You've completed \"{}\"", course.title),
                NotificationKind::CourseCompleted,
            )
            .await
        {
            error!(user_id = student_id, event = "course_completed", error = %e, "failed to create notification");
        }

        if let Err(e) = self
            .mailer
            .send(
                &student.email,
                EmailTemplate::CourseCompleted {
                    student_name: student.first_name,
                    course_title: course.title,
                },
            )
            .await
        {
            error!(user_id = student_id, email = "course_completed", error = %e, "failed to send email");
        }
        info!(student_id, course_id, "completion side effects done");
        Ok(())
    }
}
