use async_trait::async_trait;
use tracing::info;

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailTemplate {
    EnrollmentConfirmation {
        student_name: String,
        course_title: String,
    },
    NewEnrollment {
        instructor_name: String,
        student_name: String,
        course_title: String,
    },
    CourseCompleted {
        student_name: String,
        course_title: String,
    },
}

impl EmailTemplate {
    pub fn kind(&self) -> &'static str {
        match self {
            EmailTemplate::EnrollmentConfirmation { .. } => "enrollment_confirmation",
            EmailTemplate::NewEnrollment { .. } => "new_enrollment",
            EmailTemplate::CourseCompleted { .. } => "course_completed",
        }
    }

    pub fn subject(&self) -> String {
        match self {
            EmailTemplate::EnrollmentConfirmation { course_title, .. } => {
                format!("Enrollment Confirmed: {course_title}")
            }
            EmailTemplate::NewEnrollment {
                student_name,
                course_title,
                ..
            } => format!("New Enrollment: {student_name} joined {course_title}"),
            EmailTemplate::CourseCompleted { course_title, .. } => {
                format!("Congratulations! You completed {course_title}")
            }
        }
    }

    pub fn render_html(&self, frontend_url: &str) -> String {
        let (heading, greeting, body, link, action) = match self {
            EmailTemplate::EnrollmentConfirmation {
                student_name,
                course_title,
            } => (
                "You're enrolled!",
                student_name,
                format!(
                    "You've been successfully enrolled in <strong>{}</strong>. \
                     Head over to your dashboard to start learning.",
                    escape(course_title)
                ),
                "/student/courses",
                "Go to My Courses",
            ),
            EmailTemplate::NewEnrollment {
                instructor_name,
                student_name,
                course_title,
            } => (
                "New Student Enrolled",
                instructor_name,
                format!(
                    "<strong>{}</strong> has enrolled in your course <strong>{}</strong>.",
                    escape(student_name),
                    escape(course_title)
                ),
                "/instructor/courses",
                "View Your Courses",
            ),
            EmailTemplate::CourseCompleted {
                student_name,
                course_title,
            } => (
                "Course Completed!",
                student_name,
                format!(
                    "Congratulations on completing <strong>{}</strong>! \
                     Check out more courses to continue your learning journey.",
                    escape(course_title)
                ),
                "/courses",
                "Browse More Courses",
            ),
        };
        format!(
            "<div style=\"font-family: sans-serif; max-width: 560px; margin: 0 auto; padding: 32px 0;\">\
             <h2>{heading}</h2>\
             <p>Hi {},</p>\
             <p>{body}</p>\
             <a href=\"{}{link}\">{action}</a>\
             <hr />\
             <p style=\"font-size: 12px;\">This is an automated message from the LMS platform.</p>\
             </div>",
            escape(greeting),
            frontend_url.trim_end_matches('/'),
        )
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, email: EmailTemplate) -> anyhow::Result<()>;
}

/// Renders emails and hands them to the log instead of an SMTP relay.
#[derive(Debug, Clone)]
pub struct LogMailer {
    config: MailConfig,
}

impl LogMailer {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, email: EmailTemplate) -> anyhow::Result<()> {
        if !to.contains('@') {
            anyhow::bail!("invalid recipient address: {to}");
        }
        let subject = email.subject();
        let html = email.render_html(&self.config.frontend_url);
        info!(
            from = %self.config.from,
            to,
            subject,
            template = email.kind(),
            bytes = html.len(),
            "email sent"
        );
        Ok(())
    }
}
