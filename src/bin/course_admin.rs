use std::path::PathBuf;

use clap::Parser;
use course_tracker::{
    catalog::{Caller, Role, SqliteCatalog},
    config::Config,
    query::{self, EnrollmentQuery, pagination::PageRequest},
    server::Server,
    store::{self, EnrollmentStatus},
    utils::init_log,
};

#[derive(Debug, clap::Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "course_tracker.toml")]
    config: PathBuf,
    /// Database url, overrides the config file
    #[arg(short, long)]
    database: Option<String>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    Course {
        #[command(subcommand)]
        command: CourseCommand,
    },
    Enrollment {
        #[command(subcommand)]
        command: EnrollmentCommand,
    },
}

#[derive(Debug, clap::Subcommand)]
enum CourseCommand {
    List,
    Students {
        course_id: i64,
        #[arg(short, long)]
        cursor: Option<String>,
        #[arg(short, long)]
        limit: Option<u32>,
    },
}

#[derive(Debug, clap::Subcommand)]
enum EnrollmentCommand {
    List {
        #[arg(short, long)]
        student: i64,
        #[arg(long, value_enum)]
        status: Option<EnrollmentStatus>,
        #[arg(short, long)]
        cursor: Option<String>,
        #[arg(short, long)]
        limit: Option<u32>,
    },
    Enroll {
        student: i64,
        course: i64,
    },
    Drop {
        student: i64,
        course: i64,
    },
    Complete {
        student: i64,
        course: i64,
        lesson: i64,
    },
    Progress {
        student: i64,
        course: i64,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let mut config = Config::load(&args.config)?;
    if let Some(url) = args.database {
        config.database.url = url;
    }
    let _guard = init_log(config.log.dir.clone())?;
    let database = store::connect(&config.database).await?;
    let server = Server::new(database.clone(), &config);

    match args.command {
        Commands::Course { command } => match command {
            CourseCommand::List => {
                for course in SqliteCatalog::new(database).list().await? {
                    println!(
                        "{:<8} {:<10} {:>3} lessons  {}",
                        course.id,
                        format!("{:?}", course.status),
                        course.lesson_count,
                        course.title
                    );
                }
            }
            CourseCommand::Students {
                course_id,
                cursor,
                limit,
            } => {
                // operator access, same view as an admin
                let caller = Caller {
                    user_id: 0,
                    role: Role::SuperAdmin,
                };
                let page = query::list_course_students(
                    &database,
                    caller,
                    course_id,
                    PageRequest::new(cursor, limit),
                )
                .await?;
                for student in &page.data {
                    println!(
                        "{:<8} {:<24} {:<32} {:<10} {:>3}%",
                        student.student_id,
                        format!("{} {}", student.first_name, student.last_name),
                        student.email,
                        format!("{:?}", student.status),
                        student.progress
                    );
                }
                print_next_cursor(page.meta.next_cursor);
            }
        },
        Commands::Enrollment { command } => match command {
            EnrollmentCommand::List {
                student,
                status,
                cursor,
                limit,
            } => {
                let query = EnrollmentQuery {
                    status,
                    cursor,
                    limit,
                };
                let page = query::list_my_enrollments(&database, student, query).await?;
                for view in &page.data {
                    println!(
                        "{:<8} {:<10} {:>3}%  {}",
                        view.enrollment.id,
                        format!("{:?}", view.enrollment.status),
                        view.enrollment.progress,
                        view.course.title
                    );
                }
                print_next_cursor(page.meta.next_cursor);
            }
            EnrollmentCommand::Enroll { student, course } => {
                let view = server.enrollments.enroll(student, course).await?;
                println!(
                    "Student {} enrolled in \"{}\" (enrollment {})",
                    student, view.course.title, view.enrollment.id
                );
            }
            EnrollmentCommand::Drop { student, course } => {
                let view = server.enrollments.drop(student, course).await?;
                println!("Enrollment {} dropped", view.enrollment.id);
            }
            EnrollmentCommand::Complete {
                student,
                course,
                lesson,
            } => {
                let enrollment = server
                    .enrollments
                    .mark_lesson_complete(student, course, lesson)
                    .await?;
                println!(
                    "Lesson {} completed, progress {}% ({:?})",
                    lesson, enrollment.progress, enrollment.status
                );
            }
            EnrollmentCommand::Progress { student, course } => {
                let report = query::get_progress(&database, student, course).await?;
                println!(
                    "Enrollment {}: {}% ({:?})",
                    report.enrollment.id, report.enrollment.progress, report.enrollment.status
                );
                for lesson in report.lessons {
                    let mark = if lesson.is_completed { "x" } else { " " };
                    println!("  [{}] {:<4} {}", mark, lesson.position, lesson.title);
                }
            }
        },
    }

    server.shutdown().await;
    Ok(())
}

fn print_next_cursor(cursor: Option<String>) {
    if let Some(cursor) = cursor {
        println!("-- more, next cursor: {cursor}");
    }
}
