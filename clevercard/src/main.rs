//! clevercard - command-line client for CleverCard
//!
//! Signs a teacher in against the configured persistence service and runs
//! one command: list or create classes and students, list report cards, or
//! print dashboard totals.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/clevercard/config.toml (~/.config/clevercard/config.toml)
//! - Logs: $XDG_STATE_HOME/clevercard/ (~/.local/state/clevercard/)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clevercard_core::selectors::{self, DashboardStats};
use clevercard_core::{CleverCard, Config, NewClass, NewStudent, ReportCard};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "clevercard")]
#[command(about = "Manage CleverCard classes, students and report cards")]
#[command(version)]
struct Args {
    /// Account email
    #[arg(long, env = "CLEVERCARD_EMAIL", global = true)]
    email: Option<String>,

    /// Account password
    #[arg(long, env = "CLEVERCARD_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the signed-in user
    Whoami,

    /// List your classes
    Classes,

    /// Create a class
    AddClass {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        subject: String,
        /// Academic year, e.g. 2024/2025
        #[arg(long, default_value = "")]
        year: String,
    },

    /// List students
    Students {
        /// Only students of this class
        #[arg(long)]
        class: Option<String>,
        /// Filter by name or registration number
        #[arg(long)]
        search: Option<String>,
    },

    /// Enroll a student
    AddStudent {
        #[arg(long)]
        class: String,
        #[arg(long)]
        name: String,
        /// Registration number
        #[arg(long)]
        reg: String,
    },

    /// List report cards
    Reports {
        /// Only reports of this student
        #[arg(long)]
        student: Option<String>,
        /// Only reports for this term
        #[arg(long)]
        term: Option<String>,
        /// Show the N best reports
        #[arg(long)]
        top: Option<usize>,
    },

    /// Print dashboard totals
    Summary,

    /// Register a new teacher account
    Signup {
        /// Full name for the profile
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    config
        .backend
        .validate()
        .with_context(|| format!("backend is not configured ({})", Config::config_path().display()))?;

    let _log_guard =
        clevercard_core::logging::init(&config.logging).context("failed to initialize logging")?;
    tracing::info!("clevercard starting");

    let app = CleverCard::connect(&config.backend).context("failed to create backend client")?;
    let (email, password) = credentials(&args)?;

    if let Command::Signup { name } = &args.command {
        let outcome = app.session.sign_up(&email, &password, name).await?;
        if outcome.session.is_some() {
            println!("Account created for {}", email);
        } else {
            println!("Account created for {}. Check your email to verify it.", email);
        }
        return Ok(());
    }

    let user = app
        .session
        .sign_in(&email, &password)
        .await
        .context("sign-in failed")?;

    let result = run(&app, &args).await;
    if let Err(e) = app.session.sign_out().await {
        tracing::warn!(error = %e, "Sign-out failed");
    }
    tracing::info!(user_id = %user.id, "clevercard finished");
    result
}

fn credentials(args: &Args) -> Result<(String, String)> {
    match (&args.email, &args.password) {
        (Some(email), Some(password)) => Ok((email.clone(), password.clone())),
        _ => bail!("--email and --password are required (or set CLEVERCARD_EMAIL and CLEVERCARD_PASSWORD)"),
    }
}

async fn run(app: &CleverCard, args: &Args) -> Result<()> {
    match &args.command {
        Command::Whoami => {
            let state = app.state.snapshot();
            let Some(user) = state.user.as_ref() else {
                bail!("not signed in");
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(user)?);
            } else {
                println!("{} <{}>", display_name(&user.full_name), user.email);
                println!("Role:   {}", user.role);
                println!("School: {}", user.school_id.as_deref().unwrap_or("-"));
            }
        }

        Command::Classes => {
            app.store.load_classes().await.context("failed to load classes")?;
            let state = app.state.snapshot();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&state.classes)?);
            } else if state.classes.is_empty() {
                println!("No classes yet");
            } else {
                for class in &state.classes {
                    println!(
                        "{}  {:<20} {:<16} {:<10} {} student(s)",
                        class.id,
                        class.name,
                        class.subject,
                        class.academic_year,
                        class.student_count.unwrap_or(0)
                    );
                }
            }
        }

        Command::AddClass {
            name,
            subject,
            year,
        } => {
            let class = app
                .store
                .create_class(NewClass {
                    name: name.clone(),
                    subject: subject.clone(),
                    academic_year: year.clone(),
                    school_id: None,
                })
                .await
                .context("failed to create class")?;
            print_created(args.json, &class.id, &class)?;
        }

        Command::Students { class, search } => {
            app.store
                .load_students(class.as_deref())
                .await
                .context("failed to load students")?;
            let state = app.state.snapshot();
            let students = selectors::search_students(
                &state.students,
                search.as_deref().unwrap_or(""),
                class.as_deref(),
            );
            if args.json {
                println!("{}", serde_json::to_string_pretty(&students)?);
            } else if students.is_empty() {
                println!("No students found");
            } else {
                for student in students {
                    println!(
                        "{}  {:<10} {}",
                        student.id, student.registration_number, student.full_name
                    );
                }
            }
        }

        Command::AddStudent { class, name, reg } => {
            let student = app
                .store
                .create_student(NewStudent {
                    class_id: class.clone(),
                    full_name: name.clone(),
                    registration_number: reg.clone(),
                    ..Default::default()
                })
                .await
                .context("failed to enroll student")?;
            print_created(args.json, &student.id, &student)?;
        }

        Command::Reports { student, term, top } => {
            app.store
                .load_reports(student.as_deref())
                .await
                .context("failed to load reports")?;
            let state = app.state.snapshot();
            let filtered: Vec<ReportCard> = match term {
                Some(term) => selectors::reports_for_term(&state.reports, term)
                    .into_iter()
                    .cloned()
                    .collect(),
                None => state.reports.clone(),
            };
            let reports = match top {
                Some(n) => selectors::top_performers(&filtered, *n),
                None => filtered.iter().collect(),
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else if reports.is_empty() {
                println!("No report cards found");
            } else {
                for report in reports {
                    println!(
                        "{}  {:<12} {:<10} {:>6.1}  {}",
                        report.student_id,
                        report.term,
                        report.academic_year,
                        report.total_score,
                        report.grade
                    );
                }
            }
        }

        Command::Summary => {
            app.load_all().await.context("failed to load data")?;
            let stats = app.dashboard();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_summary(&stats);
            }
        }

        Command::Signup { .. } => bail!("signup runs without signing in"),
    }
    Ok(())
}

fn display_name(full_name: &str) -> &str {
    if full_name.is_empty() {
        "(no name)"
    } else {
        full_name
    }
}

fn print_created<T: Serialize>(as_json: bool, id: &str, record: &T) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        println!("Created {}", id);
    }
    Ok(())
}

fn print_summary(stats: &DashboardStats) {
    println!("Classes:          {}", stats.class_count);
    println!("Students:         {}", stats.student_count);
    println!("Report cards:     {}", stats.report_count);
    println!("Average score:    {}", stats.format_average());
    println!("With AI insights: {}", stats.insight_report_count);
}
