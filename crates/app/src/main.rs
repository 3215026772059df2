use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use curriculum_core::model::{CandidateId, TaskId, WeekNumber, WeeklyContent};
use curriculum_core::progression::ChapterStatus;
use curriculum_core::segmenter::Segmenter;
use services::{
    CurriculumConfig, LearnerSession, PollCanceller, ProgressSynchronizer, WeekSession,
    wait_for_content,
};
use storage::http::{HttpStore, HttpStoreConfig};
use storage::repository::Storage;
use storage::sqlite::SqliteRepository;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    InvalidDbUrl { raw: String },
    ImportNeedsSqlite,
    AnswerCount { expected: usize, got: usize },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::ImportNeedsSqlite => write!(f, "import writes to SQLite; drop --store-url"),
            ArgsError::AnswerCount { expected, got } => {
                write!(f, "quiz has {expected} questions, got {got} answers")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

/// Read chapters, complete tasks and take quizzes from the terminal.
#[derive(Parser)]
#[command(name = "curriculum", version, about, long_about = None)]
struct Cli {
    /// SQLite database URL or path.
    #[arg(long = "db", env = "CURRICULUM_DB_URL", default_value = "sqlite://curriculum.sqlite3", global = true)]
    db_url: String,

    /// Base URL of a remote progress service; overrides --db.
    #[arg(long, env = "CURRICULUM_STORE_URL", global = true)]
    store_url: Option<String>,

    /// TOML config file.
    #[arg(long, env = "CURRICULUM_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Copy)]
struct WeekArgs {
    #[arg(long)]
    candidate: CandidateId,
    #[arg(long)]
    week: WeekNumber,
}

#[derive(Subcommand)]
enum Command {
    /// Load a week of generated content from a JSON file
    Import {
        #[arg(long)]
        candidate: CandidateId,
        file: PathBuf,
    },
    /// List a week's chapters and their status
    Chapters {
        #[command(flatten)]
        target: WeekArgs,
    },
    /// Show a week's progress
    Progress {
        #[command(flatten)]
        target: WeekArgs,
    },
    /// Show progress across the whole plan
    Overall {
        #[arg(long)]
        candidate: CandidateId,
    },
    /// Complete the current chapter, or the one given by --index
    CompleteChapter {
        #[command(flatten)]
        target: WeekArgs,
        #[arg(long)]
        index: Option<usize>,
    },
    /// Mark a coding task done
    CompleteTask {
        #[command(flatten)]
        target: WeekArgs,
        #[arg(long)]
        task: TaskId,
    },
    /// Submit quiz answers in question order, e.g. --answers 0,2,1
    SubmitQuiz {
        #[command(flatten)]
        target: WeekArgs,
        #[arg(long, value_delimiter = ',', required = true)]
        answers: Vec<usize>,
    },
    /// Wait until a week's content has been generated
    Wait {
        #[command(flatten)]
        target: WeekArgs,
    },
}

fn normalize_sqlite_url(raw: &str) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw.to_owned();
    }

    let trimmed = raw.trim();
    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

async fn open_storage(
    cli: &Cli,
    segmenter: Segmenter,
) -> Result<Storage, Box<dyn std::error::Error>> {
    if let Some(base_url) = cli.store_url.as_deref().filter(|u| !u.trim().is_empty()) {
        tracing::debug!(base_url, "using remote progress service");
        let store = HttpStore::new(HttpStoreConfig {
            base_url: base_url.to_owned(),
        })
        .with_segmenter(segmenter);
        return Ok(Storage::from_store(store));
    }

    let db_url = normalize_sqlite_url(&cli.db_url);
    prepare_sqlite_file(&db_url)?;
    Ok(Storage::sqlite(&db_url, segmenter).await?)
}

async fn open_week(
    storage: &Storage,
    config: &CurriculumConfig,
    target: WeekArgs,
) -> Result<LearnerSession, Box<dyn std::error::Error>> {
    let mut session = LearnerSession::new(
        target.candidate,
        ProgressSynchronizer::new(Arc::clone(&storage.progress)),
        Arc::clone(&storage.content),
    )
    .with_config(config)?;
    session.open_week(target.week).await?;
    Ok(session)
}

fn loaded(session: &LearnerSession) -> Result<&WeekSession, Box<dyn std::error::Error>> {
    session
        .week()
        .ok_or_else(|| services::SyncError::NotLoaded.into())
}

fn print_chapters(week: &WeekSession) {
    let Some(progression) = week.progression() else {
        println!("reading material is still being generated");
        return;
    };
    for (chapter, status) in week.chapters().iter().zip(progression.statuses()) {
        let mark = match status {
            ChapterStatus::Completed => "x",
            ChapterStatus::Unlocked => " ",
            ChapterStatus::Locked => "-",
        };
        let current = if chapter.ordinal as usize == progression.current_index() {
            ">"
        } else {
            " "
        };
        println!("{current} [{mark}] {} {}", chapter.ordinal, chapter.title);
    }
}

fn print_progress(week: &WeekSession) {
    let record = week.record();
    let progress = week.progress();
    println!("week {}: {}%", progress.week_number, progress.percent);
    println!(
        "  chapters: {}/{}",
        record.completed_chapters().len(),
        week.chapters().len()
    );
    match week.tasks() {
        Some(tasks) => println!("  tasks: {}/{}", tasks.completed().len(), tasks.total()),
        None => println!("  tasks: pending"),
    }
    match record.quiz_score() {
        Some(score) => println!("  quiz: {score}%"),
        None => println!("  quiz: not taken"),
    }
    let missing = week.content().missing_parts();
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
        println!("  still generating: {}", names.join(", "));
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = CurriculumConfig::load(cli.config.as_deref())?;
    let segmenter = config.segmenter()?;

    if let Command::Import { candidate, file } = &cli.command {
        if cli.store_url.is_some() {
            return Err(ArgsError::ImportNeedsSqlite.into());
        }
        let raw = std::fs::read_to_string(file)?;
        let content: WeeklyContent = serde_json::from_str(&raw)?;
        let db_url = normalize_sqlite_url(&cli.db_url);
        prepare_sqlite_file(&db_url)?;
        let repo = SqliteRepository::connect(&db_url).await?;
        repo.migrate().await?;
        repo.upsert_weekly_content(*candidate, &content).await?;
        println!(
            "imported week {} for candidate {candidate}",
            content.week_number
        );
        return Ok(());
    }

    let storage = open_storage(&cli, segmenter).await?;

    match cli.command {
        Command::Import { .. } => Ok(()),
        Command::Chapters { target } => {
            let session = open_week(&storage, &config, target).await?;
            print_chapters(loaded(&session)?);
            Ok(())
        }
        Command::Progress { target } => {
            let session = open_week(&storage, &config, target).await?;
            print_progress(loaded(&session)?);
            Ok(())
        }
        Command::Overall { candidate } => {
            let sync = ProgressSynchronizer::new(Arc::clone(&storage.progress));
            let overall = sync.fetch_overall_progress(candidate).await?;
            for week in &overall.per_week {
                let done = if week.is_complete { " (complete)" } else { "" };
                println!("week {}: {}%{done}", week.week_number, week.percent);
            }
            println!("overall: {}%", overall.overall_percent);
            Ok(())
        }
        Command::CompleteChapter { target, index } => {
            let mut session = open_week(&storage, &config, target).await?;
            let wrote = match index {
                Some(index) => session.complete_chapter(index).await?,
                None => session.complete_current().await?,
            };
            if !wrote {
                println!("already completed");
            }
            print_chapters(loaded(&session)?);
            Ok(())
        }
        Command::CompleteTask { target, task } => {
            let mut session = open_week(&storage, &config, target).await?;
            if session.complete_task(&task).await? {
                println!("task {task} completed");
            } else {
                println!("task {task} was already completed");
            }
            Ok(())
        }
        Command::SubmitQuiz { target, answers } => {
            let mut session = open_week(&storage, &config, target).await?;
            let ids: Vec<_> = loaded(&session)?
                .content()
                .questions()
                .map(|qs| qs.iter().map(|q| q.id.clone()).collect())
                .unwrap_or_default();
            if !ids.is_empty() && ids.len() != answers.len() {
                return Err(ArgsError::AnswerCount {
                    expected: ids.len(),
                    got: answers.len(),
                }
                .into());
            }
            for (id, answer) in ids.iter().zip(&answers) {
                session.select_answer(id, *answer)?;
            }
            if let Some(grade) = session.submit_quiz().await? {
                for result in &grade.results {
                    let mark = if result.is_correct { "correct" } else { "wrong" };
                    println!("{}: {mark}", result.question_id);
                }
                println!("score: {}% ({}/{})", grade.score, grade.correct, grade.total);
            }
            Ok(())
        }
        Command::Wait { target } => {
            let cancel = PollCanceller::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });
            let content = wait_for_content(
                storage.content.as_ref(),
                target.candidate,
                target.week,
                &config.poll,
                &cancel,
            )
            .await?;
            println!("week {} is ready", content.week_number);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn relative_paths_become_absolute_urls() {
        let url = normalize_sqlite_url("sqlite:data/dev.sqlite3");
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/dev.sqlite3"));
        assert_eq!(normalize_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite:///tmp/x.sqlite3"),
            "sqlite:///tmp/x.sqlite3"
        );
    }

    #[test]
    fn answers_parse_as_a_comma_list() {
        let cli = Cli::try_parse_from([
            "curriculum",
            "submit-quiz",
            "--candidate",
            "1",
            "--week",
            "2",
            "--answers",
            "0,2,1",
        ])
        .unwrap();
        match cli.command {
            Command::SubmitQuiz { target, answers } => {
                assert_eq!(target.week, WeekNumber::new(2));
                assert_eq!(target.candidate, CandidateId::new(1));
                assert_eq!(answers, vec![0, 2, 1]);
            }
            _ => panic!("expected submit-quiz"),
        }
    }

    #[test]
    fn ids_are_parsed_by_clap() {
        let cli = Cli::try_parse_from([
            "curriculum",
            "complete-task",
            "--candidate",
            " 9 ",
            "--week",
            "3",
            "--task",
            "task_2",
        ])
        .unwrap();
        match cli.command {
            Command::CompleteTask { target, task } => {
                assert_eq!(target.candidate, CandidateId::new(9));
                assert_eq!(task, TaskId::new("task_2"));
            }
            _ => panic!("expected complete-task"),
        }

        let bad_week = Cli::try_parse_from([
            "curriculum",
            "progress",
            "--candidate",
            "1",
            "--week",
            "week-one",
        ]);
        assert!(bad_week.is_err());

        let blank_task = Cli::try_parse_from([
            "curriculum",
            "complete-task",
            "--candidate",
            "1",
            "--week",
            "1",
            "--task",
            "  ",
        ]);
        assert!(blank_task.is_err());
    }

    #[test]
    fn bad_db_url_is_rejected() {
        assert!(prepare_sqlite_file("postgres://nope").is_err());
    }
}
