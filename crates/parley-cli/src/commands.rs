use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

use parley_config::{ConfigLoader, ParleyConfig};
use parley_core::{
    LogLevel, ModelStrategy, ParleyError, Preset, Result, SessionConfig, SessionEvent,
};
use parley_llm::{AnthropicClient, LlmClient, MockClient, OpenAiClient, RetryClient};
use parley_runtime::{Runtime, StartRequest};
use parley_store::SessionStore;

/// Parley — iterative multi-reviewer document refinement
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to parley.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a refinement session on a document file and stream progress
    Start {
        /// Path to the document to refine
        file: PathBuf,
        /// Session title
        #[arg(short, long)]
        title: Option<String>,
        /// What the refinement should achieve
        #[arg(short, long)]
        goal: Option<String>,
        /// Document type tag (e.g. prd, architecture)
        #[arg(short, long, default_value = "document")]
        document_type: String,
        /// Maximum refinement iterations
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,
        /// Number of reviewer participants (2..6)
        #[arg(short, long)]
        participants: Option<u32>,
        /// Built-in roundtable preset: prd, code-review, architecture, business-strategy
        #[arg(long)]
        preset: Option<String>,
        /// Free-text style hint for the generated participants
        #[arg(long)]
        style: Option<String>,
        /// Primary model id (overrides config)
        #[arg(short, long)]
        model: Option<String>,
        /// Model assignment: uniform or diverse
        #[arg(long, default_value = "uniform")]
        model_strategy: String,
        /// Run the full iteration budget regardless of convergence
        #[arg(long)]
        force_max_iterations: bool,
    },
    /// Show a session's current status
    Status { session: String },
    /// List sessions, newest first
    List,
    /// Print a document version's content
    Show {
        session: String,
        /// Version number; defaults to the final version
        #[arg(short, long)]
        version: Option<u32>,
    },
    /// Print the reviews recorded for a document version
    Reviews {
        session: String,
        #[arg(short, long, default_value = "1")]
        version: u32,
    },
    /// Print a session's convergence report
    Report {
        session: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extend a session that hit its iteration cap with High issues left
    Continue {
        session: String,
        /// Additional iterations to grant
        #[arg(short, long, default_value = "2")]
        additional: u32,
    },
    /// Delete a terminal session and all its artifacts
    Delete { session: String },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        let log_level = self
            .log_level
            .as_deref()
            .unwrap_or(&config.logging.level)
            .to_string();
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
            )
            .with_target(false)
            .init();

        match self.command {
            Commands::Start {
                file,
                title,
                goal,
                document_type,
                max_iterations,
                participants,
                preset,
                style,
                model,
                model_strategy,
                force_max_iterations,
            } => {
                cmd_start(
                    config,
                    StartArgs {
                        file,
                        title,
                        goal,
                        document_type,
                        max_iterations,
                        participants,
                        preset,
                        style,
                        model,
                        model_strategy,
                        force_max_iterations,
                    },
                )
                .await
            }
            Commands::Status { session } => cmd_status(config, &session),
            Commands::List => cmd_list(config),
            Commands::Show { session, version } => cmd_show(config, &session, version),
            Commands::Reviews { session, version } => cmd_reviews(config, &session, version),
            Commands::Report { session, json } => cmd_report(config, &session, json),
            Commands::Continue {
                session,
                additional,
            } => cmd_continue(config, &session, additional).await,
            Commands::Delete { session } => cmd_delete(config, &session),
            Commands::Completions { shell } => {
                generate(shell, &mut Cli::command(), "parley", &mut std::io::stdout());
                Ok(())
            }
        }
    }
}

struct StartArgs {
    file: PathBuf,
    title: Option<String>,
    goal: Option<String>,
    document_type: String,
    max_iterations: Option<u32>,
    participants: Option<u32>,
    preset: Option<String>,
    style: Option<String>,
    model: Option<String>,
    model_strategy: String,
    force_max_iterations: bool,
}

fn build_client(config: &ParleyConfig) -> Result<Arc<dyn LlmClient>> {
    let transport: Arc<dyn LlmClient> = match config.llm.provider.as_str() {
        "anthropic" => {
            let key = config.llm.anthropic_api_key.clone().ok_or_else(|| {
                ParleyError::InvalidConfig {
                    field: "llm.anthropic_api_key".into(),
                    reason: "not set (config or ANTHROPIC_API_KEY)".into(),
                }
            })?;
            Arc::new(AnthropicClient::new(key))
        }
        "openai" => {
            let key = config.llm.openai_api_key.clone().ok_or_else(|| {
                ParleyError::InvalidConfig {
                    field: "llm.openai_api_key".into(),
                    reason: "not set (config or OPENAI_API_KEY)".into(),
                }
            })?;
            let mut client = OpenAiClient::new(key);
            if let Some(ref url) = config.llm.openai_base_url {
                client = client.with_base_url(url.clone(), "openai".into());
            }
            Arc::new(client)
        }
        "mock" => Arc::new(
            MockClient::new("mock")
                .with_default_response(r#"{"issues": [], "overall_assessment": "fine"}"#),
        ),
        other => {
            return Err(ParleyError::InvalidConfig {
                field: "llm.provider".into(),
                reason: format!("unknown provider '{other}'"),
            })
        }
    };
    Ok(Arc::new(RetryClient::new(transport)))
}

fn open_runtime(config: &ParleyConfig) -> Result<Runtime> {
    let store = SessionStore::open(&config.storage.db_path)?;
    let client = build_client(config)?;
    Ok(Runtime::new(store, client, &config.llm.model))
}

async fn cmd_start(config: ParleyConfig, args: StartArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.file)?;
    let title = args.title.unwrap_or_else(|| {
        args.file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Untitled".into())
    });

    let session_config = SessionConfig {
        max_iterations: args
            .max_iterations
            .unwrap_or(config.refinement.max_iterations),
        delta_threshold: config.refinement.delta_threshold,
        stop_on_no_high_issues: config.refinement.stop_on_no_high_issues,
        force_max_iterations: args.force_max_iterations,
        num_participants: args
            .participants
            .unwrap_or(config.refinement.num_participants),
        preset: match args.preset.as_deref() {
            Some(p) => Preset::from_str(p).map_err(|reason| ParleyError::InvalidConfig {
                field: "preset".into(),
                reason,
            })?,
            None => Preset::None,
        },
        participant_style: args.style,
        model: args.model,
        model_strategy: match args.model_strategy.as_str() {
            "uniform" => ModelStrategy::Uniform,
            "diverse" => ModelStrategy::Diverse,
            other => {
                return Err(ParleyError::InvalidConfig {
                    field: "model_strategy".into(),
                    reason: format!("expected uniform or diverse, got '{other}'"),
                })
            }
        },
    };

    let runtime = open_runtime(&config)?;
    let mut request = StartRequest::new(title, content).with_config(session_config);
    request.goal = args.goal;
    request.document_type = args.document_type;

    let (session_id, mut events) = runtime.start(request)?;
    println!("session {session_id}");

    while let Some(event) = events.recv().await {
        print_event(&event);
        match event {
            SessionEvent::RefinementComplete { .. } => break,
            SessionEvent::Log {
                level: LogLevel::Error,
                ..
            } => break,
            _ => {}
        }
    }

    let status = runtime.wait(&session_id).await?;
    println!("terminal status: {status}");
    if let Ok(report) = runtime.get_report(&session_id) {
        println!(
            "final version v{} after {} iterations ({})",
            report.final_version, report.iterations_count, report.convergence_reason
        );
    }
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::SessionCreated { title, .. } => println!("▸ session created: {title}"),
        SessionEvent::RoundtableGenerating {
            num_participants, ..
        } => println!("▸ assembling {num_participants} reviewers…"),
        SessionEvent::RoundtableGenerated {
            participants,
            moderator_focus,
        } => {
            for p in participants {
                println!("  • {} — {}", p.name, p.role);
            }
            println!("  moderator focus: {moderator_focus}");
        }
        SessionEvent::IterationStart {
            iteration,
            max_iterations,
        } => println!("▸ iteration {iteration}/{max_iterations}"),
        SessionEvent::CriticReviewStart { critic } => println!("    {critic} reviewing…"),
        SessionEvent::CriticReviewComplete {
            critic,
            issues_count,
            counts,
            ..
        } => println!(
            "    {critic}: {issues_count} issues ({} high, {} medium, {} low)",
            counts.high, counts.medium, counts.low
        ),
        SessionEvent::ConvergenceCheck {
            converged, reason, ..
        } => {
            if *converged {
                println!("  ✔ {reason}");
            } else {
                println!("  ↻ {reason}");
            }
        }
        SessionEvent::ModeratorStart { .. } => println!("    moderator refining…"),
        SessionEvent::ModeratorComplete { new_version, .. } => {
            println!("    moderator produced v{new_version}")
        }
        SessionEvent::RefinementComplete {
            final_version,
            converged,
            stopped_by,
            total_tokens,
            ..
        } => println!(
            "✔ refinement complete: v{final_version}, converged={converged}, stopped_by={stopped_by}, {total_tokens} tokens"
        ),
        SessionEvent::Log {
            level,
            source,
            message,
        } => println!("  [{level:?}] {source}: {message}"),
    }
}

fn cmd_status(config: ParleyConfig, session: &str) -> Result<()> {
    let runtime = open_runtime(&config)?;
    let status = runtime.status(session)?;
    println!(
        "{}: {} (iteration {}/{}, final version {})",
        status.session_id,
        status.status,
        status.current_iteration,
        status.max_iterations,
        status
            .final_version
            .map(|v| format!("v{v}"))
            .unwrap_or_else(|| "-".into()),
    );
    Ok(())
}

fn cmd_list(config: ParleyConfig) -> Result<()> {
    let runtime = open_runtime(&config)?;
    let sessions = runtime.list_sessions()?;
    if sessions.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    for meta in sessions {
        println!(
            "{}  {:<10} {}  ({} iterations)",
            meta.session_id,
            meta.status.to_string(),
            meta.title,
            meta.current_iteration
        );
    }
    Ok(())
}

fn cmd_show(config: ParleyConfig, session: &str, version: Option<u32>) -> Result<()> {
    let runtime = open_runtime(&config)?;
    let version = match version {
        Some(v) => v,
        None => runtime
            .get_session(session)?
            .final_version
            .unwrap_or(1),
    };
    let doc = runtime.get_version(session, version)?;
    println!("{}", doc.content);
    Ok(())
}

fn cmd_reviews(config: ParleyConfig, session: &str, version: u32) -> Result<()> {
    let runtime = open_runtime(&config)?;
    let reviews = runtime.get_reviews(session, version)?;
    if reviews.is_empty() {
        println!("no reviews recorded for v{version}");
        return Ok(());
    }
    for review in reviews {
        println!("=== {} ===", review.reviewer_name);
        println!("{}", review.overall_assessment);
        for issue in &review.issues {
            println!("  [{}] {}: {}", issue.severity, issue.category, issue.description);
            if let Some(ref fix) = issue.suggested_fix {
                println!("      fix: {fix}");
            }
        }
    }
    Ok(())
}

fn cmd_report(config: ParleyConfig, session: &str, json: bool) -> Result<()> {
    let runtime = open_runtime(&config)?;
    let report = runtime.get_report(session)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("{} — {}", report.session_id, report.title);
    println!(
        "converged: {} ({}, stopped by {})",
        report.converged, report.convergence_reason, report.stopped_by
    );
    println!(
        "versions v{}..v{}, {} iterations, {} issues identified",
        report.initial_version,
        report.final_version,
        report.iterations_count,
        report.total_issues_identified
    );
    println!(
        "final issue counts: {} high, {} medium, {} low",
        report.final_issue_count.high, report.final_issue_count.medium, report.final_issue_count.low
    );
    let total: u64 = report.token_usage.values().map(|t| t.total).sum();
    println!("tokens: {total}");
    Ok(())
}

async fn cmd_continue(config: ParleyConfig, session: &str, additional: u32) -> Result<()> {
    let runtime = open_runtime(&config)?;
    let mut events = runtime.subscribe(session)?;
    let new_max = runtime.continue_session(session, additional)?;
    println!("continuing {session} with {additional} more iterations (cap now {new_max})");
    while let Some(event) = events.recv().await {
        print_event(&event);
        match event {
            SessionEvent::RefinementComplete { .. } => break,
            SessionEvent::Log {
                level: LogLevel::Error,
                ..
            } => break,
            _ => {}
        }
    }
    let status = runtime.wait(session).await?;
    println!("terminal status: {status}");
    Ok(())
}

fn cmd_delete(config: ParleyConfig, session: &str) -> Result<()> {
    let runtime = open_runtime(&config)?;
    runtime.delete(session)?;
    println!("deleted {session}");
    Ok(())
}
