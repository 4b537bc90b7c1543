mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;

use sb_core::config::Config;
use sb_core::events::EventBus;
use sb_core::{Storyboard, StoryboardId};
use sb_db::pool::get_conn;
use sb_db::queries::storyboards;
use sb_pipeline::{Orchestrator, ProgressSender, RunContext, RunRequest};
use storyforge::app;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "storyforge=trace,sb_pipeline=trace,sb_db=debug,sb_core=debug".to_string()
        } else {
            "storyforge=info,sb_pipeline=info,sb_db=warn,sb_core=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            prompt,
            scenes,
            provider,
            name,
            ephemeral,
        } => {
            let mut request = RunRequest::new(prompt);
            request.scene_count_hint = scenes;
            request.provider = provider.map(Into::into);
            request.name = name;
            block_on(run(request, config_path, ephemeral))
        }
        Commands::Resume { id } => block_on(resume(parse_id(&id)?, config_path)),
        Commands::ResumePending => block_on(resume_pending(config_path)),
        Commands::Show { id, json } => show(parse_id(&id)?, config_path, json),
        Commands::List { offset, limit } => list(config_path, offset, limit),
        Commands::Delete { id } => delete(parse_id(&id)?, config_path),
        Commands::Validate {
            config: validate_path,
        } => validate_config(validate_path.as_deref().or(config_path)),
        Commands::Version => {
            println!("storyforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fut)
}

fn parse_id(s: &str) -> Result<StoryboardId> {
    s.parse()
        .with_context(|| format!("invalid storyboard id: {s}"))
}

/// Run context that logs events, prints progress, and cancels on Ctrl-C.
fn run_context() -> RunContext {
    let events = Arc::new(EventBus::default());
    app::spawn_event_logger(&events);

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing in-flight scenes");
            ctrl_c.cancel();
        }
    });

    RunContext::new()
        .with_events(events)
        .with_cancellation(token)
        .with_progress(ProgressSender::new(|p| match p.resumed_from {
            Some(from) => println!("[{}/{}] (resumed from {})", p.current, p.total, from),
            None => println!("[{}/{}]", p.current, p.total),
        }))
}

fn build(config_path: Option<&Path>, ephemeral: bool) -> Result<(Config, Orchestrator)> {
    let config = app::load_config(config_path);
    let store = app::open_store(&config, ephemeral)?;
    let orchestrator = Orchestrator::from_config(&config, store)?;
    Ok((config, orchestrator))
}

async fn run(request: RunRequest, config_path: Option<&Path>, ephemeral: bool) -> Result<()> {
    let (config, orchestrator) = build(config_path, ephemeral)?;
    let ctx = run_context();

    if config.pipeline.resume_on_start && !ephemeral {
        for sb in orchestrator.resume_pending(&ctx).await? {
            print_summary(&sb);
        }
    }

    let sb = orchestrator.run(request, &ctx).await?;
    print_summary(&sb);
    Ok(())
}

async fn resume(id: StoryboardId, config_path: Option<&Path>) -> Result<()> {
    let (_, orchestrator) = build(config_path, false)?;
    let sb = orchestrator.resume(id, &run_context()).await?;
    print_summary(&sb);
    Ok(())
}

async fn resume_pending(config_path: Option<&Path>) -> Result<()> {
    let (_, orchestrator) = build(config_path, false)?;
    let resumed = orchestrator.resume_pending(&run_context()).await?;
    if resumed.is_empty() {
        println!("No storyboards in progress.");
    }
    for sb in &resumed {
        print_summary(sb);
    }
    Ok(())
}

fn print_summary(sb: &Storyboard) {
    let state = if sb.status.in_progress {
        "interrupted"
    } else {
        "complete"
    };
    println!(
        "{} {} ({}): {}/{} scenes, {:.1}s",
        sb.id,
        sb.name,
        state,
        sb.clips.len(),
        sb.status.total_scenes,
        sb.total_duration_seconds()
    );
    if let Some(ref error) = sb.status.error {
        println!("  {error}");
    }
}

fn show(id: StoryboardId, config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = app::load_config(config_path);
    let pool = app::open_pool(&config)?;
    let conn = get_conn(&pool)?;
    let sb = storyboards::load_snapshot(&conn, id)?
        .with_context(|| format!("storyboard not found: {id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sb)?);
        return Ok(());
    }

    print_summary(&sb);
    println!("  Provider: {}", sb.provider);
    println!("  Created: {}", sb.created_at);
    if let Some(done) = sb.status.completed_at {
        println!("  Completed: {done}");
    }
    for clip in &sb.clips {
        println!(
            "  {:>3}. {} ({:.1}s) {}",
            clip.order, clip.name, clip.duration_seconds, clip.prompt
        );
    }
    Ok(())
}

fn list(config_path: Option<&Path>, offset: i64, limit: i64) -> Result<()> {
    let config = app::load_config(config_path);
    let pool = app::open_pool(&config)?;
    let conn = get_conn(&pool)?;
    let rows = storyboards::list_storyboards(&conn, offset, limit)?;
    if rows.is_empty() {
        println!("No storyboards.");
    }
    for row in rows {
        println!(
            "{}  {:<11} {:>3}/{:<3} {}  {}",
            row.id,
            if row.in_progress { "in progress" } else { "complete" },
            row.completed_scenes,
            row.total_scenes,
            row.provider,
            row.name
        );
    }
    Ok(())
}

fn delete(id: StoryboardId, config_path: Option<&Path>) -> Result<()> {
    let config = app::load_config(config_path);
    let pool = app::open_pool(&config)?;
    let conn = get_conn(&pool)?;
    if storyboards::delete_storyboard(&conn, id)? {
        println!("Deleted {id}");
    } else {
        anyhow::bail!("storyboard not found: {id}");
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("✓ Configuration is valid");
            } else {
                for w in &warnings {
                    println!("⚠ {w}");
                }
            }
            print_config(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            print_config(&Config::default());
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    println!("  Database: {}", config.storage.db_path.display());
    println!("  Decomposition: {}", config.decomposition.base_url);
    println!("  Generation: {}", config.generation.base_url);
    println!("  Provider: {}", config.pipeline.default_provider);
    match config.pipeline.max_concurrent_scenes {
        0 => println!("  Concurrency: unbounded"),
        n => println!("  Concurrency: {n}"),
    }
}
