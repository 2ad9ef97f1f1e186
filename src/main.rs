use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use proofsheet::analysis::{AnalysisActions, PollState, RecoveryAction, StallDetector};
use proofsheet::config::Config;
use proofsheet::curation::{toggle_selection, AffinityEngine, AlbumCurator};
use proofsheet::db::{Database, NewPhoto};
use proofsheet::logging;
use proofsheet::worker::{run_pending, Backends};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueAction {
    Analyze,
    Restart,
    Retry,
}

#[derive(Debug, PartialEq)]
enum Command {
    Status { project: i64 },
    Register { project: i64, keys: Vec<String> },
    Queue { action: QueueAction, project: i64, inline: bool },
    Watch { project: i64, auto_restart: bool },
    Curate { project: i64 },
    Albums { project: i64 },
    RenameAlbum { album: i64, name: String },
    DeleteAlbum { album: i64 },
    Order { project: i64 },
    Toggle { project: i64, photo: i64 },
}

#[derive(Debug)]
struct CliArgs {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_id(value: Option<&String>, what: &str) -> Result<i64> {
    let value = value.ok_or_else(|| anyhow!("Missing {}", what))?;
    value
        .parse()
        .with_context(|| format!("Invalid {}: {}", what, value))
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut config_path = None;
    let mut inline = false;
    let mut auto_restart = false;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("proofsheet {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    bail!("--config requires a path argument");
                }
            }
            "--inline" => inline = true,
            "--auto-restart" => auto_restart = true,
            other if other.starts_with('-') => bail!("Unknown argument: {}", other),
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let Some((name, rest)) = positional.split_first() else {
        bail!("Missing command");
    };
    let project = || parse_id(rest.first(), "project id");

    let command = match name.as_str() {
        "status" => Command::Status { project: project()? },
        "register" => {
            if rest.len() < 2 {
                bail!("register needs a project id and at least one object key");
            }
            Command::Register {
                project: project()?,
                keys: rest[1..].to_vec(),
            }
        }
        "analyze" | "restart" | "retry" => Command::Queue {
            action: match name.as_str() {
                "analyze" => QueueAction::Analyze,
                "restart" => QueueAction::Restart,
                _ => QueueAction::Retry,
            },
            project: project()?,
            inline,
        },
        "watch" => Command::Watch { project: project()?, auto_restart },
        "curate" => Command::Curate { project: project()? },
        "albums" => Command::Albums { project: project()? },
        "rename-album" => {
            let album = parse_id(rest.first(), "album id")?;
            let name = rest[1..].join(" ");
            if name.trim().is_empty() {
                bail!("rename-album needs a new name");
            }
            Command::RenameAlbum { album, name }
        }
        "delete-album" => Command::DeleteAlbum {
            album: parse_id(rest.first(), "album id")?,
        },
        "order" => Command::Order { project: project()? },
        "toggle" => Command::Toggle {
            project: project()?,
            photo: parse_id(rest.get(1), "photo id")?,
        },
        other => bail!("Unknown command: {}", other),
    };

    Ok(CliArgs { config_path, command })
}

fn print_help() {
    println!(
        r#"proofsheet - photo analysis and curation pipeline

USAGE:
    proofsheet [OPTIONS] <COMMAND> [ARGS]

COMMANDS:
    status PROJECT                 Photo counts per analysis status
    register PROJECT KEY...        Record uploaded objects and queue them
    analyze PROJECT                Queue every pending or failed photo
    restart PROJECT                Release stalled photos and queue them again
    retry PROJECT                  Queue the failed photos of a finished run
    watch PROJECT                  Poll progress and report stalls
    curate PROJECT                 Regenerate album suggestions
    albums PROJECT                 List album suggestions
    rename-album ALBUM NAME        Rename an album suggestion
    delete-album ALBUM             Delete an album suggestion
    order PROJECT                  Show the client gallery order
    toggle PROJECT PHOTO           Flip a client favorite

OPTIONS:
    --config, -c PATH   Path to config file
    --inline            Run queued analysis in this process instead of the worker
    --auto-restart      With watch: restart automatically when stalled
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PROOFSHEET_CONFIG   Path to config file (overrides default location)
    PROOFSHEET_LOG      Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/proofsheet/config.toml

See also: proofsheet-worker --help"#
    );
}

/// Drain the job queue in this process, on a blocking thread.
async fn run_inline(config: &Config, db_path: &Path) -> Result<()> {
    let backends = Arc::new(Backends::from_config(config));
    let lease = chrono::Duration::seconds(config.worker.lease_secs as i64);
    let max_attempts = config.worker.max_attempts;
    let db_path = db_path.to_path_buf();

    let ran = tokio::task::spawn_blocking(move || {
        let db = Database::open(&db_path)?;
        run_pending(&db, &backends, lease, max_attempts)
    })
    .await
    .context("Inline analysis panicked")??;
    println!("Ran {} analysis job(s)", ran);
    Ok(())
}

async fn watch(db: &Database, config: &Config, project: i64, auto_restart: bool) -> Result<()> {
    let actions = AnalysisActions::new(db);
    let mut detector = StallDetector::new(config.polling.stall_cycles);
    let mut ticker = tokio::time::interval(Duration::from_secs(config.polling.interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let counts = actions.status(project)?;
        let state = detector.observe(&counts);
        println!(
            "pending {} | queued {} | done {} | failed {} | {:?}",
            counts.pending, counts.queued, counts.done, counts.failed, state
        );

        match (state, state.offered_action()) {
            (PollState::Complete, _) => return Ok(()),
            (_, Some(RecoveryAction::Restart)) if auto_restart => {
                let queued = actions.restart_stalled(project)?;
                println!("Analysis stalled; restarted {} photo(s)", queued);
                detector.reset();
            }
            (_, Some(RecoveryAction::Restart)) => {
                println!("Analysis stalled. Run `proofsheet restart {}` to recover.", project);
            }
            (_, Some(RecoveryAction::Retry)) => {
                println!("Finished with failures. Run `proofsheet retry {}` to try again.", project);
                return Ok(());
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    // Load configuration
    let config = match args.config_path {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.db_path)?;
    db.initialize()?;
    let actions = AnalysisActions::new(&db);

    match args.command {
        Command::Status { project } => {
            let counts = actions.status(project)?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "pending": counts.pending,
                "queued": counts.queued,
                "done": counts.done,
                "failed": counts.failed,
                "total": counts.total(),
                "complete": counts.complete(),
            }))?);
        }
        Command::Register { project, keys } => {
            let uploads: Vec<NewPhoto> = keys
                .into_iter()
                .map(|key| NewPhoto {
                    original_filename: key.rsplit('/').next().map(str::to_string),
                    object_key: key,
                    thumbnail_key: None,
                })
                .collect();
            let ids = actions.register_uploads(project, &uploads)?;
            println!("Registered {} photo(s)", ids.len());
        }
        Command::Queue { action, project, inline } => {
            let queued = match action {
                QueueAction::Analyze => actions.analyze_pending(project)?,
                QueueAction::Restart => actions.restart_stalled(project)?,
                QueueAction::Retry => actions.retry_failed(project)?,
            };
            println!("Queued {} photo(s)", queued);
            if inline {
                run_inline(&config, &config.db_path).await?;
            }
        }
        Command::Watch { project, auto_restart } => {
            watch(&db, &config, project, auto_restart).await?;
        }
        Command::Curate { project } => {
            let backends = Backends::from_config(&config);
            let albums = AlbumCurator::new(&db, backends.narrative()).curate(project)?;
            println!("Generated {} album suggestion(s)", albums.len());
            for album in albums {
                println!("  {:<24} {:>4} photos  [{}]", album.name, album.photo_count, album.key.as_str());
            }
        }
        Command::Albums { project } => {
            for album in db.albums(project)? {
                println!(
                    "{:>6}  {:<24} {:>4} photos  cover {}",
                    album.id.unwrap_or_default(),
                    album.name,
                    album.photo_count,
                    album
                        .cover_photo_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Command::RenameAlbum { album, name } => {
            db.rename_album(album, &name)?;
            println!("Album {} renamed", album);
        }
        Command::DeleteAlbum { album } => {
            db.delete_album(album)?;
            println!("Album {} deleted", album);
        }
        Command::Order { project } => {
            let order = AffinityEngine::new(&db).compute_order(project)?;
            let line: Vec<String> = order.iter().map(|id| id.to_string()).collect();
            println!("{}", line.join(" "));
        }
        Command::Toggle { project, photo } => {
            let toggle = toggle_selection(&db, project, photo)?;
            println!("{}", serde_json::to_string(&toggle)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<CliArgs> {
        let argv: Vec<String> = std::iter::once("proofsheet")
            .chain(line.split_whitespace())
            .map(str::to_string)
            .collect();
        parse_args(&argv)
    }

    #[test]
    fn test_queue_commands_share_inline_flag() {
        let args = parse("--inline restart 4").unwrap();
        assert_eq!(
            args.command,
            Command::Queue { action: QueueAction::Restart, project: 4, inline: true }
        );
        let args = parse("retry 4").unwrap();
        assert_eq!(
            args.command,
            Command::Queue { action: QueueAction::Retry, project: 4, inline: false }
        );
    }

    #[test]
    fn test_global_config_and_multi_word_names() {
        let args = parse("-c /tmp/p.toml rename-album 9 First Dance").unwrap();
        assert_eq!(args.config_path, Some(PathBuf::from("/tmp/p.toml")));
        assert_eq!(args.command, Command::RenameAlbum { album: 9, name: "First Dance".into() });
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse("").is_err());
        assert!(parse("analyze").is_err());
        assert!(parse("toggle 1 x").is_err());
        assert!(parse("register 1").is_err());
        assert!(parse("rename-album 9").is_err());
        assert!(parse("analyze 1 --frobnicate").is_err());
        assert!(parse("publish 1").is_err());
    }
}
