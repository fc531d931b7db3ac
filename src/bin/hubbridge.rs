//! hubbridge CLI: run the bridge, or work with the subtitle audit trail.

use clap::{Parser, Subcommand};
use hubbridge::audit::AuditLog;
use hubbridge::bridge::{Bridge, BridgeConfig, Transports};
use hubbridge::config::Config;
use hubbridge::db::Db;
use hubbridge::event::EventStream;
use hubbridge::model::audit::{HistoryAction, MediaKind, MediaRef};
use hubbridge::pathmap::PathMappings;
use hubbridge::subtitles::{DeleteRequest, RequestIndexer, SubtitleLanguage, SubtitleRemover};
use hubbridge::sync::QueuedSync;
use hubbridge::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use secrecy::ExposeSecret;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hubbridge", about = "Media server event bridge for a subtitle manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge until Ctrl-C
    Serve,
    /// Provider blacklist operations
    Blacklist {
        #[command(subcommand)]
        action: BlacklistAction,
    },
    /// Show recent subtitle history
    History {
        /// series or movie
        #[arg(long, default_value = "series")]
        media: MediaKind,
        /// Maximum rows to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Delete a subtitle file and record it in history
    DeleteSubtitles {
        /// Series id (with --episode-id)
        #[arg(long, requires = "episode_id", conflicts_with = "movie_id")]
        series_id: Option<i64>,
        #[arg(long, requires = "series_id")]
        episode_id: Option<i64>,
        #[arg(long)]
        movie_id: Option<i64>,
        /// ISO 639-1 language code
        #[arg(long)]
        language: String,
        /// Language display name, e.g. English
        #[arg(long)]
        language_name: String,
        #[arg(long)]
        forced: bool,
        /// Local path of the video file
        #[arg(long)]
        media_path: String,
        /// Local path of the subtitle file
        #[arg(long)]
        subtitles_path: String,
    },
}

#[derive(Subcommand)]
enum BlacklistAction {
    /// List blacklisted provider results
    List {
        #[arg(long, default_value = "series")]
        media: MediaKind,
    },
    /// Remove one provider result from the blacklist
    Remove {
        #[arg(long, default_value = "series")]
        media: MediaKind,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        subs_id: String,
    },
    /// Empty the blacklist
    Clear {
        #[arg(long, default_value = "series")]
        media: MediaKind,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cmd_serve().await,
        Command::Blacklist { action } => {
            let ctx = AuditContext::open().await?;
            cmd_blacklist(&ctx.audit, action).await
        }
        Command::History { media, limit } => {
            let ctx = AuditContext::open().await?;
            cmd_history(&ctx.audit, media, limit).await
        }
        Command::DeleteSubtitles {
            series_id,
            episode_id,
            movie_id,
            language,
            language_name,
            forced,
            media_path,
            subtitles_path,
        } => {
            let media = match (series_id, episode_id, movie_id) {
                (Some(series_id), Some(episode_id), None) => MediaRef::Episode {
                    series_id,
                    episode_id,
                },
                (None, None, Some(movie_id)) => MediaRef::Movie { movie_id },
                _ => anyhow::bail!("give either --series-id with --episode-id, or --movie-id"),
            };
            let request = DeleteRequest {
                media,
                language: SubtitleLanguage::new(language, language_name).forced(forced),
                media_path,
                subtitles_path,
            };
            cmd_delete_subtitles(request).await
        }
    }
}

/// Everything the one-shot audit commands need.
struct AuditContext {
    config: Config,
    db: Arc<Db>,
    audit: AuditLog,
    _telemetry: TelemetryGuard,
}

impl AuditContext {
    async fn open() -> anyhow::Result<Self> {
        let config = Config::from_env()?;
        // Warnings and errors only; stdout is for command output.
        let telemetry = init_telemetry(TelemetryConfig {
            endpoint: None,
            service_name: "hubbridge".to_string(),
            log_level: "warn".to_string(),
            servers: Vec::new(),
        })?;
        let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
        db.migrate().await?;
        let audit = AuditLog::new(db.clone(), Arc::new(EventStream::default()));
        Ok(Self {
            config,
            db,
            audit,
            _telemetry: telemetry,
        })
    }
}

async fn cmd_serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let servers = [("series", &config.series), ("movie", &config.movie)]
        .into_iter()
        .filter_map(|(role, server)| server.as_ref().map(|s| (role, s.base_url.clone())))
        .collect();
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "hubbridge".to_string(),
        log_level: config.log_level.clone(),
        servers,
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;
    db.health_check().await?;

    let bridge = Bridge::new(
        BridgeConfig::from_config(&config),
        Transports::http()?,
        Arc::new(QueuedSync::new(db)),
    );

    let handle = bridge.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        handle.shutdown();
    });

    bridge.run().await?;
    Ok(())
}

async fn cmd_delete_subtitles(request: DeleteRequest) -> anyhow::Result<()> {
    let ctx = AuditContext::open().await?;
    let paths = match &ctx.config.path_mappings {
        Some(file) => PathMappings::load(file)?,
        None => PathMappings::default(),
    };
    let remover = SubtitleRemover::new(
        Arc::new(ctx.audit),
        Arc::new(RequestIndexer::new(ctx.db)),
        Arc::new(paths),
    );
    if remover.delete_subtitles(&request).await? {
        println!("Deleted: {}", request.subtitles_path);
        Ok(())
    } else {
        anyhow::bail!("could not delete {}", request.subtitles_path)
    }
}

async fn cmd_blacklist(audit: &AuditLog, action: BlacklistAction) -> anyhow::Result<()> {
    match action {
        BlacklistAction::List { media } => {
            let entries = audit.blacklist_entries(media).await?;
            if entries.is_empty() {
                println!("Blacklist is empty.");
                return Ok(());
            }
            println!("{:<20}  {:<20}  {:<40}  {:<8}  ADDED", "MEDIA", "PROVIDER", "SUBS_ID", "LANG");
            println!("{}", "-".repeat(110));
            for entry in &entries {
                let media = match entry.media {
                    MediaRef::Episode {
                        series_id,
                        episode_id,
                    } => format!("{series_id}/{episode_id}"),
                    MediaRef::Movie { movie_id } => movie_id.to_string(),
                };
                println!(
                    "{:<20}  {:<20}  {:<40}  {:<8}  {}",
                    media,
                    entry.provider,
                    entry.subs_id,
                    entry.language.as_deref().unwrap_or("-"),
                    entry.timestamp.format("%Y-%m-%d %H:%M")
                );
            }
            println!("\n{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
        }
        BlacklistAction::Remove {
            media,
            provider,
            subs_id,
        } => {
            let removed = audit.blacklist_delete(media, &provider, &subs_id).await?;
            println!("Removed {removed} {media} blacklist entr{}", if removed == 1 { "y" } else { "ies" });
        }
        BlacklistAction::Clear { media } => {
            let removed = audit.blacklist_delete_all(media).await?;
            println!("Cleared {media} blacklist ({removed} removed)");
        }
    }
    Ok(())
}

async fn cmd_history(audit: &AuditLog, media: MediaKind, limit: i64) -> anyhow::Result<()> {
    let entries = audit.recent_history(media, limit).await?;
    if entries.is_empty() {
        println!("No {media} history.");
        return Ok(());
    }

    println!("{:<16}  {:<6}  {:<10}  {:<16}  DESCRIPTION", "WHEN", "ACTION", "LANG", "MEDIA");
    println!("{}", "-".repeat(100));
    for entry in &entries {
        let action = HistoryAction::from_code(entry.action)
            .map(|a| format!("{a:?}").to_lowercase())
            .unwrap_or_else(|| entry.action.to_string());
        let media = match entry.media {
            MediaRef::Episode {
                series_id,
                episode_id,
            } => format!("{series_id}/{episode_id}"),
            MediaRef::Movie { movie_id } => movie_id.to_string(),
        };
        println!(
            "{:<16}  {:<6}  {:<10}  {:<16}  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            action,
            entry.language.as_deref().unwrap_or("-"),
            media,
            entry.description
        );
    }
    println!("\n{} row(s)", entries.len());
    Ok(())
}
