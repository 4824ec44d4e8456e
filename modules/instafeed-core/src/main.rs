use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use instafeed_common::Config;
use instafeed_core::views::{popular_posts, recent_posts};
use instafeed_core::FeedService;

#[derive(Parser)]
#[command(name = "instafeed", about = "Instagram profile feed via Apify, with cache and demo fallback")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current feed as JSON.
    Fetch {
        #[arg(long)]
        username: Option<String>,
        #[arg(long, value_enum, default_value_t = Section::All)]
        section: Section,
        /// Posts per section (defaults to POSTS_PER_SECTION).
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Fetch, then refresh every AUTO_REFRESH_SECS until Ctrl-C.
    Watch {
        #[arg(long)]
        username: Option<String>,
    },
    /// Print a single post by id.
    Post {
        id: u32,
        #[arg(long)]
        username: Option<String>,
    },
    /// Print cache / fallback status.
    Health,
}

#[derive(Clone, Copy, ValueEnum)]
enum Section {
    All,
    Recent,
    Popular,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let service = FeedService::from_config(&config);

    match cli.command {
        Command::Fetch {
            username,
            section,
            limit,
        } => {
            let username = username.unwrap_or_else(|| config.username.clone());
            let limit = limit.unwrap_or(config.posts_per_section);
            let snapshot = service.get_feed(&username).await;

            let json = match section {
                Section::All => serde_json::to_string_pretty(snapshot.as_ref())?,
                Section::Recent => serde_json::to_string_pretty(&recent_posts(snapshot.posts(), limit))?,
                Section::Popular => {
                    serde_json::to_string_pretty(&popular_posts(snapshot.posts(), limit))?
                }
            };
            println!("{json}");
        }
        Command::Watch { username } => {
            let username = username.unwrap_or_else(|| config.username.clone());
            let Some(period) = config.auto_refresh else {
                bail!("AUTO_REFRESH_SECS is 0, nothing to watch");
            };
            watch(&service, &username, period).await;
        }
        Command::Post { id, username } => {
            let username = username.unwrap_or_else(|| config.username.clone());
            let post = service
                .post_by_id(&username, id)
                .await
                .with_context(|| format!("post {id} not found in {username}'s feed"))?;
            println!("{}", serde_json::to_string_pretty(&post)?);
        }
        Command::Health => {
            println!("{}", serde_json::to_string_pretty(&service.health())?);
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("instafeed=info".parse()?)
        .add_directive("apify_client=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn watch(service: &FeedService, username: &str, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    let mut first = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                return;
            }
            _ = ticker.tick() => {
                let snapshot = if first {
                    service.get_feed(username).await
                } else {
                    info!(username, "Auto-refreshing feed");
                    service.refresh(username).await
                };
                first = false;

                let top = popular_posts(snapshot.posts(), 1);
                info!(
                    username,
                    posts = snapshot.posts().len(),
                    fetched_at = %snapshot.fetched_at(),
                    top_likes = top.first().map(|p| p.like_count),
                    "Feed updated"
                );
            }
        }
    }
}
