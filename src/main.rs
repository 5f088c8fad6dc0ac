use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use showtrack::auth::{AuthBackend, SessionHolder, SignUpOutcome};
use showtrack::config::Configuration;
use showtrack::http::HttpClient;
use showtrack::library::{LibraryStore, SaveShow};
use showtrack::mirror::{FileMirror, IdentityMirror};
use showtrack::models::{AuthEvent, CatalogItem, ShowRecord, ShowStatus};
use showtrack::supabase::{self, SavedShowsTable, SupabaseAuth};
use showtrack::tmdb::{CatalogBrowser, TmdbClient};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Shows trending this week
    Trending {
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Popular shows
    Popular {
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Search the catalog by title
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// TV genres known to the catalog
    Genres,
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        username: Option<String>,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    /// Saved shows, optionally filtered
    List {
        #[arg(long)]
        status: Option<ShowStatus>,
        #[arg(long)]
        favourites: bool,
    },
    /// Counts per status
    Stats,
    /// Save or update a show
    Save {
        tmdb_id: i64,
        name: String,
        #[arg(long, default_value = "planning")]
        status: ShowStatus,
        #[arg(long)]
        image: Option<String>,
        #[arg(long)]
        favourite: bool,
    },
    Remove {
        tmdb_id: i64,
    },
    /// Keep the session fresh and print session changes until Ctrl-C
    Watch,
}

struct Backend {
    holder: SessionHolder<SupabaseAuth>,
    library: LibraryStore<SavedShowsTable>,
    mirror: Arc<dyn IdentityMirror>,
}

impl Backend {
    async fn connect(config: &Configuration, http: &HttpClient) -> Result<Self> {
        let (url, key) = config.supabase_credentials()?;
        let (auth, table) = supabase::connect(http.clone(), url, key, Some(config.session_file()));

        let mirror: Arc<dyn IdentityMirror> = Arc::new(FileMirror::new(config.mirror_path()));
        let holder = SessionHolder::new(auth, Arc::clone(&mirror));
        if let Err(e) = holder.initialize().await {
            warn!("Could not restore session: {}", e);
        }

        Ok(Self {
            holder,
            library: LibraryStore::new(table),
            mirror,
        })
    }

    async fn sign_out(&self) -> Result<()> {
        let result = self.holder.sign_out().await;
        self.library.clear();
        result?;
        Ok(())
    }

    fn require_user(&self) -> Result<String> {
        self.holder
            .user_id()
            .ok_or_else(|| anyhow!("Not signed in, run `showtrack login` first"))
    }

    async fn load_library(&self) -> Result<()> {
        let user_id = self.require_user()?;
        self.library.load(&user_id).await?;
        Ok(())
    }

    /// Loads the list when someone is signed in; the store itself rejects writes without a user.
    async fn refresh_library(&self) -> Result<Option<String>> {
        let user_id = self.holder.user_id();
        if let Some(user_id) = user_id.as_deref() {
            self.library.load(user_id).await?;
        }
        Ok(user_id)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    info!("Starting showtrack v{}", env!("CARGO_PKG_VERSION"));

    let config = Configuration::load(&cli.config)?;
    let http = HttpClient::new(config.http_timeout())?;

    match cli.command {
        Command::Trending { pages } => {
            let browser = CatalogBrowser::new(TmdbClient::new(http, config.tmdb.clone()));
            browser.load_trending(true).await?;
            load_more(&browser, pages).await?;
            print_items(&browser.items());
        }
        Command::Popular { pages } => {
            let browser = CatalogBrowser::new(TmdbClient::new(http, config.tmdb.clone()));
            browser.load_popular(true).await?;
            load_more(&browser, pages).await?;
            print_items(&browser.items());
        }
        Command::Search { query, pages } => {
            let browser = CatalogBrowser::new(TmdbClient::new(http, config.tmdb.clone()));
            browser.search_shows(&query, true).await?;
            if !browser.query().is_empty() {
                load_more(&browser, pages).await?;
            }
            print_items(&browser.items());
        }
        Command::Genres => {
            let client = TmdbClient::new(http, config.tmdb.clone());
            for genre in client.fetch_genres().await {
                println!("{:>6}  {}", genre.id, genre.name);
            }
        }
        Command::Signup {
            email,
            password,
            username,
        } => {
            let backend = Backend::connect(&config, &http).await?;
            match backend
                .holder
                .sign_up(&email, &password, username.as_deref())
                .await?
            {
                SignUpOutcome::SignedIn(identity) => println!("Signed up as {}", identity.user_id),
                SignUpOutcome::ConfirmationPending { email } => {
                    println!("Check {} to confirm your account, then log in", email)
                }
            }
        }
        Command::Login { email, password } => {
            let backend = Backend::connect(&config, &http).await?;
            let identity = backend.holder.sign_in(&email, &password).await?;
            println!("Signed in as {}", identity.email.unwrap_or(identity.user_id));
        }
        Command::Logout => {
            let backend = Backend::connect(&config, &http).await?;
            backend.sign_out().await?;
            println!("Signed out");
        }
        Command::Whoami => {
            let backend = Backend::connect(&config, &http).await?;
            match backend.holder.identity() {
                Some(identity) => println!(
                    "{} ({})",
                    identity.email.as_deref().unwrap_or("no email"),
                    identity.user_id
                ),
                None => match backend.mirror.load() {
                    Ok(Some(last)) => println!(
                        "No live session, last signed in as {} ({})",
                        last.email.as_deref().unwrap_or("no email"),
                        last.user_id
                    ),
                    Ok(None) => println!("Not signed in"),
                    Err(e) => {
                        warn!("Could not read identity mirror: {}", e);
                        println!("Not signed in")
                    }
                },
            }
        }
        Command::List { status, favourites } => {
            let backend = Backend::connect(&config, &http).await?;
            backend.load_library().await?;
            let shows = match status {
                Some(status) => backend.library.shows_by_status(status),
                None => backend.library.shows(),
            };
            shows
                .iter()
                .filter(|s| !favourites || s.is_favourite)
                .for_each(print_show);
        }
        Command::Stats => {
            let backend = Backend::connect(&config, &http).await?;
            backend.load_library().await?;
            let counts = backend.library.status_counts();
            for status in ShowStatus::ALL {
                println!("{:<10} {}", status, counts.get(status));
            }
            println!("{:<10} {}", "favourite", backend.library.favourite_count());
            println!("{:<10} {}", "total", backend.library.total_count());
        }
        Command::Save {
            tmdb_id,
            name,
            status,
            image,
            favourite,
        } => {
            let backend = Backend::connect(&config, &http).await?;
            let user_id = backend.refresh_library().await?;
            let show = SaveShow::new(tmdb_id, name, status)
                .image(image)
                .favourite(favourite);
            let outcome = backend.library.save(show, user_id.as_deref()).await?;
            println!("{:?}: {} is now {}", outcome, tmdb_id, status);
        }
        Command::Remove { tmdb_id } => {
            let backend = Backend::connect(&config, &http).await?;
            let user_id = backend.refresh_library().await?;
            if backend.library.remove(tmdb_id, user_id.as_deref()).await? {
                println!("Removed {}", tmdb_id);
            } else {
                println!("{} was not in your list", tmdb_id);
            }
        }
        Command::Watch => {
            let backend = Backend::connect(&config, &http).await?;
            watch(&backend).await?;
        }
    }

    Ok(())
}

async fn watch(backend: &Backend) -> Result<()> {
    let refresher = backend.holder.backend().start_auto_refresh();
    let mut events = backend.holder.backend().subscribe();

    println!("Watching session changes, Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", describe_event(&event)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    refresher.abort();
    backend.holder.shutdown();
    Ok(())
}

async fn load_more(browser: &CatalogBrowser, pages: u32) -> Result<()> {
    for _ in 1..pages {
        match browser.load_next().await?.completed() {
            Some(0) | None => break,
            Some(_) => {}
        }
    }
    Ok(())
}

/// Reports the user carried by the event itself; the holder may not have applied it yet.
fn describe_event(event: &AuthEvent) -> String {
    let user = event
        .session
        .as_ref()
        .map(|s| s.user.id.as_str())
        .unwrap_or("signed out");
    format!("{:?}: {}", event.kind, user)
}

fn print_items(items: &[CatalogItem]) {
    for item in items {
        println!("{:>8}  {}  {}", item.id, item.name, item.image);
    }
}

fn print_show(show: &ShowRecord) {
    println!(
        "{:>8}  {:<9} {} {}",
        show.tmdb_id,
        show.status,
        if show.is_favourite { "*" } else { " " },
        show.name
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use showtrack::models::{AuthEventKind, Session};
    use wiremock::matchers::{path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn listing_commands_take_a_page_count() {
        let cli = Cli::try_parse_from(["showtrack", "search", "dark", "--pages", "3"]).unwrap();
        match cli.command {
            Command::Search { query, pages } => {
                assert_eq!(query, "dark");
                assert_eq!(pages, 3);
            }
            _ => panic!("expected search"),
        }

        assert!(Cli::try_parse_from(["showtrack", "trending", "--page", "2"]).is_err());
    }

    #[test]
    fn events_are_described_by_their_own_session() {
        let session: Session = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "user": { "id": "user-9" }
        }))
        .unwrap();

        let refreshed = AuthEvent {
            kind: AuthEventKind::TokenRefreshed,
            session: Some(session),
        };
        let signed_out = AuthEvent {
            kind: AuthEventKind::SignedOut,
            session: None,
        };

        assert_eq!(describe_event(&refreshed), "TokenRefreshed: user-9");
        assert_eq!(describe_event(&signed_out), "SignedOut: signed out");
    }

    #[tokio::test]
    async fn paging_stops_at_an_empty_page() {
        let server = MockServer::start().await;
        Mock::given(path("/tv/popular"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "id": 1, "name": "One" }]
            })))
            .mount(&server)
            .await;
        Mock::given(path("/tv/popular"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = Configuration::default();
        config.tmdb.base_url = server.uri();
        let browser = CatalogBrowser::new(TmdbClient::new(
            HttpClient::new(None).unwrap(),
            config.tmdb,
        ));

        browser.load_popular(true).await.unwrap();
        load_more(&browser, 5).await.unwrap();

        assert_eq!(browser.items().len(), 1);
    }
}
