use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use restaurant_finder::clock::TokioClock;
use restaurant_finder::config::{ClientConfig, ConfigError};
use restaurant_finder::net::types::{Credentials, GeoPoint, UploadFile, User, UserUpdate};
use restaurant_finder::net::{ApiError, HttpApi, RestApi};
use restaurant_finder::notify::Notifier;
use restaurant_finder::state::AuthState;
use restaurant_finder::state::auth::AuthDeps;
use restaurant_finder::state::restaurants::ViewStatus;
use restaurant_finder::storage::FileTokenStore;
use restaurant_finder::upload::{DisabledStorage, FormUploader, ObjectStorage, UploadError};
use restaurant_finder::{AuthContainer, RestaurantFeed};
use serde::Serialize;

/// How long profile-edit notifications stay up.
const TOAST_DURATION: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("api client setup failed: {0}")]
    Api(#[from] ApiError),
    #[error("upload setup failed: {0}")]
    Upload(#[from] UploadError),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Feed(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "finder-cli", about = "Restaurant finder account and listing CLI")]
struct Cli {
    /// Backend base URL, overriding `FINDER_API_URL`.
    #[arg(long)]
    api_url: Option<String>,

    /// Session file, overriding `FINDER_TOKEN_PATH`.
    #[arg(long)]
    token_path: Option<PathBuf>,

    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login(LoginArgs),
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    UpdateName {
        name: String,
    },
    UpdateEmail {
        email: String,
        /// Current password, required by the backend for email changes.
        #[arg(long)]
        password: String,
    },
    UploadAvatar {
        path: PathBuf,
    },
    MyRestaurants,
    Restaurants(RestaurantsCommand),
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long)]
    email: String,

    #[arg(long, required_unless_present = "facebook_id")]
    password: Option<String>,

    /// Sign in with a social identity; the account is created on first use.
    #[arg(long, requires = "name", conflicts_with = "password")]
    facebook_id: Option<String>,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    image: Option<String>,
}

#[derive(Args, Debug)]
struct RestaurantsCommand {
    #[command(subcommand)]
    command: RestaurantsSubcommand,
}

#[derive(Subcommand, Debug)]
enum RestaurantsSubcommand {
    List {
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    Top,
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long, default_value_t = 5.0)]
        radius: f64,
    },
}

/// Prints notifications on stderr so stdout stays machine-readable.
struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn show(&self, message: &str, _duration: Duration) {
        eprintln!("{message}");
    }
}

struct CliContext {
    auth: AuthContainer,
    feed: RestaurantFeed,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, "no .env loaded");
    }

    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = cli.api_url {
        config.api.base_url = api_url;
    }
    if let Some(token_path) = cli.token_path {
        config.token_path = token_path;
    }
    let ctx = build_context(&config)?;

    match cli.command {
        Command::Login(args) => run_login(&ctx, args).await,
        Command::Register { name, email, password } => {
            ctx.auth
                .submit_registration(&Credentials::registration(name, email, password))
                .await;
            print_json(require_user(&ctx.auth.snapshot())?)
        }
        Command::Logout => {
            ctx.auth.logout().await;
            eprintln!("logged out");
            Ok(())
        }
        Command::Whoami => {
            let user = restore_session(&ctx).await?;
            print_json(&user)
        }
        Command::UpdateName { name } => run_update(&ctx, UserUpdate::name(name)).await,
        Command::UpdateEmail { email, password } => run_update(&ctx, UserUpdate::email(email, password)).await,
        Command::UploadAvatar { path } => {
            let user = restore_session(&ctx).await?;
            let file = UploadFile::from_uri(path.to_string_lossy());
            ctx.auth
                .upload_image(&file, &user.id, &StderrNotifier, TOAST_DURATION)
                .await;
            print_json(require_user(&ctx.auth.snapshot())?)
        }
        Command::MyRestaurants => {
            let user = restore_session(&ctx).await?;
            ctx.auth.load_my_restaurants(&user).await;
            let restaurants = ctx.auth.snapshot().my_restaurants.unwrap_or_default();
            print_json(&restaurants)
        }
        Command::Restaurants(cmd) => run_restaurants(&ctx, cmd).await,
    }
}

fn build_context(config: &ClientConfig) -> Result<CliContext, CliError> {
    let api: Arc<dyn RestApi> = Arc::new(HttpApi::new(&config.api)?);
    let storage: Arc<dyn ObjectStorage> = match &config.upload {
        Some(upload) => Arc::new(FormUploader::new(upload, config.api.timeouts)?),
        None => Arc::new(DisabledStorage),
    };
    let auth = AuthContainer::new(AuthDeps {
        api: Arc::clone(&api),
        store: Arc::new(FileTokenStore::new(config.token_path.clone())),
        storage,
        clock: Arc::new(TokioClock),
    })
    .with_error_display(config.error_display);
    let feed = RestaurantFeed::new(api).with_page_size(config.page_size);
    Ok(CliContext { auth, feed })
}

async fn run_login(ctx: &CliContext, args: LoginArgs) -> Result<(), CliError> {
    match (args.facebook_id, args.password) {
        (Some(facebook_id), _) => {
            let name = args.name.unwrap_or_default();
            ctx.auth
                .login(&Credentials::social(name, args.email, args.image, facebook_id))
                .await;
        }
        (None, password) => {
            ctx.auth
                .submit_login(&Credentials::password(args.email, password.unwrap_or_default()))
                .await;
        }
    }
    print_json(require_user(&ctx.auth.snapshot())?)
}

async fn run_update(ctx: &CliContext, fields: UserUpdate) -> Result<(), CliError> {
    let user = restore_session(ctx).await?;
    ctx.auth
        .update_user(fields, &user.id, &StderrNotifier, TOAST_DURATION)
        .await;
    print_json(require_user(&ctx.auth.snapshot())?)
}

async fn run_restaurants(ctx: &CliContext, cmd: RestaurantsCommand) -> Result<(), CliError> {
    // Listing endpoints accept the session token when one is stored.
    ctx.auth.resume_session().await;

    match cmd.command {
        RestaurantsSubcommand::List { pages } => {
            ctx.feed.load_first_page().await;
            for _ in 1..pages {
                if !ctx.feed.snapshot().has_more {
                    break;
                }
                ctx.feed.load_next_page().await;
            }
            let state = ctx.feed.snapshot();
            feed_result(&state.listing)?;
            print_json(&state.restaurants)
        }
        RestaurantsSubcommand::Top => {
            ctx.feed.load_top_five().await;
            let state = ctx.feed.snapshot();
            feed_result(&state.top_status)?;
            print_json(&state.top_five)
        }
        RestaurantsSubcommand::Nearby { lat, lng, radius } => {
            ctx.feed
                .search_nearby(GeoPoint { latitude: lat, longitude: lng }, radius)
                .await;
            let state = ctx.feed.snapshot();
            feed_result(&state.nearby_status)?;
            print_json(&state.nearby)
        }
    }
}

async fn restore_session(ctx: &CliContext) -> Result<User, CliError> {
    ctx.auth.load_user().await;
    require_user(&ctx.auth.snapshot()).cloned()
}

fn require_user(state: &AuthState) -> Result<&User, CliError> {
    state.user().ok_or_else(|| {
        CliError::Auth(
            state
                .error
                .clone()
                .unwrap_or_else(|| "not logged in".to_owned()),
        )
    })
}

fn feed_result(status: &ViewStatus) -> Result<(), CliError> {
    match &status.error {
        Some(message) => Err(CliError::Feed(message.clone())),
        None => Ok(()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
