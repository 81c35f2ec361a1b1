//! Storefront CLI - sign in, keep the session alive and browse the catalog.
//!
//! The session is restored from storage when possible. Otherwise the login
//! URL is printed and the browser's redirect back to the configured
//! `redirect_uri` is awaited on a loopback listener.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storefront_core::api::ApiClient;
use storefront_core::auth::{
    CallbackListener, FileStorage, IdentityClient, KeyValueStorage, KeycloakClient, KeyringStorage,
    MemoryStorage, Navigation, SessionEvent, SessionManager, SessionTimers, StartOutcome,
    StorageBackend, TokenStore,
};
use storefront_core::catalog::Catalog;
use storefront_core::config::Config;
use storefront_core::models::{Command, ProductSortColumn};
use storefront_core::utils::{format_price, format_session_time, truncate_string};
use url::Url;

// ============================================================================
// Constants
// ============================================================================

const USAGE: &str = "Usage: storefront [--sort <id|name|description|price|quantity>] [--desc] [--watch] [orders|logout|refresh]";

/// How long to wait for the browser to come back after sign-in
const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Column widths of the catalog table
const NAME_WIDTH: usize = 24;
const DESCRIPTION_WIDTH: usize = 32;

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Show,
    Orders,
    Logout,
    Refresh,
}

#[derive(Debug)]
struct Args {
    mode: Mode,
    sort: Option<ProductSortColumn>,
    descending: bool,
    watch: bool,
}

impl Args {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut parsed = Args {
            mode: Mode::Show,
            sort: None,
            descending: false,
            watch: false,
        };

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--sort" => {
                    let value = args.next().context("--sort needs a column")?;
                    parsed.sort = Some(
                        ProductSortColumn::parse(&value)
                            .with_context(|| format!("Unknown sort column: {}", value))?,
                    );
                }
                "--desc" => parsed.descending = true,
                "--watch" => parsed.watch = true,
                "orders" => parsed.mode = Mode::Orders,
                "logout" => parsed.mode = Mode::Logout,
                "refresh" => parsed.mode = Mode::Refresh,
                "-h" | "--help" => {
                    println!("{}", USAGE);
                    std::process::exit(0);
                }
                other => bail!("Unknown argument: {}\n{}", other, USAGE),
            }
        }
        Ok(parsed)
    }
}

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the log file when dropped.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os("STOREFRONT_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "storefront.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse(std::env::args().skip(1))?;

    let _log_guard = init_tracing();
    info!(mode = ?args.mode, "Storefront starting");

    let config = Config::load()?;
    let session = Arc::new(SessionManager::new(
        identity_client(&config),
        TokenStore::new(open_storage(&config)?),
        config.session.clone(),
    ));

    match args.mode {
        Mode::Logout => {
            print_navigation(&session.logout().await);
            Ok(())
        }
        Mode::Refresh => {
            let Some(timers) = start(&config, &session).await? else {
                return Ok(());
            };
            match session.force_refresh().await {
                Some(Navigation::Reload) => println!(
                    "Session refreshed, {} left",
                    format_session_time(session.session_time())
                ),
                Some(navigation) => print_navigation(&navigation),
                None => println!("Session unchanged"),
            }
            timers.shutdown().await;
            Ok(())
        }
        Mode::Orders => {
            let Some(timers) = start(&config, &session).await? else {
                return Ok(());
            };
            let result = orders(&config, &session).await;
            timers.shutdown().await;
            result
        }
        Mode::Show => {
            let Some(timers) = start(&config, &session).await? else {
                return Ok(());
            };
            let result = show(&config, &session, &args, timers).await;
            info!("Storefront shutting down");
            result
        }
    }
}

fn identity_client(config: &Config) -> Option<Arc<dyn IdentityClient>> {
    match KeycloakClient::new(config.identity.clone()) {
        Ok(client) => Some(Arc::new(client) as Arc<dyn IdentityClient>),
        Err(e) => {
            warn!(error = %e, "Identity client unavailable");
            None
        }
    }
}

fn open_storage(config: &Config) -> Result<Arc<dyn KeyValueStorage>> {
    let storage: Arc<dyn KeyValueStorage> = match config.storage {
        StorageBackend::File => Arc::new(FileStorage::in_dir(&config.data_dir()?)),
        StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    };
    Ok(storage)
}

/// Start the session, signing in through the browser if needed.
/// `None` when no session could be established in this run.
async fn start(config: &Config, session: &Arc<SessionManager>) -> Result<Option<SessionTimers>> {
    let outcome = session
        .start()
        .await
        .context("Authentication could not be initialised; reload to try again")?;

    let outcome = match outcome {
        StartOutcome::Redirect(navigation) => match sign_in(config, session, &navigation).await? {
            Some(outcome) => outcome,
            None => return Ok(None),
        },
        authenticated => authenticated,
    };

    match outcome {
        StartOutcome::Authenticated { timers, persisted } => {
            if !persisted {
                eprintln!("Warning: the session could not be saved and ends with this run");
            }
            Ok(Some(timers))
        }
        StartOutcome::Redirect(navigation) => {
            print_navigation(&navigation);
            Ok(None)
        }
    }
}

/// Send the user to the login page and wait for the redirect back.
async fn sign_in(
    config: &Config,
    session: &Arc<SessionManager>,
    navigation: &Navigation,
) -> Result<Option<StartOutcome>> {
    println!("Sign in to continue.");
    print_navigation(navigation);
    let Navigation::Redirect(_) = navigation else {
        return Ok(None);
    };

    let redirect_uri = Url::parse(&config.identity.redirect_uri)
        .with_context(|| format!("Invalid redirect URI: {}", config.identity.redirect_uri))?;
    let listener = match CallbackListener::bind(&redirect_uri).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(error = %e, "Cannot receive the login callback here");
            println!("Sign in with the browser, then run storefront again.");
            return Ok(None);
        }
    };

    println!("Waiting for the browser to return to {} ...", redirect_uri);
    let callback = listener.wait(LOGIN_TIMEOUT).await?;
    let outcome = session
        .complete_login(&callback)
        .await
        .context("Sign-in failed")?;
    println!("Signed in.");
    Ok(Some(outcome))
}

async fn show(
    config: &Config,
    session: &Arc<SessionManager>,
    args: &Args,
    mut timers: SessionTimers,
) -> Result<()> {
    print_user(session);

    let api = ApiClient::new(&config.api, session.clone())?;
    let mut catalog = Catalog::new(api, session.clone());
    if let Some(column) = args.sort {
        catalog.sort_by(column);
        if args.descending {
            catalog.sort_by(column);
        }
    }

    catalog.load().await;
    print_catalog(&catalog);

    if let Some(pending) = catalog.take_pending_logout() {
        timers.shutdown().await;
        let navigation = pending.await.context("Logout task failed")?;
        print_navigation(&navigation);
        return Ok(());
    }

    if args.watch {
        watch(&mut timers).await;
    }
    timers.shutdown().await;
    Ok(())
}

/// Print session events until Ctrl-C or a forced navigation
async fn watch(timers: &mut SessionTimers) {
    println!("Watching the session, press Ctrl-C to stop.");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            event = timers.next_event() => match event {
                Some(SessionEvent::SessionTime(secs)) => {
                    println!("Session time: {}", format_session_time(secs));
                }
                Some(SessionEvent::ExpiringSoon(secs)) => {
                    println!("Session expires in {}s", secs);
                }
                Some(SessionEvent::Refreshed { expires_in }) => {
                    println!("Token refreshed, session time: {}", format_session_time(expires_in));
                }
                Some(SessionEvent::LoggedOut(navigation)) => {
                    println!("Session ended.");
                    print_navigation(&navigation);
                    break;
                }
                None => break,
            }
        }
    }
}

async fn orders(config: &Config, session: &Arc<SessionManager>) -> Result<()> {
    print_user(session);

    let api = ApiClient::new(&config.api, session.clone())?;
    match api.fetch_commands().await {
        Ok(commands) => {
            print_commands(&commands);
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Order list failed");
            if e.requires_logout() {
                eprintln!("{}", e.user_message());
                print_navigation(&session.logout().await);
            } else {
                eprintln!("Could not load orders: {}", e);
            }
            Ok(())
        }
    }
}

// ============================================================================
// Output
// ============================================================================

fn print_navigation(navigation: &Navigation) {
    match navigation {
        Navigation::Redirect(url) => println!("Open in your browser: {}", url),
        Navigation::Reload => println!("Run storefront again to continue."),
    }
}

fn print_user(session: &SessionManager) {
    let roles: Vec<String> = session.roles().into_iter().collect();
    println!("Signed in as {}", session.display_name());
    if !roles.is_empty() {
        println!("Roles: {}", roles.join(", "));
    }
    println!("Session time: {}", format_session_time(session.session_time()));
    println!();
}

fn print_catalog(catalog: &Catalog) {
    if let Some(message) = catalog.error_message() {
        eprintln!("{}", message);
        if catalog.can_retry() {
            eprintln!("Run storefront again to retry.");
        }
    }

    let products = catalog.sorted();
    if products.is_empty() {
        if catalog.error().is_none() {
            println!("No products available.");
        }
        return;
    }

    let arrow = |column: ProductSortColumn| match catalog.sort_column() {
        Some(c) if c == column && catalog.sort_ascending() => " ^",
        Some(c) if c == column => " v",
        _ => "",
    };
    let heading = |column: ProductSortColumn| format!("{}{}", column.title(), arrow(column));

    println!(
        "{:<10} {:<name$} {:<desc$} {:>14} {:>7} {:<8}  {}",
        heading(ProductSortColumn::Id),
        heading(ProductSortColumn::Name),
        heading(ProductSortColumn::Description),
        heading(ProductSortColumn::Price),
        heading(ProductSortColumn::Quantity),
        "",
        "Actions",
        name = NAME_WIDTH,
        desc = DESCRIPTION_WIDTH,
    );

    for product in products {
        let actions = catalog.actions_for(product);
        let mut labels = Vec::new();
        if actions.can_edit {
            labels.push("edit");
        }
        if actions.can_order {
            labels.push("order");
        }

        println!(
            "{:<10} {:<name$} {:<desc$} {:>14} {:>7} {:<8}  {}",
            truncate_string(&product.id, 10),
            truncate_string(&product.name, NAME_WIDTH),
            truncate_string(&product.description, DESCRIPTION_WIDTH),
            format_price(product.price),
            product.quantity,
            product.stock_level().label(),
            labels.join(", "),
            name = NAME_WIDTH,
            desc = DESCRIPTION_WIDTH,
        );
    }

    println!();
    println!(
        "{} products, total value {}, {} units in stock",
        catalog.products().len(),
        format_price(catalog.total_value()),
        catalog.total_stock()
    );
}

fn print_commands(commands: &[Command]) {
    if commands.is_empty() {
        println!("No orders yet.");
        return;
    }

    println!(
        "{:<10} {:<19} {:<12} {:>14} {:>6}",
        "Order", "Date", "Status", "Amount", "Items"
    );
    for command in commands {
        let date = command
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<19} {:<12} {:>14} {:>6}",
            truncate_string(&command.id, 10),
            date,
            truncate_string(&command.status, 12),
            format_price(command.amount),
            command.item_count(),
        );
    }
}
