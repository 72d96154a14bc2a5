//! Cart sync CLI - drive the cart engine from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the guest cart stored on this device
//! cart-sync show
//!
//! # Add two of a variant to the guest cart
//! cart-sync add V1 --quantity 2 --price 500
//!
//! # Sign in and merge the guest cart into the server cart
//! CART_SESSION_COOKIE=... cart-sync login
//!
//! # Work on the server cart
//! cart-sync --authenticated coupon SAVE10
//! cart-sync --authenticated checkout
//! ```
//!
//! # Commands
//!
//! - `show` - Print the cart and totals
//! - `add`, `update`, `remove`, `clear` - Edit the cart
//! - `coupon` - Verify and apply a coupon code
//! - `login` - Sign in and merge the guest cart
//! - `checkout` - Settle the cart and print the checkout summary

#![cfg_attr(not(test), forbid(unsafe_code))]

use cart_sync_core::Decimal;
use cart_sync_storefront::config::CartSyncConfig;
use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "cart-sync")]
#[command(author, version, about = "Cart sync engine CLI")]
struct Cli {
    /// Use the authenticated server cart instead of the guest cart
    #[arg(long, global = true)]
    authenticated: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cart and totals
    Show,
    /// Add a product variant
    Add {
        /// Product variant ID
        variant: String,

        /// Number of units
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Unit price for the guest cart (the server prices its own lines)
        #[arg(short, long, default_value = "0")]
        price: Decimal,
    },
    /// Set a line's quantity (0 removes it)
    Update {
        /// Cart line ID
        item: String,
        /// New quantity
        quantity: u32,
    },
    /// Remove a line
    Remove {
        /// Cart line ID
        item: String,
    },
    /// Empty the cart
    Clear,
    /// Verify a coupon code and apply it to the cart
    Coupon {
        /// Coupon code
        code: String,
    },
    /// Sign in and merge the guest cart into the server cart
    Login,
    /// Settle the cart and print the checkout summary
    Checkout,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartSyncConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cart_sync_cli=info,cart_sync_storefront=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match CartSyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing();
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    if let Err(e) = run(cli, config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: CartSyncConfig) -> Result<(), commands::CommandError> {
    let authenticated = cli.authenticated || matches!(cli.command, Commands::Login);
    let session = commands::Session::open(&config, cli.authenticated)?;
    if authenticated {
        session.require_credentials()?;
    }

    match cli.command {
        Commands::Show => session.show().await?,
        Commands::Add {
            variant,
            quantity,
            price,
        } => session.add(variant, quantity, price).await?,
        Commands::Update { item, quantity } => session.update(item, quantity).await?,
        Commands::Remove { item } => session.remove(item).await?,
        Commands::Clear => session.clear().await?,
        Commands::Coupon { code } => session.coupon(&code).await?,
        Commands::Login => session.login().await?,
        Commands::Checkout => session.checkout().await?,
    }
    Ok(())
}
