//! bioApp CLI - Drive the storefront engine from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # List the catalog, optionally filtered
//! bioapp products --query proteina --price 30to60
//!
//! # Price a cart (repeat --add for more units)
//! bioapp quote --add p1 --add p1 --shipping express
//!
//! # Full checkout: submit, open the payment page, wait for the return
//! bioapp checkout --add p1 --name "Ana López" --email ana@bioapp.mx --address "Av. Reforma 1"
//!
//! # Classify a payment return URL
//! bioapp classify "bioapp://payment-success?order_id=991"
//! ```
//!
//! Configuration comes from `STOREFRONT_*` environment variables (see
//! `bioapp_storefront::config`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use bioapp_core::ShippingMethod;
use bioapp_storefront::catalog::{CatalogFilter, PriceRange};
use bioapp_storefront::config::StorefrontConfig;
use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod browser;
mod commands;

#[derive(Parser)]
#[command(name = "bioapp")]
#[command(author, version, about = "bioApp storefront tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List products from the catalog service
    Products {
        /// Case-insensitive name search
        #[arg(short, long, default_value = "")]
        query: String,

        /// Exact category
        #[arg(short, long)]
        category: Option<String>,

        /// Price band (`lt30`, `30to60`, `gt60`)
        #[arg(short, long)]
        price: Option<PriceRange>,

        /// Also list the available categories
        #[arg(long)]
        categories: bool,
    },
    /// Price a cart against the live catalog
    Quote {
        /// Product ID to add; repeat to add more units
        #[arg(short, long = "add", required = true)]
        add: Vec<String>,

        /// Shipping method (`standard`, `express`)
        #[arg(short, long, default_value = "standard")]
        shipping: ShippingMethod,
    },
    /// Submit a cart and wait for the payment to come back
    Checkout {
        /// Product ID to add; repeat to add more units
        #[arg(short, long = "add", required = true)]
        add: Vec<String>,

        /// Shipping method (`standard`, `express`)
        #[arg(short, long, default_value = "standard")]
        shipping: ShippingMethod,

        /// Buyer full name
        #[arg(short, long)]
        name: String,

        /// Buyer email address
        #[arg(short, long)]
        email: String,

        /// Shipping address
        #[arg(long)]
        address: String,

        /// Log the payment URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Classify a payment return URL
    Classify {
        /// The URL the payment page returned to
        url: String,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
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

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Sentry must be initialized before the tracing subscriber
    let config = StorefrontConfig::from_env();
    let _sentry_guard = config.as_ref().ok().and_then(init_sentry);

    // Defaults to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bioapp_storefront=info,bioapp_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let result = match config {
        Ok(config) => run(cli, &config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &StorefrontConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Products {
            query,
            category,
            price,
            categories,
        } => {
            let filter = CatalogFilter {
                query,
                category,
                price_range: price,
            };
            commands::products::list(config, &filter, categories).await?;
        }
        Commands::Quote { add, shipping } => {
            commands::quote::run(config, &add, shipping).await?;
        }
        Commands::Checkout {
            add,
            shipping,
            name,
            email,
            address,
            no_browser,
        } => {
            let args = commands::checkout::CheckoutArgs {
                product_ids: add,
                shipping,
                full_name: name,
                email,
                address,
                open_browser: !no_browser,
            };
            commands::checkout::run(config, args).await?;
        }
        Commands::Classify { url } => commands::classify::run(&url),
    }
    Ok(())
}
