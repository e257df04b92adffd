use clap::{Parser, Subcommand};
use recovery_mailer::config::load_config_or_panic;
use recovery_mailer::notify::DeliveryStatus;
use recovery_mailer::{Notifier, probe};
use rustls::crypto;
use rustls::crypto::CryptoProvider;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Operational tooling for the credential-recovery mailer.
#[derive(Parser)]
#[command(name = "recovery-mailer", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check connectivity and authentication against the configured relay
    /// without sending a message. Suitable for liveness/readiness checks.
    Probe,
    /// Print the redacted mail configuration for support diagnostics.
    Config,
    /// Send a connectivity test message through the full delivery chain.
    TestSend {
        /// Recipient address for the test message.
        #[arg(long)]
        to: String,
    },
}

fn initialize_tracing() {
    let default_directives = "recovery_mailer=info,audit=warn,lettre=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install().expect("Failed to install `color_eyre::install`");
    dotenvy::dotenv().ok();

    initialize_tracing();

    let ring_provider = crypto::ring::default_provider();
    CryptoProvider::install_default(ring_provider).expect("Failed to install crypto provider");

    let cli = Cli::parse();
    let config = load_config_or_panic();

    let outcome = match cli.command {
        Command::Probe => probe::probe(&config).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.mail.redacted())?);
            return Ok(());
        }
        Command::TestSend { to } => {
            let notifier = Notifier::init(config);
            notifier.send_connectivity_test(&to).await
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome.status == DeliveryStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
