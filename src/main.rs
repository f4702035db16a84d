use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chorus_bridge::{Config, Daemon};

/// Chorus - voice channel bridge to a conversational agent
#[derive(Parser)]
#[command(name = "chorus", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Validate environment configuration and print the resolved settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,chorus_bridge=info",
        1 => "info,chorus_bridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::CheckConfig) = cli.command {
        return check_config();
    }

    let config = Config::from_env()?;
    tracing::info!(
        server = config.server_id,
        voice_channel = config.voice_channel_id,
        allowed_users = config.allowed_users.len(),
        wake_word = config.wake.enabled,
        "starting chorus bridge"
    );

    Daemon::new(config).run().await?;
    Ok(())
}

/// Validate the environment and print what the daemon would run with
fn check_config() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    println!("configuration ok");
    println!("  server:          {}", config.server_id);
    println!("  voice channel:   {}", config.voice_channel_id);
    println!("  text channel:    {}", config.text_channel_id);
    println!("  allowed users:   {:?}", config.allowed_users);
    println!("  brain model:     {}", config.brain.model);
    println!("  stt provider:    {:?}", config.stt.provider);
    println!("  tts provider:    {:?}", config.tts.provider);
    println!(
        "  wake word:       {}",
        if config.wake.enabled {
            format!("on ({})", config.wake.phrases.join(", "))
        } else {
            "off".to_string()
        }
    );
    println!("  streaming tts:   {}", config.streaming_tts);
    println!(
        "  alert ingress:   {}:{}",
        config.alert.bind_address, config.alert.port
    );

    Ok(())
}
