use clap::Parser;
use log_follower::{RotationController, TailConfig, charset_for_label, shared_sink};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(
    name = "log-follower",
    about = "Follow a file like tail -f, across log rotation",
    version
)]
struct Cli {
    /// File to follow.
    path: PathBuf,

    /// Charset of the followed file.
    #[arg(short = 'e', long = "encode", value_name = "CHARSET")]
    encode: Option<String>,

    /// Charset written to stdout.
    #[arg(short = 'E', long = "dest-encode", value_name = "CHARSET")]
    dest_encode: Option<String>,

    /// Reset previous reading position.
    #[arg(short, long)]
    reset: bool,

    /// Persist last reading position.
    #[arg(short, long)]
    persist: bool,

    /// Persist last reading position to FILE (implies --persist).
    #[arg(short = 'P', long, value_name = "FILE", env = "LOG_FOLLOWER_POS_FILE")]
    pos_file: Option<PathBuf>,

    /// Seconds to keep reading a deleted file before giving it up.
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    rotate_wait: u64,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> log_follower::Result<TailConfig> {
        let mut config = TailConfig::new(&self.path)?
            .reset(self.reset)
            .persist(self.persist)
            .rotate_wait(Duration::from_secs(self.rotate_wait));
        if let Some(label) = &self.encode {
            config = config.source_charset(charset_for_label(label)?);
        }
        if let Some(label) = &self.dest_encode {
            config = config.dest_charset(charset_for_label(label)?);
        }
        if let Some(pos_file) = &self.pos_file {
            config = config.position_file(pos_file)?;
        }
        Ok(config)
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries the followed content
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("log-follower: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let controller = RotationController::new(config, shared_sink(tokio::io::stdout()));
    let handle = controller.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            handle.shutdown();
        }
    });

    match controller.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("log-follower: {}", e);
            ExitCode::FAILURE
        }
    }
}
