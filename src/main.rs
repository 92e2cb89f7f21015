//! Thin binary entry point (§4.8): `line run [--once]` and `line trigger`.
//!
//! Everything richer than driving the engine from a shell — status
//! rendering, `init`, the `/line-rebase` workflow — is expected to live in
//! a separate, external collaborator.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "line", about = "Station-runner engine for a local Git repository")]
struct Cli {
    /// Repository root. Defaults to the current directory.
    #[arg(short = 'C', long, global = true)]
    repo: Option<PathBuf>,

    /// Path to the station configuration file.
    #[arg(long, global = true, default_value = "line.yaml")]
    config: PathBuf,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against the repository.
    Run {
        /// Run exactly one cycle and exit, bypassing the PID-file
        /// singleton guard.
        #[arg(long)]
        once: bool,
    },
    /// Record the watched branch's current HEAD and wake the runner.
    Trigger {
        /// Branch to read HEAD from. Defaults to `settings.watches` in
        /// the loaded config.
        #[arg(long)]
        watches: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if verbose { "debug" } else { "info" }),
    )
    .format(|buf, record| {
        use std::io::Write;

        // Map thread ID to a single character so interleaved log lines
        // from concurrently processed stations stay disambiguated.
        let thread_id = format!("{:?}", std::thread::current().id());
        let thread_num = thread_id
            .strip_prefix("ThreadId(")
            .and_then(|s| s.strip_suffix(')'))
            .and_then(|s| s.parse::<usize>().ok())
            .map(|n| {
                if n <= 26 {
                    char::from(b'a' + (n - 1) as u8)
                } else if n <= 52 {
                    char::from(b'A' + (n - 27) as u8)
                } else {
                    '?'
                }
            })
            .unwrap_or('?');

        writeln!(buf, "[{thread_num}] {}", record.args())
    })
    .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let repo_root = cli
        .repo
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let config_path = if cli.config.is_absolute() {
        cli.config
    } else {
        repo_root.join(&cli.config)
    };

    match cli.command {
        Commands::Run { once } => {
            if once {
                line_runner::runner::run_once(&config_path, &repo_root);
            } else {
                line_runner::runner::run(&config_path, &repo_root, None);
            }
        }
        Commands::Trigger { watches } => {
            let watches = match watches {
                Some(w) => w,
                None => {
                    let cfg = line_runner::config::Config::load(&config_path)?;
                    cfg.settings.watches.clone()
                }
            };
            line_runner::runner::write_trigger(&repo_root, &watches)?;
            let self_exe = std::env::current_exe()?;
            line_runner::runner::spawn_runner_if_needed(&repo_root, &config_path, &self_exe)?;
        }
    }

    Ok(())
}
