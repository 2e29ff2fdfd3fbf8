// Atari DQN control CLI
// Train, watch and benchmark DQN agents from the command line

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::RunConfig;

#[derive(Parser)]
#[command(name = "atari-dqnctl")]
#[command(about = "Train and play DQN agents on Atari-style games", version)]
struct Cli {
    /// JSON run file with atari, wrap, agent and train sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a DQN agent
    Train {
        /// Game to train on
        #[arg(short, long)]
        game: Option<String>,

        /// Maximum number of episodes
        #[arg(long)]
        episodes: Option<usize>,

        /// Running reward that ends training
        #[arg(long)]
        stop_reward: Option<f64>,

        /// Minibatch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Random transitions stored before learning
        #[arg(long)]
        fill: Option<usize>,

        /// Directory receiving checkpoints
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Seed for the game, exploration and sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Continue from saved weights
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Force training on the CPU
        #[arg(long)]
        cpu: bool,
    },

    /// Play greedy episodes with a trained model
    Play {
        /// Weights file to load
        model: PathBuf,

        /// Number of episodes
        #[arg(short = 'n', long, default_value = "1")]
        episodes: usize,

        /// Directory receiving rendered frames
        #[arg(long)]
        render_dir: Option<PathBuf>,

        /// Game to play
        #[arg(short, long)]
        game: Option<String>,
    },

    /// Play random games directly on the emulator
    Random {
        /// Game to play
        #[arg(short, long)]
        game: Option<String>,

        /// Number of games
        #[arg(short = 'n', long, default_value = "10")]
        episodes: usize,

        /// Players sharing the random action
        #[arg(long, default_value = "2")]
        players: usize,

        /// Seed of the action sampler
        #[arg(long, default_value = "123")]
        seed: u64,
    },

    /// List the available games
    Games,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut run = RunConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Train {
            game,
            episodes,
            stop_reward,
            batch_size,
            fill,
            out_dir,
            seed,
            resume,
            cpu,
        } => {
            if let Some(game) = game {
                run.atari.game = game;
            }
            if let Some(episodes) = episodes {
                run.train.episodes = episodes;
            }
            if let Some(stop_reward) = stop_reward {
                run.train.stop_reward = stop_reward;
            }
            if let Some(batch_size) = batch_size {
                run.train.batch_size = batch_size;
            }
            if let Some(fill) = fill {
                run.train.replay_buffer_fill_len = fill;
            }
            if let Some(out_dir) = out_dir {
                run.agent.out_dir = out_dir;
            }
            if let Some(seed) = seed {
                run.atari.env.seed = Some(seed);
                run.wrap.seed = seed;
                run.agent.seed = seed;
                run.train.seed = seed;
            }
            if cpu {
                run.agent.use_cuda = false;
            }
            commands::train(run, resume).await?;
        }

        Commands::Play {
            model,
            episodes,
            render_dir,
            game,
        } => {
            if let Some(game) = game {
                run.atari.game = game;
            }
            if render_dir.is_some() {
                run.atari.env.render_dir = render_dir;
            }
            commands::play(run, &model, episodes).await?;
        }

        Commands::Random {
            game,
            episodes,
            players,
            seed,
        } => {
            if let Some(game) = game {
                run.atari.game = game;
            }
            commands::random(&run, episodes, players, seed)?;
        }

        Commands::Games => {
            commands::list_games()?;
        }
    }

    Ok(())
}
