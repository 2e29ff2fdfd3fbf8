// Command implementations for atari-dqnctl

use anyhow::{Context, Result};
use std::path::Path;

use atari_dqn_agent::{DQNAgent, Trainer};
use atari_dqn_core::{Environment, StackedFrames};
use atari_dqn_env::{list_emulators, make_dqn_env, make_emulator, random_play, RandomPlayConfig};

use crate::config::RunConfig;

fn build_agent<E: Environment>(run: &RunConfig, env: &E) -> Result<DQNAgent<StackedFrames>> {
    DQNAgent::new(run.agent.clone(), &env.observation_shape(), env.action_space().n())
        .context("Failed to create DQN agent")
}

pub async fn train(run: RunConfig, resume: Option<std::path::PathBuf>) -> Result<()> {
    println!("🤖 Starting DQN training");
    println!("   Game: {}", run.atari.game);
    println!("   Episodes: {}", run.train.episodes);
    println!("   Stop reward: {}", run.train.stop_reward);
    println!("   Output: {}", run.agent.out_dir.display());

    let env = make_dqn_env(&run.atari, &run.wrap)
        .with_context(|| format!("Failed to create environment {}", run.atari.game))?;
    let mut agent = build_agent(&run, &env)?;
    if let Some(path) = resume {
        agent
            .load_model(&path)
            .await
            .with_context(|| format!("Failed to load model {}", path.display()))?;
    }

    let mut trainer = Trainer::from_config(env, agent, &run.train)?;
    let report = trainer.train(&run.train).await.context("Training failed")?;
    trainer.close_env().await?;

    if report.stop_reward_reached {
        println!("\n✅ Stop reward reached after {} episodes", report.episodes);
    } else {
        println!("\n⏹  Finished {} episodes", report.episodes);
    }
    println!("   Steps: {}", report.total_steps);
    println!("   Running reward: {:.2}", report.running_reward);
    println!("   Epsilon: {:.2}", report.epsilon);
    if let Some(loss) = report.mean_loss {
        println!("   Last episode loss: {loss:.5}");
    }
    Ok(())
}

pub async fn play(run: RunConfig, model: &Path, episodes: usize) -> Result<()> {
    let env = make_dqn_env(&run.atari, &run.wrap)
        .with_context(|| format!("Failed to create environment {}", run.atari.game))?;
    let mut agent = build_agent(&run, &env)?;
    agent
        .load_model(model)
        .await
        .with_context(|| format!("Failed to load model {}", model.display()))?;

    let mut trainer = Trainer::new(env, agent, 1, run.train.seed)?;
    let rewards = trainer.play(episodes).await?;
    trainer.close_env().await?;

    for (i, reward) in rewards.iter().enumerate() {
        println!("Episode {}: reward = {reward}", i + 1);
    }
    if let Some(dir) = &run.atari.env.render_dir {
        println!("🖼  Frames written to {}", dir.display());
    }
    Ok(())
}

pub fn random(run: &RunConfig, episodes: usize, num_players: usize, seed: u64) -> Result<()> {
    let mut emulator = make_emulator(&run.atari.game, &run.atari.emulator_settings())
        .with_context(|| format!("Failed to create emulator {}", run.atari.game))?;
    let config = RandomPlayConfig {
        episodes,
        num_players,
        seed,
    };
    let scores = random_play(emulator.as_mut(), &config)?;

    #[allow(clippy::cast_precision_loss)]
    let mean = scores.iter().map(|&s| f64::from(s)).sum::<f64>() / scores.len().max(1) as f64;
    println!("Mean score over {} games: {mean:.2}", scores.len());
    Ok(())
}

pub fn list_games() -> Result<()> {
    println!("🎮 Available games:");
    for name in list_emulators()? {
        println!("   {name}");
    }
    Ok(())
}
