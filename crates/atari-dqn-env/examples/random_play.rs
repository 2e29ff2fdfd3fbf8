//! Example: random agent on the raw emulator, then on the wrapped DQN environment

use atari_dqn_core::{Environment, TrackedEnvironment};
use atari_dqn_env::{make_dqn_env, make_emulator, random_play, AtariConfig, RandomPlayConfig, WrapConfig};
use rand::SeedableRng;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let atari = AtariConfig::default();

    // Two players pressing the same random button
    let mut emulator = make_emulator(&atari.game, &atari.emulator_settings())?;
    let scores = random_play(emulator.as_mut(), &RandomPlayConfig::default())?;
    println!("Raw scores: {scores:?}");

    // One preprocessed episode through the wrapper stack
    let mut env = TrackedEnvironment::new(make_dqn_env(&atari, &WrapConfig::default())?);
    let action_space = env.action_space();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);

    env.reset().await?;
    loop {
        let step = env.step(action_space.sample(&mut rng)).await?;
        if step.done {
            break;
        }
    }

    if let Some(episode) = env.episode_info() {
        println!(
            "Wrapped episode: reward = {:.1}, steps = {}",
            episode.total_reward, episode.steps
        );
    }
    Ok(())
}
