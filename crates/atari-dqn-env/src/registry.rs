//! Emulator registry for creating games by name

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use atari_dqn_core::{RLError, Result};

use crate::emulator::{Emulator, EmulatorSettings};
use crate::paddle::PaddleGame;

type EmulatorConstructor = Box<dyn Fn(&EmulatorSettings) -> Result<Box<dyn Emulator>> + Send + Sync>;

lazy_static::lazy_static! {
    static ref REGISTRY: Arc<Mutex<EmulatorRegistry>> = Arc::new(Mutex::new(EmulatorRegistry::with_builtins()));
}

/// Global emulator registry
pub struct EmulatorRegistry {
    /// Registered emulators
    emulators: HashMap<String, EmulatorConstructor>,
}

impl EmulatorRegistry {
    /// Create an empty registry
    fn new() -> Self {
        Self {
            emulators: HashMap::new(),
        }
    }

    fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(PaddleGame::NAME, |settings| {
            Ok(Box::new(PaddleGame::new(settings)) as Box<dyn Emulator>)
        });
        registry
    }

    /// Register an emulator, replacing any previous one with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&EmulatorSettings) -> Result<Box<dyn Emulator>> + Send + Sync + 'static,
    {
        self.emulators.insert(name.into(), Box::new(constructor));
    }

    /// Create an emulator by name
    pub fn make(&self, name: &str, settings: &EmulatorSettings) -> Result<Box<dyn Emulator>> {
        self.emulators
            .get(name)
            .ok_or_else(|| RLError::Emulator(format!("Unknown emulator: {name}")))
            .and_then(|constructor| constructor(settings))
    }

    /// List registered emulators, sorted by name
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.emulators.keys().cloned().collect();
        names.sort();
        names
    }
}

fn registry() -> Result<MutexGuard<'static, EmulatorRegistry>> {
    REGISTRY
        .lock()
        .map_err(|_| RLError::Emulator("emulator registry lock poisoned".into()))
}

/// Register an emulator globally
pub fn register_emulator<F>(name: impl Into<String>, constructor: F) -> Result<()>
where
    F: Fn(&EmulatorSettings) -> Result<Box<dyn Emulator>> + Send + Sync + 'static,
{
    let name = name.into();
    tracing::debug!(%name, "registering emulator");
    registry()?.register(name, constructor);
    Ok(())
}

/// Create an emulator by name
pub fn make_emulator(name: &str, settings: &EmulatorSettings) -> Result<Box<dyn Emulator>> {
    registry()?.make(name, settings)
}

/// List all registered emulators
pub fn list_emulators() -> Result<Vec<String>> {
    Ok(registry()?.list())
}
