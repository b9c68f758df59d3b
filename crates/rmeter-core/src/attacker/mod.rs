mod http_attacker;

pub use http_attacker::HttpAttacker;

use crate::config::RunnerConfig;
use crate::error::RmeterError;
use crate::model::DoResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Read-only view of the run an attacker is participating in. Handed to
/// `setup` instead of a back-reference to the runner: an attacker that needs
/// the target URL or a shared HTTP client reads it here, rather than holding
/// a pointer into the orchestrator that owns it.
#[derive(Clone)]
pub struct AttackerContext {
    pub config: Arc<RunnerConfig>,
    pub runner_name: String,
}

/// One call in, one result out. Implementations are cloned once per worker
/// via `clone_attacker`, so any per-call state (a connection, a token) must
/// be safe to duplicate across workers that never talk to each other.
#[async_trait]
pub trait Attacker: Send + Sync {
    async fn setup(&mut self, ctx: &AttackerContext) -> Result<(), RmeterError>;

    async fn do_call(&mut self) -> DoResult;

    async fn teardown(&mut self) -> Result<(), RmeterError>;

    fn clone_attacker(&self) -> Box<dyn Attacker>;
}

type Factory = Arc<dyn Fn() -> Box<dyn Attacker> + Send + Sync>;

fn registry() -> &'static RwLock<HashMap<String, Factory>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Factory>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<String, Factory> = HashMap::new();
        map.insert(
            "http".to_string(),
            Arc::new(|| Box::new(HttpAttacker::new()) as Box<dyn Attacker>),
        );
        RwLock::new(map)
    })
}

/// Adds or replaces the factory registered under `name`.
pub fn register_attacker<F>(name: impl Into<String>, factory: F)
where
    F: Fn() -> Box<dyn Attacker> + Send + Sync + 'static,
{
    registry()
        .write()
        .expect("attacker registry poisoned")
        .insert(name.into(), Arc::new(factory));
}

/// Instantiates a fresh attacker for `name`, or `UnknownAttacker` if nothing
/// was registered under it.
pub fn attacker_from_registry(name: &str) -> Result<Box<dyn Attacker>, RmeterError> {
    registry()
        .read()
        .expect("attacker registry poisoned")
        .get(name)
        .map(|factory| factory())
        .ok_or_else(|| RmeterError::UnknownAttacker(name.to_string()))
}
