//! Application state: the session registry, completion backend, stores and
//! the shared engine context.
//!
//! This module owns:
//!   - the registry of live engines (session id -> engine behind its own mutex)
//!   - the completion backend (OpenAI when configured, otherwise offline)
//!   - session / profile stores
//!   - prompts, engine settings and the concept lexicon (from TOML or defaults)

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::load_tutor_config_from_env;
use crate::engine::{EngineContext, SocraticEngine};
use crate::lexicon::ConceptLexicon;
use crate::openai::{CompletionBackend, Offline, OpenAI};
use crate::profile::{InMemoryProfileStore, ProfileStore};
use crate::store::{InMemorySessionStore, SessionStore};

pub type SharedEngine = Arc<Mutex<SocraticEngine>>;

struct Slot {
    engine: SharedEngine,
    last_seen: Instant,
}

impl Slot {
    fn new(engine: SharedEngine) -> Self {
        Self { engine, last_seen: Instant::now() }
    }
}

/// Explicit map of live sessions. Each engine sits behind its own mutex so
/// turns on one session are serialized while sessions run independently.
#[derive(Default)]
pub struct SessionRegistry {
    engines: RwLock<HashMap<String, Slot>>,
}

impl SessionRegistry {
    /// Register an engine under a fresh id.
    #[instrument(level = "debug", skip(self, engine))]
    pub async fn create(&self, engine: SocraticEngine) -> (String, SharedEngine) {
        let id = Uuid::new_v4().to_string();
        let shared = Arc::new(Mutex::new(engine));
        self.engines.write().await.insert(id.clone(), Slot::new(shared.clone()));
        (id, shared)
    }

    /// Insert under a known id (restoring from the store). Keeps an existing entry.
    pub async fn adopt(&self, id: &str, engine: SocraticEngine) -> SharedEngine {
        let mut engines = self.engines.write().await;
        let slot = engines
            .entry(id.to_string())
            .or_insert_with(|| Slot::new(Arc::new(Mutex::new(engine))));
        slot.last_seen = Instant::now();
        slot.engine.clone()
    }

    /// Live engine for `id`; marks the session as recently used.
    pub async fn get(&self, id: &str) -> Option<SharedEngine> {
        let mut engines = self.engines.write().await;
        engines.get_mut(id).map(|slot| {
            slot.last_seen = Instant::now();
            slot.engine.clone()
        })
    }

    pub async fn evict(&self, id: &str) -> Option<SharedEngine> {
        self.engines.write().await.remove(id).map(|slot| slot.engine)
    }

    /// Drop sessions unused for at least `max_idle`. Engines still borrowed by
    /// an in-flight request are kept. Returns the evicted ids.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let mut engines = self.engines.write().await;
        let idle: Vec<String> = engines
            .iter()
            .filter(|(_, slot)| slot.last_seen.elapsed() >= max_idle && Arc::strong_count(&slot.engine) == 1)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &idle {
            engines.remove(id);
        }
        idle
    }

    pub async fn len(&self) -> usize {
        self.engines.read().await.len()
    }
}

pub struct AppState {
    pub sessions: SessionRegistry,
    pub backend: Arc<dyn CompletionBackend>,
    pub store: Arc<dyn SessionStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub engine_ctx: EngineContext,
}

impl AppState {
    /// Build state from env: load config, build the lexicon, init the backend.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_tutor_config_from_env().unwrap_or_default();

        let lexicon = match &cfg.lexicon {
            Some(table) => ConceptLexicon::from_table(table),
            None => ConceptLexicon::builtin(),
        };
        info!(
            target: "socratic_tutor",
            domains = ?lexicon.domain_names().collect::<Vec<_>>(),
            custom = cfg.lexicon.is_some(),
            "Concept lexicon loaded"
        );

        let backend: Arc<dyn CompletionBackend> = match OpenAI::from_env() {
            Some(oa) => {
                info!(target: "socratic_tutor", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
                Arc::new(oa)
            }
            None => {
                info!(target: "socratic_tutor", "OpenAI disabled (no OPENAI_API_KEY). Tutor replies use canned prompts.");
                Arc::new(Offline)
            }
        };

        Self::with_parts(
            EngineContext::new(lexicon, cfg.prompts, cfg.engine),
            backend,
            Arc::new(InMemorySessionStore::default()),
            Arc::new(InMemoryProfileStore::default()),
        )
    }

    pub fn with_parts(
        engine_ctx: EngineContext,
        backend: Arc<dyn CompletionBackend>,
        store: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            sessions: SessionRegistry::default(),
            backend,
            store,
            profiles,
            engine_ctx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineSettings, Prompts};
    use crate::profile::ProfileSeed;

    fn engine() -> SocraticEngine {
        let ctx = EngineContext::new(ConceptLexicon::builtin(), Prompts::default(), EngineSettings::default());
        SocraticEngine::new(&ctx, ProfileSeed::default(), None)
    }

    #[tokio::test]
    async fn create_get_evict() {
        let reg = SessionRegistry::default();
        let (id, _) = reg.create(engine()).await;
        let (other, _) = reg.create(engine()).await;
        assert_ne!(id, other);
        assert_eq!(reg.len().await, 2);
        assert!(reg.get(&id).await.is_some());
        assert!(reg.evict(&id).await.is_some());
        assert!(reg.get(&id).await.is_none());
        assert!(reg.evict(&id).await.is_none());
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_evicted_unless_in_use() {
        let reg = SessionRegistry::default();
        let (stale, _) = reg.create(engine()).await;
        let (busy, held) = reg.create(engine()).await;
        let (fresh, _) = reg.create(engine()).await;

        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(reg.get(&fresh).await.is_some());
        tokio::time::advance(Duration::from_secs(30)).await;

        let evicted = reg.evict_idle(Duration::from_secs(120)).await;
        assert_eq!(evicted, vec![stale.clone()]);
        assert!(reg.get(&stale).await.is_none());
        assert!(reg.get(&busy).await.is_some());
        assert!(reg.get(&fresh).await.is_some());

        drop(held);
        tokio::time::advance(Duration::from_secs(120)).await;
        let mut evicted = reg.evict_idle(Duration::from_secs(120)).await;
        evicted.sort();
        let mut expected = vec![busy, fresh];
        expected.sort();
        assert_eq!(evicted, expected);
        assert_eq!(reg.len().await, 0);
    }

    #[tokio::test]
    async fn adopt_keeps_live_engine() {
        let reg = SessionRegistry::default();
        let (id, live) = reg.create(engine()).await;
        let adopted = reg.adopt(&id, engine()).await;
        assert!(Arc::ptr_eq(&live, &adopted));
    }
}
