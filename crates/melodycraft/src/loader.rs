//! Lazy, shared loading of the notation engine.

use crate::engine::{Engine, EngineError};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Result of an engine load. Consumers branch on this once, where they use it.
pub enum EngineStatus<E> {
    Available(Arc<E>),
    Unavailable,
}

impl<E> EngineStatus<E> {
    pub fn engine(&self) -> Option<&Arc<E>> {
        match self {
            EngineStatus::Available(engine) => Some(engine),
            EngineStatus::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, EngineStatus::Available(_))
    }
}

impl<E> Clone for EngineStatus<E> {
    fn clone(&self) -> Self {
        match self {
            EngineStatus::Available(engine) => EngineStatus::Available(Arc::clone(engine)),
            EngineStatus::Unavailable => EngineStatus::Unavailable,
        }
    }
}

impl<E> std::fmt::Debug for EngineStatus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineStatus::Available(_) => f.write_str("Available"),
            EngineStatus::Unavailable => f.write_str("Unavailable"),
        }
    }
}

/// Shared "still mounted" flag. Async results are applied only while alive.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Liveness(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn kill(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

type Factory<E> = Box<dyn Fn() -> BoxFuture<'static, Result<E, EngineError>> + Send + Sync>;

/// Loads the engine on first use. Concurrent and later callers share the
/// one load, including a failed one.
pub struct EngineLoader<E> {
    factory: Factory<E>,
    status: OnceCell<EngineStatus<E>>,
}

impl<E: Engine> EngineLoader<E> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<E, EngineError>> + Send + Sync + 'static,
    {
        EngineLoader {
            factory: Box::new(factory),
            status: OnceCell::new(),
        }
    }

    /// A loader whose engine is already there.
    pub fn ready(engine: E) -> Self {
        let status = OnceCell::new_with(Some(EngineStatus::Available(Arc::new(engine))));
        EngineLoader {
            factory: Box::new(|| {
                Box::pin(async { Err(EngineError::Context("engine already loaded".into())) })
            }),
            status,
        }
    }

    pub async fn load(&self) -> EngineStatus<E> {
        self.status
            .get_or_init(|| async {
                match (self.factory)().await {
                    Ok(engine) => {
                        info!(audio = engine.supports_audio(), "notation engine loaded");
                        EngineStatus::Available(Arc::new(engine))
                    }
                    Err(e) => {
                        warn!(error = %e, "notation engine unavailable");
                        EngineStatus::Unavailable
                    }
                }
            })
            .await
            .clone()
    }

    /// Like [`load`](Self::load), but `None` if `liveness` died meanwhile.
    pub async fn load_while(&self, liveness: &Liveness) -> Option<EngineStatus<E>> {
        let status = self.load().await;
        liveness.is_alive().then_some(status)
    }

    /// The settled status, without starting a load.
    pub fn status(&self) -> Option<EngineStatus<E>> {
        self.status.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use std::sync::atomic::AtomicUsize;

    fn counting_loader(calls: Arc<AtomicUsize>, fail: bool) -> EngineLoader<FakeEngine> {
        EngineLoader::new(move || {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                if fail {
                    Err(EngineError::Context("no engine in this runtime".into()))
                } else {
                    Ok(FakeEngine::new())
                }
            })
        })
    }

    #[tokio::test]
    async fn nothing_loads_until_asked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(Arc::clone(&calls), false);
        assert!(loader.status().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(loader.load().await.is_available());
        assert!(loader.status().unwrap().is_available());
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(Arc::clone(&calls), false);

        let (a, b, c) = tokio::join!(loader.load(), loader.load(), loader.load());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (a, b, c) = (a.engine().unwrap(), b.engine().unwrap(), c.engine().unwrap());
        assert!(Arc::ptr_eq(a, b) && Arc::ptr_eq(b, c));

        loader.load().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_resolves_unavailable_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(Arc::clone(&calls), true);

        assert!(!loader.load().await.is_available());
        assert!(!loader.load().await.is_available());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_result_is_discarded_after_teardown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(calls, false);
        let liveness = Liveness::new();

        let pending = loader.load_while(&liveness);
        liveness.kill();
        assert!(pending.await.is_none());

        let alive = Liveness::new();
        assert!(loader.load_while(&alive).await.is_some());
    }

    #[tokio::test]
    async fn ready_loader_never_calls_a_factory() {
        let loader = EngineLoader::ready(FakeEngine::new());
        assert!(loader.status().unwrap().is_available());
        assert!(loader.load().await.is_available());
    }
}
