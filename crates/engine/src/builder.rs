//! Engine construction
//!
//! All collaborators are passed explicitly: the processor, the persister,
//! the bootstrap, the codec registry, and optionally a custom routing
//! strategy. [`EngineBuilder::build`] validates the configuration and the
//! wiring, then recovers and starts every partition; it returns a running
//! engine or the first error, with already-started partitions shut back
//! down.
//!
//! ```ignore
//! let engine = EngineBuilder::new(config)
//!     .processor(WalletProcessor)
//!     .persister(PgPersister::connect(url)?)
//!     .bootstrap(EmptyWallets)
//!     .codec(registry)
//!     .build()?;
//! ```

use crate::partition::PartitionHandle;
use crate::router::LedgerEngine;
use crate::routing::{strategy_for, RoutingStrategy};
use atomledger_core::command::CodecRegistry;
use atomledger_core::config::EngineConfig;
use atomledger_core::error::{EngineError, Result};
use atomledger_core::traits::{Bootstrap, Persister, Processor};
use std::sync::Arc;
use tracing::error;

/// Collects collaborators, validates, starts the engine
pub struct EngineBuilder<P: Processor> {
    cfg: EngineConfig,
    processor: Option<Arc<P>>,
    persister: Option<Arc<dyn Persister<Entity = P::Entity>>>,
    bootstrap: Option<Arc<dyn Bootstrap<State = P::State>>>,
    registry: Option<CodecRegistry<P::Command>>,
    strategy: Option<Arc<dyn RoutingStrategy>>,
}

impl<P: Processor> EngineBuilder<P> {
    /// Start building an engine with this configuration
    pub fn new(cfg: EngineConfig) -> Self {
        EngineBuilder {
            cfg,
            processor: None,
            persister: None,
            bootstrap: None,
            registry: None,
            strategy: None,
        }
    }

    /// The command processor (required)
    pub fn processor(mut self, processor: P) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    /// The persistence sink (required)
    pub fn persister(mut self, persister: impl Persister<Entity = P::Entity>) -> Self {
        self.persister = Some(Arc::new(persister));
        self
    }

    /// The cold-start state factory (required)
    pub fn bootstrap(mut self, bootstrap: impl Bootstrap<State = P::State>) -> Self {
        self.bootstrap = Some(Arc::new(bootstrap));
        self
    }

    /// The WAL decoder registry (required, must not be empty)
    pub fn codec(mut self, registry: CodecRegistry<P::Command>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the configured routing strategy
    pub fn routing_strategy(mut self, strategy: impl RoutingStrategy) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    /// Validate, recover every partition, and return the running engine
    pub fn build(self) -> Result<LedgerEngine<P>> {
        self.cfg.validate()?;

        let processor = self
            .processor
            .ok_or_else(|| EngineError::init("processor is required"))?;
        let persister = self
            .persister
            .ok_or_else(|| EngineError::init("persister is required"))?;
        let bootstrap = self
            .bootstrap
            .ok_or_else(|| EngineError::init("bootstrap is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| EngineError::init("codec registry is required"))?;
        if registry.is_empty() {
            return Err(EngineError::init(
                "codec registry has no decoders; recovery would be impossible",
            ));
        }

        let strategy = self
            .strategy
            .unwrap_or_else(|| strategy_for(self.cfg.routing));

        std::fs::create_dir_all(self.cfg.engine_dir())?;

        let mut partitions = Vec::with_capacity(self.cfg.partitions);
        for index in 0..self.cfg.partitions {
            match PartitionHandle::start(
                index,
                &self.cfg,
                Arc::clone(&processor),
                Arc::clone(&persister),
                bootstrap.as_ref(),
                &registry,
            ) {
                Ok(partition) => partitions.push(partition),
                Err(e) => {
                    error!(partition = index, error = %e, "partition start failed");
                    for mut started in partitions {
                        let _ = started.shutdown();
                    }
                    return Err(e);
                }
            }
        }

        Ok(LedgerEngine::new(self.cfg, strategy, partitions))
    }
}
