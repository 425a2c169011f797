//! Initialization and teardown hooks.
//!
//! A [`Harness`] only exists fully initialized: if the sanitizer mode cannot
//! be set up, or the catalog cannot be built, `init` returns an error and no
//! commands can be issued. Dropping the harness performs teardown if the
//! host did not call it explicitly.

use std::sync::Arc;
use tracing::info;

use crate::simulators::register_builtin_cases;
use crate::{AccountingHeap, BugSummary, Catalog, CatalogBuilder, Dispatcher, HarnessConfig};
use crate::{HarnessError, HeapStats, ModeController, ModeState, Outcome, SanitizerRuntime};

pub struct Harness {
    config: HarnessConfig,
    controller: ModeController,
    dispatcher: Dispatcher,
    heap: Arc<AccountingHeap>,
    torn_down: bool,
}

impl Harness {
    pub fn init(
        config: HarnessConfig,
        runtime: Arc<dyn SanitizerRuntime>,
        heap: AccountingHeap,
    ) -> Result<Self, HarnessError> {
        Self::init_with(config, runtime, heap, register_builtin_cases)
    }

    /// Like [`Harness::init`], with the catalog filled by `register`.
    pub fn init_with<F>(
        config: HarnessConfig,
        runtime: Arc<dyn SanitizerRuntime>,
        heap: AccountingHeap,
        register: F,
    ) -> Result<Self, HarnessError>
    where
        F: FnOnce(&mut CatalogBuilder) -> Result<(), HarnessError>,
    {
        config.validate()?;
        info!(
            multi_shot = config.multi_shot,
            sanitizer_mode = ?runtime.current_mode(),
            "initializing harness"
        );

        let mut controller = ModeController::init(runtime, config.multi_shot)?;

        let catalog = match Catalog::from_registration(register) {
            Ok(catalog) => catalog,
            Err(err) => {
                controller.restore();
                return Err(err);
            }
        };
        info!(testcases = catalog.len(), "catalog ready");

        let heap = Arc::new(heap);
        let dispatcher = Dispatcher::new(catalog, Arc::clone(&heap), config.release_leaks);

        Ok(Self {
            config,
            controller,
            dispatcher,
            heap,
            torn_down: false,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The `list` command.
    pub fn list(&self) -> Vec<BugSummary> {
        self.dispatcher.enumerate()
    }

    /// The `run <id>` command: invokes the testcase `config.repeat` times.
    pub fn run(&self, id: &str) -> Result<Vec<Outcome>, HarnessError> {
        self.dispatcher.invoke_repeated(id, self.config.repeat)
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub fn mode_state(&self) -> ModeState {
        self.controller.state()
    }

    /// Restores the sanitizer mode. Consumes the harness, so no command can
    /// follow.
    pub fn teardown(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.controller.restore();
        info!(heap = ?self.heap.stats(), "harness removed");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown();
    }
}
