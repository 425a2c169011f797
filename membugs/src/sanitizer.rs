//! Sanitizer reporting mode across the harness lifetime.
//!
//! By default a sanitizer stops reporting (or stops the process) after the
//! first error. Multi-shot mode keeps it reporting, which is what you want
//! when running several testcases in one session. The [`ModeController`]
//! switches multi-shot on once at initialization and puts the previous mode
//! back at teardown.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::HarnessError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportMode {
    SingleShot,
    MultiShot,
}

/// The instrumentation runtime the harness runs under.
pub trait SanitizerRuntime: Send + Sync {
    fn supports_multi_shot(&self) -> bool;

    /// Switches to multi-shot reporting and returns the mode that was active.
    fn save_enable_multi_shot(&self) -> ReportMode;

    fn restore_multi_shot(&self, prior: ReportMode);

    fn current_mode(&self) -> ReportMode;
}

/// `halt_on_error=0` in `ASAN_OPTIONS` means the runtime was started in
/// recover mode.
fn mode_from_asan_options(options: &str) -> ReportMode {
    let recovering = options
        .split(|c: char| c == ':' || c == ',' || c.is_whitespace())
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, value)| key == "halt_on_error" && matches!(value, "0" | "false"));
    if recovering {
        ReportMode::MultiShot
    } else {
        ReportMode::SingleShot
    }
}

// Mode the runtime was started with.
static STARTUP_MODE: Lazy<ReportMode> = Lazy::new(|| {
    let options = std::env::var("ASAN_OPTIONS").unwrap_or_default();
    mode_from_asan_options(&options)
});

// Process-wide reporting mode register, seeded from the startup mode.
static HOST_MULTI_SHOT: Lazy<AtomicBool> =
    Lazy::new(|| AtomicBool::new(*STARTUP_MODE == ReportMode::MultiShot));

/// True when the register says multi-shot but the runtime itself will still
/// halt at the first report, because it was not started in recover mode.
fn halts_despite_multi_shot(startup: ReportMode) -> bool {
    cfg!(feature = "sanitizer") && startup == ReportMode::SingleShot
}

/// The sanitizer linked into this process.
///
/// Multi-shot support requires the `sanitizer` feature, which is meant to be
/// enabled together with `-Zsanitizer=address -Zsanitizer-recover=address`.
/// The runtime's own `halt_on_error` is fixed at startup; only the register
/// changes here.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSanitizer;

impl SanitizerRuntime for HostSanitizer {
    fn supports_multi_shot(&self) -> bool {
        cfg!(feature = "sanitizer")
    }

    fn save_enable_multi_shot(&self) -> ReportMode {
        if halts_despite_multi_shot(*STARTUP_MODE) {
            warn!("ASAN_OPTIONS lacks halt_on_error=0; the first report will still stop the process");
        }
        if HOST_MULTI_SHOT.swap(true, Ordering::SeqCst) {
            ReportMode::MultiShot
        } else {
            ReportMode::SingleShot
        }
    }

    fn restore_multi_shot(&self, prior: ReportMode) {
        HOST_MULTI_SHOT.store(prior == ReportMode::MultiShot, Ordering::SeqCst);
    }

    fn current_mode(&self) -> ReportMode {
        if HOST_MULTI_SHOT.load(Ordering::SeqCst) {
            ReportMode::MultiShot
        } else {
            ReportMode::SingleShot
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ModeState {
    Disabled,
    MultiShotEnabled { prior: ReportMode },
}

pub struct ModeController {
    runtime: Arc<dyn SanitizerRuntime>,
    multi_shot_requested: bool,
    state: ModeState,
}

impl ModeController {
    /// Performs the only transition this controller ever makes, and only if
    /// multi-shot was requested.
    pub fn init(
        runtime: Arc<dyn SanitizerRuntime>,
        multi_shot_requested: bool,
    ) -> Result<Self, HarnessError> {
        let mut controller = Self {
            runtime,
            multi_shot_requested,
            state: ModeState::Disabled,
        };

        if multi_shot_requested {
            if !controller.runtime.supports_multi_shot() {
                warn!("multi-shot reporting requested on a build without sanitizer support");
                return Err(HarnessError::Configuration(
                    "multi-shot reporting needs a sanitizer-enabled build".to_string(),
                ));
            }
            let prior = controller.runtime.save_enable_multi_shot();
            info!(?prior, "multi-shot reporting enabled");
            controller.state = ModeState::MultiShotEnabled { prior };
        }

        Ok(controller)
    }

    pub fn state(&self) -> ModeState {
        self.state
    }

    pub fn multi_shot_requested(&self) -> bool {
        self.multi_shot_requested
    }

    /// Puts the captured mode back. A no-op if multi-shot was never enabled
    /// or has already been restored.
    pub fn restore(&mut self) {
        if let ModeState::MultiShotEnabled { prior } = self.state {
            self.runtime.restore_multi_shot(prior);
            info!(?prior, "sanitizer reporting mode restored");
            self.state = ModeState::Disabled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct Recorder {
        supported: bool,
        mode: Mutex<ReportMode>,
        enables: AtomicUsize,
        restores: AtomicUsize,
    }

    impl Recorder {
        fn new(supported: bool, mode: ReportMode) -> Arc<Self> {
            Arc::new(Self {
                supported,
                mode: Mutex::new(mode),
                enables: AtomicUsize::new(0),
                restores: AtomicUsize::new(0),
            })
        }
    }

    impl SanitizerRuntime for Recorder {
        fn supports_multi_shot(&self) -> bool {
            self.supported
        }

        fn save_enable_multi_shot(&self) -> ReportMode {
            self.enables.fetch_add(1, Ordering::SeqCst);
            std::mem::replace(&mut *self.mode.lock().unwrap(), ReportMode::MultiShot)
        }

        fn restore_multi_shot(&self, prior: ReportMode) {
            self.restores.fetch_add(1, Ordering::SeqCst);
            *self.mode.lock().unwrap() = prior;
        }

        fn current_mode(&self) -> ReportMode {
            *self.mode.lock().unwrap()
        }
    }

    #[test]
    fn not_requested_means_no_transition() {
        let recorder = Recorder::new(true, ReportMode::SingleShot);
        let mut controller = ModeController::init(recorder.clone(), false).unwrap();
        assert_eq!(controller.state(), ModeState::Disabled);
        controller.restore();
        assert_eq!(recorder.enables.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.restores.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn enable_captures_and_restore_returns_prior_mode() {
        let recorder = Recorder::new(true, ReportMode::SingleShot);
        let mut controller = ModeController::init(recorder.clone(), true).unwrap();
        assert_eq!(
            controller.state(),
            ModeState::MultiShotEnabled {
                prior: ReportMode::SingleShot
            }
        );
        assert_eq!(recorder.current_mode(), ReportMode::MultiShot);

        controller.restore();
        controller.restore();
        assert_eq!(recorder.current_mode(), ReportMode::SingleShot);
        assert_eq!(recorder.enables.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.restores.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsupported_build_is_a_configuration_error() {
        let recorder = Recorder::new(false, ReportMode::SingleShot);
        let err = ModeController::init(recorder.clone(), true)
            .err()
            .expect("init must fail");
        assert!(matches!(err, HarnessError::Configuration(_)));
        assert_eq!(recorder.enables.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn asan_options_parsing() {
        assert_eq!(mode_from_asan_options(""), ReportMode::SingleShot);
        assert_eq!(
            mode_from_asan_options("detect_leaks=1:halt_on_error=0"),
            ReportMode::MultiShot
        );
        assert_eq!(
            mode_from_asan_options("halt_on_error=1"),
            ReportMode::SingleShot
        );
    }

    #[test]
    fn halt_warning_only_applies_to_sanitizer_builds_without_recover() {
        assert_eq!(
            halts_despite_multi_shot(ReportMode::SingleShot),
            cfg!(feature = "sanitizer")
        );
        assert!(!halts_despite_multi_shot(ReportMode::MultiShot));
    }

    #[test]
    fn host_sanitizer_support_follows_the_feature() {
        assert_eq!(HostSanitizer.supports_multi_shot(), cfg!(feature = "sanitizer"));
    }
}
