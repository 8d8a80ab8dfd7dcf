//! Purpose: Run the five verification stages in order and record the outcome.
//! Exports: `SmokeConfig`, `RunReport`, `StageRecord`, `run_smoke`, `PINNED_BUILD`.
//! Role: Orchestration only; foreign calls stay behind `RuntimeBackend`.
//! Invariants: Stages run strictly forward; the first failure ends the run.
//! Invariants: The log sink is installed before backends load or the runtime initializes.

use serde::Serialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::params;
use crate::core::runtime::{LoadProbe, RuntimeBackend};
use crate::core::symbols;

/// Library build whose ABI this harness is pinned against.
pub const PINNED_BUILD: &str = "b5028";

pub const DEFAULT_MODEL_PATH: &str = "test_model.gguf";

#[derive(Clone, Debug)]
pub struct SmokeConfig {
    pub runtime_ref: String,
    pub backend_ref: String,
    pub model_path: String,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            runtime_ref: symbols::RUNTIME_MODULE.to_string(),
            backend_ref: symbols::BACKEND_MODULE.to_string(),
            model_path: DEFAULT_MODEL_PATH.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StageRecord {
    pub stage: &'static str,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub pinned_build: &'static str,
    pub runtime_module: String,
    pub backend_module: String,
    pub model_path: String,
    pub stages: Vec<StageRecord>,
    pub outcome: String,
}

impl RunReport {
    fn new(config: &SmokeConfig) -> Self {
        Self {
            pinned_build: PINNED_BUILD,
            runtime_module: config.runtime_ref.clone(),
            backend_module: config.backend_ref.clone(),
            model_path: config.model_path.clone(),
            stages: Vec::new(),
            outcome: String::new(),
        }
    }

    fn record(&mut self, stage: &'static str, detail: impl Into<String>) {
        self.stages.push(StageRecord {
            stage,
            detail: detail.into(),
        });
    }
}

fn marker(markers: bool, line: &str) {
    if markers {
        println!("{line}");
    }
}

/// Runs resolve, bind, init, configure, and the guarded load against
/// `backend`, in that order. Human stage markers go to stdout when `markers`
/// is set; the report describes the run for machine consumers.
pub fn run_smoke<B: RuntimeBackend>(
    backend: &B,
    config: &SmokeConfig,
    markers: bool,
) -> Result<RunReport, Error> {
    let mut report = RunReport::new(config);

    marker(
        markers,
        &format!("=== llama.cpp {PINNED_BUILD} ABI smoke test ==="),
    );

    let modules = backend.open_modules(&config.runtime_ref, &config.backend_ref)?;
    report.record(
        "resolve",
        format!(
            "opened '{}' and '{}'",
            config.runtime_ref, config.backend_ref
        ),
    );
    marker(markers, "modules opened");

    let entries = backend.bind_entries(&modules)?;
    report.record("bind", "all five entry points resolved");
    marker(markers, "entry points bound");

    // Sink first, so everything after it can log through us.
    backend.install_log_sink(&entries);
    report.record("log-sink", "diagnostic sink registered");

    marker(markers, ">> ggml_backend_load_all()");
    backend.load_all_backends(&entries);
    report.record("backends", "backend plugins loaded");
    marker(markers, "ggml backends loaded");

    marker(markers, ">> llama_backend_init()");
    backend.init_runtime(&entries);
    report.record("init", "runtime state initialized");
    marker(markers, "llama backend ready");

    let mut load_params = backend.default_params(&entries);
    params::apply_override_policy(&mut load_params);
    report.record(
        "configure",
        format!(
            "defaults fetched, override policy applied (n_gpu_layers={})",
            load_params.n_gpu_layers
        ),
    );

    marker(markers, &format!(">> loading model: {}", config.model_path));
    tracing::debug!("load-testing model artifact '{}'", config.model_path);
    let probe = backend.load_model(&entries, &config.model_path, load_params)?;
    match probe {
        LoadProbe::Loaded(_handle) => {
            report.record("load", format!("model loaded from '{}'", config.model_path));
            report.outcome = "ok".to_string();
            marker(markers, "model loaded");
            marker(markers, &format!("pinned build {PINNED_BUILD}"));
            Ok(report)
        }
        LoadProbe::Null => Err(Error::new(ErrorKind::EmptyLoad).with_message(format!(
            "model load returned an empty result for '{}'",
            config.model_path
        ))),
        LoadProbe::Fault(fault) => Err(Error::new(ErrorKind::LoadFault)
            .with_message(format!("access violation during model load: {fault}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::to_exit_code;
    use crate::core::fault::FaultReport;
    use crate::core::params::LlamaModelParams;
    use crate::core::runtime::ModelHandle;
    use std::cell::RefCell;

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    enum Step {
        Open,
        Bind,
        Sink,
        Backends,
        Init,
        Defaults,
        Load,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    enum LoadScript {
        Succeed,
        ReturnNull,
        Fault(i32),
        Diverge,
    }

    struct ScriptedBackend {
        fail_open: bool,
        missing_symbol: Option<&'static str>,
        load: LoadScript,
        steps: RefCell<Vec<Step>>,
        seen_params: RefCell<Option<LlamaModelParams>>,
        seen_model_path: RefCell<Option<String>>,
    }

    impl ScriptedBackend {
        fn happy() -> Self {
            Self {
                fail_open: false,
                missing_symbol: None,
                load: LoadScript::Succeed,
                steps: RefCell::new(Vec::new()),
                seen_params: RefCell::new(None),
                seen_model_path: RefCell::new(None),
            }
        }
    }

    impl RuntimeBackend for ScriptedBackend {
        type Modules = ();
        type Entries = ();

        fn open_modules(&self, runtime_ref: &str, _backend_ref: &str) -> Result<(), Error> {
            self.steps.borrow_mut().push(Step::Open);
            if self.fail_open {
                return Err(Error::new(ErrorKind::ModuleOpen)
                    .with_message("scripted open failure")
                    .with_module(runtime_ref));
            }
            Ok(())
        }

        fn bind_entries(&self, _modules: &()) -> Result<(), Error> {
            self.steps.borrow_mut().push(Step::Bind);
            if let Some(symbol) = self.missing_symbol {
                return Err(Error::new(ErrorKind::SymbolMissing)
                    .with_message("scripted missing entry point")
                    .with_symbol(symbol));
            }
            Ok(())
        }

        fn install_log_sink(&self, _entries: &()) {
            self.steps.borrow_mut().push(Step::Sink);
        }

        fn load_all_backends(&self, _entries: &()) {
            self.steps.borrow_mut().push(Step::Backends);
        }

        fn init_runtime(&self, _entries: &()) {
            self.steps.borrow_mut().push(Step::Init);
        }

        fn default_params(&self, _entries: &()) -> LlamaModelParams {
            self.steps.borrow_mut().push(Step::Defaults);
            crate::core::params::test_params()
        }

        fn load_model(
            &self,
            _entries: &(),
            model_path: &str,
            params: LlamaModelParams,
        ) -> Result<LoadProbe, Error> {
            self.steps.borrow_mut().push(Step::Load);
            *self.seen_params.borrow_mut() = Some(params);
            *self.seen_model_path.borrow_mut() = Some(model_path.to_string());
            Ok(match self.load {
                LoadScript::Succeed => LoadProbe::Loaded(ModelHandle::dangling_for_tests()),
                LoadScript::ReturnNull => LoadProbe::Null,
                LoadScript::Fault(signal) => LoadProbe::Fault(FaultReport { signal }),
                LoadScript::Diverge => panic!("fault class outside the guarded set"),
            })
        }
    }

    fn run(backend: &ScriptedBackend) -> Result<RunReport, Error> {
        run_smoke(backend, &SmokeConfig::default(), false)
    }

    #[test]
    fn default_config_matches_the_pinned_sequence() {
        let config = SmokeConfig::default();
        assert_eq!(config.runtime_ref, "llama");
        assert_eq!(config.backend_ref, "ggml");
        assert_eq!(config.model_path, "test_model.gguf");
    }

    #[test]
    fn happy_path_runs_stages_in_order() {
        let backend = ScriptedBackend::happy();
        let report = run(&backend).expect("smoke run");

        let steps = backend.steps.borrow();
        assert_eq!(
            steps.as_slice(),
            [
                Step::Open,
                Step::Bind,
                Step::Sink,
                Step::Backends,
                Step::Init,
                Step::Defaults,
                Step::Load,
            ]
        );
        assert_eq!(report.outcome, "ok");
        assert_eq!(report.pinned_build, "b5028");
        assert_eq!(report.stages.len(), 7);
    }

    #[test]
    fn sink_is_installed_before_backends_and_runtime_init() {
        let backend = ScriptedBackend::happy();
        run(&backend).expect("smoke run");

        let steps = backend.steps.borrow();
        let position = |step: Step| steps.iter().position(|s| *s == step).expect("step ran");
        assert!(position(Step::Sink) < position(Step::Backends));
        assert!(position(Step::Backends) < position(Step::Init));
    }

    #[test]
    fn open_failure_stops_before_binding() {
        let backend = ScriptedBackend {
            fail_open: true,
            ..ScriptedBackend::happy()
        };
        let err = run(&backend).expect_err("open fails");

        assert_eq!(err.kind(), ErrorKind::ModuleOpen);
        assert_eq!(to_exit_code(err.kind()), 1);
        assert_eq!(backend.steps.borrow().as_slice(), [Step::Open]);
    }

    #[test]
    fn missing_symbol_stops_before_any_invocation() {
        let backend = ScriptedBackend {
            missing_symbol: Some("llama_model_load_from_file"),
            ..ScriptedBackend::happy()
        };
        let err = run(&backend).expect_err("bind fails");

        assert_eq!(err.kind(), ErrorKind::SymbolMissing);
        assert_eq!(to_exit_code(err.kind()), 2);
        assert_eq!(err.symbol(), Some("llama_model_load_from_file"));
        assert_eq!(backend.steps.borrow().as_slice(), [Step::Open, Step::Bind]);
    }

    #[test]
    fn null_load_maps_to_empty_load() {
        let backend = ScriptedBackend {
            load: LoadScript::ReturnNull,
            ..ScriptedBackend::happy()
        };
        let err = run(&backend).expect_err("null load");

        assert_eq!(err.kind(), ErrorKind::EmptyLoad);
        assert_eq!(to_exit_code(err.kind()), 3);
    }

    #[test]
    fn intercepted_fault_maps_to_load_fault() {
        let backend = ScriptedBackend {
            load: LoadScript::Fault(11),
            ..ScriptedBackend::happy()
        };
        let err = run(&backend).expect_err("faulted load");

        assert_eq!(err.kind(), ErrorKind::LoadFault);
        assert_eq!(to_exit_code(err.kind()), 4);
    }

    #[test]
    fn unrecognized_fault_class_escapes_rather_than_map() {
        let backend = ScriptedBackend {
            load: LoadScript::Diverge,
            ..ScriptedBackend::happy()
        };
        let escaped = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(&backend)));
        assert!(escaped.is_err());
    }

    #[test]
    fn override_policy_reaches_the_load_call() {
        let backend = ScriptedBackend::happy();
        run(&backend).expect("smoke run");

        let seen = (*backend.seen_params.borrow()).expect("params captured");
        assert_eq!(seen.n_gpu_layers, i32::MAX);
        assert!(seen.use_mmap);
        assert!(!seen.use_mlock);
        assert!(!seen.check_tensors);
        assert!(!seen.vocab_only);
    }

    #[test]
    fn configured_model_path_reaches_the_load_call() {
        let backend = ScriptedBackend::happy();
        let config = SmokeConfig {
            model_path: "models/tiny.gguf".to_string(),
            ..SmokeConfig::default()
        };
        run_smoke(&backend, &config, false).expect("smoke run");

        assert_eq!(
            backend.seen_model_path.borrow().as_deref(),
            Some("models/tiny.gguf")
        );
    }
}
