//! Sequential benchmark queue: selection, resume, persistence and catalog sync.

use ramp_core::model::resolve_installed_tag;
use ramp_core::{
    BenchmarkRecord, ModelKind, ModelSpec, RampController, RampResult, ResultStore,
    StalenessPolicy,
};
use ramp_store::ModelCatalog;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Name or tag filters; empty selects every catalog model.
    pub models: Vec<String>,
    pub kind: Option<ModelKind>,
    /// Skip models whose stored record is still fresh.
    pub skip_tested: bool,
    pub update_catalog: bool,
}

/// What happened to each model of the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutcome {
    Recorded(Box<BenchmarkRecord>),
    SkippedFresh,
    NotInstalled,
    /// Engine down: nothing recorded, retried on the next invocation.
    Unreachable(String),
    Failed(String),
}

#[derive(Debug, Default)]
pub struct QueueReport {
    pub outcomes: Vec<(String, ModelOutcome)>,
}

impl QueueReport {
    pub fn recorded(&self) -> usize {
        self.count(|o| matches!(o, ModelOutcome::Recorded(_)))
    }

    pub fn count(&self, pred: impl Fn(&ModelOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// One controller per engine kind; both are driven from the same queue.
pub struct Controllers {
    pub local: RampController,
    pub remote: RampController,
}

impl Controllers {
    fn for_kind(&mut self, kind: ModelKind) -> &mut RampController {
        match kind {
            ModelKind::Local => &mut self.local,
            ModelKind::Remote => &mut self.remote,
        }
    }
}

fn matches_filter(spec: &ModelSpec, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let name = spec.identity.name.to_lowercase();
    let tag = spec.identity.tag.to_lowercase();
    filters.iter().any(|f| {
        let f = f.trim().to_lowercase();
        !f.is_empty() && (tag == f || name.contains(&f))
    })
}

pub fn select_models(specs: &[ModelSpec], opts: &RunOptions) -> Vec<ModelSpec> {
    for filter in &opts.models {
        if !specs.iter().any(|s| matches_filter(s, std::slice::from_ref(filter))) {
            tracing::warn!(filter = %filter, "no catalog model matches");
        }
    }
    specs
        .iter()
        .filter(|s| opts.kind.is_none_or(|k| s.kind == k))
        .filter(|s| matches_filter(s, &opts.models))
        .cloned()
        .collect()
}

/// Persistence gets one retry before the model is given up.
fn save_with_retry(store: &dyn ResultStore, record: &BenchmarkRecord) -> RampResult<()> {
    match store.save(&record.model, record) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!(model = %record.model, error = %e, "save failed, retrying once");
            store.save(&record.model, record)
        }
    }
}

fn sync_catalog(catalog: &mut ModelCatalog, record: &BenchmarkRecord) {
    if catalog.merge_record(record) {
        if let Err(e) = catalog.save() {
            tracing::error!(model = %record.model, error = %e, "catalog update failed");
        }
    }
}

pub fn summary_line(record: &BenchmarkRecord) -> String {
    let ceiling = record
        .max_validated_context
        .map_or("none".to_string(), |c| format!("{}K", c / 1024));
    let mut line = format!(
        "{}: max ctx {ceiling}, {:.1} tok/s, ux {}, efficiency {}, halted: {}",
        record.model,
        record.avg_tokens_per_second,
        record.ux_rating,
        record.efficiency_grade,
        record.halt_reason
    );
    if let Some(reason) = &record.failure_reason {
        line.push_str(&format!(" ({reason})"));
    }
    line
}

pub fn run_queue(
    controllers: &mut Controllers,
    store: &dyn ResultStore,
    mut catalog: Option<&mut ModelCatalog>,
    queue: &[ModelSpec],
    opts: &RunOptions,
    policy: &StalenessPolicy,
) -> QueueReport {
    let mut report = QueueReport::default();

    // One listing for the whole queue; a down engine marks every local model.
    let needs_local = queue.iter().any(|s| s.kind == ModelKind::Local);
    let installed = if needs_local {
        match controllers.local.engine().list_models() {
            Ok(models) => Ok(models),
            Err(e) => {
                tracing::error!(error = %e, "local engine unavailable");
                Err(e)
            }
        }
    } else {
        Ok(Vec::new())
    };

    let total = queue.len();
    for (i, spec) in queue.iter().enumerate() {
        let name = spec.identity.name.clone();
        tracing::info!("[{}/{total}] {name}", i + 1);

        if opts.skip_tested {
            match store.load(&name) {
                Ok(Some(existing)) if !policy.is_stale(&existing, chrono::Utc::now()) => {
                    tracing::info!(model = %name, "fresh record found, skipping");
                    report.outcomes.push((name, ModelOutcome::SkippedFresh));
                    continue;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(model = %name, error = %e, "cannot read stored record"),
            }
        }

        let mut spec = spec.clone();
        if spec.kind == ModelKind::Local {
            match &installed {
                Err(e) => {
                    report.outcomes.push((name, ModelOutcome::Unreachable(e.to_string())));
                    continue;
                }
                Ok(models) => match resolve_installed_tag(&spec.identity.tag, models) {
                    Some(found) => {
                        spec.identity.tag = found.tag.clone();
                        spec.size_bytes = Some(found.size_bytes);
                    }
                    None => {
                        tracing::warn!(model = %name, tag = %spec.identity.tag, "not installed, skipping");
                        report.outcomes.push((name, ModelOutcome::NotInstalled));
                        continue;
                    }
                },
            }
        }

        let outcome = match controllers.for_kind(spec.kind).run_model(&spec) {
            Ok(record) => match save_with_retry(store, &record) {
                Ok(()) => {
                    tracing::info!("{}", summary_line(&record));
                    if opts.update_catalog {
                        if let Some(cat) = catalog.as_deref_mut() {
                            sync_catalog(cat, &record);
                        }
                    }
                    ModelOutcome::Recorded(Box::new(record))
                }
                Err(e) => {
                    tracing::error!(model = %name, error = %e, "record could not be saved");
                    ModelOutcome::Failed(e.to_string())
                }
            },
            Err(e) if e.is_connectivity() => {
                tracing::error!(model = %name, error = %e, "engine unreachable, model skipped");
                ModelOutcome::Unreachable(e.to_string())
            }
            Err(e) => {
                tracing::error!(model = %name, error = %e, "benchmark failed");
                ModelOutcome::Failed(e.to_string())
            }
        };
        report.outcomes.push((name, outcome));
    }

    for controller in [&mut controllers.local, &mut controllers.remote] {
        if let Err(e) = controller.release() {
            tracing::warn!(error = %e, "final unload failed");
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use ramp_core::{
        EngineError, EngineResult, Generation, GenerationRequest, InferenceEngine, InstalledModel,
        MemoryProbe, ModelIdentity, NullMeter, ProbeSettings, RampSettings, ResourceSample,
    };
    use ramp_store::SqliteStore;

    struct CountingEngine {
        calls: Arc<AtomicUsize>,
        down_tags: Vec<String>,
    }

    impl InferenceEngine for CountingEngine {
        fn list_models(&self) -> EngineResult<Vec<InstalledModel>> {
            Ok(["alpha:1b", "beta:1b", "gamma:1b"]
                .iter()
                .map(|t| InstalledModel {
                    tag: t.to_string(),
                    size_bytes: 1 << 30,
                })
                .collect())
        }

        fn generate(&self, request: &GenerationRequest) -> EngineResult<Generation> {
            if self.down_tags.contains(&request.model.tag) {
                return Err(EngineError::Unreachable("connection refused".into()));
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Generation {
                text: "A short story.".into(),
                input_tokens: 20,
                output_tokens: 100,
                time_to_first_token: Some(Duration::from_millis(150)),
                total_duration: Duration::from_secs(1),
                done_reason: Some("stop".into()),
                ..Default::default()
            })
        }

        fn unload(&self, _model: &ModelIdentity) -> EngineResult<()> {
            Ok(())
        }

        fn license_text(&self, _model: &ModelIdentity) -> EngineResult<Option<String>> {
            Ok(Some("MIT License".into()))
        }
    }

    /// Flat memory: no tier ever looks like swap.
    struct FlatProbe;

    impl MemoryProbe for FlatProbe {
        fn sample(&mut self) -> ResourceSample {
            ResourceSample {
                process_rss_bytes: 2 << 30,
                available_bytes: 64 << 30,
                ..Default::default()
            }
        }

        fn available_bytes(&mut self) -> u64 {
            64 << 30
        }
    }

    fn controllers(calls: &Arc<AtomicUsize>, down: &[&str]) -> Controllers {
        with_battery(calls, down, true)
    }

    fn with_battery(calls: &Arc<AtomicUsize>, down: &[&str], functional: bool) -> Controllers {
        let settings = RampSettings {
            ladder: vec![2048, 4096],
            functional,
            needle: false,
            sample_interval: Duration::from_millis(5),
            unload_settle: Duration::ZERO,
            probes: ProbeSettings {
                repeats: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let make = |settings: RampSettings| {
            RampController::new(
                Box::new(CountingEngine {
                    calls: calls.clone(),
                    down_tags: down.iter().map(|t| t.to_string()).collect(),
                }),
                Box::new(FlatProbe),
                Box::new(NullMeter),
                settings,
            )
        };
        Controllers {
            local: make(settings.clone()),
            remote: make(settings),
        }
    }

    fn specs() -> Vec<ModelSpec> {
        vec![
            ModelSpec::local("Alpha", "alpha:1b", 4096),
            ModelSpec::local("Beta", "beta:1b", 4096),
            ModelSpec::local("Gamma", "gamma:1b", 4096),
            ModelSpec::local("Missing", "missing:7b", 4096),
        ]
    }

    #[test]
    fn test_select_models() {
        let mut all = specs();
        all[1].kind = ModelKind::Remote;

        let picked = select_models(&all, &RunOptions::default());
        assert_eq!(picked.len(), 4);

        let opts = RunOptions {
            models: vec!["alp".into(), "gamma:1b".into()],
            ..Default::default()
        };
        let names: Vec<String> = select_models(&all, &opts)
            .into_iter()
            .map(|s| s.identity.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Gamma"]);

        let opts = RunOptions {
            kind: Some(ModelKind::Remote),
            ..Default::default()
        };
        assert_eq!(select_models(&all, &opts)[0].identity.name, "Beta");
    }

    #[test]
    fn test_unreachable_model_does_not_abort_queue() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctl = controllers(&calls, &["beta:1b"]);
        let store = SqliteStore::in_memory().unwrap();

        let report = run_queue(
            &mut ctl,
            &store,
            None,
            &specs(),
            &RunOptions::default(),
            &StalenessPolicy::default(),
        );

        assert_eq!(report.outcomes.len(), 4);
        assert!(matches!(report.outcomes[1].1, ModelOutcome::Unreachable(_)));
        assert_eq!(report.outcomes[3].1, ModelOutcome::NotInstalled);
        assert_eq!(report.recorded(), 2);
        assert!(store.load("Beta").unwrap().is_none());
        assert_eq!(store.load("Gamma").unwrap().unwrap().max_validated_context, Some(4096));
    }

    #[test]
    fn test_resume_skips_fresh_records_without_touching_them() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = SqliteStore::in_memory().unwrap();
        let queue = &specs()[..2];
        let opts = RunOptions {
            skip_tested: true,
            ..Default::default()
        };

        let mut ctl = controllers(&calls, &[]);
        let first = run_queue(&mut ctl, &store, None, queue, &opts, &StalenessPolicy::default());
        assert_eq!(first.recorded(), 2);
        let calls_after_first = calls.load(Ordering::SeqCst);
        assert!(calls_after_first > 0);
        let before = store.raw_record("Alpha").unwrap().unwrap();

        let mut ctl = controllers(&calls, &[]);
        let second = run_queue(&mut ctl, &store, None, queue, &opts, &StalenessPolicy::default());
        assert_eq!(second.count(|o| *o == ModelOutcome::SkippedFresh), 2);
        assert_eq!(calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(store.raw_record("Alpha").unwrap().unwrap(), before);
    }

    #[test]
    fn test_resume_reruns_record_without_functional_scores() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = SqliteStore::in_memory().unwrap();
        let queue = &specs()[..1];
        let opts = RunOptions {
            skip_tested: true,
            ..Default::default()
        };

        let mut ctl = with_battery(&calls, &[], false);
        run_queue(&mut ctl, &store, None, queue, &opts, &StalenessPolicy::default());
        let partial = store.load("Alpha").unwrap().unwrap();
        assert!(partial.functional.is_none());
        assert!(!partial.complete);

        let mut ctl = with_battery(&calls, &[], true);
        let second = run_queue(&mut ctl, &store, None, queue, &opts, &StalenessPolicy::default());
        assert_eq!(second.recorded(), 1);
        let full = store.load("Alpha").unwrap().unwrap();
        assert!(full.functional.is_some());
        assert!(full.complete);

        let mut ctl = with_battery(&calls, &[], true);
        let third = run_queue(&mut ctl, &store, None, queue, &opts, &StalenessPolicy::default());
        assert_eq!(third.outcomes[0].1, ModelOutcome::SkippedFresh);
    }

    #[test]
    fn test_catalog_is_updated_after_each_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(
            &path,
            r#"{ "Alpha": { "ollama_tag": "alpha:1b", "ctx": 4096, "notes": "keep" } }"#,
        )
        .unwrap();
        let mut catalog = ModelCatalog::load(&path).unwrap();
        let queue = catalog.specs();

        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctl = controllers(&calls, &[]);
        let store = SqliteStore::in_memory().unwrap();
        let opts = RunOptions {
            update_catalog: true,
            ..Default::default()
        };
        run_queue(&mut ctl, &store, Some(&mut catalog), &queue, &opts, &StalenessPolicy::default());

        let reloaded = ModelCatalog::load(&path).unwrap();
        let entry = reloaded.entry("Alpha").unwrap();
        assert_eq!(entry["notes"], "keep");
        assert_eq!(entry["benchmark_stats"]["max_validated_ctx"], 4096);
        // 1 GiB from the installed-model listing.
        assert_eq!(entry["size_gb"], 1.07);
        assert!(dir.path().join("models.json.bak").exists());
    }

    #[test]
    fn test_summary_line() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctl = controllers(&calls, &[]);
        let record = ctl.local.run_model(&specs()[0]).unwrap();
        let line = summary_line(&record);
        assert!(line.starts_with("Alpha: max ctx 4K"));
        assert!(line.contains("ux instant"));
    }
}
