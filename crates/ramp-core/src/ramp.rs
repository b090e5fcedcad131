//! Context ramp controller: drives one model through ascending context tiers
//! until the ladder ends or something stops the escalation.

use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, RunSummary};
use crate::battery::TIER_PROMPT;
use crate::carbon::{local_token_estimate, CarbonCalibration, EnergyGuard, EnergyMeter, EnergyReading};
use crate::engine::{Generation, GenerationRequest, InferenceEngine};
use crate::error::{EngineError, EngineResult, RampResult};
use crate::grades::{classify_license, GradeThresholds, LICENSE_NOT_APPLICABLE, LICENSE_NOT_DETECTED};
use crate::model::{ModelIdentity, ModelKind, ModelSpec};
use crate::monitor::{sample_during, MemoryProbe, SampleTrace, GIB};
use crate::needle::{build_haystack, new_secret_code, recalled, NeedleReport, NEEDLE_OFFSETS};
use crate::probes::{run_battery, ProbeSettings};
use crate::record::{BenchmarkRecord, HaltReason};
use crate::swap::{SwapDetector, DEFAULT_SWAP_RATIO};
use crate::tier::{ladder_for, TierMetrics, TierOutcome, TierResult, DEFAULT_LADDER};

#[derive(Debug, Clone)]
pub struct RampSettings {
    pub ladder: Vec<u32>,
    /// Operator ceiling on top of each model's declared context.
    pub max_context: Option<u32>,
    /// Available memory required before a local tier is attempted.
    pub safety_margin_bytes: u64,
    pub swap_ratio: f64,
    pub sample_interval: Duration,
    /// Upper bound on waiting for an unloaded runner to hand back its memory
    /// before headroom and baseline are read. Zero skips the wait.
    pub unload_settle: Duration,
    pub max_output_tokens: u32,
    pub tier_temperature: f32,
    /// Covers model load and generation of one tier call.
    pub tier_timeout: Duration,
    pub needle: bool,
    pub needle_min_context: u32,
    pub functional: bool,
    pub probes: ProbeSettings,
    pub grades: GradeThresholds,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            ladder: DEFAULT_LADDER.to_vec(),
            max_context: None,
            safety_margin_bytes: 2 * (1 << 30),
            swap_ratio: DEFAULT_SWAP_RATIO,
            sample_interval: Duration::from_millis(250),
            unload_settle: Duration::from_secs(2),
            max_output_tokens: 512,
            tier_temperature: 0.7,
            tier_timeout: Duration::from_secs(300),
            needle: true,
            needle_min_context: 4096,
            functional: true,
            probes: ProbeSettings::default(),
            grades: GradeThresholds::default(),
        }
    }
}

/// Spacing of process RSS polls while waiting for memory to settle.
const SETTLE_POLL: Duration = Duration::from_millis(200);

pub struct RampController {
    engine: Box<dyn InferenceEngine>,
    probe: Box<dyn MemoryProbe>,
    meter: Box<dyn EnergyMeter>,
    calibration: CarbonCalibration,
    settings: RampSettings,
    /// Model currently resident in the engine, as far as we know.
    loaded: Option<ModelIdentity>,
}

/// What a single tier call produced before classification.
struct TierCall {
    result: EngineResult<Generation>,
    trace: Option<SampleTrace>,
    energy: Option<EnergyReading>,
}

impl RampController {
    pub fn new(
        engine: Box<dyn InferenceEngine>,
        probe: Box<dyn MemoryProbe>,
        meter: Box<dyn EnergyMeter>,
        settings: RampSettings,
    ) -> Self {
        Self {
            engine,
            probe,
            meter,
            calibration: CarbonCalibration::published(),
            settings,
            loaded: None,
        }
    }

    pub fn settings(&self) -> &RampSettings {
        &self.settings
    }

    pub fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }

    pub fn loaded(&self) -> Option<&ModelIdentity> {
        self.loaded.as_ref()
    }

    // -----------------------------------------------------------------------
    // Engine residency
    // -----------------------------------------------------------------------

    /// Unload a model. Only unreachability is an error; a failed unload is
    /// logged and the run goes on.
    fn unload(&mut self, model: &ModelIdentity) -> RampResult<()> {
        match self.engine.unload(model) {
            Ok(()) => {
                if self.loaded.as_ref() == Some(model) {
                    self.loaded = None;
                }
                Ok(())
            }
            Err(e @ EngineError::Unreachable(_)) => Err(e.into()),
            Err(e) => {
                warn!(model = %model.tag, error = %e, "unload failed");
                Ok(())
            }
        }
    }

    /// Evict whatever other model is resident before working on `model`.
    fn switch_to(&mut self, model: &ModelIdentity) -> RampResult<()> {
        if let Some(previous) = self.loaded.clone() {
            if &previous != model {
                debug!(from = %previous.tag, to = %model.tag, "switching models");
                self.unload(&previous)?;
            }
        }
        Ok(())
    }

    /// Poll process RSS until it stops falling or `unload_settle` runs out.
    fn settle(&mut self) {
        let budget = self.settings.unload_settle;
        if budget.is_zero() {
            return;
        }
        let deadline = Instant::now() + budget;
        let mut last = self.probe.sample().process_rss_bytes;
        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!(rss_gb = last as f64 / GIB, "memory still falling when settle budget ran out");
                return;
            }
            thread::sleep(SETTLE_POLL.min(deadline - now));
            let rss = self.probe.sample().process_rss_bytes;
            if rss >= last {
                return;
            }
            last = rss;
        }
    }

    /// Unload the resident model, if any. Called once the queue is done.
    pub fn release(&mut self) -> RampResult<()> {
        match self.loaded.clone() {
            Some(model) => self.unload(&model),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Benchmark one model end to end. An `Err` carrying an unreachable
    /// engine means nothing about the model was learned and nothing should be
    /// recorded.
    pub fn run_model(&mut self, spec: &ModelSpec) -> RampResult<BenchmarkRecord> {
        let id = spec.identity.clone();
        let local = spec.kind == ModelKind::Local;
        info!(model = %id, kind = %spec.kind, declared_ctx = spec.declared_context, "benchmark start");

        self.switch_to(&id)?;

        let functional = if self.settings.functional {
            let test_tools = spec.declares("tools");
            let scores = run_battery(self.engine.as_ref(), &id, test_tools, &self.settings.probes)?;
            if local {
                self.loaded = Some(id.clone());
            }
            Some(scores)
        } else {
            None
        };

        let ladder = ladder_for(&self.settings.ladder, spec.declared_context, self.settings.max_context);
        let ladder_truncated =
            ladder.len() < ladder_for(&self.settings.ladder, spec.declared_context, None).len();
        if ladder_truncated {
            info!(model = %id.tag, max_context = ?self.settings.max_context, "ladder capped, record will be partial");
        }
        if ladder.is_empty() {
            warn!(model = %id, declared_ctx = spec.declared_context, "no context tier fits this model");
        }

        let detector = SwapDetector::new(self.settings.swap_ratio);
        let mut previous_footprint: Option<u64> = None;
        let mut tiers: Vec<TierResult> = Vec::new();
        let mut halt = HaltReason::LadderComplete;

        for context in ladder {
            if local {
                self.unload(&id)?;
                self.settle();
                let available = self.probe.available_bytes();
                if available < self.settings.safety_margin_bytes {
                    warn!(
                        model = %id.tag,
                        context,
                        available_gb = available as f64 / GIB,
                        margin_gb = self.settings.safety_margin_bytes as f64 / GIB,
                        "insufficient memory headroom, stopping"
                    );
                    halt = HaltReason::InsufficientHeadroom;
                    break;
                }
            }

            info!(model = %id.tag, context, "tier start");
            let call = self.call_tier(&id, local, context);
            if local {
                self.loaded = Some(id.clone());
            }

            let generation = match call.result {
                Ok(g) => g,
                Err(e @ EngineError::Unreachable(_)) => return Err(e.into()),
                Err(EngineError::Timeout(after)) => {
                    warn!(model = %id.tag, context, secs = after.as_secs(), "tier timed out, stopping");
                    let mut tier = TierResult::timed_out(context, EngineError::Timeout(after).to_string());
                    tier.energy = call.energy;
                    tiers.push(tier);
                    halt = HaltReason::Timeout;
                    break;
                }
                Err(e) => {
                    warn!(model = %id.tag, context, error = %e, "tier failed, stopping");
                    let mut tier = TierResult::failed(context, e.to_string());
                    tier.energy = call.energy;
                    tiers.push(tier);
                    halt = HaltReason::EngineFailure;
                    break;
                }
            };

            let trace = call.trace.unwrap_or_default();
            let metrics = TierMetrics::from_call(&generation, &trace);
            let energy = self.account_energy(spec, call.energy, &generation);
            let capped = generation.hit_output_cap(self.settings.max_output_tokens);
            if capped {
                warn!(model = %id.tag, context, output_tokens = generation.output_tokens, "output cap reached");
            }

            if local {
                let verdict = detector.judge(previous_footprint, trace.footprint_bytes());
                if verdict.swap_detected {
                    warn!(
                        model = %id.tag,
                        context,
                        footprint_gb = verdict.footprint_bytes as f64 / GIB,
                        previous_gb = verdict.previous_bytes.unwrap_or(0) as f64 / GIB,
                        "memory footprint collapsed, swap detected"
                    );
                    tiers.push(
                        TierResult::new(context, TierOutcome::Swap)
                            .with_metrics(metrics)
                            .with_energy(energy)
                            .with_output_capped(capped),
                    );
                    halt = HaltReason::SwapDetected;
                    break;
                }
                previous_footprint = Some(verdict.footprint_bytes);
            }

            let mut tier = TierResult::new(context, TierOutcome::Validated)
                .with_metrics(metrics)
                .with_energy(energy)
                .with_output_capped(capped);

            if self.settings.needle && context >= self.settings.needle_min_context {
                tier.needle = Some(self.needle(&id, context)?);
            }

            if let Some(m) = &tier.metrics {
                info!(
                    model = %id.tag,
                    context,
                    tps = m.tokens_per_second,
                    ttft_ms = m.ttft_ms.unwrap_or(0.0),
                    ram_gb = m.peak_ram_gb,
                    capped,
                    "tier validated"
                );
            }
            tiers.push(tier);
        }

        let detected_license = if local {
            self.detect_license(&id)?
        } else {
            LICENSE_NOT_APPLICABLE.to_string()
        };

        let record = aggregate(
            spec,
            RunSummary {
                tiers,
                halt_reason: halt,
                functional,
                detected_license,
                run_date: Utc::now(),
                ladder_truncated,
                size_gb: spec.size_gb(),
            },
            &self.settings.grades,
        );
        Ok(record)
    }

    fn call_tier(&mut self, id: &ModelIdentity, local: bool, context: u32) -> TierCall {
        let request = GenerationRequest::new(id.clone(), TIER_PROMPT)
            .with_context(context)
            .with_max_output(self.settings.max_output_tokens)
            .with_temperature(self.settings.tier_temperature)
            .with_timeout(self.settings.tier_timeout);

        if !local {
            return TierCall {
                result: self.engine.generate(&request),
                trace: None,
                energy: None,
            };
        }

        let engine = self.engine.as_ref();
        let guard = EnergyGuard::open(self.meter.as_ref());
        let (result, trace) = sample_during(self.probe.as_mut(), self.settings.sample_interval, || {
            engine.generate(&request)
        });
        TierCall {
            result,
            trace: Some(trace),
            energy: Some(guard.close()),
        }
    }

    /// Local readings are kept when measured and replaced by the per-token
    /// factor otherwise. Remote models always use the calibrated estimate.
    fn account_energy(
        &self,
        spec: &ModelSpec,
        reading: Option<EnergyReading>,
        generation: &Generation,
    ) -> EnergyReading {
        match (spec.kind, reading) {
            (ModelKind::Local, Some(r)) if !r.degraded => r,
            (ModelKind::Local, _) => {
                debug!(model = %spec.identity.tag, "energy counters unavailable, using per-token estimate");
                local_token_estimate(generation.input_tokens + generation.output_tokens)
            }
            (ModelKind::Remote, _) => {
                let params = spec.active_params_b.unwrap_or_else(|| {
                    warn!(model = %spec.identity.tag, "no active parameter count, remote emissions will be zero");
                    0.0
                });
                self.calibration.estimate(params, generation.output_tokens)
            }
        }
    }

    fn needle(&self, id: &ModelIdentity, context: u32) -> RampResult<NeedleReport> {
        let mut report = NeedleReport::default();
        for offset in NEEDLE_OFFSETS {
            let haystack = build_haystack(context, offset, &new_secret_code());
            let request = GenerationRequest::new(id.clone(), haystack.prompt)
                .with_context(context)
                .with_max_output(self.settings.max_output_tokens)
                .with_temperature(0.0)
                .with_timeout(self.settings.tier_timeout);
            let found = match self.engine.generate(&request) {
                Ok(g) => recalled(&g.text, &haystack.secret_code),
                Err(e @ EngineError::Unreachable(_)) => return Err(e.into()),
                Err(e) => {
                    debug!(model = %id.tag, context, offset, error = %e, "needle call failed");
                    false
                }
            };
            if !found {
                warn!(model = %id.tag, context, offset, "needle not recalled");
            }
            report.record(offset, found);
        }
        info!(model = %id.tag, context, found = report.found_count(), passed = report.passed(), "needle check");
        Ok(report)
    }

    fn detect_license(&self, id: &ModelIdentity) -> RampResult<String> {
        match self.engine.license_text(id) {
            Ok(text) => Ok(classify_license(text.as_deref())),
            Err(e @ EngineError::Unreachable(_)) => Err(e.into()),
            Err(e) => {
                debug!(model = %id.tag, error = %e, "license lookup failed");
                Ok(LICENSE_NOT_DETECTED.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carbon::NullMeter;
    use crate::model::InstalledModel;
    use crate::monitor::ResourceSample;
    use crate::record::UxRating;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::{Arc, Mutex};

    const GB: u64 = 1 << 30;

    /// Shared state between the fake engine and the fake probe: the engine
    /// decides what is resident, the probe reports it.
    #[derive(Default)]
    struct Host {
        resident: Option<(String, u32)>,
        base_rss: u64,
        footprints: HashMap<u32, u64>,
        available: VecDeque<u64>,
        timeouts: HashSet<u32>,
        capped: bool,
        unreachable: bool,
        /// Needle recall fails when the marker sits past this share of the prompt.
        recall_limit: f64,
        /// Runner memory is released gradually after an unload.
        slow_release: bool,
        /// Extra RSS still held by an unloaded runner, one entry per sample.
        lingering: VecDeque<u64>,
        log: Vec<String>,
    }

    type Shared = Arc<Mutex<Host>>;

    struct FakeEngine(Shared);

    impl InferenceEngine for FakeEngine {
        fn list_models(&self) -> EngineResult<Vec<InstalledModel>> {
            Ok(Vec::new())
        }

        fn generate(&self, req: &GenerationRequest) -> EngineResult<Generation> {
            let mut host = self.0.lock().unwrap();
            if host.unreachable {
                return Err(EngineError::Unreachable("connection refused".into()));
            }
            host.log.push(format!("gen {} {}", req.model.tag, req.context_window));

            if req.prompt.starts_with("Read the following text") {
                let pos = req.prompt.find("The secret code is: ").unwrap_or(0);
                let code_start = pos + "The secret code is: ".len();
                let code = &req.prompt[code_start..code_start + 8];
                let depth = pos as f64 / req.prompt.len() as f64;
                let text = if depth <= host.recall_limit {
                    code.to_string()
                } else {
                    "I could not find any code.".to_string()
                };
                return Ok(Generation {
                    text,
                    ..Default::default()
                });
            }

            if host.timeouts.contains(&req.context_window) {
                return Err(EngineError::Timeout(req.timeout));
            }
            host.resident = Some((req.model.tag.clone(), req.context_window));
            host.lingering.clear();
            let output_tokens = if host.capped {
                u64::from(req.max_output_tokens)
            } else {
                200
            };
            Ok(Generation {
                text: "Backpropagation ...".into(),
                input_tokens: 20,
                output_tokens,
                time_to_first_token: Some(Duration::from_millis(250)),
                total_duration: Duration::from_secs(4),
                done_reason: Some(if host.capped { "length" } else { "stop" }.into()),
                ..Default::default()
            })
        }

        fn unload(&self, model: &ModelIdentity) -> EngineResult<()> {
            let mut host = self.0.lock().unwrap();
            if host.unreachable {
                return Err(EngineError::Unreachable("connection refused".into()));
            }
            host.log.push(format!("unload {}", model.tag));
            if host.resident.as_ref().is_some_and(|(tag, _)| *tag == model.tag) {
                let (_, ctx) = host.resident.take().unwrap_or_default();
                let held = host.footprints.get(&ctx).copied().unwrap_or(0);
                if host.slow_release {
                    host.lingering = VecDeque::from(vec![held, held / 2, held / 4]);
                }
            }
            Ok(())
        }

        fn license_text(&self, _: &ModelIdentity) -> EngineResult<Option<String>> {
            Ok(Some("Apache License Version 2.0".into()))
        }
    }

    struct FakeProbe(Shared);

    impl MemoryProbe for FakeProbe {
        fn sample(&mut self) -> ResourceSample {
            let mut guard = self.0.lock().unwrap();
            let host = &mut *guard;
            let extra = match &host.resident {
                Some((_, ctx)) => host.footprints.get(ctx).copied().unwrap_or(0),
                None => host.lingering.pop_front().unwrap_or(0),
            };
            ResourceSample {
                process_rss_bytes: host.base_rss + extra,
                system_used_bytes: 4 * GB + extra,
                available_bytes: 32 * GB,
                ..Default::default()
            }
        }

        fn available_bytes(&mut self) -> u64 {
            self.0.lock().unwrap().available.pop_front().unwrap_or(64 * GB)
        }
    }

    fn host(footprints: &[(u32, u64)]) -> Shared {
        Arc::new(Mutex::new(Host {
            base_rss: 200 << 20,
            footprints: footprints.iter().copied().collect(),
            recall_limit: 1.0,
            ..Default::default()
        }))
    }

    fn settings() -> RampSettings {
        RampSettings {
            // Only the baseline and the final sample; keeps traces deterministic.
            sample_interval: Duration::from_secs(3600),
            unload_settle: Duration::ZERO,
            functional: false,
            ..Default::default()
        }
    }

    fn controller(shared: &Shared, settings: RampSettings) -> RampController {
        RampController::new(
            Box::new(FakeEngine(shared.clone())),
            Box::new(FakeProbe(shared.clone())),
            Box::new(NullMeter),
            settings,
        )
    }

    fn growing() -> Vec<(u32, u64)> {
        vec![
            (2048, GB),
            (4096, 2 * GB),
            (8192, 3 * GB),
            (16384, 4 * GB),
            (32768, 5 * GB),
        ]
    }

    #[test]
    fn test_full_ladder_validates_every_tier() {
        let shared = host(&growing());
        let mut ramp = controller(&shared, settings());
        let record = ramp.run_model(&ModelSpec::local("M", "m:3b", 32768)).unwrap();

        assert_eq!(record.halt_reason, HaltReason::LadderComplete);
        assert_eq!(record.max_validated_context, Some(32768));
        assert_eq!(record.tiers.len(), 5);
        assert!(record.tiers.iter().all(|t| t.validated && !t.swap_detected));
        assert_eq!(record.ram_at_max_context_gb, Some(5.0));
        assert_eq!(record.avg_tokens_per_second, 50.0);
        assert_eq!(record.ux_rating, UxRating::Instant);
        assert_eq!(record.detected_license, "Apache 2.0");
        // NullMeter forces the per-token fallback.
        assert!(record.energy_degraded);
        assert!(record.total_co2_kg > 0.0);
        assert_eq!(ramp.loaded().map(|m| m.tag.as_str()), Some("m:3b"));
    }

    #[test]
    fn test_swap_collapse_pins_ceiling() {
        let shared = host(&[
            (2048, GB),
            (4096, 2 * GB),
            (8192, 3 * GB),
            (16384, 4 * GB),
            (32768, 4 * GB / 10),
        ]);
        let mut ramp = controller(&shared, settings());
        let record = ramp.run_model(&ModelSpec::local("M", "m:3b", 131072)).unwrap();

        assert_eq!(record.halt_reason, HaltReason::SwapDetected);
        assert_eq!(record.max_validated_context, Some(16384));
        let swapped = record.tier(32768).unwrap();
        assert!(swapped.swap_detected);
        assert!(!swapped.validated);
        assert_eq!(swapped.outcome, TierOutcome::Swap);
        assert!(record.tier(65536).is_none());
    }

    #[test]
    fn test_timeout_halts_escalation() {
        let shared = host(&growing());
        shared.lock().unwrap().timeouts.insert(16384);
        let mut s = settings();
        s.ladder = vec![2048, 8192, 16384, 32768];
        let mut ramp = controller(&shared, s);
        let record = ramp.run_model(&ModelSpec::local("M", "m:3b", 32768)).unwrap();

        assert_eq!(record.halt_reason, HaltReason::Timeout);
        assert_eq!(record.max_validated_context, Some(8192));
        let contexts: Vec<u32> = record.tiers.iter().map(|t| t.context).collect();
        assert_eq!(contexts, vec![2048, 8192, 16384]);
        assert_eq!(record.tier(16384).unwrap().outcome, TierOutcome::Timeout);
        assert!(!shared.lock().unwrap().log.iter().any(|l| l.ends_with(" 32768")));
    }

    #[test]
    fn test_ceiling_is_monotonic_in_safety_margin() {
        let traces: [&[u64]; 4] = [
            &[8, 8, 8, 8, 8],
            &[8, 6, 4, 3, 2],
            &[3, 3, 1, 8, 8],
            &[16, 12, 9, 5, 1],
        ];
        let margins = [1, 2, 3, 4, 6, 10];

        for trace in traces {
            let mut last_ceiling = u32::MAX;
            for margin in margins {
                let shared = host(&growing());
                shared.lock().unwrap().available = trace.iter().map(|g| g * GB).collect();
                let mut s = settings();
                s.needle = false;
                s.safety_margin_bytes = margin * GB;
                let mut ramp = controller(&shared, s);
                let record = ramp.run_model(&ModelSpec::local("M", "m:3b", 32768)).unwrap();

                let ceiling = record.max_validated_context.unwrap_or(0);
                assert!(
                    ceiling <= last_ceiling,
                    "margin {margin} raised the ceiling for {trace:?}"
                );
                last_ceiling = ceiling;

                // Every validated tier was attempted with the margin available.
                for (i, tier) in record.tiers.iter().enumerate() {
                    assert!(trace[i] * GB >= margin * GB, "tier {} ran below margin", tier.context);
                }
                if record.tiers.len() < 5 {
                    assert_eq!(record.halt_reason, HaltReason::InsufficientHeadroom);
                }
            }
        }
    }

    #[test]
    fn test_needle_failure_does_not_gate_validation() {
        let shared = host(&growing());
        shared.lock().unwrap().recall_limit = 0.8;
        let mut s = settings();
        s.ladder = vec![2048, 8192];
        let mut ramp = controller(&shared, s);
        let record = ramp.run_model(&ModelSpec::local("M", "m:3b", 32768)).unwrap();

        assert!(record.tier(2048).unwrap().needle.is_none());
        let tier = record.tier(8192).unwrap();
        assert!(tier.validated);
        let needle = tier.needle.as_ref().unwrap();
        assert_eq!(needle.found_at(10), Some(true));
        assert_eq!(needle.found_at(50), Some(true));
        assert_eq!(needle.found_at(90), Some(false));
        assert!(!needle.passed());
        assert_eq!(record.needle_in_haystack["ctx_8k"], *needle);
        assert_eq!(record.max_validated_context, Some(8192));
    }

    #[test]
    fn test_output_cap_is_flagged_not_fatal() {
        let shared = host(&growing());
        shared.lock().unwrap().capped = true;
        let mut s = settings();
        s.ladder = vec![2048];
        let mut ramp = controller(&shared, s);
        let record = ramp.run_model(&ModelSpec::local("M", "m:3b", 32768)).unwrap();

        let tier = record.tier(2048).unwrap();
        assert!(tier.output_capped);
        assert!(tier.validated);
        assert_eq!(record.max_validated_context, Some(2048));
    }

    #[test]
    fn test_unreachable_engine_aborts_run() {
        let shared = host(&growing());
        shared.lock().unwrap().unreachable = true;
        let mut ramp = controller(&shared, settings());
        let err = ramp
            .run_model(&ModelSpec::local("M", "m:3b", 32768))
            .unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_previous_model_unloaded_before_switch() {
        let shared = host(&growing());
        let mut s = settings();
        s.ladder = vec![2048];
        let mut ramp = controller(&shared, s);
        ramp.run_model(&ModelSpec::local("A", "a:1b", 4096)).unwrap();
        ramp.run_model(&ModelSpec::local("B", "b:1b", 4096)).unwrap();
        ramp.release().unwrap();

        let log = shared.lock().unwrap().log.clone();
        let unload_a = log.iter().rposition(|l| l == "unload a:1b").unwrap();
        let first_b = log.iter().position(|l| l.starts_with("gen b:1b")).unwrap();
        assert!(unload_a < first_b);
        assert_eq!(log.last().map(String::as_str), Some("unload b:1b"));
        assert!(ramp.loaded().is_none());
    }

    #[test]
    fn test_remote_model_uses_calibrated_estimate() {
        let shared = host(&growing());
        // Headroom is never consulted for remote models.
        shared.lock().unwrap().available = VecDeque::from(vec![0, 0, 0]);
        let mut s = settings();
        s.ladder = vec![2048, 4096];
        s.needle = false;
        let mut ramp = controller(&shared, s);
        let mut spec = ModelSpec::local("Remote", "mistral-small-latest", 32768);
        spec.kind = ModelKind::Remote;
        spec.active_params_b = Some(24.0);
        let record = ramp.run_model(&spec).unwrap();

        assert_eq!(record.max_validated_context, Some(4096));
        assert!(!record.energy_degraded);
        assert_eq!(record.detected_license, LICENSE_NOT_APPLICABLE);
        let expected = CarbonCalibration::published().estimate(24.0, 200).emissions_kg * 2.0;
        assert!((record.total_co2_kg - expected).abs() < 1e-12);
        assert!(!shared.lock().unwrap().log.iter().any(|l| l.starts_with("unload")));
    }

    #[test]
    fn test_settle_waits_for_released_memory() {
        // Weights dominate: every tier adds the same footprint.
        let flat = [(2048, 4 * GB), (4096, 4 * GB), (8192, 4 * GB)];
        let run = |settle: Duration| {
            let shared = host(&flat);
            shared.lock().unwrap().slow_release = true;
            let mut s = settings();
            s.ladder = vec![2048, 4096, 8192];
            s.needle = false;
            s.unload_settle = settle;
            let mut ramp = controller(&shared, s);
            ramp.run_model(&ModelSpec::local("M", "m:3b", 8192)).unwrap()
        };

        // Without waiting, the old runner inflates the baseline and the
        // next tier looks like a collapse.
        let hasty = run(Duration::ZERO);
        assert_eq!(hasty.halt_reason, HaltReason::SwapDetected);
        assert_eq!(hasty.max_validated_context, Some(2048));

        let settled = run(Duration::from_secs(5));
        assert_eq!(settled.halt_reason, HaltReason::LadderComplete);
        assert_eq!(settled.max_validated_context, Some(8192));
        assert!(settled.tiers.iter().all(|t| !t.swap_detected));
    }

    #[test]
    fn test_operator_ceiling_makes_record_partial() {
        let shared = host(&growing());
        let mut s = settings();
        s.max_context = Some(4096);
        s.functional = true;
        let mut ramp = controller(&shared, s);
        let mut spec = ModelSpec::local("M", "m:3b", 32768);
        spec.size_bytes = Some(1_930_000_000);
        let record = ramp.run_model(&spec).unwrap();

        assert_eq!(record.max_validated_context, Some(4096));
        assert!(record.functional.is_some());
        assert!(!record.complete);
        assert_eq!(record.size_gb, Some(1.93));

        let shared = host(&growing());
        let mut s = settings();
        s.ladder = vec![2048, 4096];
        s.functional = true;
        let mut ramp = controller(&shared, s);
        assert!(ramp.run_model(&spec).unwrap().complete);
    }

    #[test]
    fn test_empty_ladder_still_yields_record() {
        let shared = host(&growing());
        let mut ramp = controller(&shared, settings());
        let record = ramp.run_model(&ModelSpec::local("Tiny", "tiny:1", 1024)).unwrap();
        assert!(record.tiers.is_empty());
        assert!(record.max_validated_context.is_none());
        assert!(record.failure_reason.is_some());
    }
}
