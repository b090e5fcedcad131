pub mod aggregate;
pub mod battery;
pub mod carbon;
pub mod engine;
pub mod error;
pub mod grades;
pub mod model;
pub mod monitor;
pub mod needle;
pub mod probes;
pub mod ramp;
pub mod record;
pub mod store;
pub mod swap;
pub mod tier;

pub use carbon::{
    CarbonCalibration, EnergyGuard, EnergyMeter, EnergyReading, EnergySession, EnergySource,
    GridFactor, NullMeter,
};
pub use engine::{Generation, GenerationRequest, InferenceEngine, ToolCall, ToolSpec};
pub use error::{EngineError, EngineResult, RampError, RampResult};
pub use grades::GradeThresholds;
pub use model::{InstalledModel, ModelDirectory, ModelIdentity, ModelKind, ModelSpec};
pub use monitor::{MemoryProbe, ResourceSample, SampleTrace};
pub use needle::NeedleReport;
pub use probes::ProbeSettings;
pub use ramp::{RampController, RampSettings};
pub use record::{
    BenchmarkRecord, EfficiencyGrade, FunctionalScores, HaltReason, LanguageResult, UxRating,
    SCHEMA_VERSION,
};
pub use store::{is_stale, ResultStore, StalenessPolicy, TierHistoryEntry};
pub use swap::{SwapDetector, SwapVerdict};
pub use tier::{TierMetrics, TierOutcome, TierResult};
