//! Energy and emissions accounting.
//!
//! Locally served models are measured: an [`EnergyMeter`] opens one session
//! per tier call and the [`EnergyGuard`] closes it on every exit path. Remote
//! models cannot be measured and go through [`CarbonCalibration`] instead.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergySource {
    /// Host counters converted with the configured grid intensity.
    Measured,
    /// Fixed per-token factor for local models when counters are missing.
    LocalEstimate,
    /// Calibrated analytical model for remote APIs.
    ApiEstimate,
    #[default]
    Unavailable,
}

impl fmt::Display for EnergySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measured => write!(f, "measured"),
            Self::LocalEstimate => write!(f, "local_estimate"),
            Self::ApiEstimate => write!(f, "api_estimate"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyReading {
    pub energy_kwh: f64,
    pub emissions_kg: f64,
    pub source: EnergySource,
    /// True when a local measurement was impossible and the figure is a
    /// fallback.
    pub degraded: bool,
}

impl EnergyReading {
    /// Zero reading returned when no sensor could be read.
    pub fn unavailable() -> Self {
        Self {
            degraded: true,
            ..Default::default()
        }
    }

    pub fn is_measured(&self) -> bool {
        self.source == EnergySource::Measured
    }

    /// Emissions per thousand processed tokens.
    pub fn co2_per_1k_tokens_kg(&self, total_tokens: u64) -> f64 {
        if total_tokens == 0 {
            0.0
        } else {
            self.emissions_kg / total_tokens as f64 * 1000.0
        }
    }
}

// ---------------------------------------------------------------------------
// Scoped sessions
// ---------------------------------------------------------------------------

/// One open measurement window.
pub trait EnergySession {
    fn finish(self: Box<Self>) -> EnergyReading;
}

/// Host energy facility. Opening a session must never fail: a meter without
/// usable sensors returns sessions that finish with a degraded zero reading.
pub trait EnergyMeter {
    fn open(&self) -> Box<dyn EnergySession>;
}

/// Keeps a session open for the lifetime of the guard.
///
/// [`EnergyGuard::close`] hands back the reading. A guard dropped without
/// being closed (early return, panic unwinding) still finishes its session.
pub struct EnergyGuard {
    session: Option<Box<dyn EnergySession>>,
}

impl EnergyGuard {
    pub fn open(meter: &dyn EnergyMeter) -> Self {
        Self {
            session: Some(meter.open()),
        }
    }

    pub fn close(mut self) -> EnergyReading {
        match self.session.take() {
            Some(session) => session.finish(),
            None => EnergyReading::unavailable(),
        }
    }
}

impl Drop for EnergyGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let reading = session.finish();
            tracing::debug!(
                energy_kwh = reading.energy_kwh,
                "energy session closed without a reading being collected"
            );
        }
    }
}

/// Run `call` inside one energy session.
pub fn measure<T>(meter: &dyn EnergyMeter, call: impl FnOnce() -> T) -> (T, EnergyReading) {
    let guard = EnergyGuard::open(meter);
    let out = call();
    (out, guard.close())
}

/// Meter for hosts without any energy counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMeter;

struct NullSession;

impl EnergySession for NullSession {
    fn finish(self: Box<Self>) -> EnergyReading {
        EnergyReading::unavailable()
    }
}

impl EnergyMeter for NullMeter {
    fn open(&self) -> Box<dyn EnergySession> {
        Box::new(NullSession)
    }
}

// ---------------------------------------------------------------------------
// Grid intensity
// ---------------------------------------------------------------------------

/// Average grid carbon intensity in gCO2e/kWh, by ISO 3166 alpha-3 code.
const GRID_INTENSITY: &[(&str, f64)] = &[
    ("FRA", 56.0),
    ("DEU", 381.0),
    ("GBR", 238.0),
    ("USA", 369.0),
    ("CHN", 582.0),
    ("IND", 713.0),
    ("ESP", 174.0),
    ("ITA", 331.0),
    ("SWE", 41.0),
    ("NOR", 30.0),
    ("CAN", 170.0),
    ("POL", 662.0),
];

pub const DEFAULT_COUNTRY: &str = "FRA";

pub fn grid_intensity(country: &str) -> Option<f64> {
    let code = country.trim().to_uppercase();
    GRID_INTENSITY
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, g)| *g)
}

/// Converts metered energy to emissions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridFactor {
    pub g_per_kwh: f64,
    pub pue: f64,
}

impl GridFactor {
    /// Resolve a country code, preferring an explicit override. Unknown
    /// countries fall back to the default country's intensity.
    pub fn for_country(country: &str, override_g_per_kwh: Option<f64>, pue: f64) -> Self {
        let g_per_kwh = override_g_per_kwh
            .or_else(|| grid_intensity(country))
            .unwrap_or_else(|| {
                tracing::warn!(country, "unknown grid intensity; using {DEFAULT_COUNTRY}");
                grid_intensity(DEFAULT_COUNTRY).unwrap_or(0.0)
            });
        Self {
            g_per_kwh,
            pue: if pue > 0.0 { pue } else { 1.0 },
        }
    }

    pub fn emissions_kg(&self, energy_kwh: f64) -> f64 {
        energy_kwh * self.pue * self.g_per_kwh / 1000.0
    }

    pub fn reading(&self, energy_kwh: f64) -> EnergyReading {
        EnergyReading {
            energy_kwh,
            emissions_kg: self.emissions_kg(energy_kwh),
            source: EnergySource::Measured,
            degraded: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Estimates
// ---------------------------------------------------------------------------

/// Observed average for a small model on a laptop-class host, in grams.
pub const LOCAL_CO2_G_PER_TOKEN: f64 = 0.00019;

/// Per-token fallback for a local model whose session came back degraded.
pub fn local_token_estimate(tokens: u64) -> EnergyReading {
    EnergyReading {
        energy_kwh: 0.0,
        emissions_kg: tokens as f64 * LOCAL_CO2_G_PER_TOKEN / 1000.0,
        source: EnergySource::LocalEstimate,
        degraded: true,
    }
}

/// Regression slope, Wh per token per billion active parameters.
pub const ALPHA_WH: f64 = 8.91e-5;
/// Regression intercept, Wh per token.
pub const BETA_WH: f64 = 1.43e-3;

pub const REFERENCE_ACTIVE_PARAMS_B: f64 = 123.0;
pub const REFERENCE_OUTPUT_TOKENS: u64 = 400;
pub const REFERENCE_EMISSIONS_G: f64 = 1.14;

/// Analytical energy model for remote APIs, with the grid factor
/// back-derived from one published reference disclosure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarbonCalibration {
    alpha_wh: f64,
    beta_wh: f64,
    g_per_wh: f64,
}

impl CarbonCalibration {
    pub fn from_reference(
        alpha_wh: f64,
        beta_wh: f64,
        ref_params_b: f64,
        ref_tokens: u64,
        ref_emissions_g: f64,
    ) -> Self {
        let mut cal = Self {
            alpha_wh,
            beta_wh,
            g_per_wh: 0.0,
        };
        let ref_wh = cal.energy_wh(ref_params_b, ref_tokens);
        if ref_wh > 0.0 {
            cal.g_per_wh = ref_emissions_g / ref_wh;
        }
        cal
    }

    /// Calibration on the built-in reference point.
    pub fn published() -> Self {
        Self::from_reference(
            ALPHA_WH,
            BETA_WH,
            REFERENCE_ACTIVE_PARAMS_B,
            REFERENCE_OUTPUT_TOKENS,
            REFERENCE_EMISSIONS_G,
        )
    }

    /// Implicit grid factor, gCO2e per Wh.
    pub fn g_per_wh(&self) -> f64 {
        self.g_per_wh
    }

    pub fn energy_wh(&self, active_params_b: f64, tokens: u64) -> f64 {
        if active_params_b <= 0.0 {
            return 0.0;
        }
        tokens as f64 * (self.alpha_wh * active_params_b + self.beta_wh)
    }

    pub fn estimate(&self, active_params_b: f64, tokens: u64) -> EnergyReading {
        let wh = self.energy_wh(active_params_b, tokens);
        EnergyReading {
            energy_kwh: wh / 1000.0,
            emissions_kg: wh * self.g_per_wh / 1000.0,
            source: EnergySource::ApiEstimate,
            degraded: false,
        }
    }
}

impl Default for CarbonCalibration {
    fn default() -> Self {
        Self::published()
    }
}
