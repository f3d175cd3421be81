use crate::config::QuoteConfig;

/// Pure delivery-fee schedule: integrates the per-km rate over the distance,
/// applying relief multipliers to the marginal rate beyond each configured
/// threshold, then rounds half-up to the configured step exactly once, last.
#[derive(Debug, Clone)]
pub struct FeeQuoteEngine {
    cfg: QuoteConfig,
}

impl FeeQuoteEngine {
    pub fn new(cfg: QuoteConfig) -> Self {
        let mut cfg = cfg;
        cfg.relief.sort_by(|a, b| a.beyond_km.total_cmp(&b.beyond_km));
        Self { cfg }
    }

    /// Fee in TZS for a resolved distance. Pure function of distance and
    /// configuration.
    pub fn quote(&self, distance_km: f64) -> i64 {
        let distance_km = distance_km.max(0.0);
        let base_rate = self.cfg.rate_per_km_tzs as f64;

        let mut fee = 0.0;
        let mut covered = 0.0;
        let mut rate = base_rate;
        for band in &self.cfg.relief {
            if distance_km <= band.beyond_km {
                break;
            }
            fee += (band.beyond_km - covered) * rate;
            covered = band.beyond_km;
            rate = base_rate * band.multiplier;
        }
        fee += (distance_km - covered) * rate;

        round_half_up_to_step(fee, self.cfg.rounding_step_tzs)
    }

    /// Whether a distance lies beyond the configured service radius. The
    /// dispatcher, not this engine, decides what to do with the flag.
    pub fn out_of_service(&self, distance_km: f64) -> bool {
        self.cfg.service_radius_km > 0.0 && distance_km > self.cfg.service_radius_km
    }

    pub fn rounding_step(&self) -> i64 {
        self.cfg.rounding_step_tzs
    }
}

/// Round-half-up to the nearest multiple of `step`, applied once to the final
/// amount. Never produces a negative fee.
fn round_half_up_to_step(amount: f64, step: i64) -> i64 {
    let step_f = step as f64;
    let steps = (amount / step_f + 0.5).floor();
    ((steps * step_f) as i64).max(0)
}
