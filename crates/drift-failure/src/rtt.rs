//! RFC 6298-style smoothed round-trip-time estimation, used to pick the
//! SWIM probe timeout adaptively rather than fixing it per peer (spec §4.7).

use drift_core::config::EngineConfig;

const ALPHA_NUM: u64 = 1;
const ALPHA_DEN: u64 = 8;
const BETA_NUM: u64 = 1;
const BETA_DEN: u64 = 4;
const K: u64 = 4;

/// Tracks smoothed RTT (`srtt`) and RTT variance (`rttvar`) for a single
/// peer, clamping raw samples to `[rtt_min_sample_ms, rtt_max_sample_ms]`
/// before folding them in so one wild outlier cannot destabilize the
/// estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttTracker {
    srtt_ms: u64,
    rttvar_ms: u64,
    min_sample_ms: u64,
    max_sample_ms: u64,
    has_sample: bool,
}

impl RttTracker {
    pub fn new(initial_srtt_ms: u64, initial_rttvar_ms: u64, min_sample_ms: u64, max_sample_ms: u64) -> Self {
        Self {
            srtt_ms: initial_srtt_ms,
            rttvar_ms: initial_rttvar_ms,
            min_sample_ms,
            max_sample_ms,
            has_sample: false,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.rtt_initial_srtt_ms,
            config.rtt_initial_var_ms,
            config.rtt_min_sample_ms,
            config.rtt_max_sample_ms,
        )
    }

    /// Fold in a new round-trip sample, in milliseconds.
    pub fn record(&mut self, sample_ms: u64) {
        let sample = sample_ms.clamp(self.min_sample_ms, self.max_sample_ms);

        if !self.has_sample {
            self.srtt_ms = sample;
            self.rttvar_ms = sample / 2;
            self.has_sample = true;
            return;
        }

        let delta = self.srtt_ms.abs_diff(sample);
        self.rttvar_ms = ((BETA_DEN - BETA_NUM) * self.rttvar_ms + BETA_NUM * delta) / BETA_DEN;
        self.srtt_ms = ((ALPHA_DEN - ALPHA_NUM) * self.srtt_ms + ALPHA_NUM * sample) / ALPHA_DEN;
    }

    /// `srtt + K * rttvar`, clamped to `[min_sample_ms, max_sample_ms]`.
    pub fn suggested_timeout_ms(&self) -> u64 {
        let rto = self.srtt_ms + K * self.rttvar_ms;
        rto.clamp(self.min_sample_ms, self.max_sample_ms)
    }

    pub fn srtt_ms(&self) -> u64 {
        self.srtt_ms
    }

    pub fn rttvar_ms(&self) -> u64 {
        self.rttvar_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> RttTracker {
        RttTracker::new(1_000, 500, 50, 30_000)
    }

    #[test]
    fn first_sample_seeds_srtt_and_half_rttvar() {
        let mut t = tracker();
        t.record(200);
        assert_eq!(t.srtt_ms(), 200);
        assert_eq!(t.rttvar_ms(), 100);
    }

    #[test]
    fn repeated_stable_samples_converge_toward_the_sample() {
        let mut t = tracker();
        for _ in 0..50 {
            t.record(300);
        }
        assert!((t.srtt_ms() as i64 - 300).abs() <= 1);
        assert!(t.rttvar_ms() <= 2);
    }

    #[test]
    fn suggested_timeout_stays_within_bounds() {
        let mut t = tracker();
        t.record(29_000);
        t.record(30_000);
        assert!(t.suggested_timeout_ms() <= 30_000);

        let mut low = tracker();
        low.record(10);
        assert!(low.suggested_timeout_ms() >= 50);
    }

    #[test]
    fn outlier_sample_is_clamped_before_folding_in() {
        let mut t = tracker();
        t.record(10_000_000);
        assert!(t.srtt_ms() <= 30_000);
    }

    proptest::proptest! {
        #[test]
        fn suggested_timeout_is_always_bounded(samples in proptest::collection::vec(0u64..60_000, 1..30)) {
            let mut t = RttTracker::new(1_000, 500, 50, 30_000);
            for s in samples {
                t.record(s);
                let timeout = t.suggested_timeout_ms();
                proptest::prop_assert!(timeout >= 50 && timeout <= 30_000);
            }
        }
    }
}
