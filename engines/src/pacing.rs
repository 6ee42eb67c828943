use rand::Rng;

/// Human-like delay + periodic break configuration (§4.8 steps 3-4). A
/// "luxury"-class marketplace plugs in longer ranges; this struct is the
/// design parameter, not a hard-coded constant.
#[derive(Clone, Copy, Debug)]
pub struct PacingConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub actions_per_break: u32,
    pub break_duration_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 2_000,
            max_delay_ms: 8_000,
            jitter_ms: 500,
            actions_per_break: 25,
            break_duration_ms: 60_000,
        }
    }
}

impl PacingConfig {
    pub fn luxury() -> Self {
        Self {
            min_delay_ms: 5_000,
            max_delay_ms: 20_000,
            jitter_ms: 1_500,
            actions_per_break: 15,
            break_duration_ms: 120_000,
        }
    }

    pub fn next_delay(&self) -> std::time::Duration {
        let mut rng = rand::thread_rng();
        let base = rng.gen_range(self.min_delay_ms..=self.max_delay_ms);
        let jitter: i64 = rng.gen_range(-(self.jitter_ms as i64)..=(self.jitter_ms as i64));
        let total = (base as i64 + jitter).max(0) as u64;
        std::time::Duration::from_millis(total)
    }

    pub fn should_break(&self, successes_in_batch: u32) -> bool {
        self.actions_per_break > 0 && successes_in_batch > 0 && successes_in_batch % self.actions_per_break == 0
    }

    pub fn break_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.break_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_stays_within_configured_bounds_plus_jitter() {
        let config = PacingConfig::default();
        for _ in 0..200 {
            let d = config.next_delay().as_millis() as i64;
            assert!(d >= 0);
            assert!(d <= (config.max_delay_ms + config.jitter_ms) as i64);
        }
    }

    #[test]
    fn break_fires_every_n_successes() {
        let config = PacingConfig {
            actions_per_break: 5,
            ..PacingConfig::default()
        };
        assert!(!config.should_break(4));
        assert!(config.should_break(5));
        assert!(config.should_break(10));
    }
}
