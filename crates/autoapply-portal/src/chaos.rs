use autoapply_core::submission::{FaultClass, FaultOutcome};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

pub const DEFAULT_FAILURE_RATE: f64 = 0.20;
/// Bounds of the suggested retry delay attached to an injected fault, seconds.
pub const MIN_RETRY_DELAY_SECS: u64 = 1;
pub const MAX_RETRY_DELAY_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChaosConfig {
    pub enabled: bool,
    pub failure_rate: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_rate: DEFAULT_FAILURE_RATE,
        }
    }
}

impl ChaosConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            failure_rate: DEFAULT_FAILURE_RATE,
        }
    }

    pub fn with_rate(failure_rate: f64) -> Self {
        Self {
            enabled: true,
            failure_rate,
        }
    }

    /// `"20%"`-style rendering used by the health endpoint.
    pub fn rate_label(&self) -> String {
        format!("{}%", (self.failure_rate * 100.0).round() as u64)
    }
}

/// Partial runtime update. Invalid fields are dropped, never reported.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChaosUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub failure_rate: Option<f64>,
}

/// Per-attempt gate in front of the submission path.
pub struct FaultInjector {
    config: Mutex<ChaosConfig>,
    rng: Mutex<StdRng>,
}

impl FaultInjector {
    pub fn new(config: ChaosConfig) -> Self {
        Self {
            config: Mutex::new(config),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(config: ChaosConfig, seed: u64) -> Self {
        Self {
            config: Mutex::new(config),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn config(&self) -> ChaosConfig {
        *lock(&self.config)
    }

    /// Applies the valid parts of `update` and returns the effective config.
    pub fn update(&self, update: ChaosUpdate) -> ChaosConfig {
        let mut config = lock(&self.config);
        if let Some(enabled) = update.enabled {
            config.enabled = enabled;
        }
        if let Some(rate) = update.failure_rate {
            if (0.0..=1.0).contains(&rate) {
                config.failure_rate = rate;
            }
        }
        info!(
            event = "chaos_config",
            enabled = config.enabled,
            failure_rate = config.failure_rate
        );
        *config
    }

    /// Independent draw per call; ignores request content entirely.
    pub fn evaluate(&self) -> Option<FaultOutcome> {
        let config = self.config();
        if !config.enabled || config.failure_rate <= 0.0 {
            return None;
        }
        let mut rng = lock(&self.rng);
        if rng.gen::<f64>() >= config.failure_rate {
            return None;
        }
        let class = *FaultClass::ALL.choose(&mut *rng)?;
        let delay = rng.gen_range(MIN_RETRY_DELAY_SECS..=MAX_RETRY_DELAY_SECS);
        Some(FaultOutcome::new(class, delay))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn zero_rate_never_injects() {
        let injector = FaultInjector::with_seed(ChaosConfig::with_rate(0.0), 7);
        assert!((0..5_000).all(|_| injector.evaluate().is_none()));
    }

    #[test]
    fn disabled_never_injects() {
        let injector = FaultInjector::with_seed(
            ChaosConfig {
                enabled: false,
                failure_rate: 1.0,
            },
            7,
        );
        assert!((0..1_000).all(|_| injector.evaluate().is_none()));
    }

    #[test]
    fn full_rate_always_injects_retryable_faults() {
        let injector = FaultInjector::with_seed(ChaosConfig::with_rate(1.0), 11);
        let mut statuses = HashSet::new();
        for _ in 0..2_000 {
            let fault = injector.evaluate().expect("fault");
            assert!(fault.retryable);
            assert!((MIN_RETRY_DELAY_SECS..=MAX_RETRY_DELAY_SECS).contains(&fault.suggested_retry_delay));
            statuses.insert(fault.http_status);
        }
        assert_eq!(statuses, HashSet::from([429, 500, 502, 503]));
    }

    #[test]
    fn default_rate_is_roughly_twenty_percent() {
        let injector = FaultInjector::with_seed(ChaosConfig::default(), 42);
        let hits = (0..20_000).filter(|_| injector.evaluate().is_some()).count();
        let rate = hits as f64 / 20_000.0;
        assert!((0.18..0.22).contains(&rate), "observed rate {rate}");
    }

    #[test]
    fn update_ignores_out_of_range_rate() {
        let injector = FaultInjector::new(ChaosConfig::default());
        let effective = injector.update(ChaosUpdate {
            enabled: Some(false),
            failure_rate: Some(1.7),
        });
        assert!(!effective.enabled);
        assert_eq!(effective.failure_rate, DEFAULT_FAILURE_RATE);

        let effective = injector.update(ChaosUpdate {
            enabled: None,
            failure_rate: Some(f64::NAN),
        });
        assert_eq!(effective.failure_rate, DEFAULT_FAILURE_RATE);

        let effective = injector.update(ChaosUpdate {
            enabled: Some(true),
            failure_rate: Some(0.5),
        });
        assert_eq!(effective, ChaosConfig::with_rate(0.5));
        assert_eq!(injector.config(), effective);
    }

    #[test]
    fn rate_label_is_whole_percent() {
        assert_eq!(ChaosConfig::default().rate_label(), "20%");
        assert_eq!(ChaosConfig::with_rate(0.05).rate_label(), "5%");
    }
}
