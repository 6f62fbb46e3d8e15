//! Stochastic inter-request delay controller
//!
//! Each call to [`TimingController::next_delay`] walks a fixed decision order and
//! the first rule that applies produces the delay:
//!
//! | Order | Rule | Delay |
//! |-------|------|-------|
//! | 1 | request index hits the cooldown threshold | `cooldown-duration` |
//! | 2 | active phase elapsed / still resting | `activity-phase.rest` |
//! | 3 | burst counter reaches the burst size | `burst-interval` |
//! | 4 | last latency above `latency-threshold` | `fast-delay` |
//! | 5 | otherwise | `1/rps * (1 ± variance) + think-time` |

use crate::config::{Span, TimingConfig};
use crate::timing::entropy::DelayHistory;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

/// Which rule produced a delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayKind {
    /// Long pause every few hundred requests
    Cooldown,
    /// Resting half of the activity phase cycle
    Rest,
    /// Pause after a fast run of requests
    BurstPause,
    /// Short delay while the upstream is answering slowly
    FastFollow,
    /// Base pacing with variance and think time
    Paced,
}

/// A delay together with the rule that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delay {
    pub seconds: f64,
    pub kind: DelayKind,
}

#[derive(Debug, Clone, Copy)]
struct ActivityPhase {
    active: bool,
    started: Instant,
    duration: f64,
}

/// Mutable state owned by the controller
#[derive(Debug, Clone)]
struct TimingState {
    burst_counter: u32,
    burst_size: u32,
    cooldown_at: u64,
    phase: Option<ActivityPhase>,
    history: DelayHistory,
}

/// Produces the delay to apply between requests
#[derive(Debug, Clone)]
pub struct TimingController {
    config: TimingConfig,
    rng: StdRng,
    state: TimingState,
}

impl TimingController {
    /// Creates a controller; uses `config.seed` when set, OS entropy otherwise
    ///
    /// The configuration must already be validated: every range is ordered.
    pub fn new(config: TimingConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }

    /// Creates a controller with an explicit seed, ignoring `config.seed`
    pub fn seeded(config: TimingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: TimingConfig, mut rng: StdRng) -> Self {
        let burst_size = draw_count(&mut rng, &config.burst_size);
        let cooldown_at = draw_count(&mut rng, &config.cooldown_every);

        Self {
            config,
            rng,
            state: TimingState {
                burst_counter: 0,
                burst_size,
                cooldown_at,
                phase: None,
                history: DelayHistory::new(),
            },
        }
    }

    /// Returns the delay in seconds to apply before the next request
    ///
    /// # Arguments
    ///
    /// * `request_index` - Requests issued so far by the caller
    /// * `last_latency` - Response time of the most recent request (seconds)
    pub fn next_delay(&mut self, request_index: u64, last_latency: f64) -> f64 {
        self.decide(request_index, last_latency, Instant::now())
            .seconds
    }

    /// Same as [`next_delay`](Self::next_delay) with an explicit clock reading,
    /// returning which rule fired
    pub fn decide(&mut self, request_index: u64, last_latency: f64, now: Instant) -> Delay {
        let delay = self.select(request_index, last_latency, now);
        self.state.history.push(delay.seconds);
        tracing::trace!(
            "delay {:.3}s ({:?}) at request {}",
            delay.seconds,
            delay.kind,
            request_index
        );
        delay
    }

    /// Shannon entropy (bits) of the recently emitted delays
    pub fn entropy(&self) -> f64 {
        self.state.history.entropy()
    }

    /// Number of delays currently held in the history buffer
    pub fn history_len(&self) -> usize {
        self.state.history.len()
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    fn select(&mut self, request_index: u64, last_latency: f64, now: Instant) -> Delay {
        let config = &self.config;
        let rng = &mut self.rng;
        let state = &mut self.state;

        // 1. Cooldown
        if request_index > 0 && request_index % state.cooldown_at == 0 {
            state.cooldown_at = draw_count(rng, &config.cooldown_every);
            return Delay {
                seconds: draw_seconds(rng, &config.cooldown_duration),
                kind: DelayKind::Cooldown,
            };
        }

        // 2. Activity phase
        if let Some(phase_config) = &config.activity_phase {
            let phase = state.phase.get_or_insert_with(|| ActivityPhase {
                active: true,
                started: now,
                duration: draw_seconds(rng, &phase_config.active),
            });
            let elapsed = now.saturating_duration_since(phase.started).as_secs_f64();

            if phase.active {
                if elapsed >= phase.duration {
                    let rest = draw_seconds(rng, &phase_config.rest);
                    *phase = ActivityPhase {
                        active: false,
                        started: now,
                        duration: rest,
                    };
                    return Delay {
                        seconds: rest,
                        kind: DelayKind::Rest,
                    };
                }
            } else if elapsed < phase.duration {
                return Delay {
                    seconds: phase.duration - elapsed,
                    kind: DelayKind::Rest,
                };
            } else {
                *phase = ActivityPhase {
                    active: true,
                    started: now,
                    duration: draw_seconds(rng, &phase_config.active),
                };
            }
        }

        // 3. Burst boundary
        state.burst_counter += 1;
        if state.burst_counter >= state.burst_size {
            state.burst_counter = 0;
            state.burst_size = draw_count(rng, &config.burst_size);
            return Delay {
                seconds: draw_seconds(rng, &config.burst_interval),
                kind: DelayKind::BurstPause,
            };
        }

        // 4. Latency exploitation
        if let Some(threshold) = config.latency_threshold {
            if last_latency > threshold {
                return Delay {
                    seconds: draw_seconds(rng, &config.fast_delay),
                    kind: DelayKind::FastFollow,
                };
            }
        }

        // 5. Base pacing
        let base = 1.0 / config.target_rps;
        let variance = if config.request_variance > 0.0 {
            rng.gen_range(-config.request_variance..=config.request_variance)
        } else {
            0.0
        };
        let think = draw_seconds(rng, &config.think_time);

        Delay {
            seconds: (base * (1.0 + variance) + think).max(0.0),
            kind: DelayKind::Paced,
        }
    }
}

fn draw_seconds(rng: &mut StdRng, span: &Span<f64>) -> f64 {
    rng.gen_range(span.min..=span.max)
}

fn draw_count<T>(rng: &mut StdRng, span: &Span<T>) -> T
where
    T: rand::distributions::uniform::SampleUniform + PartialOrd + Copy,
{
    rng.gen_range(span.min..=span.max)
}
