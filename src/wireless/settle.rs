//! Convergence waits after association commands
//!
//! hostapd, wpa_supplicant and the IBSS code in mac80211 need time after a join
//! before the link is usable. Forming an IBSS is the delicate case: two radios
//! issuing `ibss join` for the same SSID almost simultaneously end up in two
//! separate cells, so the first member must settle before anyone else joins.

use crate::error::Result;
use crate::manifest::{RetryConfig, SettleConfig, SettleMode};
use crate::wireless::RadioEngine;
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use rand::rng;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How to wait for external state to converge
#[derive(Debug, Clone)]
pub enum Settle {
    /// Return immediately
    Immediate,
    /// Sleep fixed durations
    Fixed { join: Duration, formation: Duration },
    /// Poll link state with backoff after joins; sleep after formation
    Poll {
        formation: Duration,
        retry: RetryConfig,
    },
}

/// Create backoff strategy from RetryConfig
fn backoff_from_config(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoff::new()
        .base_delay_ms(config.base_delay_ms)
        .max_delay_ms(config.max_delay_ms)
        .multiplier(config.multiplier)
        .max_attempts(config.max_attempts)
        .jitter_factor(config.jitter_factor)
}

impl Settle {
    pub fn from_config(config: &SettleConfig) -> Self {
        let formation = Duration::from_millis(config.formation_delay_ms);
        match config.mode {
            SettleMode::None => Settle::Immediate,
            SettleMode::Fixed => Settle::Fixed {
                join: Duration::from_millis(config.join_delay_ms),
                formation,
            },
            SettleMode::Poll => Settle::Poll {
                formation,
                retry: config.retry.clone(),
            },
        }
    }

    /// Wait for freshly joined interfaces, given as (interface, namespace)
    pub fn after_join<E: RadioEngine>(
        &self,
        engine: &mut E,
        joined: &[(String, String)],
    ) -> Result<()> {
        if joined.is_empty() {
            return Ok(());
        }

        match self {
            Settle::Immediate => Ok(()),
            Settle::Fixed { join, .. } => {
                debug!(delay_ms = join.as_millis() as u64, "waiting for association");
                engine.pause(*join);
                Ok(())
            }
            Settle::Poll { retry, .. } => {
                for (iface, ns) in joined {
                    poll_link(engine, iface, ns, retry)?;
                }
                Ok(())
            }
        }
    }

    /// Wait after the first member of an IBSS created the cell
    pub fn after_formation<E: RadioEngine>(&self, engine: &mut E) {
        let formation = match self {
            Settle::Immediate => return,
            Settle::Fixed { formation, .. } | Settle::Poll { formation, .. } => *formation,
        };
        info!(
            delay_ms = formation.as_millis() as u64,
            "ad hoc network being created, waiting before other members join"
        );
        engine.pause(formation);
    }
}

/// Poll until the link reports established or the backoff gives up
fn poll_link<E: RadioEngine>(
    engine: &mut E,
    iface: &str,
    ns: &str,
    retry: &RetryConfig,
) -> Result<()> {
    let backoff = backoff_from_config(retry);
    let mut rng = rng();
    let mut attempt: u8 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        if engine.link_established(iface, ns)? {
            debug!(iface, ns, attempt, "link established");
            return Ok(());
        }

        match backoff.delay(attempt, &mut rng) {
            Some(delay_ms) => engine.pause(Duration::from_millis(delay_ms)),
            None => {
                warn!(iface, ns, attempt, "link not established, continuing anyway");
                return Ok(());
            }
        }
    }
}
