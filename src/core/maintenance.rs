//! Periodic maintenance: bucket refresh, item replication and expiry.

use std::time::{Duration, Instant};

use crate::common::{Id, Item};
use crate::rpc::Config;

/// Maintenance timers
#[derive(Debug)]
pub struct Maintenance {
    t_refresh: Duration,
    t_replicate: Duration,
    t_republish: Duration,
    t_expire: Duration,

    last_refresh: Instant,
    last_replicate: Instant,
    last_expire: Instant,
}

/// Sweeps that are due
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceDecisions {
    /// Refresh buckets from the lowest populated one upward.
    pub should_refresh: bool,
    /// Replicate, republish or expire every stored item.
    pub should_replicate: bool,
    /// Delete expired items.
    pub should_expire: bool,
}

/// What to do with a stored item during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAction {
    Keep,
    /// Store an unchanged copy at the nodes nearest to its key.
    Replicate,
    /// Publish again with a fresh timestamp.
    Republish,
    /// Delete locally.
    Expire,
}

impl Maintenance {
    pub fn new(config: &Config) -> Self {
        let now = Instant::now();

        Maintenance {
            t_refresh: config.t_refresh,
            t_replicate: config.t_replicate,
            t_republish: config.t_republish,
            t_expire: config.t_expire,

            last_refresh: now,
            last_replicate: now,
            last_expire: now,
        }
    }

    /// Determine which sweeps are due, resetting their timers.
    pub fn decisions(&mut self) -> MaintenanceDecisions {
        self.decisions_at(Instant::now())
    }

    fn decisions_at(&mut self, now: Instant) -> MaintenanceDecisions {
        let mut decisions = MaintenanceDecisions::default();

        if now.saturating_duration_since(self.last_refresh) >= self.t_refresh {
            self.last_refresh = now;
            decisions.should_refresh = true;
        }

        if now.saturating_duration_since(self.last_replicate) >= self.t_replicate {
            self.last_replicate = now;
            decisions.should_replicate = true;
        }

        if now.saturating_duration_since(self.last_expire) >= self.t_expire {
            self.last_expire = now;
            decisions.should_expire = true;
        }

        decisions
    }

    /// Decide the fate of `item` held by node `self_id`, as of `now` in milliseconds
    /// since the unix epoch.
    ///
    /// Expiry wins over everything. Items published by others are replicated on
    /// every sweep, our own only once they are older than the republish interval.
    pub fn item_action_at(&self, item: &Item, self_id: &Id, now: u64) -> ItemAction {
        let age = item.age_at(now);

        if age > self.t_expire.as_millis() as u64 {
            ItemAction::Expire
        } else if item.publisher() != self_id {
            ItemAction::Replicate
        } else if age > self.t_republish.as_millis() as u64 {
            ItemAction::Republish
        } else {
            ItemAction::Keep
        }
    }
}
