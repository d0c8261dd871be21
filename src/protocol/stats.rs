//! STATS reply aggregation.
//!
//! Each STATS line is dispatched through a prefix table; `END` closes
//! the reply and any other line is an error, since the aggregate has no
//! meaningful partial form.

use serde::{Deserialize, Serialize};

use super::record::ScanResult;
use crate::error::{ClamdError, Result};

/// Final record of a STATS reply.
pub const STATS_END: &str = "END";

/// Daemon statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Number of memory pools (value only).
    pub pools: String,
    /// Full `STATE:` line.
    pub state: String,
    /// Full `THREADS:` line.
    pub threads: String,
    /// Full `MEMSTATS:` line.
    pub memstats: String,
    /// Full `QUEUE:` line.
    pub queue: String,
}

type FieldSetter = fn(&mut Stats, &str);

/// Recognized line prefixes and the field each one fills.
const STATS_FIELDS: &[(&str, FieldSetter)] = &[
    ("POOLS", set_pools),
    ("STATE", set_state),
    ("THREADS", set_threads),
    ("QUEUE", set_queue),
    ("MEMSTATS", set_memstats),
];

/// `POOLS: 1` -> `1`
fn set_pools(stats: &mut Stats, raw: &str) {
    stats.pools = raw["POOLS".len()..]
        .trim_start_matches(':')
        .trim()
        .to_string();
}

fn set_state(stats: &mut Stats, raw: &str) {
    stats.state = raw.to_string();
}

fn set_threads(stats: &mut Stats, raw: &str) {
    stats.threads = raw.to_string();
}

fn set_queue(stats: &mut Stats, raw: &str) {
    stats.queue = raw.to_string();
}

fn set_memstats(stats: &mut Stats, raw: &str) {
    stats.memstats = raw.to_string();
}

impl Stats {
    /// Apply one STATS line.
    ///
    /// # Errors
    ///
    /// Returns `Decode` naming the line when no prefix matches.
    pub fn apply(&mut self, raw: &str) -> Result<()> {
        if raw == STATS_END {
            return Ok(());
        }

        match STATS_FIELDS
            .iter()
            .find(|(prefix, _)| raw.starts_with(*prefix))
        {
            Some((_, set)) => {
                set(self, raw);
                Ok(())
            }
            None => Err(ClamdError::Decode(format!(
                "Unknown STATS response, got {:?}",
                raw
            ))),
        }
    }

    /// Build from a complete list of records.
    pub fn from_records<'a, I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a ScanResult>,
    {
        let mut stats = Stats::default();
        for record in records {
            stats.apply(&record.raw)?;
        }
        Ok(stats)
    }
}
