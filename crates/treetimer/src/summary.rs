//! Read-only region summaries for aggregation outside the library.
//!
//! A [`RegionSummary`] is a detached copy of one timer's statistics. Summaries
//! can be merged by name across threads, or shipped to another process with
//! [`encode`] and [`decode`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, TimerError};
use crate::stats::RegionStats;
use crate::timer::Timer;

/// Statistics of one region on one thread, detached from the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    pub name: String,
    pub stats: RegionStats,
}

impl RegionSummary {
    #[must_use]
    pub fn of(timer: &Timer) -> Self {
        Self {
            name: timer.name().to_owned(),
            stats: *timer.stats(),
        }
    }

    /// Fold in the same region from another thread or process.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if self.name != other.name {
            return Err(TimerError::MergeMismatch {
                left: self.name.clone(),
                right: other.name.clone(),
            });
        }
        self.stats.merge(&other.stats);
        Ok(())
    }
}

/// Merge several per-thread summary lists by region name.
///
/// Regions keep the order in which they are first seen.
pub fn merge_all<I>(lists: I) -> Vec<RegionSummary>
where
    I: IntoIterator<Item = Vec<RegionSummary>>,
{
    let mut merged: Vec<RegionSummary> = Vec::new();
    let mut index = hashbrown::HashMap::new();
    for list in lists {
        for summary in list {
            match index.get(&summary.name) {
                Some(&slot) => {
                    let target: &mut RegionSummary = &mut merged[slot];
                    target.stats.merge(&summary.stats);
                }
                None => {
                    index.insert(summary.name.clone(), merged.len());
                    merged.push(summary);
                }
            }
        }
    }
    merged
}

/// Load balance of one region across threads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreadWork {
    /// Largest wall-clock total on any thread.
    pub max: f64,
    /// `max` minus the total spread evenly over all attached threads.
    pub imbalance: f64,
}

impl ThreadWork {
    /// Compute from the per-thread totals of threads that ran the region.
    /// `nthreads` counts every attached thread, including those that did not.
    #[must_use]
    pub fn from_totals(totals: &[f64], nthreads: usize) -> Option<Self> {
        if totals.is_empty() || nthreads == 0 {
            return None;
        }
        let max = totals.iter().copied().fold(0.0, f64::max);
        let total: f64 = totals.iter().sum();
        Some(Self {
            max,
            imbalance: max - total / nthreads as f64,
        })
    }
}

/// Encode summaries with a little-endian `u32` length prefix.
pub fn encode(summaries: &[RegionSummary]) -> std::result::Result<Vec<u8>, bincode::Error> {
    let data = bincode::serialize(summaries)?;
    let len = data.len() as u32;
    let mut result = Vec::with_capacity(4 + data.len());
    result.extend_from_slice(&len.to_le_bytes());
    result.extend(data);
    Ok(result)
}

/// Decode a length-prefixed buffer produced by [`encode`].
pub fn decode(data: &[u8]) -> std::result::Result<Vec<RegionSummary>, bincode::Error> {
    let Some((prefix, body)) = data.split_first_chunk::<4>() else {
        return Err(Box::new(bincode::ErrorKind::Custom(
            "missing length prefix".into(),
        )));
    };
    let len = u32::from_le_bytes(*prefix) as usize;
    let body = body.get(..len).ok_or_else(|| {
        Box::new(bincode::ErrorKind::Custom(format!(
            "truncated payload: expected {len} bytes, got {}",
            body.len()
        )))
    })?;
    bincode::deserialize(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn summary(name: &str, samples: &[f64]) -> RegionSummary {
        let mut stats = RegionStats::default();
        for (i, &s) in samples.iter().enumerate() {
            stats.wall.record(s, i == 0);
            stats.count += 1;
        }
        RegionSummary {
            name: name.to_owned(),
            stats,
        }
    }

    #[test]
    fn merge_rejects_different_regions() {
        let mut a = summary("a", &[1.0]);
        let err = a.merge(&summary("b", &[1.0])).unwrap_err();
        assert!(matches!(err, TimerError::MergeMismatch { .. }));
        assert_eq!(a.stats.count, 1);
    }

    #[test]
    fn merge_all_groups_by_name_in_first_seen_order() {
        let t0 = vec![summary("solve", &[1.0, 2.0]), summary("io", &[0.5])];
        let t1 = vec![summary("mesh", &[4.0]), summary("solve", &[3.0])];

        let merged = merge_all([t0, t1]);
        let names: Vec<_> = merged.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["solve", "io", "mesh"]);

        let solve = &merged[0].stats;
        assert_eq!(solve.count, 3);
        assert_relative_eq!(solve.wall.accum, 6.0);
        assert_relative_eq!(solve.wall.max, 3.0);
        assert_relative_eq!(solve.wall.min, 1.0);
    }

    #[test]
    fn threadwork_counts_idle_threads() {
        let work = ThreadWork::from_totals(&[3.0, 1.0], 4).unwrap();
        assert_relative_eq!(work.max, 3.0);
        assert_relative_eq!(work.imbalance, 2.0);
        assert!(ThreadWork::from_totals(&[], 4).is_none());
    }

    #[test]
    fn wire_format_survives_transport() {
        let regions = vec![summary("a", &[0.25]), summary("b", &[1.0, 2.0])];
        let bytes = encode(&regions).unwrap();
        assert_eq!(
            u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize,
            bytes.len() - 4
        );
        assert_eq!(decode(&bytes).unwrap(), regions);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let bytes = encode(&[summary("a", &[1.0])]).unwrap();
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode(&bytes[..2]).is_err());
    }
}
