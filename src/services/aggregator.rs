//! Aggregator
//!
//! Rolls interval statistics up per zone: intervals → daily → monthly →
//! yearly → total. Each level is the sum of the level below, which is exact
//! because [`SufficientStats`] only holds sums. MetricSets are never averaged.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::interval::IntervalRecord;
use crate::models::period::{Granularity, PeriodKey};
use crate::models::zone::BiddingZone;
use crate::services::capture_metrics::SufficientStats;

/// All summary levels computed for one zone
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneAggregate {
    pub zone: BiddingZone,
    pub daily: BTreeMap<NaiveDate, SufficientStats>,
    pub monthly: BTreeMap<NaiveDate, SufficientStats>,
    pub yearly: BTreeMap<NaiveDate, SufficientStats>,
    pub total: SufficientStats,
}

impl ZoneAggregate {
    pub fn is_empty(&self) -> bool {
        self.total.is_empty()
    }

    pub fn level(&self, granularity: Granularity) -> BTreeMap<NaiveDate, SufficientStats> {
        match granularity {
            Granularity::Daily => self.daily.clone(),
            Granularity::Monthly => self.monthly.clone(),
            Granularity::Yearly => self.yearly.clone(),
            Granularity::Total => {
                let mut total = BTreeMap::new();
                if !self.total.is_empty() {
                    total.insert(PeriodKey::total(self.zone).period_start, self.total);
                }
                total
            }
        }
    }

    /// Summary rows to persist. Daily rows are optional since drill-down can
    /// be recomputed from intervals.
    pub fn rows(&self, include_daily: bool) -> Vec<(PeriodKey, SufficientStats)> {
        let mut granularities = vec![Granularity::Monthly, Granularity::Yearly, Granularity::Total];
        if include_daily {
            granularities.insert(0, Granularity::Daily);
        }

        granularities
            .into_iter()
            .flat_map(|granularity| {
                self.level(granularity)
                    .into_iter()
                    .map(move |(start, stats)| {
                        (PeriodKey::new(self.zone, granularity, start), stats)
                    })
            })
            .collect()
    }
}

/// Daily statistics for one zone, keyed by UTC date
pub fn daily_series(
    zone: BiddingZone,
    records: &[IntervalRecord],
) -> BTreeMap<NaiveDate, SufficientStats> {
    let mut daily: BTreeMap<NaiveDate, SufficientStats> = BTreeMap::new();
    let mut foreign = 0usize;

    for record in records {
        if record.zone != zone {
            foreign += 1;
            continue;
        }
        daily
            .entry(Granularity::Daily.period_start_of(record.timestamp_start))
            .or_default()
            .accumulate(record);
    }

    if foreign > 0 {
        debug!(zone = %zone, foreign, "Ignored records of other zones");
    }

    daily
}

/// Re-buckets finer statistics into `granularity` periods by summation
pub fn rollup(
    granularity: Granularity,
    finer: &BTreeMap<NaiveDate, SufficientStats>,
) -> BTreeMap<NaiveDate, SufficientStats> {
    let mut coarse: BTreeMap<NaiveDate, SufficientStats> = BTreeMap::new();
    for (start, stats) in finer {
        *coarse.entry(granularity.period_start(*start)).or_default() += stats;
    }
    coarse
}

/// Full aggregation of one zone's interval records
pub fn aggregate_zone(zone: BiddingZone, records: &[IntervalRecord]) -> ZoneAggregate {
    let daily = daily_series(zone, records);
    let monthly = rollup(Granularity::Monthly, &daily);
    let yearly = rollup(Granularity::Yearly, &monthly);
    let total: SufficientStats = yearly.values().sum();

    ZoneAggregate {
        zone,
        daily,
        monthly,
        yearly,
        total,
    }
}
