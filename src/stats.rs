use std::collections::HashMap;

use chrono::Datelike;
use serde_json::Value;

use crate::changes::{ChangeSet, ChangeTag};
use crate::history::parse_date;

pub const MONTHS: usize = 12;

/// Which number a bucket reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Rides,
    Distance,
    Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub rides: u64,
    pub distance: u64,
    pub duration: u64,
}

impl Totals {
    pub fn value(&self, metric: Metric) -> u64 {
        match metric {
            Metric::Rides => self.rides,
            Metric::Distance => self.distance,
            Metric::Duration => self.duration,
        }
    }

    fn add(&mut self, distance: u64, duration: u64) {
        self.rides += 1;
        self.distance += distance;
        self.duration += duration;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsChange {
    History,
    Mode,
    Year,
    MaxValue,
    Total,
}

impl ChangeTag for StatsChange {
    const ALL: &'static [StatsChange] = &[
        StatsChange::History,
        StatsChange::Mode,
        StatsChange::Year,
        StatsChange::MaxValue,
        StatsChange::Total,
    ];
}

/// Monthly/yearly aggregates over the raw history array.
///
/// Every input change triggers a full recount; the history is small
/// (one season of rides) and a single pass keeps arbitrary edits
/// correct without delta bookkeeping.
pub struct HistoryStats {
    history: Vec<Value>,
    mode: Metric,
    year: Option<i32>,
    month_total: [Totals; MONTHS],
    year_total: HashMap<i32, Totals>,
    max_per_month: Totals,
    changes: ChangeSet<StatsChange>,
}

impl HistoryStats {
    pub fn new() -> Self {
        HistoryStats {
            history: Vec::new(),
            mode: Metric::Distance,
            year: None,
            month_total: [Totals::default(); MONTHS],
            year_total: HashMap::new(),
            max_per_month: Totals::default(),
            changes: ChangeSet::new(),
        }
    }

    pub fn mode(&self) -> Metric {
        self.mode
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }

    pub fn set_history(&mut self, history: &[Value]) {
        if self.history.as_slice() == history {
            return;
        }
        let stash = (self.max_value(), self.total());
        self.history = history.to_vec();
        self.recount();
        self.note_observable_changes(stash);
        self.changes.insert(StatsChange::History);
    }

    pub fn set_mode(&mut self, mode: Metric) {
        if self.mode == mode {
            return;
        }
        // Buckets hold all three numbers, so a mode switch is only a
        // change of viewpoint.
        let stash = (self.max_value(), self.total());
        self.mode = mode;
        self.note_observable_changes(stash);
        self.changes.insert(StatsChange::Mode);
    }

    pub fn set_year(&mut self, year: Option<i32>) {
        if self.year == year {
            return;
        }
        let stash = (self.max_value(), self.total());
        self.year = year;
        self.recount();
        self.note_observable_changes(stash);
        self.changes.insert(StatsChange::Year);
    }

    /// Largest per-month value for the current mode and year filter;
    /// the scale for a bar chart.
    pub fn max_value(&self) -> u64 {
        self.max_per_month.value(self.mode)
    }

    /// Total for the current mode under the current year filter; with
    /// no filter, the total over all years.
    pub fn total(&self) -> u64 {
        match self.year {
            Some(year) => self.year_total(year, self.mode),
            None => self
                .year_total
                .values()
                .map(|totals| totals.value(self.mode))
                .sum(),
        }
    }

    /// Total of a given year, ignoring the current filter and mode.
    pub fn year_total(&self, year: i32, metric: Metric) -> u64 {
        self.year_total
            .get(&year)
            .map(|totals| totals.value(metric))
            .unwrap_or(0)
    }

    /// Total of a month (1-12) under the current year filter, for any
    /// metric.
    pub fn month_total(&self, month: u32, metric: Metric) -> u64 {
        if (1..=MONTHS as u32).contains(&month) {
            self.month_total[(month - 1) as usize].value(metric)
        } else {
            0
        }
    }

    pub fn format_month_total(&self, month: u32) -> String {
        format(self.month_total(month, self.mode), self.mode)
    }

    pub fn take_changes(&mut self) -> ChangeSet<StatsChange> {
        self.changes.take()
    }

    fn note_observable_changes(&mut self, stash: (u64, u64)) {
        let (max_value, total) = stash;
        if self.max_value() != max_value {
            self.changes.insert(StatsChange::MaxValue);
        }
        if self.total() != total {
            self.changes.insert(StatsChange::Total);
        }
    }

    fn recount(&mut self) {
        self.month_total = [Totals::default(); MONTHS];
        self.year_total.clear();
        self.max_per_month = Totals::default();

        for entry in &self.history {
            let Some(date) = parse_date(entry.get("departureDate")) else {
                continue;
            };
            let distance = entry.get("distance").and_then(Value::as_u64).unwrap_or(0);
            let duration = entry.get("duration").and_then(Value::as_u64).unwrap_or(0);
            let year = date.year();
            let month = date.month();

            self.year_total
                .entry(year)
                .or_default()
                .add(distance, duration);

            if self.year.is_none() || self.year == Some(year) {
                let bucket = &mut self.month_total[(month - 1) as usize];
                bucket.add(distance, duration);
                self.max_per_month.rides = self.max_per_month.rides.max(bucket.rides);
                self.max_per_month.distance = self.max_per_month.distance.max(bucket.distance);
                self.max_per_month.duration = self.max_per_month.duration.max(bucket.duration);
            }
        }
    }
}

impl Default for HistoryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Short human rendering of a raw value. Callers rely on the exact
/// breakpoints, so keep them stable.
pub fn format(value: u64, metric: Metric) -> String {
    match metric {
        Metric::Rides => value.to_string(),
        Metric::Distance => {
            if value < 1000 {
                format!("{value} m")
            } else if value % 1000 != 0 {
                format!("{:.1} km", value as f64 / 1000.0)
            } else {
                format!("{} km", value / 1000)
            }
        }
        Metric::Duration => {
            if value < 60 {
                format!("{value} sec")
            } else if value < 3600 {
                format!("{} min", value / 60)
            } else if value % 3600 != 0 {
                format!("{} h {} min", value / 3600, (value % 3600) / 60)
            } else {
                format!("{} h", value / 3600)
            }
        }
    }
}

/// Picks a round axis step for a chart: the largest ladder entry that
/// still yields at most `max_steps` steps, stretched by whole multiples
/// when even the largest entry is too fine.
pub fn step(max_value: u64, max_steps: u64, metric: Metric) -> u64 {
    if max_steps == 0 {
        return 0;
    }
    let ladder: &[u64] = match metric {
        Metric::Rides => &[1, 5, 10, 50, 100],
        Metric::Distance => &[1, 10, 100, 500, 1000, 5000, 10000, 50000, 100000],
        Metric::Duration => &[1, 5, 60, 300, 600, 3600],
    };

    let mut i = ladder.len() - 1;
    while i > 0 && ladder[i] * max_steps > max_value {
        i -= 1;
    }
    if ladder[i] > max_value {
        return 0;
    }
    let base = ladder[i];
    let mut step = base;
    while max_value / step > max_steps {
        step += base;
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ride(departure: &str, distance: u64, duration: u64) -> Value {
        json!({
            "bike": "B1",
            "departureDate": departure,
            "departureStation": "Kamppi",
            "returnDate": "2025-06-01T13:00:00Z",
            "returnStation": "Töölö",
            "distance": distance,
            "duration": duration
        })
    }

    fn sample_history() -> Vec<Value> {
        vec![
            ride("2025-06-10T12:00:00Z", 1500, 600),
            ride("2025-06-02T09:00:00Z", 500, 300),
            ride("2025-05-20T18:00:00Z", 3000, 1200),
            ride("2024-06-05T10:00:00Z", 2000, 900),
            json!({"departureDate": "not a date", "distance": 999, "duration": 999}),
        ]
    }

    #[test]
    fn counts_months_and_years() {
        let mut stats = HistoryStats::new();
        stats.set_history(&sample_history());

        assert_eq!(stats.month_total(6, Metric::Rides), 3);
        assert_eq!(stats.month_total(6, Metric::Distance), 4000);
        assert_eq!(stats.month_total(5, Metric::Duration), 1200);
        assert_eq!(stats.year_total(2025, Metric::Distance), 5000);
        assert_eq!(stats.year_total(2024, Metric::Rides), 1);
        assert_eq!(stats.year_total(1999, Metric::Rides), 0);
        assert_eq!(stats.month_total(0, Metric::Rides), 0);
        assert_eq!(stats.month_total(13, Metric::Rides), 0);
    }

    #[test]
    fn recount_is_idempotent() {
        let history = sample_history();
        let mut stats = HistoryStats::new();
        stats.set_history(&history);
        let months: Vec<u64> = (1..=12)
            .map(|m| stats.month_total(m, Metric::Distance))
            .collect();
        let max = stats.max_value();
        let total = stats.total();

        // Forcing a second full pass over the same data.
        stats.set_history(&[]);
        stats.set_history(&history);

        let months_again: Vec<u64> = (1..=12)
            .map(|m| stats.month_total(m, Metric::Distance))
            .collect();
        assert_eq!(months, months_again);
        assert_eq!(stats.max_value(), max);
        assert_eq!(stats.total(), total);
    }

    #[test]
    fn unfiltered_month_equals_sum_of_filtered_years() {
        let history = sample_history();
        let mut stats = HistoryStats::new();
        stats.set_history(&history);

        for month in 1..=12u32 {
            let unfiltered = stats.month_total(month, Metric::Distance);

            let mut summed = 0;
            for year in [2024, 2025] {
                stats.set_year(Some(year));
                summed += stats.month_total(month, Metric::Distance);
            }
            stats.set_year(None);
            assert_eq!(unfiltered, summed, "month {month}");
        }
    }

    #[test]
    fn year_filter_restricts_buckets_and_totals() {
        let mut stats = HistoryStats::new();
        stats.set_history(&sample_history());

        stats.set_year(Some(2024));
        assert_eq!(stats.month_total(6, Metric::Rides), 1);
        assert_eq!(stats.total(), 2000);

        stats.set_year(None);
        assert_eq!(stats.total(), 7000);
    }

    #[test]
    fn max_value_tracks_mode() {
        let mut stats = HistoryStats::new();
        stats.set_history(&sample_history());

        assert_eq!(stats.max_value(), 4000); // distance, June 2024+2025 combined
        stats.set_mode(Metric::Rides);
        assert_eq!(stats.max_value(), 3);
        stats.set_mode(Metric::Duration);
        assert_eq!(stats.max_value(), 1800);
    }

    #[test]
    fn max_and_total_signals_fire_only_on_change() {
        let mut stats = HistoryStats::new();
        stats.set_history(&sample_history());
        stats.take_changes();

        // Rides max (3) and distance max (4000) differ, totals differ too.
        stats.set_mode(Metric::Rides);
        let changes = stats.take_changes();
        assert!(changes.contains(StatsChange::Mode));
        assert!(changes.contains(StatsChange::MaxValue));
        assert!(changes.contains(StatsChange::Total));

        // A filter that selects everything changes nothing observable.
        stats.set_history(&sample_history());
        assert!(stats.take_changes().is_empty());
    }

    #[test]
    fn format_breakpoints() {
        assert_eq!(format(7, Metric::Rides), "7");

        assert_eq!(format(999, Metric::Distance), "999 m");
        assert_eq!(format(1000, Metric::Distance), "1 km");
        assert_eq!(format(1500, Metric::Distance), "1.5 km");
        assert_eq!(format(12000, Metric::Distance), "12 km");

        assert_eq!(format(45, Metric::Duration), "45 sec");
        assert_eq!(format(90, Metric::Duration), "1 min");
        assert_eq!(format(3600, Metric::Duration), "1 h");
        assert_eq!(format(3661, Metric::Duration), "1 h 1 min");
        assert_eq!(format(7200, Metric::Duration), "2 h");
    }

    #[test]
    fn step_picks_round_values() {
        assert_eq!(step(100, 0, Metric::Rides), 0);
        assert_eq!(step(0, 5, Metric::Rides), 0);
        assert_eq!(step(4, 5, Metric::Rides), 1);
        assert_eq!(step(25, 5, Metric::Rides), 5);
        // No ladder entry fits exactly: grow the base by multiples.
        assert_eq!(step(23, 5, Metric::Rides), 4);
        assert_eq!(step(12000, 5, Metric::Distance), 3000);
        assert_eq!(step(3600, 4, Metric::Duration), 1200);
        assert_eq!(step(1000, 2, Metric::Rides), 400);
    }
}
