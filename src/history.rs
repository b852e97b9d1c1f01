use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// One bike rental, parsed from a raw history entry. Fields the portal
/// sends but the client never uses (e.g. `providerName`) stay in the
/// raw entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ride {
    pub bike: String,
    pub departure_date: Option<DateTime<Utc>>,
    pub departure_station: String,
    pub return_date: Option<DateTime<Utc>>,
    pub return_station: String,
    pub distance: u32,
    pub duration: u32,
    /// 1-12, derived from the departure date.
    pub month: Option<u32>,
}

impl Ride {
    pub fn from_json(entry: &Value) -> Ride {
        let departure_date = parse_date(entry.get("departureDate"));
        Ride {
            bike: string_field(entry, "bike"),
            departure_date,
            departure_station: string_field(entry, "departureStation"),
            return_date: parse_date(entry.get("returnDate")),
            return_station: string_field(entry, "returnStation"),
            distance: int_field(entry, "distance"),
            duration: int_field(entry, "duration"),
            month: departure_date.map(|date| date.month()),
        }
    }

    /// A ride is open when it has a departure but no recorded return.
    pub fn in_progress(&self) -> bool {
        self.departure_date.is_some()
            && !self.departure_station.is_empty()
            && self.return_date.is_none()
            && self.return_station.is_empty()
    }

    /// Elapsed seconds of an open ride as of `now`, never negative.
    pub fn duration_at(&self, now: DateTime<Utc>) -> u32 {
        self.departure_date
            .map(|departure| (now - departure).num_seconds().max(0) as u32)
            .unwrap_or(0)
    }
}

/// ISO-8601 with or without a zone designator; zoneless values are
/// taken as UTC. Anything else is "no date".
pub(crate) fn parse_date(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let text = value?.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .map(|date| date.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}

fn string_field(entry: &Value, key: &str) -> String {
    entry
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn int_field(entry: &Value, key: &str) -> u32 {
    entry.get(key).and_then(Value::as_u64).unwrap_or(0) as u32
}

/// Row-indexed view over the history for presentation: optional year,
/// month and row-count filters, rows in history order (latest first).
#[derive(Debug, Default)]
pub struct RideList {
    history: Vec<Value>,
    rides: Vec<Ride>,
    year: Option<i32>,
    month: Option<u32>,
    max_count: Option<usize>,
}

impl RideList {
    pub fn new() -> Self {
        RideList::default()
    }

    pub fn set_history(&mut self, history: &[Value]) {
        self.history = history.to_vec();
        self.rebuild();
    }

    pub fn set_year(&mut self, year: Option<i32>) {
        if self.year != year {
            self.year = year;
            self.rebuild();
        }
    }

    pub fn set_month(&mut self, month: Option<u32>) {
        if self.month != month {
            self.month = month;
            self.rebuild();
        }
    }

    pub fn set_max_count(&mut self, max_count: Option<usize>) {
        if self.max_count != max_count {
            self.max_count = max_count;
            self.rebuild();
        }
    }

    pub fn rows(&self) -> &[Ride] {
        &self.rides
    }

    pub fn in_progress(&self) -> bool {
        self.rides.first().is_some_and(Ride::in_progress)
    }

    /// Refreshes the open ride's running duration. Returns true when
    /// the first row changed; the duration only ever grows.
    pub fn tick(&mut self, now: DateTime<Utc>) -> bool {
        let Some(first) = self.rides.first_mut() else {
            return false;
        };
        if !first.in_progress() {
            return false;
        }
        let elapsed = first.duration_at(now);
        if elapsed > first.duration {
            first.duration = elapsed;
            true
        } else {
            false
        }
    }

    fn accept(&self, ride: &Ride) -> bool {
        if self.year.is_none() && self.month.is_none() {
            return true;
        }
        let Some(date) = ride.departure_date else {
            return false;
        };
        if let Some(year) = self.year {
            if date.year() != year {
                return false;
            }
        }
        if let Some(month) = self.month {
            if date.month() != month {
                return false;
            }
        }
        true
    }

    fn rebuild(&mut self) {
        let limit = self.max_count.unwrap_or(usize::MAX);
        self.rides = self
            .history
            .iter()
            .map(Ride::from_json)
            .filter(|ride| self.accept(ride))
            .take(limit)
            .collect();
        log::debug!("{} ride(s) after filtering", self.rides.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn closed_ride(departure: &str) -> Value {
        json!({
            "bike": "B123",
            "departureDate": departure,
            "departureStation": "Kamppi",
            "returnDate": "2025-06-01T13:05:00Z",
            "returnStation": "Töölö",
            "distance": 2400,
            "duration": 780,
            "providerName": "HSL"
        })
    }

    fn open_ride(departure: &str) -> Value {
        json!({
            "bike": "B777",
            "departureDate": departure,
            "departureStation": "Kamppi",
            "returnDate": null,
            "returnStation": "",
            "distance": 0,
            "duration": 0
        })
    }

    #[test]
    fn parses_fields_and_month() {
        let ride = Ride::from_json(&closed_ride("2025-06-01T12:52:00Z"));
        assert_eq!(ride.bike, "B123");
        assert_eq!(ride.departure_station, "Kamppi");
        assert_eq!(ride.distance, 2400);
        assert_eq!(ride.duration, 780);
        assert_eq!(ride.month, Some(6));
        assert!(!ride.in_progress());
    }

    #[test]
    fn in_progress_needs_departure_and_no_return() {
        assert!(Ride::from_json(&open_ride("2025-06-01T12:52:00Z")).in_progress());

        // Missing departure date
        let ride = Ride::from_json(&json!({
            "departureStation": "Kamppi", "returnStation": ""
        }));
        assert!(!ride.in_progress());

        // Return station recorded but no return date
        let ride = Ride::from_json(&json!({
            "departureDate": "2025-06-01T12:52:00Z",
            "departureStation": "Kamppi",
            "returnStation": "Töölö"
        }));
        assert!(!ride.in_progress());

        // Empty departure station
        let ride = Ride::from_json(&json!({
            "departureDate": "2025-06-01T12:52:00Z",
            "departureStation": "",
            "returnStation": ""
        }));
        assert!(!ride.in_progress());
    }

    #[test]
    fn date_parsing_accepts_offsets_and_naive_forms() {
        assert!(parse_date(Some(&json!("2025-06-01T12:52:00Z"))).is_some());
        assert!(parse_date(Some(&json!("2025-06-01T12:52:00+03:00"))).is_some());
        assert!(parse_date(Some(&json!("2025-06-01T12:52:00"))).is_some());
        assert!(parse_date(Some(&json!("yesterday"))).is_none());
        assert!(parse_date(Some(&json!(null))).is_none());
        assert!(parse_date(None).is_none());
    }

    #[test]
    fn live_duration_never_negative() {
        let ride = Ride::from_json(&open_ride("2025-06-01T12:00:00Z"));
        let before_departure = "2025-06-01T11:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(ride.duration_at(before_departure), 0);

        let later = "2025-06-01T12:00:42Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(ride.duration_at(later), 42);
    }

    #[test]
    fn filters_by_year_and_month() {
        let history = vec![
            closed_ride("2025-06-01T12:00:00Z"),
            closed_ride("2025-05-10T09:00:00Z"),
            closed_ride("2024-06-20T18:00:00Z"),
        ];
        let mut list = RideList::new();
        list.set_history(&history);
        assert_eq!(list.rows().len(), 3);

        list.set_year(Some(2025));
        assert_eq!(list.rows().len(), 2);

        list.set_month(Some(6));
        assert_eq!(list.rows().len(), 1);

        list.set_year(None);
        assert_eq!(list.rows().len(), 2); // June of any year

        list.set_month(None);
        list.set_max_count(Some(2));
        assert_eq!(list.rows().len(), 2);
    }

    #[test]
    fn tick_grows_open_ride_duration() {
        let departure = Utc::now() - Duration::seconds(10);
        let history = vec![open_ride(&departure.to_rfc3339())];
        let mut list = RideList::new();
        list.set_history(&history);
        assert!(list.in_progress());

        let now = Utc::now();
        assert!(list.tick(now));
        let first = list.rows()[0].duration;
        assert!(first >= 9);

        // Same instant: nothing to report.
        assert!(!list.tick(now));

        assert!(list.tick(now + Duration::seconds(2)));
        assert!(list.rows()[0].duration > first);
    }

    #[test]
    fn tick_ignores_closed_rides() {
        let history = vec![closed_ride("2025-06-01T12:00:00Z")];
        let mut list = RideList::new();
        list.set_history(&history);
        assert!(!list.in_progress());
        assert!(!list.tick(Utc::now()));
        assert_eq!(list.rows()[0].duration, 780);
    }
}
