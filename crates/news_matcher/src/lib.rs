use chrono::NaiveTime;
use core_types::{parse_time_of_day, NewsEvent, RawNewsRow};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Proximity window per impact tier, in minutes. The stronger the event,
/// the wider the window in which it is considered "nearby".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NewsWindows {
    pub impact1_min: i64,
    pub impact2_min: i64,
    pub impact3_min: i64,
}

impl Default for NewsWindows {
    fn default() -> Self {
        Self {
            impact1_min: 10,
            impact2_min: 30,
            impact3_min: 60,
        }
    }
}

impl NewsWindows {
    /// Window in seconds for an impact tier. Impact 0 has no window.
    fn window_secs(&self, impact: u8) -> Option<i64> {
        let minutes = match impact {
            1 => self.impact1_min,
            2 => self.impact2_min,
            3 => self.impact3_min,
            _ => return None,
        };
        Some(minutes * 60)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewsProximity {
    /// Event with the smallest non-negative `reference - event` delta.
    pub nearest_past: Option<NewsEvent>,
    /// Event with the smallest absolute delta among future events.
    pub nearest_future: Option<NewsEvent>,
    /// Highest-impact event inside its impact-specific window, if any.
    pub qualifying_impact_event: Option<NewsEvent>,
}

#[derive(Debug, Clone)]
pub struct NewsMatcher {
    windows: NewsWindows,
}

impl NewsMatcher {
    pub fn new(windows: NewsWindows) -> Self {
        Self { windows }
    }

    /// Single pass over the calendar snapshot. No ordering precondition;
    /// rows with an unreadable time cell are skipped, not fatal. Deltas
    /// are time-of-day only, same trading day.
    pub fn match_events(&self, reference: NaiveTime, rows: &[RawNewsRow]) -> NewsProximity {
        let mut nearest_past: Option<(i64, NewsEvent)> = None;
        let mut nearest_future: Option<(i64, NewsEvent)> = None;
        let mut qualifying: Option<(u8, NewsEvent)> = None;

        for row in rows {
            let Some(event) = decode_row(row) else {
                tracing::warn!(time = %row.time, text = %row.text, "skipping news row with unreadable time");
                continue;
            };

            let delta = reference.signed_duration_since(event.time).num_seconds();
            if delta >= 0 {
                if nearest_past.as_ref().map_or(true, |(d, _)| delta < *d) {
                    nearest_past = Some((delta, event.clone()));
                }
            } else if nearest_future.as_ref().map_or(true, |(d, _)| -delta < *d) {
                nearest_future = Some((-delta, event.clone()));
            }

            if let Some(window) = self.windows.window_secs(event.impact) {
                // Strictly higher impact replaces; ties keep the first seen.
                if delta.abs() <= window
                    && qualifying.as_ref().map_or(true, |(imp, _)| event.impact > *imp)
                {
                    qualifying = Some((event.impact, event));
                }
            }
        }

        NewsProximity {
            nearest_past: nearest_past.map(|(_, e)| e),
            nearest_future: nearest_future.map(|(_, e)| e),
            qualifying_impact_event: qualifying.map(|(_, e)| e),
        }
    }
}

/// Decode one scraped row. An unreadable time rejects the row; an
/// unreadable impact cell degrades to 0 (present but never qualifying).
fn decode_row(row: &RawNewsRow) -> Option<NewsEvent> {
    let time = parse_time_of_day(&row.time)?;
    let impact = row.impact.trim().parse::<u8>().unwrap_or(0).min(3);
    Some(NewsEvent {
        time,
        currency: SmolStr::new(row.currency.trim()),
        impact,
        text: row.text.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(time: &str, currency: &str, impact: &str, text: &str) -> RawNewsRow {
        RawNewsRow {
            time: time.to_string(),
            currency: currency.to_string(),
            impact: impact.to_string(),
            text: text.to_string(),
        }
    }

    fn reference(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
    }

    #[test]
    fn nearest_past_and_future_from_unordered_rows() {
        let rows = vec![
            row("17:30", "USD", "1", "late event"),
            row("14:00", "EUR", "1", "early event"),
            row("15:45", "USD", "1", "just before"),
            row("16:10", "GBP", "1", "just after"),
        ];
        let got = NewsMatcher::new(NewsWindows::default()).match_events(reference(16, 0), &rows);
        assert_eq!(got.nearest_past.expect("past").text, "just before");
        assert_eq!(got.nearest_future.expect("future").text, "just after");
    }

    #[test]
    fn event_at_reference_counts_as_past() {
        let rows = vec![row("16:00", "USD", "2", "on the dot")];
        let got = NewsMatcher::new(NewsWindows::default()).match_events(reference(16, 0), &rows);
        assert_eq!(got.nearest_past.expect("past").text, "on the dot");
        assert!(got.nearest_future.is_none());
    }

    #[test]
    fn impact_windows_gate_qualification() {
        // Impact 1 at 15min is outside its 10min window; impact 3 at
        // 45min is inside its 60min window.
        let rows = vec![
            row("16:15", "USD", "1", "minor"),
            row("16:45", "USD", "3", "major"),
        ];
        let got = NewsMatcher::new(NewsWindows::default()).match_events(reference(16, 0), &rows);
        assert_eq!(got.qualifying_impact_event.expect("qualifier").text, "major");
    }

    #[test]
    fn highest_impact_wins_ties_keep_first_seen() {
        let rows = vec![
            row("16:05", "USD", "2", "first mid"),
            row("16:06", "EUR", "2", "second mid"),
            row("16:20", "USD", "3", "heavy"),
        ];
        let got = NewsMatcher::new(NewsWindows::default()).match_events(reference(16, 0), &rows);
        assert_eq!(got.qualifying_impact_event.expect("qualifier").text, "heavy");

        let rows = vec![
            row("16:05", "USD", "2", "first mid"),
            row("16:06", "EUR", "2", "second mid"),
        ];
        let got = NewsMatcher::new(NewsWindows::default()).match_events(reference(16, 0), &rows);
        assert_eq!(
            got.qualifying_impact_event.expect("qualifier").text,
            "first mid"
        );
    }

    #[test]
    fn malformed_time_skipped_malformed_impact_degrades() {
        let rows = vec![
            row("soon", "USD", "3", "unreadable time"),
            row("16:01", "USD", "high", "unreadable impact"),
        ];
        let got = NewsMatcher::new(NewsWindows::default()).match_events(reference(16, 0), &rows);
        // The unreadable-impact row survives as impact 0: visible as a
        // neighbour, never a qualifier.
        assert_eq!(got.nearest_future.expect("future").impact, 0);
        assert!(got.qualifying_impact_event.is_none());
    }

    #[test]
    fn empty_snapshot_yields_empty_proximity() {
        let got = NewsMatcher::new(NewsWindows::default()).match_events(reference(16, 0), &[]);
        assert_eq!(got, NewsProximity::default());
    }
}
