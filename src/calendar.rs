//! Timestamp parsing and calendar-day labelling.
//!
//! Wire timestamps are normalised to RFC 3339. Older records may still carry
//! a naive ISO string (treated as UTC); anything else is kept verbatim for
//! display and never produces a date separator.

use chrono::{DateTime, Days, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, Utc};

/// Converts wire timestamps into display strings and calendar days in one
/// fixed UTC offset.
#[derive(Debug, Clone)]
pub struct Calendar {
    offset: FixedOffset,
    /// Pins "today" for deterministic rendering; `None` reads the clock.
    pinned_today: Option<NaiveDate>,
}

impl Calendar {
    /// Calendar in the host's current local offset.
    pub fn local() -> Self {
        Self {
            offset: Local::now().offset().fix(),
            pinned_today: None,
        }
    }

    /// Calendar in an explicit offset (minutes east of UTC). Out-of-range
    /// values fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        Self {
            offset,
            pinned_today: None,
        }
    }

    /// Freeze "today" at `today`.
    pub fn pinned(mut self, today: NaiveDate) -> Self {
        self.pinned_today = Some(today);
        self
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn today(&self) -> NaiveDate {
        self.pinned_today
            .unwrap_or_else(|| Utc::now().with_timezone(&self.offset).date_naive())
    }

    /// Current instant, formatted for the wire.
    pub fn now_wire(&self) -> String {
        Utc::now().with_timezone(&self.offset).to_rfc3339()
    }

    /// Parse a wire timestamp into this calendar's offset.
    pub fn parse(&self, raw: &str) -> Option<DateTime<FixedOffset>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&self.offset));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc().with_timezone(&self.offset))
    }

    /// Calendar day of `raw`, if it parses.
    pub fn day_of(&self, raw: &str) -> Option<NaiveDate> {
        self.parse(raw).map(|dt| dt.date_naive())
    }

    /// `HH:MM` for a parseable timestamp, the raw string otherwise.
    pub fn time_of_day(&self, raw: &str) -> String {
        match self.parse(raw) {
            Some(dt) => dt.format("%H:%M").to_string(),
            None => raw.to_string(),
        }
    }

    /// "Today", "Yesterday", or e.g. "January 1, 2024".
    pub fn day_label(&self, day: NaiveDate) -> String {
        let today = self.today();
        if day == today {
            "Today".to_string()
        } else if today.checked_sub_days(Days::new(1)) == Some(day) {
            "Yesterday".to_string()
        } else {
            day.format("%B %-d, %Y").to_string()
        }
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::local()
    }
}

/// Stable key for a calendar day, used by the separator memo.
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}
