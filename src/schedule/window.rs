use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::config::model::Scalar;

/// When a client may run: optional weekday and day-of-month filters plus the
/// daily clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub weekdays: Option<Vec<Weekday>>,
    pub days_of_month: Option<Vec<u32>>,
    pub time: NaiveTime,
}

impl ScheduleWindow {
    pub fn daily(time: NaiveTime) -> Self {
        Self {
            weekdays: None,
            days_of_month: None,
            time,
        }
    }

    pub fn weekday_allowed(&self, date: NaiveDate) -> bool {
        match &self.weekdays {
            Some(days) => days.contains(&date.weekday()),
            None => true,
        }
    }

    pub fn day_of_month_allowed(&self, date: NaiveDate) -> bool {
        match &self.days_of_month {
            Some(days) => days.contains(&date.day()),
            None => true,
        }
    }

    /// First watermark for a client that has none: today at the configured
    /// time, or tomorrow if that moment is already reached.
    pub fn first_watermark(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.time);
        if now >= today {
            today + Duration::days(1)
        } else {
            today
        }
    }

    pub fn describe_weekdays(&self) -> String {
        match &self.weekdays {
            Some(days) => days
                .iter()
                .map(|d| d.to_string().to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join(","),
            None => "*".to_string(),
        }
    }

    pub fn describe_days_of_month(&self) -> String {
        match &self.days_of_month {
            Some(days) => days
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(","),
            None => "*".to_string(),
        }
    }
}

/// Parses `mon,Wed,friday`; each entry is matched on its first three letters.
pub fn parse_weekdays(value: &str) -> Result<Vec<Weekday>, String> {
    let mut days = Vec::new();
    for item in value.split(',') {
        let item = item.trim().to_ascii_lowercase();
        if item.is_empty() {
            continue;
        }
        let prefix: String = item.chars().take(3).collect();
        let day = prefix
            .parse::<Weekday>()
            .map_err(|_| format!("invalid weekday {}", item))?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(format!("weekday list {:?} is empty", value));
    }
    Ok(days)
}

pub fn parse_days_of_month(value: &Scalar) -> Result<Vec<u32>, String> {
    let text = value.to_string();
    let mut days = Vec::new();
    for item in text.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let day: u32 = item
            .parse()
            .map_err(|_| format!("invalid day of month {}", item))?;
        if !(1..=31).contains(&day) {
            return Err(format!("day of month {} out of range 1-31", day));
        }
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(format!("day-of-month list {:?} is empty", text));
    }
    Ok(days)
}

/// Parses a clock time written as `HHMM` or `HH:MM`.
pub fn parse_time_of_day(value: &Scalar) -> Result<NaiveTime, String> {
    let text = match value {
        Scalar::Number(n) if (0..=2359).contains(n) => format!("{:04}", n),
        Scalar::Number(n) => return Err(format!("invalid time {}", n)),
        Scalar::Text(s) => s.trim().replace(':', ""),
    };
    if text.len() != 4 || !text.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid time {}; expected HHMM", value));
    }
    let hour: u32 = text[..2].parse().map_err(|_| format!("invalid time {}", value))?;
    let minute: u32 = text[2..].parse().map_err(|_| format!("invalid time {}", value))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| format!("invalid time {}", value))
}
