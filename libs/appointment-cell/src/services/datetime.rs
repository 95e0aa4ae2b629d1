// libs/appointment-cell/src/services/datetime.rs
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use crate::models::{ClinicHours, ParseError};

const MONTHS: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?";

static ORDINAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})(?:st|nd|rd|th)\b").expect("valid regex"));

static TIME_12H: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\s*(a\.?m\.?|p\.?m\.?)(?:\s|$|[^a-z])")
        .expect("valid regex")
});

static TIME_24H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("valid regex"));

static AT_HOUR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:at|@)\s*(\d{1,2})\b").expect("valid regex"));

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("valid regex"));

static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{2}|\d{4}))?\b").expect("valid regex"));

static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b{}\s+(\d{{1,2}})\b(?:\s+(\d{{4}})\b)?", MONTHS)).expect("valid regex")
});

static DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b(\d{{1,2}})\s+(?:of\s+)?{}(?:\s+(\d{{4}})\b)?", MONTHS))
        .expect("valid regex")
});

static WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:(next|this|on)\s+)?(monday|mon|tuesday|tues|tue|wednesday|wed|thursday|thurs|thu|friday|fri|saturday|sat|sunday|sun)\b",
    )
    .expect("valid regex")
});

static DAY_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(morning|noon|midday|afternoon|evening|tonight)\b").expect("valid regex")
});

/// Calendar day named by the utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateSpec {
    /// A fully specified date.
    Exact(NaiveDate),
    /// Month and day; resolves to the next occurrence on or after now.
    MonthDay { month: u32, day: u32 },
    /// Days from today: 0 today, 1 tomorrow, -1 yesterday.
    RelativeDays(i64),
    Weekday { weekday: Weekday, skip_today: bool },
}

/// Turns natural-language date/time phrases into UTC instants, interpreting
/// them in the clinic's timezone.
#[derive(Debug, Clone, Copy)]
pub struct DatetimeResolver {
    timezone: Tz,
    default_hour: u32,
}

impl DatetimeResolver {
    pub fn new(timezone: Tz, default_hour: u32) -> Self {
        Self { timezone, default_hour }
    }

    pub fn from_hours(hours: &ClinicHours) -> Self {
        Self::new(hours.timezone, hours.open_hour)
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Resolves `text` against `reference_now`.
    ///
    /// Errors with `PastDate` when the phrase lands strictly before
    /// `reference_now`, and `Unparseable` when no date or time can be read or
    /// a component is out of range.
    pub fn resolve(&self, text: &str, reference_now: DateTime<Utc>) -> Result<DateTime<Utc>, ParseError> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Err(ParseError::Unparseable);
        }

        let (time, remainder) = extract_time(&normalized)?;
        let date = extract_date(&remainder)?;

        let today = reference_now.with_timezone(&self.timezone).date_naive();

        let resolved = match (date, time) {
            (None, None) => {
                debug!("No date or time found in '{}'", text);
                return Err(ParseError::Unparseable);
            }
            (Some(spec), time) => {
                let time = time.unwrap_or_else(|| self.default_time());
                let date = self.resolve_date(spec, today, time, reference_now)?;
                self.localize(date, time)?
            }
            (None, Some(time)) => {
                // Bare clock time: the nearest occurrence still ahead.
                let candidate = self.localize(today, time)?;
                if candidate >= reference_now {
                    candidate
                } else {
                    let tomorrow = today.succ_opt().ok_or(ParseError::Unparseable)?;
                    self.localize(tomorrow, time)?
                }
            }
        };

        if resolved < reference_now {
            debug!("'{}' resolved to {} which is before {}", text, resolved, reference_now);
            return Err(ParseError::PastDate);
        }

        Ok(resolved)
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    fn default_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.default_hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN)
    }

    fn resolve_date(
        &self,
        spec: DateSpec,
        today: NaiveDate,
        time: NaiveTime,
        reference_now: DateTime<Utc>,
    ) -> Result<NaiveDate, ParseError> {
        match spec {
            DateSpec::Exact(date) => Ok(date),
            DateSpec::RelativeDays(days) => Ok(today + Duration::days(days)),
            DateSpec::MonthDay { month, day } => {
                // Next occurrence: a date already behind us this year means next year.
                // Feb 29 may need up to four years to land on a leap year.
                for year in today.year()..=today.year() + 4 {
                    if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                        if self.localize(date, time)? >= reference_now {
                            return Ok(date);
                        }
                    }
                }
                Err(ParseError::Unparseable)
            }
            DateSpec::Weekday { weekday, skip_today } => {
                let mut days_ahead = (7 + weekday.num_days_from_monday() as i64
                    - today.weekday().num_days_from_monday() as i64)
                    % 7;

                if days_ahead == 0 {
                    let still_ahead = self.localize(today, time)? >= reference_now;
                    if skip_today || !still_ahead {
                        days_ahead = 7;
                    }
                }

                Ok(today + Duration::days(days_ahead))
            }
        }
    }

    fn localize(&self, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>, ParseError> {
        self.timezone
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or(ParseError::Unparseable)
    }
}

fn normalize(text: &str) -> String {
    let lowered = text.trim().to_lowercase().replace([',', '?', '!'], " ");
    let stripped = ORDINAL_SUFFIX.replace_all(&lowered, "$1");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pulls the clock time out of `text`, returning it with the remaining text
/// so date patterns never see the time's digits.
fn extract_time(text: &str) -> Result<(Option<NaiveTime>, String), ParseError> {
    if let Some(caps) = TIME_12H.captures(text) {
        let hour = parse_number(&caps, 1)?;
        let minute = match caps.get(2) {
            Some(_) => parse_number(&caps, 2)?,
            None => 0,
        };
        let is_pm = caps.get(3).map(|m| m.as_str().starts_with('p')).unwrap_or(false);

        if !(1..=12).contains(&hour) {
            return Err(ParseError::Unparseable);
        }
        let hour = match (hour, is_pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };

        let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or(ParseError::Unparseable)?;
        return Ok((Some(time), remove_match(text, &caps)));
    }

    if let Some(caps) = TIME_24H.captures(text) {
        let hour = parse_number(&caps, 1)?;
        let minute = parse_number(&caps, 2)?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or(ParseError::Unparseable)?;
        return Ok((Some(time), remove_match(text, &caps)));
    }

    if let Some(caps) = AT_HOUR.captures(text) {
        let hour = parse_number(&caps, 1)?;
        // "at 2" means 2 PM during clinic hours.
        let hour = match hour {
            1..=7 => hour + 12,
            8..=23 => hour,
            _ => return Err(ParseError::Unparseable),
        };
        let time = NaiveTime::from_hms_opt(hour, 0, 0).ok_or(ParseError::Unparseable)?;
        return Ok((Some(time), remove_match(text, &caps)));
    }

    if let Some(caps) = DAY_PART.captures(text) {
        let hour = match caps.get(1).map(|m| m.as_str()) {
            Some("morning") => 9,
            Some("noon") | Some("midday") => 12,
            Some("afternoon") => 14,
            _ => 17,
        };
        let time = NaiveTime::from_hms_opt(hour, 0, 0).ok_or(ParseError::Unparseable)?;
        let remainder = match caps.get(1).map(|m| m.as_str()) {
            // "tonight" also names the day.
            Some("tonight") => format!("{} today", remove_match(text, &caps)),
            _ => remove_match(text, &caps),
        };
        return Ok((Some(time), remainder));
    }

    Ok((None, text.to_string()))
}

fn extract_date(text: &str) -> Result<Option<DateSpec>, ParseError> {
    if let Some(caps) = ISO_DATE.captures(text) {
        let year = parse_number(&caps, 1)? as i32;
        let month = parse_number(&caps, 2)?;
        let day = parse_number(&caps, 3)?;
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(ParseError::Unparseable)?;
        return Ok(Some(DateSpec::Exact(date)));
    }

    if let Some(caps) = NUMERIC_DATE.captures(text) {
        let month = parse_number(&caps, 1)?;
        let day = parse_number(&caps, 2)?;
        return match caps.get(3) {
            Some(year) => {
                let mut year = year.as_str().parse::<i32>().map_err(|_| ParseError::Unparseable)?;
                if year < 100 {
                    year += 2000;
                }
                let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(ParseError::Unparseable)?;
                Ok(Some(DateSpec::Exact(date)))
            }
            None => month_day(month, day),
        };
    }

    if let Some(caps) = MONTH_DAY.captures(text) {
        let month = month_number(caps.get(1).map(|m| m.as_str()).unwrap_or_default())?;
        let day = parse_number(&caps, 2)?;
        return with_optional_year(month, day, caps.get(3).map(|m| m.as_str()));
    }

    if let Some(caps) = DAY_MONTH.captures(text) {
        let day = parse_number(&caps, 1)?;
        let month = month_number(caps.get(2).map(|m| m.as_str()).unwrap_or_default())?;
        return with_optional_year(month, day, caps.get(3).map(|m| m.as_str()));
    }

    Ok(relative_day(text).or_else(|| weekday(text)))
}

fn relative_day(text: &str) -> Option<DateSpec> {
    let offset = if text.contains("day after tomorrow") {
        2
    } else if text.contains("tomorrow") {
        1
    } else if text.contains("yesterday") {
        -1
    } else if text.contains("today") {
        0
    } else {
        return None;
    };
    Some(DateSpec::RelativeDays(offset))
}

fn with_optional_year(month: u32, day: u32, year: Option<&str>) -> Result<Option<DateSpec>, ParseError> {
    match year {
        Some(year) => {
            let year = year.parse::<i32>().map_err(|_| ParseError::Unparseable)?;
            let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(ParseError::Unparseable)?;
            Ok(Some(DateSpec::Exact(date)))
        }
        None => month_day(month, day),
    }
}

fn month_day(month: u32, day: u32) -> Result<Option<DateSpec>, ParseError> {
    // Reject Feb 30 and friends up front; Feb 29 is checked once the year is known.
    NaiveDate::from_ymd_opt(2024, month, day).ok_or(ParseError::Unparseable)?;
    Ok(Some(DateSpec::MonthDay { month, day }))
}

fn weekday(text: &str) -> Option<DateSpec> {
    let caps = WEEKDAY.captures(text)?;
    let skip_today = caps.get(1).map(|m| m.as_str() == "next").unwrap_or(false);
    let weekday = match caps.get(2)?.as_str() {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tues" | "tue" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thurs" | "thu" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        _ => Weekday::Sun,
    };
    Some(DateSpec::Weekday { weekday, skip_today })
}

fn month_number(name: &str) -> Result<u32, ParseError> {
    let month = match name.get(..3).unwrap_or(name) {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return Err(ParseError::Unparseable),
    };
    Ok(month)
}

fn parse_number(caps: &Captures<'_>, index: usize) -> Result<u32, ParseError> {
    caps.get(index)
        .ok_or(ParseError::Unparseable)?
        .as_str()
        .parse::<u32>()
        .map_err(|_| ParseError::Unparseable)
}

fn remove_match(text: &str, caps: &Captures<'_>) -> String {
    match caps.get(0) {
        Some(m) => format!("{} {}", &text[..m.start()], &text[m.end()..]).trim().to_string(),
        None => text.to_string(),
    }
}
