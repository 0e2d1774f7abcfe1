use std::fmt;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;
use tracing::debug;

pub const DATE_FORMAT: &str = "%m-%d-%Y";
pub const TIME_FORMAT: &str = "%H:%M:%S";
const DEFAULT_HISTORY_DAYS: i64 = 90;

fn start_of_day() -> NaiveTime {
    NaiveTime::MIN
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

fn extended_history_floor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// A bare midnight end time means "through the end of that day".
pub fn normalize_end_time(time: NaiveTime) -> NaiveTime {
    if time == NaiveTime::MIN {
        end_of_day()
    } else {
        time
    }
}

pub fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("the range editor is not open")]
    NotOpen,
    #[error("{date} is outside the selectable window {min} to {max}")]
    OutOfBounds {
        date: NaiveDate,
        min: NaiveDate,
        max: NaiveDate,
    },
    #[error("{hour:02}:{minute:02}:{second:02} is not a valid time of day")]
    InvalidTime { hour: u32, minute: u32, second: u32 },
    #[error("range start {from} is after its end {to}")]
    Inverted {
        from: NaiveDateTime,
        to: NaiveDateTime,
    },
    #[error("could not parse {input:?}, expected {expected}")]
    Parse {
        input: String,
        expected: &'static str,
    },
}

/// A committed from/to window. The end time is normalized on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    from_date: NaiveDate,
    from_time: NaiveTime,
    to_date: NaiveDate,
    to_time: NaiveTime,
}

impl ResolvedRange {
    pub fn new(
        from_date: NaiveDate,
        from_time: NaiveTime,
        to_date: NaiveDate,
        to_time: NaiveTime,
    ) -> Self {
        Self {
            from_date,
            from_time,
            to_date,
            to_time: normalize_end_time(to_time),
        }
    }

    pub fn full_day(date: NaiveDate) -> Self {
        Self::new(date, start_of_day(), date, end_of_day())
    }

    /// Parse the four `MM-DD-YYYY` / `HH:MM:SS` strings the range renders to.
    pub fn parse(from_date: &str, from_time: &str, to_date: &str, to_time: &str) -> Result<Self, RangeError> {
        Ok(Self::new(
            parse_date(from_date)?,
            parse_time(from_time)?,
            parse_date(to_date)?,
            parse_time(to_time)?,
        ))
    }

    pub fn from_date(&self) -> NaiveDate {
        self.from_date
    }

    pub fn from_time(&self) -> NaiveTime {
        self.from_time
    }

    pub fn to_date(&self) -> NaiveDate {
        self.to_date
    }

    pub fn to_time(&self) -> NaiveTime {
        self.to_time
    }

    pub fn start(&self) -> NaiveDateTime {
        self.from_date.and_time(self.from_time)
    }

    pub fn end(&self) -> NaiveDateTime {
        self.to_date.and_time(self.to_time)
    }

    pub fn from_date_string(&self) -> String {
        self.from_date.format(DATE_FORMAT).to_string()
    }

    pub fn from_time_string(&self) -> String {
        self.from_time.format(TIME_FORMAT).to_string()
    }

    pub fn to_date_string(&self) -> String {
        self.to_date.format(DATE_FORMAT).to_string()
    }

    pub fn to_time_string(&self) -> String {
        self.to_time.format(TIME_FORMAT).to_string()
    }

    /// `MM-DD-YYYY HH:MM:SS` for the start of the window.
    pub fn from_param(&self) -> String {
        format!("{} {}", self.from_date_string(), self.from_time_string())
    }

    pub fn to_param(&self) -> String {
        format!("{} {}", self.to_date_string(), self.to_time_string())
    }
}

impl fmt::Display for ResolvedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.from_param(), self.to_param())
    }
}

pub fn parse_date(input: &str) -> Result<NaiveDate, RangeError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| RangeError::Parse {
        input: input.to_string(),
        expected: "MM-DD-YYYY",
    })
}

pub fn parse_time(input: &str) -> Result<NaiveTime, RangeError> {
    NaiveTime::parse_from_str(input.trim(), TIME_FORMAT).map_err(|_| RangeError::Parse {
        input: input.to_string(),
        expected: "HH:MM:SS",
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeBounds {
    pub min: NaiveDate,
    pub max: NaiveDate,
}

impl RangeBounds {
    pub fn for_history(extended_history: bool, today: NaiveDate) -> Self {
        let min = if extended_history {
            extended_history_floor()
        } else {
            today - Duration::days(DEFAULT_HISTORY_DAYS)
        };
        Self { min, max: today }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.min <= date && date <= self.max
    }
}

/// In-progress edits held while the editor is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeDraft {
    pub from_date: NaiveDate,
    pub from_time: NaiveTime,
    pub to_date: NaiveDate,
    pub to_time: NaiveTime,
}

impl RangeDraft {
    fn seeded(committed: Option<&ResolvedRange>, today: NaiveDate) -> Self {
        let range = committed.copied().unwrap_or_else(|| ResolvedRange::full_day(today));
        Self {
            from_date: range.from_date,
            from_time: range.from_time,
            to_date: range.to_date,
            to_time: range.to_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerState {
    Closed,
    Open(RangeDraft),
}

/// Date/time range picker state machine.
///
/// `Closed -> Open` on [`open`](Self::open) or an external open signal.
/// `Open -> Closed` either commits ([`confirm`](Self::confirm) and
/// [`click_outside`](Self::click_outside) share one commit path) or discards
/// the draft ([`cancel`](Self::cancel)), leaving the previous committed range
/// in place.
pub struct DateTimeRangeResolver {
    state: PickerState,
    committed: Option<ResolvedRange>,
    extended_history: bool,
    bounds: RangeBounds,
    clock: fn() -> NaiveDate,
}

impl Default for DateTimeRangeResolver {
    fn default() -> Self {
        Self::with_clock(today_local)
    }
}

impl DateTimeRangeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: fn() -> NaiveDate) -> Self {
        Self {
            state: PickerState::Closed,
            committed: None,
            extended_history: false,
            bounds: RangeBounds::for_history(false, clock()),
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    pub fn state(&self) -> &PickerState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PickerState::Open(_))
    }

    pub fn committed(&self) -> Option<&ResolvedRange> {
        self.committed.as_ref()
    }

    pub fn bounds(&self) -> RangeBounds {
        self.bounds
    }

    pub fn extended_history(&self) -> bool {
        self.extended_history
    }

    pub fn open(&mut self) {
        if self.is_open() {
            return;
        }
        let draft = RangeDraft::seeded(self.committed.as_ref(), self.today());
        self.state = PickerState::Open(draft);
    }

    pub fn handle_open_signal(&mut self, signal: bool) {
        if signal {
            self.open();
        }
    }

    pub fn set_from_date(&mut self, date: NaiveDate) -> Result<(), RangeError> {
        let bounds = self.bounds;
        let draft = self.draft_mut()?;
        ensure_within(bounds, date)?;
        draft.from_date = date;
        Ok(())
    }

    pub fn set_to_date(&mut self, date: NaiveDate) -> Result<(), RangeError> {
        let bounds = self.bounds;
        let draft = self.draft_mut()?;
        ensure_within(bounds, date)?;
        draft.to_date = date;
        Ok(())
    }

    pub fn set_from_time(&mut self, hour: u32, minute: u32, second: u32) -> Result<(), RangeError> {
        let time = time_of_day(hour, minute, second)?;
        self.draft_mut()?.from_time = time;
        Ok(())
    }

    pub fn set_to_time(&mut self, hour: u32, minute: u32, second: u32) -> Result<(), RangeError> {
        let time = time_of_day(hour, minute, second)?;
        self.draft_mut()?.to_time = time;
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<ResolvedRange, RangeError> {
        self.commit()
    }

    /// A click landing outside the editor commits exactly like `confirm`.
    /// Does nothing while closed. The editor always closes: a draft that
    /// cannot be committed is discarded and the error returned.
    pub fn click_outside(&mut self) -> Result<Option<ResolvedRange>, RangeError> {
        if !self.is_open() {
            return Ok(None);
        }
        self.commit().map(Some).inspect_err(|_| self.cancel())
    }

    pub fn cancel(&mut self) {
        if self.is_open() {
            debug!("range edit cancelled");
        }
        self.state = PickerState::Closed;
    }

    /// Switch the selectable window. Seeds today's full day if nothing was
    /// ever committed and the extended window was turned on. An existing
    /// committed range is kept as-is even if it falls outside the new window.
    pub fn set_extended_history(&mut self, extended: bool) {
        self.extended_history = extended;
        self.bounds = RangeBounds::for_history(extended, self.today());
        if extended && self.committed.is_none() {
            let seeded = ResolvedRange::full_day(self.today());
            debug!(range = %seeded, "seeded default range for extended history");
            self.committed = Some(seeded);
        }
    }

    pub fn clear_committed(&mut self) {
        self.committed = None;
        self.state = PickerState::Closed;
    }

    fn draft_mut(&mut self) -> Result<&mut RangeDraft, RangeError> {
        match &mut self.state {
            PickerState::Open(draft) => Ok(draft),
            PickerState::Closed => Err(RangeError::NotOpen),
        }
    }

    fn commit(&mut self) -> Result<ResolvedRange, RangeError> {
        let PickerState::Open(draft) = self.state else {
            return Err(RangeError::NotOpen);
        };

        let range = ResolvedRange::new(draft.from_date, draft.from_time, draft.to_date, draft.to_time);
        if range.start() > range.end() {
            return Err(RangeError::Inverted {
                from: range.start(),
                to: range.end(),
            });
        }

        debug!(range = %range, "range committed");
        self.committed = Some(range);
        self.state = PickerState::Closed;
        Ok(range)
    }
}

fn ensure_within(bounds: RangeBounds, date: NaiveDate) -> Result<(), RangeError> {
    if bounds.contains(date) {
        Ok(())
    } else {
        Err(RangeError::OutOfBounds {
            date,
            min: bounds.min,
            max: bounds.max,
        })
    }
}

fn time_of_day(hour: u32, minute: u32, second: u32) -> Result<NaiveTime, RangeError> {
    NaiveTime::from_hms_opt(hour, minute, second).ok_or(RangeError::InvalidTime {
        hour,
        minute,
        second,
    })
}
