use crate::calc::CalcError;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodMark {
    Present,
    Absent,
    Unmarked,
}

impl PeriodMark {
    /// Lenient: anything other than `P`/`A` is treated as not marked.
    pub fn parse(raw: &str) -> Self {
        Self::parse_strict(raw).unwrap_or(Self::Unmarked)
    }

    pub fn parse_strict(raw: &str) -> Option<Self> {
        match raw.trim() {
            "P" | "p" => Some(Self::Present),
            "A" | "a" => Some(Self::Absent),
            "-" => Some(Self::Unmarked),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Present => "P",
            Self::Absent => "A",
            Self::Unmarked => "-",
        }
    }

    pub fn is_recorded(self) -> bool {
        !matches!(self, Self::Unmarked)
    }
}

impl Serialize for PeriodMark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for PeriodMark {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatewiseEntry {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub periods: Vec<PeriodMark>,
}

/// ERP dates look like `10/16/2026 (Fri)`; the weekday suffix is ignored.
pub fn parse_entry_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.split('(').next().unwrap_or("").trim();
    ["%m/%d/%Y", "%Y-%m-%d", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
}

pub fn entry_for_date(entries: &[DatewiseEntry], date: NaiveDate) -> Option<&DatewiseEntry> {
    entries
        .iter()
        .find(|e| parse_entry_date(&e.date) == Some(date))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub present: u32,
    pub total: u32,
}

impl Tally {
    pub fn percentage(self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * f64::from(self.present) / f64::from(self.total)
        }
    }
}

pub fn tally(entries: &[DatewiseEntry]) -> Tally {
    let mut out = Tally::default();
    for mark in entries.iter().flat_map(|e| e.periods.iter()) {
        match mark {
            PeriodMark::Present => {
                out.present += 1;
                out.total += 1;
            }
            PeriodMark::Absent => out.total += 1,
            PeriodMark::Unmarked => {}
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatewiseFilter {
    Last(usize),
    All,
}

impl Default for DatewiseFilter {
    fn default() -> Self {
        Self::Last(5)
    }
}

impl DatewiseFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "last5" => Some(Self::Last(5)),
            "last10" => Some(Self::Last(10)),
            "last20" => Some(Self::Last(20)),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn key(self) -> String {
        match self {
            Self::Last(n) => format!("last{}", n),
            Self::All => "all".to_string(),
        }
    }
}

/// Most recent first; entries whose date does not parse keep their order at the end.
pub fn sorted_recent_first(entries: &[DatewiseEntry]) -> Vec<DatewiseEntry> {
    let mut keyed: Vec<(Option<NaiveDate>, &DatewiseEntry)> = entries
        .iter()
        .map(|e| (parse_entry_date(&e.date), e))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(x), Some(y)) => y.cmp(x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    keyed.into_iter().map(|(_, e)| e.clone()).collect()
}

pub fn apply_filter(entries: &[DatewiseEntry], filter: DatewiseFilter) -> Vec<DatewiseEntry> {
    let mut sorted = sorted_recent_first(entries);
    if let DatewiseFilter::Last(n) = filter {
        sorted.truncate(n);
    }
    sorted
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodEdit {
    pub date: String,
    /// 1-based period number.
    pub period: usize,
    pub mark: PeriodMark,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodChange {
    pub index: usize,
    pub from: PeriodMark,
    pub to: PeriodMark,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDetail {
    pub date: String,
    pub period_changes: Vec<PeriodChange>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditProjection {
    pub changes: Vec<ChangeDetail>,
    pub original: Tally,
    pub projected: Tally,
    pub original_percentage: f64,
    pub projected_percentage: f64,
    pub change: f64,
}

/// Applies what-if marks to the visible window and carries the delta onto the
/// full ledger. Only periods still marked `-` can be edited.
pub fn project_edits(
    all: &[DatewiseEntry],
    window: &[DatewiseEntry],
    edits: &[PeriodEdit],
) -> Result<EditProjection, CalcError> {
    let mut edited: Vec<DatewiseEntry> = window.to_vec();
    for edit in edits {
        let Some(entry_idx) = window
            .iter()
            .position(|e| e.date.trim() == edit.date.trim())
        else {
            return Err(CalcError::new(
                "not_found",
                format!("date not in the selected range: {}", edit.date),
            ));
        };
        let Some(slot) = edit
            .period
            .checked_sub(1)
            .filter(|i| *i < window[entry_idx].periods.len())
        else {
            return Err(CalcError::new(
                "not_found",
                format!("period {} does not exist on {}", edit.period, edit.date),
            ));
        };
        let recorded = window[entry_idx].periods[slot];
        if recorded.is_recorded() {
            return Err(CalcError::new(
                "period_locked",
                format!(
                    "period {} on {} is already marked {}",
                    edit.period,
                    edit.date,
                    recorded.code()
                ),
            ));
        }
        edited[entry_idx].periods[slot] = edit.mark;
    }

    let changes: Vec<ChangeDetail> = window
        .iter()
        .zip(edited.iter())
        .filter_map(|(before, after)| {
            let period_changes: Vec<PeriodChange> = before
                .periods
                .iter()
                .zip(after.periods.iter())
                .enumerate()
                .filter(|(_, (from, to))| from != to)
                .map(|(i, (from, to))| PeriodChange {
                    index: i + 1,
                    from: *from,
                    to: *to,
                })
                .collect();
            (!period_changes.is_empty()).then(|| ChangeDetail {
                date: after.date.clone(),
                period_changes,
            })
        })
        .collect();

    let original = tally(all);
    let base = tally(window);
    let after = tally(&edited);
    let projected = Tally {
        present: (original.present + after.present).saturating_sub(base.present),
        total: (original.total + after.total).saturating_sub(base.total),
    };
    Ok(EditProjection {
        changes,
        original,
        projected,
        original_percentage: original.percentage(),
        projected_percentage: projected.percentage(),
        change: projected.percentage() - original.percentage(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub days: u32,
    pub title: &'static str,
}

pub const BADGES: [Badge; 6] = [
    Badge { days: 7, title: "The Starter" },
    Badge { days: 10, title: "Newbie Streaker" },
    Badge { days: 15, title: "Attendance Pro" },
    Badge { days: 20, title: "Attendance Ninja" },
    Badge { days: 25, title: "Class Warrior" },
    Badge { days: 28, title: "Legendary Streaker" },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakSummary {
    pub days: u32,
    pub badge: Option<Badge>,
    pub next_badge: Option<Badge>,
}

/// Consecutive perfect days counted back from the most recent date. Days
/// without any recorded mark (holidays) neither extend nor break the streak.
pub fn streak_days(entries: &[DatewiseEntry]) -> u32 {
    let mut days = 0;
    for entry in sorted_recent_first(entries) {
        let mut recorded = entry.periods.iter().filter(|m| m.is_recorded()).peekable();
        if recorded.peek().is_none() {
            continue;
        }
        if recorded.all(|m| *m == PeriodMark::Present) {
            days += 1;
        } else {
            break;
        }
    }
    days
}

pub fn streak(entries: &[DatewiseEntry]) -> StreakSummary {
    let days = streak_days(entries);
    StreakSummary {
        days,
        badge: BADGES.iter().rev().find(|b| days >= b.days).copied(),
        next_badge: BADGES.iter().find(|b| days < b.days).copied(),
    }
}
