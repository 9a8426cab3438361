use serde::{Deserialize, Serialize};

/// Targets the calculator shows when no override is configured, in display order.
pub const DEFAULT_TARGETS: [u32; 6] = [90, 85, 80, 75, 70, 65];

pub const DEFAULT_SAFE_THRESHOLD: f64 = 75.0;
pub const DEFAULT_CONDONATION_THRESHOLD: f64 = 65.0;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A target attendance percentage. Only `1..=99` is representable, which keeps
/// `100 - target` strictly positive in [`attend_requirement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Target(u32);

impl Target {
    pub fn new(percent: i64) -> Result<Self, CalcError> {
        if !(1..=99).contains(&percent) {
            return Err(CalcError::new(
                "bad_params",
                format!("target must be in 1..=99, got {}", percent),
            ));
        }
        Ok(Self(percent as u32))
    }

    pub fn percent(self) -> u32 {
        self.0
    }
}

pub fn default_targets() -> Vec<Target> {
    DEFAULT_TARGETS.iter().map(|&t| Target(t)).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub held: u32,
    pub attended: u32,
}

impl Counts {
    pub fn new(held: u32, attended: u32) -> Self {
        Self { held, attended }
    }

    /// `attended / held * 100`, or `0` before any class was held.
    pub fn percentage(self) -> f64 {
        if self.held == 0 {
            0.0
        } else {
            100.0 * f64::from(self.attended) / f64::from(self.held)
        }
    }

    pub fn with_added(self, held: u32, attended: u32) -> Self {
        Self {
            held: self.held.saturating_add(held),
            attended: self.attended.saturating_add(attended),
        }
    }
}

/// Largest `n` such that `attended / (held + n) >= target`, i.e.
/// `floor(attended*100/target - held)` clamped at zero.
pub fn skip_budget(counts: Counts, target: Target) -> u32 {
    if counts.held == 0 {
        return 0;
    }
    let t = i64::from(target.0);
    let slack = i64::from(counts.attended) * 100 - i64::from(counts.held) * t;
    let n = slack.div_euclid(t);
    u32::try_from(n.max(0)).unwrap_or(u32::MAX)
}

/// Smallest `x` such that `(attended + x) / (held + x) >= target`, i.e.
/// `ceil((held*t/100 - attended) / (1 - t/100))` clamped at zero.
pub fn attend_requirement(counts: Counts, target: Target) -> u32 {
    if counts.held == 0 {
        return 0;
    }
    let t = i64::from(target.0);
    let deficit = i64::from(counts.held) * t - i64::from(counts.attended) * 100;
    if deficit <= 0 {
        return 0;
    }
    let den = 100 - t;
    let x = (deficit + den - 1) / den;
    u32::try_from(x).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    Server,
    Computed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolved {
    pub value: u32,
    pub source: Source,
}

/// Server-supplied shortcuts win unchanged; otherwise compute.
pub fn resolve(server: Option<u32>, compute: impl FnOnce() -> u32) -> Resolved {
    match server {
        Some(value) => Resolved {
            value,
            source: Source::Server,
        },
        None => Resolved {
            value: compute(),
            source: Source::Computed,
        },
    }
}

/// Optional `bunkN` / `attendN` values precomputed by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bunk90: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bunk85: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bunk80: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bunk75: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bunk70: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bunk65: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attend90: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attend85: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attend80: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attend75: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attend70: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attend65: Option<u32>,
}

impl ServerThresholds {
    pub fn bunk(&self, target: Target) -> Option<u32> {
        match target.0 {
            90 => self.bunk90,
            85 => self.bunk85,
            80 => self.bunk80,
            75 => self.bunk75,
            70 => self.bunk70,
            65 => self.bunk65,
            _ => None,
        }
    }

    pub fn attend(&self, target: Target) -> Option<u32> {
        match target.0 {
            90 => self.attend90,
            85 => self.attend85,
            80 => self.attend80,
            75 => self.attend75,
            70 => self.attend70,
            65 => self.attend65,
            _ => None,
        }
    }

    /// Slot for `bunk{percent}`; `None` when the backend never sends that target.
    pub fn bunk_slot(&mut self, percent: u32) -> Option<&mut Option<u32>> {
        match percent {
            90 => Some(&mut self.bunk90),
            85 => Some(&mut self.bunk85),
            80 => Some(&mut self.bunk80),
            75 => Some(&mut self.bunk75),
            70 => Some(&mut self.bunk70),
            65 => Some(&mut self.bunk65),
            _ => None,
        }
    }

    pub fn attend_slot(&mut self, percent: u32) -> Option<&mut Option<u32>> {
        match percent {
            90 => Some(&mut self.attend90),
            85 => Some(&mut self.attend85),
            80 => Some(&mut self.attend80),
            75 => Some(&mut self.attend75),
            70 => Some(&mut self.attend70),
            65 => Some(&mut self.attend65),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub subject: String,
    #[serde(default)]
    pub faculty: String,
    pub held: u32,
    pub attended: u32,
    #[serde(flatten)]
    pub server: ServerThresholds,
}

impl AttendanceRecord {
    pub fn counts(&self) -> Counts {
        Counts::new(self.held, self.attended)
    }

    pub fn percentage(&self) -> f64 {
        self.counts().percentage()
    }
}

pub fn is_total_label(label: &str) -> bool {
    label.trim().eq_ignore_ascii_case("total")
}

pub fn is_placeholder_label(label: &str) -> bool {
    let t = label.trim();
    t.is_empty() || t == "-"
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRow {
    pub target: Target,
    pub can_skip: Resolved,
    pub must_attend: Resolved,
}

pub fn threshold_row(
    counts: Counts,
    server: Option<&ServerThresholds>,
    target: Target,
) -> ThresholdRow {
    ThresholdRow {
        target,
        can_skip: resolve(server.and_then(|s| s.bunk(target)), || {
            skip_budget(counts, target)
        }),
        must_attend: resolve(server.and_then(|s| s.attend(target)), || {
            attend_requirement(counts, target)
        }),
    }
}

pub fn threshold_table(
    counts: Counts,
    server: Option<&ServerThresholds>,
    targets: &[Target],
) -> Vec<ThresholdRow> {
    targets
        .iter()
        .map(|&t| threshold_row(counts, server, t))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OverallSource {
    TotalRow,
    Summed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Overall {
    pub counts: Counts,
    pub source: OverallSource,
}

/// Index of the aggregate row. A row labelled "total" wins anywhere; otherwise
/// the backend puts the aggregate last, whatever its label. A last row that
/// cannot cover the rows above it (fewer held or attended than their sum) is
/// an ordinary subject, and the caller falls back to summing.
pub fn total_row_index(records: &[AttendanceRecord]) -> Option<usize> {
    if let Some(i) = records.iter().position(|r| is_total_label(&r.subject)) {
        return Some(i);
    }
    let last = records.len().checked_sub(1)?;
    if is_placeholder_label(&records[last].subject) {
        return Some(last);
    }
    if last == 0 {
        return None;
    }
    let above = records[..last]
        .iter()
        .filter(|r| !is_placeholder_label(&r.subject))
        .fold(Counts::default(), |acc, r| acc.with_added(r.held, r.attended));
    let candidate = records[last].counts();
    (candidate.held >= above.held && candidate.attended >= above.attended).then_some(last)
}

pub fn subject_indices(records: &[AttendanceRecord]) -> Vec<usize> {
    let total = total_row_index(records);
    records
        .iter()
        .enumerate()
        .filter(|(i, r)| Some(*i) != total && !is_placeholder_label(&r.subject))
        .map(|(i, _)| i)
        .collect()
}

pub fn subject_sum(records: &[AttendanceRecord]) -> Counts {
    subject_indices(records)
        .into_iter()
        .fold(Counts::default(), |acc, i| {
            acc.with_added(records[i].held, records[i].attended)
        })
}

/// Counters behind the "Overall" selection. The Total row is used as reported
/// by the backend; summing subjects is only the fallback when it is missing.
pub fn overall(records: &[AttendanceRecord]) -> Overall {
    match total_row_index(records) {
        Some(i) => Overall {
            counts: records[i].counts(),
            source: OverallSource::TotalRow,
        },
        None => Overall {
            counts: subject_sum(records),
            source: OverallSource::Summed,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandingBands {
    pub safe: f64,
    pub condonation: f64,
}

impl Default for StandingBands {
    fn default() -> Self {
        Self {
            safe: DEFAULT_SAFE_THRESHOLD,
            condonation: DEFAULT_CONDONATION_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Standing {
    NotStarted,
    Safe,
    Condonation,
    Detained,
}

pub fn standing(counts: Counts, bands: StandingBands) -> Standing {
    if counts.held == 0 {
        return Standing::NotStarted;
    }
    let p = counts.percentage();
    if p >= bands.safe {
        Standing::Safe
    } else if p >= bands.condonation {
        Standing::Condonation
    } else {
        Standing::Detained
    }
}

/// Internal-assessment marks awarded for an attendance percentage.
pub fn marks_for(percentage: f64) -> u8 {
    if percentage >= 85.0 {
        5
    } else if percentage >= 80.0 {
        4
    } else if percentage >= 75.0 {
        3
    } else if percentage >= 70.0 {
        2
    } else if percentage >= 65.0 {
        1
    } else {
        0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub index: usize,
    pub subject: String,
    pub faculty: String,
    pub held: u32,
    pub attended: u32,
    pub percentage: f64,
    pub marks: u8,
    pub standing: Standing,
}

fn subject_row(index: usize, r: &AttendanceRecord, bands: StandingBands) -> SubjectRow {
    let percentage = r.percentage();
    SubjectRow {
        index,
        subject: r.subject.clone(),
        faculty: r.faculty.clone(),
        held: r.held,
        attended: r.attended,
        percentage,
        marks: if r.held == 0 { 0 } else { marks_for(percentage) },
        standing: standing(r.counts(), bands),
    }
}

pub fn subject_rows(records: &[AttendanceRecord], bands: StandingBands) -> Vec<SubjectRow> {
    subject_indices(records)
        .into_iter()
        .map(|i| subject_row(i, &records[i], bands))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub overall: Overall,
    pub overall_percentage: f64,
    pub overall_standing: Standing,
    pub subject_sum: Counts,
    pub subject_sum_percentage: f64,
    pub subject_count: usize,
    pub safe_count: usize,
    pub at_risk_count: usize,
    pub not_started_count: usize,
}

pub fn overview(records: &[AttendanceRecord], bands: StandingBands) -> Overview {
    let overall = overall(records);
    let sum = subject_sum(records);
    let rows = subject_rows(records, bands);
    let not_started_count = rows.iter().filter(|r| r.held == 0).count();
    let safe_count = rows
        .iter()
        .filter(|r| r.held > 0 && r.percentage >= bands.safe)
        .count();
    Overview {
        overall,
        overall_percentage: overall.counts.percentage(),
        overall_standing: standing(overall.counts, bands),
        subject_sum: sum,
        subject_sum_percentage: sum.percentage(),
        subject_count: rows.len(),
        safe_count,
        at_risk_count: rows.len() - safe_count - not_started_count,
        not_started_count,
    }
}
