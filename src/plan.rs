use crate::calc::{self, AttendanceRecord, CalcError, Counts, OverallSource};
use crate::datewise::{DatewiseEntry, PeriodMark};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimetableEntry {
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub subject: String,
}

pub fn is_free_period(entry: &TimetableEntry) -> bool {
    entry.subject.trim().eq_ignore_ascii_case("free")
}

/// Timetable labels carry extras like `CS101 (Lab)` or `CS101: Algorithms`;
/// the code is what precedes them.
pub fn timetable_code(label: &str) -> String {
    let head = label.split('(').next().unwrap_or("");
    head.split(':').next().unwrap_or("").trim().to_lowercase()
}

fn record_code(label: &str) -> String {
    label.split(':').next().unwrap_or("").trim().to_lowercase()
}

/// Number following the first `P`/`p` in a period label, e.g. `P3` -> 3.
pub fn period_number(label: &str) -> Option<u32> {
    let bytes = label.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if !b.eq_ignore_ascii_case(&b'p') {
            continue;
        }
        let digits: String = label[i + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(n) = digits.parse::<u32>() {
            return Some(n);
        }
    }
    None
}

fn period_sort_key(label: &str) -> u32 {
    period_number(label).unwrap_or(999)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodPlan {
    pub period: String,
    pub subject: String,
    pub record_index: Option<usize>,
    pub will_attend: bool,
    pub is_locked: bool,
    pub status: Option<PeriodMark>,
    pub original_percentage: f64,
    pub new_percentage: f64,
    pub change: f64,
}

impl PeriodPlan {
    fn subject_key(&self) -> String {
        self.subject.trim().to_lowercase()
    }
}

/// One plan per scheduled, non-free period. A period whose slot in today's
/// datewise entry is already `P`/`A` is locked to that outcome.
pub fn build_day_plan(
    records: &[AttendanceRecord],
    timetable: &[TimetableEntry],
    today: Option<&DatewiseEntry>,
) -> Vec<PeriodPlan> {
    let total = calc::total_row_index(records);
    let mut plans: Vec<PeriodPlan> = timetable
        .iter()
        .enumerate()
        .filter(|(_, item)| !is_free_period(item))
        .map(|(pos, item)| {
            let code = timetable_code(&item.subject);
            let record_index = if code.is_empty() {
                None
            } else {
                records
                    .iter()
                    .enumerate()
                    .position(|(i, r)| Some(i) != total && record_code(&r.subject) == code)
            };
            let slot = period_number(&item.period)
                .and_then(|n| (n as usize).checked_sub(1))
                .unwrap_or(pos);
            let status = today
                .and_then(|d| d.periods.get(slot).copied())
                .filter(|m| m.is_recorded());
            let original = record_index.map(|i| records[i].percentage()).unwrap_or(0.0);
            PeriodPlan {
                period: item.period.clone(),
                subject: record_index
                    .map(|i| records[i].subject.clone())
                    .unwrap_or_else(|| item.subject.clone()),
                record_index,
                will_attend: status == Some(PeriodMark::Present),
                is_locked: status.is_some(),
                status,
                original_percentage: original,
                new_percentage: original,
                change: 0.0,
            }
        })
        .collect();
    plans.sort_by_key(|p| period_sort_key(&p.period));
    plans
}

/// Sets the intention for a period and every other unlocked period of the
/// same subject today. Returns how many periods now carry the choice.
pub fn set_will_attend(
    plans: &mut [PeriodPlan],
    index: usize,
    will_attend: bool,
) -> Result<usize, CalcError> {
    let Some(target) = plans.get(index) else {
        return Err(CalcError::new(
            "not_found",
            format!("no period at index {}", index),
        ));
    };
    if target.is_locked {
        return Err(CalcError::new(
            "period_locked",
            format!("{} is already marked for today", target.period),
        )
        .with_details(serde_json::json!({ "period": target.period })));
    }
    let key = target.subject_key();
    let mut touched = 0;
    for plan in plans
        .iter_mut()
        .filter(|p| !p.is_locked && p.subject_key() == key)
    {
        plan.will_attend = will_attend;
        touched += 1;
    }
    Ok(touched)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodChoice {
    pub period: String,
    pub will_attend: bool,
}

pub fn apply_choices(plans: &mut [PeriodPlan], choices: &[PeriodChoice]) -> Result<(), CalcError> {
    for choice in choices {
        let Some(index) = plans
            .iter()
            .position(|p| p.period.trim().eq_ignore_ascii_case(choice.period.trim()))
        else {
            return Err(CalcError::new(
                "not_found",
                format!("period {} is not scheduled today", choice.period),
            ));
        };
        set_will_attend(plans, index, choice.will_attend)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProjection {
    pub subject: String,
    pub record_index: Option<usize>,
    pub held: u32,
    pub attended: u32,
    pub added_held: u32,
    pub added_attended: u32,
    pub original_percentage: f64,
    pub projected_percentage: f64,
    pub change: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayProjection {
    pub periods: Vec<PeriodPlan>,
    pub subjects: Vec<SubjectProjection>,
    pub overall_source: OverallSource,
    pub overall_before: f64,
    pub overall_after: f64,
    pub overall_change: f64,
    pub all_locked: bool,
}

/// Projects today's intentions onto the stored counters without mutating them.
pub fn project_day(records: &[AttendanceRecord], plans: &[PeriodPlan]) -> DayProjection {
    let mut keys: Vec<String> = Vec::new();
    let mut subjects: Vec<SubjectProjection> = Vec::new();
    for plan in plans {
        let key = plan.subject_key();
        let idx = match keys.iter().position(|k| *k == key) {
            Some(i) => i,
            None => {
                let base = plan
                    .record_index
                    .and_then(|i| records.get(i))
                    .map(|r| r.counts())
                    .unwrap_or_default();
                keys.push(key);
                subjects.push(SubjectProjection {
                    subject: plan.subject.clone(),
                    record_index: plan.record_index,
                    held: base.held,
                    attended: base.attended,
                    added_held: 0,
                    added_attended: 0,
                    original_percentage: base.percentage(),
                    projected_percentage: base.percentage(),
                    change: 0.0,
                });
                subjects.len() - 1
            }
        };
        if !plan.is_locked {
            let s = &mut subjects[idx];
            s.added_held += 1;
            if plan.will_attend {
                s.added_attended += 1;
            }
        }
    }
    for s in subjects.iter_mut() {
        let projected = Counts::new(s.held, s.attended)
            .with_added(s.added_held, s.added_attended)
            .percentage();
        s.projected_percentage = projected;
        s.change = projected - s.original_percentage;
    }

    let periods: Vec<PeriodPlan> = plans
        .iter()
        .map(|plan| {
            let mut out = plan.clone();
            if !plan.is_locked {
                if let Some(i) = keys.iter().position(|k| *k == plan.subject_key()) {
                    out.new_percentage = subjects[i].projected_percentage;
                }
            } else {
                out.new_percentage = plan.original_percentage;
            }
            out.change = out.new_percentage - out.original_percentage;
            out
        })
        .collect();

    let overall = calc::overall(records);
    let unlocked = plans.iter().filter(|p| !p.is_locked).count() as u32;
    let will = plans
        .iter()
        .filter(|p| !p.is_locked && p.will_attend)
        .count() as u32;
    let before = overall.counts.percentage();
    let after = overall.counts.with_added(unlocked, will).percentage();

    DayProjection {
        periods,
        subjects,
        overall_source: overall.source,
        overall_before: before,
        overall_after: after,
        overall_change: after - before,
        all_locked: !plans.is_empty() && plans.iter().all(|p| p.is_locked),
    }
}
