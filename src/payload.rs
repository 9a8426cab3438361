use crate::calc::{AttendanceRecord, ServerThresholds, DEFAULT_TARGETS};
use crate::datewise::{DatewiseEntry, PeriodMark};
use crate::plan::TimetableEntry;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Normalised body of a successful login response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub attendance: Vec<AttendanceRecord>,
    pub today_timetable: Vec<TimetableEntry>,
    pub datewise_attendance: Vec<DatewiseEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    InvalidCredentials,
    SystemError,
    InvalidRequest,
    ServerError,
    Unreachable,
    NetworkError,
    NoAttendance,
}

impl LoginFailure {
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::SystemError => "system_error",
            Self::InvalidRequest => "invalid_request",
            Self::ServerError => "server_error",
            Self::Unreachable => "unreachable",
            Self::NetworkError => "network_error",
            Self::NoAttendance => "no_attendance",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid username or password. Please try again.",
            Self::SystemError => "System error. Please try again later.",
            Self::InvalidRequest => "Invalid request. Please try again.",
            Self::ServerError => "Server error. Please try again later.",
            Self::Unreachable => "Cannot connect to server. Please try again later.",
            Self::NetworkError => "Network error. Please try again later.",
            Self::NoAttendance => "No attendance data received from server.",
        }
    }
}

/// Maps a failed login (non-2xx status, or status 0 for a transport failure)
/// to what the user is told. The backend reports scraper failures as text.
pub fn classify_login_failure(status: u16, body: &str) -> LoginFailure {
    match status {
        0 if body.contains("Failed to fetch") => LoginFailure::Unreachable,
        0 => LoginFailure::NetworkError,
        500 if body.contains("Python script error") => LoginFailure::InvalidCredentials,
        500 => LoginFailure::SystemError,
        400 if body.contains("No output from Python script") => LoginFailure::InvalidCredentials,
        400 if body.contains("Invalid data format") => LoginFailure::SystemError,
        400 => LoginFailure::InvalidRequest,
        _ => LoginFailure::ServerError,
    }
}

pub fn interpret_login_response(status: u16, body: &str) -> Result<LoginPayload, LoginFailure> {
    if !(200..300).contains(&status) {
        return Err(classify_login_failure(status, body));
    }
    let payload = parse_login_body(body)?;
    if payload.attendance.is_empty() {
        return Err(LoginFailure::NoAttendance);
    }
    Ok(payload)
}

pub fn parse_login_body(body: &str) -> Result<LoginPayload, LoginFailure> {
    let value: Value = serde_json::from_str(body).map_err(|_| LoginFailure::SystemError)?;
    let Some(obj) = value.as_object() else {
        return Err(LoginFailure::SystemError);
    };
    let timetable = obj.get("todayTimetable").or_else(|| obj.get("today_timetable"));
    let datewise = obj
        .get("datewiseAttendance")
        .or_else(|| obj.get("datewise_attendance"));
    Ok(LoginPayload {
        attendance: parse_attendance(obj.get("attendance")),
        today_timetable: parse_timetable(timetable),
        datewise_attendance: parse_datewise(datewise),
    })
}

/// Counts arrive as numbers or as scraped text such as `"42"`; leading digits win.
pub fn lenient_u32(v: Option<&Value>) -> Option<u32> {
    match v? {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return u32::try_from(u).ok();
            }
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f <= f64::from(u32::MAX))
                .map(|f| f.trunc() as u32)
        }
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        }
        _ => None,
    }
}

fn str_field<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(|v| v.as_str())
}

pub fn parse_record(v: &Value) -> Option<AttendanceRecord> {
    let obj = v.as_object()?;
    let subject = str_field(obj, "subject")
        .or_else(|| str_field(obj, "subjectCode"))
        .unwrap_or("")
        .trim()
        .to_string();
    let held = lenient_u32(obj.get("held")).unwrap_or(0);
    let mut attended = lenient_u32(obj.get("attended")).unwrap_or(0);
    if attended > held {
        log::warn!(
            "attendance row {:?} reports attended {} > held {}; clamping",
            subject,
            attended,
            held
        );
        attended = held;
    }

    let mut server = ServerThresholds::default();
    for &p in DEFAULT_TARGETS.iter() {
        if let Some(slot) = server.bunk_slot(p) {
            *slot = lenient_u32(obj.get(&format!("bunk{}", p)));
        }
        if let Some(slot) = server.attend_slot(p) {
            *slot = lenient_u32(obj.get(&format!("attend{}", p)));
        }
    }

    Some(AttendanceRecord {
        subject,
        faculty: str_field(obj, "faculty").unwrap_or("").trim().to_string(),
        held,
        attended,
        server,
    })
}

pub fn parse_attendance(v: Option<&Value>) -> Vec<AttendanceRecord> {
    v.and_then(|v| v.as_array())
        .map(|rows| rows.iter().filter_map(parse_record).collect())
        .unwrap_or_default()
}

/// Anything but an array (the scraper sends `{"error": ...}` on holidays)
/// means no timetable today.
pub fn parse_timetable(v: Option<&Value>) -> Vec<TimetableEntry> {
    let Some(items) = v.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| item.as_object())
        .map(|obj| TimetableEntry {
            period: str_field(obj, "period").unwrap_or("").trim().to_string(),
            subject: str_field(obj, "subject").unwrap_or("").trim().to_string(),
        })
        .collect()
}

pub fn parse_datewise(v: Option<&Value>) -> Vec<DatewiseEntry> {
    let Some(items) = v.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| item.as_object())
        .map(|obj| DatewiseEntry {
            date: str_field(obj, "date").unwrap_or("").to_string(),
            periods: obj
                .get("periods")
                .and_then(|p| p.as_array())
                .map(|marks| {
                    marks
                        .iter()
                        .map(|m| m.as_str().map(PeriodMark::parse).unwrap_or(PeriodMark::Unmarked))
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect()
}

/// Hex SHA-256 of the normalised payload, used to tell a refresh that changed
/// nothing from one that did.
pub fn fingerprint(payload: &LoginPayload) -> anyhow::Result<String> {
    let bytes = serde_json::to_vec(payload).context("failed to serialize payload")?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
