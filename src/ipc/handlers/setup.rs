use crate::calc::{default_targets, StandingBands, Target, DEFAULT_TARGETS};
use crate::datewise::DatewiseFilter;
use crate::db;
use crate::ipc::helpers::{db_query_failed, db_update_failed, require_db, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Calculator,
    Datewise,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [Self::Calculator, Self::Datewise];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "calculator" => Some(Self::Calculator),
            "datewise" => Some(Self::Datewise),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Calculator => "calculator",
            Self::Datewise => "datewise",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Calculator => "setup.calculator",
            Self::Datewise => "setup.datewise",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Calculator => json!({
            "targets": DEFAULT_TARGETS,
            "safeThreshold": 75,
            "condonationThreshold": 65
        }),
        SetupSection::Datewise => json!({
            "defaultFilter": "last5"
        }),
    }
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut out = default_section(section);
    if let Some(Value::Object(stored)) = db::settings_get_json(conn, section.key())? {
        if let Some(obj) = out.as_object_mut() {
            for (k, v) in stored {
                obj.insert(k, v);
            }
        }
    }
    Ok(out)
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_targets(v: &Value) -> Result<Vec<Target>, String> {
    let items = v.as_array().ok_or("targets must be an array")?;
    if items.is_empty() || items.len() > 12 {
        return Err("targets must hold 1..=12 values".into());
    }
    let mut out: Vec<Target> = Vec::with_capacity(items.len());
    for item in items {
        let n = item.as_i64().ok_or("targets must be integers")?;
        let t = Target::new(n).map_err(|e| e.message)?;
        if out.contains(&t) {
            return Err(format!("duplicate target {}", n));
        }
        out.push(t);
    }
    out.sort_unstable_by(|a, b| b.cmp(a));
    Ok(out)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Calculator => match k.as_str() {
                "targets" => {
                    obj.insert(k.clone(), json!(parse_targets(v)?));
                }
                "safeThreshold" | "condonationThreshold" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 100)?));
                }
                _ => return Err(format!("unknown calculator field: {}", k)),
            },
            SetupSection::Datewise => match k.as_str() {
                "defaultFilter" => {
                    let raw = v.as_str().ok_or("defaultFilter must be string")?;
                    let filter = DatewiseFilter::parse(raw).ok_or(
                        "defaultFilter must be one of: last5, last10, last20, all",
                    )?;
                    obj.insert(k.clone(), Value::String(filter.key()));
                }
                _ => return Err(format!("unknown datewise field: {}", k)),
            },
        }
    }
    if let SetupSection::Calculator = section {
        let safe = obj.get("safeThreshold").and_then(|v| v.as_i64()).unwrap_or(75);
        let cond = obj
            .get("condonationThreshold")
            .and_then(|v| v.as_i64())
            .unwrap_or(65);
        if cond > safe {
            return Err("condonationThreshold must not exceed safeThreshold".into());
        }
    }
    Ok(())
}

pub struct CalculatorSettings {
    pub targets: Vec<Target>,
    pub bands: StandingBands,
}

/// Effective calculator settings; stored values that no longer validate fall
/// back to defaults.
pub fn calculator_settings(conn: &Connection) -> anyhow::Result<CalculatorSettings> {
    let section = load_section(conn, SetupSection::Calculator)?;
    let targets = section
        .get("targets")
        .and_then(|v| parse_targets(v).ok())
        .unwrap_or_else(default_targets);
    let defaults = StandingBands::default();
    let bands = StandingBands {
        safe: section
            .get("safeThreshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(defaults.safe),
        condonation: section
            .get("condonationThreshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(defaults.condonation),
    };
    Ok(CalculatorSettings { targets, bands })
}

pub fn datewise_default_filter(conn: &Connection) -> anyhow::Result<DatewiseFilter> {
    let section = load_section(conn, SetupSection::Datewise)?;
    Ok(section
        .get("defaultFilter")
        .and_then(|v| v.as_str())
        .and_then(DatewiseFilter::parse)
        .unwrap_or_default())
}

fn setup_get(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let mut out = Map::new();
    for section in SetupSection::ALL {
        out.insert(
            section.name().to_string(),
            load_section(conn, section).map_err(db_query_failed)?,
        );
    }
    Ok(Value::Object(out))
}

fn setup_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_raw = params
        .get("section")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing section"))?;
    let section = SetupSection::parse(section_raw)
        .ok_or_else(|| HandlerErr::new("bad_params", "unknown section"))?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::new("bad_params", "patch must be an object"))?;

    let mut current = load_section(conn, section).map_err(db_query_failed)?;
    merge_section_patch(section, &mut current, patch)
        .map_err(|msg| HandlerErr::new("bad_params", msg))?;
    db::settings_set_json(conn, section.key(), &current).map_err(db_update_failed)?;
    log::info!("updated settings section {}", section.name());
    Ok(json!({ section.name(): current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "setup.get" => setup_get(state),
        "setup.update" => setup_update(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
