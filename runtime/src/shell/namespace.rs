//! Path resolution over the session namespace.
//!
//! The namespace has three roots: `/home` (the writable variable scope),
//! `/proc` (one entry per process) and `/fn` (declared functions). Paths
//! use `/` between segments and `.` inside a segment, so `/home/a.b` and
//! `a.b` (relative to `/home`) address the same value.

use super::process::ProcessStatus;
use super::session::Session;
use serde_json::{json, Map, Value};

pub const ROOTS: [&str; 3] = ["home", "proc", "fn"];

/// Absolute, normalised segments for `path` seen from `cwd`.
pub fn resolve(cwd: &str, path: &str) -> Vec<String> {
    let mut segments = if path.starts_with('/') {
        Vec::new()
    } else {
        split(cwd)
    };
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.extend(part.split('.').filter(|s| !s.is_empty()).map(String::from)),
        }
    }
    segments
}

fn split(path: &str) -> Vec<String> {
    path.split(['/', '.'])
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn to_path(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}

fn root_value(session: &Session, root: &str) -> Option<Value> {
    match root {
        "home" => Some(Value::Object(session.home().clone())),
        "proc" => {
            let table: Map<String, Value> = session
                .processes()
                .iter()
                .map(|p| {
                    let status = match p.status() {
                        ProcessStatus::Running => "running",
                        ProcessStatus::Suspended => "suspended",
                        ProcessStatus::Killed => "killed",
                    };
                    let entry = json!({
                        "pid": p.pid,
                        "ppid": p.ppid,
                        "pgid": p.pgid(),
                        "status": status,
                        "src": p.source,
                    });
                    (p.pid.to_string(), entry)
                })
                .collect();
            Some(Value::Object(table))
        }
        "fn" => {
            let table: Map<String, Value> = session
                .functions()
                .into_iter()
                .map(|(name, def)| (name, Value::String(def.source)))
                .collect();
            Some(Value::Object(table))
        }
        _ => None,
    }
}

fn descend<'a>(mut value: &'a Value, path: &[String]) -> Option<&'a Value> {
    for segment in path {
        value = match value {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Value at absolute `segments`.
pub fn lookup(session: &Session, segments: &[String]) -> Option<Value> {
    let Some((root, rest)) = segments.split_first() else {
        let roots = ROOTS.iter().map(|r| (r.to_string(), json!({}))).collect();
        return Some(Value::Object(roots));
    };
    let value = root_value(session, root)?;
    descend(&value, rest).cloned()
}

/// Keys (or indices) under `segments`; `None` when it is not a container.
pub fn list(session: &Session, segments: &[String]) -> Option<Vec<String>> {
    match lookup(session, segments)? {
        Value::Object(map) => Some(map.keys().cloned().collect()),
        Value::Array(items) => Some((0..items.len()).map(|i| i.to_string()).collect()),
        _ => None,
    }
}

/// Store `value` at `segments`, creating objects along the way. Only the
/// home root is writable.
pub fn assign(session: &Session, segments: &[String], value: Value) -> Result<(), String> {
    let path = to_path(segments);
    match segments.split_first() {
        Some((root, rest)) if root == "home" && !rest.is_empty() => {
            session.with_home_mut(|home| {
                let (last, parents) = rest
                    .split_last()
                    .ok_or_else(|| format!("{}: invalid path", path))?;
                let mut map = home;
                for segment in parents {
                    let slot = map
                        .entry(segment.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !slot.is_object() {
                        *slot = Value::Object(Map::new());
                    }
                    map = match slot {
                        Value::Object(inner) => inner,
                        _ => return Err(format!("{}: not an object", path)),
                    };
                }
                map.insert(last.clone(), value);
                Ok(())
            })
        }
        _ => Err(format!("{}: read-only path", path)),
    }
}

/// True when `segments` names a directory-like value `cd` can enter.
pub fn is_container(session: &Session, segments: &[String]) -> bool {
    matches!(
        lookup(session, segments),
        Some(Value::Object(_)) | Some(Value::Array(_))
    )
}
