// src/vehicle.rs

//! Installed-software bookkeeping for one vehicle.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OtaError, Result};

/// One applied update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Package that was applied.
    pub package_id: String,
    /// Vehicle version before the update.
    pub previous_version: String,
    /// Vehicle version after the update.
    pub new_version: String,
    /// When the update was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Software state of a vehicle, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Identifier of the vehicle, e.g. its VIN.
    pub vehicle_id: String,
    /// Software version currently installed.
    pub current_version: String,
    /// Component name to installed version.
    #[serde(default)]
    pub installed_components: BTreeMap<String, String>,
    /// Applied updates, oldest first.
    #[serde(default)]
    pub update_history: Vec<UpdateRecord>,
}

impl VehicleState {
    /// A vehicle with no components and no history.
    pub fn new(vehicle_id: impl Into<String>, current_version: impl Into<String>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            current_version: current_version.into(),
            installed_components: BTreeMap::new(),
            update_history: Vec::new(),
        }
    }

    /// Adds or replaces a component version.
    pub fn add_component(&mut self, component: impl Into<String>, version: impl Into<String>) {
        self.installed_components.insert(component.into(), version.into());
    }

    /// Installed version of `component`, if known.
    pub fn component_version(&self, component: &str) -> Option<&str> {
        self.installed_components.get(component).map(String::as_str)
    }

    /// Appends a history entry and advances `current_version`.
    pub fn record_update(&mut self, package_id: impl Into<String>, new_version: impl Into<String>, timestamp: DateTime<Utc>) {
        let new_version = new_version.into();
        let previous_version = std::mem::replace(&mut self.current_version, new_version.clone());
        self.update_history.push(UpdateRecord {
            package_id: package_id.into(),
            previous_version,
            new_version,
            timestamp,
        });
    }

    /// Whether `target_version` is strictly newer than the current version.
    pub fn is_update_applicable(&self, target_version: &str) -> bool {
        compare_versions(target_version, &self.current_version) == Ordering::Greater
    }

    /// Writes the state to `path` as pretty-printed JSON.
    pub fn save_state(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| OtaError::file_io(path, e))
    }

    /// Reads a state previously written by [`save_state`](Self::save_state).
    pub fn load_state(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| OtaError::file_io(path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

fn parse_segment(s: &str) -> Segment<'_> {
    s.parse().map(Segment::Number).unwrap_or(Segment::Text(s))
}

/// Compares dotted versions segment by segment.
///
/// Numeric segments compare as numbers (`1.10 > 1.9`) and sort before
/// non-numeric ones, which compare as strings. A leading `v` is ignored and
/// missing trailing segments count as `0`, so `1.0 == 1.0.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.trim().trim_start_matches('v').split('.');
    let mut right = b.trim().trim_start_matches('v').split('.');
    loop {
        let (l, r) = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => (
                l.map(parse_segment).unwrap_or(Segment::Number(0)),
                r.map(parse_segment).unwrap_or(Segment::Number(0)),
            ),
        };
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
}
