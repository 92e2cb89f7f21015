//! DAG planner (§4.4): stations grouped into levels by their `watches`
//! dependency chain.

use std::collections::{HashMap, HashSet};

use crate::config::StationConfig;
use crate::error::LineError;

/// A planned view over a station list: known names, level assignment, and
/// the helpers the station processor needs to resolve what a station
/// watches.
#[derive(Debug, Clone)]
pub struct Dag {
    branch_prefix: String,
    known: HashSet<String>,
    levels: Vec<Vec<String>>,
}

impl Dag {
    /// Builds the planner from the station list, detecting cycles via
    /// coloring (§4.4: "the planner assumes cycle-freedom... implementations
    /// should detect via coloring and abort").
    pub fn build(stations: &[StationConfig], branch_prefix: &str) -> Result<Dag, LineError> {
        let known: HashSet<String> = stations.iter().map(|s| s.name.clone()).collect();
        let by_name: HashMap<&str, &StationConfig> =
            stations.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut level_of: HashMap<String, usize> = HashMap::new();
        let mut in_progress: HashSet<String> = HashSet::new();

        fn resolve_level<'a>(
            name: &str,
            by_name: &HashMap<&'a str, &'a StationConfig>,
            known: &HashSet<String>,
            level_of: &mut HashMap<String, usize>,
            in_progress: &mut HashSet<String>,
        ) -> Result<usize, LineError> {
            if let Some(level) = level_of.get(name) {
                return Ok(*level);
            }
            if !in_progress.insert(name.to_string()) {
                return Err(LineError::InvalidStationGraph {
                    detail: format!("cycle detected through station '{name}'"),
                });
            }
            let station = by_name
                .get(name)
                .expect("name originates from the station list itself");
            let watches = station.watches.as_deref().unwrap_or("");
            let level = if known.contains(watches) {
                resolve_level(watches, by_name, known, level_of, in_progress)? + 1
            } else {
                0
            };
            in_progress.remove(name);
            level_of.insert(name.to_string(), level);
            Ok(level)
        }

        for station in stations {
            resolve_level(
                &station.name,
                &by_name,
                &known,
                &mut level_of,
                &mut in_progress,
            )?;
        }

        let max_level = level_of.values().copied().max().unwrap_or(0);
        let mut levels: Vec<Vec<String>> = vec![Vec::new(); max_level + 1];
        // Ties inside a level are broken by original declaration order (§4.4).
        for station in stations {
            let level = level_of[&station.name];
            levels[level].push(station.name.clone());
        }

        Ok(Dag {
            branch_prefix: branch_prefix.to_string(),
            known,
            levels,
        })
    }

    pub fn known_station_names(&self) -> &HashSet<String> {
        &self.known
    }

    /// True iff `s.watches` is not a known station name (§4.4).
    pub fn watches_external_branch(&self, station: &StationConfig) -> bool {
        !self
            .known
            .contains(station.watches.as_deref().unwrap_or(""))
    }

    /// If `s.watches` is a known station name, `<prefix><watches>`;
    /// otherwise `s.watches` verbatim (§4.4).
    pub fn resolve_watched_branch(&self, station: &StationConfig) -> String {
        let watches = station.watches.as_deref().unwrap_or("");
        if self.known.contains(watches) {
            format!("{}{}", self.branch_prefix, watches)
        } else {
            watches.to_string()
        }
    }

    /// Stations grouped by level, increasing order (§4.4).
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }
}
