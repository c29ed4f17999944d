//! # Block-matching parameters
//!
//! Live-tunable integer knobs, the fixed algorithm constants, and the derived effective values
//! the matcher actually runs with. The [`ParameterStore`] is shared between whatever control
//! surface adjusts the knobs and the node that snapshots them at the start of every cycle.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// The adjustable knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    PreFilterCap,
    NumOfDisparity,
    UniquenessRatio,
    SadWindowSize,
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Raw knob values, exactly as set through the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSet {
    pub pre_filter_cap: i32,
    pub num_of_disparity: i32,
    pub uniqueness_ratio: i32,
    pub sad_window_size: i32,
}

/// Algorithm constants carried into every computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmConstants {
    pub pre_filter_size: u32,
    pub number_of_disparities: u32,
    pub texture_threshold: u32,
    pub speckle_window_size: u32,
    pub speckle_range: u32,
    pub disp12_max_diff: u32,
}

/// Values the block matcher runs with, derived from one [`ParameterSet`] snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveParams {
    pub pre_filter_cap: u32,
    pub min_disparity: u32,
    pub uniqueness_ratio: u32,
    pub sad_window_size: u32,
    pub constants: BmConstants,
}

/// Thread-safe handle to the live parameter set. Clones share the same values.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    inner: Arc<RwLock<ParameterSet>>,
}

/// Knob values as written in a control file. Missing keys leave the knob untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamOverrides {
    pub pre_filter_cap: Option<i32>,
    pub num_of_disparity: Option<i32>,
    pub uniqueness_ratio: Option<i32>,
    pub sad_window_size: Option<i32>,
}

/// A TOML control file that is re-applied to a store whenever it changes on disk.
#[derive(Debug)]
pub struct ParamFile {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Param {
    pub const ALL: [Param; 4] = [
        Param::PreFilterCap,
        Param::NumOfDisparity,
        Param::UniquenessRatio,
        Param::SadWindowSize,
    ];

    /// Inclusive range of accepted raw values.
    pub fn range(self) -> (i32, i32) {
        match self {
            Param::PreFilterCap => (0, 62),
            Param::NumOfDisparity => (0, 100),
            Param::UniquenessRatio => (0, 100),
            Param::SadWindowSize => (0, 250),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Param::PreFilterCap => "pre_filter_cap",
            Param::NumOfDisparity => "num_of_disparity",
            Param::UniquenessRatio => "uniqueness_ratio",
            Param::SadWindowSize => "sad_window_size",
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Param {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace(|c: char| c == '-' || c.is_whitespace(), "_");
        Param::ALL
            .iter()
            .copied()
            .find(|p| p.name() == key)
            .ok_or_else(|| Error::UnknownParam(s.trim().to_string()))
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            pre_filter_cap: 9,
            num_of_disparity: 0,
            uniqueness_ratio: 0,
            sad_window_size: 9,
        }
    }
}

impl ParameterSet {
    pub fn get(&self, param: Param) -> i32 {
        match param {
            Param::PreFilterCap => self.pre_filter_cap,
            Param::NumOfDisparity => self.num_of_disparity,
            Param::UniquenessRatio => self.uniqueness_ratio,
            Param::SadWindowSize => self.sad_window_size,
        }
    }

    /// Set a knob, rejecting values outside its declared range.
    pub fn set(&mut self, param: Param, value: i32) -> Result<()> {
        let (min, max) = param.range();
        if value < min || value > max {
            return Err(Error::ParamOutOfRange {
                param,
                value,
                min,
                max,
            });
        }

        match param {
            Param::PreFilterCap => self.pre_filter_cap = value,
            Param::NumOfDisparity => self.num_of_disparity = value,
            Param::UniquenessRatio => self.uniqueness_ratio = value,
            Param::SadWindowSize => self.sad_window_size = value,
        }

        Ok(())
    }

    /// Derive the values the matcher runs with.
    pub fn effective(&self) -> EffectiveParams {
        let sad = self.sad_window_size as u32;
        EffectiveParams {
            pre_filter_cap: self.pre_filter_cap as u32 + 1,
            min_disparity: self.num_of_disparity as u32 + 100,
            uniqueness_ratio: self.uniqueness_ratio as u32,
            sad_window_size: (sad + 5) + (sad + 4) % 2,
            constants: BmConstants::default(),
        }
    }
}

impl Default for BmConstants {
    fn default() -> Self {
        Self {
            pre_filter_size: 9,
            number_of_disparities: 16,
            texture_threshold: 507,
            speckle_window_size: 0,
            speckle_range: 0,
            disp12_max_diff: 1,
        }
    }
}

impl ParameterStore {
    pub fn new(initial: ParameterSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Copy of the current knob values. Concurrent updates never tear a snapshot.
    pub fn snapshot(&self) -> ParameterSet {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, param: Param) -> i32 {
        self.snapshot().get(param)
    }

    pub fn set(&self, param: Param, value: i32) -> Result<()> {
        let mut params = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let old = params.get(param);
        params.set(param, value)?;
        if old != value {
            info!(%param, old, new = value, "parameter updated");
        }
        Ok(())
    }

    /// Apply a `name=value` command, as typed on a line-based control channel.
    pub fn apply_command(&self, line: &str) -> Result<(Param, i32)> {
        let (name, value) = line
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected 'name=value', got '{}'", line.trim())))?;
        let param: Param = name.parse()?;
        let value: i32 = value
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("bad value for {}: {}", param, e)))?;

        self.set(param, value)?;
        Ok((param, value))
    }

    /// Apply every knob present in `overrides`. Either all of them are applied or none.
    pub fn apply(&self, overrides: &ParamOverrides) -> Result<()> {
        let mut params = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = *params;

        for (param, value) in overrides.iter() {
            next.set(param, value)?;
        }

        if next != *params {
            info!(?next, "parameters reloaded");
        }
        *params = next;
        Ok(())
    }
}

impl ParamOverrides {
    fn iter(&self) -> impl Iterator<Item = (Param, i32)> {
        [
            (Param::PreFilterCap, self.pre_filter_cap),
            (Param::NumOfDisparity, self.num_of_disparity),
            (Param::UniquenessRatio, self.uniqueness_ratio),
            (Param::SadWindowSize, self.sad_window_size),
        ]
        .into_iter()
        .filter_map(|(p, v)| v.map(|v| (p, v)))
    }
}

impl FromStr for ParamOverrides {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("TOML parse error: {}", e)))
    }
}

impl ParamFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            last_modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the file into `store` if it changed since the last poll.
    ///
    /// Returns `Ok(true)` when new values were applied. A missing file is not an error, the
    /// store just keeps its current values.
    pub fn poll(&mut self, store: &ParameterStore) -> Result<bool> {
        let modified = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if self.last_modified == Some(modified) {
            return Ok(false);
        }

        // Remember the mtime even if the content is bad, so a broken file is reported once
        self.last_modified = Some(modified);

        let content = std::fs::read_to_string(&self.path)?;
        let overrides: ParamOverrides = content.parse()?;
        store.apply(&overrides)?;

        debug!(path = %self.path.display(), "control file applied");
        Ok(true)
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_start_values() {
        let p = ParameterSet::default();
        assert_eq!(p.pre_filter_cap, 9);
        assert_eq!(p.num_of_disparity, 0);
        assert_eq!(p.uniqueness_ratio, 0);
        assert_eq!(p.sad_window_size, 9);
    }

    #[test]
    fn effective_values_are_derived() {
        let mut p = ParameterSet::default();
        let eff = p.effective();
        assert_eq!(eff.sad_window_size, 15);
        assert_eq!(eff.pre_filter_cap, 10);
        assert_eq!(eff.min_disparity, 100);
        assert_eq!(eff.uniqueness_ratio, 0);

        p.set(Param::SadWindowSize, 0).unwrap();
        assert_eq!(p.effective().sad_window_size, 5);
    }

    #[test]
    fn window_size_is_always_odd() {
        let mut p = ParameterSet::default();
        for raw in 0..=250 {
            p.set(Param::SadWindowSize, raw).unwrap();
            assert_eq!(p.effective().sad_window_size % 2, 1, "raw = {}", raw);
        }
    }

    #[test]
    fn constants_are_fixed() {
        let c = ParameterSet::default().effective().constants;
        assert_eq!(c.pre_filter_size, 9);
        assert_eq!(c.number_of_disparities, 16);
        assert_eq!(c.texture_threshold, 507);
        assert_eq!(c.speckle_window_size, 0);
        assert_eq!(c.speckle_range, 0);
        assert_eq!(c.disp12_max_diff, 1);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let store = ParameterStore::default();
        assert!(matches!(
            store.set(Param::PreFilterCap, 63),
            Err(Error::ParamOutOfRange { max: 62, .. })
        ));
        assert!(store.set(Param::UniquenessRatio, -1).is_err());
        assert_eq!(store.snapshot(), ParameterSet::default());
    }

    #[test]
    fn clones_share_values() {
        let store = ParameterStore::default();
        let control = store.clone();
        control.set(Param::NumOfDisparity, 42).unwrap();
        assert_eq!(store.get(Param::NumOfDisparity), 42);
        assert_eq!(store.snapshot().effective().min_disparity, 142);
    }

    #[test]
    fn commands_parse() {
        let store = ParameterStore::default();
        assert_eq!(
            store.apply_command("sad_window_size = 20").unwrap(),
            (Param::SadWindowSize, 20)
        );
        assert_eq!(store.get(Param::SadWindowSize), 20);
        assert!(matches!(
            store.apply_command("gain=3"),
            Err(Error::UnknownParam(_))
        ));
        assert!(store.apply_command("uniqueness_ratio").is_err());
        assert!(store.apply_command("uniqueness_ratio=ten").is_err());
    }

    #[test]
    fn overrides_apply_all_or_nothing() {
        let store = ParameterStore::default();
        let bad: ParamOverrides = "pre_filter_cap = 20\nsad_window_size = 999".parse().unwrap();
        assert!(store.apply(&bad).is_err());
        assert_eq!(store.snapshot(), ParameterSet::default());

        let good: ParamOverrides = "pre_filter_cap = 20".parse().unwrap();
        store.apply(&good).unwrap();
        assert_eq!(store.get(Param::PreFilterCap), 20);
        assert_eq!(store.get(Param::SadWindowSize), 9);
    }

    #[test]
    fn unknown_keys_in_control_file_are_rejected() {
        assert!("gain = 1".parse::<ParamOverrides>().is_err());
    }

    #[test]
    fn control_file_is_reloaded_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.toml");
        let store = ParameterStore::default();
        let mut file = ParamFile::new(&path);

        // Missing file keeps defaults
        assert!(!file.poll(&store).unwrap());

        std::fs::write(&path, "uniqueness_ratio = 15\n").unwrap();
        assert!(file.poll(&store).unwrap());
        assert_eq!(store.get(Param::UniquenessRatio), 15);

        // Unchanged file is not re-applied
        assert!(!file.poll(&store).unwrap());
    }
}
