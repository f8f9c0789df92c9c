//! Persistence of round statistics.

use crate::{common::*, stats::QueryStatsSnapshot};

/// A destination of per-round statistics.
pub trait StatsStore {
    fn save(&mut self, round: usize, snapshot: &QueryStatsSnapshot) -> Result<()>;
}

impl<S> StatsStore for &mut S
where
    S: StatsStore + ?Sized,
{
    fn save(&mut self, round: usize, snapshot: &QueryStatsSnapshot) -> Result<()> {
        (**self).save(round, snapshot)
    }
}

/// Writes statistics to `<dir>/<round>_query/query_stats.json`.
#[derive(Debug, Clone)]
pub struct JsonStatsStore {
    dir: PathBuf,
}

impl JsonStatsStore {
    pub const FILE_NAME: &'static str = "query_stats.json";

    /// Stores statistics in the experiment checkpoint directory
    /// `<dir_root>/checkpoints/<experim_name>`.
    pub fn new(dir_root: impl AsRef<Path>, experim_name: &str) -> Self {
        Self::from_dir(dir_root.as_ref().join("checkpoints").join(experim_name))
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, round: usize) -> PathBuf {
        self.dir
            .join(format!("{}_query", round))
            .join(Self::FILE_NAME)
    }
}

impl StatsStore for JsonStatsStore {
    fn save(&mut self, round: usize, snapshot: &QueryStatsSnapshot) -> Result<()> {
        let path = self.path(round);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let text = serde_json::to_string_pretty(snapshot)?;
        fs::write(&path, text)
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        info!("saved query statistics to '{}'", path.display());
        Ok(())
    }
}

/// Keeps statistics in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatsStore {
    snapshots: BTreeMap<usize, QueryStatsSnapshot>,
}

impl MemoryStatsStore {
    pub fn get(&self, round: usize) -> Option<&QueryStatsSnapshot> {
        self.snapshots.get(&round)
    }

    pub fn rounds(&self) -> impl Iterator<Item = usize> + '_ {
        self.snapshots.keys().cloned()
    }
}

impl StatsStore for MemoryStatsStore {
    fn save(&mut self, round: usize, snapshot: &QueryStatsSnapshot) -> Result<()> {
        self.snapshots.insert(round, snapshot.clone());
        Ok(())
    }
}
