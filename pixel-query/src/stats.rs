//! Descriptive statistics of queried pixels.

use crate::{common::*, store::StatsStore, strategy::entropy_map};

/// The statistics of a finished query round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStatsSnapshot {
    /// The number of queried pixels per ground truth class.
    pub label_distribution: BTreeMap<i64, u64>,
    /// The mean entropy of queried pixels.
    pub avg_entropy: f64,
    /// The mean number of distinct classes queried per image.
    pub avg_n_unique_labels: f64,
    /// The mean pairwise distance among queried pixels of an image, averaged over images.
    ///
    /// It is NaN if any image has fewer than two queried pixels.
    pub avg_spatial_coverage: f64,
}

/// The statistics accumulator of a query round.
#[derive(Debug, Clone)]
pub struct QueryStats {
    label_distribution: BTreeMap<i64, u64>,
    entropies: Vec<f64>,
    n_unique_labels: Vec<usize>,
    spatial_coverages: Vec<f64>,
}

impl QueryStats {
    pub fn new(n_classes: usize) -> Self {
        Self {
            label_distribution: (0..n_classes as i64).map(|label| (label, 0)).collect(),
            entropies: vec![],
            n_unique_labels: vec![],
            spatial_coverages: vec![],
        }
    }

    /// Accumulates the queried pixels of an image.
    ///
    /// `query` is a `[height, width]` bool mask, `labels` the `[height, width]`
    /// ground truth and `prob` the `[1, n_classes, height, width]` probability map.
    pub fn update(&mut self, query: &Tensor, labels: &Tensor, prob: &Tensor) -> Result<()> {
        let query = query.f_to_device(Device::Cpu)?;
        let labels = labels
            .f_to_device(Device::Cpu)?
            .f_to_kind(Kind::Int64)?;
        ensure!(
            query.size() == labels.size(),
            "query shape {:?} does not match label shape {:?}",
            query.size(),
            labels.size()
        );

        let indices = query.f_true_flat_indices()?;
        let flat_labels = Vec::<i64>::from(&labels.f_flatten(0, -1)?);
        let selected_labels: Vec<i64> = indices
            .iter()
            .map(|&index| flat_labels[index as usize])
            .collect();

        // count labels
        for &label in &selected_labels {
            let count = self
                .label_distribution
                .get_mut(&label)
                .ok_or_else(|| format_err!("label {} is not a valid class id", label))?;
            *count += 1;
        }

        // entropy
        let entropy = entropy_map(&prob.f_to_device(Device::Cpu)?)?;
        ensure!(
            entropy.size() == query.size(),
            "probability map size {:?} does not match query shape {:?}",
            entropy.size(),
            query.size()
        );
        let flat_entropy = Vec::<f64>::from(&entropy.f_to_kind(Kind::Double)?.f_flatten(0, -1)?);
        self.entropies
            .extend(indices.iter().map(|&index| flat_entropy[index as usize]));

        // n_unique_labels
        self.n_unique_labels
            .push(selected_labels.iter().unique().count());

        // spatial_coverage
        let coverage = spatial_coverage(&query.f_true_coordinates()?);
        if coverage.is_nan() {
            debug!(
                "spatial coverage is undefined for {} queried pixels",
                indices.len()
            );
        }
        self.spatial_coverages.push(coverage);

        Ok(())
    }

    /// The number of queried pixels accumulated so far.
    pub fn total_selected(&self) -> u64 {
        self.label_distribution.values().sum()
    }

    pub fn snapshot(&self) -> QueryStatsSnapshot {
        QueryStatsSnapshot {
            label_distribution: self.label_distribution.clone(),
            avg_entropy: mean(self.entropies.iter().cloned()),
            avg_n_unique_labels: mean(self.n_unique_labels.iter().map(|&count| count as f64)),
            avg_spatial_coverage: mean(self.spatial_coverages.iter().cloned()),
        }
    }

    /// Reports the round statistics and hands them to the store.
    pub fn save<S>(&self, round: usize, store: &mut S) -> Result<QueryStatsSnapshot>
    where
        S: StatsStore + ?Sized,
    {
        let snapshot = self.snapshot();
        let QueryStatsSnapshot {
            label_distribution,
            avg_entropy,
            avg_n_unique_labels,
            avg_spatial_coverage,
        } = &snapshot;

        info!("label_distribution: {:?}", label_distribution);
        info!("avg_entropy: {}", avg_entropy);
        info!("avg_n_unique_labels: {}", avg_n_unique_labels);
        info!("avg_spatial_coverage: {}", avg_spatial_coverage);

        store.save(round, &snapshot)?;
        Ok(snapshot)
    }
}

/// Mean pairwise Euclidean distance among pixel coordinates.
///
/// Returns NaN for fewer than two coordinates.
pub fn spatial_coverage(coords: &[(i64, i64)]) -> f64 {
    if coords.len() < 2 {
        return f64::NAN;
    }

    let (sum, count) = coords.iter().tuple_combinations().fold(
        (0.0, 0usize),
        |(sum, count), (&(lr, lc), &(rr, rc))| {
            let dr = (lr - rr) as f64;
            let dc = (lc - rc) as f64;
            (sum + dr.hypot(dc), count + 1)
        },
    );
    sum / count as f64
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}
