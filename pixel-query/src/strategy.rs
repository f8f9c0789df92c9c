//! Per-pixel uncertainty scoring.

use crate::{common::*, error::QueryError};

/// The uncertainty criterion used to rank pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum QueryStrategy {
    /// Shannon entropy of the class distribution.
    Entropy,
    /// One minus the top class probability.
    LeastConfidence,
    /// Gap between the two most probable classes.
    MarginSampling,
    /// Uniform noise, independent of the prediction.
    Random,
}

impl QueryStrategy {
    pub const ALL: [Self; 4] = [
        Self::Entropy,
        Self::LeastConfidence,
        Self::MarginSampling,
        Self::Random,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Entropy => "entropy",
            Self::LeastConfidence => "least_confidence",
            Self::MarginSampling => "margin_sampling",
            Self::Random => "random",
        }
    }

    /// Whether the most uncertain pixels carry the largest scores.
    pub const fn largest_first(&self) -> bool {
        match self {
            Self::Entropy | Self::LeastConfidence => true,
            Self::MarginSampling | Self::Random => false,
        }
    }

    /// The score assigned to pixels that must never be selected.
    pub const fn mask_value(&self) -> f64 {
        if self.largest_first() {
            0.0
        } else {
            1.0
        }
    }
}

impl Display for QueryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryStrategy {
    type Err = QueryError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let strategy = match name {
            "entropy" => Self::Entropy,
            "least_confidence" => Self::LeastConfidence,
            "margin_sampling" | "margin" => Self::MarginSampling,
            "random" => Self::Random,
            _ => return Err(QueryError::UnsupportedStrategy(name.to_owned())),
        };
        Ok(strategy)
    }
}

impl TryFrom<String> for QueryStrategy {
    type Error = QueryError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<QueryStrategy> for String {
    fn from(strategy: QueryStrategy) -> Self {
        strategy.as_str().to_owned()
    }
}

/// Maps a `[1, n_classes, height, width]` probability map to a
/// `[height, width]` uncertainty map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UncertaintyScorer {
    strategy: QueryStrategy,
}

impl UncertaintyScorer {
    pub fn new(strategy: QueryStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> QueryStrategy {
        self.strategy
    }

    pub fn score(&self, prob: &Tensor) -> Result<Tensor> {
        let (batch_size, n_classes, height, width) = prob.size4()?;
        ensure!(
            batch_size == 1,
            "expect a probability map with batch size 1, but get {}",
            batch_size
        );
        let prob = prob.f_select(0, 0)?;

        tch::no_grad(|| -> Result<_> {
            match self.strategy {
                QueryStrategy::Entropy => {
                    let log_prob = prob.f_clamp_min(EPSILON)?.f_log()?;
                    let entropy = prob
                        .f_mul(&log_prob)?
                        .f_sum_dim_intlist(&[0], false, Kind::Float)?
                        .f_neg()?;
                    Ok(entropy)
                }
                QueryStrategy::LeastConfidence => {
                    let (max_prob, _) = prob.f_max_dim(0, false)?;
                    Ok(1.0 - &max_prob.f_to_kind(Kind::Float)?)
                }
                QueryStrategy::MarginSampling => {
                    ensure!(
                        n_classes >= 2,
                        "margin sampling requires at least 2 classes, but get {}",
                        n_classes
                    );
                    let (top2, _) = prob.f_topk(2, 0, true, true)?;
                    let margin = top2
                        .f_select(0, 0)?
                        .f_sub(&top2.f_select(0, 1)?)?
                        .f_abs()?
                        .f_to_kind(Kind::Float)?;
                    Ok(margin)
                }
                QueryStrategy::Random => {
                    let noise = Tensor::f_rand(&[height, width], (Kind::Float, prob.device()))?;
                    Ok(noise)
                }
            }
        })
    }
}

/// Computes the per-pixel entropy map regardless of the selection strategy.
pub fn entropy_map(prob: &Tensor) -> Result<Tensor> {
    UncertaintyScorer::new(QueryStrategy::Entropy).score(prob)
}
