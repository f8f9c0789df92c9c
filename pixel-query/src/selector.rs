//! Per-round query selection.

use crate::{
    common::*,
    config::QueryConfig,
    error::QueryError,
    model::{InferenceMode, SegmentationModel},
    pool::{PoolRecord, QueryPool},
    stats::QueryStats,
    store::StatsStore,
    strategy::{QueryStrategy, UncertaintyScorer},
};

/// The outcome of budgeted selection on one image.
#[derive(Debug)]
pub struct Selection {
    /// The `[height, width]` bool mask of queried pixels.
    pub query: Tensor,
    /// The `[height, width]` bool mask of randomly drawn candidates in two-stage mode.
    pub candidates: Option<Tensor>,
}

/// Selects pixels to annotate in each active-learning round.
#[derive(Debug)]
pub struct QuerySelector<S>
where
    S: StatsStore,
{
    config: QueryConfig,
    scorer: UncertaintyScorer,
    rng: StdRng,
    store: S,
}

impl<S> QuerySelector<S>
where
    S: StatsStore,
{
    pub fn new(config: QueryConfig, store: S) -> Result<Self> {
        config.validate()?;

        let scorer = UncertaintyScorer::new(config.query_strategy);
        let rng = match config.seed {
            Some(seed) => {
                tch::manual_seed(seed as i64);
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            config,
            scorer,
            rng,
            store,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs a query round over the pool and commits the queried pixels
    /// as labels of round `round + 1`.
    ///
    /// It returns one `[height, width]` bool query mask per image.
    pub fn run<M, P>(&mut self, round: usize, model: &mut M, pool: &mut P) -> Result<Vec<Tensor>>
    where
        M: SegmentationModel + ?Sized,
        P: QueryPool + ?Sized,
    {
        let _span = info_span!("query_round", round).entered();
        let strategy = self.scorer.strategy();

        model.set_mode(if self.config.use_mc_dropout {
            InferenceMode::McDropout
        } else {
            InferenceMode::Eval
        })?;
        info!(
            "choosing pixels by {} from {} images",
            strategy,
            pool.len()
        );

        let (queries, stats) = (0..pool.len()).try_fold(
            (Vec::with_capacity(pool.len()), QueryStats::new(self.config.n_classes.get())),
            |(mut queries, stats), index| -> Result<_> {
                let record = pool
                    .record(index)
                    .with_context(|| format!("failed to load pool record {}", index))?;
                let (query, stats) = self.query_image(model, &record, stats)?;
                debug!(
                    "image {}: {} pixels queried",
                    index,
                    query.f_count_true()?
                );
                queries.push(query);
                Ok((queries, stats))
            },
        )?;

        stats.save(round, &mut self.store)?;

        let n_pixels = stats.total_selected();
        if n_pixels == 0 {
            bail!(QueryError::BudgetExhausted { round });
        }
        info!(
            "{} labelled pixels are chosen by {} strategy",
            n_pixels, strategy
        );

        pool.label_queries(&queries, round + 1)?;
        Ok(queries)
    }

    /// Scores, masks and queries one image, then folds it into the round statistics.
    fn query_image<M>(
        &mut self,
        model: &mut M,
        record: &PoolRecord,
        mut stats: QueryStats,
    ) -> Result<(Tensor, QueryStats)>
    where
        M: SegmentationModel + ?Sized,
    {
        let device = self.config.device;
        let (prob, uc_map) = self.predict(model, &record.input)?;

        let labels = record.labels.f_to_device(device)?;
        let ineligible = record
            .labelled
            .f_to_device(device)?
            .f_logical_or(&labels.f_eq(self.config.ignore_index)?)?;
        let uc_map = self.mask_ineligible(&uc_map, &ineligible)?;

        let query = self.select_queries(&uc_map, &ineligible.f_logical_not()?)?;
        stats.update(&query, &labels, &prob)?;

        Ok((query, stats))
    }

    /// Predicts the probability and uncertainty maps of a `[1, channels, height, width]` input.
    ///
    /// In MC-dropout mode both maps are averaged over repeated forward passes.
    pub fn predict<M>(&self, model: &mut M, input: &Tensor) -> Result<(Tensor, Tensor)>
    where
        M: SegmentationModel + ?Sized,
    {
        let (_b, _c, height, width) = input.size4()?;
        let n_classes = self.config.n_classes.get() as i64;

        let input = input.f_to_device(self.config.device)?;
        let input = if self.config.pads_to_stride() {
            input.f_pad_to_multiple(self.config.stride_total.get() as i64)?
        } else {
            input
        };

        let mut forward = || -> Result<_> {
            let logits = model.predict(&input)?;
            let (_b, n_channels, _h, _w) = logits.size4()?;
            ensure!(
                n_channels == n_classes,
                "the model predicts {} classes, but {} classes are configured",
                n_channels,
                n_classes
            );

            // crop padded borders
            let prob = logits
                .i((.., .., ..height, ..width))
                .f_softmax(1, Kind::Float)?;
            let uc_map = self.scorer.score(&prob)?;
            Ok((prob, uc_map))
        };

        tch::no_grad(|| -> Result<_> {
            if self.config.use_mc_dropout {
                let samples: Vec<_> = (0..self.config.mc_n_steps.get())
                    .map(|_| forward())
                    .try_collect()?;
                let (probs, uc_maps): (Vec<_>, Vec<_>) = samples.into_iter().unzip();
                let prob = Tensor::f_mean_tensors(&probs)?;
                let uc_map = Tensor::f_mean_tensors(&uc_maps)?;
                Ok((prob, uc_map))
            } else {
                forward()
            }
        })
    }

    /// Assigns the never-selected score of the strategy to ineligible pixels.
    pub fn mask_ineligible(&self, uc_map: &Tensor, ineligible: &Tensor) -> Result<Tensor> {
        let masked = uc_map.f_masked_fill(ineligible, self.scorer.strategy().mask_value())?;
        Ok(masked)
    }

    /// Selects the query mask from a `[height, width]` uncertainty map.
    ///
    /// `selectable` is a `[height, width]` bool mask of pixels that may be queried.
    pub fn select_queries(&mut self, uc_map: &Tensor, selectable: &Tensor) -> Result<Tensor> {
        Ok(self.select(uc_map, selectable)?.query)
    }

    pub fn select(&mut self, uc_map: &Tensor, selectable: &Tensor) -> Result<Selection> {
        let (height, width) = uc_map.size2()?;
        ensure!(
            selectable.size() == [height, width],
            "selectable mask shape {:?} does not match uncertainty map size {}x{}",
            selectable.size(),
            height,
            width
        );

        let device = uc_map.device();
        let strategy = self.scorer.strategy();
        let n_pixels = self.config.n_pixels_by_us.get() as i64;
        let k = self.config.candidate_budget(height, width);
        let scores = uc_map.f_flatten(0, -1)?;
        let selectable = selectable.f_flatten(0, -1)?.f_to_device(device)?;

        let (indices, candidates) = if self.config.reverse_order {
            // draw the candidate pool at random, then rank within it
            let n_positions = (height * width) as usize;
            let drawn: Vec<i64> =
                rand::seq::index::sample(&mut self.rng, n_positions, (k as usize).min(n_positions))
                    .into_iter()
                    .map(|index| index as i64)
                    .collect();
            let candidates = Tensor::f_mask_from_flat_indices(&drawn, height, width, device)?;

            let in_pool = candidates.f_view([-1])?;
            let scores = scores.f_masked_fill(&in_pool.f_logical_not()?, strategy.mask_value())?;
            let selectable = selectable.f_logical_and(&in_pool)?;
            let indices = top_k(&scores, &selectable, n_pixels, strategy)?;

            (indices, Some(candidates))
        } else {
            let indices = top_k(&scores, &selectable, k, strategy)?;
            let indices = if self.config.uses_percentage_budget() && indices.len() as i64 > n_pixels
            {
                indices
                    .choose_multiple(&mut self.rng, n_pixels as usize)
                    .cloned()
                    .collect()
            } else {
                indices
            };

            (indices, None)
        };

        let query = Tensor::f_mask_from_flat_indices(&indices, height, width, device)?;
        Ok(Selection { query, candidates })
    }
}

/// Takes the flat indices of the `k` most uncertain selectable pixels.
///
/// The count is clamped to the number of selectable pixels.
fn top_k(scores: &Tensor, selectable: &Tensor, k: i64, strategy: QueryStrategy) -> Result<Vec<i64>> {
    let n_selectable = selectable.f_count_true()?;
    let k = if k > n_selectable {
        debug!(
            "budget {} exceeds {} selectable pixels, clamp to the latter",
            k, n_selectable
        );
        n_selectable
    } else {
        k
    };

    if k == 0 {
        return Ok(vec![]);
    }

    let largest = strategy.largest_first();
    let excluded = if largest {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    };
    let ranked = scores.f_masked_fill(&selectable.f_logical_not()?, excluded)?;
    let (_, indices) = ranked.f_topk(k, 0, largest, false)?;
    let indices = Vec::<i64>::from(&indices.f_to_device(Device::Cpu)?);
    Ok(indices)
}
