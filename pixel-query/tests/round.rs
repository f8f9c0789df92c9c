use anyhow::{ensure, Result};
use approx::abs_diff_eq;
use pixel_query::{
    InferenceMode, MemoryPool, MemoryStatsStore, PoolRecord, QueryConfig, QueryError,
    QuerySelector, QueryStrategy, SegmentationModel,
};
use std::num::NonZeroUsize;
use tch::{Device, IndexOp, Kind, Tensor};
use tch_goodies::TensorExt as _;

/// A model that predicts a fixed probability map, resized to the input.
struct FixedModel {
    log_prob: Tensor,
    calls: usize,
    mode: Option<InferenceMode>,
    input_sizes: Vec<Vec<i64>>,
}

impl FixedModel {
    fn new(prob: &Tensor) -> Self {
        Self {
            log_prob: prob.clamp_min(1e-16).log(),
            calls: 0,
            mode: None,
            input_sizes: vec![],
        }
    }
}

impl SegmentationModel for FixedModel {
    fn predict(&mut self, input: &Tensor) -> Result<Tensor> {
        let (_b, _c, height, width) = input.size4()?;
        let (_b, n_classes, prob_h, prob_w) = self.log_prob.size4()?;
        self.calls += 1;
        self.input_sizes.push(input.size());

        let logits = Tensor::zeros(&[1, n_classes, height, width], tch::kind::FLOAT_CPU);
        logits
            .i((.., .., ..prob_h, ..prob_w))
            .copy_(&self.log_prob);
        Ok(logits)
    }

    fn set_mode(&mut self, mode: InferenceMode) -> Result<()> {
        self.mode = Some(mode);
        Ok(())
    }
}

/// A model that cycles through a list of logits, one per call.
struct CyclingModel {
    logits: Vec<Tensor>,
    calls: usize,
}

impl SegmentationModel for CyclingModel {
    fn predict(&mut self, _input: &Tensor) -> Result<Tensor> {
        let logits = self.logits[self.calls % self.logits.len()].shallow_clone();
        self.calls += 1;
        Ok(logits)
    }

    fn set_mode(&mut self, _mode: InferenceMode) -> Result<()> {
        Ok(())
    }
}

fn config(strategy: QueryStrategy, n_pixels: usize, n_classes: usize) -> QueryConfig {
    let mut config = QueryConfig::new(
        strategy,
        NonZeroUsize::new(n_pixels).unwrap(),
        NonZeroUsize::new(n_classes).unwrap(),
        "cityscapes",
    );
    config.seed = Some(0);
    config
}

fn random_record(n_classes: i64, height: i64, width: i64) -> Result<PoolRecord> {
    PoolRecord::unlabelled(
        Tensor::rand(&[3, height, width], tch::kind::FLOAT_CPU),
        Tensor::randint(n_classes, &[height, width], tch::kind::INT64_CPU),
    )
}

fn random_prob(n_classes: i64, height: i64, width: i64) -> Tensor {
    Tensor::randn(&[1, n_classes, height, width], tch::kind::FLOAT_CPU).softmax(1, Kind::Float)
}

#[test]
fn least_confidence_skips_labelled_pixels() -> Result<()> {
    // the least confidence scores are 0.4, 0.1, 0.3 and 0.01
    let prob = Tensor::of_slice(&[0.4f32, 0.9, 0.7, 0.99, 0.6, 0.1, 0.3, 0.01]).view([1, 2, 2, 2]);
    let mut model = FixedModel::new(&prob);

    let labelled = Tensor::mask_from_flat_indices(&[0], 2, 2, Device::Cpu);
    let record = PoolRecord::new(
        Tensor::rand(&[3, 2, 2], tch::kind::FLOAT_CPU),
        Tensor::zeros(&[2, 2], tch::kind::INT64_CPU),
        labelled,
    )?;
    let mut pool = MemoryPool::new(vec![record]);

    let mut selector = QuerySelector::new(
        config(QueryStrategy::LeastConfidence, 1, 2),
        MemoryStatsStore::default(),
    )?;
    let queries = selector.run(0, &mut model, &mut pool)?;

    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].true_coordinates(), [(1, 0)]);
    assert_eq!(model.mode, Some(InferenceMode::Eval));
    assert_eq!(pool.labelled(0).unwrap().true_flat_indices(), [0, 2]);
    Ok(())
}

#[test]
fn least_confidence_avoids_confident_pixel() -> Result<()> {
    // pixel (0, 0) predicts [0.9, 0.05, 0.05], the others [0.33, 0.33, 0.34]
    let prob = Tensor::of_slice(&[
        0.9f32, 0.33, 0.33, 0.33,
        0.05, 0.33, 0.33, 0.33,
        0.05, 0.34, 0.34, 0.34,
    ])
    .view([1, 3, 2, 2]);

    for seed in 0..8 {
        let mut model = FixedModel::new(&prob);
        let mut pool = MemoryPool::new(vec![PoolRecord::unlabelled(
            Tensor::rand(&[3, 2, 2], tch::kind::FLOAT_CPU),
            Tensor::zeros(&[2, 2], tch::kind::INT64_CPU),
        )?]);

        let mut config = config(QueryStrategy::LeastConfidence, 1, 3);
        config.seed = Some(seed);
        let mut selector = QuerySelector::new(config, MemoryStatsStore::default())?;

        let queries = selector.run(0, &mut model, &mut pool)?;
        let coords = queries[0].true_coordinates();
        assert_eq!(coords.len(), 1);
        assert_ne!(coords[0], (0, 0), "seed {} selects the confident pixel", seed);
    }
    Ok(())
}

#[test]
fn fully_labelled_pool_is_exhausted() -> Result<()> {
    let mut model = FixedModel::new(&random_prob(3, 4, 4));
    let record = PoolRecord::new(
        Tensor::rand(&[3, 4, 4], tch::kind::FLOAT_CPU),
        Tensor::randint(3, &[4, 4], tch::kind::INT64_CPU),
        Tensor::ones(&[4, 4], (Kind::Bool, Device::Cpu)),
    )?;
    let mut pool = MemoryPool::new(vec![record]);

    let mut selector =
        QuerySelector::new(config(QueryStrategy::Entropy, 5, 3), MemoryStatsStore::default())?;
    let error = selector.run(0, &mut model, &mut pool).unwrap_err();

    assert_eq!(
        error.downcast_ref::<QueryError>(),
        Some(&QueryError::BudgetExhausted { round: 0 })
    );
    assert_eq!(pool.labelled(0).unwrap().count_true(), 16);
    assert!(pool.queries(1).is_none());
    Ok(())
}

#[test]
fn exhausted_budget_commits_nothing() -> Result<()> {
    let mut model = FixedModel::new(&random_prob(3, 4, 4));
    let record = PoolRecord::unlabelled(
        Tensor::rand(&[3, 4, 4], tch::kind::FLOAT_CPU),
        Tensor::full(&[4, 4], 255i64, tch::kind::INT64_CPU),
    )?;
    let mut pool = MemoryPool::new(vec![record]);

    let mut selector =
        QuerySelector::new(config(QueryStrategy::Entropy, 5, 3), MemoryStatsStore::default())?;
    let error = selector.run(2, &mut model, &mut pool).unwrap_err();

    assert_eq!(
        error.downcast_ref::<QueryError>(),
        Some(&QueryError::BudgetExhausted { round: 2 })
    );
    assert_eq!(pool.labelled(0).unwrap().count_true(), 0);
    assert!(pool.queries(3).is_none());

    // statistics are saved before the round is aborted
    let snapshot = selector
        .store()
        .get(2)
        .ok_or_else(|| anyhow::format_err!("missing statistics"))?;
    assert!(snapshot.label_distribution.values().all(|&count| count == 0));
    Ok(())
}

#[test]
fn consecutive_rounds_grow_labels() -> Result<()> {
    let n_classes = 4;
    let mut model = FixedModel::new(&random_prob(n_classes, 6, 6));
    let mut pool = MemoryPool::new(vec![
        random_record(n_classes, 6, 6)?,
        random_record(n_classes, 6, 6)?,
    ]);

    let mut selector = QuerySelector::new(
        config(QueryStrategy::Entropy, 3, n_classes as usize),
        MemoryStatsStore::default(),
    )?;

    let first = selector.run(0, &mut model, &mut pool)?;
    for (index, query) in first.iter().enumerate() {
        assert_eq!(query.count_true(), 3);
        assert_eq!(pool.labelled(index).unwrap().count_true(), 3);
    }
    let snapshot = selector.store().get(0).unwrap();
    assert_eq!(snapshot.label_distribution.values().sum::<u64>(), 6);
    assert_eq!(snapshot.label_distribution.len(), n_classes as usize);

    // the model is unchanged, so the next round must move to other pixels
    let second = selector.run(1, &mut model, &mut pool)?;
    for (index, (prev, next)) in first.iter().zip(&second).enumerate() {
        assert_eq!(prev.logical_and(next).count_true(), 0);
        assert_eq!(pool.labelled(index).unwrap().count_true(), 6);
    }
    assert_eq!(pool.queries(1).map(|queries| queries.len()), Some(2));
    assert_eq!(pool.queries(2).map(|queries| queries.len()), Some(2));
    assert_eq!(selector.store().rounds().collect::<Vec<_>>(), [0, 1]);
    Ok(())
}

#[test]
fn mc_dropout_repeats_inference() -> Result<()> {
    let n_images = 3;
    let mut model = FixedModel::new(&random_prob(2, 5, 5));
    let records: Vec<_> = (0..n_images)
        .map(|_| random_record(2, 5, 5))
        .collect::<Result<_>>()?;
    let mut pool = MemoryPool::new(records);

    let mut config = config(QueryStrategy::MarginSampling, 2, 2);
    config.use_mc_dropout = true;
    config.mc_n_steps = NonZeroUsize::new(5).unwrap();
    let mut selector = QuerySelector::new(config, MemoryStatsStore::default())?;

    let queries = selector.run(0, &mut model, &mut pool)?;
    assert_eq!(model.calls, 5 * n_images);
    assert_eq!(model.mode, Some(InferenceMode::McDropout));
    ensure!(queries.iter().all(|query| query.count_true() == 2));
    Ok(())
}

#[test]
fn mc_dropout_averages_uncertainty_maps() -> Result<()> {
    let one_hot_logits = |class: usize| {
        let mut prob = [0f32; 2];
        prob[class] = 1.0;
        Tensor::of_slice(&prob)
            .view([1, 2, 1, 1])
            .clamp_min(1e-16)
            .log()
    };
    let mut model = CyclingModel {
        logits: vec![one_hot_logits(0), one_hot_logits(1)],
        calls: 0,
    };

    let mut config = config(QueryStrategy::Entropy, 1, 2);
    config.use_mc_dropout = true;
    config.mc_n_steps = NonZeroUsize::new(2).unwrap();
    let selector = QuerySelector::new(config, MemoryStatsStore::default())?;

    let input = Tensor::rand(&[1, 3, 1, 1], tch::kind::FLOAT_CPU);
    let (prob, uc_map) = selector.predict(&mut model, &input)?;
    assert_eq!(model.calls, 2);
    assert_eq!(uc_map.size(), [1, 1]);

    let prob = Vec::<f32>::from(&prob.view([-1]));
    ensure!(abs_diff_eq!(prob[0], 0.5, epsilon = 1e-6));
    ensure!(abs_diff_eq!(prob[1], 0.5, epsilon = 1e-6));

    // the mean of two zero entropies, not the entropy of the mean prediction
    let entropy = Vec::<f32>::from(&uc_map.view([-1]))[0];
    ensure!(abs_diff_eq!(entropy, 0.0, epsilon = 1e-6));
    ensure!(!abs_diff_eq!(entropy as f64, 2f64.ln(), epsilon = 1e-3));
    Ok(())
}

#[test]
fn voc_inputs_are_padded_to_stride() -> Result<()> {
    let mut model = FixedModel::new(&random_prob(3, 10, 13));
    let mut pool = MemoryPool::new(vec![random_record(3, 10, 13)?]);

    let mut config = config(QueryStrategy::Random, 7, 3);
    config.dataset_name = "voc".into();
    config.stride_total = NonZeroUsize::new(8).unwrap();
    let mut selector = QuerySelector::new(config, MemoryStatsStore::default())?;

    let queries = selector.run(0, &mut model, &mut pool)?;
    assert_eq!(model.input_sizes, [vec![1, 3, 16, 16]]);
    assert_eq!(queries[0].size(), [10, 13]);
    assert_eq!(queries[0].count_true(), 7);
    Ok(())
}
