//! Pools of partially labelled images.

use crate::common::*;

pub use memory::*;
pub use tensor_file::*;

const INPUT_NAME: &str = "x";
const LABELS_NAME: &str = "y";
const LABELLED_NAME: &str = "labelled";
const QUERY_NAME: &str = "query";

/// An image in the query pool.
#[derive(Debug)]
pub struct PoolRecord {
    /// The `[1, channels, height, width]` input image.
    pub input: Tensor,
    /// The `[height, width]` int64 ground truth labels.
    pub labels: Tensor,
    /// The `[height, width]` bool mask of pixels labelled in former rounds.
    pub labelled: Tensor,
}

impl PoolRecord {
    pub fn new(input: Tensor, labels: Tensor, labelled: Tensor) -> Result<Self> {
        let input = match input.dim() {
            3 => input.f_unsqueeze(0)?,
            4 => input,
            dim => bail!("expect a 3 or 4 dimensional input, but get {} dimensions", dim),
        };
        let (batch_size, _c, height, width) = input.size4()?;
        ensure!(
            batch_size == 1,
            "expect a single image per record, but get batch size {}",
            batch_size
        );
        ensure!(
            labels.size() == [height, width],
            "label shape {:?} does not match image size {}x{}",
            labels.size(),
            height,
            width
        );
        ensure!(
            labelled.size() == [height, width] && labelled.kind() == Kind::Bool,
            "expect a {}x{} bool labelled mask",
            height,
            width
        );

        Ok(Self {
            input,
            labels: labels.f_to_kind(Kind::Int64)?,
            labelled,
        })
    }

    /// Creates a record without labelled pixels.
    pub fn unlabelled(input: Tensor, labels: Tensor) -> Result<Self> {
        let labelled = labels.f_zeros_like()?.f_to_kind(Kind::Bool)?;
        Self::new(input, labels, labelled)
    }

    pub fn size(&self) -> (i64, i64) {
        let size = self.labels.size();
        (size[0], size[1])
    }
}

/// The labelling pool collaborator of a query round.
pub trait QueryPool {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, index: usize) -> Result<PoolRecord>;

    /// Commits queried pixels as labelled for the round `next_round`.
    ///
    /// Calling it again with the same round and masks leaves the pool unchanged.
    fn label_queries(&mut self, queries: &[Tensor], next_round: usize) -> Result<()>;
}

fn merge_labelled(labelled: &Tensor, query: &Tensor) -> Result<Tensor> {
    ensure!(
        labelled.size() == query.size(),
        "query shape {:?} does not match labelled mask shape {:?}",
        query.size(),
        labelled.size()
    );
    let merged = labelled.f_logical_or(&query.f_to_device(labelled.device())?)?;
    Ok(merged)
}

mod memory {
    use super::*;

    /// A pool kept in memory.
    #[derive(Debug, Default)]
    pub struct MemoryPool {
        records: Vec<PoolRecord>,
        queries: BTreeMap<usize, Vec<Tensor>>,
    }

    impl MemoryPool {
        pub fn new(records: impl IntoIterator<Item = PoolRecord>) -> Self {
            Self {
                records: records.into_iter().collect(),
                queries: BTreeMap::new(),
            }
        }

        pub fn labelled(&self, index: usize) -> Option<&Tensor> {
            Some(&self.records.get(index)?.labelled)
        }

        /// The queries committed for a round.
        pub fn queries(&self, round: usize) -> Option<&[Tensor]> {
            self.queries.get(&round).map(|queries| queries.as_slice())
        }
    }

    impl QueryPool for MemoryPool {
        fn len(&self) -> usize {
            self.records.len()
        }

        fn record(&self, index: usize) -> Result<PoolRecord> {
            let PoolRecord {
                input,
                labels,
                labelled,
            } = self
                .records
                .get(index)
                .ok_or_else(|| format_err!("record index {} is out of range", index))?;

            Ok(PoolRecord {
                input: input.shallow_clone(),
                labels: labels.shallow_clone(),
                labelled: labelled.shallow_clone(),
            })
        }

        fn label_queries(&mut self, queries: &[Tensor], next_round: usize) -> Result<()> {
            ensure!(
                queries.len() == self.records.len(),
                "expect {} query masks, but get {}",
                self.records.len(),
                queries.len()
            );

            let merged: Vec<_> = self
                .records
                .iter()
                .zip(queries)
                .map(|(record, query)| merge_labelled(&record.labelled, query))
                .try_collect()?;

            self.records
                .iter_mut()
                .zip(merged)
                .for_each(|(record, labelled)| record.labelled = labelled);
            self.queries.insert(
                next_round,
                queries.iter().map(|query| query.shallow_clone()).collect(),
            );

            Ok(())
        }
    }
}

mod tensor_file {
    use super::*;

    /// A pool stored as a directory of tensor files.
    ///
    /// Each `<name>.ot` file stores the input `x` and the labels `y`, and
    /// optionally an initial `labelled` mask. The labelled state is kept in
    /// `labelled/<name>.ot` and the queries of round `n` in `queries/<n>/<name>.ot`.
    #[derive(Debug)]
    pub struct TensorFilePool {
        dir: PathBuf,
        files: Vec<PathBuf>,
    }

    impl TensorFilePool {
        pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
            let dir = dir.as_ref();
            ensure!(dir.is_dir(), "'{}' is not a directory", dir.display());

            let pattern = format!("{}/*.ot", dir.display());
            let files: Vec<PathBuf> = glob::glob(&pattern)?
                .try_collect()
                .with_context(|| format!("failed to list files in '{}'", dir.display()))?;
            let files: Vec<_> = files.into_iter().sorted().collect();
            info!("found {} images in '{}'", files.len(), dir.display());

            Ok(Self {
                dir: dir.to_owned(),
                files,
            })
        }

        fn stem(&self, index: usize) -> Result<&str> {
            let path = self
                .files
                .get(index)
                .ok_or_else(|| format_err!("record index {} is out of range", index))?;
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| format_err!("invalid file name '{}'", path.display()))
        }

        fn labelled_path(&self, index: usize) -> Result<PathBuf> {
            let stem = self.stem(index)?;
            Ok(self.dir.join("labelled").join(format!("{}.ot", stem)))
        }

        fn query_path(&self, index: usize, round: usize) -> Result<PathBuf> {
            let stem = self.stem(index)?;
            Ok(self
                .dir
                .join("queries")
                .join(round.to_string())
                .join(format!("{}.ot", stem)))
        }
    }

    impl QueryPool for TensorFilePool {
        fn len(&self) -> usize {
            self.files.len()
        }

        fn record(&self, index: usize) -> Result<PoolRecord> {
            let path = self
                .files
                .get(index)
                .ok_or_else(|| format_err!("record index {} is out of range", index))?;
            let mut named: BTreeMap<_, _> = Tensor::load_multi(path)
                .with_context(|| format!("failed to load '{}'", path.display()))?
                .into_iter()
                .collect();

            let input = named
                .remove(INPUT_NAME)
                .ok_or_else(|| format_err!("'{}' has no '{}' tensor", path.display(), INPUT_NAME))?
                .f_to_kind(Kind::Float)?;
            let labels = named.remove(LABELS_NAME).ok_or_else(|| {
                format_err!("'{}' has no '{}' tensor", path.display(), LABELS_NAME)
            })?;

            let labelled_path = self.labelled_path(index)?;
            let labelled = if labelled_path.is_file() {
                Tensor::load(&labelled_path)?
            } else if let Some(labelled) = named.remove(LABELLED_NAME) {
                labelled
            } else {
                labels.f_zeros_like()?
            };

            PoolRecord::new(input, labels, labelled.f_to_kind(Kind::Bool)?)
        }

        fn label_queries(&mut self, queries: &[Tensor], next_round: usize) -> Result<()> {
            ensure!(
                queries.len() == self.files.len(),
                "expect {} query masks, but get {}",
                self.files.len(),
                queries.len()
            );

            fs::create_dir_all(self.dir.join("labelled"))?;
            fs::create_dir_all(self.dir.join("queries").join(next_round.to_string()))?;

            for (index, query) in queries.iter().enumerate() {
                let query = query.f_to_device(Device::Cpu)?;
                let labelled = merge_labelled(&self.record(index)?.labelled, &query)?;

                Tensor::save_multi(&[(QUERY_NAME, &query)], self.query_path(index, next_round)?)?;
                labelled.save(self.labelled_path(index)?)?;
            }

            info!(
                "committed queries of {} images for round {}",
                queries.len(),
                next_round
            );
            Ok(())
        }
    }
}
