use crate::common::*;

pub trait TensorExt {
    fn is_empty(&self) -> bool;

    fn f_sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        let mut iter = tensors.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| format_err!("the input iterator must not be empty"))?
            .borrow()
            .shallow_clone();
        let sum = iter.try_fold(first, |lhs, rhs| lhs.f_add(rhs.borrow()))?;
        Ok(sum)
    }

    fn sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Tensor
    where
        T: Borrow<Tensor>,
    {
        Self::f_sum_tensors(tensors).unwrap()
    }

    fn f_mean_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        let tensors: Vec<_> = tensors.into_iter().collect();
        let count = tensors.len();
        let sum = Self::f_sum_tensors(tensors)?;
        Ok(sum / count as f64)
    }

    fn mean_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Tensor
    where
        T: Borrow<Tensor>,
    {
        Self::f_mean_tensors(tensors).unwrap()
    }

    /// Reflect-pads the bottom and right borders of a `[batch, channel, height, width]`
    /// tensor so that both spatial sizes become multiples of `stride`.
    fn f_pad_to_multiple(&self, stride: i64) -> Result<Tensor>;

    fn pad_to_multiple(&self, stride: i64) -> Tensor {
        self.f_pad_to_multiple(stride).unwrap()
    }

    /// Counts true entries of a boolean tensor.
    fn f_count_true(&self) -> Result<i64>;

    fn count_true(&self) -> i64 {
        self.f_count_true().unwrap()
    }

    /// Lists the row-major flat indices of true entries of a boolean tensor.
    fn f_true_flat_indices(&self) -> Result<Vec<i64>>;

    fn true_flat_indices(&self) -> Vec<i64> {
        self.f_true_flat_indices().unwrap()
    }

    /// Lists the `(row, col)` coordinates of true entries of a 2D boolean tensor.
    fn f_true_coordinates(&self) -> Result<Vec<(i64, i64)>>;

    fn true_coordinates(&self) -> Vec<(i64, i64)> {
        self.f_true_coordinates().unwrap()
    }

    /// Builds a `[height, width]` boolean mask with the given flat indices set.
    fn f_mask_from_flat_indices(
        indices: &[i64],
        height: i64,
        width: i64,
        device: Device,
    ) -> Result<Tensor>;

    fn mask_from_flat_indices(indices: &[i64], height: i64, width: i64, device: Device) -> Tensor {
        Self::f_mask_from_flat_indices(indices, height, width, device).unwrap()
    }
}

impl TensorExt for Tensor {
    fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    fn f_pad_to_multiple(&self, stride: i64) -> Result<Tensor> {
        ensure!(stride > 0, "stride must be positive, but get {}", stride);
        let (_b, _c, height, width) = self.size4()?;

        let pad_h = (height + stride - 1) / stride * stride - height;
        let pad_w = (width + stride - 1) / stride * stride - width;

        if pad_h == 0 && pad_w == 0 {
            return Ok(self.shallow_clone());
        }

        ensure!(
            pad_h < height && pad_w < width,
            "reflection padding ({}, {}) must be smaller than input size ({}, {})",
            pad_h,
            pad_w,
            height,
            width
        );

        let padded = self.f_reflection_pad2d(&[0, pad_w, 0, pad_h])?;
        Ok(padded)
    }

    fn f_count_true(&self) -> Result<i64> {
        ensure!(
            self.kind() == Kind::Bool,
            "expect a bool tensor, but get {:?}",
            self.kind()
        );
        let count = i64::from(self.f_sum(Kind::Int64)?);
        Ok(count)
    }

    fn f_true_flat_indices(&self) -> Result<Vec<i64>> {
        ensure!(
            self.kind() == Kind::Bool,
            "expect a bool tensor, but get {:?}",
            self.kind()
        );
        let indices = self
            .f_flatten(0, -1)?
            .f_nonzero()?
            .f_view([-1])?
            .f_to_device(Device::Cpu)?;
        Ok(Vec::<i64>::from(&indices))
    }

    fn f_true_coordinates(&self) -> Result<Vec<(i64, i64)>> {
        let (_height, width) = self.size2()?;
        let coords = self
            .f_true_flat_indices()?
            .into_iter()
            .map(|index| (index / width, index % width))
            .collect();
        Ok(coords)
    }

    fn f_mask_from_flat_indices(
        indices: &[i64],
        height: i64,
        width: i64,
        device: Device,
    ) -> Result<Tensor> {
        let numel = height * width;
        let mut mask = vec![false; numel as usize];

        for &index in indices {
            ensure!(
                (0..numel).contains(&index),
                "flat index {} is out of range for a {}x{} mask",
                index,
                height,
                width
            );
            mask[index as usize] = true;
        }

        let mask = Tensor::of_slice(&mask)
            .f_view([height, width])?
            .f_to_device(device)?;
        Ok(mask)
    }
}
