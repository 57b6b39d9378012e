use candle_core::{DType, Tensor};

use crate::model::RobertaEncoder;
use crate::{ExportError, Result};

/// Averages `hidden` (`[batch, seq, hidden]`) over the positions where
/// `attention_mask` (`[batch, seq]`) is 1, giving `[batch, hidden]`.
///
/// A row without any unmasked position has no defined mean and is rejected
/// with [`ExportError::EmptyAttentionMask`].
pub fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let mask = attention_mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?;

    let per_row = counts.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    if let Some(row) = per_row.iter().position(|&count| count == 0.0) {
        return Err(ExportError::EmptyAttentionMask(row));
    }

    Ok(summed.broadcast_div(&counts)?)
}

/// Encoder wrapped with the mean-pooling head.
pub struct Embedder {
    encoder: RobertaEncoder,
}

impl Embedder {
    pub fn new(encoder: RobertaEncoder) -> Self {
        Self { encoder }
    }

    pub fn encoder(&self) -> &RobertaEncoder {
        &self.encoder
    }

    pub fn hidden_size(&self) -> usize {
        self.encoder.hidden_size()
    }

    /// Returns one pooled vector per sequence, `[batch, hidden]`.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let hidden = self.encoder.forward(input_ids, attention_mask)?;
        mean_pool(&hidden, attention_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use proptest::prelude::*;

    fn hidden_from(values: Vec<f32>, seq_len: usize, width: usize) -> Tensor {
        Tensor::from_vec(values, (1, seq_len, width), &Device::Cpu).unwrap()
    }

    fn mask_from(bits: Vec<u32>) -> Tensor {
        let len = bits.len();
        Tensor::from_vec(bits, (1, len), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_full_mask_is_plain_mean() -> anyhow::Result<()> {
        let hidden = hidden_from(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, -3.0, 0.5, 9.0], 3, 3);
        let pooled = mean_pool(&hidden, &mask_from(vec![1, 1, 1]))?;

        assert_eq!(pooled.dims(), &[1, 3]);
        let pooled = pooled.to_vec2::<f32>()?;
        let expected = [2.0 / 3.0, 2.5, 6.0];
        for (got, want) in pooled[0].iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "got {} want {}", got, want);
        }
        Ok(())
    }

    #[test]
    fn test_masked_positions_are_ignored() -> anyhow::Result<()> {
        let hidden = hidden_from(vec![2.0, 4.0, 100.0, -100.0, 6.0, 8.0], 3, 2);
        let pooled = mean_pool(&hidden, &mask_from(vec![1, 0, 1]))?.to_vec2::<f32>()?;
        assert_eq!(pooled, vec![vec![4.0, 6.0]]);
        Ok(())
    }

    #[test]
    fn test_rows_pool_independently() -> anyhow::Result<()> {
        let hidden = Tensor::from_vec(
            vec![1.0f32, 3.0, 5.0, 7.0, 10.0, 20.0, 30.0, 40.0],
            (2, 2, 2),
            &Device::Cpu,
        )?;
        let mask = Tensor::from_vec(vec![1u32, 1, 0, 1], (2, 2), &Device::Cpu)?;
        let pooled = mean_pool(&hidden, &mask)?.to_vec2::<f32>()?;
        assert_eq!(pooled, vec![vec![3.0, 5.0], vec![30.0, 40.0]]);
        Ok(())
    }

    #[test]
    fn test_empty_mask_is_rejected() {
        let hidden = hidden_from(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
        let err = mean_pool(&hidden, &mask_from(vec![0, 0])).unwrap_err();
        assert!(matches!(err, ExportError::EmptyAttentionMask(0)));
    }

    proptest! {
        #[test]
        fn prop_masked_values_do_not_matter(
            kept in proptest::collection::vec(-50.0f32..50.0, 4),
            noise_a in proptest::collection::vec(-1e3f32..1e3, 4),
            noise_b in proptest::collection::vec(-1e3f32..1e3, 4),
        ) {
            // Positions 0 and 2 are real tokens, 1 and 3 padding
            let layout = |noise: &[f32]| -> Vec<f32> {
                vec![kept[0], kept[1], noise[0], noise[1], kept[2], kept[3], noise[2], noise[3]]
            };
            let mask = mask_from(vec![1, 0, 1, 0]);
            let a = mean_pool(&hidden_from(layout(&noise_a), 4, 2), &mask).unwrap().to_vec2::<f32>().unwrap();
            let b = mean_pool(&hidden_from(layout(&noise_b), 4, 2), &mask).unwrap().to_vec2::<f32>().unwrap();

            prop_assert_eq!(&a, &b);
            prop_assert!((a[0][0] - (kept[0] + kept[2]) / 2.0).abs() < 1e-4);
            prop_assert!((a[0][1] - (kept[1] + kept[3]) / 2.0).abs() < 1e-4);
        }
    }
}
