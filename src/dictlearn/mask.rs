//! Soft masking of a mixture spectrum by synthesized instrument spectra.

use ndarray::{Array2, Zip};

use crate::{SeparationError, SeparationResult};

/// Total energy below which a cell is split evenly between instruments.
pub const MASK_FLOOR: f64 = 1e-12;

/// Masks and masked estimates for every instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedSpectra {
    /// Mixture spectrum weighted by each instrument's mask.
    pub inst_spectrums: Vec<Array2<f64>>,
    /// Per-instrument masks, in `[0, 1]` and summing to one in every cell.
    pub masks: Vec<Array2<f64>>,
    /// Sum of the masked estimates.
    pub combined: Array2<f64>,
}

/// Splits `reference` between instruments in proportion to their synthesized
/// energy.
///
/// The mask of instrument `i` is `s_i² / Σ_j s_j²`; where the total energy is
/// below [`MASK_FLOOR`] every instrument receives `1 / n`. The masks are
/// applied to `reference`, never to the synthesized spectra.
///
/// # Errors
/// Returns `InvalidParameter` if no instrument spectrum is given and
/// `DimensionMismatch` if any spectrum differs in shape from `reference`.
pub fn mask_spectrums(
    inst_spectrums: &[Array2<f64>],
    reference: &Array2<f64>,
) -> SeparationResult<MaskedSpectra> {
    if inst_spectrums.is_empty() {
        return Err(SeparationError::invalid_parameter(
            "inst_spectrums",
            "at least one instrument spectrum is required",
        ));
    }
    if let Some(spectrum) = inst_spectrums.iter().find(|s| s.dim() != reference.dim()) {
        return Err(SeparationError::DimensionMismatch(format!(
            "Instrument spectrum has shape {:?}, reference has {:?}",
            spectrum.dim(),
            reference.dim()
        )));
    }

    let uniform = 1.0 / inst_spectrums.len() as f64;
    let mut total = Array2::<f64>::zeros(reference.dim());
    for spectrum in inst_spectrums {
        Zip::from(&mut total)
            .and(spectrum)
            .for_each(|t, &s| *t += s * s);
    }

    let masks: Vec<Array2<f64>> = inst_spectrums
        .iter()
        .map(|spectrum| {
            Zip::from(spectrum)
                .and(&total)
                .map_collect(|&s, &t| if t > MASK_FLOOR { s * s / t } else { uniform })
        })
        .collect();
    let masked: Vec<Array2<f64>> = masks.iter().map(|mask| mask * reference).collect();

    let mut combined = Array2::<f64>::zeros(reference.dim());
    for estimate in &masked {
        combined += estimate;
    }

    Ok(MaskedSpectra {
        inst_spectrums: masked,
        masks,
        combined,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_masks_sum_to_one() {
        let a = array![[3.0, 0.0, 0.0], [1.0, 2.0, 0.0]];
        let b = array![[4.0, 1.0, 0.0], [0.0, 2.0, 0.0]];
        let reference = array![[5.0, 1.0, 2.0], [1.0, 4.0, 6.0]];
        let result = mask_spectrums(&[a, b], &reference).unwrap();

        for ((row, col), _) in reference.indexed_iter() {
            let sum: f64 = result.masks.iter().map(|m| m[[row, col]]).sum();
            assert!((sum - 1.0).abs() < 1e-12);
            for mask in &result.masks {
                assert!((0.0..=1.0).contains(&mask[[row, col]]));
            }
        }
        assert!((result.masks[0][[0, 0]] - 9.0 / 25.0).abs() < 1e-12);
        // silent cell falls back to an even split
        assert_eq!(result.masks[0][[0, 2]], 0.5);
        assert_eq!(result.inst_spectrums[1][[1, 2]], 3.0);
    }

    #[test]
    fn test_masked_estimates_recombine_to_reference() {
        let a = array![[0.2, 0.7], [0.0, 1.0]];
        let b = array![[0.9, 0.1], [0.5, 1.0]];
        let c = array![[0.3, 0.3], [0.0, 0.0]];
        let reference = array![[1.5, 2.0], [0.25, 4.0]];
        let result = mask_spectrums(&[a, b, c], &reference).unwrap();
        for (combined, expected) in result.combined.iter().zip(reference.iter()) {
            assert!((combined - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_shape_mismatch_and_empty_input() {
        let reference = Array2::zeros((2, 2));
        assert!(matches!(
            mask_spectrums(&[Array2::zeros((2, 3))], &reference),
            Err(SeparationError::DimensionMismatch(_))
        ));
        assert!(matches!(
            mask_spectrums(&[], &reference),
            Err(SeparationError::InvalidParameter(_))
        ));
    }
}
