use scan_types::CountMatrix;
use sprs::CsMat;

/// Log-normalize a feature x barcode count matrix (CSC, one column per barcode):
/// 1. Scale each barcode to a total of `scale_factor` counts
/// 2. Apply `x -> ln(1 + x)`
///
/// Zeros stay implicit, and barcodes without counts stay all-zero.
pub fn log_normalize(matrix: &CountMatrix, scale_factor: f64) -> CsMat<f64> {
    assert!(matrix.is_csc());
    let mut norm = matrix.map(|&v| v as f64);
    for mut col in norm.outer_iterator_mut() {
        let total: f64 = col.data().iter().sum();
        let scale = if total == 0.0 { 0.0 } else { scale_factor / total };
        for (_, v) in col.iter_mut() {
            *v = (*v * scale).ln_1p();
        }
    }
    norm
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use sprs::TriMat;

    #[test]
    fn test_log_normalize() {
        let mut tri = TriMat::new((3, 3));
        tri.add_triplet(0, 0, 1u32);
        tri.add_triplet(1, 0, 3);
        tri.add_triplet(2, 1, 5);
        let counts: CountMatrix = tri.to_csc();

        let norm = log_normalize(&counts, 10_000.0);
        assert_eq!(norm.nnz(), 3);
        assert_approx_eq!(*norm.get(0, 0).unwrap(), (1.0f64 + 2500.0).ln());
        assert_approx_eq!(*norm.get(1, 0).unwrap(), (1.0f64 + 7500.0).ln());
        assert_approx_eq!(*norm.get(2, 1).unwrap(), (1.0f64 + 10_000.0).ln());
        assert_eq!(norm.outer_view(2).unwrap().nnz(), 0);

        let norm2 = log_normalize(&counts, 4.0);
        assert_approx_eq!(*norm2.get(1, 0).unwrap(), 4.0f64.ln());
    }
}
