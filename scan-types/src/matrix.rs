use crate::label_class::LabelClass;
use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};
use sprs::CsMat;

/// Feature x barcode UMI counts, stored column-major (one compressed column per barcode).
pub type CountMatrix = CsMat<u32>;

/// A matrix annotated with barcodes (columns) and features (rows)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenericFeatureBarcodeMatrix<M> {
    pub name: String,
    pub barcodes: Vec<String>,
    pub feature_ids: Vec<String>,
    pub feature_names: Vec<String>,
    pub feature_types: LabelClass,
    pub matrix: M,
}

/// Count matrix with its annotations
pub type FeatureBarcodeMatrix = GenericFeatureBarcodeMatrix<CountMatrix>;

impl FeatureBarcodeMatrix {
    /// Assemble a matrix, checking that the annotations agree with its shape.
    /// The matrix is converted to CSC storage if needed.
    pub fn new(
        name: impl Into<String>,
        barcodes: Vec<String>,
        feature_ids: Vec<String>,
        feature_names: Vec<String>,
        feature_types: LabelClass,
        matrix: CountMatrix,
    ) -> Result<FeatureBarcodeMatrix, Error> {
        let (rows, cols) = matrix.shape();
        if rows != feature_ids.len() || rows != feature_names.len() || rows != feature_types.len() {
            bail!(
                "matrix has {} rows but {} feature ids, {} feature names and {} feature types were listed",
                rows,
                feature_ids.len(),
                feature_names.len(),
                feature_types.len()
            );
        }
        if cols != barcodes.len() {
            bail!("matrix has {} columns but {} barcodes were listed", cols, barcodes.len());
        }
        let matrix = if matrix.is_csc() { matrix } else { matrix.to_csc() };
        Ok(FeatureBarcodeMatrix {
            name: name.into(),
            barcodes,
            feature_ids,
            feature_names,
            feature_types,
            matrix,
        })
    }

    /// Number of features (rows)
    pub fn num_features(&self) -> usize {
        self.matrix.rows()
    }

    /// Number of barcodes (columns)
    pub fn num_barcodes(&self) -> usize {
        self.matrix.cols()
    }

    /// Total UMI count of each barcode
    pub fn counts_per_barcode(&self) -> Vec<u64> {
        self.matrix
            .outer_iterator()
            .map(|col| col.data().iter().map(|&v| v as u64).sum())
            .collect()
    }

    /// Number of features with a non-zero count in each barcode
    pub fn features_per_barcode(&self) -> Vec<u32> {
        self.matrix
            .outer_iterator()
            .map(|col| col.data().iter().filter(|&&v| v > 0).count() as u32)
            .collect()
    }

    /// Number of barcodes in which each feature has a non-zero count
    pub fn barcodes_per_feature(&self) -> Vec<u32> {
        let mut n = vec![0u32; self.num_features()];
        for col in self.matrix.outer_iterator() {
            for (row, &v) in col.iter() {
                if v > 0 {
                    n[row] += 1;
                }
            }
        }
        n
    }

    /// Keep the listed barcodes, in the listed order.
    pub fn select_barcodes(&self, keep: &[usize]) -> FeatureBarcodeMatrix {
        FeatureBarcodeMatrix {
            name: self.name.clone(),
            barcodes: keep.iter().map(|&i| self.barcodes[i].clone()).collect(),
            feature_ids: self.feature_ids.clone(),
            feature_names: self.feature_names.clone(),
            feature_types: self.feature_types.clone(),
            matrix: select_columns(&self.matrix, keep),
        }
    }

    /// Keep the listed features. `keep` must be sorted ascending.
    pub fn select_features(&self, keep: &[usize]) -> FeatureBarcodeMatrix {
        FeatureBarcodeMatrix {
            name: self.name.clone(),
            barcodes: self.barcodes.clone(),
            feature_ids: keep.iter().map(|&i| self.feature_ids[i].clone()).collect(),
            feature_names: keep.iter().map(|&i| self.feature_names[i].clone()).collect(),
            feature_types: self.feature_types.select(keep),
            matrix: select_rows(&self.matrix, keep),
        }
    }
}

/// Select columns of a CSC matrix, in the given order.
pub fn select_columns<N: Clone>(mat: &CsMat<N>, keep: &[usize]) -> CsMat<N> {
    assert!(mat.is_csc());
    let mut indptr = Vec::with_capacity(keep.len() + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    indptr.push(0);
    for &c in keep {
        let col = mat.outer_view(c).expect("column index out of range");
        indices.extend_from_slice(col.indices());
        data.extend_from_slice(col.data());
        indptr.push(indices.len());
    }
    CsMat::new_csc((mat.rows(), keep.len()), indptr, indices, data)
}

/// Select rows of a CSC matrix. `keep` must be sorted ascending so the inner indices stay sorted.
pub fn select_rows<N: Clone>(mat: &CsMat<N>, keep: &[usize]) -> CsMat<N> {
    assert!(mat.is_csc());
    debug_assert!(keep.windows(2).all(|w| w[0] < w[1]));
    let mut new_index = vec![usize::MAX; mat.rows()];
    for (new, &old) in keep.iter().enumerate() {
        new_index[old] = new;
    }
    let mut indptr = Vec::with_capacity(mat.cols() + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    indptr.push(0);
    for col in mat.outer_iterator() {
        for (row, v) in col.iter() {
            let r = new_index[row];
            if r != usize::MAX {
                indices.push(r);
                data.push(v.clone());
            }
        }
        indptr.push(indices.len());
    }
    CsMat::new_csc((keep.len(), mat.cols()), indptr, indices, data)
}

#[cfg(test)]
mod test {
    use super::*;
    use sprs::TriMat;

    fn small() -> FeatureBarcodeMatrix {
        // 3 features x 4 barcodes
        let mut tri = TriMat::new((3, 4));
        tri.add_triplet(0, 0, 5u32);
        tri.add_triplet(2, 0, 1);
        tri.add_triplet(1, 1, 3);
        tri.add_triplet(0, 2, 2);
        tri.add_triplet(1, 2, 2);
        tri.add_triplet(2, 2, 2);
        let names = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        FeatureBarcodeMatrix::new(
            "test",
            (0..4).map(|i| format!("BC{i}")).collect(),
            names.clone(),
            names,
            LabelClass::uniform("Gene Expression", 3),
            tri.to_csc(),
        )
        .unwrap()
    }

    #[test]
    fn test_barcode_stats() {
        let m = small();
        assert_eq!(m.counts_per_barcode(), vec![6, 3, 6, 0]);
        assert_eq!(m.features_per_barcode(), vec![2, 1, 3, 0]);
        assert_eq!(m.barcodes_per_feature(), vec![2, 2, 2]);
    }

    #[test]
    fn test_select() {
        let m = small();
        let sub = m.select_barcodes(&[2, 0]);
        assert_eq!(sub.barcodes, vec!["BC2", "BC0"]);
        assert_eq!(sub.counts_per_barcode(), vec![6, 6]);

        let sub = m.select_features(&[0, 2]);
        assert_eq!(sub.feature_names, vec!["A", "C"]);
        assert_eq!(sub.counts_per_barcode(), vec![6, 0, 4, 0]);
        assert_eq!(sub.matrix.get(1, 2), Some(&2));
    }

    #[test]
    fn test_shape_mismatch() {
        let tri: TriMat<u32> = TriMat::new((2, 2));
        let res = FeatureBarcodeMatrix::new(
            "bad",
            vec!["a".into(), "b".into()],
            vec!["x".into()],
            vec!["x".into()],
            LabelClass::uniform("Gene Expression", 1),
            tri.to_csc(),
        );
        assert!(res.is_err());
    }
}
