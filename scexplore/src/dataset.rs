use crate::dim_red::Pca;
use crate::metadata::CellMetadata;
use crate::sctransform::SctAssay;
use anyhow::{Context, Error};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use ndarray::Array2;
use scan_types::FeatureBarcodeMatrix;
use serde::{Deserialize, Serialize};
use sprs::CsMat;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Everything computed for one sample. Later steps fill the optional parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Raw counts of the cells passing QC
    pub counts: FeatureBarcodeMatrix,
    pub metadata: CellMetadata,
    /// `LogNormalize` output, features x cells
    pub log_data: Option<CsMat<f64>>,
    pub sct: Option<SctAssay>,
    pub pca: Option<Pca>,
    /// UMAP coordinates, cells x 2
    pub umap: Option<Array2<f64>>,
    /// Shared-nearest-neighbor graph, cells x cells
    pub snn: Option<CsMat<f64>>,
}

impl Dataset {
    pub fn new(counts: FeatureBarcodeMatrix, metadata: CellMetadata) -> Dataset {
        Dataset {
            counts,
            metadata,
            log_data: None,
            sct: None,
            pca: None,
            umap: None,
            snn: None,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.counts.num_barcodes()
    }

    /// Write the dataset as gzip-compressed bincode.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        bincode::serialize_into(&mut encoder, self).with_context(|| format!("writing {}", path.display()))?;
        encoder.finish()?;
        info!("saved {} cells to {}", self.num_cells(), path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Dataset, Error> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let decoder = MultiGzDecoder::new(BufReader::new(file));
        let dataset: Dataset =
            bincode::deserialize_from(decoder).with_context(|| format!("reading dataset from {}", path.display()))?;
        Ok(dataset)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metadata::{Phase, ResolutionClusters};
    use ndarray::arr1;
    use scan_types::LabelClass;
    use sprs::TriMat;

    fn dataset() -> Dataset {
        let mut tri = TriMat::new((2, 3));
        tri.add_triplet(0, 0, 4u32);
        tri.add_triplet(1, 2, 9u32);
        let counts = FeatureBarcodeMatrix::new(
            "sample",
            vec!["A-1".into(), "B-1".into(), "C-1".into()],
            vec!["ENSG1".into(), "ENSG2".into()],
            vec!["SOX9".into(), "AMH".into()],
            LabelClass::uniform("Gene Expression", 2),
            tri.to_csc(),
        )
        .unwrap();
        let metadata = CellMetadata {
            barcodes: counts.barcodes.clone(),
            n_count_rna: vec![4.0, 0.0, 9.0],
            phase: vec![Phase::G1, Phase::S, Phase::G2M],
            resolutions: vec![ResolutionClusters {
                resolution: 0.5,
                clusters: vec![1, 0, 0],
            }],
            chosen_resolution: Some(0.5),
            ..CellMetadata::default()
        };
        let mut ds = Dataset::new(counts, metadata);
        ds.umap = Some(Array2::from_shape_fn((3, 2), |(i, j)| i as f64 * 0.1 - j as f64 / 3.0));
        ds.pca = Some(Pca {
            embeddings: Array2::zeros((3, 1)),
            loadings: Array2::ones((2, 1)),
            stdev: arr1(&[1.5]),
        });
        ds
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.bin.gz");
        let ds = dataset();
        ds.save(&path).unwrap();
        let loaded = Dataset::load(&path).unwrap();
        assert_eq!(loaded.metadata.seurat_clusters(), Some(&[1u32, 0, 0][..]));
        assert_eq!(loaded.umap, ds.umap);
        assert_eq!(loaded, ds);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Dataset::load(dir.path().join("missing.bin.gz")).is_err());
        let path = dir.path().join("garbage.bin.gz");
        std::fs::write(&path, b"not a dataset").unwrap();
        assert!(Dataset::load(&path).is_err());
    }
}
