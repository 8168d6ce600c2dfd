use anyhow::{bail, format_err, Context, Error};
use flate2::bufread::MultiGzDecoder;
use log::{info, warn};
use scan_types::{CountMatrix, FeatureBarcodeMatrix, LabelClass};
use sprs::TriMat;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const DEFAULT_FEATURE_TYPE: &str = "Gene Expression";

/// Open a plain or gzipped text file; files ending in `.gz` are decompressed.
pub fn open_text(path: impl AsRef<Path>) -> Result<Box<dyn BufRead>, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    if path.extension().map_or(false, |ext| ext == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

/// Return the first of `names` present in `dir`, trying each name with and without `.gz`.
fn find_file(dir: &Path, names: &[&str]) -> Result<PathBuf, Error> {
    for name in names {
        for candidate in [format!("{name}.gz"), name.to_string()] {
            let path = dir.join(candidate);
            if path.is_file() {
                return Ok(path);
            }
        }
    }
    bail!("none of {:?} (optionally gzipped) found in {}", names, dir.display())
}

/// Load a `CountMatrix` from MatrixMarket coordinate format, plain or gzipped.
pub fn load_mtx(path: impl AsRef<Path>) -> Result<CountMatrix, Error> {
    let path = path.as_ref();
    let reader = open_text(path)?;
    let mut mat: Option<TriMat<u32>> = None;
    let mut expected_nnz = 0;
    let mut seen = 0;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| path.display().to_string())?;
        if lineno == 0 && line.starts_with("%%MatrixMarket") {
            let header = line.to_lowercase();
            if !header.contains("coordinate") {
                bail!("{}: only coordinate MatrixMarket files are supported", path.display());
            }
            continue;
        }
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }
        let mut data = line.split_whitespace();
        let mat = match mat.as_mut() {
            Some(mat) => mat,
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                expected_nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                mat = Some(TriMat::with_capacity((nrow, ncol), expected_nnz));
                continue;
            }
        };

        let mut next_field = |what: &str| {
            data.next()
                .ok_or_else(|| format_err!("{}: line {} is missing {}", path.display(), lineno + 1, what))
        };
        let row = next_field("ROW")?.parse::<usize>()?;
        let col = next_field("COL")?.parse::<usize>()?;
        // real-valued files written by some tools store integral counts as "3.0"
        let val_str = next_field("VAL")?;
        let val = match val_str.parse::<u32>() {
            Ok(v) => v,
            Err(_) => val_str.parse::<f64>().map(|v| v.round() as u32)?,
        };
        if row == 0 || row > mat.rows() || col == 0 || col > mat.cols() {
            bail!(
                "{}: entry ({}, {}) on line {} is outside the {} x {} matrix",
                path.display(),
                row,
                col,
                lineno + 1,
                mat.rows(),
                mat.cols()
            );
        }
        mat.add_triplet(row - 1, col - 1, val);
        seen += 1;
    }

    let Some(matrix) = mat else { bail!("{}: no matrix found", path.display()) };
    if seen != expected_nnz {
        warn!(
            "{}: header announces {} entries but {} were read",
            path.display(),
            expected_nnz,
            seen
        );
    }
    Ok(matrix.to_csc())
}

/// Split every non-empty line of a TSV file into its fields.
fn read_tsv(path: &Path) -> Result<Vec<Vec<String>>, Error> {
    let mut rows = Vec::new();
    for line in open_text(path)?.lines() {
        let line = line.with_context(|| path.display().to_string())?;
        if line.is_empty() {
            continue;
        }
        rows.push(line.split('\t').map(str::to_string).collect());
    }
    Ok(rows)
}

/// Deduplicate names by appending `.1`, `.2`, ... to repeated entries, in order of
/// appearance, skipping suffixes that would collide with another name.
pub fn make_unique(names: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = names.iter().cloned().collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut counters: HashMap<&str, usize> = HashMap::new();
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        if seen.insert(name.as_str()) {
            out.push(name.clone());
            continue;
        }
        let counter = counters.entry(name.as_str()).or_insert(0);
        let unique = loop {
            *counter += 1;
            let candidate = format!("{name}.{counter}");
            if !taken.contains(&candidate) {
                break candidate;
            }
        };
        taken.insert(unique.clone());
        out.push(unique);
    }
    out
}

/// Load a feature-barcode matrix from a directory holding `matrix.mtx`,
/// `features.tsv` (or the older `genes.tsv`) and `barcodes.tsv`, each optionally gzipped.
/// Feature names are taken from the second column of the feature list and made unique.
pub fn load_10x_dir(dir: impl AsRef<Path>) -> Result<FeatureBarcodeMatrix, Error> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let matrix_path = find_file(dir, &["matrix.mtx"])?;
    let features_path = find_file(dir, &["features.tsv", "genes.tsv"])?;
    let barcodes_path = find_file(dir, &["barcodes.tsv"])?;

    let matrix = load_mtx(&matrix_path)?;

    let feature_rows = read_tsv(&features_path)?;
    let mut feature_ids = Vec::with_capacity(feature_rows.len());
    let mut feature_names = Vec::with_capacity(feature_rows.len());
    let mut feature_types = Vec::with_capacity(feature_rows.len());
    for row in feature_rows {
        let id = row[0].clone();
        feature_names.push(row.get(1).cloned().unwrap_or_else(|| id.clone()));
        feature_types.push(row.get(2).cloned().unwrap_or_else(|| DEFAULT_FEATURE_TYPE.to_string()));
        feature_ids.push(id);
    }
    let unique_names = make_unique(&feature_names);
    let n_renamed = unique_names.iter().zip(&feature_names).filter(|(a, b)| a != b).count();
    if n_renamed > 0 {
        warn!("{} duplicated feature names were made unique", n_renamed);
    }

    let barcodes: Vec<String> = read_tsv(&barcodes_path)?.into_iter().map(|mut r| r.swap_remove(0)).collect();

    if matrix.rows() != feature_ids.len() {
        bail!(
            "matrix has {} rows but {} features were listed in {}",
            matrix.rows(),
            feature_ids.len(),
            features_path.display()
        );
    }
    if matrix.cols() != barcodes.len() {
        bail!(
            "matrix has {} columns but {} barcodes were listed in {}",
            matrix.cols(),
            barcodes.len(),
            barcodes_path.display()
        );
    }

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scexplore".to_string());
    let feature_types = LabelClass::from_labels(&feature_types)?;
    info!(
        "loaded {} features x {} barcodes ({} non-zero entries) from {}",
        matrix.rows(),
        matrix.cols(),
        matrix.nnz(),
        dir.display()
    );
    FeatureBarcodeMatrix::new(name, barcodes, feature_ids, unique_names, feature_types, matrix)
}

/// Keep features detected in at least `min_cells` barcodes, then barcodes with at
/// least `min_features` detected features. Both default to 0, which keeps everything.
pub fn apply_min_filters(matrix: FeatureBarcodeMatrix, min_cells: u32, min_features: u32) -> FeatureBarcodeMatrix {
    let mut matrix = matrix;
    if min_cells > 0 {
        let keep: Vec<usize> = matrix
            .barcodes_per_feature()
            .iter()
            .enumerate()
            .filter(|(_, &n)| n >= min_cells)
            .map(|(i, _)| i)
            .collect();
        if keep.len() < matrix.num_features() {
            info!("{} features detected in fewer than {} cells removed", matrix.num_features() - keep.len(), min_cells);
            matrix = matrix.select_features(&keep);
        }
    }
    if min_features > 0 {
        let keep: Vec<usize> = matrix
            .features_per_barcode()
            .iter()
            .enumerate()
            .filter(|(_, &n)| n >= min_features)
            .map(|(i, _)| i)
            .collect();
        if keep.len() < matrix.num_barcodes() {
            info!("{} barcodes with fewer than {} features removed", matrix.num_barcodes() - keep.len(), min_features);
            matrix = matrix.select_barcodes(&keep);
        }
    }
    matrix
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub(crate) fn write_text(path: &Path, text: &str, gzip: bool) {
        let file = File::create(path).unwrap();
        if gzip {
            let mut gz = GzEncoder::new(file, Compression::default());
            gz.write_all(text.as_bytes()).unwrap();
            gz.finish().unwrap();
        } else {
            let mut file = file;
            file.write_all(text.as_bytes()).unwrap();
        }
    }

    pub(crate) const MTX: &str = "%%MatrixMarket matrix coordinate integer general\n\
        %metadata\n\
        3 4 5\n\
        1 1 5\n\
        3 1 1\n\
        2 2 3\n\
        1 3 2\n\
        3 4 7\n";

    fn write_dir(dir: &Path, gzip: bool, legacy: bool) {
        let ext = if gzip { ".gz" } else { "" };
        write_text(&dir.join(format!("matrix.mtx{ext}")), MTX, gzip);
        let features = if legacy {
            "G1\tACTB\nG2\tMT-CO1\nG3\tACTB\n"
        } else {
            "G1\tACTB\tGene Expression\nG2\tMT-CO1\tGene Expression\nG3\tACTB\tGene Expression\n"
        };
        let name = if legacy { "genes.tsv" } else { "features.tsv" };
        write_text(&dir.join(format!("{name}{ext}")), features, gzip);
        write_text(&dir.join(format!("barcodes.tsv{ext}")), "AAA-1\nCCC-1\nGGG-1\nTTT-1\n", gzip);
    }

    #[test]
    fn test_load_10x_dir() {
        for (gzip, legacy) in [(true, false), (false, false), (true, true)] {
            let dir = tempfile::tempdir().unwrap();
            write_dir(dir.path(), gzip, legacy);
            let m = load_10x_dir(dir.path()).unwrap();
            assert_eq!(m.num_features(), 3);
            assert_eq!(m.num_barcodes(), 4);
            assert_eq!(m.feature_names, vec!["ACTB", "MT-CO1", "ACTB.1"]);
            assert_eq!(m.barcodes[3], "TTT-1");
            assert_eq!(m.counts_per_barcode(), vec![6, 3, 2, 7]);
            assert_eq!(m.matrix.get(2, 3), Some(&7));
        }
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_10x_dir(dir.path()).is_err());

        write_dir(dir.path(), false, false);
        write_text(&dir.path().join("barcodes.tsv"), "AAA-1\nCCC-1\n", false);
        let err = load_10x_dir(dir.path()).unwrap_err().to_string();
        assert!(err.contains("4 columns but 2 barcodes"), "{err}");

        write_text(
            &dir.path().join("matrix.mtx"),
            "%%MatrixMarket matrix coordinate integer general\n3 4 1\n4 1 1\n",
            false,
        );
        assert!(load_mtx(dir.path().join("matrix.mtx")).is_err());
    }

    #[test]
    fn test_make_unique() {
        let names: Vec<String> = ["A", "B", "A", "A", "A.1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(make_unique(&names), vec!["A", "B", "A.2", "A.3", "A.1"]);
    }

    #[test]
    fn test_min_filters() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path(), false, false);
        let m = load_10x_dir(dir.path()).unwrap();
        let m = apply_min_filters(m, 2, 2);
        // only ACTB and ACTB.1 are seen in two cells; then only the first barcode has both
        assert_eq!(m.feature_names, vec!["ACTB", "ACTB.1"]);
        assert_eq!(m.barcodes, vec!["AAA-1"]);
    }
}
