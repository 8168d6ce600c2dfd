use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

/// Assignment of each feature to one of a small set of labels, e.g. the
/// `Gene Expression` / `Antibody Capture` feature types of a 10x matrix.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LabelClass {
    /// Distinct labels, in order of first appearance
    pub labels: Vec<String>,
    /// Index into `labels` for every feature
    pub assignments: Vec<u16>,
}

impl LabelClass {
    /// Build a `LabelClass` from one label per feature.
    pub fn from_labels<S: AsRef<str>>(per_feature: &[S]) -> Result<LabelClass, Error> {
        let mut labels: Vec<String> = Vec::new();
        let mut assignments = Vec::with_capacity(per_feature.len());
        for label in per_feature {
            let label = label.as_ref();
            let idx = match labels.iter().position(|l| l == label) {
                Some(idx) => idx,
                None => {
                    labels.push(label.to_string());
                    labels.len() - 1
                }
            };
            if idx > u16::MAX as usize {
                bail!("too many distinct feature labels ({})", labels.len());
            }
            assignments.push(idx as u16);
        }
        Ok(LabelClass { labels, assignments })
    }

    /// Every feature carries the same label.
    pub fn uniform(label: &str, num_features: usize) -> LabelClass {
        LabelClass {
            labels: vec![label.to_string()],
            assignments: vec![0; num_features],
        }
    }

    /// Number of features covered
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// True if no features are covered
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Label of feature `i`
    pub fn get(&self, i: usize) -> &str {
        &self.labels[self.assignments[i] as usize]
    }

    /// Indices of the features carrying `label`, or None if the label doesn't exist.
    pub fn indices_of(&self, label: &str) -> Option<Vec<usize>> {
        let target = self.labels.iter().position(|l| l == label)? as u16;
        Some(
            self.assignments
                .iter()
                .enumerate()
                .filter(|(_, &a)| a == target)
                .map(|(i, _)| i)
                .collect(),
        )
    }

    /// Restrict to the given features, keeping label order stable.
    pub fn select(&self, features: &[usize]) -> LabelClass {
        LabelClass {
            labels: self.labels.clone(),
            assignments: features.iter().map(|&i| self.assignments[i]).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_labels() {
        let lc = LabelClass::from_labels(&["Gene Expression", "Gene Expression", "Antibody Capture", "Gene Expression"])
            .unwrap();
        assert_eq!(lc.labels, vec!["Gene Expression", "Antibody Capture"]);
        assert_eq!(lc.assignments, vec![0, 0, 1, 0]);
        assert_eq!(lc.indices_of("Gene Expression"), Some(vec![0, 1, 3]));
        assert_eq!(lc.indices_of("Antibody Capture"), Some(vec![2]));
        assert_eq!(lc.indices_of("CRISPR Guide Capture"), None);
        assert_eq!(lc.get(2), "Antibody Capture");
    }

    #[test]
    fn test_select() {
        let lc = LabelClass::from_labels(&["a", "b", "a", "b"]).unwrap();
        let sub = lc.select(&[1, 3]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.indices_of("b"), Some(vec![0, 1]));
        assert_eq!(sub.indices_of("a"), Some(vec![]));
    }
}
