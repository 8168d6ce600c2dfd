//! Named gene panels used for dot plots.

use crate::mtx::open_text;
use anyhow::{bail, Context, Error};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

const BUILTIN: &[(&str, &[&str])] = &[
    ("Bipotential", &["GATA4", "WT1", "NR5A1", "LHX9", "EMX2", "CBX2", "SIX1", "SIX4"]),
    ("Sertoli", &["SOX9", "AMH", "FGF9", "PTGDS", "DMRT1", "SOX8", "DHH", "CLDN11"]),
    ("Granulosa", &["FOXL2", "RSPO1", "WNT4", "FST", "LGR5", "RUNX1", "KITLG"]),
    ("Leydig", &["INSL3", "CYP17A1", "STAR", "CYP11A1", "HSD3B2", "LHCGR"]),
    ("Germ_cells", &["DDX4", "DAZL", "POU5F1", "NANOG", "KIT", "TFAP2C", "SOX17"]),
    ("Interstitial", &["ARX", "TCF21", "PDGFRA", "NR2F2", "MAFB"]),
    ("Endothelial", &["PECAM1", "CDH5", "KDR", "CLDN5", "EMCN"]),
    ("Immune", &["PTPRC", "CD68", "LYZ", "CD14"]),
    (
        "GO_cholesterol_biosynthesis",
        &[
            "HMGCR", "HMGCS1", "MVK", "PMVK", "MVD", "IDI1", "FDPS", "FDFT1", "SQLE", "LSS", "CYP51A1", "TM7SF2",
            "MSMO1", "NSDHL", "HSD17B7", "EBP", "SC5D", "DHCR7", "DHCR24", "LBR", "ACAT2",
        ],
    ),
];

/// Panels drawn as dot plots unless configured otherwise
pub const DEFAULT_PLOT_PANELS: &[&str] = &[
    "Bipotential",
    "Sertoli",
    "Granulosa",
    "Leydig",
    "Germ_cells",
    "Interstitial",
    "Endothelial",
    "Immune",
    "GO_cholesterol_biosynthesis",
    "Panel_app_DSD_short",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenePanel {
    pub name: String,
    pub genes: Vec<String>,
}

/// Panels in definition order. Names are unique.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelSet {
    panels: Vec<GenePanel>,
}

impl PanelSet {
    pub fn builtin() -> PanelSet {
        let mut set = PanelSet::default();
        for (name, genes) in BUILTIN {
            set.insert(GenePanel {
                name: name.to_string(),
                genes: genes.iter().map(|g| g.to_string()).collect(),
            });
        }
        set
    }

    /// Read panels from a two-column `panel<TAB>gene` file, optionally gzipped.
    /// Blank lines and lines starting with `#` are ignored.
    pub fn load_tsv(path: &Path) -> Result<PanelSet, Error> {
        let reader = open_text(path)?;
        let mut set = PanelSet::default();
        for (i, line) in reader.lines().enumerate() {
            let line = line.with_context(|| path.display().to_string())?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let (panel, gene) = match (fields.next(), fields.next()) {
                (Some(p), Some(g)) if !p.trim().is_empty() && !g.trim().is_empty() => (p.trim(), g.trim()),
                _ => bail!("{}:{}: expected `panel<TAB>gene`, got {:?}", path.display(), i + 1, line),
            };
            match set.panels.iter_mut().find(|p| p.name == panel) {
                Some(p) => p.genes.push(gene.to_string()),
                None => set.panels.push(GenePanel {
                    name: panel.to_string(),
                    genes: vec![gene.to_string()],
                }),
            }
        }
        Ok(set)
    }

    /// Add `panel`, replacing any panel of the same name.
    pub fn insert(&mut self, panel: GenePanel) {
        match self.panels.iter_mut().find(|p| p.name == panel.name) {
            Some(p) => *p = panel,
            None => self.panels.push(panel),
        }
    }

    pub fn extend(&mut self, other: PanelSet) {
        for panel in other.panels {
            self.insert(panel);
        }
    }

    pub fn get(&self, name: &str) -> Option<&GenePanel> {
        self.panels.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    /// Look up each of `names`. Names without a panel are reported and skipped.
    pub fn select<'a, S: AsRef<str>>(&'a self, names: &[S]) -> Vec<&'a GenePanel> {
        names
            .iter()
            .filter_map(|name| {
                let panel = self.get(name.as_ref());
                if panel.is_none() {
                    warn!("gene panel {} is not defined, skipping it", name.as_ref());
                }
                panel
            })
            .collect()
    }
}

impl GenePanel {
    /// `(gene, feature index)` for the panel genes present in `index`, in panel order.
    pub fn resolve(&self, index: &HashMap<&str, usize>) -> Vec<(String, usize)> {
        let mut found: Vec<(String, usize)> = Vec::with_capacity(self.genes.len());
        for gene in &self.genes {
            match index.get(gene.as_str()) {
                Some(&i) if !found.iter().any(|(_, j)| *j == i) => found.push((gene.clone(), i)),
                Some(_) => {}
                None => debug!("panel {}: {} not found", self.name, gene),
            }
        }
        found
    }
}
