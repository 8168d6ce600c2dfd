//! SVG figures: QC violins and scatters, elbow plot, embeddings, the cluster tree
//! and panel dot plots.

use crate::clustree::{ClusterTree, TreeNode};
use crate::dot_plot::{DotPlotEntry, SCALE_LIMIT};
use crate::stats::{bandwidth_silverman, gaussian_density, pearson_correlation};
use anyhow::{bail, Error};
use ndarray::ArrayView2;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::Palette;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::collections::HashMap;
use std::path::Path;

type Area<'a> = DrawingArea<SVGBackend<'a>, Shift>;

const FONT: &str = "sans-serif";
const VIOLIN_GRID: usize = 64;

fn category_color(i: usize) -> RGBColor {
    let (r, g, b) = Palette99::COLORS[i % Palette99::COLORS.len()];
    RGBColor(r, g, b)
}

/// Light grey to blue
fn expression_color(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f64 + t * (b as f64 - a as f64)).round() as u8;
    RGBColor(mix(211, 0), mix(211, 0), mix(211, 255))
}

/// Finite `(min, max)` of `values`, padded by 5% on each side
fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if hi - lo < 1e-12 {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = 0.05 * (hi - lo);
    (lo - pad, hi + pad)
}

fn draw_violin(area: &Area, name: &str, values: &[f64], color: RGBColor, seed: u64) -> Result<(), Error> {
    let (lo, hi) = padded_range(values.iter().copied());
    let mut chart = ChartBuilder::on(area)
        .caption(name, (FONT, 16))
        .margin(8)
        .x_label_area_size(10)
        .y_label_area_size(50)
        .build_cartesian_2d(-1.0f64..1.0f64, lo..hi)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_label_formatter(&|_| String::new())
        .draw()?;

    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (min, max) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), &v| (a.min(v), b.max(v)));
    if finite.len() > 1 && max > min {
        let bw = bandwidth_silverman(&finite);
        let grid: Vec<f64> = (0..VIOLIN_GRID)
            .map(|i| min + (max - min) * i as f64 / (VIOLIN_GRID - 1) as f64)
            .collect();
        let density: Vec<f64> = grid.iter().map(|&y| gaussian_density(&finite, bw, y)).collect();
        let peak = density.iter().copied().fold(0.0, f64::max);
        if peak > 0.0 {
            let mut outline: Vec<(f64, f64)> = grid.iter().zip(&density).map(|(&y, &d)| (0.8 * d / peak, y)).collect();
            outline.extend(grid.iter().zip(&density).rev().map(|(&y, &d)| (-0.8 * d / peak, y)));
            chart.draw_series(std::iter::once(Polygon::new(outline.clone(), color.mix(0.6).filled())))?;
            outline.push(outline[0]);
            chart.draw_series(std::iter::once(PathElement::new(outline, BLACK.stroke_width(1))))?;
        }
    }

    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    chart.draw_series(
        finite
            .iter()
            .map(|&v| Circle::new((rng.gen_range(-0.4..0.4), v), 1, BLACK.mix(0.5).filled())),
    )?;
    Ok(())
}

/// One violin with jittered points per `(name, values)` panel, side by side.
pub fn violin_panels(path: &Path, panels: &[(&str, &[f64])]) -> Result<(), Error> {
    if panels.is_empty() {
        bail!("no values to draw in {}", path.display());
    }
    let root = SVGBackend::new(path, (260 * panels.len() as u32, 420)).into_drawing_area();
    root.fill(&WHITE)?;
    let areas = root.split_evenly((1, panels.len()));
    for (i, ((name, values), area)) in panels.iter().zip(areas.iter()).enumerate() {
        draw_violin(area, name, values, category_color(i), i as u64)?;
    }
    root.present()?;
    Ok(())
}

/// Scatter plot of two per-cell values, titled with their Pearson correlation.
pub fn feature_scatter(path: &Path, x_name: &str, y_name: &str, x: &[f64], y: &[f64]) -> Result<(), Error> {
    if x.len() != y.len() {
        bail!("{} has {} values but {} has {}", x_name, x.len(), y_name, y.len());
    }
    let root = SVGBackend::new(path, (640, 560)).into_drawing_area();
    root.fill(&WHITE)?;
    let (x0, x1) = padded_range(x.iter().copied());
    let (y0, y1) = padded_range(y.iter().copied());
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{:.2}", pearson_correlation(x, y)), (FONT, 20))
        .margin(12)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(x0..x1, y0..y1)?;
    chart.configure_mesh().x_desc(x_name).y_desc(y_name).draw()?;
    let color = category_color(0);
    chart.draw_series(
        x.iter()
            .zip(y)
            .map(|(&a, &b)| Circle::new((a, b), 2, color.mix(0.6).filled())),
    )?;
    root.present()?;
    Ok(())
}

/// Standard deviation of each principal component
pub fn elbow_plot(path: &Path, stdev: &[f64]) -> Result<(), Error> {
    if stdev.is_empty() {
        bail!("no principal components to draw");
    }
    let root = SVGBackend::new(path, (640, 480)).into_drawing_area();
    root.fill(&WHITE)?;
    let (_, y1) = padded_range(stdev.iter().copied());
    let mut chart = ChartBuilder::on(&root)
        .caption("Elbow plot", (FONT, 20))
        .margin(12)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(0.0f64..(stdev.len() as f64 + 1.0), 0.0f64..y1)?;
    chart.configure_mesh().x_desc("PC").y_desc("Standard Deviation").draw()?;
    let points: Vec<(f64, f64)> = stdev.iter().enumerate().map(|(i, &s)| (i as f64 + 1.0, s)).collect();
    chart.draw_series(LineSeries::new(points.iter().copied(), BLACK.mix(0.3).stroke_width(1)))?;
    chart.draw_series(points.iter().map(|&p| Circle::new(p, 3, BLACK.filled())))?;
    root.present()?;
    Ok(())
}

/// Two-dimensional embedding with cells colored by category. `labels[cell]` indexes
/// `categories`; category names are also written at the median position of their cells.
pub fn embedding_plot(
    path: &Path,
    title: &str,
    coords: ArrayView2<f64>,
    categories: &[String],
    labels: &[usize],
) -> Result<(), Error> {
    if coords.ncols() < 2 {
        bail!("embedding has {} dimensions, 2 are needed", coords.ncols());
    }
    if coords.nrows() != labels.len() {
        bail!("{} labels given for {} cells", labels.len(), coords.nrows());
    }
    if let Some(&l) = labels.iter().find(|&&l| l >= categories.len()) {
        bail!("label {} has no category name", l);
    }

    let root = SVGBackend::new(path, (760, 620)).into_drawing_area();
    root.fill(&WHITE)?;
    let (x0, x1) = padded_range(coords.column(0).iter().copied());
    let (y0, y1) = padded_range(coords.column(1).iter().copied());
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 20))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x0..x1, y0..y1)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_desc("UMAP_1")
        .y_desc("UMAP_2")
        .draw()?;

    for (k, name) in categories.iter().enumerate() {
        let members: Vec<(f64, f64)> = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == k)
            .map(|(cell, _)| (coords[[cell, 0]], coords[[cell, 1]]))
            .collect();
        if members.is_empty() {
            continue;
        }
        let color = category_color(k);
        chart
            .draw_series(members.iter().map(|&p| Circle::new(p, 2, color.filled())))?
            .label(name.as_str())
            .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));

        let mut xs: Vec<f64> = members.iter().map(|p| p.0).collect();
        let mut ys: Vec<f64> = members.iter().map(|p| p.1).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        ys.sort_by(|a, b| a.total_cmp(b));
        let center = (xs[xs.len() / 2], ys[ys.len() / 2]);
        chart.draw_series(std::iter::once(Text::new(
            name.clone(),
            center,
            (FONT, 14).into_font().color(&BLACK),
        )))?;
    }
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Cluster tree: one row per resolution, nodes sized by cluster size, edges weighted
/// by the fraction of the child cluster coming from the parent.
pub fn clustree_plot(path: &Path, tree: &ClusterTree) -> Result<(), Error> {
    let mut levels: Vec<f64> = Vec::new();
    let mut level_index: HashMap<u64, usize> = HashMap::new();
    for node in &tree.nodes {
        level_index.entry(node.resolution.to_bits()).or_insert_with(|| {
            levels.push(node.resolution);
            levels.len() - 1
        });
    }
    if levels.is_empty() {
        bail!("cluster tree has no nodes");
    }

    let mut per_level = vec![0u32; levels.len()];
    for node in &tree.nodes {
        let l = level_index[&node.resolution.to_bits()];
        per_level[l] = per_level[l].max(node.cluster + 1);
    }
    let max_size = tree.nodes.iter().map(|n| n.size).max().unwrap_or(1).max(1) as f64;

    // (level, x, y) of every node
    let mut positions: HashMap<(u64, u32), (usize, (f64, f64))> = HashMap::new();
    for node in &tree.nodes {
        let l = level_index[&node.resolution.to_bits()];
        let x = (node.cluster as f64 + 1.0) / (per_level[l] as f64 + 1.0);
        positions.insert((node.resolution.to_bits(), node.cluster), (l, (x, -(l as f64))));
    }
    let position = |resolution: f64, cluster: u32| -> Result<(f64, f64), Error> {
        match positions.get(&(resolution.to_bits(), cluster)) {
            Some(&(_, xy)) => Ok(xy),
            None => bail!("cluster {} at resolution {} is not a node of the tree", cluster, resolution),
        }
    };
    let mut edges = Vec::new();
    for e in tree.visible_edges() {
        let from = position(e.from_resolution, e.from_cluster)?;
        let to = position(e.to_resolution, e.to_cluster)?;
        edges.push((from, to, e.in_prop));
    }

    let height = 80 + 45 * levels.len() as u32;
    let root = SVGBackend::new(path, (900, height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Cluster tree", (FONT, 20))
        .margin(12)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0f64..1.0f64, -(levels.len() as f64 - 0.5)..0.5f64)?;
    let level_label = |y: &f64| -> String {
        let l = -y.round();
        if (y + l).abs() > 1e-6 || l < 0.0 {
            return String::new();
        }
        levels.get(l as usize).map(|r| r.to_string()).unwrap_or_default()
    };
    chart
        .configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_labels(levels.len())
        .y_label_formatter(&level_label)
        .y_desc("resolution")
        .draw()?;

    chart.draw_series(edges.iter().map(|&(from, to, in_prop)| {
        let width = 1 + (3.0 * in_prop).round() as u32;
        PathElement::new(vec![from, to], BLUE.mix(in_prop.clamp(0.1, 1.0)).stroke_width(width))
    }))?;
    let nodes: Vec<(usize, (f64, f64), &TreeNode)> = tree
        .nodes
        .iter()
        .map(|n| {
            let (l, xy) = positions[&(n.resolution.to_bits(), n.cluster)];
            (l, xy, n)
        })
        .collect();
    chart.draw_series(nodes.iter().map(|&(l, xy, n)| {
        let radius = 3.0 + 10.0 * (n.size as f64 / max_size).sqrt();
        Circle::new(xy, radius.round() as i32, category_color(l).filled())
    }))?;
    chart.draw_series(nodes.iter().map(|&(_, xy, n)| {
        Text::new(n.cluster.to_string(), xy, (FONT, 10).into_font().color(&BLACK))
    }))?;
    root.present()?;
    Ok(())
}

/// Dot plot of one panel: dot size is the percentage of expressing cells, color the
/// scaled average expression.
pub fn dot_plot(path: &Path, title: &str, genes: &[String], entries: &[DotPlotEntry]) -> Result<(), Error> {
    if genes.is_empty() || entries.is_empty() {
        bail!("dot plot {} has nothing to draw", title);
    }
    let gene_index: HashMap<&str, usize> = genes.iter().enumerate().map(|(i, g)| (g.as_str(), i)).collect();
    let n_clusters = entries.iter().map(|e| e.cluster + 1).max().unwrap_or(1);

    let width = 160 + 32 * genes.len() as u32;
    let height = 140 + 26 * n_clusters;
    let root = SVGBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 18))
        .margin(12)
        .x_label_area_size(70)
        .y_label_area_size(40)
        .build_cartesian_2d(-0.5f64..(genes.len() as f64 - 0.5), -0.5f64..(n_clusters as f64 - 0.5))?;
    let gene_label = |x: &f64| -> String {
        let i = x.round();
        if (x - i).abs() > 1e-6 || i < 0.0 {
            return String::new();
        }
        genes.get(i as usize).cloned().unwrap_or_default()
    };
    let cluster_label = |y: &f64| -> String {
        if (y - y.round()).abs() > 1e-6 || *y < 0.0 {
            return String::new();
        }
        format!("{}", y.round() as u32)
    };
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(genes.len())
        .y_labels(n_clusters as usize)
        .x_label_formatter(&gene_label)
        .y_label_formatter(&cluster_label)
        .x_label_style((FONT, 11).into_font().transform(FontTransform::Rotate90))
        .y_desc("Identity")
        .draw()?;

    chart.draw_series(entries.iter().filter_map(|e| {
        let x = *gene_index.get(e.gene.as_str())? as f64;
        let radius = (1.0 + 9.0 * e.pct_exp / 100.0).round() as i32;
        let t = (e.avg_exp_scaled + SCALE_LIMIT) / (2.0 * SCALE_LIMIT);
        Some(Circle::new((x, e.cluster as f64), radius, expression_color(t).filled()))
    }))?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clustree::TreeEdge;
    use crate::metadata::ResolutionClusters;
    use ndarray::Array2;

    fn read_svg(path: &Path) -> String {
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("<svg"));
        text
    }

    #[test]
    fn test_qc_plots() {
        let dir = tempfile::tempdir().unwrap();
        let a: Vec<f64> = (0..50).map(|i| (i as f64).sqrt()).collect();
        let b: Vec<f64> = (0..50).map(|i| 100.0 - i as f64).collect();
        let path = dir.path().join("violin.svg");
        violin_panels(&path, &[("a", &a), ("b", &b), ("flat", &[1.0, 1.0])]).unwrap();
        read_svg(&path);

        let path = dir.path().join("scatter.svg");
        feature_scatter(&path, "a", "b", &a, &b).unwrap();
        assert!(read_svg(&path).contains("-0.9"));
        assert!(feature_scatter(&path, "a", "b", &a, &b[1..]).is_err());

        let path = dir.path().join("elbow.svg");
        elbow_plot(&path, &[5.0, 3.0, 1.0]).unwrap();
        read_svg(&path);
    }

    #[test]
    fn test_embedding_plot() {
        let dir = tempfile::tempdir().unwrap();
        let coords = Array2::from_shape_fn((20, 2), |(i, j)| (i * (j + 1)) as f64);
        let labels: Vec<usize> = (0..20).map(|i| i % 3).collect();
        let categories = vec!["G1".to_string(), "S".to_string(), "G2M".to_string()];
        let path = dir.path().join("umap.svg");
        embedding_plot(&path, "Phase", coords.view(), &categories, &labels).unwrap();
        assert!(read_svg(&path).contains("G2M"));
        assert!(embedding_plot(&path, "Phase", coords.view(), &categories[..2], &labels).is_err());
    }

    #[test]
    fn test_clustree_and_dot_plot() {
        let dir = tempfile::tempdir().unwrap();
        let levels = vec![
            ResolutionClusters {
                resolution: 0.0,
                clusters: vec![0, 0, 0, 0],
            },
            ResolutionClusters {
                resolution: 0.1,
                clusters: vec![0, 0, 1, 1],
            },
        ];
        let tree = ClusterTree::build(&levels).unwrap();
        let path = dir.path().join("clustree.svg");
        clustree_plot(&path, &tree).unwrap();
        read_svg(&path);
        assert!(clustree_plot(&path, &ClusterTree::default()).is_err());

        // an edge must join two nodes of the tree
        let mut dangling = tree.clone();
        dangling.edges.push(TreeEdge {
            from_resolution: 0.1,
            from_cluster: 1,
            to_resolution: 0.7,
            to_cluster: 0,
            count: 2,
            in_prop: 1.0,
        });
        assert!(clustree_plot(&path, &dangling).is_err());

        let genes = vec!["SOX9".to_string(), "AMH".to_string()];
        let entries: Vec<DotPlotEntry> = (0..4)
            .map(|i| DotPlotEntry {
                gene: genes[i % 2].clone(),
                cluster: (i / 2) as u32,
                avg_exp: i as f64,
                pct_exp: 25.0 * i as f64,
                avg_exp_scaled: i as f64 - 1.5,
            })
            .collect();
        let path = dir.path().join("dot.svg");
        dot_plot(&path, "Sertoli", &genes, &entries).unwrap();
        assert!(read_svg(&path).contains("SOX9"));
        assert!(dot_plot(&path, "empty", &[], &entries).is_err());
    }
}
