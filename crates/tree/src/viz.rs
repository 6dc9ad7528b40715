use crate::node::ChallengeNode;
use crate::node::NodeId;
use crate::tree::Tree;
use pb_core::Unique;
use pb_core::Value;
use std::collections::HashMap;

const CELL_W: usize = 180;
const CELL_H: usize = 120;
const RADIUS: usize = 26;

/// Fill colour per creating phase.
fn phase_fill(phase: u8) -> &'static str {
    match phase {
        1 => "#4c78a8",
        2 => "#f58518",
        3 => "#54a24b",
        _ => "#b279a2",
    }
}

/// Edge colour from the change in value along the edge at snapshot time.
fn edge_stroke(delta: Value) -> &'static str {
    match delta {
        d if d > 1e-6 => "#2ca02c",
        d if d < -1e-6 => "#d62728",
        _ => "#999999",
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render the tree as a layered SVG, one row per depth.
/// Non-authoritative; regenerable from the JSON snapshot at any time.
pub fn render(tree: &Tree) -> String {
    let nodes = tree.sorted();
    let mut rows: HashMap<usize, usize> = HashMap::new();
    let mut position: HashMap<NodeId, (usize, usize)> = HashMap::new();
    for node in &nodes {
        let slot = rows.entry(node.depth).or_insert(0);
        position.insert(
            node.id(),
            (*slot * CELL_W + CELL_W / 2, node.depth * CELL_H + CELL_H / 2),
        );
        *slot += 1;
    }
    let width = rows.values().max().copied().unwrap_or(0).max(1) * CELL_W;
    let height = (rows.keys().max().copied().unwrap_or(0) + 1) * CELL_H;
    let mut svg = String::new();
    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\">\n",
        width, height
    ));
    for node in &nodes {
        let (x, y) = position[&node.id()];
        for child in &node.children {
            let Some((cx, cy)) = position.get(child).copied() else {
                continue;
            };
            let delta = tree.get(*child).map(|c| c.value - node.value).unwrap_or(0.0);
            svg.push_str(&format!(
                "  <line x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\" stroke=\"{}\" stroke-width=\"2\"/>\n",
                x, y, cx, cy, edge_stroke(delta)
            ));
        }
    }
    for node in &nodes {
        let (x, y) = position[&node.id()];
        svg.push_str(&format!(
            "  <circle cx=\"{}\" cy=\"{}\" r=\"{}\" fill=\"{}\" stroke=\"#333\"/>\n",
            x,
            y,
            RADIUS,
            phase_fill(node.phase)
        ));
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" text-anchor=\"middle\" font-size=\"10\">{}</text>\n",
            x,
            y + RADIUS + 12,
            escape(&label(node))
        ));
    }
    svg.push_str("</svg>\n");
    svg
}

fn label(node: &ChallengeNode) -> String {
    format!("{} @{} v={:.2}", node.label(), node.difficulty, node.value)
}
