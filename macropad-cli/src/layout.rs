//! Generate an HTML/SVG visualization of a macropad configuration.
//! One grid per layer; each component is a rectangle at its matrix cell
//! labelled with its id and binding.

use macropad_keymap::{
    is_modifier_code, Binding, Component, ComponentBinding, Configuration, LayerBindings,
};

/// Component placed on the canvas.
struct Cell<'a> {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    component: &'a Component,
}

/// Key unit size in SVG pixels.
const U: f64 = 64.0;
/// Gap between keys.
const GAP: f64 = 6.0;
/// Step: key + gap.
const S: f64 = U + GAP;
/// Key corner radius.
const R: f64 = 6.0;
/// Margin around the SVG content.
const MARGIN: f64 = 20.0;

/// Lay out every component. Matrix components sit at their start
/// location; encoders without a button get a row of their own below.
fn build_cells(config: &Configuration) -> Vec<Cell<'_>> {
    let rows = config
        .components
        .iter()
        .filter_map(|c| c.position.map(|p| p.row + c.size.0.max(1)))
        .max()
        .unwrap_or(0);
    let mut cells = Vec::new();
    let mut spare_col = 0usize;

    for component in config.components.iter() {
        let (h_units, w_units) = component.size;
        let (row, col) = match component.position {
            Some(pos) => (pos.row, pos.col),
            None => {
                spare_col += 1;
                (rows, spare_col - 1)
            }
        };
        cells.push(Cell {
            x: col as f64 * S,
            y: row as f64 * S,
            w: w_units.max(1) as f64 * S - GAP,
            h: h_units.max(1) as f64 * S - GAP,
            component,
        });
    }
    cells
}

/// Compute the bounding box of all cells: (max_x + w, max_y + h).
fn bbox(cells: &[Cell<'_>]) -> (f64, f64) {
    let mut max_x: f64 = U;
    let mut max_y: f64 = U;
    for c in cells {
        max_x = max_x.max(c.x + c.w);
        max_y = max_y.max(c.y + c.h);
    }
    (max_x, max_y)
}

fn key_class(binding: &ComponentBinding) -> &'static str {
    if binding.is_empty() {
        return "key unused";
    }
    match &binding.press {
        Binding::Layer { .. } => "key layer",
        Binding::Macro { .. } => "key macro",
        Binding::Consumer { .. } => "key consumer",
        Binding::Hid { report } => {
            let codes = report.keycodes();
            if !codes.is_empty() && codes.iter().all(|&c| is_modifier_code(c)) {
                "key modifier"
            } else {
                "key"
            }
        }
        _ => "key",
    }
}

/// Text lines for one cell: the binding first, encoder turns after.
fn labels(binding: &ComponentBinding) -> Vec<String> {
    let mut lines = Vec::new();
    if !binding.press.is_none() {
        lines.push(binding.press.label());
    }
    if !binding.clockwise.is_none() {
        lines.push(format!("\u{21bb} {}", binding.clockwise.label()));
    }
    if !binding.counterclockwise.is_none() {
        lines.push(format!("\u{21ba} {}", binding.counterclockwise.label()));
    }
    lines
}

/// Render a single layer as an SVG group.
fn render_layer(cells: &[Cell<'_>], name: &str, layer: &LayerBindings, y_offset: f64) -> String {
    let mut svg = String::new();

    svg.push_str(&format!(r#"<g transform="translate({MARGIN}, {y_offset})">"#));
    svg.push_str(&format!(
        r#"<text x="0" y="-10" class="layer-title">Layer {}</text>"#,
        html_escape(name)
    ));

    let unbound = ComponentBinding::default();
    for cell in cells {
        let binding = layer.get(&cell.component.id).unwrap_or(&unbound);

        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="{}" height="{}" rx="{R}" class="{}"/>"#,
            cell.x,
            cell.y,
            cell.w,
            cell.h,
            key_class(binding),
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" class="id">{}</text>"#,
            cell.x + 5.0,
            cell.y + 11.0,
            html_escape(&cell.component.id),
        ));

        let lines = labels(binding);
        let top = cell.y + cell.h / 2.0 - (lines.len() as f64 - 1.0) * 7.0 + 4.0;
        for (i, label) in lines.iter().enumerate() {
            let font_class = if label.chars().count() > 5 || lines.len() > 1 {
                " small"
            } else {
                ""
            };
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" class="label{font_class}">{}</text>"#,
                cell.x + cell.w / 2.0,
                top + i as f64 * 14.0,
                html_escape(label),
            ));
        }
    }

    svg.push_str("</g>");
    svg
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Generate the complete HTML document with inline SVG.
pub fn generate_html(config: &Configuration) -> String {
    let cells = build_cells(config);
    let (content_w, content_h) = bbox(&cells);
    let layer_height = content_h + 60.0;
    let layers = config.actions.layers.len();
    let total_width = content_w + 2.0 * MARGIN;
    let total_height = layers as f64 * layer_height + 2.0 * MARGIN;

    let mut html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Macropad Layout</title>
<style>
  body {{
    background: #1a1a2e;
    color: #eee;
    font-family: system-ui, -apple-system, sans-serif;
    display: flex;
    justify-content: center;
    padding: 2em;
  }}
  svg {{
    filter: drop-shadow(0 2px 8px rgba(0,0,0,0.3));
  }}
  .key {{
    fill: #16213e;
    stroke: #0f3460;
    stroke-width: 1.5;
  }}
  .key:hover {{
    fill: #1a1a5e;
    stroke: #e94560;
  }}
  .key.unused {{
    fill: #0d1117;
    stroke: #21262d;
    stroke-dasharray: 3 3;
  }}
  .key.layer {{
    fill: #2d1b4e;
    stroke: #e94560;
    stroke-width: 2;
  }}
  .key.macro {{
    fill: #2e2a1b;
    stroke: #e9a645;
    stroke-width: 2;
  }}
  .key.consumer {{
    fill: #1b3a2e;
    stroke: #45e98a;
  }}
  .key.modifier {{
    fill: #1b2e4e;
    stroke: #53a8b6;
    stroke-width: 1.5;
  }}
  .id {{
    fill: #6b7394;
    font-family: "JetBrains Mono", "Fira Code", monospace;
    font-size: 8px;
    pointer-events: none;
  }}
  .label {{
    fill: #eee;
    font-family: "JetBrains Mono", "Fira Code", monospace;
    font-size: 13px;
    text-anchor: middle;
    dominant-baseline: middle;
    pointer-events: none;
  }}
  .label.small {{
    font-size: 10px;
  }}
  .layer-title {{
    fill: #e94560;
    font-family: system-ui, -apple-system, sans-serif;
    font-size: 16px;
    font-weight: bold;
  }}
</style>
</head>
<body>
<svg width="{total_width}" height="{total_height}" xmlns="http://www.w3.org/2000/svg">
"#
    );

    for (idx, (name, bindings)) in config.actions.layers.iter().enumerate() {
        let y_offset = MARGIN + idx as f64 * layer_height + 30.0;
        html.push_str(&render_layer(&cells, name, bindings, y_offset));
        html.push('\n');
    }

    html.push_str("</svg>\n</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use macropad_keymap::config::parse_components;
    use macropad_keymap::{ActionsConfig, MacroLibrary, Warnings};

    fn config() -> Configuration {
        let mut warnings = Warnings::new();
        let components = parse_components(
            r#"{"components": [
                {"id": "button-1", "type": "button", "start_location": {"row": 0, "column": 0}},
                {"id": "button-2", "type": "button", "start_location": {"row": 0, "column": 1},
                 "size": {"rows": 2, "columns": 1}},
                {"id": "encoder-1", "type": "encoder"}
            ]}"#,
            &mut warnings,
        )
        .unwrap();
        let actions = ActionsConfig::parse(
            r#"{"actions": {
                "layer-config": {
                    "button-1": {"type": "hid", "buttonPress": ["0x00","0x00","0x04"]},
                    "button-2": {"type": "layer", "targetLayer": "fn"},
                    "encoder-1": {"type": "multimedia",
                        "clockwise": ["0xE9","0x00"], "counterclockwise": ["0xEA","0x00"]}
                },
                "layers": {"fn": {"button-1": {"type": "macro", "macroId": "hi3"}}}
            }}"#,
            &mut warnings,
        )
        .unwrap();
        Configuration {
            components,
            actions,
            macros: MacroLibrary::new(),
            warnings,
        }
    }

    #[test]
    fn cells_follow_matrix_positions() {
        let config = config();
        let cells = build_cells(&config);
        let tall = cells.iter().find(|c| c.component.id == "button-2").unwrap();
        assert_eq!((tall.x, tall.y), (S, 0.0));
        assert_eq!(tall.h, 2.0 * S - GAP);

        // Encoders without a button go below the two matrix rows.
        let encoder = cells.iter().find(|c| c.component.id == "encoder-1").unwrap();
        assert_eq!(encoder.y, 2.0 * S);
    }

    #[test]
    fn every_layer_is_rendered() {
        let html = generate_html(&config());
        assert!(html.contains("Layer default"));
        assert!(html.contains("Layer fn"));
        assert!(html.contains("L:fn"));
        assert!(html.contains("M:hi3"));
        assert!(html.contains("Vol+"));
        assert!(html.contains(r#"class="key unused""#));
    }

    #[test]
    fn labels_are_escaped() {
        assert_eq!(html_escape("<a&b>"), "&lt;a&amp;b&gt;");
    }
}
