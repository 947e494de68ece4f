//! Drag & drop challenge generation.
//!
//! Emits N draggable objects and N drop targets. Each object is bound to
//! exactly one correct target; bounding boxes do not overlap each other,
//! reject-sampled with the same 50-attempt budget and widest-clearance
//! fallback as the other families.

use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;

use gauntlet_common::Oracle;

use super::element_count;
use crate::config::DragDropConfig;

const MAX_PLACEMENT_ATTEMPTS: usize = 50;
const OBJECT_SIZE: i32 = 50;
const TARGET_SIZE: i32 = 60;

const SHAPES: [&str; 12] = [
    "circle", "square", "triangle", "diamond", "pentagon", "hexagon", "star", "heart", "cross",
    "arrow", "oval", "crescent",
];

const COLORS: [&str; 12] = [
    "#ff6b6b", "#4ecdc4", "#45b7d1", "#96ceb4", "#feca57", "#ff9ff3", "#54a0ff", "#5f27cd",
    "#fd79a8", "#fdcb6e", "#6c5ce7", "#00b894",
];

/// A draggable object bound to one target
#[derive(Debug, Clone, Serialize)]
pub struct DragObject {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub color: String,
    pub shape: String,
    pub label: String,
}

/// A drop zone
#[derive(Debug, Clone, Serialize)]
pub struct DropTarget {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub label: String,
}

#[derive(Debug, Serialize)]
struct DragDropPayload<'a> {
    id: String,
    objects: &'a [DragObject],
    targets: &'a [DropTarget],
    canvas_width: i32,
    canvas_height: i32,
}

pub struct DragDropGenerator {
    canvas_width: i32,
    canvas_height: i32,
    min_objects: usize,
    max_objects: usize,
}

impl DragDropGenerator {
    pub fn new(config: &DragDropConfig) -> Self {
        Self {
            canvas_width: config.canvas_width,
            canvas_height: config.canvas_height,
            min_objects: config.min_objects,
            max_objects: config.max_objects,
        }
    }

    pub fn generate(&self, complexity: i32, rng: &mut StdRng) -> (String, Oracle) {
        let count = element_count(complexity, self.min_objects, self.max_objects);
        let (objects, targets, pairs) = self.place_objects_and_targets(count, rng);

        let artifact = self.render(&objects, &targets, rng);

        (artifact, Oracle::PairMap(pairs))
    }

    fn place_objects_and_targets(
        &self,
        count: usize,
        rng: &mut StdRng,
    ) -> (Vec<DragObject>, Vec<DropTarget>, HashMap<String, String>) {
        let mut objects: Vec<DragObject> = Vec::with_capacity(count);
        let mut targets: Vec<DropTarget> = Vec::with_capacity(count);
        let mut pairs = HashMap::with_capacity(count);

        for i in 0..count {
            let (tx, ty) = self.place_box(TARGET_SIZE, rng, &objects, &targets);
            let target = DropTarget {
                id: format!("target_{i}"),
                x: tx,
                y: ty,
                width: TARGET_SIZE,
                height: TARGET_SIZE,
                label: format!("Drop {} here", i + 1),
            };
            targets.push(target);

            let (ox, oy) = self.place_box(OBJECT_SIZE, rng, &objects, &targets);
            let object = DragObject {
                id: format!("obj_{i}"),
                x: ox,
                y: oy,
                width: OBJECT_SIZE,
                height: OBJECT_SIZE,
                color: COLORS[rng.random_range(0..COLORS.len())].to_string(),
                shape: SHAPES[rng.random_range(0..SHAPES.len())].to_string(),
                label: format!("{}", i + 1),
            };

            pairs.insert(object.id.clone(), format!("target_{i}"));
            objects.push(object);
        }

        (objects, targets, pairs)
    }

    /// Sample a position whose box clears every placed object and target.
    /// After 50 failed attempts the candidate with the widest clearance
    /// wins anyway, the same fallback the click family uses.
    fn place_box(
        &self,
        size: i32,
        rng: &mut StdRng,
        objects: &[DragObject],
        targets: &[DropTarget],
    ) -> (i32, i32) {
        let mut best: Option<(i32, i32)> = None;
        let mut best_clearance = f64::MIN;

        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let x = rng.random_range(0..self.canvas_width - size);
            let y = rng.random_range(0..self.canvas_height - size);

            let clear = objects
                .iter()
                .all(|o| !boxes_overlap(x, y, size, size, o.x, o.y, o.width, o.height))
                && targets
                    .iter()
                    .all(|t| !boxes_overlap(x, y, size, size, t.x, t.y, t.width, t.height));

            if clear {
                return (x, y);
            }

            let clearance = objects
                .iter()
                .map(|o| centre_distance(x, y, size, size, o.x, o.y, o.width, o.height))
                .chain(
                    targets
                        .iter()
                        .map(|t| centre_distance(x, y, size, size, t.x, t.y, t.width, t.height)),
                )
                .fold(f64::INFINITY, f64::min);

            if clearance > best_clearance {
                best_clearance = clearance;
                best = Some((x, y));
            }
        }

        best.unwrap_or((0, 0))
    }

    fn render(&self, objects: &[DragObject], targets: &[DropTarget], rng: &mut StdRng) -> String {
        let payload = DragDropPayload {
            id: format!("dragdrop_{:x}", rng.random::<u64>()),
            objects,
            targets,
            canvas_width: self.canvas_width,
            canvas_height: self.canvas_height,
        };
        let payload_json = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());

        let instructions = pick_instructions(rng);

        format!(
            r##"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<title>Verification</title>
<style>
    body {{ font-family: Arial, sans-serif; margin: 0; padding: 20px; background: #f5f5f5; }}
    .captcha-container {{ max-width: {width}px; margin: 0 auto; background: white; border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); padding: 20px; }}
    .instructions {{ text-align: center; margin-bottom: 20px; font-size: 16px; color: #333; }}
    .canvas {{ position: relative; width: {width}px; height: {height}px; border: 2px solid #ddd; border-radius: 4px; background: #fafafa; margin: 0 auto; }}
    .drag-object {{ position: absolute; cursor: move; user-select: none; border-radius: 4px; display: flex; align-items: center; justify-content: center; font-weight: bold; color: white; text-shadow: 1px 1px 2px rgba(0,0,0,0.5); }}
    .drag-object.dragging {{ z-index: 1000; box-shadow: 0 4px 15px rgba(0,0,0,0.3); }}
    .drop-target {{ position: absolute; border: 2px dashed #ccc; border-radius: 4px; background: rgba(0,123,255,0.1); display: flex; align-items: center; justify-content: center; font-size: 12px; color: #666; }}
    .drop-target.filled {{ border-color: #28a745; background: rgba(40,167,69,0.2); }}
    .submit-btn {{ display: block; margin: 20px auto 0; padding: 10px 20px; background: #007bff; color: white; border: none; border-radius: 4px; cursor: pointer; font-size: 16px; }}
    .submit-btn:disabled {{ background: #6c757d; cursor: not-allowed; }}
</style>
</head>
<body>
<div class="captcha-container">
    <div class="instructions">{instructions}</div>
    <div class="canvas" id="canvas"></div>
    <button class="submit-btn" id="submitBtn" disabled>Submit</button>
</div>
<script>
    const captchaData = {payload_json};
    let placements = {{}};
    let dragging = null;

    function initCaptcha() {{
        const canvas = document.getElementById('canvas');
        captchaData.targets.forEach(t => {{
            const el = document.createElement('div');
            el.className = 'drop-target';
            el.id = t.id;
            el.textContent = t.label;
            el.style.left = t.x + 'px';
            el.style.top = t.y + 'px';
            el.style.width = t.width + 'px';
            el.style.height = t.height + 'px';
            canvas.appendChild(el);
        }});
        captchaData.objects.forEach(o => {{
            const el = document.createElement('div');
            el.className = 'drag-object';
            el.id = o.id;
            el.textContent = o.label;
            el.style.left = o.x + 'px';
            el.style.top = o.y + 'px';
            el.style.width = o.width + 'px';
            el.style.height = o.height + 'px';
            el.style.background = o.color;
            el.addEventListener('pointerdown', e => startDrag(e, o.id, el));
            canvas.appendChild(el);
        }});
    }}

    function startDrag(e, id, el) {{
        dragging = {{ id: id, el: el, dx: e.offsetX, dy: e.offsetY }};
        el.classList.add('dragging');
        el.setPointerCapture(e.pointerId);
        el.addEventListener('pointermove', moveDrag);
        el.addEventListener('pointerup', endDrag);
    }}

    function moveDrag(e) {{
        if (!dragging) return;
        const rect = document.getElementById('canvas').getBoundingClientRect();
        dragging.el.style.left = (e.clientX - rect.left - dragging.dx) + 'px';
        dragging.el.style.top = (e.clientY - rect.top - dragging.dy) + 'px';
    }}

    function endDrag(e) {{
        if (!dragging) return;
        dragging.el.classList.remove('dragging');
        const ox = parseInt(dragging.el.style.left) + dragging.el.offsetWidth / 2;
        const oy = parseInt(dragging.el.style.top) + dragging.el.offsetHeight / 2;
        for (const t of captchaData.targets) {{
            if (ox >= t.x && ox <= t.x + t.width && oy >= t.y && oy <= t.y + t.height) {{
                placements[dragging.id] = t.id;
                document.getElementById(t.id).classList.add('filled');
                break;
            }}
        }}
        dragging = null;
        document.getElementById('submitBtn').disabled =
            Object.keys(placements).length !== captchaData.objects.length;
    }}

    document.getElementById('submitBtn').addEventListener('click', () => {{
        window.top.postMessage({{
            type: 'captcha:sendData',
            data: JSON.stringify({{
                type: 'drag_drop_solution',
                solution: placements,
                captchaId: captchaData.id
            }})
        }}, '*');
    }});

    document.addEventListener('DOMContentLoaded', initCaptcha);
</script>
</body>
</html>"##,
            width = self.canvas_width,
            height = self.canvas_height,
            instructions = instructions,
            payload_json = payload_json,
        )
    }
}

fn boxes_overlap(x1: i32, y1: i32, w1: i32, h1: i32, x2: i32, y2: i32, w2: i32, h2: i32) -> bool {
    !(x1 + w1 < x2 || x2 + w2 < x1 || y1 + h1 < y2 || y2 + h2 < y1)
}

fn centre_distance(x1: i32, y1: i32, w1: i32, h1: i32, x2: i32, y2: i32, w2: i32, h2: i32) -> f64 {
    let dx = f64::from(x1 + w1 / 2 - x2 - w2 / 2);
    let dy = f64::from(y1 + h1 / 2 - y2 - h2 / 2);
    (dx * dx + dy * dy).sqrt()
}

fn pick_instructions(rng: &mut StdRng) -> &'static str {
    const INSTRUCTIONS: [&str; 4] = [
        "Drag the numbered objects to their matching positions",
        "Match each colored object with its corresponding target",
        "Arrange the objects by dragging them to their drop zones",
        "Place each numbered item in its designated drop zone",
    ];
    INSTRUCTIONS[rng.random_range(0..INSTRUCTIONS.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::engine::seeded_rng;

    fn generator() -> DragDropGenerator {
        DragDropGenerator::new(&DragDropConfig::default())
    }

    #[test]
    fn test_pair_map_is_complete_bijection() {
        let g = generator();
        let mut rng = seeded_rng(70);
        let (_, oracle) = g.generate(70, &mut rng);

        let pairs = match oracle {
            Oracle::PairMap(p) => p,
            other => panic!("unexpected oracle: {other:?}"),
        };

        // base 3 + 2 at complexity 70
        assert_eq!(pairs.len(), 5);

        let mut seen_targets: Vec<&String> = pairs.values().collect();
        seen_targets.sort();
        seen_targets.dedup();
        assert_eq!(seen_targets.len(), pairs.len(), "each object maps to its own target");
    }

    #[test]
    fn test_no_overlapping_boxes() {
        let g = generator();
        let mut rng = seeded_rng(30);

        for _ in 0..10 {
            let (objects, targets, _) = g.place_objects_and_targets(4, &mut rng);

            let mut boxes: Vec<(i32, i32, i32, i32)> = Vec::new();
            boxes.extend(objects.iter().map(|o| (o.x, o.y, o.width, o.height)));
            boxes.extend(targets.iter().map(|t| (t.x, t.y, t.width, t.height)));

            for i in 0..boxes.len() {
                for j in (i + 1)..boxes.len() {
                    let (ax, ay, aw, ah) = boxes[i];
                    let (bx, by, bw, bh) = boxes[j];
                    assert!(
                        !boxes_overlap(ax, ay, aw, ah, bx, by, bw, bh),
                        "boxes {i} and {j} overlap"
                    );
                }
            }
        }
    }

    #[test]
    fn test_artifact_carries_postmessage_envelope() {
        let g = generator();
        let mut rng = seeded_rng(10);
        let (artifact, _) = g.generate(10, &mut rng);
        assert!(artifact.contains("captcha:sendData"));
        assert!(artifact.contains("drag_drop_solution"));
    }
}
