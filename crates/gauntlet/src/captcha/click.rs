//! Click challenge generation.
//!
//! Emits N circular targets on a fixed canvas. Any two target centres are
//! separated by at least two radii; placement reject-samples up to 50
//! attempts and then accepts the best candidate seen.

use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;

use gauntlet_common::Oracle;

use super::element_count;
use crate::config::ClickConfig;

const MAX_PLACEMENT_ATTEMPTS: usize = 50;

/// One clickable circular target
#[derive(Debug, Clone, Serialize)]
pub struct ClickTarget {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub radius: i32,
    pub label: String,
}

/// Payload embedded in the rendered artifact
#[derive(Debug, Serialize)]
struct ClickPayload<'a> {
    id: String,
    targets: &'a [ClickTarget],
    canvas_width: i32,
    canvas_height: i32,
}

pub struct ClickGenerator {
    canvas_width: i32,
    canvas_height: i32,
    min_clicks: usize,
    max_clicks: usize,
    click_radius: i32,
}

impl ClickGenerator {
    pub fn new(config: &ClickConfig) -> Self {
        Self {
            canvas_width: config.canvas_width,
            canvas_height: config.canvas_height,
            min_clicks: config.min_clicks,
            max_clicks: config.max_clicks,
            click_radius: config.click_radius,
        }
    }

    pub fn generate(&self, complexity: i32, rng: &mut StdRng) -> (String, Oracle) {
        let count = element_count(complexity, self.min_clicks, self.max_clicks);
        let targets = self.place_targets(count, rng);

        let sequence: Vec<String> = targets.iter().map(|t| t.id.clone()).collect();
        let artifact = self.render(&targets, rng);

        (artifact, Oracle::OrderedIds(sequence))
    }

    /// Reject-sample positions so no two centres sit closer than 2r.
    /// After 50 failed attempts the candidate with the widest clearance
    /// wins anyway.
    fn place_targets(&self, count: usize, rng: &mut StdRng) -> Vec<ClickTarget> {
        let r = self.click_radius;
        let mut targets: Vec<ClickTarget> = Vec::with_capacity(count);

        for i in 0..count {
            let mut best: Option<(i32, i32)> = None;
            let mut best_clearance = f64::MIN;

            for _ in 0..MAX_PLACEMENT_ATTEMPTS {
                let x = rng.random_range(r..self.canvas_width - r);
                let y = rng.random_range(r..self.canvas_height - r);

                let clearance = targets
                    .iter()
                    .map(|t| distance(x, y, t.x, t.y))
                    .fold(f64::INFINITY, f64::min);

                if clearance >= f64::from(2 * r) {
                    best = Some((x, y));
                    break;
                }
                if clearance > best_clearance {
                    best_clearance = clearance;
                    best = Some((x, y));
                }
            }

            let (x, y) = best.unwrap_or((r, r));
            targets.push(ClickTarget {
                id: format!("area_{i}"),
                x,
                y,
                radius: r,
                label: format!("{}", i + 1),
            });
        }

        targets
    }

    fn render(&self, targets: &[ClickTarget], rng: &mut StdRng) -> String {
        let payload = ClickPayload {
            id: format!("click_{:x}", rng.random::<u64>()),
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
    .canvas {{ position: relative; width: {width}px; height: {height}px; border: 2px solid #ddd; border-radius: 4px; background: #fafafa; margin: 0 auto; cursor: crosshair; }}
    .click-target {{ position: absolute; border: 2px solid #adb5bd; border-radius: 50%; display: flex; align-items: center; justify-content: center; font-weight: bold; color: #495057; cursor: pointer; background: #e9ecef; }}
    .click-target.clicked {{ border-color: #28a745; background: rgba(40,167,69,0.2); }}
    .submit-btn {{ display: block; margin: 20px auto 0; padding: 10px 20px; background: #007bff; color: white; border: none; border-radius: 4px; cursor: pointer; font-size: 16px; }}
    .submit-btn:disabled {{ background: #6c757d; cursor: not-allowed; }}
    .progress {{ text-align: center; margin-top: 10px; font-size: 14px; color: #666; }}
</style>
</head>
<body>
<div class="captcha-container">
    <div class="instructions">{instructions}</div>
    <div class="canvas" id="canvas"></div>
    <div class="progress" id="progress"></div>
    <button class="submit-btn" id="submitBtn" disabled>Submit</button>
</div>
<script>
    const captchaData = {payload_json};
    let solution = [];

    function initCaptcha() {{
        const canvas = document.getElementById('canvas');
        captchaData.targets.forEach(target => {{
            const el = document.createElement('div');
            el.className = 'click-target';
            el.textContent = target.label;
            el.style.left = (target.x - target.radius) + 'px';
            el.style.top = (target.y - target.radius) + 'px';
            el.style.width = (target.radius * 2) + 'px';
            el.style.height = (target.radius * 2) + 'px';
            el.addEventListener('click', () => handleClick(target.id, el));
            canvas.appendChild(el);
        }});
        updateProgress();
    }}

    function handleClick(id, el) {{
        const idx = solution.indexOf(id);
        if (idx >= 0) {{
            solution.splice(idx, 1);
            el.classList.remove('clicked');
        }} else {{
            solution.push(id);
            el.classList.add('clicked');
        }}
        updateProgress();
    }}

    function updateProgress() {{
        const total = captchaData.targets.length;
        document.getElementById('progress').textContent =
            'Selected ' + solution.length + ' of ' + total;
        document.getElementById('submitBtn').disabled = solution.length !== total;
    }}

    document.getElementById('submitBtn').addEventListener('click', () => {{
        window.top.postMessage({{
            type: 'captcha:sendData',
            data: JSON.stringify({{
                type: 'click_solution',
                solution: solution,
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

fn distance(x1: i32, y1: i32, x2: i32, y2: i32) -> f64 {
    let dx = f64::from(x1 - x2);
    let dy = f64::from(y1 - y2);
    (dx * dx + dy * dy).sqrt()
}

fn pick_instructions(rng: &mut StdRng) -> &'static str {
    const INSTRUCTIONS: [&str; 4] = [
        "Click on all the numbered areas in order",
        "Click on the highlighted regions",
        "Select all the marked areas by clicking on them",
        "Click on the numbered spots to complete the challenge",
    ];
    INSTRUCTIONS[rng.random_range(0..INSTRUCTIONS.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::engine::seeded_rng;

    fn generator() -> ClickGenerator {
        ClickGenerator::new(&ClickConfig::default())
    }

    #[test]
    fn test_target_count_follows_schedule() {
        let g = generator();
        let mut rng = seeded_rng(0);
        for (complexity, expected) in [(0, 2), (45, 3), (70, 4), (90, 5)] {
            let (_, oracle) = g.generate(complexity, &mut rng);
            match oracle {
                Oracle::OrderedIds(ids) => assert_eq!(ids.len(), expected),
                other => panic!("unexpected oracle: {other:?}"),
            }
        }
    }

    #[test]
    fn test_targets_keep_minimum_separation() {
        let g = generator();
        let mut rng = seeded_rng(50);

        // Default geometry leaves plenty of room, so the separation
        // invariant must always hold within 50 attempts.
        for _ in 0..20 {
            let targets = g.place_targets(5, &mut rng);
            for i in 0..targets.len() {
                for j in (i + 1)..targets.len() {
                    let d = distance(targets[i].x, targets[i].y, targets[j].x, targets[j].y);
                    assert!(
                        d >= f64::from(2 * targets[i].radius),
                        "targets {i} and {j} too close: {d}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_targets_stay_inside_canvas() {
        let g = generator();
        let mut rng = seeded_rng(80);
        let targets = g.place_targets(5, &mut rng);
        for t in &targets {
            assert!(t.x - t.radius >= 0);
            assert!(t.y - t.radius >= 0);
            assert!(t.x + t.radius <= 400);
            assert!(t.y + t.radius <= 300);
        }
    }

    #[test]
    fn test_artifact_embeds_targets_not_oracle_order_hint() {
        let g = generator();
        let mut rng = seeded_rng(10);
        let (artifact, _) = g.generate(10, &mut rng);
        assert!(artifact.contains("captcha:sendData"));
        assert!(artifact.contains("click_solution"));
        assert!(artifact.contains("area_0"));
    }
}
