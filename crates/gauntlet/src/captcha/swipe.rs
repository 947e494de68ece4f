//! Swipe challenge generation.
//!
//! Emits N swipeable tiles, each annotated with an expected direction.
//! Tiles do not overlap; the oracle records direction and minimum travel.

use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;

use gauntlet_common::{Direction, Oracle, SwipeStep};

use super::element_count;
use crate::config::SwipeConfig;

const MAX_PLACEMENT_ATTEMPTS: usize = 50;
const TILE_WIDTH: i32 = 90;
const TILE_HEIGHT: i32 = 60;

/// One swipeable tile
#[derive(Debug, Clone, Serialize)]
pub struct SwipeTile {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub direction: Direction,
}

#[derive(Debug, Serialize)]
struct SwipePayload<'a> {
    id: String,
    tiles: &'a [SwipeTile],
    threshold: u32,
    canvas_width: i32,
    canvas_height: i32,
}

pub struct SwipeGenerator {
    canvas_width: i32,
    canvas_height: i32,
    min_swipes: usize,
    max_swipes: usize,
    swipe_threshold: u32,
}

impl SwipeGenerator {
    pub fn new(config: &SwipeConfig) -> Self {
        Self {
            canvas_width: config.canvas_width,
            canvas_height: config.canvas_height,
            min_swipes: config.min_swipes,
            max_swipes: config.max_swipes,
            swipe_threshold: config.swipe_threshold,
        }
    }

    pub fn generate(&self, complexity: i32, rng: &mut StdRng) -> (String, Oracle) {
        let count = element_count(complexity, self.min_swipes, self.max_swipes);
        let tiles = self.place_tiles(count, rng);

        let steps: Vec<SwipeStep> = tiles
            .iter()
            .map(|t| SwipeStep {
                direction: t.direction,
                min_distance: self.swipe_threshold,
            })
            .collect();

        let artifact = self.render(&tiles, rng);

        (artifact, Oracle::SwipeSeq(steps))
    }

    fn place_tiles(&self, count: usize, rng: &mut StdRng) -> Vec<SwipeTile> {
        let mut tiles: Vec<SwipeTile> = Vec::with_capacity(count);

        for i in 0..count {
            let (x, y) = self.place_tile(rng, &tiles);
            let direction = Direction::ALL[rng.random_range(0..Direction::ALL.len())];
            tiles.push(SwipeTile {
                id: format!("tile_{i}"),
                x,
                y,
                width: TILE_WIDTH,
                height: TILE_HEIGHT,
                direction,
            });
        }

        tiles
    }

    /// Sample a position clear of every placed tile. After 50 failed
    /// attempts the candidate with the widest clearance wins anyway, the
    /// same fallback the click family uses.
    fn place_tile(&self, rng: &mut StdRng, tiles: &[SwipeTile]) -> (i32, i32) {
        let mut best: Option<(i32, i32)> = None;
        let mut best_clearance = f64::MIN;

        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let x = rng.random_range(0..self.canvas_width - TILE_WIDTH);
            let y = rng.random_range(0..self.canvas_height - TILE_HEIGHT);

            let clear = tiles.iter().all(|t| {
                !tiles_overlap(x, y, TILE_WIDTH, TILE_HEIGHT, t.x, t.y, t.width, t.height)
            });
            if clear {
                return (x, y);
            }

            let clearance = tiles
                .iter()
                .map(|t| {
                    centre_distance(x, y, TILE_WIDTH, TILE_HEIGHT, t.x, t.y, t.width, t.height)
                })
                .fold(f64::INFINITY, f64::min);

            if clearance > best_clearance {
                best_clearance = clearance;
                best = Some((x, y));
            }
        }

        best.unwrap_or((0, 0))
    }

    fn render(&self, tiles: &[SwipeTile], rng: &mut StdRng) -> String {
        let payload = SwipePayload {
            id: format!("swipe_{:x}", rng.random::<u64>()),
            tiles,
            threshold: self.swipe_threshold,
            canvas_width: self.canvas_width,
            canvas_height: self.canvas_height,
        };
        let payload_json = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());

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
    .canvas {{ position: relative; width: {width}px; height: {height}px; border: 2px solid #ddd; border-radius: 4px; background: #fafafa; margin: 0 auto; overflow: hidden; touch-action: none; }}
    .swipe-tile {{ position: absolute; border: 2px solid #007bff; border-radius: 8px; background: rgba(0,123,255,0.1); cursor: grab; user-select: none; display: flex; align-items: center; justify-content: center; font-weight: bold; color: #007bff; }}
    .swipe-tile.done {{ border-color: #28a745; background: rgba(40,167,69,0.2); color: #28a745; }}
    .submit-btn {{ display: block; margin: 20px auto 0; padding: 10px 20px; background: #007bff; color: white; border: none; border-radius: 4px; cursor: pointer; font-size: 16px; }}
    .submit-btn:disabled {{ background: #6c757d; cursor: not-allowed; }}
</style>
</head>
<body>
<div class="captcha-container">
    <div class="instructions">Swipe each tile in the direction of its arrow</div>
    <div class="canvas" id="canvas"></div>
    <button class="submit-btn" id="submitBtn" disabled>Submit</button>
</div>
<script>
    const captchaData = {payload_json};
    const arrows = {{ left: '←', right: '→', up: '↑', down: '↓' }};
    let gestures = [];
    let active = null;

    function initCaptcha() {{
        const canvas = document.getElementById('canvas');
        captchaData.tiles.forEach(tile => {{
            const el = document.createElement('div');
            el.className = 'swipe-tile';
            el.textContent = arrows[tile.direction];
            el.style.left = tile.x + 'px';
            el.style.top = tile.y + 'px';
            el.style.width = tile.width + 'px';
            el.style.height = tile.height + 'px';
            el.addEventListener('pointerdown', e => {{
                active = {{ tile: tile, el: el, x: e.clientX, y: e.clientY }};
                el.setPointerCapture(e.pointerId);
            }});
            el.addEventListener('pointerup', e => finishSwipe(e));
            canvas.appendChild(el);
        }});
    }}

    function finishSwipe(e) {{
        if (!active) return;
        const dx = e.clientX - active.x;
        const dy = e.clientY - active.y;
        let direction = null;
        if (Math.abs(dx) >= Math.abs(dy)) {{
            if (Math.abs(dx) >= captchaData.threshold) direction = dx > 0 ? 'right' : 'left';
        }} else {{
            if (Math.abs(dy) >= captchaData.threshold) direction = dy > 0 ? 'down' : 'up';
        }}
        if (direction) {{
            gestures.push({{ tile: active.tile.id, direction: direction,
                             distance: Math.round(Math.hypot(dx, dy)) }});
            active.el.classList.add('done');
        }}
        active = null;
        document.getElementById('submitBtn').disabled =
            gestures.length !== captchaData.tiles.length;
    }}

    document.getElementById('submitBtn').addEventListener('click', () => {{
        window.top.postMessage({{
            type: 'captcha:sendData',
            data: JSON.stringify({{
                type: 'swipe_solution',
                solution: gestures,
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
            payload_json = payload_json,
        )
    }
}

fn tiles_overlap(x1: i32, y1: i32, w1: i32, h1: i32, x2: i32, y2: i32, w2: i32, h2: i32) -> bool {
    !(x1 + w1 < x2 || x2 + w2 < x1 || y1 + h1 < y2 || y2 + h2 < y1)
}

fn centre_distance(x1: i32, y1: i32, w1: i32, h1: i32, x2: i32, y2: i32, w2: i32, h2: i32) -> f64 {
    let dx = f64::from(x1 + w1 / 2 - x2 - w2 / 2);
    let dy = f64::from(y1 + h1 / 2 - y2 - h2 / 2);
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::engine::seeded_rng;

    fn generator() -> SwipeGenerator {
        SwipeGenerator::new(&SwipeConfig::default())
    }

    #[test]
    fn test_swipe_count_follows_schedule() {
        let g = generator();
        let mut rng = seeded_rng(0);
        for (complexity, expected) in [(10, 1), (40, 2), (65, 3), (95, 3)] {
            let (_, oracle) = g.generate(complexity, &mut rng);
            match oracle {
                Oracle::SwipeSeq(steps) => assert_eq!(steps.len(), expected),
                other => panic!("unexpected oracle: {other:?}"),
            }
        }
    }

    #[test]
    fn test_tiles_do_not_overlap() {
        let g = generator();
        let mut rng = seeded_rng(50);
        for _ in 0..10 {
            let tiles = g.place_tiles(3, &mut rng);
            for i in 0..tiles.len() {
                for j in (i + 1)..tiles.len() {
                    let a = &tiles[i];
                    let b = &tiles[j];
                    assert!(!tiles_overlap(a.x, a.y, a.width, a.height, b.x, b.y, b.width, b.height));
                }
            }
        }
    }

    #[test]
    fn test_oracle_carries_threshold() {
        let g = generator();
        let mut rng = seeded_rng(20);
        let (_, oracle) = g.generate(20, &mut rng);
        match oracle {
            Oracle::SwipeSeq(steps) => {
                assert!(steps.iter().all(|s| s.min_distance == 50));
            }
            other => panic!("unexpected oracle: {other:?}"),
        }
    }
}
