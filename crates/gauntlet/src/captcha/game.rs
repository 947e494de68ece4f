//! Game challenge generation.
//!
//! Picks one of three mini-games from a complexity-conditioned
//! distribution and renders it with its verifier parameters baked in:
//! snake (collect food), memory (repeat a flashed sequence), and
//! reaction (click at a target instant).

use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;

use gauntlet_common::{GameVerifier, Oracle};

const GRID_SIZE: i32 = 20;
const MEMORY_GRID: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GameKind {
    Snake,
    Memory,
    Reaction,
}

impl GameKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Snake => "snake",
            Self::Memory => "memory",
            Self::Reaction => "reaction",
        }
    }
}

#[derive(Debug, Serialize)]
struct GamePayload {
    id: String,
    game_type: &'static str,
    game_data: serde_json::Value,
    canvas_width: i32,
    canvas_height: i32,
}

pub struct GameGenerator {
    canvas_width: i32,
    canvas_height: i32,
}

impl GameGenerator {
    pub fn new(canvas_width: i32, canvas_height: i32) -> Self {
        Self {
            canvas_width,
            canvas_height,
        }
    }

    pub fn generate(&self, complexity: i32, rng: &mut StdRng) -> (String, Oracle) {
        match self.pick_kind(complexity, rng) {
            GameKind::Snake => self.generate_snake(complexity, rng),
            GameKind::Memory => self.generate_memory(complexity, rng),
            GameKind::Reaction => self.generate_reaction(complexity, rng),
        }
    }

    /// Easier games dominate at low complexity; snake takes over as the
    /// complexity rises.
    fn pick_kind(&self, complexity: i32, rng: &mut StdRng) -> GameKind {
        let weights: [(GameKind, u32); 3] = if complexity < 40 {
            [
                (GameKind::Snake, 20),
                (GameKind::Memory, 40),
                (GameKind::Reaction, 40),
            ]
        } else if complexity < 70 {
            [
                (GameKind::Snake, 34),
                (GameKind::Memory, 33),
                (GameKind::Reaction, 33),
            ]
        } else {
            [
                (GameKind::Snake, 40),
                (GameKind::Memory, 35),
                (GameKind::Reaction, 25),
            ]
        };

        let total: u32 = weights.iter().map(|(_, w)| w).sum();
        let mut roll = rng.random_range(0..total);
        for (kind, weight) in weights {
            if roll < weight {
                return kind;
            }
            roll -= weight;
        }
        GameKind::Snake
    }

    fn generate_snake(&self, complexity: i32, rng: &mut StdRng) -> (String, Oracle) {
        let target_food = 3 + (complexity / 25) as u32;
        let speed_ms = 200 - 2 * complexity;

        let game_data = serde_json::json!({
            "grid_size": GRID_SIZE,
            "target_food": target_food,
            "speed": speed_ms,
            "food_x": rng.random_range(0..self.canvas_width / GRID_SIZE) * GRID_SIZE,
            "food_y": rng.random_range(0..self.canvas_height / GRID_SIZE) * GRID_SIZE,
        });

        let instructions = format!(
            "Use arrow keys to collect {target_food} food items. Don't hit the walls!"
        );
        let artifact = self.render(GameKind::Snake, game_data, &instructions, rng);

        (artifact, Oracle::GameVerifier(GameVerifier::SnakeScore { target_food }))
    }

    fn generate_memory(&self, complexity: i32, rng: &mut StdRng) -> (String, Oracle) {
        let length = 3 + (complexity / 20) as usize;
        let cells = (MEMORY_GRID * MEMORY_GRID) as u8;
        let sequence: Vec<u8> = (0..length).map(|_| rng.random_range(0..cells)).collect();
        let show_time_ms = 2000 - 10 * complexity;

        let game_data = serde_json::json!({
            "sequence": sequence,
            "grid_size": MEMORY_GRID,
            "cells": cells,
            "show_time": show_time_ms,
        });

        let instructions = format!(
            "Remember and repeat the sequence of {length} highlighted cells"
        );
        let artifact = self.render(GameKind::Memory, game_data, &instructions, rng);

        (artifact, Oracle::GameVerifier(GameVerifier::MemorySequence { sequence }))
    }

    fn generate_reaction(&self, complexity: i32, rng: &mut StdRng) -> (String, Oracle) {
        let target_ms = i64::from(rng.random_range(1000..3000));
        let tolerance_ms = i64::from(300 - 2 * complexity);

        let game_data = serde_json::json!({
            "target_time": target_ms,
            "tolerance": tolerance_ms,
        });

        let instructions = format!(
            "Wait for the green signal, then click as fast as possible! Target: {target_ms}ms"
        );
        let artifact = self.render(GameKind::Reaction, game_data, &instructions, rng);

        (
            artifact,
            Oracle::GameVerifier(GameVerifier::ReactionTime {
                target_ms,
                tolerance_ms,
            }),
        )
    }

    fn render(
        &self,
        kind: GameKind,
        game_data: serde_json::Value,
        instructions: &str,
        rng: &mut StdRng,
    ) -> String {
        let payload = GamePayload {
            id: format!("game_{:x}", rng.random::<u64>()),
            game_type: kind.as_str(),
            game_data,
            canvas_width: self.canvas_width,
            canvas_height: self.canvas_height,
        };
        let payload_json = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());

        let game_js = match kind {
            GameKind::Snake => SNAKE_JS,
            GameKind::Memory => MEMORY_JS,
            GameKind::Reaction => REACTION_JS,
        };

        format!(
            r##"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<title>Verification</title>
<style>
    body {{ font-family: Arial, sans-serif; margin: 0; padding: 20px; background: #f5f5f5; user-select: none; }}
    .captcha-container {{ max-width: {width}px; margin: 0 auto; background: white; border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); padding: 20px; }}
    .instructions {{ text-align: center; margin-bottom: 20px; font-size: 16px; color: #333; }}
    .game-canvas {{ width: {width}px; height: {height}px; border: 2px solid #ddd; border-radius: 4px; background: #fafafa; margin: 0 auto; display: block; }}
    .game-info {{ text-align: center; margin: 10px 0; font-size: 14px; color: #666; }}
    .submit-btn {{ display: block; margin: 20px auto 0; padding: 10px 20px; background: #007bff; color: white; border: none; border-radius: 4px; cursor: pointer; font-size: 16px; }}
    .submit-btn:disabled {{ background: #6c757d; cursor: not-allowed; }}
</style>
</head>
<body>
<div class="captcha-container">
    <div class="instructions">{instructions}</div>
    <canvas class="game-canvas" id="gameCanvas" width="{width}" height="{height}"></canvas>
    <div class="game-info" id="gameInfo">Loading...</div>
    <button class="submit-btn" id="submitBtn" disabled>Submit</button>
</div>
<script>
    const captchaData = {payload_json};
    const canvas = document.getElementById('gameCanvas');
    const ctx = canvas.getContext('2d');
    let gameState = {{ completed: false, success: false, score: 0, detail: null,
                       startTime: Date.now() }};

    function completeGame(success, score, detail, message) {{
        gameState.completed = true;
        gameState.success = success;
        gameState.score = score;
        gameState.detail = detail;
        document.getElementById('gameInfo').textContent = message;
        document.getElementById('submitBtn').disabled = false;
    }}

    document.getElementById('submitBtn').addEventListener('click', () => {{
        if (!gameState.completed) return;
        window.top.postMessage({{
            type: 'captcha:sendData',
            data: JSON.stringify({{
                type: 'game_solution',
                game_type: captchaData.game_type,
                success: gameState.success,
                score: gameState.score,
                detail: gameState.detail,
                captchaId: captchaData.id,
                completion_time: Date.now() - gameState.startTime
            }})
        }}, '*');
    }});

    {game_js}

    document.addEventListener('DOMContentLoaded', initGame);
</script>
</body>
</html>"##,
            width = self.canvas_width,
            height = self.canvas_height,
            instructions = instructions,
            payload_json = payload_json,
            game_js = game_js,
        )
    }
}

// Per-kind game loops. Kept free of Rust format placeholders: doubled
// braces below are literal JS braces.

const SNAKE_JS: &str = r#"
    function initGame() {
        const d = captchaData.game_data;
        const grid = d.grid_size;
        let snake = [{ x: grid * 5, y: grid * 5 }];
        let dir = { x: grid, y: 0 };
        let food = { x: d.food_x, y: d.food_y };
        let eaten = 0;

        document.addEventListener('keydown', e => {
            if (e.key === 'ArrowLeft' && dir.x === 0) dir = { x: -grid, y: 0 };
            if (e.key === 'ArrowRight' && dir.x === 0) dir = { x: grid, y: 0 };
            if (e.key === 'ArrowUp' && dir.y === 0) dir = { x: 0, y: -grid };
            if (e.key === 'ArrowDown' && dir.y === 0) dir = { x: 0, y: grid };
        });

        const timer = setInterval(() => {
            const head = { x: snake[0].x + dir.x, y: snake[0].y + dir.y };
            if (head.x < 0 || head.y < 0 || head.x >= canvas.width || head.y >= canvas.height) {
                clearInterval(timer);
                completeGame(false, eaten, null, 'Hit the wall after ' + eaten + ' items');
                return;
            }
            snake.unshift(head);
            if (head.x === food.x && head.y === food.y) {
                eaten++;
                food = { x: Math.floor(Math.random() * canvas.width / grid) * grid,
                         y: Math.floor(Math.random() * canvas.height / grid) * grid };
                if (eaten >= d.target_food) {
                    clearInterval(timer);
                    completeGame(true, eaten, null, 'Collected all ' + eaten + ' items!');
                    return;
                }
            } else {
                snake.pop();
            }
            ctx.clearRect(0, 0, canvas.width, canvas.height);
            ctx.fillStyle = '#ff6b6b';
            ctx.fillRect(food.x, food.y, grid, grid);
            ctx.fillStyle = '#4ecdc4';
            snake.forEach(s => ctx.fillRect(s.x, s.y, grid, grid));
            document.getElementById('gameInfo').textContent =
                'Food: ' + eaten + ' / ' + d.target_food;
        }, d.speed);
    }
"#;

const MEMORY_JS: &str = r#"
    function initGame() {
        const d = captchaData.game_data;
        const grid = d.grid_size;
        const cellW = canvas.width / grid;
        const cellH = canvas.height / grid;
        let picked = [];
        let showing = true;

        function drawGrid(highlight) {
            ctx.clearRect(0, 0, canvas.width, canvas.height);
            for (let i = 0; i < d.cells; i++) {
                const x = (i % grid) * cellW;
                const y = Math.floor(i / grid) * cellH;
                ctx.fillStyle = i === highlight ? '#3498db' : '#e9ecef';
                ctx.fillRect(x + 2, y + 2, cellW - 4, cellH - 4);
            }
        }

        let step = 0;
        const flasher = setInterval(() => {
            if (step >= d.sequence.length) {
                clearInterval(flasher);
                drawGrid(-1);
                showing = false;
                document.getElementById('gameInfo').textContent = 'Now repeat the sequence';
                return;
            }
            drawGrid(d.sequence[step]);
            step++;
        }, d.show_time / d.sequence.length);

        canvas.addEventListener('click', e => {
            if (showing || gameState.completed) return;
            const rect = canvas.getBoundingClientRect();
            const col = Math.floor((e.clientX - rect.left) / cellW);
            const row = Math.floor((e.clientY - rect.top) / cellH);
            picked.push(row * grid + col);
            drawGrid(picked[picked.length - 1]);
            if (picked.length === d.sequence.length) {
                completeGame(true, picked.length, picked, 'Sequence entered');
            }
        });

        document.getElementById('gameInfo').textContent = 'Watch the sequence...';
    }
"#;

const REACTION_JS: &str = r#"
    function initGame() {
        const d = captchaData.game_data;

        function draw(color, text) {
            ctx.clearRect(0, 0, canvas.width, canvas.height);
            ctx.fillStyle = color;
            ctx.fillRect(0, 0, canvas.width, canvas.height);
            ctx.fillStyle = 'white';
            ctx.font = '20px Arial';
            ctx.textAlign = 'center';
            ctx.fillText(text, canvas.width / 2, canvas.height / 2);
        }

        draw('#e74c3c', 'Wait for green...');
        setTimeout(() => {
            draw('#2ecc71', 'CLICK!');
        }, d.target_time);

        canvas.addEventListener('click', () => {
            if (gameState.completed) return;
            const elapsed = Date.now() - gameState.startTime;
            completeGame(true, elapsed, elapsed, 'Reacted at ' + elapsed + 'ms');
        });

        document.getElementById('gameInfo').textContent = 'Click when the canvas turns green';
    }
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::engine::seeded_rng;

    fn generator() -> GameGenerator {
        GameGenerator::new(400, 300)
    }

    #[test]
    fn test_snake_parameters_follow_schedule() {
        let g = generator();
        let mut rng = seeded_rng(75);
        let (_, oracle) = g.generate_snake(75, &mut rng);
        match oracle {
            Oracle::GameVerifier(GameVerifier::SnakeScore { target_food }) => {
                assert_eq!(target_food, 6); // 3 + 75/25
            }
            other => panic!("unexpected oracle: {other:?}"),
        }
    }

    #[test]
    fn test_memory_sequence_length_and_domain() {
        let g = generator();
        let mut rng = seeded_rng(60);
        let (_, oracle) = g.generate_memory(60, &mut rng);
        match oracle {
            Oracle::GameVerifier(GameVerifier::MemorySequence { sequence }) => {
                assert_eq!(sequence.len(), 6); // 3 + 60/20
                assert!(sequence.iter().all(|&c| c < 16));
            }
            other => panic!("unexpected oracle: {other:?}"),
        }
    }

    #[test]
    fn test_reaction_window() {
        let g = generator();
        let mut rng = seeded_rng(50);
        for _ in 0..50 {
            let (_, oracle) = g.generate_reaction(50, &mut rng);
            match oracle {
                Oracle::GameVerifier(GameVerifier::ReactionTime {
                    target_ms,
                    tolerance_ms,
                }) => {
                    assert!((1000..3000).contains(&target_ms));
                    assert_eq!(tolerance_ms, 200); // 300 - 2*50
                }
                other => panic!("unexpected oracle: {other:?}"),
            }
        }
    }

    #[test]
    fn test_artifact_embeds_game_shell() {
        let g = generator();
        let mut rng = seeded_rng(80);
        let (artifact, _) = g.generate(80, &mut rng);
        assert!(artifact.contains("game_solution"));
        assert!(artifact.contains("captcha:sendData"));
        assert!(artifact.contains("initGame"));
    }
}
