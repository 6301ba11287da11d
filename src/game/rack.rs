//! Initial table layouts per game type

use crate::ws::protocol::GameType;

use super::state::Position;

/// Standard pool ball radius (m)
pub const POOL_BALL_RADIUS: f64 = 0.028575;
/// Snooker ball radius (m)
pub const SNOOKER_BALL_RADIUS: f64 = 0.02625;

/// Small gap between racked balls so they start separated
const RACK_GAP: f64 = 1e-4;

/// Playing surface dimensions (m)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableSpec {
    pub width: f64,
    pub length: f64,
    pub ball_radius: f64,
}

impl TableSpec {
    pub fn for_game(game_type: GameType) -> Self {
        match game_type {
            GameType::EightBall | GameType::NineBall => Self {
                width: 0.9906,
                length: 1.9812,
                ball_radius: POOL_BALL_RADIUS,
            },
            GameType::Snooker => Self {
                width: 1.7780,
                length: 3.5690,
                ball_radius: SNOOKER_BALL_RADIUS,
            },
        }
    }
}

/// Ball ids and their starting positions
#[derive(Debug, Clone)]
pub struct Rack {
    pub table: TableSpec,
    pub cue_ball_id: String,
    pub balls: Vec<(String, Position)>,
}

impl Rack {
    pub fn for_game(game_type: GameType) -> Self {
        let table = TableSpec::for_game(game_type);
        match game_type {
            GameType::EightBall => Self::eight_ball(table),
            GameType::NineBall => Self::nine_ball(table),
            GameType::Snooker => Self::snooker(table),
        }
    }

    fn eight_ball(table: TableSpec) -> Self {
        // 8 sits in the middle of the third row
        let order = [1, 9, 2, 10, 8, 3, 11, 4, 12, 5, 13, 6, 14, 7, 15];
        let slots = triangle(&table, &[1, 2, 3, 4, 5], table.length * 0.75);
        let mut balls = vec![("cue".to_string(), head_spot(&table))];
        balls.extend(
            order
                .iter()
                .zip(slots)
                .map(|(n, pos)| (n.to_string(), pos)),
        );
        Self {
            table,
            cue_ball_id: "cue".into(),
            balls,
        }
    }

    fn nine_ball(table: TableSpec) -> Self {
        // Diamond with the 1 at the apex and the 9 in the centre
        let order = [1, 2, 3, 4, 9, 5, 6, 7, 8];
        let slots = triangle(&table, &[1, 2, 3, 2, 1], table.length * 0.75);
        let mut balls = vec![("cue".to_string(), head_spot(&table))];
        balls.extend(
            order
                .iter()
                .zip(slots)
                .map(|(n, pos)| (n.to_string(), pos)),
        );
        Self {
            table,
            cue_ball_id: "cue".into(),
            balls,
        }
    }

    fn snooker(table: TableSpec) -> Self {
        let r = table.ball_radius;
        let cx = table.width / 2.0;
        let baulk_y = table.length * 0.2;
        let d_radius = 0.292;
        let pink_y = table.length * 0.75;
        let black_y = table.length - 0.324;

        let mut balls = vec![
            ("white".to_string(), [cx - d_radius / 2.0, baulk_y - d_radius / 2.0, r]),
            ("yellow".to_string(), [cx + d_radius, baulk_y, r]),
            ("green".to_string(), [cx - d_radius, baulk_y, r]),
            ("brown".to_string(), [cx, baulk_y, r]),
            ("blue".to_string(), [cx, table.length / 2.0, r]),
            ("pink".to_string(), [cx, pink_y, r]),
            ("black".to_string(), [cx, black_y, r]),
        ];
        let apex_y = pink_y + 2.0 * r + RACK_GAP;
        let reds = triangle(&table, &[1, 2, 3, 4, 5], apex_y);
        balls.extend(
            reds.into_iter()
                .enumerate()
                .map(|(i, pos)| (format!("red_{:02}", i + 1), pos)),
        );
        Self {
            table,
            cue_ball_id: "white".into(),
            balls,
        }
    }
}

fn head_spot(table: &TableSpec) -> Position {
    [table.width / 2.0, table.length / 4.0, table.ball_radius]
}

/// Lay out rows of touching balls; row `i` holds `rows[i]` balls
fn triangle(table: &TableSpec, rows: &[usize], apex_y: f64) -> Vec<Position> {
    let r = table.ball_radius;
    let spacing = 2.0 * r + RACK_GAP;
    let row_step = spacing * 3f64.sqrt() / 2.0;
    let cx = table.width / 2.0;

    rows.iter()
        .enumerate()
        .flat_map(|(row, &count)| {
            let y = apex_y + row as f64 * row_step;
            (0..count).map(move |k| {
                let offset = k as f64 - (count as f64 - 1.0) / 2.0;
                [cx + offset * spacing, y, r]
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn min_separation(rack: &Rack) -> f64 {
        let mut min = f64::MAX;
        for (i, (_, a)) in rack.balls.iter().enumerate() {
            for (_, b) in rack.balls.iter().skip(i + 1) {
                let d = ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
                min = min.min(d);
            }
        }
        min
    }

    #[test]
    fn test_ball_counts() {
        assert_eq!(Rack::for_game(GameType::EightBall).balls.len(), 16);
        assert_eq!(Rack::for_game(GameType::NineBall).balls.len(), 10);
        assert_eq!(Rack::for_game(GameType::Snooker).balls.len(), 22);
    }

    #[test]
    fn test_balls_do_not_overlap_and_stay_on_table() {
        for game in [GameType::EightBall, GameType::NineBall, GameType::Snooker] {
            let rack = Rack::for_game(game);
            assert!(min_separation(&rack) >= 2.0 * rack.table.ball_radius, "{game:?}");
            for (id, pos) in &rack.balls {
                assert!(pos[0] > 0.0 && pos[0] < rack.table.width, "{id} off table");
                assert!(pos[1] > 0.0 && pos[1] < rack.table.length, "{id} off table");
            }
        }
    }

    #[test]
    fn test_cue_ball_is_racked() {
        for game in [GameType::EightBall, GameType::NineBall, GameType::Snooker] {
            let rack = Rack::for_game(game);
            assert!(rack.balls.iter().any(|(id, _)| *id == rack.cue_ball_id));
        }
    }
}
