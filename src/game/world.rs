//! Grid world: players, trails and glow points on a toroidal board

use rand::seq::IteratorRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::str::FromStr;

use super::GameError;

/// Stable client-chosen player identity
pub type PlayerId = String;

/// Most players a single world accepts
pub const MAX_PLAYERS: usize = 10;

/// Name used when a player joins with a blank one
pub const DEFAULT_PLAYER_NAME: &str = "Player";

/// A grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub row: u16,
    pub col: u16,
}

impl Cell {
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }

    /// The neighbouring cell in `direction`, wrapping at the board edges
    pub fn step(self, direction: Direction, size: u16) -> Self {
        let (dr, dc) = direction.delta();
        Self {
            row: wrap(self.row as i64 + dr, size),
            col: wrap(self.col as i64 + dc, size),
        }
    }
}

/// Map any coordinate onto `[0, size)`
fn wrap(value: i64, size: u16) -> u16 {
    value.rem_euclid(size as i64) as u16
}

/// Heading of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    #[default]
    Right,
}

impl Direction {
    /// (row, col) offset of one step
    pub fn delta(self) -> (i64, i64) {
        match self {
            Direction::Up => (-1, 0),
            Direction::Down => (1, 0),
            Direction::Left => (0, -1),
            Direction::Right => (0, 1),
        }
    }
}

impl FromStr for Direction {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(GameError::InvalidIntent(format!("unknown direction '{}'", other))),
        }
    }
}

/// Player state (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub position: Cell,
    pub direction: Direction,
    /// Previously occupied cells, most recent first. Never longer than `score`.
    pub trail: VecDeque<Cell>,
    pub score: u32,
    pub alive: bool,
    /// Position in join order
    pub join_index: usize,
}

impl Player {
    fn new(id: PlayerId, name: &str, position: Cell, join_index: usize) -> Self {
        Self {
            id,
            name: normalize_name(name),
            position,
            direction: Direction::Right,
            trail: VecDeque::new(),
            score: 0,
            alive: true,
            join_index,
        }
    }

    /// Display hue in degrees, spread evenly over the player cap
    pub fn hue(&self) -> u16 {
        ((self.join_index * 360 / MAX_PLAYERS) % 360) as u16
    }
}

pub(crate) fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        DEFAULT_PLAYER_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// What happened during one world tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Players that collected a glow point, in join order
    pub scored: Vec<PlayerId>,
    /// Players eliminated this tick, in join order
    pub eliminated: Vec<PlayerId>,
    /// Glow point spawned because the board ran empty
    pub respawned: Option<Cell>,
}

/// The board of a single room
pub struct GridWorld {
    size: u16,
    players: Vec<Player>,
    glow_points: BTreeSet<Cell>,
    drop_trail_on_death: bool,
    rng: ChaCha8Rng,
}

impl GridWorld {
    /// Empty world with no players and no glow points
    pub fn new(size: u16) -> Self {
        Self {
            size: size.max(1),
            players: Vec::new(),
            glow_points: BTreeSet::new(),
            drop_trail_on_death: false,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Convert eliminated players' trails into glow points
    pub fn with_trail_drops(mut self, enabled: bool) -> Self {
        self.drop_trail_on_death = enabled;
        self
    }

    /// Players in join order
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    fn player_mut(&mut self, id: &str) -> Result<&mut Player, GameError> {
        self.players
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(GameError::UnknownPlayer)
    }

    pub fn glow_points(&self) -> impl Iterator<Item = Cell> + '_ {
        self.glow_points.iter().copied()
    }

    pub fn glow_point_count(&self) -> usize {
        self.glow_points.len()
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    /// Place a glow point. Returns false when the cell already holds one.
    pub fn add_glow_point(&mut self, cell: Cell) -> bool {
        let cell = Cell::new(wrap(cell.row as i64, self.size), wrap(cell.col as i64, self.size));
        self.glow_points.insert(cell)
    }

    /// Add a player at its spawn lane
    pub fn add_player(&mut self, id: &str, name: &str) -> Result<&Player, GameError> {
        if self.player(id).is_some() {
            return Err(GameError::DuplicatePlayer);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(GameError::RoomFull);
        }

        let join_index = self.players.len();
        let lane = (self.size as usize / MAX_PLAYERS).max(1);
        let spawn = Cell::new(wrap((join_index * lane) as i64, self.size), 0);

        self.players
            .push(Player::new(id.to_string(), name, spawn, join_index));

        if self.glow_points.is_empty() {
            self.spawn_glow_point();
        }

        Ok(&self.players[join_index])
    }

    /// Rename an existing player; blank names are ignored
    pub fn rename(&mut self, id: &str, name: &str) -> Result<(), GameError> {
        let player = self.player_mut(id)?;
        if !name.trim().is_empty() {
            player.name = normalize_name(name);
        }
        Ok(())
    }

    /// Set the heading used by the next movement step
    pub fn set_direction(&mut self, id: &str, direction: Direction) -> Result<(), GameError> {
        let player = self.player_mut(id)?;
        if player.alive {
            player.direction = direction;
        }
        Ok(())
    }

    /// Move a player to an arbitrary cell, wrapping out-of-range coordinates
    pub fn teleport(&mut self, id: &str, row: i64, col: i64) -> Result<(), GameError> {
        let size = self.size;
        let player = self.player_mut(id)?;
        if player.alive {
            player.position = Cell::new(wrap(row, size), wrap(col, size));
        }
        Ok(())
    }

    /// Advance every living player one cell, then resolve pickups,
    /// eliminations and glow point respawn in that order.
    pub fn tick(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let size = self.size;

        // Movement: (index, vacated cell)
        let mut movers: Vec<(usize, Cell)> = Vec::new();
        for (idx, player) in self.players.iter_mut().enumerate() {
            if !player.alive {
                continue;
            }
            let vacated = player.position;
            player.trail.push_front(vacated);
            player.trail.truncate(player.score as usize);
            player.position = vacated.step(player.direction, size);
            movers.push((idx, vacated));
        }

        // Pickups use the new head positions
        for &(idx, _) in &movers {
            let player = &mut self.players[idx];
            if self.glow_points.remove(&player.position) {
                player.score += 1;
                outcome.scored.push(player.id.clone());
            }
        }

        // Eliminations are decided against the post-move board before any
        // player is marked dead, so simultaneous collisions are symmetric.
        let mut doomed: Vec<usize> = Vec::new();
        for &(a, a_vacated) in &movers {
            let me = &self.players[a];
            let head = me.position;

            let hit_self = me.trail.iter().skip(1).any(|c| *c == head);
            let hit_other = movers.iter().any(|&(b, b_vacated)| {
                if a == b {
                    return false;
                }
                let other = &self.players[b];
                other.position == head
                    || (other.position == a_vacated && b_vacated == head)
                    || other.trail.contains(&head)
            });

            if hit_self || hit_other {
                doomed.push(a);
            }
        }

        // Everyone doomed is dead before any trail turns into glow
        for &idx in &doomed {
            self.players[idx].alive = false;
            outcome.eliminated.push(self.players[idx].id.clone());
        }

        for idx in doomed {
            let trail: Vec<Cell> = self.players[idx].trail.drain(..).collect();
            if !self.drop_trail_on_death {
                continue;
            }
            for cell in trail {
                let under_living_head = self
                    .players
                    .iter()
                    .any(|p| p.alive && p.position == cell);
                if !under_living_head {
                    self.glow_points.insert(cell);
                }
            }
        }

        if self.glow_points.is_empty() && self.alive_count() > 0 {
            outcome.respawned = self.spawn_glow_point();
        }

        outcome
    }

    /// Drop a glow point on a random free cell. Returns `None` only when the
    /// board has no free cell left.
    pub fn spawn_glow_point(&mut self) -> Option<Cell> {
        let occupied: HashSet<Cell> = self
            .players
            .iter()
            .flat_map(|p| std::iter::once(p.position).chain(p.trail.iter().copied()))
            .chain(self.glow_points.iter().copied())
            .collect();

        let size = self.size;
        let cell = (0..size)
            .flat_map(|row| (0..size).map(move |col| Cell::new(row, col)))
            .filter(|cell| !occupied.contains(cell))
            .choose(&mut self.rng)?;

        self.glow_points.insert(cell);
        Some(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with(players: &[&str]) -> GridWorld {
        let mut world = GridWorld::new(50);
        // Park a glow point far away so tests control every pickup
        world.add_glow_point(Cell::new(49, 49));
        for id in players {
            world.add_player(id, "").unwrap();
        }
        world
    }

    #[test]
    fn test_add_player_defaults() {
        let world = world_with(&["P1"]);
        let p1 = world.player("P1").unwrap();
        assert_eq!(p1.position, Cell::new(0, 0));
        assert_eq!(p1.direction, Direction::Right);
        assert_eq!(p1.name, "Player");
        assert_eq!(p1.score, 0);
        assert!(p1.alive);
    }

    #[test]
    fn test_spawn_lanes_are_offset_by_join_index() {
        let world = world_with(&["a", "b", "c"]);
        let rows: Vec<u16> = world.players().iter().map(|p| p.position.row).collect();
        assert_eq!(rows, vec![0, 5, 10]);
        assert_eq!(world.players()[2].hue(), 72);
    }

    #[test]
    fn test_duplicate_and_full() {
        let mut world = world_with(&["P1"]);
        assert_eq!(world.add_player("P1", "x").unwrap_err(), GameError::DuplicatePlayer);

        for i in 1..MAX_PLAYERS {
            world.add_player(&format!("P{}", i + 1), "").unwrap();
        }
        assert_eq!(world.add_player("late", "").unwrap_err(), GameError::RoomFull);
    }

    #[test]
    fn test_first_player_gets_a_glow_point() {
        let mut world = GridWorld::new(50);
        assert_eq!(world.glow_point_count(), 0);
        world.add_player("P1", "Ann").unwrap();
        assert_eq!(world.glow_point_count(), 1);
        assert_ne!(world.glow_points().next(), Some(Cell::new(0, 0)));
    }

    #[test]
    fn test_single_step_each_direction_wraps() {
        let cases = [
            (Cell::new(0, 49), Direction::Right, Cell::new(0, 0)),
            (Cell::new(0, 0), Direction::Left, Cell::new(0, 49)),
            (Cell::new(0, 7), Direction::Up, Cell::new(49, 7)),
            (Cell::new(49, 7), Direction::Down, Cell::new(0, 7)),
            (Cell::new(10, 10), Direction::Down, Cell::new(11, 10)),
        ];

        for (start, dir, expected) in cases {
            let mut world = world_with(&["P1"]);
            world
                .teleport("P1", start.row as i64, start.col as i64)
                .unwrap();
            world.set_direction("P1", dir).unwrap();
            world.tick();
            assert_eq!(world.player("P1").unwrap().position, expected, "{:?} {:?}", start, dir);
        }
    }

    #[test]
    fn test_teleport_wraps_and_keeps_direction() {
        let mut world = world_with(&["P1"]);
        world.set_direction("P1", Direction::Up).unwrap();
        world.teleport("P1", -1, 103).unwrap();
        let p1 = world.player("P1").unwrap();
        assert_eq!(p1.position, Cell::new(49, 3));
        assert_eq!(p1.direction, Direction::Up);
    }

    #[test]
    fn test_unknown_player_is_rejected() {
        let mut world = world_with(&[]);
        assert_eq!(
            world.set_direction("ghost", Direction::Up).unwrap_err(),
            GameError::UnknownPlayer
        );
        assert_eq!(world.teleport("ghost", 1, 1).unwrap_err(), GameError::UnknownPlayer);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("UP".parse::<Direction>().unwrap(), Direction::Up);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(GameError::InvalidIntent(_))
        ));
    }

    #[test]
    fn test_pickup_scores_and_respawns() {
        let mut world = GridWorld::new(50);
        world.add_glow_point(Cell::new(0, 5));
        world.add_player("P1", "").unwrap();

        for _ in 0..4 {
            let outcome = world.tick();
            assert!(outcome.scored.is_empty());
        }
        let outcome = world.tick();

        let p1 = world.player("P1").unwrap();
        assert_eq!(p1.position, Cell::new(0, 5));
        assert_eq!(p1.score, 1);
        assert_eq!(outcome.scored, vec!["P1".to_string()]);
        assert_eq!(world.glow_point_count(), 1);
        let respawned = outcome.respawned.unwrap();
        assert_ne!(respawned, Cell::new(0, 5));
        assert!(world.glow_points().all(|c| c != Cell::new(0, 5)));
    }

    #[test]
    fn test_trail_grows_with_score() {
        let mut world = GridWorld::new(50);
        world.add_glow_point(Cell::new(0, 1));
        world.add_glow_point(Cell::new(0, 2));
        world.add_glow_point(Cell::new(40, 40));
        world.add_player("P1", "").unwrap();

        world.tick();
        world.tick();
        world.tick();

        let p1 = world.player("P1").unwrap();
        assert_eq!(p1.score, 2);
        assert_eq!(p1.trail.iter().copied().collect::<Vec<_>>(), vec![Cell::new(0, 2), Cell::new(0, 1)]);
    }

    #[test]
    fn test_head_on_collision_kills_both() {
        let mut world = world_with(&["a", "b"]);
        world.teleport("a", 20, 10).unwrap();
        world.teleport("b", 20, 12).unwrap();
        world.set_direction("b", Direction::Left).unwrap();

        let outcome = world.tick();

        assert_eq!(outcome.eliminated, vec!["a".to_string(), "b".to_string()]);
        assert!(!world.player("a").unwrap().alive);
        assert!(!world.player("b").unwrap().alive);
    }

    #[test]
    fn test_swapping_cells_kills_both() {
        let mut world = world_with(&["a", "b"]);
        world.teleport("a", 20, 10).unwrap();
        world.teleport("b", 20, 11).unwrap();
        world.set_direction("b", Direction::Left).unwrap();

        let outcome = world.tick();
        assert_eq!(outcome.eliminated.len(), 2);
    }

    #[test]
    fn test_running_into_trail_eliminates_only_the_mover() {
        let mut world = world_with(&["a", "b"]);
        world.player_mut("b").unwrap().score = 3;
        world.teleport("b", 20, 10).unwrap();
        // b moves right leaving (20,10) behind; a drives down into it
        world.teleport("a", 19, 10).unwrap();
        world.set_direction("a", Direction::Down).unwrap();

        let outcome = world.tick();

        assert_eq!(outcome.eliminated, vec!["a".to_string()]);
        assert!(world.player("b").unwrap().alive);
    }

    #[test]
    fn test_self_collision_on_reversal() {
        let mut world = world_with(&["a"]);
        world.player_mut("a").unwrap().score = 5;
        world.teleport("a", 10, 10).unwrap();
        world.tick();
        world.tick();
        world.set_direction("a", Direction::Left).unwrap();

        let outcome = world.tick();
        assert_eq!(outcome.eliminated, vec!["a".to_string()]);
    }

    #[test]
    fn test_dead_trail_becomes_glow_points() {
        let mut world = world_with(&["a", "b"]).with_trail_drops(true);
        world.player_mut("a").unwrap().score = 2;
        world.teleport("a", 20, 8).unwrap();
        world.teleport("b", 20, 12).unwrap();
        world.set_direction("b", Direction::Left).unwrap();
        world.tick();
        let outcome = world.tick();

        assert_eq!(outcome.eliminated.len(), 2);
        let glow: Vec<Cell> = world.glow_points().collect();
        assert!(glow.contains(&Cell::new(20, 9)));
        assert!(glow.contains(&Cell::new(20, 8)));
        assert!(world.player("a").unwrap().trail.is_empty());
    }

    #[test]
    fn test_trail_under_another_dead_head_still_drops() {
        let mut world = world_with(&["a", "b", "c"]).with_trail_drops(true);
        world.player_mut("a").unwrap().score = 3;
        world.teleport("a", 20, 8).unwrap();
        world.teleport("b", 18, 9).unwrap();
        world.set_direction("b", Direction::Down).unwrap();
        world.teleport("c", 20, 12).unwrap();
        world.set_direction("c", Direction::Left).unwrap();
        world.tick();

        // a and c meet head-on while b drives into a's trail at (20,9)
        let outcome = world.tick();

        assert_eq!(
            outcome.eliminated,
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert_eq!(world.player("b").unwrap().position, Cell::new(20, 9));
        let glow: Vec<Cell> = world.glow_points().collect();
        assert!(glow.contains(&Cell::new(20, 9)));
        assert!(glow.contains(&Cell::new(20, 8)));
    }

    #[test]
    fn test_dead_players_stay_and_do_not_move() {
        let mut world = world_with(&["a", "b"]);
        world.teleport("a", 20, 10).unwrap();
        world.teleport("b", 20, 12).unwrap();
        world.set_direction("b", Direction::Left).unwrap();
        world.tick();
        world.tick();

        assert_eq!(world.players().len(), 2);
        assert_eq!(world.player("a").unwrap().position, Cell::new(20, 11));
        assert_eq!(world.alive_count(), 0);
    }

    #[test]
    fn test_glow_never_empty_while_someone_lives() {
        let mut world = GridWorld::new(5);
        world.add_player("solo", "").unwrap();
        for _ in 0..200 {
            world.tick();
            if world.alive_count() == 0 {
                break;
            }
            assert!(world.glow_point_count() >= 1);
        }
    }

    #[test]
    fn test_score_never_decreases() {
        let mut world = GridWorld::new(8);
        world.add_player("a", "").unwrap();
        world.add_player("b", "").unwrap();
        world.set_direction("b", Direction::Down).unwrap();
        let mut last = vec![0u32; 2];
        for _ in 0..100 {
            world.tick();
            for (i, p) in world.players().iter().enumerate() {
                assert!(p.score >= last[i]);
                last[i] = p.score;
            }
        }
    }
}
