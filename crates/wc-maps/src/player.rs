//! What the map core needs to know about a player.
//!
//! The session and character systems live outside the core; this is the
//! projection they hand in when asking for map creation or entry gating.

use std::collections::HashSet;

use wc_common::Difficulty;

/// The player's group, as far as instancing is concerned.
#[derive(Debug, Clone, Default)]
pub struct GroupInfo {
    pub raid_group: bool,
    pub dungeon_difficulty: Difficulty,
    pub raid_difficulty: Difficulty,
    /// Achievements held by the group leader, for heroic-raid gating.
    pub leader_achievements: HashSet<u32>,
}

#[derive(Debug, Clone)]
pub struct PlayerInfo {
    pub guid: u64,
    pub name: String,
    pub game_master: bool,
    pub dungeon_difficulty: Difficulty,
    pub raid_difficulty: Difficulty,
    pub achievements: HashSet<u32>,
    pub group: Option<GroupInfo>,
    /// Instance id of the battleground the player is queued into; 0 when
    /// not in a battle.
    pub battleground_id: u32,
}

impl PlayerInfo {
    pub fn new(guid: u64, name: &str) -> Self {
        Self {
            guid,
            name: name.to_string(),
            game_master: false,
            dungeon_difficulty: Difficulty::Normal,
            raid_difficulty: Difficulty::Raid10Normal,
            achievements: HashSet::new(),
            group: None,
            battleground_id: 0,
        }
    }

    /// The player's own selected difficulty for the map class.
    pub fn difficulty(&self, raid: bool) -> Difficulty {
        if raid {
            self.raid_difficulty
        } else {
            self.dungeon_difficulty
        }
    }

    /// The difficulty a fresh instance gets: the group's selection when
    /// grouped, the player's own otherwise.
    pub fn group_difficulty(&self, raid: bool) -> Difficulty {
        match &self.group {
            Some(group) if raid => group.raid_difficulty,
            Some(group) => group.dungeon_difficulty,
            None => self.difficulty(raid),
        }
    }

    pub fn in_raid_group(&self) -> bool {
        self.group.as_ref().map(|g| g.raid_group).unwrap_or(false)
    }
}

/// Who is asking the factory for a map. Only players may trigger instance
/// creation; anything else gets the shared world map at most.
pub enum Actor<'a> {
    Player(&'a PlayerInfo),
    Other,
}
