// Copyright (C) 2026 VanguardReport
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Subclass shown when no loadout could be determined for a participant.
pub const UNKNOWN_SUBCLASS: &str = "Unknown";

/// Name shown for a weapon slot that could not be resolved.
pub const UNKNOWN_WEAPON_NAME: &str = "Unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformFlag {
    Xbox,
    Playstation,
}

impl PlatformFlag {
    /// Numeric membership-type code used by the upstream game API.
    pub fn code(self) -> u8 {
        match self {
            PlatformFlag::Xbox => 1,
            PlatformFlag::Playstation => 2,
        }
    }
}

/// Platform-qualified player identity. Two accounts with the same membership
/// token on different platforms are distinct players.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PlatformPlayerId {
    pub platform: PlatformFlag,
    pub membership_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchParticipant {
    pub id: PlatformPlayerId,
    pub display_name: String,
    pub rating: u32,
    pub kill_death_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterRef {
    pub character_id: String,
}

/// A character's currently equipped subclass and item ids. Absence of the
/// whole loadout is a normal state, modelled as `Option<Loadout>` upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Loadout {
    pub subclass: String,
    pub weapon_ids: Vec<u32>,
    pub armor_ids: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Legendary,
    Exotic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WeaponCategory {
    Primary,
    Special,
    Heavy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WeaponType {
    AutoRifle,
    PulseRifle,
    ScoutRifle,
    HandCannon,
    Shotgun,
    FusionRifle,
    SniperRifle,
    Sidearm,
    MachineGun,
    RocketLauncher,
    Sword,
}

impl WeaponType {
    /// Short archetype nickname used in tables for non-Exotic weapons.
    pub fn nickname(self) -> &'static str {
        match self {
            WeaponType::AutoRifle => "Auto",
            WeaponType::PulseRifle => "Pulse",
            WeaponType::ScoutRifle => "Scout",
            WeaponType::HandCannon => "Handcannon",
            WeaponType::Shotgun => "Shotgun",
            WeaponType::FusionRifle => "Fusion",
            WeaponType::SniperRifle => "Sniper",
            WeaponType::Sidearm => "Sidearm",
            WeaponType::MachineGun => "LMG",
            WeaponType::RocketLauncher => "Rockets",
            WeaponType::Sword => "Sword",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArmorSlot {
    Helmet,
    Gauntlets,
    Chest,
    Legs,
    ClassItem,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Weapon {
    pub id: u32,
    pub name: String,
    pub weapon_type: WeaponType,
    pub category: WeaponCategory,
    pub rarity: Rarity,
}

impl Weapon {
    /// Label rule: Exotics are shown by proper name, everything else by the
    /// archetype nickname.
    pub fn display_label(&self) -> &str {
        if self.rarity == Rarity::Exotic {
            &self.name
        } else {
            self.weapon_type.nickname()
        }
    }
}

impl Ord for Weapon {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.name, self.id).cmp(&(&other.name, other.id))
    }
}

impl PartialOrd for Weapon {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Armor {
    pub id: u32,
    pub name: String,
    pub rarity: Rarity,
    pub slot: ArmorSlot,
}

impl Ord for Armor {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.name, self.id).cmp(&(&other.name, other.id))
    }
}

impl PartialOrd for Armor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of resolving one weapon slot. `Unknown` stands in whenever the
/// catalog has no entry for the slot or no weapon matches the requested
/// role, so accessors stay total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolvedWeapon {
    Resolved(Weapon),
    Unknown,
}

impl ResolvedWeapon {
    pub fn label(&self) -> &str {
        match self {
            ResolvedWeapon::Resolved(weapon) => weapon.display_label(),
            ResolvedWeapon::Unknown => UNKNOWN_WEAPON_NAME,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ResolvedWeapon::Unknown)
    }
}

/// One fully merged leaderboard row: raw match stats plus whatever loadout
/// enrichment succeeded. Built fresh per report, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedRow {
    pub participant: MatchParticipant,
    pub subclass: String,
    pub weapons: Vec<Weapon>,
    pub armors: Vec<Armor>,
}

impl EnrichedRow {
    /// Armor is stable-sorted on construction so the exotic tie-break below
    /// is deterministic.
    pub fn new(
        participant: MatchParticipant,
        subclass: String,
        weapons: Vec<Weapon>,
        mut armors: Vec<Armor>,
    ) -> Self {
        armors.sort();
        Self {
            participant,
            subclass,
            weapons,
            armors,
        }
    }

    /// Row for a participant whose enrichment failed entirely. Still renders.
    pub fn degraded(participant: MatchParticipant) -> Self {
        Self {
            participant,
            subclass: UNKNOWN_SUBCLASS.to_string(),
            weapons: Vec::new(),
            armors: Vec::new(),
        }
    }

    /// First weapon whose category matches the requested role. Role comes
    /// from the category enum, never from list position.
    pub fn weapon_in(&self, category: WeaponCategory) -> ResolvedWeapon {
        self.weapons
            .iter()
            .find(|weapon| weapon.category == category)
            .cloned()
            .map(ResolvedWeapon::Resolved)
            .unwrap_or(ResolvedWeapon::Unknown)
    }

    /// First Exotic armor piece in sort order, if any.
    pub fn exotic_armor(&self) -> Option<&Armor> {
        self.armors.iter().find(|armor| armor.rarity == Rarity::Exotic)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StubKind {
    Weapon,
    Armor,
}

/// Untyped vendor stock entry: just an item id and which catalog it lives in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemStub {
    pub id: u32,
    pub kind: StubKind,
}

/// Tracker profile link for a player. The tracker only serves the xbox-form
/// path; playstation tags hit the same path and get redirected on their side.
pub fn profile_url(name: &str, _platform: PlatformFlag) -> String {
    format!(
        "https://my.destinytracker.com/d1/profile/xbox/{}",
        name.replace(' ', "%20")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn weapon(name: &str, category: WeaponCategory, rarity: Rarity) -> Weapon {
        Weapon {
            id: name.len() as u32,
            name: name.to_string(),
            weapon_type: WeaponType::HandCannon,
            category,
            rarity,
        }
    }

    fn armor(name: &str, rarity: Rarity) -> Armor {
        Armor {
            id: name.len() as u32,
            name: name.to_string(),
            rarity,
            slot: ArmorSlot::Helmet,
        }
    }

    fn participant(name: &str) -> MatchParticipant {
        MatchParticipant {
            id: PlatformPlayerId {
                platform: PlatformFlag::Xbox,
                membership_id: "4611686018428388000".to_string(),
            },
            display_name: name.to_string(),
            rating: 1500,
            kill_death_ratio: 1.0,
        }
    }

    #[test]
    fn player_id_identity_includes_platform() {
        let xbox = PlatformPlayerId {
            platform: PlatformFlag::Xbox,
            membership_id: "12345".to_string(),
        };
        let psn = PlatformPlayerId {
            platform: PlatformFlag::Playstation,
            membership_id: "12345".to_string(),
        };

        assert_ne!(xbox, psn);
        let unique: HashSet<PlatformPlayerId> = [xbox, psn].into_iter().collect();
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn weapon_in_selects_by_category_not_position() {
        let row = EnrichedRow::new(
            participant("Alice"),
            "Gunslinger".to_string(),
            vec![
                weapon("Ice Breaker", WeaponCategory::Special, Rarity::Exotic),
                weapon("The Last Word", WeaponCategory::Primary, Rarity::Exotic),
            ],
            vec![],
        );

        let primary = row.weapon_in(WeaponCategory::Primary);
        assert_eq!(primary.label(), "The Last Word");
    }

    #[test]
    fn weapon_in_falls_back_to_unknown() {
        let row = EnrichedRow::new(
            participant("Alice"),
            "Gunslinger".to_string(),
            vec![weapon("Eyasluna", WeaponCategory::Primary, Rarity::Legendary)],
            vec![],
        );

        let heavy = row.weapon_in(WeaponCategory::Heavy);
        assert!(heavy.is_unknown());
        assert_eq!(heavy.label(), UNKNOWN_WEAPON_NAME);
    }

    #[test]
    fn non_exotic_weapons_label_as_archetype_nickname() {
        let common = weapon("Eyasluna", WeaponCategory::Primary, Rarity::Legendary);
        assert_eq!(common.display_label(), "Handcannon");
    }

    #[test]
    fn exotic_weapons_label_as_proper_name() {
        let exotic = weapon("Hawkmoon", WeaponCategory::Primary, Rarity::Exotic);
        assert_eq!(exotic.display_label(), "Hawkmoon");
    }

    #[test]
    fn exotic_armor_picks_first_in_sort_order() {
        let row = EnrichedRow::new(
            participant("Alice"),
            "Striker".to_string(),
            vec![],
            vec![
                armor("Zealot Helm", Rarity::Legendary),
                armor("The Ram", Rarity::Exotic),
                armor("An Insurmountable Skullfort", Rarity::Exotic),
            ],
        );

        // Sorted by name, "An Insurmountable Skullfort" precedes "The Ram".
        assert_eq!(row.exotic_armor().unwrap().name, "An Insurmountable Skullfort");
    }

    #[test]
    fn exotic_armor_absent_when_no_exotics() {
        let row = EnrichedRow::new(
            participant("Alice"),
            "Striker".to_string(),
            vec![],
            vec![armor("Zealot Helm", Rarity::Legendary)],
        );

        assert!(row.exotic_armor().is_none());
    }

    #[test]
    fn degraded_row_is_total() {
        let row = EnrichedRow::degraded(participant("Ghost"));

        assert_eq!(row.subclass, UNKNOWN_SUBCLASS);
        assert!(row.weapon_in(WeaponCategory::Primary).is_unknown());
        assert!(row.weapon_in(WeaponCategory::Special).is_unknown());
        assert!(row.weapon_in(WeaponCategory::Heavy).is_unknown());
        assert!(row.exotic_armor().is_none());
    }

    #[test]
    fn items_order_by_name_then_id() {
        let mut weapons = vec![
            weapon("Thorn", WeaponCategory::Primary, Rarity::Exotic),
            weapon("Hawkmoon", WeaponCategory::Primary, Rarity::Exotic),
        ];
        weapons.sort();
        assert_eq!(weapons[0].name, "Hawkmoon");
    }

    #[test]
    fn catalog_items_deserialize_from_manifest_form() {
        let weapon: Weapon = serde_json::from_value(serde_json::json!({
            "id": 2809120022u32,
            "name": "The Last Word",
            "weapon_type": "hand_cannon",
            "category": "primary",
            "rarity": "exotic"
        }))
        .unwrap();
        assert_eq!(weapon.display_label(), "The Last Word");

        let armor: Armor = serde_json::from_value(serde_json::json!({
            "id": 2672107540u32,
            "name": "The Ram",
            "rarity": "exotic",
            "slot": "helmet"
        }))
        .unwrap();
        assert_eq!(armor.slot, ArmorSlot::Helmet);
    }

    #[test]
    fn profile_url_uses_xbox_form_for_all_platforms() {
        let url = profile_url("Gun Slinger", PlatformFlag::Playstation);
        assert_eq!(
            url,
            "https://my.destinytracker.com/d1/profile/xbox/Gun%20Slinger"
        );
    }
}
