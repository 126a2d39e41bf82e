//! Item, block and entity name predicates.
//!
//! The world reports plain resource names (`"oak_log"`, `"cooked_beef"`,
//! `"zombie"`).  These helpers classify them so that the objective tracker
//! and the safety rules never match on raw strings themselves.

/// Block name of the crafting table.
pub const CRAFTING_TABLE: &str = "crafting_table";

/// The basic wooden tool set the crafting objective works towards, in the
/// order the tools are crafted.
pub const WOODEN_TOOLS: [&str; 4] = [
    "wooden_pickaxe",
    "wooden_axe",
    "wooden_shovel",
    "wooden_sword",
];

/// Mob names treated as hostile even when the world does not tag them.
pub const HOSTILE_NAMES: [&str; 6] = [
    "zombie", "skeleton", "creeper", "spider", "drowned", "enderman",
];

/// Passive animals the hunting objective may target.
pub const HUNTABLE_ANIMALS: [&str; 4] = ["pig", "cow", "chicken", "sheep"];

const EDIBLE_MARKERS: [&str; 15] = [
    "porkchop",
    "beef",
    "chicken",
    "mutton",
    "rabbit",
    "cod",
    "salmon",
    "potato",
    "carrot",
    "bread",
    "apple",
    "melon_slice",
    "sweet_berries",
    "dried_kelp",
    "cooked_",
];

const USELESS_DROP_MARKERS: [&str; 3] = ["dirt", "cobweb", "tripwire_hook"];

const USEFUL_DROP_MARKERS: [&str; 24] = [
    "log",
    "planks",
    "stick",
    "sapling",
    "porkchop",
    "beef",
    "chicken",
    "mutton",
    "rabbit",
    "cod",
    "salmon",
    "apple",
    "bread",
    "carrot",
    "potato",
    "wheat",
    "seeds",
    "coal",
    "stone",
    "iron",
    "axe",
    "pickaxe",
    "sword",
    "crafting_table",
];

/// `true` for any log block (`oak_log`, `birch_log`, …).
pub fn is_wood_block(name: &str) -> bool {
    name.ends_with("_log")
}

/// `true` for any plank item (`oak_planks`, …).
pub fn is_planks(name: &str) -> bool {
    name.ends_with("_planks")
}

/// Blocks the agent may always break: logs, melons and pumpkins.
pub fn is_safe_harvest_block(name: &str) -> bool {
    is_wood_block(name) || name == "melon" || name == "pumpkin"
}

/// `true` for food items the agent knows how to eat.
pub fn is_edible(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    EDIBLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// `true` when a dropped item is worth walking over to pick up.
///
/// Unnamed drops are collected; the world may not know what they are yet.
pub fn is_useful_drop(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower.is_empty() {
        return true;
    }
    if USELESS_DROP_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    USEFUL_DROP_MARKERS.iter().any(|m| lower.contains(m))
}

/// `true` when `name` is a well-known hostile mob.
pub fn is_hostile_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOSTILE_NAMES.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_are_wood_and_safe_to_harvest() {
        assert!(is_wood_block("oak_log"));
        assert!(is_safe_harvest_block("spruce_log"));
        assert!(is_safe_harvest_block("pumpkin"));
        assert!(!is_safe_harvest_block("stone"));
        assert!(!is_wood_block("oak_planks"));
    }

    #[test]
    fn edible_detection_covers_raw_and_cooked_food() {
        assert!(is_edible("cooked_beef"));
        assert!(is_edible("porkchop"));
        assert!(is_edible("bread"));
        assert!(!is_edible("stick"));
    }

    #[test]
    fn dirt_drops_are_ignored() {
        assert!(!is_useful_drop("dirt"));
        assert!(is_useful_drop("oak_log"));
        assert!(is_useful_drop(""));
        assert!(!is_useful_drop("rotten_flesh"));
    }

    #[test]
    fn hostile_names_are_case_insensitive() {
        assert!(is_hostile_name("Zombie"));
        assert!(!is_hostile_name("pig"));
    }
}
