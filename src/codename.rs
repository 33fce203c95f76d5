//! Human-friendly random names, used for the server identity and for
//! naming merged assets.

use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "amber", "ancient", "bold", "brisk", "calm", "crimson", "dusty", "eager", "fading",
    "fuzzy", "gentle", "golden", "hollow", "icy", "jolly", "lively", "lunar", "mellow",
    "misty", "noble", "odd", "pale", "quiet", "rapid", "rusty", "silent", "snowy",
    "solar", "steady", "swift", "tidal", "velvet", "wild", "windy", "young", "zesty",
];

const NOUNS: &[&str] = &[
    "anvil", "badger", "breeze", "canyon", "cedar", "comet", "coyote", "delta", "ember",
    "falcon", "fjord", "gecko", "glacier", "harbor", "heron", "island", "lagoon", "lynx",
    "meadow", "meteor", "otter", "pebble", "pine", "quartz", "raven", "reef", "river",
    "saddle", "sparrow", "summit", "thicket", "tundra", "valley", "walrus", "willow", "zephyr",
];

/// Generate an `adjective-noun` codename.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    // Both lists are non-empty constants.
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("plain");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("sample");
    format!("{adjective}-{noun}")
}
