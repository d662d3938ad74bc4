//! Random execution-name generation.

use rand::seq::SliceRandom;

const DESCRIPTORS: &[&str] = &[
    "amber", "billowing", "brave", "calm", "cheerful", "crimson", "dapper", "dawn", "eager",
    "fancy", "frosty", "gentle", "gilded", "humble", "icy", "jolly", "keen", "limber", "misty",
    "nifty", "patient", "plucky", "quiet", "rustic", "snowy", "spry", "stoic", "tidal", "velvet",
    "wobbly",
];

const ANIMALS: &[&str] = &[
    "albatross", "badger", "bison", "cormorant", "crane", "dingo", "egret", "ferret", "gannet",
    "heron", "ibis", "jackdaw", "kestrel", "lemur", "magpie", "marmot", "narwhal", "ocelot",
    "osprey", "pangolin", "quokka", "raven", "seal", "stoat", "tapir", "urchin", "vole",
    "wallaby", "wombat", "yak",
];

/// A random `descriptor-animal` pair, unique enough to disambiguate the
/// containers and scratch directories of concurrent runs.
pub(crate) fn name() -> String {
    let mut rng = rand::thread_rng();
    let descriptor = DESCRIPTORS.choose(&mut rng).copied().unwrap_or("brave");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("heron");
    format!("{descriptor}-{animal}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_a_two_word_kebab_pair() {
        let name = name();
        let parts: Vec<&str> = name.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(DESCRIPTORS.contains(&parts[0]));
        assert!(ANIMALS.contains(&parts[1]));
    }

    #[test]
    fn names_vary() {
        let names: std::collections::HashSet<String> = (0..64).map(|_| name()).collect();
        assert!(names.len() > 1);
    }
}
