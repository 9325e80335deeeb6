//! Human-readable session tokens and the challenge/response primitive
//! that proves both ends hold the same token without putting it on
//! the wire.

use rand::seq::SliceRandom;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

const WORDS: &[&str] = &[
    "ocean", "forest", "mountain", "river", "desert", "valley", "island", "canyon", "tiger",
    "eagle", "dolphin", "wolf", "bear", "fox", "owl", "shark", "piano", "guitar", "violin",
    "drums", "flute", "trumpet", "harp", "saxophone", "ruby", "emerald", "diamond", "sapphire",
    "pearl", "crystal", "amber", "jade", "storm", "thunder", "lightning", "rainbow", "sunset",
    "sunrise", "aurora", "comet", "castle", "bridge", "tower", "garden", "temple", "palace",
    "fortress", "lighthouse", "voyage", "quest", "journey", "adventure", "discovery",
    "expedition", "exploration", "mission", "wisdom", "courage", "honor", "justice", "freedom",
    "peace", "harmony", "unity", "crimson", "azure", "golden", "silver", "violet", "scarlet",
    "indigo", "mystic", "ancient", "eternal", "infinite", "divine", "sacred", "blessed", "noble",
    "warrior", "guardian", "sentinel", "champion", "defender", "protector", "knight", "hero",
    "phoenix", "dragon", "griffin", "unicorn", "pegasus", "sphinx", "chimera", "hydra",
    "whisper", "echo", "melody", "rhythm", "symphony", "chorus", "ballad", "summit", "peak",
    "cliff", "ridge", "slope", "plateau", "gorge", "ravine", "stream", "brook", "creek",
    "waterfall", "rapid", "cascade", "spring", "pond", "meadow", "prairie", "field", "grove",
    "thicket", "woodland", "clearing", "glade", "dawn", "dusk", "twilight", "midnight",
    "moonlight", "starlight", "daybreak", "nightfall", "breeze", "gale", "hurricane", "tornado",
    "cyclone", "tempest", "blizzard", "typhoon", "ember", "flame", "spark", "blaze", "inferno",
    "pyre", "beacon", "torch", "frost", "ice", "snow", "hail", "glacier", "icicle", "winter",
    "bloom", "blossom", "petal", "nectar", "pollen", "fragrance", "bouquet", "garland", "orbit",
    "galaxy", "nebula", "constellation", "planet", "asteroid", "meteor", "cosmos", "treasure",
    "fortune", "riches", "bounty", "prize", "reward", "jewel", "crown", "legend", "myth",
    "tale", "saga", "epic", "chronicle", "story", "fable", "magic", "spell", "charm",
    "enchantment", "sorcery", "wizardry", "alchemy", "potion",
];

/// Generate a two-word session token using a CSPRNG.
pub fn generate_token<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let a = WORDS.choose(rng).expect("wordlist is non-empty");
    let b = WORDS.choose(rng).expect("wordlist is non-empty");
    format!("{a}-{b}")
}

/// `SHA256(challenge || token)`, the pre-image proving token possession.
#[must_use]
pub fn expected_response(challenge: &[u8; 32], token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn token_has_two_words() {
        let token = generate_token(&mut OsRng);
        let parts: Vec<&str> = token.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(WORDS.contains(&parts[0]));
        assert!(WORDS.contains(&parts[1]));
    }

    #[test]
    fn response_matches_python_reference_shape() {
        let challenge = [0u8; 32];
        let resp = expected_response(&challenge, "ocean-forest");
        let mut hasher = Sha256::new();
        hasher.update(challenge);
        hasher.update(b"ocean-forest");
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(resp, expected);
    }

    #[test]
    fn different_token_gives_different_response() {
        let challenge = [7u8; 32];
        assert_ne!(
            expected_response(&challenge, "a-b"),
            expected_response(&challenge, "a-c")
        );
    }
}
