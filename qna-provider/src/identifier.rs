use std::sync::Mutex;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::entry::Entry;

const ID_ALPHABET: &[u8] = b"1234567890abcdefghijklmnopqrstuvwxyz";
pub const ID_PREFIX_LENGTH: usize = 10;
const SLUG_MAX_LENGTH: usize = 50;
const SEPARATOR: char = '_';

/// Produces entry ids of the form `<random prefix>_<slug of first question>`.
///
/// The random prefix carries the uniqueness; the slug is only there so the
/// ids stay readable in file listings.
pub struct IdGenerator {
    rng: Mutex<StdRng>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator, same seed gives the same id sequence.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn generate(&self, entry: &Entry) -> String {
        let question = entry.questions.first().map_or("", String::as_str);
        format!("{}{SEPARATOR}{}", self.random_prefix(), slugify(question))
    }

    fn random_prefix(&self) -> String {
        // A poisoned lock still holds a usable rng.
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        (0..ID_PREFIX_LENGTH)
            .map(|_| {
                let index = rng.gen_range(0..ID_ALPHABET.len());
                ID_ALPHABET.get(index).map_or('0', |b| char::from(*b))
            })
            .collect()
    }
}

/// Lower-cased ascii alphanumerics, every other run collapsed to `_`,
/// trimmed and cut to 50 characters.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with(SEPARATOR) {
            slug.push(SEPARATOR);
        }
    }

    let trimmed: String = slug
        .trim_matches(SEPARATOR)
        .chars()
        .take(SLUG_MAX_LENGTH)
        .collect();
    trimmed.trim_end_matches(SEPARATOR).to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn entry(question: &str) -> Entry {
        Entry::new(vec![question.to_string()], "answer")
    }

    #[test]
    fn slug_collapses_symbol_runs() {
        assert_eq!(slugify("  What's your NAME?!  "), "what_s_your_name");
        assert_eq!(slugify("a---b   c"), "a_b_c");
        assert_eq!(slugify("Crème brûlée"), "cr_me_br_l_e");
    }

    #[test]
    fn slug_may_be_empty() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("?!?"), "");
    }

    #[test]
    fn slug_is_truncated_then_retrimmed() {
        let question = format!("{} tail", "x".repeat(49));
        let slug = slugify(&question);
        // 49 x's plus the separator hit the limit, the separator is dropped again
        assert_eq!(slug, "x".repeat(49));

        let long = "word ".repeat(30);
        assert!(slugify(&long).len() <= SLUG_MAX_LENGTH);
        assert!(!slugify(&long).ends_with(SEPARATOR));
    }

    #[test]
    fn id_has_prefix_and_slug() {
        let ids = IdGenerator::new();
        let id = ids.generate(&entry("How do I reset my password?"));

        let (prefix, slug) = id.split_at(ID_PREFIX_LENGTH);
        assert!(prefix.bytes().all(|b| ID_ALPHABET.contains(&b)));
        assert_eq!(slug, "_how_do_i_reset_my_password");
    }

    #[test]
    fn entry_without_questions_gets_bare_prefix() {
        let ids = IdGenerator::new();
        let id = ids.generate(&Entry::default());
        assert_eq!(id.len(), ID_PREFIX_LENGTH + 1);
        assert!(id.ends_with(SEPARATOR));
    }

    #[test]
    fn seeded_generators_are_deterministic() {
        let first = IdGenerator::seeded(42);
        let second = IdGenerator::seeded(42);
        let question = entry("same question");

        for _ in 0..5 {
            assert_eq!(first.generate(&question), second.generate(&question));
        }
        assert_ne!(
            IdGenerator::seeded(1).generate(&question),
            IdGenerator::seeded(2).generate(&question)
        );
    }

    #[test]
    fn ten_thousand_ids_do_not_collide() {
        // 36^10 prefixes: a collision among 10k draws has probability ~1e-8
        let ids = IdGenerator::new();
        let questions = ["hello", "", "What is the refund policy?", "???"];
        let mut seen = HashSet::new();

        for i in 0..10_000 {
            let question = questions.get(i % questions.len()).copied().unwrap_or("");
            assert!(seen.insert(ids.generate(&entry(question))));
        }
        assert_eq!(seen.len(), 10_000);
    }
}
