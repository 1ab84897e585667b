//! Memorable passphrases drawn from a fixed 7776-entry dice wordlist.

use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, TiplineError};

pub const WORDLIST_LEN: usize = 7776;
pub const DEFAULT_WORDS: usize = 3;

const WORDLIST_RAW: &str = include_str!("../data/wordlist.txt");

/// A normalized passphrase. Equality is on the normalized text.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(text: &str) -> Self {
        Self(normalize(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.split_whitespace()
    }
}

impl From<&str> for Passphrase {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// Trim surrounding whitespace and lower-case.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

pub fn passphrases_match(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

struct Wordlist {
    words: Vec<&'static str>,
    index: HashSet<&'static str>,
}

fn wordlist() -> &'static Wordlist {
    static WORDLIST: OnceLock<Wordlist> = OnceLock::new();
    WORDLIST.get_or_init(|| {
        // lines are "<dice digits>\t<word>"
        let words: Vec<&'static str> = WORDLIST_RAW
            .lines()
            .filter_map(|line| line.split('\t').nth(1))
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .collect();
        let index = words.iter().copied().collect();
        Wordlist { words, index }
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PassphraseGenerator;

impl PassphraseGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn wordlist_len(&self) -> usize {
        wordlist().words.len()
    }

    /// Draws `n_words` words uniformly with the OS CSPRNG.
    pub fn generate(&self, n_words: usize) -> Result<Passphrase> {
        if n_words < 1 {
            return Err(TiplineError::InvalidInput("n_words must be >= 1".into()));
        }
        let list = &wordlist().words;
        let mut rng = OsRng;
        let words: Vec<&str> = (0..n_words)
            .map(|_| list[rng.gen_range(0..list.len())])
            .collect();
        Ok(Passphrase::new(&words.join(" ")))
    }

    pub fn generate_default(&self) -> Result<Passphrase> {
        self.generate(DEFAULT_WORDS)
    }

    /// True iff every token could have come from [`generate`](Self::generate).
    /// Catches typos; says nothing about whether the phrase is "the real one".
    pub fn is_valid(&self, text: &str) -> bool {
        let normalized = normalize(text);
        let index = &wordlist().index;
        let mut tokens = normalized.split_whitespace().peekable();
        if tokens.peek().is_none() {
            return false;
        }
        tokens.all(|token| index.contains(token))
    }
}
