//! Fresh-identifier minting for the renaming pass.

use crate::config::{NamingScheme, RenamingMode};
use std::collections::HashSet;
use umbra_core::Rand;

/// Glyphs that render near-identically in most editor fonts.
const CONFUSABLE: &[char] = &['l', 'I', '1', 'i', '|'];
/// Zero-width code points U+200B..U+200F.
const INVISIBLE: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{200E}', '\u{200F}'];

/// The set of names a scope already uses. Callers register every accepted
/// name so later draws cannot re-collide.
#[derive(Debug, Clone, Default)]
pub struct NameScope {
    used: HashSet<String>,
}

impl NameScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    pub fn register(&mut self, name: impl Into<String>) {
        self.used.insert(name.into());
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for NameScope {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            used: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// What kind of member a name is minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Type,
    Method,
    Field,
    Property,
    Event,
}

/// Mints identifiers under a scheme and intensity. One draw from the random
/// source; a counter suffix escapes collisions.
#[derive(Debug)]
pub struct NameAllocator {
    scheme: NamingScheme,
    mode: RenamingMode,
    counter: u64,
}

impl NameAllocator {
    pub fn new(scheme: NamingScheme, mode: RenamingMode) -> Self {
        Self {
            scheme,
            mode,
            counter: 0,
        }
    }

    /// Returns a name distinct from everything in `scope` and registers it
    /// there.
    pub fn mint(&mut self, rand: &mut Rand, scope: &mut NameScope, _kind: NameKind) -> String {
        let candidate = self.draw(rand);
        let name = if scope.contains(&candidate) {
            loop {
                self.counter += 1;
                let suffixed = format!("{candidate}{}", self.counter);
                if !scope.contains(&suffixed) {
                    break suffixed;
                }
            }
        } else {
            candidate
        };
        scope.register(name.clone());
        name
    }

    fn draw(&self, rand: &mut Rand) -> String {
        let len = self.draw_length(rand);
        match self.scheme {
            NamingScheme::Alphanumeric => rand.next_string(len),
            NamingScheme::Confusable => {
                let mut out = String::with_capacity(len);
                for i in 0..len {
                    // First char must stay a letter for identifier validity.
                    let pool: &[char] = if i == 0 { &['l', 'I', 'i'] } else { CONFUSABLE };
                    out.push(pool[rand.next_int(0, pool.len() as i64) as usize]);
                }
                out
            }
            NamingScheme::Invisible => {
                let mut out = String::with_capacity(len * 3 + 1);
                out.push('_');
                for _ in 0..len {
                    out.push(INVISIBLE[rand.next_int(0, INVISIBLE.len() as i64) as usize]);
                }
                out
            }
            NamingScheme::Simple => {
                let mut out = String::with_capacity(len);
                for _ in 0..len {
                    out.push((b'a' + rand.next_int(0, 26) as u8) as char);
                }
                out
            }
        }
    }

    fn draw_length(&self, rand: &mut Rand) -> usize {
        let (min, max) = match self.mode {
            // `None` callers never reach minting; keep a sane range anyway.
            RenamingMode::None | RenamingMode::Light => (4, 10),
            RenamingMode::Normal => (6, 16),
            RenamingMode::Aggressive => (8, 25),
        };
        rand.next_int(min, max) as usize
    }
}
