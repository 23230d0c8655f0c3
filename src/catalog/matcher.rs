//! Case-insensitive item-to-label matching with a synonym table.
//!
//! Detector labels rarely match catalog item names exactly ("cell phone" vs
//! "phone", "gloves" vs "glove").  [`ItemMatcher`] treats an item as present
//! when one of its variants appears in a detected label as whole words, or
//! the label names the head noun of a variant ("knife" for "chef knife").
//! A plural `s`/`es` is tolerated on either side.  Modifiers alone never
//! match: "hand" is not "hand soap", "raw" is not "raw chicken".

use std::collections::HashMap;

use crate::signals::DetectedObject;

// ---------------------------------------------------------------------------
// Built-in synonyms
// ---------------------------------------------------------------------------

static DEFAULT_SYNONYMS: &[(&str, &[&str])] = &[
    ("reader", &["card reader", "badge reader", "scanner", "tablet"]),
    ("phone", &["cell phone", "mobile phone", "smartphone"]),
    ("gloves", &["glove"]),
    ("knife", &["knives", "blade"]),
    ("cutting board", &["chopping board", "board"]),
    ("raw chicken", &["chicken", "poultry"]),
    ("hand sanitizer", &["sanitizer", "sanitiser"]),
    ("soap", &["soap dispenser", "hand soap"]),
    ("laptop", &["notebook", "computer"]),
    ("cup", &["mug", "glass"]),
];

// ---------------------------------------------------------------------------
// ItemMatcher
// ---------------------------------------------------------------------------

/// Maps canonical item names to accepted label variants.
///
/// # Example
/// ```rust
/// use live_coach::catalog::ItemMatcher;
///
/// let matcher = ItemMatcher::with_defaults();
/// assert!(matcher.matches("phone", "Cell Phone"));
/// assert!(!matcher.matches("phone", "bottle"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ItemMatcher {
    synonyms: HashMap<String, Vec<String>>,
}

impl ItemMatcher {
    /// Matcher with no synonyms; only the item name itself is accepted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Matcher seeded with the built-in synonym table.
    pub fn with_defaults() -> Self {
        let mut matcher = Self::new();
        for (item, variants) in DEFAULT_SYNONYMS {
            matcher.add_synonyms(item, variants.iter().map(|v| v.to_string()));
        }
        matcher
    }

    /// Register additional label variants for `item`.
    pub fn add_synonyms<I>(&mut self, item: &str, variants: I)
    where
        I: IntoIterator<Item = String>,
    {
        let entry = self.synonyms.entry(normalize(item)).or_default();
        for variant in variants {
            let variant = normalize(&variant);
            if !variant.is_empty() && !entry.contains(&variant) {
                entry.push(variant);
            }
        }
    }

    /// `true` when `label` is an acceptable detection of `item`.
    pub fn matches(&self, item: &str, label: &str) -> bool {
        let item = normalize(item);
        let label = normalize(label);
        if item.is_empty() || label.is_empty() {
            return false;
        }

        std::iter::once(&item)
            .chain(self.synonyms.get(&item).into_iter().flatten())
            .any(|variant| contains_words(&label, variant) || names_head(variant, &label))
    }

    /// `true` when any object in the snapshot matches `item`.
    pub fn is_detected(&self, item: &str, detections: &[DetectedObject]) -> bool {
        detections.iter().any(|d| self.matches(item, &d.label))
    }

    /// First item of `items` that is present in the snapshot.
    pub fn first_detected<'a>(
        &self,
        items: &'a [String],
        detections: &[DetectedObject],
    ) -> Option<&'a String> {
        items.iter().find(|item| self.is_detected(item, detections))
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// `true` when `needle` occurs in `haystack` on word boundaries, allowing a
/// plural suffix after it.
fn contains_words(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(at, _)| {
        let before_ok = haystack[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after = &haystack[at + needle.len()..];
        let plural = after.strip_prefix("es").or_else(|| after.strip_prefix('s'));
        before_ok && (at_word_end(after) || plural.is_some_and(at_word_end))
    })
}

fn at_word_end(rest: &str) -> bool {
    rest.chars().next().map_or(true, |c| !c.is_alphanumeric())
}

/// `true` when `label` is the last word of `variant`, or its singular.
fn names_head(variant: &str, label: &str) -> bool {
    let Some(head) = variant.split_whitespace().next_back() else {
        return false;
    };
    head == label
        || head.strip_suffix('s') == Some(label)
        || head.strip_suffix("es") == Some(label)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
