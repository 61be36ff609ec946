//! Label change resolution
//!
//! Turns the raw `add_label_ids`/`remove_label_ids` lists and the convenience
//! flags of a tool request into a conflict-free [`LabelDelta`]. A label that
//! is requested both ways ends up in neither list, so the message keeps
//! whatever state it had for that label.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// System label present on unread messages
pub const UNREAD: &str = "UNREAD";
/// System label present on starred messages
pub const STARRED: &str = "STARRED";
/// System label present on messages marked important
pub const IMPORTANT: &str = "IMPORTANT";
/// System label present on messages shown in the inbox
pub const INBOX: &str = "INBOX";
/// Quarantine label for spam
pub const SPAM: &str = "SPAM";
/// Quarantine label for trashed messages
pub const TRASH: &str = "TRASH";

/// Requested label changes as supplied by the caller
///
/// Shared by the single-message and batch update tools. Every field is
/// optional; absent lists are empty and absent flags are `false`.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LabelChanges {
    /// Label IDs to add (e.g., `STARRED`, `Label_123`)
    pub add_label_ids: Option<Vec<String>>,
    /// Label IDs to remove
    pub remove_label_ids: Option<Vec<String>>,
    /// Remove `UNREAD`
    pub mark_as_read: bool,
    /// Add `UNREAD`
    pub mark_as_unread: bool,
    /// Add `STARRED`
    pub star: bool,
    /// Remove `STARRED`
    pub unstar: bool,
    /// Add `IMPORTANT`
    pub mark_as_important: bool,
    /// Remove `IMPORTANT`
    pub mark_as_not_important: bool,
    /// Remove `INBOX`
    pub archive: bool,
    /// Add `INBOX`
    pub unarchive: bool,
}

impl LabelChanges {
    /// Raw add list: explicit IDs followed by flag-derived labels, in order
    pub fn raw_add(&self) -> Vec<String> {
        let mut out = self.add_label_ids.clone().unwrap_or_default();
        for (enabled, label) in [
            (self.mark_as_unread, UNREAD),
            (self.star, STARRED),
            (self.mark_as_important, IMPORTANT),
            (self.unarchive, INBOX),
        ] {
            if enabled {
                out.push(label.to_owned());
            }
        }
        out
    }

    /// Raw remove list: explicit IDs followed by flag-derived labels, in order
    pub fn raw_remove(&self) -> Vec<String> {
        let mut out = self.remove_label_ids.clone().unwrap_or_default();
        for (enabled, label) in [
            (self.mark_as_read, UNREAD),
            (self.unstar, STARRED),
            (self.mark_as_not_important, IMPORTANT),
            (self.archive, INBOX),
        ] {
            if enabled {
                out.push(label.to_owned());
            }
        }
        out
    }

    /// Resolve into a conflict-free delta
    pub fn resolve(&self) -> LabelDelta {
        LabelDelta::resolve(self.raw_add(), self.raw_remove())
    }
}

/// Net label change to apply to a message
///
/// Both lists are duplicate-free and keep first-seen order. `add` and
/// `remove` never share a label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LabelDelta {
    /// Labels to add
    pub add: Vec<String>,
    /// Labels to remove
    pub remove: Vec<String>,
}

impl LabelDelta {
    /// Build a delta from raw lists
    ///
    /// Each list is deduplicated independently, then any label present in
    /// both is removed from both.
    pub fn resolve(add: Vec<String>, remove: Vec<String>) -> Self {
        let add = dedup_preserving_order(add);
        let remove = dedup_preserving_order(remove);
        let final_add = add
            .iter()
            .filter(|label| !remove.contains(label))
            .cloned()
            .collect();
        let final_remove = remove
            .iter()
            .filter(|label| !add.contains(label))
            .cloned()
            .collect();
        Self {
            add: final_add,
            remove: final_remove,
        }
    }

    /// Whether applying this delta would change nothing
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Whether the delta adds or removes `label`
    pub fn touches(&self, label: &str) -> bool {
        self.add.iter().any(|l| l == label) || self.remove.iter().any(|l| l == label)
    }

    /// Whether a message carrying `labels` already reflects this delta
    pub fn is_satisfied_by(&self, labels: &[String]) -> bool {
        self.add.iter().all(|l| labels.contains(l))
            && !self.remove.iter().any(|l| labels.contains(l))
    }
}

fn dedup_preserving_order(labels: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        if !out.contains(&label) {
            out.push(label);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{LabelChanges, LabelDelta};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn mark_as_read_alone_removes_unread() {
        let delta = LabelChanges {
            mark_as_read: true,
            ..Default::default()
        }
        .resolve();
        assert!(delta.add.is_empty());
        assert_eq!(delta.remove, strings(&["UNREAD"]));
    }

    #[test]
    fn label_in_both_lists_ends_up_in_neither() {
        let delta = LabelDelta::resolve(strings(&["STARRED"]), strings(&["STARRED"]));
        assert!(delta.add.is_empty());
        assert!(delta.remove.is_empty());
        assert!(delta.is_empty());
    }

    #[test]
    fn contradictory_flags_cancel_out() {
        let delta = LabelChanges {
            star: true,
            unstar: true,
            archive: true,
            ..Default::default()
        }
        .resolve();
        assert!(delta.add.is_empty());
        assert_eq!(delta.remove, strings(&["INBOX"]));
    }

    #[test]
    fn flags_append_after_explicit_ids_and_duplicates_collapse() {
        let changes = LabelChanges {
            add_label_ids: Some(strings(&["Label_1", "STARRED", "Label_1"])),
            star: true,
            mark_as_important: true,
            ..Default::default()
        };
        assert_eq!(
            changes.raw_add(),
            strings(&["Label_1", "STARRED", "Label_1", "STARRED", "IMPORTANT"])
        );
        let delta = changes.resolve();
        assert_eq!(delta.add, strings(&["Label_1", "STARRED", "IMPORTANT"]));
    }

    #[test]
    fn resolved_sets_are_always_disjoint() {
        let pool = ["A", "B", "C", "UNREAD", "INBOX"];
        for mask_add in 0u32..32 {
            for mask_remove in 0u32..32 {
                let pick = |mask: u32| {
                    pool.iter()
                        .enumerate()
                        .filter(|(i, _)| mask & (1 << i) != 0)
                        .map(|(_, s)| (*s).to_owned())
                        .collect::<Vec<_>>()
                };
                let delta = LabelDelta::resolve(pick(mask_add), pick(mask_remove));
                assert!(delta.add.iter().all(|l| !delta.remove.contains(l)));
            }
        }
    }

    #[test]
    fn satisfaction_requires_added_present_and_removed_absent() {
        let delta = LabelDelta::resolve(strings(&["STARRED"]), strings(&["UNREAD"]));
        assert!(delta.is_satisfied_by(&strings(&["INBOX", "STARRED"])));
        assert!(!delta.is_satisfied_by(&strings(&["INBOX"])));
        assert!(!delta.is_satisfied_by(&strings(&["STARRED", "UNREAD"])));
        assert!(delta.touches("UNREAD"));
        assert!(!delta.touches("INBOX"));
    }
}
