//! Redaction primitives: obscure artwork, replace text, hide blocks, and
//! reverse all of it for reveal
//!
//! Every redacted element records what was applied in
//! [`REDACTION_ATTR`] so a reveal can be undone by re-applying exactly the
//! same redactions.

use crate::config::ArtworkPolicy;
use crate::constants::{host, marker};
use crate::dom::{Document, NodeId};

/// Space-separated list of redactions applied to an element
pub const REDACTION_ATTR: &str = "data-spoiler-redaction";

/// Safe label shown while text is redacted
const LABEL_ATTR: &str = "data-spoiler-label";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Blur,
    Generic,
    Text,
    Hidden,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Blur => "blur",
            Kind::Generic => "generic",
            Kind::Text => "text",
            Kind::Hidden => "hidden",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "blur" => Some(Kind::Blur),
            "generic" => Some(Kind::Generic),
            "text" => Some(Kind::Text),
            "hidden" => Some(Kind::Hidden),
            _ => None,
        }
    }

    fn class(&self) -> &'static str {
        match self {
            Kind::Blur => marker::BLUR_CLASS,
            Kind::Generic => marker::GENERIC_CLASS,
            Kind::Text => marker::TEXT_CLASS,
            Kind::Hidden => marker::HIDDEN_CLASS,
        }
    }
}

fn kinds(doc: &Document, node: NodeId) -> Vec<Kind> {
    doc.attr(node, REDACTION_ATTR)
        .map(|v| v.split_whitespace().filter_map(Kind::parse).collect())
        .unwrap_or_default()
}

fn record(doc: &mut Document, node: NodeId, kind: Kind) {
    let mut current = kinds(doc, node);
    if !current.contains(&kind) {
        current.push(kind);
    }
    let value = current.iter().map(Kind::as_str).collect::<Vec<_>>().join(" ");
    doc.set_attr(node, REDACTION_ATTR, &value);
    doc.add_class(node, marker::REVEALABLE_CLASS);
}

fn apply(doc: &mut Document, node: NodeId, kind: Kind) {
    doc.add_class(node, kind.class());
    if kind == Kind::Text
        && let Some(label) = doc.attr(node, LABEL_ATTR).map(str::to_string)
    {
        doc.set_text(node, &label);
    }
}

fn restore_text(doc: &mut Document, node: NodeId) {
    if kinds(doc, node).contains(&Kind::Text) {
        let original = doc.attr(node, marker::ORIGINAL_TEXT_ATTR).unwrap_or("").to_string();
        doc.set_text(node, &original);
    }
}

/// Obscure artwork per policy. Returns true when something was applied.
pub fn redact_artwork(doc: &mut Document, node: NodeId, policy: ArtworkPolicy) -> bool {
    let kind = match policy {
        ArtworkPolicy::Blur => Kind::Blur,
        ArtworkPolicy::Generic => Kind::Generic,
        ArtworkPolicy::None => return false,
    };
    if doc.has_class(node, kind.class()) || doc.has_class(node, marker::REVEALED_CLASS) {
        return false;
    }
    record(doc, node, kind);
    apply(doc, node, kind);
    true
}

/// Replace the element's text with `label`, keeping the original for reveal
pub fn replace_text(doc: &mut Document, node: NodeId, label: &str) -> bool {
    if doc.has_class(node, marker::REVEALED_CLASS) {
        return false;
    }
    if !kinds(doc, node).contains(&Kind::Text) {
        let original = doc.text(node).to_string();
        doc.set_attr(node, marker::ORIGINAL_TEXT_ATTR, &original);
    }
    let changed = doc.text(node) != label;
    doc.set_attr(node, LABEL_ATTR, label);
    record(doc, node, Kind::Text);
    apply(doc, node, Kind::Text);
    changed
}

/// Hide a whole block (overview, guest stars, metadata)
pub fn hide_block(doc: &mut Document, node: NodeId) -> bool {
    if doc.has_class(node, marker::HIDDEN_CLASS) || doc.has_class(node, marker::REVEALED_CLASS) {
        return false;
    }
    record(doc, node, Kind::Hidden);
    apply(doc, node, Kind::Hidden);
    true
}

pub fn is_redacted(doc: &Document, node: NodeId) -> bool {
    !kinds(doc, node).is_empty()
}

/// Redacted elements at or under `scope`
pub fn redacted_nodes(doc: &Document, scope: NodeId) -> Vec<NodeId> {
    std::iter::once(scope)
        .chain(doc.descendants(scope))
        .filter(|n| is_redacted(doc, *n))
        .collect()
}

/// Temporarily lift every redaction at or under `scope`. The record stays
/// so [`rehide`] can restore it.
pub fn reveal(doc: &mut Document, scope: NodeId) -> usize {
    let nodes = redacted_nodes(doc, scope);
    for node in &nodes {
        for kind in kinds(doc, *node) {
            doc.remove_class(*node, kind.class());
        }
        restore_text(doc, *node);
        doc.add_class(*node, marker::REVEALED_CLASS);
    }
    nodes.len()
}

/// Re-apply redactions lifted by [`reveal`]
pub fn rehide(doc: &mut Document, scope: NodeId) -> usize {
    let nodes: Vec<NodeId> = redacted_nodes(doc, scope)
        .into_iter()
        .filter(|n| doc.has_class(*n, marker::REVEALED_CLASS))
        .collect();
    for node in &nodes {
        doc.remove_class(*node, marker::REVEALED_CLASS);
        for kind in kinds(doc, *node) {
            apply(doc, *node, kind);
        }
    }
    nodes.len()
}

/// Remove every redaction at or under `scope` for good
pub fn clear(doc: &mut Document, scope: NodeId) -> usize {
    let nodes = redacted_nodes(doc, scope);
    for node in &nodes {
        for kind in kinds(doc, *node) {
            doc.remove_class(*node, kind.class());
        }
        restore_text(doc, *node);
        for attr in [REDACTION_ATTR, LABEL_ATTR, marker::ORIGINAL_TEXT_ATTR] {
            doc.remove_attr(*node, attr);
        }
        doc.remove_class(*node, marker::REVEALABLE_CLASS);
        doc.remove_class(*node, marker::REVEALED_CLASS);
    }
    nodes.len()
}

/// Artwork element of a card or list row
pub fn card_artwork(doc: &Document, card: NodeId) -> Option<NodeId> {
    doc.find_by_class(card, host::CARD_IMAGE_CLASS)
        .or_else(|| doc.find_by_class(card, host::LIST_ITEM_IMAGE_CLASS))
}

/// Text lines of a card or list row, in document order
pub fn card_text_lines(doc: &Document, card: NodeId) -> Vec<NodeId> {
    let lines = doc.find_all_by_class(card, host::CARD_TEXT_CLASS);
    if lines.is_empty() {
        doc.find_all_by_class(card, host::LIST_ITEM_TEXT_CLASS)
    } else {
        lines
    }
}

/// Redact one card: artwork per policy, and when `title_label` is given the
/// item title line (the last text line) plus any overview paragraph.
/// Returns true when anything changed.
pub fn redact_card(doc: &mut Document, card: NodeId, policy: ArtworkPolicy, title_label: Option<&str>) -> bool {
    let mut changed = false;
    match card_artwork(doc, card) {
        Some(art) => changed |= redact_artwork(doc, art, policy),
        None => changed |= redact_artwork(doc, card, policy),
    }
    if let Some(label) = title_label {
        if let Some(title) = card_text_lines(doc, card).last().copied() {
            changed |= replace_text(doc, title, label);
        }
        for overview in doc.find_all_by_class(card, host::LIST_ITEM_OVERVIEW_CLASS) {
            changed |= hide_block(doc, overview);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ElementSpec;

    fn episode_card(doc: &mut Document) -> NodeId {
        let body = doc.body();
        doc.insert(
            body,
            &ElementSpec::new("div")
                .class(host::CARD_CLASS)
                .attr(host::DATA_ID, "e13")
                .child(ElementSpec::new("div").class(host::CARD_IMAGE_CLASS))
                .child(ElementSpec::new("div").class(host::CARD_TEXT_CLASS).text("The Show"))
                .child(ElementSpec::new("div").class(host::CARD_TEXT_CLASS).text("The Big Twist")),
        )
    }

    #[test]
    fn test_redact_card_blurs_and_relabels() {
        let mut doc = Document::new();
        let card = episode_card(&mut doc);
        assert!(redact_card(&mut doc, card, ArtworkPolicy::Blur, Some("S1E3")));

        let art = card_artwork(&doc, card).unwrap();
        assert!(doc.has_class(art, marker::BLUR_CLASS));
        let lines = card_text_lines(&doc, card);
        assert_eq!(doc.text(lines[0]), "The Show");
        assert_eq!(doc.text(lines[1]), "S1E3");
    }

    #[test]
    fn test_redact_card_is_idempotent() {
        let mut doc = Document::new();
        let card = episode_card(&mut doc);
        redact_card(&mut doc, card, ArtworkPolicy::Blur, Some("S1E3"));
        assert!(!redact_card(&mut doc, card, ArtworkPolicy::Blur, Some("S1E3")));
        assert_eq!(doc.find_all_by_class(card, marker::BLUR_CLASS).len(), 1);

        // Original text survives a second application
        let title = card_text_lines(&doc, card)[1];
        assert_eq!(doc.attr(title, marker::ORIGINAL_TEXT_ATTR), Some("The Big Twist"));
    }

    #[test]
    fn test_policy_none_leaves_artwork() {
        let mut doc = Document::new();
        let card = episode_card(&mut doc);
        redact_card(&mut doc, card, ArtworkPolicy::None, None);
        assert!(redacted_nodes(&doc, card).is_empty());
    }

    #[test]
    fn test_generic_policy() {
        let mut doc = Document::new();
        let card = episode_card(&mut doc);
        redact_card(&mut doc, card, ArtworkPolicy::Generic, None);
        let art = card_artwork(&doc, card).unwrap();
        assert!(doc.has_class(art, marker::GENERIC_CLASS));
        assert!(!doc.has_class(art, marker::BLUR_CLASS));
    }

    #[test]
    fn test_reveal_and_rehide_roundtrip() {
        let mut doc = Document::new();
        let card = episode_card(&mut doc);
        redact_card(&mut doc, card, ArtworkPolicy::Blur, Some("S1E3"));
        let art = card_artwork(&doc, card).unwrap();
        let title = card_text_lines(&doc, card)[1];

        assert_eq!(reveal(&mut doc, card), 2);
        assert!(!doc.has_class(art, marker::BLUR_CLASS));
        assert_eq!(doc.text(title), "The Big Twist");

        // A redaction attempt while revealed does not fight the user
        assert!(!redact_artwork(&mut doc, art, ArtworkPolicy::Blur));

        assert_eq!(rehide(&mut doc, card), 2);
        assert!(doc.has_class(art, marker::BLUR_CLASS));
        assert_eq!(doc.text(title), "S1E3");
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut doc = Document::new();
        let card = episode_card(&mut doc);
        redact_card(&mut doc, card, ArtworkPolicy::Blur, Some("S1E3"));
        assert_eq!(clear(&mut doc, card), 2);

        let title = card_text_lines(&doc, card)[1];
        assert_eq!(doc.text(title), "The Big Twist");
        assert!(redacted_nodes(&doc, card).is_empty());
        assert_eq!(doc.attr(title, marker::ORIGINAL_TEXT_ATTR), None);
        assert_eq!(rehide(&mut doc, card), 0);
    }

    #[test]
    fn test_hide_block() {
        let mut doc = Document::new();
        let body = doc.body();
        let overview = doc.insert(body, &ElementSpec::new("p").class(host::OVERVIEW_CLASS).text("plot"));
        assert!(hide_block(&mut doc, overview));
        assert!(!hide_block(&mut doc, overview));
        assert!(doc.has_class(overview, marker::HIDDEN_CLASS));
        // Text is untouched, only hidden
        assert_eq!(doc.text(overview), "plot");
    }
}
