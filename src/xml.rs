//! Event-driven view over a `roxmltree` document.
//!
//! Handlers receive `tag_start`/`tag_end` callbacks in document order along
//! with the full path from the root element, which is what lets them tell the
//! `item` of one list from the `item` of a list nested inside it.

use crate::prelude::*;
use log::trace;
use roxmltree::{Document, Node};
use std::fmt::Display;

/// Names of the elements from the document root down to the current one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagPath(Vec<String>);

impl TagPath {
    pub fn push(&mut self, name: &str) {
        self.0.push(name.to_string())
    }

    pub fn pop(&mut self) {
        self.0.pop();
    }

    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn matches(&self, pattern: &TagPattern) -> bool {
        let segments = pattern.segments;
        if pattern.anchored && segments.len() != self.0.len() {
            return false;
        }
        self.0.len() >= segments.len()
            && self.0[self.0.len() - segments.len()..].iter().zip(segments).all(|(a, b)| a == b)
    }

    /// True when the current element is a direct child of an element matching `parent`.
    pub fn is_child_of(&self, parent: &TagPattern) -> bool {
        let mut up = self.clone();
        up.pop();
        up.depth() > 0 && up.matches(parent)
    }
}

impl Display for TagPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// Ordered path segments, matched against the tail of a [`TagPath`] or,
/// when anchored, against the whole path.
#[derive(Debug, Clone, Copy)]
pub struct TagPattern {
    segments: &'static [&'static str],
    anchored: bool,
}

impl TagPattern {
    pub const fn suffix(segments: &'static [&'static str]) -> Self {
        TagPattern { segments, anchored: false }
    }

    pub const fn anchored(segments: &'static [&'static str]) -> Self {
        TagPattern { segments, anchored: true }
    }
}

pub trait XmlHandler {
    type Output;

    /// Puts the handler back in its initial state.
    fn reset(&mut self);

    fn tag_start(&mut self, _path: &TagPath) -> Result<()> {
        Ok(())
    }

    /// `text` is the character data directly inside the closing element.
    fn tag_end(&mut self, path: &TagPath, text: &str) -> Result<()>;

    fn result(&self) -> &Self::Output;

    fn into_result(self) -> Self::Output;
}

/// Resets `handler` and feeds it every element of `xml`.
pub fn feed<H: XmlHandler>(xml: &str, handler: &mut H) -> Result<()> {
    let doc = Document::parse(xml).wrap_err("can't parse response xml")?;
    handler.reset();
    let mut path = TagPath::default();
    walk(doc.root_element(), &mut path, handler)
}

pub fn parse<H: XmlHandler>(xml: &str, mut handler: H) -> Result<H::Output> {
    feed(xml, &mut handler)?;
    Ok(handler.into_result())
}

fn walk<H: XmlHandler>(node: Node, path: &mut TagPath, handler: &mut H) -> Result<()> {
    path.push(node.tag_name().name());
    trace!("<{path}>");
    handler.tag_start(path)?;
    let mut text = String::new();
    for child in node.children() {
        if child.is_element() {
            walk(child, path, handler)?;
        } else if child.is_text() {
            text.push_str(child.text().unwrap_or_default());
        }
    }
    handler.tag_end(path, &text)?;
    path.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl XmlHandler for Recorder {
        type Output = Vec<String>;

        fn reset(&mut self) {
            self.events.clear();
        }

        fn tag_start(&mut self, path: &TagPath) -> Result<()> {
            self.events.push(f!("start {path}"));
            Ok(())
        }

        fn tag_end(&mut self, path: &TagPath, text: &str) -> Result<()> {
            self.events.push(f!("end {path} {:?}", text.trim()));
            Ok(())
        }

        fn result(&self) -> &Self::Output {
            &self.events
        }

        fn into_result(self) -> Self::Output {
            self.events
        }
    }

    fn path(segments: &[&str]) -> TagPath {
        let mut p = TagPath::default();
        segments.iter().for_each(|s| p.push(s));
        p
    }

    #[test]
    fn events_follow_document_order() {
        let xml = r#"<a xmlns="http://ec2.amazonaws.com/doc/2016-11-15/"><b>one</b><c><b>two</b></c></a>"#;
        let events = parse(xml, Recorder::default()).unwrap();
        assert_eq!(
            events,
            vec![
                "start /a",
                "start /a/b",
                r#"end /a/b "one""#,
                "start /a/c",
                "start /a/c/b",
                r#"end /a/c/b "two""#,
                r#"end /a/c """#,
                r#"end /a """#,
            ]
        );
    }

    #[test]
    fn suffix_patterns_match_tail_segments() {
        const ITEM: TagPattern = TagPattern::suffix(&["reservedInstancesSet", "item"]);
        assert!(path(&["Response", "reservedInstancesSet", "item"]).matches(&ITEM));
        assert!(!path(&["Response", "reservedInstancesSet", "item", "tagSet", "item"]).matches(&ITEM));
        assert!(!path(&["item"]).matches(&ITEM));
    }

    #[test]
    fn anchored_patterns_match_whole_path() {
        const ID: TagPattern = TagPattern::anchored(&["Response", "reservedInstancesId"]);
        assert!(path(&["Response", "reservedInstancesId"]).matches(&ID));
        assert!(!path(&["Outer", "Response", "reservedInstancesId"]).matches(&ID));
    }

    #[test]
    fn child_of_checks_direct_parent() {
        const ITEM: TagPattern = TagPattern::suffix(&["reservedInstancesSet", "item"]);
        assert!(path(&["r", "reservedInstancesSet", "item", "state"]).is_child_of(&ITEM));
        assert!(!path(&["r", "reservedInstancesSet", "item", "tagSet", "item", "key"])
            .is_child_of(&ITEM));
        assert_eq!(path(&["r", "state"]).name(), "state");
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(parse("<a><b></a>", Recorder::default()).is_err());
    }
}
