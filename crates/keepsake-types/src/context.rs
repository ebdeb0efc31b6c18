//! The context bundle handed to the prompt-construction collaborator.

use serde::{Deserialize, Serialize};

/// Which part of the bundle a line belongs to. Declared in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSection {
    Anchor,
    Trigger,
    Recent,
    Session,
    Spatial,
}

impl ContextSection {
    /// Header used when rendering the section as text.
    pub fn heading(&self) -> &'static str {
        match self {
            ContextSection::Anchor => "What I know about you",
            ContextSection::Trigger => "What's been going on with you",
            ContextSection::Recent => "Recently mentioned",
            ContextSection::Session => "My current state",
            ContextSection::Spatial => "My current position",
        }
    }
}

/// One rendered line of context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLine {
    pub section: ContextSection,
    pub text: String,
}

/// Ordered, rendered facts and state for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBundle {
    lines: Vec<ContextLine>,
}

impl ContextBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, section: ContextSection, text: impl Into<String>) {
        self.lines.push(ContextLine {
            section,
            text: text.into(),
        });
    }

    pub fn lines(&self) -> &[ContextLine] {
        &self.lines
    }

    /// Lines belonging to one section, in emission order.
    pub fn section(&self, section: ContextSection) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(move |l| l.section == section)
            .map(|l| l.text.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Render as a text block with one heading per non-empty section.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut current: Option<ContextSection> = None;
        for line in &self.lines {
            if current != Some(line.section) {
                if current.is_some() {
                    out.push('\n');
                }
                out.push_str(line.section.heading());
                out.push_str(":\n");
                current = Some(line.section);
            }
            out.push_str("- ");
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bundle_renders_nothing() {
        let bundle = ContextBundle::new();
        assert!(bundle.is_empty());
        assert_eq!(bundle.render(), "");
    }

    #[test]
    fn test_render_groups_sections() {
        let mut bundle = ContextBundle::new();
        bundle.push(ContextSection::Anchor, "I'm a nurse");
        bundle.push(ContextSection::Anchor, "I live in Austin");
        bundle.push(ContextSection::Trigger, "(I think) I'm stressed");
        let text = bundle.render();
        assert_eq!(
            text,
            "What I know about you:\n- I'm a nurse\n- I live in Austin\n\n\
             What's been going on with you:\n- (I think) I'm stressed\n"
        );
        assert_eq!(bundle.section(ContextSection::Anchor).count(), 2);
    }
}
