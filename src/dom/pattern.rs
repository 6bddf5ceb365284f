use super::Element;

/// Minimal selector vocabulary: enough to express the container and link
/// shapes the detector cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementPattern {
    /// `tag`
    Tag(&'static str),
    /// `[name]`
    HasAttr(&'static str),
    /// `[name="value"]`
    AttrEquals(&'static str, &'static str),
    /// `[name*="value"]`
    AttrContains(&'static str, &'static str),
    /// `.class`
    Class(&'static str),
    /// `tag[name]`
    TagWithAttr(&'static str, &'static str),
}

impl ElementPattern {
    pub fn matches(&self, element: &Element) -> bool {
        match *self {
            ElementPattern::Tag(tag) => element.is_tag(tag),
            ElementPattern::HasAttr(name) => element.has_attr(name),
            ElementPattern::AttrEquals(name, value) => element.attr(name) == Some(value),
            ElementPattern::AttrContains(name, value) => element
                .attr(name)
                .map(|actual| actual.contains(value))
                .unwrap_or(false),
            ElementPattern::Class(class) => element.has_class(class),
            ElementPattern::TagWithAttr(tag, name) => element.is_tag(tag) && element.has_attr(name),
        }
    }

    pub fn any_matches(patterns: &[ElementPattern], element: &Element) -> bool {
        patterns.iter().any(|p| p.matches(element))
    }
}
