//! Candidate classification as a static rule table.
//!
//! Each rule checks one signal on a `video` element. The `Gate` rule must
//! hold; beyond that any single `Signal` rule is enough. Checks may fail (bad
//! URLs, nonsense geometry from the host); a failed check counts as `false`.

use anyhow::{anyhow, Result};
use url::Url;

use crate::dom::{Document, Element, ElementPattern, NodeId};

const ENABLE_LOGS: bool = false;

use crate::log_debug;

pub const KNOWN_SOURCE_DOMAINS: [&str; 3] = ["instagram.com", "cdninstagram.com", "fbcdn.net"];

/// Container shapes the host wraps short-form videos in.
pub const REEL_CONTAINERS: [ElementPattern; 5] = [
    ElementPattern::AttrContains("data-testid", "reel"),
    ElementPattern::Tag("article"),
    ElementPattern::AttrEquals("role", "presentation"),
    ElementPattern::AttrContains("data-testid", "media"),
    ElementPattern::Class("x1lliihq"),
];

pub const VIDEO: ElementPattern = ElementPattern::Tag("video");

const VIDEO_TEST_ID: ElementPattern = ElementPattern::AttrContains("data-testid", "video");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Visible,
    SourceDomain,
    Container,
    InlinePlayback,
    ReelAspect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Gate,
    Signal,
}

type Check = fn(&Document, NodeId, &Element) -> Result<bool>;

pub struct Rule {
    pub signal: Signal,
    pub kind: RuleKind,
    check: Check,
}

pub static CANDIDATE_RULES: [Rule; 5] = [
    Rule {
        signal: Signal::Visible,
        kind: RuleKind::Gate,
        check: check_visible,
    },
    Rule {
        signal: Signal::SourceDomain,
        kind: RuleKind::Signal,
        check: check_source_domain,
    },
    Rule {
        signal: Signal::Container,
        kind: RuleKind::Signal,
        check: check_container,
    },
    Rule {
        signal: Signal::InlinePlayback,
        kind: RuleKind::Signal,
        check: check_inline_playback,
    },
    Rule {
        signal: Signal::ReelAspect,
        kind: RuleKind::Signal,
        check: check_reel_aspect,
    },
];

/// Per-signal outcome of running the rule table against one element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub is_video: bool,
    pub matched: Vec<Signal>,
    pub check_errors: usize,
}

impl Classification {
    pub fn has(&self, signal: Signal) -> bool {
        self.matched.contains(&signal)
    }

    pub fn is_candidate(&self) -> bool {
        if !self.is_video {
            return false;
        }
        let gates_hold = CANDIDATE_RULES
            .iter()
            .filter(|rule| rule.kind == RuleKind::Gate)
            .all(|rule| self.has(rule.signal));
        let any_signal = CANDIDATE_RULES
            .iter()
            .filter(|rule| rule.kind == RuleKind::Signal)
            .any(|rule| self.has(rule.signal));
        gates_hold && any_signal
    }
}

/// Run every rule against `node`. Never fails.
pub fn classify(doc: &Document, node: NodeId) -> Classification {
    let Some(element) = doc.element(node) else {
        return Classification::default();
    };
    if !VIDEO.matches(element) {
        return Classification::default();
    }

    let mut classification = Classification {
        is_video: true,
        ..Classification::default()
    };

    for rule in CANDIDATE_RULES.iter() {
        match (rule.check)(doc, node, element) {
            Ok(true) => classification.matched.push(rule.signal),
            Ok(false) => {}
            Err(err) => {
                classification.check_errors += 1;
                log_debug!("check {:?} failed on {}: {err}", rule.signal, node);
            }
        }
    }

    classification
}

pub fn is_candidate(doc: &Document, node: NodeId) -> bool {
    classify(doc, node).is_candidate()
}

/// Host of `raw`, looking through `blob:` wrappers.
pub fn url_host(raw: &str) -> Result<String> {
    let url = Url::parse(raw)?;
    if let Some(host) = url.host_str() {
        return Ok(host.to_ascii_lowercase());
    }
    if url.scheme() == "blob" {
        let inner = Url::parse(url.path())?;
        if let Some(host) = inner.host_str() {
            return Ok(host.to_ascii_lowercase());
        }
    }
    Err(anyhow!("url has no host: {raw}"))
}

pub fn is_known_domain(raw: &str) -> Result<bool> {
    let host = url_host(raw)?;
    Ok(KNOWN_SOURCE_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}"))))
}

fn check_visible(_doc: &Document, _node: NodeId, element: &Element) -> Result<bool> {
    Ok(element.rect.is_visible())
}

fn check_source_domain(_doc: &Document, _node: NodeId, element: &Element) -> Result<bool> {
    match element.attr("src").filter(|src| !src.is_empty()) {
        Some(src) => is_known_domain(src),
        None => Ok(false),
    }
}

fn check_container(doc: &Document, node: NodeId, _element: &Element) -> Result<bool> {
    Ok(doc
        .self_and_ancestors(node)
        .filter_map(|id| doc.element(id))
        .any(|el| ElementPattern::any_matches(&REEL_CONTAINERS, el)))
}

fn check_inline_playback(doc: &Document, node: NodeId, element: &Element) -> Result<bool> {
    Ok(element.has_attr("playsinline")
        || element.has_attr("webkit-playsinline")
        || doc.closest(node, &VIDEO_TEST_ID).is_some())
}

fn check_reel_aspect(_doc: &Document, _node: NodeId, element: &Element) -> Result<bool> {
    let rect = element.rect;
    if !rect.width.is_finite() || !rect.height.is_finite() {
        return Err(anyhow!("non-finite geometry {}x{}", rect.width, rect.height));
    }
    let ratio = rect.aspect_ratio();
    Ok(ratio > 1.2 || (ratio > 0.8 && ratio < 1.3))
}
