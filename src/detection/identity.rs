//! Stable identity for detected videos.
//!
//! The host offers no reliable id, so identity comes from an ordered chain of
//! heuristics; the first one that yields a value wins. The final position
//! fallback always yields something, but it drifts with layout and is only
//! advisory.

use std::sync::OnceLock;

use anyhow::Result;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::dom::{Document, Element, ElementPattern, NodeId};

use super::rules::is_known_domain;

const ENABLE_LOGS: bool = false;

use crate::log_debug;

/// Where a resolved id came from, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IdSource {
    ReelLink,
    PostLink,
    TestId,
    MediaSource,
    Poster,
    ContainerAttr,
    PropertyHash,
    Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedId {
    pub id: String,
    pub source: IdSource,
    pub confidence: Confidence,
}

impl ResolvedId {
    fn new(id: String, source: IdSource) -> Self {
        let confidence = match source {
            IdSource::Position => Confidence::Low,
            IdSource::PropertyHash => Confidence::Medium,
            _ => Confidence::High,
        };
        Self {
            id,
            source,
            confidence,
        }
    }

    /// Layout-derived ids can collide or drift; never dedupe on them.
    pub fn is_advisory(&self) -> bool {
        self.confidence == Confidence::Low
    }
}

type Step = fn(&Document, NodeId, &Element) -> Result<Option<String>>;

const CHAIN: [(IdSource, Step); 7] = [
    (IdSource::ReelLink, from_reel_link),
    (IdSource::PostLink, from_post_link),
    (IdSource::TestId, from_test_id),
    (IdSource::MediaSource, from_media_source),
    (IdSource::Poster, from_poster),
    (IdSource::ContainerAttr, from_container_attr),
    (IdSource::PropertyHash, from_property_hash),
];

/// Scopes searched for permalink anchors. The search stops at the first one.
const LINK_SCOPES: [ElementPattern; 3] = [
    ElementPattern::Tag("article"),
    ElementPattern::AttrEquals("role", "presentation"),
    ElementPattern::AttrContains("data-testid", "reel"),
];

const ANCHOR: ElementPattern = ElementPattern::TagWithAttr("a", "href");

const ID_CONTAINERS: [ElementPattern; 3] = [
    ElementPattern::Tag("article"),
    ElementPattern::AttrEquals("role", "presentation"),
    ElementPattern::Tag("div"),
];

const CONTAINER_ID_ATTRS: [&str; 3] = ["id", "data-id", "data-media-id"];

const HASH_ATTRS: [&str; 2] = ["data-video-id", "data-media-id"];

/// Resolve an id for `node`. `None` only when the node does not exist.
pub fn resolve(doc: &Document, node: NodeId) -> Option<ResolvedId> {
    let element = doc.element(node)?;

    for (source, step) in CHAIN.iter() {
        match step(doc, node, element) {
            Ok(Some(id)) if !id.is_empty() => {
                log_debug!("resolved {} as {} via {:?}", node, id, source);
                return Some(ResolvedId::new(id, *source));
            }
            Ok(_) => {}
            Err(err) => log_debug!("identity step {:?} failed on {}: {err}", source, node),
        }
    }

    Some(ResolvedId::new(position_id(element), IdSource::Position))
}

fn reel_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/reel/([^/?#]+)").expect("reel path pattern is valid"))
}

fn post_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/p/([^/?#]+)").expect("post path pattern is valid"))
}

fn capture_segment(pattern: &Regex, href: &str) -> Option<String> {
    pattern
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Nearest anchor ancestor matching `pattern`, else the first matching anchor
/// inside the nearest link scope.
fn link_segment(doc: &Document, node: NodeId, pattern: &Regex) -> Option<String> {
    for ancestor in doc.ancestors(node) {
        let element = doc.element(ancestor)?;
        if ANCHOR.matches(element) {
            if let Some(segment) = element.attr("href").and_then(|h| capture_segment(pattern, h)) {
                return Some(segment);
            }
        }
        if ElementPattern::any_matches(&LINK_SCOPES, element) {
            return doc
                .query_all(ancestor, &ANCHOR)
                .into_iter()
                .filter_map(|link| doc.element(link)?.attr("href"))
                .find_map(|href| capture_segment(pattern, href));
        }
    }
    None
}

fn from_reel_link(doc: &Document, node: NodeId, _element: &Element) -> Result<Option<String>> {
    Ok(link_segment(doc, node, reel_path()))
}

fn from_post_link(doc: &Document, node: NodeId, _element: &Element) -> Result<Option<String>> {
    Ok(link_segment(doc, node, post_path()))
}

fn from_test_id(doc: &Document, node: NodeId, _element: &Element) -> Result<Option<String>> {
    Ok(doc
        .self_and_ancestors(node)
        .filter_map(|id| doc.element(id)?.attr("data-testid"))
        .find(|test_id| test_id.contains("reel") || test_id.contains("video"))
        .map(str::to_string))
}

fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn from_media_source(_doc: &Document, _node: NodeId, element: &Element) -> Result<Option<String>> {
    let Some(src) = element.attr("src").filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if !is_known_domain(src)? {
        return Ok(None);
    }

    let url = Url::parse(src)?;
    let segments = path_segments(&url);
    if let Some(pos) = segments.iter().position(|s| s == "reel") {
        if let Some(id) = segments.get(pos + 1) {
            return Ok(Some(id.clone()));
        }
    }

    let from_query = |name: &str| {
        url.query_pairs()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    };
    Ok(from_query("media_id").or_else(|| from_query("id")))
}

fn from_poster(_doc: &Document, _node: NodeId, element: &Element) -> Result<Option<String>> {
    let Some(poster) = element.attr("poster").filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if !is_known_domain(poster)? {
        return Ok(None);
    }

    let segments = path_segments(&Url::parse(poster)?);
    let id = match segments.len() {
        0 => None,
        1 => segments.last().cloned(),
        n => segments.get(n - 2).cloned(),
    };
    Ok(id)
}

/// Only the first container found is consulted, trying the shapes in
/// `ID_CONTAINERS` order rather than by distance.
fn from_container_attr(doc: &Document, node: NodeId, _element: &Element) -> Result<Option<String>> {
    let container = ID_CONTAINERS
        .iter()
        .find_map(|pattern| doc.closest(node, pattern))
        .and_then(|id| doc.element(id));

    Ok(container.and_then(|el| {
        CONTAINER_ID_ATTRS
            .iter()
            .filter_map(|name| el.attr(name))
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }))
}

fn from_property_hash(_doc: &Document, _node: NodeId, element: &Element) -> Result<Option<String>> {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(src) = element.attr("src") {
        parts.push(src.split('?').next().unwrap_or(src));
    }
    if let Some(poster) = element.attr("poster") {
        parts.push(poster);
    }
    parts.extend(HASH_ATTRS.iter().filter_map(|name| element.attr(name)));
    parts.retain(|p| !p.is_empty());

    if parts.is_empty() {
        return Ok(None);
    }

    let digest = fnv1a_64(parts.join("|").as_bytes());
    Ok(Some(format!("h_{}", URL_SAFE_NO_PAD.encode(digest.to_be_bytes()))))
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

fn position_id(element: &Element) -> String {
    let rect = element.rect;
    format!(
        "pos_{}_{}_{}_{}",
        rect.top.round() as i64,
        rect.left.round() as i64,
        rect.width.round() as i64,
        rect.height.round() as i64
    )
}
