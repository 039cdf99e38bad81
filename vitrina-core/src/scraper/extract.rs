use std::collections::HashSet;
use std::iter::successors;

use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::config::ExtractionSection;

use super::discovery::parse_selector;
use super::error::{ScrapeError, ScrapeResult};

/// One product record. Only the name is mandatory; every other field is
/// best-effort.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub source_url: String,
}

/// How to reach candidate text from a matched anchor element, in the order
/// the cascade tries them.
#[derive(Debug, Clone, Copy)]
enum AnchorStrategy {
    SiblingText,
    ParentSiblingText,
    SiblingRun { take: usize },
    AncestorTextDiff,
}

#[derive(Debug)]
struct FieldRules {
    keywords: Vec<String>,
    anchor_max_len: usize,
    min_len: usize,
    max_len: usize,
    min_commas: usize,
    indicators: Vec<Regex>,
    strategies: [AnchorStrategy; 4],
}

impl FieldRules {
    /// An anchor is an element whose own text equals a keyword (with or
    /// without a trailing colon), or contains one while staying short.
    fn is_anchor(&self, own_text: &str) -> bool {
        if own_text.is_empty() {
            return false;
        }
        let lowered = own_text.to_lowercase();
        let length = lowered.chars().count();
        self.keywords.iter().any(|keyword| {
            lowered == *keyword
                || lowered == format!("{keyword}:")
                || (lowered.contains(keyword.as_str()) && length < self.anchor_max_len)
        })
    }

    fn plausible(&self, candidate: &str) -> bool {
        let length = candidate.chars().count();
        if length < self.min_len || length > self.max_len {
            return false;
        }
        if candidate.matches(',').count() < self.min_commas {
            return false;
        }
        self.indicators
            .iter()
            .any(|pattern| pattern.is_match(candidate))
    }
}

/// Cascading heuristic extractor. Deterministic over a fixed markup: it
/// parses the page once and never touches the live browser.
#[derive(Debug)]
pub struct FieldExtractor {
    any_element: Selector,
    body: Selector,
    name_selectors: Vec<Selector>,
    brand_selector: Selector,
    price_selector: Selector,
    description_selector: Selector,
    image_selector: Selector,
    ingredient_rules: FieldRules,
    claim_rules: FieldRules,
    claim_fallbacks: Vec<Regex>,
    claim_fallback_max: usize,
    ingredient_label: Regex,
    claim_label: Regex,
    whitespace: Regex,
    sentence_gap: Regex,
}

impl FieldExtractor {
    pub fn new(config: &ExtractionSection) -> ScrapeResult<Self> {
        let name_selectors = config
            .name_selectors
            .iter()
            .map(|raw| parse_selector(raw))
            .collect::<ScrapeResult<Vec<_>>>()?;
        let ingredient_rules = FieldRules {
            keywords: lowercase_all(&config.ingredient_keywords),
            anchor_max_len: config.ingredient_anchor_max_len,
            min_len: config.ingredient_min_len,
            max_len: config.ingredient_max_len,
            min_commas: config.ingredient_min_commas,
            indicators: compile_patterns(&config.ingredient_indicators)?,
            strategies: [
                AnchorStrategy::SiblingText,
                AnchorStrategy::ParentSiblingText,
                AnchorStrategy::SiblingRun {
                    take: config.ingredient_sibling_run,
                },
                AnchorStrategy::AncestorTextDiff,
            ],
        };
        let claim_rules = FieldRules {
            keywords: lowercase_all(&config.claim_keywords),
            anchor_max_len: config.claim_anchor_max_len,
            min_len: config.claim_min_len,
            max_len: config.claim_max_len,
            min_commas: 0,
            indicators: compile_patterns(&config.claim_indicators)?,
            strategies: [
                AnchorStrategy::SiblingText,
                AnchorStrategy::ParentSiblingText,
                AnchorStrategy::SiblingRun {
                    take: config.claim_sibling_run,
                },
                AnchorStrategy::AncestorTextDiff,
            ],
        };
        Ok(Self {
            any_element: parse_selector("*")?,
            body: parse_selector("body")?,
            name_selectors,
            brand_selector: parse_selector(&config.brand_selector)?,
            price_selector: parse_selector(&config.price_selector)?,
            description_selector: parse_selector(&config.description_selector)?,
            image_selector: parse_selector(&config.image_selector)?,
            ingredient_rules,
            claim_rules,
            claim_fallbacks: compile_patterns(&config.claim_fallback_patterns)?,
            claim_fallback_max: config.claim_fallback_max,
            ingredient_label: Regex::new(r"(?i)^\s*Ingredients?\s*:?\s*").expect("valid regex"),
            claim_label: Regex::new(
                r"(?i)^\s*(?:Benefits?|Details?|Claims?|What it does|Key benefits?|Product benefits?)\s*:?\s*",
            )
            .expect("valid regex"),
            whitespace: Regex::new(r"\s+").expect("valid regex"),
            sentence_gap: Regex::new(r"([.!?])\s*([A-Z])").expect("valid regex"),
        })
    }

    /// Returns `None` when no recognizable name is present; such pages are
    /// dropped rather than failing the batch.
    pub fn extract(&self, markup: &str, source_url: &str) -> Option<ExtractedItem> {
        let document = Html::parse_document(markup);
        let name = self.extract_name(&document)?;
        let brand = self.first_text(&document, &self.brand_selector);
        let price = self.first_text(&document, &self.price_selector);
        let description = self.first_text(&document, &self.description_selector);
        let image_url = document
            .select(&self.image_selector)
            .next()
            .and_then(|element| element.value().attr("src"))
            .map(str::to_string)
            .filter(|src| !src.is_empty());
        let ingredients = self.extract_ingredients(&document);
        let claims = self.extract_claims(&document);
        Some(ExtractedItem {
            name,
            brand,
            price,
            description,
            ingredients,
            claims,
            image_url,
            source_url: source_url.to_string(),
        })
    }

    fn extract_name(&self, document: &Html) -> Option<String> {
        for selector in &self.name_selectors {
            if let Some(element) = document.select(selector).next() {
                let name = element_text(&element);
                if !name.is_empty() {
                    return Some(name);
                }
            }
        }
        None
    }

    fn first_text(&self, document: &Html, selector: &Selector) -> Option<String> {
        document
            .select(selector)
            .next()
            .map(|element| element_text(&element))
            .filter(|text| !text.is_empty())
    }

    fn extract_ingredients(&self, document: &Html) -> Option<String> {
        for anchor in self.anchors(document, &self.ingredient_rules) {
            for strategy in &self.ingredient_rules.strategies {
                let Some(candidate) = anchor_candidate(anchor, strategy) else {
                    continue;
                };
                if !self.ingredient_rules.plausible(&candidate) {
                    continue;
                }
                let cleaned = self.normalize_ingredients(&candidate);
                return (!cleaned.is_empty()).then_some(cleaned);
            }
        }
        None
    }

    fn extract_claims(&self, document: &Html) -> Option<String> {
        for anchor in self.anchors(document, &self.claim_rules) {
            for strategy in &self.claim_rules.strategies {
                let Some(candidate) = anchor_candidate(anchor, strategy) else {
                    continue;
                };
                if !self.claim_rules.plausible(&candidate) {
                    continue;
                }
                let cleaned = self.normalize_claims(&candidate);
                if !cleaned.is_empty() {
                    return Some(cleaned);
                }
            }
        }
        self.claims_from_body_text(document)
    }

    fn anchors<'a>(
        &'a self,
        document: &'a Html,
        rules: &'a FieldRules,
    ) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        document
            .select(&self.any_element)
            .filter(move |element| rules.is_anchor(&element_text(element)))
    }

    /// Sentence-pattern sweep over the whole body text, joining up to the
    /// configured number of distinct matches.
    fn claims_from_body_text(&self, document: &Html) -> Option<String> {
        let body_text = document
            .select(&self.body)
            .next()
            .map(|element| element.text().collect::<String>())?;
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for pattern in &self.claim_fallbacks {
            for matched in pattern.find_iter(&body_text) {
                let sentence = matched.as_str().trim().to_string();
                if seen.insert(sentence.clone()) {
                    found.push(sentence);
                }
            }
        }
        if found.is_empty() {
            return None;
        }
        found.truncate(self.claim_fallback_max);
        Some(found.join(" "))
    }

    /// Canonical comma-separated form: label stripped, whitespace collapsed,
    /// each segment trimmed and capitalized, order preserved.
    fn normalize_ingredients(&self, raw: &str) -> String {
        let stripped = self.ingredient_label.replace(raw, "");
        let collapsed = self.whitespace.replace_all(&stripped, " ");
        collapsed
            .trim()
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(capitalize_segment)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn normalize_claims(&self, raw: &str) -> String {
        let stripped = self.claim_label.replace(raw, "");
        let collapsed = self.whitespace.replace_all(&stripped, " ");
        self.sentence_gap
            .replace_all(&collapsed, "$1 $2")
            .trim()
            .to_string()
    }
}

fn lowercase_all(keywords: &[String]) -> Vec<String> {
    keywords.iter().map(|keyword| keyword.to_lowercase()).collect()
}

fn compile_patterns(patterns: &[String]) -> ScrapeResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|raw| {
            RegexBuilder::new(raw)
                .case_insensitive(true)
                .build()
                .map_err(|err| {
                    ScrapeError::Configuration(format!("invalid pattern {raw:?}: {err}"))
                })
        })
        .collect()
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn following_elements<'a>(element: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    successors(element.next_sibling(), |node| node.next_sibling()).filter_map(ElementRef::wrap)
}

fn ancestor_elements<'a>(element: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    successors(element.parent(), |node| node.parent()).filter_map(ElementRef::wrap)
}

fn anchor_candidate(anchor: ElementRef<'_>, strategy: &AnchorStrategy) -> Option<String> {
    let candidate = match strategy {
        AnchorStrategy::SiblingText => {
            following_elements(anchor).next().map(|el| element_text(&el))
        }
        AnchorStrategy::ParentSiblingText => anchor
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(|parent| following_elements(parent).next())
            .map(|el| element_text(&el)),
        AnchorStrategy::SiblingRun { take } => {
            let joined = following_elements(anchor)
                .take(*take)
                .map(|el| element_text(&el))
                .collect::<Vec<_>>()
                .join(" ");
            Some(joined.trim().to_string())
        }
        AnchorStrategy::AncestorTextDiff => {
            let own_raw = anchor.text().collect::<String>();
            std::iter::once(anchor)
                .chain(ancestor_elements(anchor))
                .find(|el| matches!(el.value().name(), "div" | "section" | "article"))
                .and_then(|container| {
                    let all_text = container.text().collect::<String>();
                    all_text
                        .split_once(&own_raw)
                        .map(|(_, after)| after.trim().to_string())
                })
        }
    };
    candidate.filter(|text| !text.is_empty())
}

/// First character uppercased, remainder lowercased.
fn capitalize_segment(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
