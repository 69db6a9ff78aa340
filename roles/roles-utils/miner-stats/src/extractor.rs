//! Scraping of miner status pages.
//!
//! Status pages render each statistic as a caption followed by a highlighted
//! value, e.g. `Hash Rate <span class="val">52.3 KH/s</span>`. Extraction is
//! split in two steps so each can be tested on its own:
//!
//! 1. [`tokenize`] walks the markup and emits the visible text fragments,
//!    tagging each one as a [`MarkupText::Label`] or a [`MarkupText::Value`].
//! 2. [`StatusExtractor`] consumes those fragments with a two-state machine
//!    (awaiting label / awaiting value) and fills a [`StatusReading`].
//!
//! Pages without any value elements produce an empty reading. That is the
//! normal outcome for a device that is booting or serving an error page, so
//! it is never reported as a failure.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::StatusReading;
use crate::units::{
    normalize_hashrate, normalize_temperature, round_one_decimal, HashrateUnit, TemperatureUnit,
};

/// A visible text fragment of a status page.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkupText {
    /// Text outside any value element
    Label(String),
    /// Text inside a `<span class="val">` element
    Value(String),
}

/// Statistic a label refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusField {
    Hashrate,
    AcceptedShares,
    BestDifficulty,
    Temperature,
}

impl StatusField {
    /// Classify a caption by case-insensitive substring match.
    /// Checks run in a fixed order; the first hit wins.
    pub fn classify(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        if label.contains("hash rate") {
            Some(StatusField::Hashrate)
        } else if label.contains("accepted") && label.contains("share") {
            Some(StatusField::AcceptedShares)
        } else if label.contains("best") && label.contains("diff") {
            Some(StatusField::BestDifficulty)
        } else if label.contains("temp") {
            Some(StatusField::Temperature)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ExtractState {
    AwaitingLabel,
    AwaitingValue { label: String },
}

/// Label/value state machine producing a [`StatusReading`].
#[derive(Debug, Clone)]
pub struct StatusExtractor {
    state: ExtractState,
    reading: StatusReading,
}

impl Default for StatusExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusExtractor {
    pub fn new() -> Self {
        Self {
            state: ExtractState::AwaitingLabel,
            reading: StatusReading::default(),
        }
    }

    /// Feed the next text fragment in document order.
    ///
    /// A label replaces the current label. A value is matched against the
    /// current label; values seen before any label are dropped. Each match
    /// overwrites the field, so the last occurrence in the page wins. A value
    /// whose number cannot be parsed leaves the field as it was.
    pub fn feed(&mut self, text: MarkupText) {
        match text {
            MarkupText::Label(label) => {
                self.state = ExtractState::AwaitingValue { label };
            }
            MarkupText::Value(value) => {
                let field = match &self.state {
                    ExtractState::AwaitingValue { label } => StatusField::classify(label),
                    ExtractState::AwaitingLabel => None,
                };
                if let Some(field) = field {
                    apply_field(&mut self.reading, field, &value);
                }
            }
        }
    }

    pub fn finish(self) -> StatusReading {
        self.reading
    }
}

/// Extract a reading from a complete status page.
pub fn extract_status(markup: &str) -> StatusReading {
    let mut extractor = StatusExtractor::new();
    for text in tokenize(markup) {
        extractor.feed(text);
    }
    extractor.finish()
}

fn apply_field(reading: &mut StatusReading, field: StatusField, value: &str) {
    match field {
        StatusField::Hashrate => {
            if let Some(hashrate) = parse_hashrate(value) {
                reading.hashrate = Some(hashrate);
            }
        }
        StatusField::AcceptedShares => {
            if let Some(shares) = parse_shares(value) {
                reading.accepted_shares = Some(shares);
                reading.shares = Some(shares);
            }
        }
        StatusField::BestDifficulty => {
            if let Some(diff) = parse_decimal(value) {
                reading.best_diff = Some(diff);
            }
        }
        StatusField::Temperature => {
            if let Some(temp) = parse_temperature(value) {
                reading.temp = Some(temp);
            }
        }
    }
}

fn hashrate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)([\d.]+)\s*(h/s|kh/s|mh/s)").expect("valid hashrate regex"))
}

fn integer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)").expect("valid integer regex"))
}

fn decimal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([\d.]+)").expect("valid decimal regex"))
}

fn temperature_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)([\d.]+)\s*°?\s*([cf])?").expect("valid temperature regex")
    })
}

fn class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bclass\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("valid class attribute regex")
    })
}

fn parse_hashrate(text: &str) -> Option<f64> {
    let caps = hashrate_regex().captures(text)?;
    let value: f64 = caps[1].parse().ok()?;
    let unit: HashrateUnit = caps[2].parse().ok()?;
    Some(normalize_hashrate(value, unit))
}

fn parse_shares(text: &str) -> Option<u64> {
    let caps = integer_regex().captures(text)?;
    caps[1].parse().ok()
}

fn parse_decimal(text: &str) -> Option<f64> {
    let caps = decimal_regex().captures(text)?;
    caps[1].parse().ok()
}

fn parse_temperature(text: &str) -> Option<f64> {
    let caps = temperature_regex().captures(text)?;
    let value: f64 = caps[1].parse().ok()?;
    let unit = caps
        .get(2)
        .and_then(|unit| unit.as_str().parse::<TemperatureUnit>().ok());
    Some(round_one_decimal(normalize_temperature(value, unit)))
}

/// Walk the markup and return its visible text fragments in document order.
///
/// Parsing is forgiving: unknown tags are skipped, a stray `<` that
/// does not open a tag is kept as text, and an unterminated tag ends the walk.
pub fn tokenize(markup: &str) -> Vec<MarkupText> {
    let mut texts = Vec::new();
    let mut pending = String::new();
    let mut in_value = false;
    let mut rest = markup;

    while let Some(start) = rest.find('<') {
        pending.push_str(&rest[..start]);
        let tag_src = &rest[start..];

        if !opens_tag(tag_src) {
            pending.push('<');
            rest = &tag_src[1..];
            continue;
        }

        flush_text(&mut pending, in_value, &mut texts);

        if let Some(comment) = tag_src.strip_prefix("<!--") {
            rest = match comment.find("-->") {
                Some(end) => &comment[end + 3..],
                None => "",
            };
            continue;
        }

        let Some(end) = tag_src.find('>') else {
            return texts;
        };
        let tag = &tag_src[1..end];
        rest = &tag_src[end + 1..];

        if tag.starts_with('!') || tag.starts_with('?') {
            continue;
        }

        if let Some(closing) = tag.strip_prefix('/') {
            if tag_name(closing).eq_ignore_ascii_case("span") {
                in_value = false;
            }
            continue;
        }

        let name = tag_name(tag);
        if name.eq_ignore_ascii_case("span") {
            if has_value_class(tag) {
                in_value = true;
            }
        } else if name.eq_ignore_ascii_case("script") || name.eq_ignore_ascii_case("style") {
            rest = skip_raw_text(rest, name);
        }
    }

    pending.push_str(rest);
    flush_text(&mut pending, in_value, &mut texts);
    texts
}

fn opens_tag(tag_src: &str) -> bool {
    tag_src[1..]
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'))
        .unwrap_or(false)
}

fn tag_name(tag: &str) -> &str {
    let end = tag
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(tag.len());
    &tag[..end]
}

fn has_value_class(tag: &str) -> bool {
    class_regex()
        .captures(tag)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|classes| classes.as_str().split_whitespace().any(|class| class == "val"))
        .unwrap_or(false)
}

/// Skip the body of a `<script>` or `<style>` element.
fn skip_raw_text<'a>(rest: &'a str, name: &str) -> &'a str {
    let closing = format!("</{}", name.to_ascii_lowercase());
    match rest.to_ascii_lowercase().find(&closing) {
        Some(pos) => match rest[pos..].find('>') {
            Some(end) => &rest[pos + end + 1..],
            None => "",
        },
        None => "",
    }
}

fn flush_text(pending: &mut String, in_value: bool, texts: &mut Vec<MarkupText>) {
    let text = decode_entities(pending);
    pending.clear();

    let text = text.trim();
    if text.is_empty() {
        return;
    }

    let text = text.to_string();
    texts.push(if in_value {
        MarkupText::Value(text)
    } else {
        MarkupText::Label(text)
    });
}

/// Decode character references. Numeric references (`&#176;`, `&#xB0;`) are
/// decoded generically; named ones only from the set status pages use.
/// Anything unrecognized is kept verbatim.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        let reference = &rest[start + 1..];

        let resolved = reference
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_reference(&reference[..end]).map(|c| (c, end)));

        match resolved {
            Some((c, end)) => {
                decoded.push(c);
                rest = &reference[end + 1..];
            }
            None => {
                decoded.push('&');
                rest = reference;
            }
        }
    }

    decoded.push_str(rest);
    decoded
}

/// Resolve the body of a reference, without the leading `&` and trailing `;`.
fn decode_reference(body: &str) -> Option<char> {
    if let Some(numeric) = body.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }

    match body {
        "deg" => Some('°'),
        "nbsp" => Some(' '),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => None,
    }
}
