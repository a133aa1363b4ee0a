use std::borrow::Cow;

use crate::error::RenderError;
use crate::watch::Selector;

use super::Extraction;

/// Tags whose contents never count as visible text.
const SKIPPED_TAGS: [&str; 2] = ["script", "style"];

/// Elements that break the line when rendered. Text on either side of one is
/// kept apart; inline elements such as `<b>` join their neighbours.
const BLOCK_TAGS: [&str; 40] = [
    "address", "article", "aside", "blockquote", "br", "dd", "details", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hr", "li", "main", "nav", "ol", "option", "p", "pre", "section", "summary",
    "table", "tbody", "td", "tfoot", "th", "thead", "tr", "ul",
];

/// Longest named or numeric reference body we try to decode, e.g. `#x1F600`.
const MAX_ENTITY_LEN: usize = 10;

/// Runs a selector query against an HTML document.
///
/// The first element in document order whose tag name matches (ASCII
/// case-insensitive) and whose `id`/`class` attribute equals the selector
/// value exactly wins. Without a selector the `<body>` text is returned.
pub fn extract(html: &str, selector: Option<&Selector>) -> Result<Extraction, RenderError> {
    let dom = tl::parse(html, tl::ParserOptions::default())
        .map_err(|err| RenderError::Extraction(format!("failed to parse document: {err:?}")))?;
    let parser = dom.parser();

    let Some(selector) = selector else {
        return Ok(Extraction::found(page_text(&dom)));
    };

    let matched = find_first(dom.children(), parser, &|tag| matches_selector(tag, selector));

    Ok(match matched {
        Some(tag) => {
            let mut text = String::new();
            collect_tag_text(tag, parser, &mut text);
            Extraction::found(collapse_whitespace(&text))
        }
        None => Extraction::not_found(),
    })
}

fn matches_selector(tag: &tl::HTMLTag, selector: &Selector) -> bool {
    if !tag.name().as_utf8_str().eq_ignore_ascii_case(&selector.tag) {
        return false;
    }

    match tag.attributes().get(selector.attribute.as_str()) {
        Some(Some(value)) => value.as_utf8_str() == selector.value.as_str(),
        _ => false,
    }
}

/// Pre-order search, so an outer element wins over a nested match.
fn find_first<'p, 'a>(
    handles: &[tl::NodeHandle],
    parser: &'p tl::Parser<'a>,
    predicate: &dyn Fn(&tl::HTMLTag) -> bool,
) -> Option<&'p tl::HTMLTag<'a>> {
    for handle in handles {
        let Some(tl::Node::Tag(tag)) = handle.get(parser) else {
            continue;
        };
        if predicate(tag) {
            return Some(tag);
        }
        let children: Vec<tl::NodeHandle> = tag.children().top().iter().copied().collect();
        if let Some(found) = find_first(&children, parser, predicate) {
            return Some(found);
        }
    }
    None
}

fn page_text(dom: &tl::VDom) -> String {
    let parser = dom.parser();
    let mut text = String::new();

    let body = find_first(dom.children(), parser, &|tag| {
        tag.name().as_utf8_str().eq_ignore_ascii_case("body")
    });

    match body {
        Some(body) => collect_tag_text(body, parser, &mut text),
        None => {
            for handle in dom.children() {
                if let Some(node) = handle.get(parser) {
                    collect_node_text(node, parser, &mut text);
                }
            }
        }
    }

    collapse_whitespace(&text)
}

fn collect_tag_text(tag: &tl::HTMLTag, parser: &tl::Parser, out: &mut String) {
    for handle in tag.children().top().iter() {
        if let Some(child) = handle.get(parser) {
            collect_node_text(child, parser, out);
        }
    }
}

fn collect_node_text(node: &tl::Node, parser: &tl::Parser, out: &mut String) {
    match node {
        tl::Node::Tag(tag) => {
            let name = tag.name().as_utf8_str();
            if SKIPPED_TAGS.iter().any(|skip| name.eq_ignore_ascii_case(skip)) {
                return;
            }
            let block = BLOCK_TAGS.iter().any(|b| name.eq_ignore_ascii_case(b));
            if block {
                out.push(' ');
            }
            collect_tag_text(tag, parser, out);
            if block {
                out.push(' ');
            }
        }
        tl::Node::Raw(bytes) => out.push_str(&decode_entities(&bytes.as_utf8_str())),
        tl::Node::Comment(_) => {}
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decodes the character references that show up in page text: the common
/// named ones and decimal or hex numeric ones. Anything unrecognised, including
/// a bare `&`, is kept as written.
fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        match lookup_entity(after) {
            Some((decoded, consumed)) => {
                out.push(decoded);
                rest = &after[consumed..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Resolves the reference at the start of `s` (just past the `&`). Returns the
/// character and how many bytes it spans, including the closing `;`.
fn lookup_entity(s: &str) -> Option<(char, usize)> {
    let end = s
        .char_indices()
        .take(MAX_ENTITY_LEN + 1)
        .find(|&(_, c)| !(c.is_ascii_alphanumeric() || c == '#'))
        .filter(|&(_, c)| c == ';')
        .map(|(i, _)| i)?;

    let name = &s[..end];
    let decoded = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse().ok()?,
            };
            char::from_u32(code)?
        }
    };
    Some((decoded, end + 1))
}
