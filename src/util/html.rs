const DROPPED_BLOCKS: &[&str] = &["script", "style"];
const LINE_BREAK_TAGS: &[&str] = &["br", "tr"];
const PARAGRAPH_TAGS: &[&str] = &[
    "p", "div", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "table", "pre",
];

/// Strip markup from `html`, keeping line structure.
///
/// Paragraph-level elements become blank lines, `<br>` becomes a newline,
/// script/style bodies are dropped and common entities are decoded.
pub fn sanitize_html(html: &str) -> String {
    let mut text = html.replace("\r\n", "\n");
    for tag in DROPPED_BLOCKS {
        text = remove_element(&text, tag);
    }
    let stripped = strip_tags(&text);
    let decoded = decode_entities(&stripped);
    normalize_whitespace(&decoded)
}

/// Split acceptance-criteria HTML into individual criteria.
pub fn split_criteria(html: &str) -> Vec<String> {
    let text = sanitize_html(html);
    if text.is_empty() {
        return Vec::new();
    }
    let fragments: Vec<String> = text
        .split("\n\n")
        .map(|fragment| strip_bullet(fragment.trim()).to_string())
        .filter(|fragment| !fragment.is_empty())
        .collect();
    if fragments.is_empty() {
        vec![text]
    } else {
        fragments
    }
}

fn remove_element(input: &str, tag: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}");
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;

    while let Some(rel) = lower[pos..].find(&open) {
        let start = pos + rel;
        out.push_str(&input[pos..start]);
        pos = match lower[start..].find(&close) {
            Some(close_rel) => {
                let close_start = start + close_rel;
                match lower[close_start..].find('>') {
                    Some(gt) => close_start + gt + 1,
                    None => input.len(),
                }
            }
            None => input.len(),
        };
    }
    out.push_str(&input[pos..]);
    out
}

fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(lt) = rest.find('<') {
        out.push_str(&rest[..lt]);
        let after = &rest[lt + 1..];
        let starts_tag = after
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
            .unwrap_or(false);
        if !starts_tag {
            out.push('<');
            rest = after;
            continue;
        }
        let Some(gt) = after.find('>') else {
            // Unterminated tag: drop the remainder.
            return out;
        };
        let name: String = after[..gt]
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if LINE_BREAK_TAGS.contains(&name.as_str()) {
            out.push('\n');
        } else if PARAGRAPH_TAGS.contains(&name.as_str()) {
            out.push_str("\n\n");
        }
        rest = &after[gt + 1..];
    }
    out.push_str(rest);
    out
}

fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|semi| *semi <= 10)
            .and_then(|semi| decode_entity(&after[..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn normalize_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut blank_run = 0;
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = 0;
    }
    out
}

fn strip_bullet(fragment: &str) -> &str {
    for marker in ["- ", "* ", "\u{2022} "] {
        if let Some(stripped) = fragment.strip_prefix(marker) {
            return stripped.trim_start();
        }
    }
    fragment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_handlers() {
        let html = r#"<div onclick="steal()">Hello<SCRIPT>alert(1)</script> world</div>"#;
        assert_eq!(sanitize_html(html), "Hello world");
    }

    #[test]
    fn converts_breaks_and_blocks() {
        let html = "<p>First line<br>second line</p><p>Next paragraph</p>";
        assert_eq!(
            sanitize_html(html),
            "First line\nsecond line\n\nNext paragraph"
        );
    }

    #[test]
    fn decodes_entities() {
        let html = "Tom &amp; Jerry &lt;3 &quot;cheese&quot;&nbsp;&#39;yes&#39; &#x41; &bogus;";
        assert_eq!(sanitize_html(html), "Tom & Jerry <3 \"cheese\" 'yes' A &bogus;");
    }

    #[test]
    fn keeps_literal_angle_brackets() {
        assert_eq!(sanitize_html("a < b and c > d"), "a < b and c > d");
    }

    #[test]
    fn splits_list_items() {
        let html = "<ul><li>Can log in</li><li>Sees <b>dashboard</b></li><li> </li></ul>";
        assert_eq!(split_criteria(html), vec!["Can log in", "Sees dashboard"]);
    }

    #[test]
    fn splits_paragraphs_and_blank_lines() {
        let html = "<div>Given a user</div><div>When they click</div>\n\nThen it works";
        assert_eq!(
            split_criteria(html),
            vec!["Given a user", "When they click", "Then it works"]
        );
    }

    #[test]
    fn single_block_stays_whole() {
        assert_eq!(
            split_criteria("Line one<br/>line two"),
            vec!["Line one\nline two"]
        );
    }

    #[test]
    fn empty_input_yields_empty_list() {
        assert!(split_criteria("").is_empty());
        assert!(split_criteria("<p> </p><br>").is_empty());
    }

    #[test]
    fn strips_plain_text_bullets() {
        assert_eq!(split_criteria("- one\n\n* two"), vec!["one", "two"]);
    }
}
