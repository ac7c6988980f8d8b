use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

use crate::model::identifier::is_valid_name;
use crate::model::Identifier;

pub const PRIMARY_DOMAIN: &str = "dev.azure.com";
pub const ALIAS_DOMAIN: &str = "visualstudio.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Malformed,
    WrongDomain,
    WrongStructure(&'static str),
    MissingWorkItemId,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Malformed => f.write_str("The link is not a valid URL."),
            ParseError::WrongDomain => write!(
                f,
                "The link must point to Azure DevOps ({PRIMARY_DOMAIN} or {ALIAS_DOMAIN})."
            ),
            ParseError::WrongStructure(detail) => {
                write!(f, "The link does not look like an Azure DevOps work item: {detail}.")
            }
            ParseError::MissingWorkItemId => {
                f.write_str("The link does not contain a work item id.")
            }
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Identifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<Identifier, ParseError>> for ParseResult {
    fn from(result: Result<Identifier, ParseError>) -> Self {
        match result {
            Ok(identifier) => Self {
                is_valid: true,
                data: Some(identifier),
                error: None,
            },
            Err(e) => Self {
                is_valid: false,
                data: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub fn parse(url: &str) -> ParseResult {
    parse_identifier(url).into()
}

enum DomainKind<'a> {
    Primary,
    /// Organization label taken from the subdomain.
    Alias(&'a str),
}

/// Scheme, host, path and query are split by hand so hosts a strict URL
/// parser would refuse can still be inspected.
pub fn parse_identifier(url: &str) -> Result<Identifier, ParseError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Malformed);
    }

    let (scheme, rest) = trimmed.split_once("://").ok_or(ParseError::Malformed)?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ParseError::Malformed);
    }

    let host_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (host, remainder) = rest.split_at(host_end);
    let host = host.rsplit('@').next().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        return Err(ParseError::Malformed);
    }

    let remainder = remainder.split('#').next().unwrap_or("");
    let (path, query) = match remainder.split_once('?') {
        Some((path, query)) => (path, query),
        None => (remainder, ""),
    };

    let kind = classify_host(host)?;
    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(decode)
        .collect::<Result<Vec<_>, _>>()?;

    let (organization, project) = match kind {
        DomainKind::Primary => (
            segments.first().cloned(),
            segments.get(1).cloned(),
        ),
        DomainKind::Alias(org) => (Some(decode(org)?), segments.first().cloned()),
    };
    let organization = organization
        .filter(|o| !o.is_empty())
        .ok_or(ParseError::WrongStructure("missing organization"))?;
    let project = project
        .filter(|p| !p.is_empty() && !p.starts_with('_'))
        .ok_or(ParseError::WrongStructure("missing project"))?;
    if !is_valid_name(&organization) || !is_valid_name(&project) {
        return Err(ParseError::WrongStructure(
            "organization or project name contains unsupported characters",
        ));
    }

    let params = parse_query(query)?;
    let work_item_id = id_after(&segments, "edit", false)
        .or_else(|| query_id(&params, "workitem"))
        .or_else(|| query_id(&params, "workItem"))
        .or_else(|| id_after(&segments, "workitems", true))
        .ok_or(ParseError::MissingWorkItemId)?;

    let identifier = Identifier::new(organization, project, work_item_id, trimmed);
    identifier
        .validate_structure()
        .map_err(|_| ParseError::WrongStructure("incomplete work item reference"))?;
    Ok(identifier)
}

fn classify_host(host: &str) -> Result<DomainKind<'_>, ParseError> {
    let lower = host.to_ascii_lowercase();
    if lower.contains(PRIMARY_DOMAIN) {
        return Ok(DomainKind::Primary);
    }
    let alias_suffix = format!(".{ALIAS_DOMAIN}");
    if lower.ends_with(&alias_suffix) {
        // ASCII lowercasing keeps byte offsets, so slicing the original is safe.
        let org = &host[..host.len() - alias_suffix.len()];
        if org.is_empty() || org.contains('.') {
            return Err(ParseError::WrongStructure("missing organization"));
        }
        return Ok(DomainKind::Alias(org));
    }
    if lower == ALIAS_DOMAIN {
        return Err(ParseError::WrongStructure("missing organization"));
    }
    Err(ParseError::WrongDomain)
}

fn decode(raw: &str) -> Result<String, ParseError> {
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .map_err(|_| ParseError::Malformed)
}

fn parse_query(query: &str) -> Result<Vec<(String, String)>, ParseError> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((decode(name)?, decode(value)?))
        })
        .collect()
}

fn positive_id(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u32>().ok().filter(|id| *id > 0)
}

/// Id in the segment right after the last `marker` segment.
fn id_after(segments: &[String], marker: &str, ignore_case: bool) -> Option<u32> {
    let matches = |s: &str| {
        if ignore_case {
            s.eq_ignore_ascii_case(marker)
        } else {
            s == marker
        }
    };
    let pos = segments.iter().rposition(|s| matches(s))?;
    segments.get(pos + 1).and_then(|s| positive_id(s))
}

fn query_id(params: &[(String, String)], name: &str) -> Option<u32> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| positive_id(value))
}
