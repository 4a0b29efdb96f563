//! Extraction of structured update requests from pasted email text.
//!
//! Input is semi-structured: a change number somewhere in the document,
//! one or more item identifiers, and labeled attribute lines (`Status:`,
//! `Location:`, ...) that may apply to the whole request or, inside
//! numbered sections, to the items of that section only. Labels tolerate
//! leading numbering, odd whitespace, and fullwidth colons.

use cirun_common::{ItemOverride, ParsedUpdate};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static ZERO_WIDTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{200B}-\u{200D}\u{FEFF}]").unwrap());

static EXOTIC_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\t\u{00A0}\u{1680}\u{180E}\u{2000}-\u{200A}\u{202F}\u{205F}\u{3000}]+").unwrap()
});

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static CHG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)CHG\d+").unwrap());

static CI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)CI-\d+").unwrap());

/// A bare section number like `1.` or `2)` on its own line.
static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\s*[.)]?$").unwrap());

static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\d+\.\s*)?(?:Current\s*Status|Install\s*Status|Status)\s*[:：]\s*(.*)$")
        .unwrap()
});

static TO_CLIENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:\d+\.\s*)?(?:To\s*Client)\s*[:：]\s*(.*)$").unwrap());

static CONTACT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:\d+\.\s*)?(?:Contact\s*Name)\s*[:：]\s*(.*)$").unwrap());

static OWNER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\d+\.\s*)?(?:Owned\s*by|Owner\s*by)\s*[:：]\s*(.*)$").unwrap()
});

static CONTACT_ANY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\d+\.\s*)?(?:Contact\s*Name|Owned\s*by|Owner\s*by)\s*[:：]\s*(.*)$")
        .unwrap()
});

static LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:\d+\.\s*)?(?:Location)\s*[:：]\s*(.*)$").unwrap());

static OTHER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:\d+\.\s*)?(?:Comments?|Other\s*Desc\.?|Other\s*Description|Other|Note)\s*[:：]\s*(.*)$",
    )
    .unwrap()
});

static MODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:\d+\.\s*)?(?:Mode)\s*[:：]\s*(.*)$").unwrap());

static HEADER_CHANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Change\s+Account\s+User").unwrap());

static HEADER_UPDATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUpdate\s+CI-\d+").unwrap());

static LEAD_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[:：\-–—•·]+\s*").unwrap());

static THAI_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:คุณ|นาย|นางสาว|นาง|น\.ส\.)\s*").unwrap());

static MRS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Mrs\.?\s*").unwrap());
static MS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Ms\.?\s*").unwrap());
static MR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Mr\.?\s*").unwrap());
static K_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^K[.\s]\s*").unwrap());

static NON_ALPHA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z\s]+").unwrap());

static IT_STOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^it\s*stock$").unwrap());
static IN_STOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^in\s*stock$").unwrap());
static INSTOCK_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\binstock\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKey {
    CurrentStatus,
    ToClient,
    Contact,
    Location,
    OtherDesc,
}

/// A numbered-section block being accumulated: the items it names and the
/// fields that apply to them.
#[derive(Debug, Default)]
struct Block {
    items: Vec<String>,
    data: ItemOverride,
}

/// Parse a pasted update request into its structured form. Never fails;
/// missing pieces come back empty and the caller decides what is fatal.
pub fn parse_update_text(text: &str) -> ParsedUpdate {
    let lines: Vec<String> = text
        .lines()
        .map(normalize_spaces)
        .filter(|l| !l.is_empty())
        .collect();
    let whole = normalize_spaces(text);

    let mut overrides: HashMap<String, ItemOverride> = HashMap::new();
    let mut ordered: Vec<String> = Vec::new();
    let mut current: Option<Block> = None;
    // fields seen before the first item line of a block attach to it once
    // the item appears
    let mut pending: Option<ItemOverride> = None;

    for line in &lines {
        if SECTION_RE.is_match(line) {
            apply_block(&mut current, &mut overrides);
            pending = None;
            continue;
        }

        let cis = extract_cis(line);
        if !cis.is_empty() {
            if current.as_ref().is_some_and(|b| !b.data.is_empty()) {
                apply_block(&mut current, &mut overrides);
            }
            let block = current.get_or_insert_with(Block::default);
            if pending.as_ref().is_some_and(|p| !p.is_empty()) && block.data.is_empty() {
                block.data = pending.take().unwrap_or_default();
            }
            for ci in cis {
                if !block.items.contains(&ci) {
                    block.items.push(ci.clone());
                }
                if !ordered.contains(&ci) {
                    ordered.push(ci);
                }
            }
        }

        if let Some(chg) = CHG_RE.find(line).map(|m| m.as_str().to_uppercase()) {
            if let Some(block) = current.as_mut() {
                if block.data.chg.is_none() {
                    block.data.chg = Some(chg);
                }
            }
        }

        if let Some((key, value)) = find_field(line) {
            match current.as_mut() {
                Some(block) => set_field(&mut block.data, key, value),
                None => set_field(pending.get_or_insert_with(ItemOverride::default), key, value),
            }
        }
    }
    apply_block(&mut current, &mut overrides);

    let chg = CHG_RE
        .find(&whole)
        .map(|m| m.as_str().to_uppercase())
        .unwrap_or_default();

    let mut items = ordered;
    for m in CI_RE.find_iter(&whole) {
        let ci = m.as_str().to_uppercase();
        if !items.contains(&ci) {
            items.push(ci);
        }
    }
    let item = items.first().cloned().unwrap_or_default();

    let current_status = normalize_status(&find_labeled(&lines, &STATUS_RE));
    let to_client = find_labeled(&lines, &TO_CLIENT_RE);
    // Contact Name wins over the Owned by / Owner by spellings
    let contact_raw = {
        let named = find_labeled(&lines, &CONTACT_NAME_RE);
        if named.is_empty() {
            find_labeled(&lines, &OWNER_RE)
        } else {
            named
        }
    };
    let contact = clean_contact_name(&contact_raw);
    let location = normalize_location(&find_labeled(&lines, &LOCATION_RE));
    let other_desc = find_labeled(&lines, &OTHER_RE);

    let mode_raw = find_labeled(&lines, &MODE_RE);
    let mode = if mode_raw.is_empty() && !item.is_empty() {
        "Update".to_string()
    } else {
        mode_raw
    };

    let header = lines
        .iter()
        .find(|l| HEADER_CHANGE_RE.is_match(l))
        .or_else(|| lines.iter().find(|l| HEADER_UPDATE_RE.is_match(l)))
        .or_else(|| lines.first())
        .cloned()
        .unwrap_or_default();

    ParsedUpdate {
        header,
        chg,
        mode,
        item,
        items,
        overrides,
        current_status,
        to_client,
        contact,
        location,
        other_desc,
    }
}

/// Strip zero-width characters, map exotic spaces to plain spaces, and
/// collapse runs.
fn normalize_spaces(s: &str) -> String {
    let s = ZERO_WIDTH_RE.replace_all(s, "");
    let s = EXOTIC_SPACE_RE.replace_all(&s, " ");
    WS_RE.replace_all(&s, " ").trim().to_string()
}

fn extract_cis(line: &str) -> Vec<String> {
    CI_RE
        .find_iter(line)
        .map(|m| m.as_str().to_uppercase())
        .collect()
}

fn apply_block(current: &mut Option<Block>, overrides: &mut HashMap<String, ItemOverride>) {
    let Some(block) = current.take() else {
        return;
    };
    if block.items.is_empty() || block.data.is_empty() {
        return;
    }
    for item in &block.items {
        overrides
            .entry(item.to_uppercase())
            .or_default()
            .merge(&block.data);
    }
}

/// Match one labeled line against the known field labels, in priority
/// order. An empty normalized value means the line carries no usable
/// data.
fn find_field(line: &str) -> Option<(FieldKey, String)> {
    let defs: [(FieldKey, &Regex, fn(&str) -> String); 5] = [
        (FieldKey::CurrentStatus, &STATUS_RE, normalize_status),
        (FieldKey::ToClient, &TO_CLIENT_RE, trim_value),
        (FieldKey::Contact, &CONTACT_ANY_RE, clean_contact_name),
        (FieldKey::Location, &LOCATION_RE, normalize_location),
        (FieldKey::OtherDesc, &OTHER_RE, trim_value),
    ];
    for (key, re, normalize) in defs {
        if let Some(caps) = re.captures(line) {
            let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let value = normalize(raw);
            if value.is_empty() {
                return None;
            }
            return Some((key, value));
        }
    }
    None
}

fn set_field(data: &mut ItemOverride, key: FieldKey, value: String) {
    match key {
        FieldKey::CurrentStatus => data.current_status = Some(value),
        FieldKey::ToClient => data.to_client = Some(value),
        FieldKey::Contact => data.contact = Some(value),
        FieldKey::Location => data.location = Some(value),
        FieldKey::OtherDesc => data.other_desc = Some(value),
    }
}

fn find_labeled(lines: &[String], re: &Regex) -> String {
    lines
        .iter()
        .find_map(|line| {
            re.captures(line)
                .map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        })
        .flatten()
        .unwrap_or_default()
}

fn trim_value(raw: &str) -> String {
    raw.trim().to_string()
}

/// Strip titles and punctuation from a contact name, keeping only ASCII
/// letters. The bare "it stock" shorthand expands to the canonical stock
/// account.
pub fn clean_contact_name(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let mut s = raw.trim().to_string();
    s = LEAD_PUNCT_RE.replace(&s, "").to_string();
    s = THAI_TITLE_RE.replace(&s, "").to_string();
    s = MRS_RE.replace(&s, "").to_string();
    s = MS_RE.replace(&s, "").to_string();
    s = MR_RE.replace(&s, "").to_string();
    s = K_PREFIX_RE.replace(&s, "").to_string();
    s = NON_ALPHA_RE.replace_all(&s, " ").to_string();
    s = WS_RE.replace_all(&s, " ").trim().to_string();
    if IT_STOCK_RE.is_match(&s) {
        s = "RTH IT Stock".to_string();
    }
    s
}

/// Canonicalize status values; "instock" in any casing becomes
/// "In Stock".
pub fn normalize_status(raw: &str) -> String {
    let v = WS_RE.replace_all(raw.trim(), " ").trim().to_string();
    if v.is_empty() {
        return v;
    }
    if IN_STOCK_RE.is_match(&v) {
        return "In Stock".to_string();
    }
    if INSTOCK_WORD_RE.is_match(&v) {
        return INSTOCK_WORD_RE.replace_all(&v, "In Stock").to_string();
    }
    v
}

/// Bare building codes expand to their first zone.
pub fn normalize_location(raw: &str) -> String {
    let v = WS_RE.replace_all(raw.trim(), " ").trim().to_string();
    match v.to_uppercase().as_str() {
        "DHS-B1" => "DHS-B1-1".to_string(),
        "DHS-B2" => "DHS-B2-1".to_string(),
        _ => v,
    }
}
