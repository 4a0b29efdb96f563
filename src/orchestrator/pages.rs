//! Target-page URL builders.
//!
//! The list page is driven through its query string: `sysparm_query`
//! carries `STARTSWITH` conditions joined by `^`, and the first-row /
//! header-search parameters keep the rendered table deterministic enough
//! for the list agent to scan.

const LIST_TARGET: &str = "now/nav/ui/classic/params/target/task_ci_list.do";
const ADD_TARGET: &str = "now/nav/ui/classic/params/target/task_ci.do";

/// List page scoped to one item and (when present) one change number.
pub fn list_url(instance: &str, item: &str, chg: &str) -> String {
    let mut conditions = Vec::new();
    if !item.is_empty() {
        conditions.push(format!("ci_item.nameSTARTSWITH{item}"));
    }
    if !chg.is_empty() {
        conditions.push(format!("task.numberSTARTSWITH{chg}"));
    }
    build_list_url(instance, &conditions)
}

/// Record-creation form.
pub fn add_url(instance: &str) -> String {
    format!("{}/{}", instance.trim_end_matches('/'), ADD_TARGET)
}

/// List page scoped to one change number only; the closure sub-flow
/// operates at the change-request level, not the item level.
pub fn change_request_url(instance: &str, chg: &str) -> String {
    let mut conditions = Vec::new();
    if !chg.is_empty() {
        conditions.push(format!("task.numberSTARTSWITH{chg}"));
    }
    build_list_url(instance, &conditions)
}

fn build_list_url(instance: &str, conditions: &[String]) -> String {
    let mut params = Vec::new();
    if !conditions.is_empty() {
        params.push(format!(
            "sysparm_query={}",
            encode_component(&conditions.join("^"))
        ));
    }
    params.push("sysparm_first_row=1".to_string());
    params.push("sysparm_list_header_search=true".to_string());
    format!(
        "{}/{}?{}",
        instance.trim_end_matches('/'),
        LIST_TARGET,
        params.join("&")
    )
}

/// Percent-encode a query component. Unreserved characters pass through;
/// everything else (including `^` and spaces) is encoded.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTANCE: &str = "https://example.service-now.com";

    #[test]
    fn list_url_scopes_item_and_change() {
        let url = list_url(INSTANCE, "CI-191003", "CHG0039650");
        assert!(url.starts_with("https://example.service-now.com/now/nav/ui/classic/params/target/task_ci_list.do?"));
        assert!(url.contains("ci_item.nameSTARTSWITHCI-191003"));
        assert!(url.contains("%5E")); // the ^ joiner is encoded
        assert!(url.contains("task.numberSTARTSWITHCHG0039650"));
        assert!(url.contains("sysparm_first_row=1"));
        assert!(url.contains("sysparm_list_header_search=true"));
    }

    #[test]
    fn list_url_without_change_number_has_single_condition() {
        let url = list_url(INSTANCE, "CI-1", "");
        assert!(url.contains("ci_item.nameSTARTSWITHCI-1"));
        assert!(!url.contains("task.number"));
        assert!(!url.contains("%5E"));
    }

    #[test]
    fn empty_scope_omits_query_condition() {
        let url = list_url(INSTANCE, "", "");
        assert!(!url.contains("sysparm_query"));
        assert!(url.contains("sysparm_first_row=1"));
    }

    #[test]
    fn change_request_url_scopes_change_only() {
        let url = change_request_url(INSTANCE, "CHG0001");
        assert!(url.contains("task.numberSTARTSWITHCHG0001"));
        assert!(!url.contains("ci_item.name"));
    }

    #[test]
    fn trailing_slash_on_instance_is_tolerated() {
        let url = add_url("https://example.service-now.com/");
        assert_eq!(
            url,
            "https://example.service-now.com/now/nav/ui/classic/params/target/task_ci.do"
        );
    }

    #[test]
    fn encode_component_escapes_reserved_bytes() {
        assert_eq!(encode_component("a^b c"), "a%5Eb%20c");
        assert_eq!(encode_component("CI-1_x.y~z"), "CI-1_x.y~z");
    }
}
