//! Best-effort recovery of a contact identifier (phone number or WhatsApp
//! JID) from arbitrary N8N payloads, plus lead status classification.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::models::lead::LeadStatus;

/// Checked in order before any searching.
const DIRECT_PATHS: &[&[&str]] = &[
    &["remotejid"],
    &["remoteJid"],
    &["phone"],
    &["telefone"],
    &["whatsapp"],
    &["contact", "remotejid"],
    &["contact", "phone"],
    &["message", "key", "remoteJid"],
    &["body", "remotejid"],
    &["body", "phone"],
];

const CONTACT_KEY_MARKERS: [&str; 4] = ["phone", "telefone", "remotejid", "whatsapp"];
const MAX_SEARCH_DEPTH: usize = 2;

static BR_MOBILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"55\d{10,13}").expect("valid regex"));
static WHATSAPP_JID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+@s\.whatsapp\.net").expect("valid regex"));
static LOCAL_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:55|0)?(\d{2})(\d{8,9})$").expect("valid regex"));

const STATUS_UNQUALIFIED: [&str; 7] = [
    "desqual", "unqual", "reject", "rejeit", "canc", "fail", "falha",
];
const STATUS_QUALIFIED: [&str; 4] = ["qual", "aprov", "sucess", "succe"];
const PAYLOAD_UNQUALIFIED: [&str; 5] = ["unqual", "desqual", "cancel", "reject", "failed"];
const PAYLOAD_QUALIFIED: [&str; 4] = ["qualific", "success", "aprovad", "confirmed"];
const NODE_UNQUALIFIED: [&str; 4] = ["desqual", "canc", "falha", "erro"];
const NODE_QUALIFIED: [&str; 3] = ["qualifi", "aprov", "sucesso"];

/// Contact identifier of a payload, or `None` when nothing looks like one.
pub fn extract_contact(data: &Value) -> Option<String> {
    if !data.is_object() {
        return None;
    }
    DIRECT_PATHS
        .iter()
        .find_map(|path| lookup(data, path).and_then(scalar_text))
        .or_else(|| search_contact_keys(data, 0))
        .or_else(|| {
            let serialized = data.to_string();
            BR_MOBILE
                .find(&serialized)
                .or_else(|| WHATSAPP_JID.find(&serialized))
                .map(|m| m.as_str().to_string())
        })
}

/// Strips everything but digits, then a leading `55` or `0`, leaving the
/// area code and subscriber number. Numbers that do not fit that shape are
/// returned as bare digits.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match LOCAL_NUMBER.captures(&digits) {
        Some(caps) => format!("{}{}", &caps[1], &caps[2]),
        None => digits,
    }
}

/// Status of a webhook payload, from its `status` field when present or
/// from the whole serialized payload otherwise.
pub fn classify_payload_status(data: &Value) -> LeadStatus {
    if let Some(status) = data.get("status").and_then(scalar_text) {
        let status = status.to_lowercase();
        return classify_markers(&status, &STATUS_UNQUALIFIED, &STATUS_QUALIFIED)
            .unwrap_or(LeadStatus::Captured);
    }
    let serialized = data.to_string().to_lowercase();
    classify_markers(&serialized, &PAYLOAD_UNQUALIFIED, &PAYLOAD_QUALIFIED)
        .unwrap_or(LeadStatus::Captured)
}

/// Status implied by the name of the node that emitted an item, e.g.
/// `"Lead Qualificado"` or `"Cancelamento"`.
pub fn classify_node_name(node_name: &str) -> Option<LeadStatus> {
    classify_markers(&node_name.to_lowercase(), &NODE_UNQUALIFIED, &NODE_QUALIFIED)
}

fn classify_markers(haystack: &str, negative: &[&str], positive: &[&str]) -> Option<LeadStatus> {
    if negative.iter().any(|m| haystack.contains(m)) {
        Some(LeadStatus::Unqualified)
    } else if positive.iter().any(|m| haystack.contains(m)) {
        Some(LeadStatus::Qualified)
    } else {
        None
    }
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn search_contact_keys(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => map.iter().find_map(|(key, child)| {
            let key = key.to_lowercase();
            if CONTACT_KEY_MARKERS.iter().any(|m| key.contains(m)) {
                if let Some(s) = child.as_str().filter(|s| !s.trim().is_empty()) {
                    return Some(s.trim().to_string());
                }
            }
            search_contact_keys(child, depth + 1)
        }),
        Value::Array(items) => items
            .iter()
            .find_map(|item| search_contact_keys(item, depth + 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_fields_win() {
        assert_eq!(
            extract_contact(&json!({ "remotejid": "5511999998888" })).as_deref(),
            Some("5511999998888")
        );
        assert_eq!(
            extract_contact(&json!({
                "message": { "key": { "remoteJid": "555199@s.whatsapp.net" } }
            }))
            .as_deref(),
            Some("555199@s.whatsapp.net")
        );
        assert_eq!(
            extract_contact(&json!({ "phone": 5511988887777u64, "remotejid": "" })).as_deref(),
            Some("5511988887777")
        );
    }

    #[test]
    fn empty_or_non_object_payloads_have_no_contact() {
        assert_eq!(extract_contact(&json!({})), None);
        assert_eq!(extract_contact(&json!("5511999998888")), None);
        assert_eq!(extract_contact(&json!({ "name": "Maria", "age": 31 })), None);
    }

    #[test]
    fn nested_keys_are_searched_two_levels_deep() {
        let found = extract_contact(&json!({
            "lead": { "customer": { "mobilePhone": "11 98888-7777" } }
        }));
        assert_eq!(found.as_deref(), Some("11 98888-7777"));

        let in_list = extract_contact(&json!({
            "contacts": [{ "WhatsApp": "21977776666" }]
        }));
        assert_eq!(in_list.as_deref(), Some("21977776666"));

        let too_deep = extract_contact(&json!({
            "a": { "b": { "c": { "phoneNumber": "31966665555" } } }
        }));
        assert_eq!(too_deep, None);
    }

    #[test]
    fn regex_fallback_scans_serialized_payload() {
        let found = extract_contact(&json!({
            "text": "cliente 5511912345678 pediu retorno"
        }));
        assert_eq!(found.as_deref(), Some("5511912345678"));

        let jid = extract_contact(&json!({ "from": "99887@s.whatsapp.net" }));
        assert_eq!(jid.as_deref(), Some("99887@s.whatsapp.net"));
    }

    #[test]
    fn phone_normalization_strips_country_and_trunk_prefixes() {
        assert_eq!(normalize_phone("+55 11 99999-8888"), "11999998888");
        assert_eq!(normalize_phone("011 3333-4444"), "1133334444");
        assert_eq!(normalize_phone("(21) 98888-7777"), "21988887777");
        assert_eq!(normalize_phone("5511999998888@s.whatsapp.net"), "11999998888");
        assert_eq!(normalize_phone("123"), "123");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn explicit_status_checks_negative_markers_first() {
        let status = |s: &str| classify_payload_status(&json!({ "status": s }));
        assert_eq!(status("Qualificado"), LeadStatus::Qualified);
        assert_eq!(status("desqualificado"), LeadStatus::Unqualified);
        assert_eq!(status("unqualified"), LeadStatus::Unqualified);
        assert_eq!(status("Cancelado"), LeadStatus::Unqualified);
        assert_eq!(status("success"), LeadStatus::Qualified);
        assert_eq!(status("novo"), LeadStatus::Captured);
    }

    #[test]
    fn status_is_inferred_from_payload_without_status_field() {
        assert_eq!(
            classify_payload_status(&json!({ "note": "Pagamento aprovado" })),
            LeadStatus::Qualified
        );
        assert_eq!(
            classify_payload_status(&json!({ "note": "lead desqualificado" })),
            LeadStatus::Unqualified
        );
        assert_eq!(
            classify_payload_status(&json!({ "phone": "11999998888" })),
            LeadStatus::Captured
        );
    }

    #[test]
    fn node_names_map_to_statuses() {
        assert_eq!(classify_node_name("Lead Qualificado"), Some(LeadStatus::Qualified));
        assert_eq!(classify_node_name("Lead Desqualificado"), Some(LeadStatus::Unqualified));
        assert_eq!(classify_node_name("Erro no envio"), Some(LeadStatus::Unqualified));
        assert_eq!(classify_node_name("Sucesso"), Some(LeadStatus::Qualified));
        assert_eq!(classify_node_name("Webhook"), None);
    }
}
