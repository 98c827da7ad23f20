//! LDAP search filter construction (RFC 4515).

use std::borrow::Cow;

/// Person accounts, excluding computer objects (which are also `user`s).
pub const USER_OBJECT_FILTER: &str = "(&(objectClass=user)(objectCategory=person))";

/// `LDAP_MATCHING_RULE_IN_CHAIN`: transitive `memberOf` evaluation in AD.
pub const IN_CHAIN_MATCHING_RULE: &str = "1.2.840.113556.1.4.1941";

/// Escape a string value for use inside a filter assertion.
pub fn escape_value(value: &str) -> Cow<'_, str> {
    ldap3::ldap_escape(value)
}

/// Escape raw octets (`objectGUID`, `objectSid`) as `\xx` pairs.
pub fn escape_binary(bytes: &[u8]) -> String {
    let hex = hex::encode(bytes);
    let mut out = String::with_capacity(hex.len() + bytes.len());
    for pair in hex.as_bytes().chunks(2) {
        out.push('\\');
        out.push(pair[0] as char);
        out.push(pair[1] as char);
    }
    out
}

/// Equality assertion with an escaped value.
pub fn eq(attribute: &str, value: &str) -> String {
    format!("({}={})", attribute, escape_value(value))
}

/// AND of the given filter fragments. A single fragment is returned as-is.
pub fn and<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    combine('&', parts)
}

/// OR of the given filter fragments. A single fragment is returned as-is.
pub fn or<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    combine('|', parts)
}

fn combine<I, S>(op: char, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<String> = parts.into_iter().map(|p| p.as_ref().to_string()).collect();
    if parts.len() == 1 {
        return parts.into_iter().next().unwrap_or_default();
    }
    format!("({}{})", op, parts.concat())
}

/// Filter matching a person account by samAccountName or UPN.
pub fn principal_filter(sam_account_name: &str, user_principal_name: Option<&str>) -> String {
    let mut alternatives = vec![eq("sAMAccountName", sam_account_name)];
    if let Some(upn) = user_principal_name {
        alternatives.push(eq("userPrincipalName", upn));
    }
    and([USER_OBJECT_FILTER.to_string(), or(alternatives)])
}

/// Filter matching a single object by its binary `objectGUID`.
pub fn guid_filter(guid_bytes: &[u8]) -> String {
    format!("(objectGUID={})", escape_binary(guid_bytes))
}

/// Filter matching a single object by its binary `objectSid`.
pub fn sid_filter(sid_bytes: &[u8]) -> String {
    format!("(objectSid={})", escape_binary(sid_bytes))
}

/// Enumeration filter for a sync run.
///
/// With no groups every person account is returned; otherwise only
/// (transitive) members of at least one of the groups.
pub fn users_filter(group_dns: &[String]) -> String {
    if group_dns.is_empty() {
        return USER_OBJECT_FILTER.to_string();
    }
    let memberships: Vec<String> = group_dns
        .iter()
        .map(|dn| format!("(memberOf:{}:={})", IN_CHAIN_MATCHING_RULE, escape_value(dn)))
        .collect();
    and([USER_OBJECT_FILTER.to_string(), or(memberships)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_value() {
        assert_eq!(escape_value("jdoe"), "jdoe");
        assert_eq!(escape_value("a*b(c)d\\e"), "a\\2ab\\28c\\29d\\5ce");
    }

    #[test]
    fn test_escape_binary() {
        assert_eq!(escape_binary(&[0x01, 0xAB, 0x00]), "\\01\\ab\\00");
        assert_eq!(escape_binary(&[]), "");
    }

    #[test]
    fn test_principal_filter() {
        assert_eq!(
            principal_filter("jdoe", None),
            "(&(&(objectClass=user)(objectCategory=person))(sAMAccountName=jdoe))"
        );
        assert_eq!(
            principal_filter("jdoe", Some("jdoe@example.com")),
            "(&(&(objectClass=user)(objectCategory=person))(|(sAMAccountName=jdoe)(userPrincipalName=jdoe@example.com)))"
        );
    }

    #[test]
    fn test_users_filter() {
        assert_eq!(users_filter(&[]), USER_OBJECT_FILTER);
        let filter = users_filter(&["CN=Staff,DC=example,DC=com".to_string()]);
        assert!(filter.contains("(memberOf:1.2.840.113556.1.4.1941:=CN=Staff,DC=example,DC=com)"));
    }
}
