//! `aclitem` parsing into privilege summaries.
//!
//! PostgreSQL renders ACL entries as `grantee=privileges/grantor`, with an
//! empty grantee meaning PUBLIC and `*` after a flag marking grant option.

/// One parsed ACL entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Privilege {
    pub grantee: String,
    /// Privilege flag letters, grant-option markers stripped (e.g. "arwd").
    pub privileges: String,
    /// Flags held WITH GRANT OPTION.
    pub grantable: String,
    pub grantor: String,
}

/// Parses one aclitem string. Returns None for entries that do not match
/// the catalog output format.
pub fn parse_acl_item(item: &str) -> Option<Privilege> {
    let (grantee, rest) = item.split_once('=')?;
    let (flags, grantor) = rest.split_once('/')?;

    let mut privileges = String::new();
    let mut grantable = String::new();
    let mut chars = flags.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            continue;
        }
        privileges.push(c);
        if chars.peek() == Some(&'*') {
            grantable.push(c);
        }
    }

    let grantee = if grantee.is_empty() {
        "public".to_string()
    } else {
        grantee.trim_matches('"').to_string()
    };

    Some(Privilege {
        grantee,
        privileges,
        grantable,
        grantor: grantor.trim_matches('"').to_string(),
    })
}

/// Parses a whole `aclitem[]` rendering, skipping malformed entries.
pub fn parse_acl(items: &[String]) -> Vec<Privilege> {
    items.iter().filter_map(|s| parse_acl_item(s)).collect()
}
