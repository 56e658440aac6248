//! Shared tier key naming.
//!
//! | Kind        | Format                        |
//! |-------------|-------------------------------|
//! | value       | `{namespace}:{key}`           |
//! | tag index   | `{namespace}:tag:{tag}`       |
//! | partial     | `{namespace}#partial:{key}`   |
//!
//! Partial entries use `#` after the namespace, which namespaces may not
//! contain, so no caller key can land on one. Tag sets keep the `tag:`
//! prefix shared with other instances; a caller key starting with `tag:`
//! addresses the same shared key as a tag set and must be avoided.
//!
//! The local tier is keyed by the namespaced value key as well, so
//! invalidation messages can be applied without translation.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    pub fn value_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    #[inline]
    pub fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{tag}", self.namespace)
    }

    #[inline]
    pub fn partial_key(&self, key: &str) -> String {
        format!("{}#partial:{key}", self.namespace)
    }

    /// Strip the namespace from a value key. `None` if it belongs elsewhere.
    pub fn caller_key<'a>(&self, namespaced: &'a str) -> Option<&'a str> {
        namespaced
            .strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_keys() {
        let ks = KeySpace::new("app");
        assert_eq!(ks.value_key("user:1"), "app:user:1");
        assert_eq!(ks.tag_key("users"), "app:tag:users");
        assert_eq!(ks.partial_key("q1"), "app#partial:q1");
    }

    #[test]
    fn partial_keys_never_match_value_keys() {
        let ks = KeySpace::new("app");
        assert_ne!(ks.value_key("partial:q"), ks.partial_key("q"));
        assert_eq!(ks.caller_key(&ks.partial_key("q")), None);
    }

    #[test]
    fn strips_own_namespace_only() {
        let ks = KeySpace::new("app");
        assert_eq!(ks.caller_key("app:user:1"), Some("user:1"));
        assert_eq!(ks.caller_key("other:user:1"), None);
        assert_eq!(ks.caller_key("application:x"), None);
    }
}
