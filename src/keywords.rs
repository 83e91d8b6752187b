//! Placeholder expansion for adapter invocation templates
//!
//! Invocation strings and log-file paths stored with each adapter type
//! contain `$TOKEN` placeholders that are filled in at spawn time:
//!
//! | Token                        | Value                              |
//! |------------------------------|------------------------------------|
//! | `$JAVA`                      | runtime executable path            |
//! | `$CLASSPATH`, `$UCSCLASSPATH`| classpath                          |
//! | `$HOSTNAME`                  | node hostname                      |
//! | `$LCTN`                      | node location                      |
//! | `$INSTANCE`                  | instance ordinal                   |
//! | `$VOLTIPADDRS`               | comma-separated store addresses    |
//! | `$UCSLOG4JCONFIGURATIONFILE` | logging configuration file         |
//! | `$UCSLOGFILEDIRECTORY`       | adapter log directory              |
//!
//! Tokens are matched longest-first at each `$`, so overlapping names such
//! as `$CLASSPATH` inside `$UCSCLASSPATH` never produce partial matches and
//! the result does not depend on the order tokens are listed in. Values
//! may themselves carry tokens (a log directory of `/var/log/$LCTN`), so
//! passes repeat until nothing changes, at most [`MAX_EXPANSION_PASSES`]
//! times.

use crate::config::ManagerConfig;

/// Upper bound on expansion passes; stops values that reference themselves
pub const MAX_EXPANSION_PASSES: usize = 8;

/// Placeholder tokens, longest first
const TOKENS: [&str; 9] = [
    "$UCSLOG4JCONFIGURATIONFILE",
    "$UCSLOGFILEDIRECTORY",
    "$UCSCLASSPATH",
    "$VOLTIPADDRS",
    "$CLASSPATH",
    "$HOSTNAME",
    "$INSTANCE",
    "$JAVA",
    "$LCTN",
];

/// Runtime values substituted for placeholder tokens
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeywordExpander {
    pub runtime_executable: String,
    pub classpath: String,
    pub hostname: String,
    pub location: String,
    pub instance: u32,
    pub store_addresses: Vec<String>,
    pub log_config_file: String,
    pub log_directory: String,
}

impl KeywordExpander {
    /// Build an expander for an instance on the given node
    pub fn for_instance(config: &ManagerConfig, location: &str, hostname: &str, instance: u32) -> Self {
        Self {
            runtime_executable: config.spawn.runtime_executable.clone(),
            classpath: config.spawn.classpath.clone(),
            hostname: hostname.to_string(),
            location: location.to_string(),
            instance,
            store_addresses: config.node.store_servers.clone(),
            log_config_file: config.spawn.log_config_file.clone(),
            log_directory: config.spawn.log_directory.clone(),
        }
    }

    fn value_of(&self, token: &str) -> String {
        match token {
            "$JAVA" => self.runtime_executable.clone(),
            "$CLASSPATH" | "$UCSCLASSPATH" => self.classpath.clone(),
            "$HOSTNAME" => self.hostname.clone(),
            "$LCTN" => self.location.clone(),
            "$INSTANCE" => self.instance.to_string(),
            "$VOLTIPADDRS" => self.store_addresses.join(","),
            "$UCSLOG4JCONFIGURATIONFILE" => self.log_config_file.clone(),
            "$UCSLOGFILEDIRECTORY" => self.log_directory.clone(),
            _ => token.to_string(),
        }
    }

    /// Replace every placeholder in `template`, including placeholders
    /// introduced by substituted values
    pub fn expand(&self, template: &str) -> String {
        let mut current = self.expand_once(template);
        for _ in 1..MAX_EXPANSION_PASSES {
            if !contains_token(&current) {
                break;
            }
            let next = self.expand_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        if contains_token(&current) {
            tracing::warn!(template = %template, expanded = %current, "Placeholder expansion did not settle");
        }
        current
    }

    fn expand_once(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let candidate = &rest[pos..];
            match TOKENS.iter().find(|token| candidate.starts_with(**token)) {
                Some(token) => {
                    out.push_str(&self.value_of(token));
                    rest = &candidate[token.len()..];
                }
                None => {
                    out.push('$');
                    rest = &candidate[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Check whether a string still contains any placeholder token
pub fn contains_token(text: &str) -> bool {
    TOKENS.iter().any(|token| text.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn expander() -> KeywordExpander {
        KeywordExpander {
            runtime_executable: "/usr/bin/java".to_string(),
            classpath: "/opt/app/lib/*".to_string(),
            hostname: "sn1".to_string(),
            location: "R0-SN1".to_string(),
            instance: 3,
            store_addresses: vec!["db1".to_string(), "db2".to_string()],
            log_config_file: "/etc/app/log.xml".to_string(),
            log_directory: "/var/log/app".to_string(),
        }
    }

    #[test]
    fn test_expands_invocation() {
        let out = expander().expand(
            "$JAVA -cp $UCSCLASSPATH -Dlog=$UCSLOG4JCONFIGURATIONFILE com.Adapter $VOLTIPADDRS $LCTN $HOSTNAME",
        );
        assert_eq!(
            out,
            "/usr/bin/java -cp /opt/app/lib/* -Dlog=/etc/app/log.xml com.Adapter db1,db2 R0-SN1 sn1"
        );
    }

    #[test]
    fn test_expands_log_file_path() {
        let out = expander().expand("$UCSLOGFILEDIRECTORY/Wlm-$LCTN-$INSTANCE.log");
        assert_eq!(out, "/var/log/app/Wlm-R0-SN1-3.log");
    }

    #[test]
    fn test_longer_token_wins_over_prefix() {
        let out = expander().expand("$UCSCLASSPATH:$CLASSPATH");
        assert_eq!(out, "/opt/app/lib/*:/opt/app/lib/*");
    }

    #[test]
    fn test_unknown_dollar_is_kept() {
        assert_eq!(expander().expand("cost $5 $HOME"), "cost $5 $HOME");
    }

    #[test]
    fn test_repeated_tokens_all_replaced() {
        let out = expander().expand("$INSTANCE-$INSTANCE-$INSTANCE");
        assert_eq!(out, "3-3-3");
    }

    #[test]
    fn test_tokens_inside_values_are_expanded() {
        let mut exp = expander();
        exp.log_directory = "/var/log/$LCTN".to_string();
        exp.hostname = "$LCTN-$INSTANCE".to_string();
        assert_eq!(
            exp.expand("$UCSLOGFILEDIRECTORY/$HOSTNAME.log"),
            "/var/log/R0-SN1/R0-SN1-3.log"
        );
    }

    #[test]
    fn test_self_referencing_value_stops_after_bound() {
        let mut exp = expander();
        exp.hostname = "x$HOSTNAME".to_string();
        let out = exp.expand("$HOSTNAME");
        assert_eq!(out, format!("{}$HOSTNAME", "x".repeat(MAX_EXPANSION_PASSES)));
    }

    proptest! {
        #[test]
        fn prop_no_token_survives(parts in prop::collection::vec(
            prop::sample::select(TOKENS.to_vec()), 0..8),
            filler in "[a-z /.-]{0,6}")
        {
            let template = parts.join(&filler);
            let out = expander().expand(&template);
            prop_assert!(!contains_token(&out));
        }

        #[test]
        fn prop_text_without_dollar_is_unchanged(text in "[^$]{0,40}") {
            prop_assert_eq!(expander().expand(&text), text);
        }
    }
}
