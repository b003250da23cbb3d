use crate::config::AddressConfig;

/// Classification of a receiver/sender string. Every address maps to
/// exactly one variant; `Unroutable` is an explicit outcome, never a
/// silent drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// The coordinator's own identifier.
    Coordinator,
    /// A logical tab; the payload is the name with the tab prefix
    /// stripped, kept verbatim (nested sub-namespaces included).
    Tab(String),
    /// The external native process, by fixed id or namespace prefix.
    ExternalHost,
    Unroutable,
}

/// The address literals consumed at the boundary. All matches are
/// case-sensitive exact/prefix matches.
#[derive(Debug, Clone)]
pub struct AddressBook {
    self_id: String,
    tab_prefix: String,
    host_id: String,
    host_prefix: String,
}

impl AddressBook {
    pub fn new(self_id: &str, tab_prefix: &str, host_id: &str, host_prefix: &str) -> Self {
        Self {
            self_id: self_id.to_string(),
            tab_prefix: tab_prefix.to_string(),
            host_id: host_id.to_string(),
            host_prefix: host_prefix.to_string(),
        }
    }

    pub fn from_config(config: &AddressConfig) -> Self {
        Self::new(
            &config.self_id,
            &config.tab_prefix,
            &config.host_id,
            &config.host_prefix,
        )
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn tab_prefix(&self) -> &str {
        &self.tab_prefix
    }

    pub fn classify(&self, address: &str) -> Address {
        if address == self.self_id {
            Address::Coordinator
        } else if let Some(name) = address.strip_prefix(self.tab_prefix.as_str()) {
            Address::Tab(name.to_string())
        } else if address == self.host_id || address.starts_with(self.host_prefix.as_str()) {
            Address::ExternalHost
        } else {
            Address::Unroutable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> AddressBook {
        AddressBook::new("tabwire/coordinator", "tab/", "com.tabwire.host", "Protocols/")
    }

    #[test]
    fn test_classify_coordinator() {
        assert_eq!(book().classify("tabwire/coordinator"), Address::Coordinator);
    }

    #[test]
    fn test_classify_tabs() {
        assert_eq!(
            book().classify("tab/Writer"),
            Address::Tab("Writer".to_string())
        );
        // Nested sub-namespaces survive verbatim.
        assert_eq!(
            book().classify("tab/gpt/Problem Solver"),
            Address::Tab("gpt/Problem Solver".to_string())
        );
        // Bare prefix classifies as a tab with an empty name.
        assert_eq!(book().classify("tab/"), Address::Tab(String::new()));
    }

    #[test]
    fn test_classify_external_host() {
        assert_eq!(book().classify("com.tabwire.host"), Address::ExternalHost);
        assert_eq!(book().classify("Protocols/summarize"), Address::ExternalHost);
        assert_eq!(
            book().classify("Protocols/analysis/related"),
            Address::ExternalHost
        );
    }

    #[test]
    fn test_classify_unroutable() {
        assert_eq!(book().classify(""), Address::Unroutable);
        assert_eq!(book().classify("Tab/Writer"), Address::Unroutable);
        assert_eq!(book().classify("protocols/x"), Address::Unroutable);
        assert_eq!(book().classify("popup/main"), Address::Unroutable);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let book = book();
        for addr in ["tab/Writer", "Protocols/x", "tabwire/coordinator", "nope"] {
            assert_eq!(book.classify(addr), book.classify(addr));
        }
    }

    #[test]
    fn test_rule_order_self_wins_over_prefixes() {
        // A coordinator id that happens to live under the tab namespace
        // must still classify as Coordinator.
        let book = AddressBook::new("tab/self", "tab/", "com.tabwire.host", "Protocols/");
        assert_eq!(book.classify("tab/self"), Address::Coordinator);
        assert_eq!(book.classify("tab/other"), Address::Tab("other".to_string()));
    }
}
