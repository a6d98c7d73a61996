//! Email addresses as they appear in the searchable address column.

/// A decoded email address.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Build an address from its parts, trimming surrounding whitespace and quotes.
    pub fn new(display_name: impl AsRef<str>, address: impl AsRef<str>) -> Self {
        Self {
            display_name: strip_quotes(display_name.as_ref()),
            address: address.as_ref().trim().to_string(),
        }
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else if self.address.is_empty() {
            self.display_name.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }

    /// Whether neither a name nor an address is present.
    pub fn is_empty(&self) -> bool {
        self.display_name.is_empty() && self.address.is_empty()
    }
}

/// Join addresses into the comma-separated text stored in the index.
///
/// Empty addresses are skipped so that missing headers leave no stray commas.
pub fn format_list<'a>(addresses: impl IntoIterator<Item = &'a EmailAddress>) -> String {
    addresses
        .into_iter()
        .filter(|a| !a.is_empty())
        .map(EmailAddress::display)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
