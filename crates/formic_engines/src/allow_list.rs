#![forbid(unsafe_code)]

/// Sentinel that admits any syntactically valid email.
pub const ANYONE: &str = "anyone";

/// Who may sign in as an owner/admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowList {
    Anyone,
    /// Exact, case-sensitive matches.
    Emails(Vec<String>),
}

impl AllowList {
    /// Parses the configured string: either the `anyone` sentinel or a comma-separated list.
    /// Surrounding whitespace and empty items are dropped.
    pub fn parse(raw: &str) -> Self {
        if raw.trim() == ANYONE {
            return Self::Anyone;
        }
        Self::Emails(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn permits(&self, email: &str) -> bool {
        match self {
            Self::Anyone => is_plausible_email(email),
            Self::Emails(allowed) => allowed.iter().any(|candidate| candidate == email),
        }
    }
}

/// One `@`, with something on both sides and no whitespace.
fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
}
