//! Statement classification and the destructive-statement denylist.
//!
//! The denylist is a convenience guard for the query console, not a security
//! boundary: it is plain pattern matching on lower-cased text and anything not
//! listed (e.g. `DELETE FROM patients WHERE 1 = 1`) still runs.

use std::sync::LazyLock;

use regex::Regex;

/// Kind of statement, from its leading keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Other(String),
    Empty,
}

impl StatementKind {
    /// Insert, update or delete: statements that change patient data.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }

    /// Upper-cased command name for summaries.
    pub fn command_name(&self) -> String {
        match self {
            StatementKind::Select => "SELECT".into(),
            StatementKind::Insert => "INSERT".into(),
            StatementKind::Update => "UPDATE".into(),
            StatementKind::Delete => "DELETE".into(),
            StatementKind::Create => "CREATE".into(),
            StatementKind::Drop => "DROP".into(),
            StatementKind::Alter => "ALTER".into(),
            StatementKind::Other(keyword) => keyword.to_uppercase(),
            StatementKind::Empty => "UNKNOWN".into(),
        }
    }
}

/// Replace `--` and `/* */` comments with a space. Quoted text is kept as is.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Strip comments, lower-case and collapse whitespace runs to single spaces.
pub fn normalize(sql: &str) -> String {
    strip_comments(sql)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn keyword_kind(keyword: &str) -> StatementKind {
    match keyword {
        "" => StatementKind::Empty,
        "select" => StatementKind::Select,
        "insert" | "replace" => StatementKind::Insert,
        "update" => StatementKind::Update,
        "delete" => StatementKind::Delete,
        "create" => StatementKind::Create,
        "drop" => StatementKind::Drop,
        "alter" => StatementKind::Alter,
        _ => StatementKind::Other(keyword.to_string()),
    }
}

/// Kind of the statement a `WITH` clause leads into: the first
/// select/insert/update/delete keyword outside parentheses and quotes.
fn cte_body_kind(normalized: &str) -> Option<StatementKind> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut word = String::new();

    let dml = |word: &str| {
        let kind = keyword_kind(word);
        matches!(
            kind,
            StatementKind::Select
                | StatementKind::Insert
                | StatementKind::Update
                | StatementKind::Delete
        )
        .then_some(kind)
    };

    for c in normalized.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' {
            if depth == 0 {
                word.push(c);
            }
            continue;
        }
        if let Some(kind) = dml(&word) {
            return Some(kind);
        }
        word.clear();
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '\'' | '"' | '`' => quote = Some(c),
            _ => {}
        }
    }
    dml(&word)
}

/// Classify a statement by its first keyword, looking past leading comments
/// and through `WITH` clauses.
pub fn classify(sql: &str) -> StatementKind {
    let normalized = normalize(sql);
    let statement = normalized.trim_start_matches(['(', ' ']);
    let keyword: String = statement
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    if keyword == "with" {
        return cte_body_kind(statement).unwrap_or(StatementKind::Other(keyword));
    }
    keyword_kind(&keyword)
}

/// A blocked statement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Destructive database operations are not allowed ({rule})")]
pub struct Denied {
    pub rule: &'static str,
}

struct DenyRule {
    name: &'static str,
    pattern: Regex,
    /// The rule does not apply when this also matches.
    unless: Option<Regex>,
}

impl DenyRule {
    fn new(name: &'static str, pattern: &str, unless: Option<&str>) -> Self {
        // Patterns are fixed literals below.
        Self {
            name,
            pattern: Regex::new(pattern).expect("valid deny pattern"),
            unless: unless.map(|u| Regex::new(u).expect("valid deny exception")),
        }
    }

    fn matches(&self, normalized: &str) -> bool {
        self.pattern.is_match(normalized)
            && !self
                .unless
                .as_ref()
                .is_some_and(|unless| unless.is_match(normalized))
    }
}

static DENYLIST: LazyLock<Vec<DenyRule>> = LazyLock::new(|| {
    vec![
        DenyRule::new(
            "schema drop",
            r"\bdrop (table|index|trigger|view|schema|database)\b",
            None,
        ),
        DenyRule::new("truncate", r"^truncate\b", None),
        DenyRule::new(
            "bulk delete",
            r"\bdelete from patients\b",
            Some(r"\bwhere\b"),
        ),
        DenyRule::new(
            "bulk update",
            r"\bupdate patients set\b",
            Some(r"\bwhere\b"),
        ),
        DenyRule::new("partial alter", r"^alter table\b", Some(r"\badd column\b")),
    ]
});

/// Check a statement against the denylist, returning its kind when allowed.
pub fn check(sql: &str) -> Result<StatementKind, Denied> {
    let normalized = normalize(sql);
    if let Some(rule) = DENYLIST.iter().find(|rule| rule.matches(&normalized)) {
        return Err(Denied { rule: rule.name });
    }
    Ok(classify(sql))
}
