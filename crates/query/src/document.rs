//! Query documents and query identity.
//!
//! Renders the request document a derived configuration is fetched with and
//! derives the `QueryKey` the registry deduplicates on. The key combines the
//! document text with the canonical form of the client-side settings, so two
//! consumers asking for the same data through the same path share one
//! registered query.

use crate::config::DerivedQueryConfig;
use crate::path::{AccessPath, PathArgument};
use alloc::format;
use alloc::string::String;
use core::fmt::{self, Write};
use core::hash::{Hash, Hasher};
use sluice_core::Value;

/// FNV-1a hasher used for query fingerprints.
#[derive(Default)]
struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self {
            state: Self::FNV_OFFSET,
        }
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= *byte as u64;
            self.state = self.state.wrapping_mul(Self::FNV_PRIME);
        }
    }
}

/// Computes the FNV-1a fingerprint of a query text.
pub fn fingerprint(text: &str) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(text.as_bytes());
    hasher.finish()
}

/// Identity of a registered query.
#[derive(Clone, Debug)]
pub struct QueryKey {
    text: String,
    fingerprint: u64,
}

impl QueryKey {
    /// Creates a key from its canonical text.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let fingerprint = fingerprint(&text);
        Self { text, fingerprint }
    }

    /// Builds the key of a derived configuration fetched through `path`.
    ///
    /// The principal is left out, so a query keeps its key across
    /// principal changes.
    pub fn for_query(config: &DerivedQueryConfig, path: &AccessPath) -> Self {
        let request = build_request(config, path, None, None);
        Self::new(format!("{}\n{}", request.document, config))
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[inline]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint && self.text == other.text
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fingerprint);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.fingerprint)
    }
}

/// A fetch handed to the query executor.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    /// Document text.
    pub document: String,
    /// Root field of the response holding the result.
    pub operation: String,
    /// Continuation token of a follow-up page.
    pub next_token: Option<String>,
}

/// Renders a literal argument value.
pub fn write_literal(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::String(s) => write_string(out, s),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_literal(out, item);
            }
            out.push(']');
        }
        Value::Entity(entity) => {
            out.push('{');
            for (i, (field, v)) in entity.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(field);
                out.push_str(": ");
                write_literal(out, v);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Renders the selection set of a configuration node, nested nodes included.
pub fn field_set(config: &DerivedQueryConfig) -> String {
    let mut out = String::new();
    if config.is_list() {
        out.push_str("items { ");
    }
    out.push_str(&config.entity_type().field_set());
    for (field, sub) in config.sub_keys() {
        out.push(' ');
        out.push_str(field);
        if sub.is_list() {
            let _ = write!(
                out,
                "(limit: {}, sortDirection: {})",
                sub.limit(),
                sub.sort_direction()
            );
        }
        out.push_str(" { ");
        out.push_str(&field_set(sub));
        out.push_str(" }");
    }
    if config.is_list() {
        out.push_str(" } nextToken");
    }
    out
}

/// Builds the request for a root configuration.
///
/// An owner path is rendered with the principal, or with a `$principal`
/// placeholder when none is given.
pub fn build_request(
    config: &DerivedQueryConfig,
    path: &AccessPath,
    principal: Option<&str>,
    next_token: Option<&str>,
) -> QueryRequest {
    let entity_type = config.entity_type();
    let fields = field_set(config);
    let mut document = String::new();

    if !config.is_list() {
        let operation = entity_type.get_operation();
        let _ = write!(document, "query Get{} {{ {}(id: ", entity_type.name(), operation);
        write_literal(&mut document, config.id().unwrap_or(&Value::Null));
        let _ = write!(document, ") {{ {} }} }}", fields);
        return QueryRequest {
            document,
            operation: operation.into(),
            next_token: None,
        };
    }

    let operation = path.operation();
    let _ = write!(document, "query List{} {{ {}", entity_type.name(), operation);
    let mut args = String::new();
    if let AccessPath::Index {
        partition_attribute,
        argument,
        descending,
        ..
    } = path
    {
        args.push_str(partition_attribute);
        args.push_str(": ");
        match (argument, principal) {
            (PathArgument::Value(v), _) => write_literal(&mut args, v),
            (PathArgument::Principal, Some(p)) => write_string(&mut args, p),
            (PathArgument::Principal, None) => args.push_str("$principal"),
        }
        if *descending {
            args.push_str(", sortDirection: DESC");
        }
    }
    if let Some(token) = next_token {
        if !args.is_empty() {
            args.push_str(", ");
        }
        args.push_str("nextToken: ");
        write_string(&mut args, token);
    }
    if !args.is_empty() {
        let _ = write!(document, "({})", args);
    }
    let _ = write!(document, " {{ {} }} }}", fields);

    QueryRequest {
        document,
        operation: operation.into(),
        next_token: next_token.map(String::from),
    }
}
