/// Symbols that were renamed upstream and must be looked up under their new ticker.
pub const ALIASES: &[(&str, &str)] = &[("FVAC", "MP")];

/// Market qualifier preferred when the catalog offers several listings.
pub const DEFAULT_QUALIFIER: &str = "_US_EQ";

pub fn normalize_input(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Returns the alias target for `symbol`, if any. Input must already be normalized.
pub fn alias_target(symbol: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(from, _)| *from == symbol)
        .map(|(_, to)| *to)
}

pub fn apply_alias(symbol: &str) -> String {
    alias_target(symbol)
        .map(str::to_string)
        .unwrap_or_else(|| symbol.to_string())
}

/// A qualified identifier carries a market suffix such as `_US_EQ`.
pub fn is_qualified(symbol: &str) -> bool {
    symbol.contains('_')
}

/// Strip any market qualifier: `AAPL_US_EQ` becomes `AAPL`.
pub fn base_symbol(symbol: &str) -> &str {
    match symbol.find('_') {
        Some(idx) => &symbol[..idx],
        None => symbol,
    }
}

/// Normalize, strip the qualifier and resolve aliases, yielding the cache key.
pub fn canonical_symbol(raw: &str) -> String {
    let normalized = normalize_input(raw);
    apply_alias(base_symbol(&normalized))
}

pub fn with_default_qualifier(base: &str) -> String {
    format!("{base}{DEFAULT_QUALIFIER}")
}
