//! Tradeable pairs and the venue-specific name parsers.

use serde::{Deserialize, Serialize};

use super::event::Payload;
use crate::{ConfluenceError, Result};

/// A tradeable pair as listed by a venue.
///
/// `name` is always the canonical `BASE-QUOTE` form; `original_name` is
/// whatever the venue calls the pair on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub original_name: String,
    pub base_coin: String,
    pub quote_coin: String,
    /// Taker fee as a fraction (0.001 = 0.1 %).
    pub fee: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    /// Number of decimal places accepted for prices.
    pub price_precision: u32,
    /// Number of decimal places accepted for amounts.
    pub amount_precision: u32,
}

impl Symbol {
    /// Builds a symbol from its parsed parts with open limits.
    ///
    /// Adapters fill in fees, limits and precisions from venue metadata.
    #[must_use]
    pub fn new(parsed: ParsedSymbol, original_name: impl Into<String>) -> Self {
        Self {
            name: parsed.name,
            original_name: original_name.into(),
            base_coin: parsed.base,
            quote_coin: parsed.quote,
            fee: 0.0,
            min_price: 0.0,
            max_price: 0.0,
            min_amount: 0.0,
            max_amount: 0.0,
            price_precision: 8,
            amount_precision: 8,
        }
    }
}

impl Payload for Symbol {
    fn symbol(&self) -> &str {
        &self.name
    }
}

/// Result of parsing a venue-original pair name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSymbol {
    /// Canonical `BASE-QUOTE`.
    pub name: String,
    pub base: String,
    pub quote: String,
}

impl ParsedSymbol {
    fn from_parts(base: &str, quote: &str, aliases: &[(&str, &str)]) -> Self {
        let base = alias(base, aliases);
        let quote = alias(quote, aliases);
        Self {
            name: format!("{base}-{quote}"),
            base,
            quote,
        }
    }
}

fn alias(coin: &str, aliases: &[(&str, &str)]) -> String {
    let upper = coin.to_uppercase();
    aliases
        .iter()
        .find(|(from, _)| *from == upper)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or(upper)
}

/// How a venue glues base and quote together.
#[derive(Debug, Clone)]
enum Rule {
    /// `BASE<sep>QUOTE`, e.g. `ETH_BTC` or `XBT/USD`.
    Separator(char),
    /// `BASE<sep>QUOTE` when the separator is present, otherwise a fixed
    /// base width (`BTCUSD` → `BTC`, `USD`).
    SeparatorOrWidth(char, usize),
    /// `BASEQUOTE` with the quote taken as the longest matching suffix.
    QuoteSuffix(Vec<String>),
}

/// Converts venue-original pair names into canonical symbols.
#[derive(Debug, Clone)]
pub struct SymbolParser {
    rule: Rule,
    aliases: &'static [(&'static str, &'static str)],
}

impl SymbolParser {
    /// Parser for names split by `separator`.
    #[must_use]
    pub fn separator(separator: char) -> Self {
        Self {
            rule: Rule::Separator(separator),
            aliases: &[],
        }
    }

    /// Parser for names split by `separator`, falling back to a fixed
    /// base width when the separator is absent.
    #[must_use]
    pub fn separator_or_width(separator: char, base_width: usize) -> Self {
        Self {
            rule: Rule::SeparatorOrWidth(separator, base_width),
            aliases: &[],
        }
    }

    /// Parser for concatenated names whose quote is one of `quotes`.
    ///
    /// The longest matching suffix wins, so `BTCUSDT` with quotes
    /// `{USD, USDT}` yields `BTC-USDT`.
    #[must_use]
    pub fn quote_suffix<I, S>(quotes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut quotes: Vec<String> = quotes
            .into_iter()
            .map(|q| q.into().to_uppercase())
            .collect();
        quotes.sort_by_key(|q| std::cmp::Reverse(q.len()));
        Self {
            rule: Rule::QuoteSuffix(quotes),
            aliases: &[],
        }
    }

    /// Renames venue-specific coin codes (e.g. `XBT` → `BTC`).
    #[must_use]
    pub fn with_aliases(mut self, aliases: &'static [(&'static str, &'static str)]) -> Self {
        self.aliases = aliases;
        self
    }

    /// Parses a venue-original name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfluenceError::Symbol`] if the name does not follow the
    /// venue's convention or either side would be empty.
    pub fn parse(&self, original: &str) -> Result<ParsedSymbol> {
        let fail = || ConfluenceError::Symbol(original.to_string());
        let (base, quote) = match &self.rule {
            Rule::Separator(sep) => original.split_once(*sep).ok_or_else(fail)?,
            Rule::SeparatorOrWidth(sep, width) => match original.split_once(*sep) {
                Some(parts) => parts,
                None if original.len() > *width && original.is_char_boundary(*width) => {
                    original.split_at(*width)
                }
                None => return Err(fail()),
            },
            Rule::QuoteSuffix(quotes) => {
                if !original.is_ascii() {
                    return Err(fail());
                }
                let upper = original.to_ascii_uppercase();
                let quote = quotes
                    .iter()
                    .find(|q| upper.len() > q.len() && upper.ends_with(q.as_str()))
                    .ok_or_else(fail)?;
                original.split_at(original.len() - quote.len())
            }
        };

        if base.is_empty() || quote.is_empty() {
            return Err(fail());
        }

        Ok(ParsedSymbol::from_parts(base, quote, self.aliases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_suffix_wins() {
        let parser = SymbolParser::quote_suffix(["USDT", "BTC", "ETH", "BNB"]);
        let parsed = parser.parse("BNBUSDT").unwrap();
        assert_eq!(parsed.name, "BNB-USDT");
        assert_eq!(parsed.base, "BNB");
        assert_eq!(parsed.quote, "USDT");
    }

    #[test]
    fn suffix_prefers_longer_quote() {
        let parser = SymbolParser::quote_suffix(["USD", "USDT"]);
        assert_eq!(parser.parse("BTCUSDT").unwrap().name, "BTC-USDT");
        assert_eq!(parser.parse("BTCUSD").unwrap().name, "BTC-USD");
    }

    #[test]
    fn suffix_rejects_bare_quote() {
        let parser = SymbolParser::quote_suffix(["USDT"]);
        assert!(parser.parse("USDT").is_err());
        assert!(parser.parse("BTCEUR").is_err());
    }

    #[test]
    fn underscore_separator() {
        let parser = SymbolParser::separator('_');
        let parsed = parser.parse("ETH_BTC").unwrap();
        assert_eq!(parsed.name, "ETH-BTC");
        assert!(parser.parse("ETHBTC").is_err());
        assert!(parser.parse("_BTC").is_err());
    }

    #[test]
    fn aliases_rename_coins() {
        let parser = SymbolParser::separator('/').with_aliases(&[("XBT", "BTC"), ("XDG", "DOGE")]);
        assert_eq!(parser.parse("XBT/USD").unwrap().name, "BTC-USD");
        assert_eq!(parser.parse("XDG/EUR").unwrap().name, "DOGE-EUR");
    }

    #[test]
    fn fixed_width_fallback() {
        let parser = SymbolParser::separator_or_width(':', 3);
        assert_eq!(parser.parse("BTCUSD").unwrap().name, "BTC-USD");
        assert_eq!(parser.parse("TESTBTC:TESTUSD").unwrap().name, "TESTBTC-TESTUSD");
        assert!(parser.parse("BTC").is_err());
    }

    #[test]
    fn canonical_name_is_unique_per_original() {
        let parser = SymbolParser::quote_suffix(["USDT", "BTC"]);
        let a = parser.parse("ETHBTC").unwrap();
        let b = parser.parse("ETHBTC").unwrap();
        assert_eq!(a, b);
    }
}
