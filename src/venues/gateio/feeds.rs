//! Gate.io public market data, polled over REST only.
//!
//! No feed has an endpoint, so groups never dial; the snapshot ticker is
//! the only source of events.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::wire::{Candlestick, CurrencyPair, OrderBook as WireBook, Ticker, TradeRow, candle};
use crate::mapping;
use crate::models::{Candle, DataKind, OrderBook, Quote, Side, Symbol, SymbolParser, Trade};
use crate::provider::SymbolSource;
use crate::stream::{Feed, Frame, FrameContext, Keyed, keyed};
use crate::transport::HttpHelper;
use crate::Result;

pub(super) const VENUE: &str = "gateio";

/// Largest book `/spot/order_book` returns.
const MAX_BOOK_LIMIT: usize = 100;

/// Candle intervals by length in seconds.
const INTERVALS: [(u64, &str); 11] = [
    (10, "10s"),
    (60, "1m"),
    (300, "5m"),
    (900, "15m"),
    (1800, "30m"),
    (3600, "1h"),
    (14_400, "4h"),
    (28_800, "8h"),
    (86_400, "1d"),
    (604_800, "7d"),
    (2_592_000, "30d"),
];

pub(super) fn interval(seconds: u64) -> Option<&'static str> {
    INTERVALS
        .iter()
        .find(|(s, _)| *s == seconds)
        .map(|(_, name)| *name)
}

/// `/spot/currency_pairs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pairs;

#[async_trait]
impl SymbolSource for Pairs {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn symbols(&self, http: &HttpHelper) -> Result<Vec<Symbol>> {
        let pairs: Vec<CurrencyPair> = http.get("/spot/currency_pairs", &[]).await?;
        let parser = SymbolParser::separator('_');

        let mut symbols: Vec<Symbol> = pairs
            .iter()
            .filter(|p| p.trade_status == "tradable")
            .filter_map(|p| match pair_symbol(&parser, p) {
                Ok(symbol) => Some(symbol),
                Err(e) => {
                    debug!(venue = VENUE, pair = p.id, error = %e, "Skipping pair");
                    None
                }
            })
            .collect();
        symbols.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(symbols)
    }
}

fn pair_symbol(parser: &SymbolParser, pair: &CurrencyPair) -> Result<Symbol> {
    let mut symbol = Symbol::new(parser.parse(&pair.id)?, pair.id.clone());
    symbol.fee = mapping::number("fee", &pair.fee)? / 100.0;
    symbol.price_precision = pair.precision;
    symbol.amount_precision = pair.amount_precision;
    if let Some(min) = &pair.min_base_amount {
        symbol.min_amount = mapping::number("min_base_amount", min)?;
    }
    if let Some(max) = &pair.max_base_amount {
        symbol.max_amount = mapping::number("max_base_amount", max)?;
    }
    Ok(symbol)
}

/// Order books from `/spot/order_book`.
#[derive(Debug, Clone)]
pub struct BookFeed {
    pub(super) depth: usize,
}

#[async_trait]
impl Feed for BookFeed {
    type Item = OrderBook;

    fn venue(&self) -> &'static str {
        VENUE
    }

    fn kind(&self) -> DataKind {
        DataKind::Book
    }

    fn shard_limit(&self) -> usize {
        100
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        None
    }

    fn subscribe_frames(&self, _symbols: &[Symbol]) -> Vec<Value> {
        Vec::new()
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<OrderBook>>> {
        let limit = self.depth.min(MAX_BOOK_LIMIT);
        let mut books = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let wire: WireBook = http
                .get(
                    "/spot/order_book",
                    &[
                        ("currency_pair", symbol.original_name.clone()),
                        ("limit", limit.to_string()),
                    ],
                )
                .await?;
            let mut book = OrderBook::new(symbol.name.clone());
            book.buy = mapping::levels(&symbol.name, Side::Buy, &wire.bids);
            book.sell = mapping::levels(&symbol.name, Side::Sell, &wire.asks);
            books.push(book);
        }
        Ok(keyed(books))
    }

    fn decode(&self, _frame: &[u8], _ctx: &FrameContext) -> Result<Frame<OrderBook>> {
        Ok(Frame::Skip)
    }
}

/// Recent trades from `/spot/trades`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradesFeed;

fn trade(symbol: &Symbol, row: &TradeRow) -> Result<Trade> {
    let millis = mapping::number("create_time_ms", &row.create_time_ms)?;
    Ok(Trade {
        id: row.id.clone(),
        order_id: None,
        symbol: symbol.name.clone(),
        side: if row.side == "sell" { Side::Sell } else { Side::Buy },
        price: mapping::number("price", &row.price)?,
        amount: mapping::number("amount", &row.amount)?,
        fee: None,
        timestamp: millis as i64,
    })
}

#[async_trait]
impl Feed for TradesFeed {
    type Item = Vec<Trade>;

    fn venue(&self) -> &'static str {
        VENUE
    }

    fn kind(&self) -> DataKind {
        DataKind::Trades
    }

    fn shard_limit(&self) -> usize {
        10
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        None
    }

    fn subscribe_frames(&self, _symbols: &[Symbol]) -> Vec<Value> {
        Vec::new()
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Vec<Trade>>>> {
        let mut groups = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let rows: Vec<TradeRow> = http
                .get("/spot/trades", &[("currency_pair", symbol.original_name.clone())])
                .await?;
            let trades = rows
                .iter()
                .filter_map(|row| match trade(symbol, row) {
                    Ok(trade) => Some(trade),
                    Err(e) => {
                        warn!(venue = VENUE, id = row.id, error = %e, "Dropping trade");
                        None
                    }
                })
                .collect();
            groups.push((symbol.name.clone(), trades));
        }
        Ok(groups)
    }

    fn decode(&self, _frame: &[u8], _ctx: &FrameContext) -> Result<Frame<Vec<Trade>>> {
        Ok(Frame::Skip)
    }
}

/// 24h tickers from `/spot/tickers`, one request for the whole group.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotesFeed;

fn quote(symbol: &Symbol, ticker: &Ticker) -> Result<Quote> {
    let last = mapping::number("last", &ticker.last)?;
    let change_percent = mapping::number("change_percentage", &ticker.change_percentage)?;
    // last = open * (1 + pct/100)
    let open = last / (1.0 + change_percent / 100.0);
    Ok(Quote {
        symbol: symbol.name.clone(),
        last,
        high: mapping::number("high_24h", &ticker.high_24h)?,
        low: mapping::number("low_24h", &ticker.low_24h)?,
        change: if open.is_finite() { last - open } else { 0.0 },
        change_percent,
        base_volume: mapping::number("base_volume", &ticker.base_volume)?,
        quote_volume: mapping::number("quote_volume", &ticker.quote_volume)?,
    })
}

#[async_trait]
impl Feed for QuotesFeed {
    type Item = Quote;

    fn venue(&self) -> &'static str {
        VENUE
    }

    fn kind(&self) -> DataKind {
        DataKind::Quotes
    }

    fn shard_limit(&self) -> usize {
        100
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        None
    }

    fn subscribe_frames(&self, _symbols: &[Symbol]) -> Vec<Value> {
        Vec::new()
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Quote>>> {
        let tickers: Vec<Ticker> = http.get("/spot/tickers", &[]).await?;
        let mut quotes = Vec::with_capacity(ctx.symbols().len());
        for ticker in &tickers {
            let Some(symbol) = ctx.by_original(&ticker.currency_pair) else {
                continue;
            };
            match quote(symbol, ticker) {
                Ok(q) => quotes.push(q),
                Err(e) => warn!(venue = VENUE, pair = ticker.currency_pair, error = %e, "Dropping ticker"),
            }
        }
        Ok(keyed(quotes))
    }

    fn decode(&self, _frame: &[u8], _ctx: &FrameContext) -> Result<Frame<Quote>> {
        Ok(Frame::Skip)
    }
}

/// Bars from `/spot/candlesticks`.
#[derive(Debug, Clone)]
pub struct CandlesFeed {
    pub(super) interval: &'static str,
    pub(super) seconds: u64,
}

impl CandlesFeed {
    fn candle(&self, symbol: &Symbol, row: &Candlestick) -> Result<Candle> {
        let number = |index: usize, name: &'static str| -> Result<f64> {
            mapping::number(name, row.field(index, name)?)
        };
        Ok(Candle {
            symbol: symbol.name.clone(),
            timestamp: mapping::seconds_millis("t", row.field(candle::TIME, "t")?)?,
            discretization: self.seconds,
            open: number(candle::OPEN, "open")?,
            high: number(candle::HIGH, "high")?,
            low: number(candle::LOW, "low")?,
            close: number(candle::CLOSE, "close")?,
            volume: number(candle::BASE_VOLUME, "base_volume")?,
        })
    }
}

#[async_trait]
impl Feed for CandlesFeed {
    type Item = Vec<Candle>;

    fn venue(&self) -> &'static str {
        VENUE
    }

    fn kind(&self) -> DataKind {
        DataKind::Candles
    }

    fn shard_limit(&self) -> usize {
        10
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        None
    }

    fn subscribe_frames(&self, _symbols: &[Symbol]) -> Vec<Value> {
        Vec::new()
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Vec<Candle>>>> {
        let mut groups = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let rows: Vec<Candlestick> = http
                .get(
                    "/spot/candlesticks",
                    &[
                        ("currency_pair", symbol.original_name.clone()),
                        ("interval", self.interval.to_string()),
                    ],
                )
                .await?;
            let candles = rows
                .iter()
                .filter_map(|row| self.candle(symbol, row).ok())
                .collect();
            groups.push((symbol.name.clone(), candles));
        }
        Ok(groups)
    }

    fn decode(&self, _frame: &[u8], _ctx: &FrameContext) -> Result<Frame<Vec<Candle>>> {
        Ok(Frame::Skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_btc() -> Symbol {
        Symbol::new(SymbolParser::separator('_').parse("ETH_BTC").unwrap(), "ETH_BTC")
    }

    #[test]
    fn pair_metadata_maps_onto_symbol() {
        let pair: CurrencyPair = serde_json::from_str(
            r#"{"id":"ETH_BTC","base":"ETH","quote":"BTC","fee":"0.2","min_base_amount":"0.001",
                "min_quote_amount":"1.0","amount_precision":3,"precision":6,"trade_status":"tradable",
                "sell_start":1516378650,"buy_start":1516378650}"#,
        )
        .unwrap();
        let symbol = pair_symbol(&SymbolParser::separator('_'), &pair).unwrap();
        assert_eq!(symbol.name, "ETH-BTC");
        assert!((symbol.fee - 0.002).abs() < 1e-12);
        assert_eq!(symbol.min_amount, 0.001);
        assert_eq!(symbol.price_precision, 6);
    }

    #[test]
    fn ticker_change_derives_from_percentage() {
        let ticker: Ticker = serde_json::from_str(
            r#"{"currency_pair":"ETH_BTC","last":"110","lowest_ask":"111","highest_bid":"109",
                "change_percentage":"10","base_volume":"5","quote_volume":"550",
                "high_24h":"120","low_24h":"95"}"#,
        )
        .unwrap();
        let quote = quote(&eth_btc(), &ticker).unwrap();
        assert!((quote.change - 10.0).abs() < 1e-9);
        assert_eq!(quote.quote_volume, 550.0);
    }

    #[test]
    fn candle_rows_are_reordered() {
        let feed = CandlesFeed { interval: "1m", seconds: 60 };
        let row: Candlestick = serde_json::from_str(
            r#"["1539852480","971519.677","0.0021724","0.0021922","0.0021720","0.0021737","440.5","true"]"#,
        )
        .unwrap();
        let candle = feed.candle(&eth_btc(), &row).unwrap();
        assert_eq!(candle.timestamp, 1_539_852_480_000);
        assert!((candle.open - 0.0021737).abs() < 1e-12);
        assert!((candle.close - 0.0021724).abs() < 1e-12);
        assert!((candle.low - 0.002172).abs() < 1e-12);
        assert_eq!(candle.volume, 440.5);
    }

    #[test]
    fn trade_millis_drop_fraction() {
        let row: TradeRow = serde_json::from_str(
            r#"{"id":"1232893232","create_time":"1548000000","create_time_ms":"1548000000123.456",
                "currency_pair":"ETH_BTC","side":"sell","role":"taker","amount":"0.15","price":"0.03"}"#,
        )
        .unwrap();
        let trade = trade(&eth_btc(), &row).unwrap();
        assert_eq!(trade.timestamp, 1_548_000_000_123);
        assert_eq!(trade.side, Side::Sell);
    }

    #[test]
    fn feeds_never_dial() {
        assert!(BookFeed { depth: 10 }.endpoint(&[eth_btc()]).is_none());
        assert!(QuotesFeed.subscribe_frames(&[eth_btc()]).is_empty());
    }
}
