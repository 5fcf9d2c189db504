//! Bitfinex public market data.
//!
//! One socket multiplexes up to 25 channels. Frames carry only the
//! channel id, so every `subscribed` ack is recorded in the session's
//! [`Subscriptions`](crate::stream::Subscriptions) and data frames are
//! routed through it.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::wire::{
    BookEntry, CandleEntry, ChannelData, Event, INFO_MAINTENANCE_END, INFO_MAINTENANCE_START,
    INFO_RECONNECT, PairInfo, RestTickerEntry, TickerEntry, TradeEntry, channel_data, rows,
};
use crate::models::{Candle, DataKind, Order, OrderBook, Quote, Side, Symbol, SymbolParser, Trade};
use crate::provider::SymbolSource;
use crate::stream::{Feed, Frame, FrameContext, Keyed, keyed};
use crate::transport::HttpHelper;
use crate::{ConfluenceError, Result};

pub(super) const VENUE: &str = "bitfinex";

/// Channels per connection.
const SHARD_LIMIT: usize = 25;

/// Rows requested for trade and candle snapshots.
const HISTORY_LIMIT: usize = 120;

/// Book lengths accepted for precision `P0`.
const BOOK_LENGTHS: [usize; 4] = [1, 25, 100, 250];

pub(super) const ALIASES: &[(&str, &str)] = &[("UST", "USDT")];

/// Bitfinex taker fee for the lowest volume tier.
const TAKER_FEE: f64 = 0.002;

pub(super) fn parser() -> SymbolParser {
    SymbolParser::separator_or_width(':', 3).with_aliases(ALIASES)
}

/// Trading symbol on the wire (`tBTCUSD`).
pub(super) fn wire_symbol(symbol: &Symbol) -> String {
    format!("t{}", symbol.original_name)
}

/// Finds the symbol of a wire name, with or without the `t` prefix.
pub(super) fn by_wire_symbol<'a>(ctx: &'a FrameContext, wire: &str) -> Option<&'a Symbol> {
    ctx.by_original(wire.strip_prefix('t').unwrap_or(wire))
}

/// `conf/pub:info:pair`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pairs;

#[async_trait]
impl SymbolSource for Pairs {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn symbols(&self, http: &HttpHelper) -> Result<Vec<Symbol>> {
        let mut response: Vec<Vec<PairInfo>> = http.get("/v2/conf/pub:info:pair", &[]).await?;
        if response.is_empty() {
            return Ok(Vec::new());
        }
        let parser = parser();

        let mut symbols: Vec<Symbol> = response
            .swap_remove(0)
            .into_iter()
            .filter_map(|info| match parser.parse(&info.0) {
                Ok(parsed) => {
                    let mut symbol = Symbol::new(parsed, info.0.clone());
                    symbol.fee = TAKER_FEE;
                    symbol.min_amount = info.number(3).unwrap_or_default();
                    symbol.max_amount = info.number(4).unwrap_or_default();
                    Some(symbol)
                }
                Err(e) => {
                    debug!(venue = VENUE, pair = info.0, error = %e, "Skipping pair");
                    None
                }
            })
            .collect();
        symbols.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(symbols)
    }
}

fn ping() -> String {
    json!({ "event": "ping", "cid": crate::auth::timestamp_millis() }).to_string()
}

/// Handles a control event; records channel ids from subscribe acks.
fn on_event<T>(event: Event, ctx: &FrameContext) -> Frame<T> {
    match event {
        Event::Subscribed {
            channel,
            chan_id,
            symbol,
            key,
        } => {
            // Candle keys look like `trade:1m:tBTCUSD`.
            let wire = symbol.or_else(|| key.and_then(|k| k.splitn(3, ':').nth(2).map(str::to_string)));
            match wire.as_deref().and_then(|w| by_wire_symbol(ctx, w)) {
                Some(found) => {
                    debug!(venue = VENUE, channel, channel_id = chan_id, symbol = found.name, "Subscribed");
                    ctx.subs().add(chan_id, found.name.clone(), channel);
                }
                None => warn!(venue = VENUE, channel, channel_id = chan_id, ?wire, "Ack for unknown symbol"),
            }
            Frame::Skip
        }
        Event::Info {
            code: Some(code @ (INFO_RECONNECT | INFO_MAINTENANCE_END)),
            msg,
            ..
        } => Frame::Stopping(ConfluenceError::VenueStopping {
            code,
            message: msg.unwrap_or_default(),
        }),
        Event::Info {
            code: Some(INFO_MAINTENANCE_START),
            ..
        } => {
            warn!(venue = VENUE, "Maintenance started");
            Frame::Skip
        }
        Event::Info { version, .. } => {
            match version {
                Some(2) => info!(venue = VENUE, "Connected"),
                Some(v) => warn!(venue = VENUE, version = v, "Unexpected API version"),
                None => {}
            }
            Frame::Skip
        }
        Event::Error { code, msg } => {
            warn!(venue = VENUE, ?code, msg = msg.unwrap_or_default(), "Subscription rejected");
            Frame::Skip
        }
        Event::Pong { .. } | Event::Other => Frame::Skip,
    }
}

/// Routes a frame to `map` with the canonical symbol of its channel.
fn decode_channel<T>(
    frame: &[u8],
    ctx: &FrameContext,
    channel: &str,
    map: impl FnOnce(&str, ChannelData) -> Result<Frame<T>>,
) -> Result<Frame<T>> {
    let value: Value = serde_json::from_slice(frame)?;
    let items = match value {
        Value::Array(items) => items,
        event @ Value::Object(_) => return Ok(on_event(serde_json::from_value(event)?, ctx)),
        _ => return Ok(Frame::Skip),
    };

    let (id, data) = channel_data(items)?;
    if matches!(data, ChannelData::Heartbeat | ChannelData::Ignored) {
        return Ok(Frame::Skip);
    }
    let Some(subscribed) = ctx.subs().get(id) else {
        debug!(venue = VENUE, channel_id = id, "Frame for unknown channel");
        return Ok(Frame::Skip);
    };
    if subscribed.name != channel {
        return Ok(Frame::Skip);
    }
    map(&subscribed.symbol, data)
}

fn level(symbol: &str, entry: BookEntry) -> Order {
    let BookEntry(price, count, amount) = entry;
    let side = if amount > 0.0 { Side::Buy } else { Side::Sell };
    let order = Order::new(symbol, side, price, amount.abs()).with_count(count);
    if count == 0 { order.removed() } else { order }
}

fn book(symbol: &str, entries: impl IntoIterator<Item = BookEntry>) -> OrderBook {
    let mut book = OrderBook::new(symbol);
    for entry in entries {
        book.push(level(symbol, entry));
    }
    book
}

/// Raw order books (`P0`).
#[derive(Debug, Clone)]
pub struct BookFeed {
    pub(super) ws_url: String,
    pub(super) depth: usize,
}

impl BookFeed {
    fn length(&self) -> usize {
        BOOK_LENGTHS
            .into_iter()
            .find(|l| *l >= self.depth)
            .unwrap_or(BOOK_LENGTHS[BOOK_LENGTHS.len() - 1])
    }
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
        SHARD_LIMIT
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        Some(self.ws_url.clone())
    }

    fn ping_message(&self) -> Option<String> {
        Some(ping())
    }

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        let len = self.length().to_string();
        symbols
            .iter()
            .map(|s| {
                json!({
                    "event": "subscribe",
                    "channel": "book",
                    "symbol": wire_symbol(s),
                    "prec": "P0",
                    "len": len,
                })
            })
            .collect()
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<OrderBook>>> {
        let mut books = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let raw: Vec<Value> = http
                .get(
                    &format!("/v2/book/{}/P0", wire_symbol(symbol)),
                    &[("len", self.length().to_string())],
                )
                .await?;
            books.push(book(&symbol.name, rows::<BookEntry>(raw)));
        }
        Ok(keyed(books))
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<OrderBook>> {
        decode_channel(frame, ctx, "book", |symbol, data| match data {
            ChannelData::Snapshot(raw) => Ok(Frame::Snapshot(keyed([book(symbol, rows::<BookEntry>(raw))]))),
            ChannelData::Update(row) => {
                let entry: BookEntry = serde_json::from_value(row)?;
                Ok(Frame::Update(vec![book(symbol, [entry])]))
            }
            _ => Ok(Frame::Skip),
        })
    }
}

fn trade(symbol: &str, entry: TradeEntry) -> Trade {
    let TradeEntry(id, mts, amount, price) = entry;
    Trade {
        id: id.to_string(),
        order_id: None,
        symbol: symbol.to_string(),
        side: if amount > 0.0 { Side::Buy } else { Side::Sell },
        price,
        amount: amount.abs(),
        fee: None,
        timestamp: mts,
    }
}

/// Oldest first, remembering the newest id for dedupe.
fn trade_history(symbol: &str, mut entries: Vec<TradeEntry>, ctx: &FrameContext) -> Vec<Trade> {
    entries.sort_by_key(|e| (e.1, e.0));
    if let Some(last) = entries.iter().map(|e| e.0).max() {
        ctx.state().set(symbol, last);
    }
    entries.into_iter().map(|e| trade(symbol, e)).collect()
}

/// Public trades.
#[derive(Debug, Clone)]
pub struct TradesFeed {
    pub(super) ws_url: String,
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
        SHARD_LIMIT
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        Some(self.ws_url.clone())
    }

    fn ping_message(&self) -> Option<String> {
        Some(ping())
    }

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        symbols
            .iter()
            .map(|s| json!({ "event": "subscribe", "channel": "trades", "symbol": wire_symbol(s) }))
            .collect()
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Vec<Trade>>>> {
        let mut groups = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let raw: Vec<Value> = http
                .get(
                    &format!("/v2/trades/{}/hist", wire_symbol(symbol)),
                    &[("limit", HISTORY_LIMIT.to_string())],
                )
                .await?;
            groups.push((symbol.name.clone(), trade_history(&symbol.name, rows(raw), ctx)));
        }
        Ok(groups)
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<Vec<Trade>>> {
        decode_channel(frame, ctx, "trades", |symbol, data| match data {
            ChannelData::Snapshot(raw) => {
                let trades = trade_history(symbol, rows(raw), ctx);
                Ok(Frame::Snapshot(vec![(symbol.to_string(), trades)]))
            }
            ChannelData::TradeExecuted(row) => {
                let entry: TradeEntry = serde_json::from_value(row)?;
                if !ctx.state().advance(symbol, entry.0) {
                    return Ok(Frame::Skip);
                }
                Ok(Frame::Update(vec![vec![trade(symbol, entry)]]))
            }
            _ => Ok(Frame::Skip),
        })
    }
}

fn quote(symbol: &str, ticker: TickerEntry) -> Quote {
    let TickerEntry(_, _, _, _, change, relative, last, volume, high, low) = ticker;
    Quote {
        symbol: symbol.to_string(),
        last,
        high,
        low,
        change,
        change_percent: relative * 100.0,
        base_volume: volume,
        quote_volume: volume * last,
    }
}

/// Tickers; every frame is complete and emitted as a snapshot.
#[derive(Debug, Clone)]
pub struct QuotesFeed {
    pub(super) ws_url: String,
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
        SHARD_LIMIT
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        Some(self.ws_url.clone())
    }

    fn ping_message(&self) -> Option<String> {
        Some(ping())
    }

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        symbols
            .iter()
            .map(|s| json!({ "event": "subscribe", "channel": "ticker", "symbol": wire_symbol(s) }))
            .collect()
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Quote>>> {
        let wire: Vec<String> = ctx.symbols().iter().map(wire_symbol).collect();
        let raw: Vec<Value> = http
            .get("/v2/tickers", &[("symbols", wire.join(","))])
            .await?;
        Ok(keyed(rows::<RestTickerEntry>(raw).iter().filter_map(|entry| {
            let symbol = by_wire_symbol(ctx, &entry.0)?;
            Some(quote(&symbol.name, entry.ticker()))
        })))
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<Quote>> {
        decode_channel(frame, ctx, "ticker", |symbol, data| match data {
            ChannelData::Update(row) => {
                let ticker: TickerEntry = serde_json::from_value(row)?;
                Ok(Frame::Snapshot(keyed([quote(symbol, ticker)])))
            }
            _ => Ok(Frame::Skip),
        })
    }
}

/// Candle timeframe names by bar length in seconds.
const TIMEFRAMES: [(u64, &str); 9] = [
    (60, "1m"),
    (300, "5m"),
    (900, "15m"),
    (1800, "30m"),
    (3600, "1h"),
    (10_800, "3h"),
    (21_600, "6h"),
    (43_200, "12h"),
    (86_400, "1D"),
];

pub(super) fn timeframe(seconds: u64) -> Option<&'static str> {
    TIMEFRAMES
        .iter()
        .find(|(s, _)| *s == seconds)
        .map(|(_, name)| *name)
}

/// OHLCV candles.
#[derive(Debug, Clone)]
pub struct CandlesFeed {
    pub(super) ws_url: String,
    pub(super) timeframe: &'static str,
    pub(super) seconds: u64,
}

impl CandlesFeed {
    fn key(&self, symbol: &Symbol) -> String {
        format!("trade:{}:{}", self.timeframe, wire_symbol(symbol))
    }

    fn candle(&self, symbol: &str, entry: CandleEntry) -> Candle {
        let CandleEntry(mts, open, close, high, low, volume) = entry;
        Candle {
            symbol: symbol.to_string(),
            timestamp: mts,
            discretization: self.seconds,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn history(&self, symbol: &str, mut entries: Vec<CandleEntry>) -> Vec<Candle> {
        entries.sort_by_key(|e| e.0);
        entries.into_iter().map(|e| self.candle(symbol, e)).collect()
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
        SHARD_LIMIT
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        Some(self.ws_url.clone())
    }

    fn ping_message(&self) -> Option<String> {
        Some(ping())
    }

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        symbols
            .iter()
            .map(|s| json!({ "event": "subscribe", "channel": "candles", "key": self.key(s) }))
            .collect()
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Vec<Candle>>>> {
        let mut groups = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let raw: Vec<Value> = http
                .get(
                    &format!("/v2/candles/{}/hist", self.key(symbol)),
                    &[("limit", HISTORY_LIMIT.to_string())],
                )
                .await?;
            groups.push((symbol.name.clone(), self.history(&symbol.name, rows(raw))));
        }
        Ok(groups)
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<Vec<Candle>>> {
        decode_channel(frame, ctx, "candles", |symbol, data| match data {
            ChannelData::Snapshot(raw) => {
                Ok(Frame::Snapshot(vec![(symbol.to_string(), self.history(symbol, rows(raw)))]))
            }
            ChannelData::Update(row) => {
                let entry: CandleEntry = serde_json::from_value(row)?;
                Ok(Frame::Update(vec![vec![self.candle(symbol, entry)]]))
            }
            _ => Ok(Frame::Skip),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(original: &str) -> Symbol {
        Symbol::new(parser().parse(original).unwrap(), original)
    }

    fn ctx() -> FrameContext {
        FrameContext::new(vec![symbol("BTCUSD"), symbol("ETHUST")].into())
    }

    #[test]
    fn pair_names_parse() {
        assert_eq!(symbol("BTCUSD").name, "BTC-USD");
        assert_eq!(symbol("ETHUST").name, "ETH-USDT");
        assert_eq!(symbol("TESTBTC:TESTUSD").name, "TESTBTC-TESTUSD");
    }

    #[test]
    fn book_frames_route_by_channel_id() {
        let feed = BookFeed { ws_url: String::new(), depth: 100 };
        let ctx = ctx();
        let ack = br#"{"event":"subscribed","channel":"book","chanId":17,"symbol":"tBTCUSD","prec":"P0","freq":"F0","len":"100","pair":"BTCUSD"}"#;
        assert!(matches!(feed.decode(ack, &ctx).unwrap(), Frame::Skip));
        assert_eq!(ctx.subs().get(17).unwrap().symbol, "BTC-USD");

        let Frame::Snapshot(books) = feed.decode(br#"[17,[[100.0,1,2.0],[101.0,2,-3.0]]]"#, &ctx).unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(books[0].0, "BTC-USD");
        assert_eq!(books[0].1.buy[0].amount, 2.0);
        assert_eq!(books[0].1.sell[0].amount, 3.0);

        let Frame::Update(books) = feed.decode(br#"[17,[100.0,0,1.0]]"#, &ctx).unwrap() else {
            panic!("expected update");
        };
        assert!(books[0].buy[0].remove);
        assert!(matches!(feed.decode(br#"[17,"hb"]"#, &ctx).unwrap(), Frame::Skip));
        assert!(matches!(feed.decode(br#"[99,[1.0,1,1.0]]"#, &ctx).unwrap(), Frame::Skip));
    }

    #[test]
    fn malformed_book_rows_drop_alone() {
        let feed = BookFeed { ws_url: String::new(), depth: 100 };
        let ctx = ctx();
        ctx.subs().add(17, "BTC-USD", "book");
        let frame = br#"[17,[[100.0,1,1.0],[null,1,2.0],[101.0,1,-0.5]]]"#;
        let Frame::Snapshot(books) = feed.decode(frame, &ctx).unwrap() else {
            panic!("expected snapshot");
        };
        let book = &books[0].1;
        assert_eq!(book.buy.len(), 1);
        assert_eq!(book.buy[0].price, 100.0);
        assert_eq!(book.sell.len(), 1);
        assert_eq!(book.sell[0].amount, 0.5);
    }

    #[test]
    fn empty_trade_snapshot_is_still_a_snapshot() {
        let feed = TradesFeed { ws_url: String::new() };
        let ctx = ctx();
        ctx.subs().add(5, "ETH-USDT", "trades");
        let Frame::Snapshot(trades) = feed.decode(br#"[5,[]]"#, &ctx).unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(trades[0].0, "ETH-USDT");
        assert!(trades[0].1.is_empty());
    }

    #[test]
    fn reconnect_info_stops_the_session() {
        let feed = TradesFeed { ws_url: String::new() };
        let frame = br#"{"event":"info","code":20051,"msg":"Stopping. Please try to reconnect"}"#;
        match feed.decode(frame, &ctx()).unwrap() {
            Frame::Stopping(ConfluenceError::VenueStopping { code, .. }) => assert_eq!(code, 20051),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trade_sign_is_taker_side() {
        let feed = TradesFeed { ws_url: String::new() };
        let ctx = ctx();
        ctx.subs().add(5, "ETH-USDT", "trades");
        let Frame::Update(trades) = feed.decode(br#"[5,"te",[401,1700000000000,-0.5,2000.0]]"#, &ctx).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(trades[0][0].side, Side::Sell);
        assert_eq!(trades[0][0].amount, 0.5);
        assert!(matches!(feed.decode(br#"[5,"tu",[401,1700000000000,-0.5,2000.0]]"#, &ctx).unwrap(), Frame::Skip));
        assert!(matches!(feed.decode(br#"[5,"te",[401,1700000000000,-0.5,2000.0]]"#, &ctx).unwrap(), Frame::Skip));
    }

    #[test]
    fn ticker_is_a_snapshot() {
        let feed = QuotesFeed { ws_url: String::new() };
        let ctx = ctx();
        ctx.subs().add(8, "BTC-USD", "ticker");
        let frame = br#"[8,[99.0,1.0,101.0,1.0,5.0,0.05,100.0,10.0,110.0,90.0]]"#;
        let Frame::Snapshot(quotes) = feed.decode(frame, &ctx).unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(quotes[0].1.change_percent, 5.0);
        assert_eq!(quotes[0].1.quote_volume, 1000.0);
    }

    #[test]
    fn candle_ack_maps_key() {
        let feed = CandlesFeed { ws_url: String::new(), timeframe: "1m", seconds: 60 };
        let ctx = ctx();
        let ack = br#"{"event":"subscribed","channel":"candles","chanId":3,"key":"trade:1m:tETHUST"}"#;
        feed.decode(ack, &ctx).unwrap();
        let Frame::Update(candles) = feed.decode(br#"[3,[1700000040000,1.0,2.0,3.0,0.5,9.0]]"#, &ctx).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(candles[0][0].symbol, "ETH-USDT");
        assert_eq!(candles[0][0].close, 2.0);
        assert_eq!(timeframe(3600), Some("1h"));
        assert_eq!(timeframe(120), None);
    }
}
