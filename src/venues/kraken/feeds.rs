//! Kraken public market data: pair metadata plus the four stream feeds.
//!
//! Groups subscribe over WebSocket v2 and follow the `type` field of each
//! channel message. HTTP snapshots use the legacy REST API, whose result
//! maps are keyed by the internal pair name (`XXBTZUSD`), not the altname.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::wire::{
    AssetPair, BookData, CandleData, ChannelMessage, DepthBook, MethodResponse, OhlcRow,
    PriceLevel, RestResponse, TickerData, TickerInfo, TradeData, TradeRow, pair_entries,
};
use crate::mapping;
use crate::models::{Candle, DataKind, Order, OrderBook, Payload, Quote, Side, Symbol, SymbolParser, Trade};
use crate::provider::SymbolSource;
use crate::stream::{Feed, Frame, FrameContext, Keyed, keyed};
use crate::transport::HttpHelper;
use crate::Result;

pub(super) const VENUE: &str = "kraken";

const PING: &str = r#"{"method":"ping"}"#;

/// Coin codes Kraken lists under legacy names.
pub(super) const ALIASES: &[(&str, &str)] = &[("XBT", "BTC"), ("XDG", "DOGE")];

/// Book depths the v2 `book` channel accepts.
const BOOK_DEPTHS: [usize; 5] = [10, 25, 100, 500, 1000];

/// `/0/public/AssetPairs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pairs;

#[async_trait]
impl SymbolSource for Pairs {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn symbols(&self, http: &HttpHelper) -> Result<Vec<Symbol>> {
        let response: RestResponse<HashMap<String, AssetPair>> =
            http.get("/0/public/AssetPairs", &[]).await?;
        let parser = SymbolParser::separator('/').with_aliases(ALIASES);

        let mut symbols: Vec<Symbol> = response
            .into_result()?
            .into_values()
            .filter(|pair| pair.status.as_deref().is_none_or(|s| s == "online"))
            .filter_map(|pair| {
                let wsname = pair.wsname.as_deref()?;
                match parser.parse(wsname) {
                    Ok(parsed) => Some(pair_symbol(parsed, &pair)),
                    Err(e) => {
                        debug!(venue = VENUE, wsname, error = %e, "Skipping pair");
                        None
                    }
                }
            })
            .collect();
        symbols.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(symbols)
    }
}

fn pair_symbol(parsed: crate::models::symbol::ParsedSymbol, pair: &AssetPair) -> Symbol {
    let mut symbol = Symbol::new(parsed, pair.altname.clone());
    symbol.price_precision = pair.pair_decimals;
    symbol.amount_precision = pair.lot_decimals;
    if let Some([_, percent]) = pair.fees.first() {
        symbol.fee = mapping::decimal("fee", *percent).unwrap_or_default() / 100.0;
    }
    if let Some(min) = pair.ordermin.as_deref() {
        symbol.min_amount = mapping::number("ordermin", min).unwrap_or_default();
    }
    symbol
}

/// v2 socket name of a symbol (`BTC/USD`).
fn ws_name(symbol: &Symbol) -> String {
    format!("{}/{}", symbol.base_coin, symbol.quote_coin)
}

fn ws_names(symbols: &[Symbol]) -> Vec<String> {
    symbols.iter().map(ws_name).collect()
}

fn by_ws_name<'a>(ctx: &'a FrameContext, name: &str) -> Option<&'a Symbol> {
    let found = ctx.by_name(&name.replace('/', "-"));
    if found.is_none() {
        debug!(venue = VENUE, symbol = name, "Frame for unknown symbol");
    }
    found
}

/// Finds the symbol of a REST result key.
///
/// Legacy pairs are keyed `X<base>Z<quote>` (or `X<base>X<quote>`) while
/// symbols carry the altname, so the prefix letters are stripped first.
pub(super) fn by_rest_key<'a>(ctx: &'a FrameContext, key: &str) -> Option<&'a Symbol> {
    ctx.by_original(key)
        .or_else(|| ctx.by_original(&legacy_altname(key)))
}

pub(super) fn legacy_altname(key: &str) -> String {
    let bytes = key.as_bytes();
    if key.len() == 8 && key.is_ascii() && bytes[0] == b'X' && matches!(bytes[4], b'X' | b'Z') {
        format!("{}{}", &key[1..4], &key[5..])
    } else {
        key.to_string()
    }
}

fn subscribe(channel: &str, symbols: &[Symbol], extra: &[(&str, Value)]) -> Vec<Value> {
    let mut params = json!({
        "channel": channel,
        "symbol": ws_names(symbols),
        "snapshot": true,
    });
    for (key, value) in extra {
        params[*key] = value.clone();
    }
    vec![json!({ "method": "subscribe", "params": params })]
}

/// Parses a v2 frame; `None` for control traffic and other channels.
fn channel_message<T: DeserializeOwned>(
    frame: &[u8],
    channel: &str,
) -> Result<Option<ChannelMessage<T>>> {
    let value: Value = serde_json::from_slice(frame)?;

    if value.get("method").is_some() {
        let response: MethodResponse = serde_json::from_value(value)?;
        if response.success == Some(false) {
            warn!(
                venue = VENUE,
                method = response.method,
                error = response.error.as_deref().unwrap_or_default(),
                "Request rejected"
            );
        }
        return Ok(None);
    }

    if value.get("channel").and_then(Value::as_str) != Some(channel) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

fn framed<T: Payload>(snapshot: bool, items: Vec<T>) -> Frame<T> {
    if items.is_empty() {
        Frame::Skip
    } else if snapshot {
        Frame::Snapshot(keyed(items))
    } else {
        Frame::Update(items)
    }
}

fn price_levels(book: &mut OrderBook, side: Side, levels: &[PriceLevel]) {
    for level in levels {
        match (
            mapping::decimal("price", level.price),
            mapping::decimal("qty", level.qty),
        ) {
            (Ok(price), Ok(amount)) => book.push(Order::new(book.symbol.clone(), side, price, amount)),
            (Err(e), _) | (_, Err(e)) => warn!(venue = VENUE, error = %e, "Dropping book level"),
        }
    }
}

/// Order books over the `book` channel.
#[derive(Debug, Clone)]
pub struct BookFeed {
    pub(super) ws_url: String,
    pub(super) depth: usize,
}

impl BookFeed {
    fn channel_depth(&self) -> usize {
        BOOK_DEPTHS
            .into_iter()
            .find(|d| *d >= self.depth)
            .unwrap_or(BOOK_DEPTHS[BOOK_DEPTHS.len() - 1])
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
        100
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        Some(self.ws_url.clone())
    }

    fn ping_message(&self) -> Option<String> {
        Some(PING.to_string())
    }

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        subscribe("book", symbols, &[("depth", json!(self.channel_depth()))])
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<OrderBook>>> {
        let mut books = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let response: RestResponse<HashMap<String, DepthBook>> = http
                .get(
                    "/0/public/Depth",
                    &[
                        ("pair", symbol.original_name.clone()),
                        ("count", self.depth.to_string()),
                    ],
                )
                .await?;
            for (_, depth) in response.into_result()? {
                let mut book = OrderBook::new(symbol.name.clone());
                let bids: Vec<[&str; 2]> = depth.bids.iter().map(|(p, v, _)| [p.as_str(), v.as_str()]).collect();
                let asks: Vec<[&str; 2]> = depth.asks.iter().map(|(p, v, _)| [p.as_str(), v.as_str()]).collect();
                book.buy = mapping::levels(&symbol.name, Side::Buy, &bids);
                book.sell = mapping::levels(&symbol.name, Side::Sell, &asks);
                books.push(book);
            }
        }
        Ok(keyed(books))
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<OrderBook>> {
        let Some(message) = channel_message::<BookData>(frame, "book")? else {
            return Ok(Frame::Skip);
        };
        let books = message
            .data
            .iter()
            .filter_map(|data| {
                let symbol = by_ws_name(ctx, &data.symbol)?;
                let mut book = OrderBook::new(symbol.name.clone());
                price_levels(&mut book, Side::Buy, &data.bids);
                price_levels(&mut book, Side::Sell, &data.asks);
                Some(book)
            })
            .collect();
        Ok(framed(message.is_snapshot(), books))
    }
}

/// Public trades over the `trade` channel.
#[derive(Debug, Clone)]
pub struct TradesFeed {
    pub(super) ws_url: String,
}

fn side(raw: &str) -> Side {
    if raw.starts_with('s') { Side::Sell } else { Side::Buy }
}

fn ws_trade(symbol: &Symbol, data: &TradeData) -> Result<Trade> {
    Ok(Trade {
        id: data.trade_id.to_string(),
        order_id: None,
        symbol: symbol.name.clone(),
        side: side(&data.side),
        price: mapping::decimal("price", data.price)?,
        amount: mapping::decimal("qty", data.qty)?,
        fee: None,
        timestamp: mapping::rfc3339_millis("timestamp", &data.timestamp)?,
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
        50
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        Some(self.ws_url.clone())
    }

    fn ping_message(&self) -> Option<String> {
        Some(PING.to_string())
    }

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        subscribe("trade", symbols, &[])
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Vec<Trade>>>> {
        let mut groups = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let response: RestResponse<HashMap<String, Value>> = http
                .get("/0/public/Trades", &[("pair", symbol.original_name.clone())])
                .await?;
            for (_, rows) in pair_entries::<Vec<TradeRow>>(response.into_result()?)? {
                let trades: Vec<Trade> = rows
                    .iter()
                    .filter_map(|row| {
                        let trade = Trade {
                            id: row.6.to_string(),
                            order_id: None,
                            symbol: symbol.name.clone(),
                            side: side(&row.3),
                            price: mapping::number("price", &row.0).ok()?,
                            amount: mapping::number("volume", &row.1).ok()?,
                            fee: None,
                            timestamp: (row.2 * 1000.0) as i64,
                        };
                        Some(trade)
                    })
                    .collect();
                if let Some(last) = rows.iter().map(|row| row.6).max() {
                    ctx.state().set(symbol.name.clone(), last);
                }
                groups.push((symbol.name.clone(), trades));
            }
        }
        Ok(groups)
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<Vec<Trade>>> {
        let Some(message) = channel_message::<TradeData>(frame, "trade")? else {
            return Ok(Frame::Skip);
        };

        let mut per_symbol: Vec<Vec<Trade>> = Vec::new();
        for data in &message.data {
            let Some(symbol) = by_ws_name(ctx, &data.symbol) else {
                continue;
            };
            let trade = match ws_trade(symbol, data) {
                Ok(trade) => trade,
                Err(e) => {
                    warn!(venue = VENUE, trade_id = data.trade_id, error = %e, "Dropping trade");
                    continue;
                }
            };
            if !message.is_snapshot() && !ctx.state().advance(&symbol.name, data.trade_id) {
                continue;
            }
            match per_symbol.iter_mut().find(|g| g[0].symbol == trade.symbol) {
                Some(group) => group.push(trade),
                None => per_symbol.push(vec![trade]),
            }
        }
        Ok(framed(message.is_snapshot(), per_symbol))
    }
}

/// 24h tickers over the `ticker` channel.
#[derive(Debug, Clone)]
pub struct QuotesFeed {
    pub(super) ws_url: String,
}

fn rest_quote(symbol: &Symbol, info: &TickerInfo) -> Result<Quote> {
    let at = |values: &[String], i: usize, field: &'static str| {
        values
            .get(i)
            .ok_or_else(|| crate::ConfluenceError::mapping(field, "missing"))
            .and_then(|raw| mapping::number(field, raw))
    };
    let last = at(&info.c, 0, "c")?;
    let open = mapping::number("o", &info.o)?;
    let volume = at(&info.v, 1, "v")?;
    let change = last - open;
    Ok(Quote {
        symbol: symbol.name.clone(),
        last,
        high: at(&info.h, 1, "h")?,
        low: at(&info.l, 1, "l")?,
        change,
        change_percent: if open == 0.0 { 0.0 } else { change / open * 100.0 },
        base_volume: volume,
        quote_volume: volume * at(&info.p, 1, "p")?,
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
        50
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        Some(self.ws_url.clone())
    }

    fn ping_message(&self) -> Option<String> {
        Some(PING.to_string())
    }

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        subscribe("ticker", symbols, &[])
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Quote>>> {
        let pairs: Vec<&str> = ctx.symbols().iter().map(|s| s.original_name.as_str()).collect();
        let response: RestResponse<HashMap<String, TickerInfo>> = http
            .get("/0/public/Ticker", &[("pair", pairs.join(","))])
            .await?;

        let mut quotes = Vec::new();
        for (key, info) in response.into_result()? {
            let Some(symbol) = by_rest_key(ctx, &key) else {
                debug!(venue = VENUE, key, "Ticker for unknown pair");
                continue;
            };
            match rest_quote(symbol, &info) {
                Ok(quote) => quotes.push(quote),
                Err(e) => warn!(venue = VENUE, key, error = %e, "Dropping ticker"),
            }
        }
        Ok(keyed(quotes))
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<Quote>> {
        let Some(message) = channel_message::<TickerData>(frame, "ticker")? else {
            return Ok(Frame::Skip);
        };
        let quotes = message
            .data
            .iter()
            .filter_map(|data| {
                let symbol = by_ws_name(ctx, &data.symbol)?;
                Some(Quote {
                    symbol: symbol.name.clone(),
                    last: data.last,
                    high: data.high,
                    low: data.low,
                    change: data.change,
                    change_percent: data.change_pct,
                    base_volume: data.volume,
                    quote_volume: data.volume * data.vwap,
                })
            })
            .collect();
        Ok(framed(message.is_snapshot(), quotes))
    }
}

/// OHLC bars over the `ohlc` channel.
#[derive(Debug, Clone)]
pub struct CandlesFeed {
    pub(super) ws_url: String,
    /// Bar length in minutes.
    pub(super) minutes: u64,
}

/// Bar lengths (minutes) both `OHLC` and the `ohlc` channel accept.
pub(super) const CANDLE_MINUTES: [u64; 9] = [1, 5, 15, 30, 60, 240, 1440, 10080, 21600];

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
        50
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        Some(self.ws_url.clone())
    }

    fn ping_message(&self) -> Option<String> {
        Some(PING.to_string())
    }

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        subscribe("ohlc", symbols, &[("interval", json!(self.minutes))])
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Vec<Candle>>>> {
        let mut groups = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let response: RestResponse<HashMap<String, Value>> = http
                .get(
                    "/0/public/OHLC",
                    &[
                        ("pair", symbol.original_name.clone()),
                        ("interval", self.minutes.to_string()),
                    ],
                )
                .await?;
            for (_, rows) in pair_entries::<Vec<OhlcRow>>(response.into_result()?)? {
                let candles = rows
                    .iter()
                    .filter_map(|row| {
                        Some(Candle {
                            symbol: symbol.name.clone(),
                            timestamp: row.0 * 1000,
                            discretization: self.minutes * 60,
                            open: mapping::number("open", &row.1).ok()?,
                            high: mapping::number("high", &row.2).ok()?,
                            low: mapping::number("low", &row.3).ok()?,
                            close: mapping::number("close", &row.4).ok()?,
                            volume: mapping::number("volume", &row.6).ok()?,
                        })
                    })
                    .collect();
                groups.push((symbol.name.clone(), candles));
            }
        }
        Ok(groups)
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<Vec<Candle>>> {
        let Some(message) = channel_message::<CandleData>(frame, "ohlc")? else {
            return Ok(Frame::Skip);
        };

        let mut per_symbol: Vec<Vec<Candle>> = Vec::new();
        for data in &message.data {
            let Some(symbol) = by_ws_name(ctx, &data.symbol) else {
                continue;
            };
            let timestamp = match mapping::rfc3339_millis("interval_begin", &data.interval_begin) {
                Ok(timestamp) => timestamp,
                Err(e) => {
                    warn!(venue = VENUE, error = %e, "Dropping candle");
                    continue;
                }
            };
            let candle = Candle {
                symbol: symbol.name.clone(),
                timestamp,
                discretization: data.interval * 60,
                open: data.open,
                high: data.high,
                low: data.low,
                close: data.close,
                volume: data.volume,
            };
            match per_symbol.iter_mut().find(|g| g[0].symbol == candle.symbol) {
                Some(group) => group.push(candle),
                None => per_symbol.push(vec![candle]),
            }
        }
        Ok(framed(message.is_snapshot(), per_symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc_usd() -> Symbol {
        let parsed = SymbolParser::separator('/')
            .with_aliases(ALIASES)
            .parse("XBT/USD")
            .unwrap();
        Symbol::new(parsed, "XBTUSD")
    }

    fn ctx() -> FrameContext {
        FrameContext::new(vec![btc_usd()].into())
    }

    #[test]
    fn rest_keys_resolve_through_altname() {
        let ctx = ctx();
        assert_eq!(legacy_altname("XXBTZUSD"), "XBTUSD");
        assert_eq!(legacy_altname("DOTUSD"), "DOTUSD");
        assert_eq!(by_rest_key(&ctx, "XXBTZUSD").unwrap().name, "BTC-USD");
        assert_eq!(by_rest_key(&ctx, "XBTUSD").unwrap().name, "BTC-USD");
    }

    #[test]
    fn subscribe_frame_uses_ws_names() {
        let feed = BookFeed { ws_url: String::new(), depth: 50 };
        let frames = feed.subscribe_frames(&[btc_usd()]);
        assert_eq!(frames[0]["params"]["symbol"][0], "BTC/USD");
        assert_eq!(frames[0]["params"]["depth"], 100);
        assert_eq!(frames[0]["params"]["channel"], "book");
    }

    #[test]
    fn book_update_marks_removed_level() {
        let feed = BookFeed { ws_url: String::new(), depth: 100 };
        let frame = br#"{"channel":"book","type":"update","data":[{"symbol":"BTC/USD",
            "bids":[{"price":30000.1,"qty":0}],"asks":[{"price":30001.0,"qty":1.5}],
            "checksum":1,"timestamp":"2023-10-06T17:35:55.440295Z"}]}"#;
        let Frame::Update(books) = feed.decode(frame, &ctx()).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(books[0].symbol, "BTC-USD");
        assert!(books[0].buy[0].remove);
        assert_eq!(books[0].sell[0].amount, 1.5);
    }

    #[test]
    fn control_frames_are_skipped() {
        let feed = TradesFeed { ws_url: String::new() };
        let ctx = ctx();
        for frame in [
            br#"{"channel":"heartbeat"}"#.as_slice(),
            br#"{"method":"pong","time_in":"x","time_out":"y"}"#,
            br#"{"method":"subscribe","result":{"channel":"trade"},"success":true}"#,
            br#"{"channel":"status","type":"update","data":[{"system":"online"}]}"#,
        ] {
            assert!(matches!(feed.decode(frame, &ctx).unwrap(), Frame::Skip));
        }
    }

    #[test]
    fn trade_updates_are_deduplicated() {
        let feed = TradesFeed { ws_url: String::new() };
        let ctx = ctx();
        let frame = br#"{"channel":"trade","type":"update","data":[{"symbol":"BTC/USD",
            "side":"sell","price":30000.5,"qty":0.25,"ord_type":"market","trade_id":42,
            "timestamp":"2023-10-06T17:35:55.440295Z"}]}"#;

        let Frame::Update(trades) = feed.decode(frame, &ctx).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(trades[0][0].side, Side::Sell);
        assert_eq!(trades[0][0].id, "42");
        assert!(matches!(feed.decode(frame, &ctx).unwrap(), Frame::Skip));
    }

    #[test]
    fn trade_frame_normalizes_to_millis() {
        let feed = TradesFeed { ws_url: String::new() };
        let frame = br#"{"channel":"trade","type":"update","data":[{"symbol":"BTC/USD",
            "side":"buy","price":30000.5,"qty":0.25,"ord_type":"limit","trade_id":7,
            "timestamp":"2023-10-06T17:35:55.440295Z"}]}"#;
        let Frame::Update(trades) = feed.decode(frame, &ctx()).unwrap() else {
            panic!("expected update");
        };
        let value = serde_json::to_value(&trades[0][0]).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "7",
                "symbol": "BTC-USD",
                "side": "buy",
                "price": 30000.5,
                "amount": 0.25,
                "timestamp": 1_696_613_755_440_i64,
            })
        );
        assert_eq!(serde_json::from_value::<Trade>(value).unwrap(), trades[0][0]);
    }

    #[test]
    fn unmappable_trade_is_dropped_alone() {
        let feed = TradesFeed { ws_url: String::new() };
        let ctx = ctx();
        let frame = br#"{"channel":"trade","type":"update","data":[
            {"symbol":"BTC/USD","side":"buy","price":30000.5,"qty":0.25,"ord_type":"limit",
             "trade_id":43,"timestamp":"2023-10-06T17:35:55.440295Z"},
            {"symbol":"BTC/USD","side":"sell","price":30001.0,"qty":0.1,"ord_type":"limit",
             "trade_id":44,"timestamp":"yesterday"}]}"#;
        let Frame::Update(trades) = feed.decode(frame, &ctx).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].len(), 1);
        assert_eq!(trades[0][0].id, "43");

        let retry = br#"{"channel":"trade","type":"update","data":[{"symbol":"BTC/USD",
            "side":"sell","price":30001.0,"qty":0.1,"ord_type":"limit","trade_id":44,
            "timestamp":"2023-10-06T17:36:00Z"}]}"#;
        let Frame::Update(trades) = feed.decode(retry, &ctx).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(trades[0][0].id, "44");
        assert_eq!(trades[0][0].timestamp, 1_696_613_760_000);
    }

    #[test]
    fn rest_ticker_derives_change() {
        let info: TickerInfo = serde_json::from_str(
            r#"{"a":["1","1","1"],"b":["1","1","1"],"c":["110.0","0.1"],
                "v":["5","10"],"p":["100","105"],"t":[1,2],"l":["90","95"],
                "h":["120","125"],"o":"100.0"}"#,
        )
        .unwrap();
        let quote = rest_quote(&btc_usd(), &info).unwrap();
        assert_eq!(quote.change, 10.0);
        assert_eq!(quote.change_percent, 10.0);
        assert_eq!(quote.quote_volume, 1050.0);
        assert_eq!(quote.high, 125.0);
    }
}
