//! Binance public market data over combined streams.
//!
//! Every group dials `/stream` and subscribes with one `SUBSCRIBE`
//! request; frames arrive as `{"stream": .., "data": ..}` and carry the
//! symbol in `data.s`. Book deltas are ordered by update id: the REST
//! snapshot records `lastUpdateId` and older deltas are dropped.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::wire::{
    DepthSnapshot, DepthUpdate, Envelope, ExchangeInfo, Filter, Kline, RestTicker, RestTrade,
    StreamKline, StreamTicker, StreamTrade, SymbolInfo,
};
use crate::mapping;
use crate::models::{Candle, DataKind, OrderBook, Quote, Side, Symbol, SymbolParser, Trade};
use crate::provider::SymbolSource;
use crate::stream::{Feed, Frame, FrameContext, Keyed, keyed};
use crate::transport::HttpHelper;
use crate::Result;

pub(super) const VENUE: &str = "binance";

/// Quote coins recognized when splitting concatenated names.
const QUOTES: [&str; 16] = [
    "USDT", "USDC", "FDUSD", "TUSD", "BUSD", "DAI", "BTC", "ETH", "BNB", "EUR", "GBP", "TRY",
    "BRL", "AUD", "JPY", "XRP",
];

/// Default taker fee; the account endpoint has the real one.
const TAKER_FEE: f64 = 0.001;

/// Limits `/api/v3/depth` accepts.
const DEPTH_LIMITS: [usize; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

const SHARD_LIMIT: usize = 100;

/// Kline intervals by length in seconds.
const INTERVALS: [(u64, &str); 15] = [
    (1, "1s"),
    (60, "1m"),
    (180, "3m"),
    (300, "5m"),
    (900, "15m"),
    (1800, "30m"),
    (3600, "1h"),
    (7200, "2h"),
    (14_400, "4h"),
    (21_600, "6h"),
    (28_800, "8h"),
    (43_200, "12h"),
    (86_400, "1d"),
    (259_200, "3d"),
    (604_800, "1w"),
];

/// Kline interval name for a bar length in seconds.
pub(super) fn interval(seconds: u64) -> Option<&'static str> {
    INTERVALS
        .iter()
        .find(|(s, _)| *s == seconds)
        .map(|(_, name)| *name)
}

pub(super) fn parser() -> SymbolParser {
    SymbolParser::quote_suffix(QUOTES)
}

/// `/api/v3/exchangeInfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pairs;

#[async_trait]
impl SymbolSource for Pairs {
    fn venue(&self) -> &'static str {
        VENUE
    }

    async fn symbols(&self, http: &HttpHelper) -> Result<Vec<Symbol>> {
        let info: ExchangeInfo = http.get("/api/v3/exchangeInfo", &[]).await?;
        let parser = parser();

        let mut symbols: Vec<Symbol> = info
            .symbols
            .iter()
            .filter(|s| s.status == "TRADING")
            .filter_map(|s| match symbol_of(&parser, s) {
                Ok(symbol) => Some(symbol),
                Err(e) => {
                    debug!(venue = VENUE, symbol = s.symbol, error = %e, "Skipping pair");
                    None
                }
            })
            .collect();
        symbols.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(symbols)
    }
}

/// Splits by quote suffix; names the suffix list gets wrong (or cannot
/// split at all) fall back to the listed base and quote assets.
fn symbol_of(parser: &SymbolParser, info: &SymbolInfo) -> Result<Symbol> {
    let parsed = match parser.parse(&info.symbol) {
        Ok(parsed) if parsed.base == info.base_asset && parsed.quote == info.quote_asset => parsed,
        _ => SymbolParser::separator('/')
            .parse(&format!("{}/{}", info.base_asset, info.quote_asset))?,
    };

    let mut symbol = Symbol::new(parsed, info.symbol.clone());
    symbol.fee = TAKER_FEE;
    for filter in &info.filters {
        match filter {
            Filter::Price { min_price, max_price, tick_size } => {
                symbol.min_price = mapping::number("minPrice", min_price)?;
                symbol.max_price = mapping::number("maxPrice", max_price)?;
                symbol.price_precision = precision(tick_size);
            }
            Filter::LotSize { min_qty, max_qty, step_size } => {
                symbol.min_amount = mapping::number("minQty", min_qty)?;
                symbol.max_amount = mapping::number("maxQty", max_qty)?;
                symbol.amount_precision = precision(step_size);
            }
            Filter::Other => {}
        }
    }
    Ok(symbol)
}

/// Decimal places of a step such as `"0.00010000"`.
fn precision(step: &str) -> u32 {
    step.trim_end_matches('0')
        .split_once('.')
        .map_or(0, |(_, frac)| frac.len() as u32)
}

/// Stream names are lowercase symbol plus channel: `btcusdt@trade`.
fn subscribe(symbols: &[Symbol], channel: &str) -> Vec<Value> {
    let params: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@{channel}", s.original_name.to_lowercase()))
        .collect();
    vec![json!({ "method": "SUBSCRIBE", "params": params, "id": 1 })]
}

/// Parses a combined-stream frame; `None` for request responses.
fn envelope<T: DeserializeOwned>(frame: &[u8]) -> Result<Option<Envelope<T>>> {
    let value: Value = serde_json::from_slice(frame)?;
    if value.get("stream").is_none() {
        if let Some(error) = value.get("error") {
            warn!(venue = VENUE, %error, "Request rejected");
        }
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

fn by_stream_symbol<'a>(ctx: &'a FrameContext, original: &str) -> Option<&'a Symbol> {
    let found = ctx.by_original(original);
    if found.is_none() {
        debug!(venue = VENUE, symbol = original, "Frame for unknown symbol");
    }
    found
}

fn taker_side(is_buyer_maker: bool) -> Side {
    if is_buyer_maker { Side::Sell } else { Side::Buy }
}

/// Order books from `/api/v3/depth` and `<symbol>@depth@100ms`.
#[derive(Debug, Clone)]
pub struct BookFeed {
    pub(super) ws_url: String,
    pub(super) depth: usize,
}

impl BookFeed {
    fn rest_limit(&self) -> usize {
        DEPTH_LIMITS
            .into_iter()
            .find(|l| *l >= self.depth)
            .unwrap_or(DEPTH_LIMITS[DEPTH_LIMITS.len() - 1])
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

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        subscribe(symbols, "depth@100ms")
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<OrderBook>>> {
        let mut books = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let depth: DepthSnapshot = http
                .get(
                    "/api/v3/depth",
                    &[
                        ("symbol", symbol.original_name.clone()),
                        ("limit", self.rest_limit().to_string()),
                    ],
                )
                .await?;
            ctx.state().set(symbol.name.clone(), depth.last_update_id);

            let mut book = OrderBook::new(symbol.name.clone());
            book.buy = mapping::levels(&symbol.name, Side::Buy, &depth.bids);
            book.sell = mapping::levels(&symbol.name, Side::Sell, &depth.asks);
            books.push(book);
        }
        Ok(keyed(books))
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<OrderBook>> {
        let Some(envelope) = envelope::<DepthUpdate>(frame)? else {
            return Ok(Frame::Skip);
        };
        let update = envelope.data;
        let Some(symbol) = by_stream_symbol(ctx, &update.symbol) else {
            return Ok(Frame::Skip);
        };
        if !ctx.state().advance(&symbol.name, update.final_update_id) {
            debug!(
                venue = VENUE,
                symbol = symbol.name,
                first = update.first_update_id,
                last = update.final_update_id,
                "Dropping stale depth update"
            );
            return Ok(Frame::Skip);
        }

        let mut book = OrderBook::new(symbol.name.clone());
        book.buy = mapping::levels(&symbol.name, Side::Buy, &update.bids);
        book.sell = mapping::levels(&symbol.name, Side::Sell, &update.asks);
        Ok(Frame::Update(vec![book]))
    }
}

/// Public trades from `/api/v3/trades` and `<symbol>@trade`.
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

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        subscribe(symbols, "trade")
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Vec<Trade>>>> {
        let mut groups = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let rows: Vec<RestTrade> = http
                .get("/api/v3/trades", &[("symbol", symbol.original_name.clone())])
                .await?;
            let trades = rows
                .iter()
                .filter_map(|row| {
                    Some(Trade {
                        id: row.id.to_string(),
                        order_id: None,
                        symbol: symbol.name.clone(),
                        side: taker_side(row.is_buyer_maker),
                        price: mapping::number("price", &row.price).ok()?,
                        amount: mapping::number("qty", &row.qty).ok()?,
                        fee: None,
                        timestamp: row.time,
                    })
                })
                .collect();
            if let Some(last) = rows.iter().map(|row| row.id).max() {
                ctx.state().set(symbol.name.clone(), last);
            }
            groups.push((symbol.name.clone(), trades));
        }
        Ok(groups)
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<Vec<Trade>>> {
        let Some(envelope) = envelope::<StreamTrade>(frame)? else {
            return Ok(Frame::Skip);
        };
        let row = envelope.data;
        let Some(symbol) = by_stream_symbol(ctx, &row.symbol) else {
            return Ok(Frame::Skip);
        };
        let trade = Trade {
            id: row.id.to_string(),
            order_id: None,
            symbol: symbol.name.clone(),
            side: taker_side(row.is_buyer_maker),
            price: mapping::number("p", &row.price)?,
            amount: mapping::number("q", &row.qty)?,
            fee: None,
            timestamp: row.time,
        };
        if !ctx.state().advance(&symbol.name, row.id) {
            return Ok(Frame::Skip);
        }
        Ok(Frame::Update(vec![vec![trade]]))
    }
}

/// 24h statistics from `/api/v3/ticker/24hr` and `<symbol>@ticker`.
#[derive(Debug, Clone)]
pub struct QuotesFeed {
    pub(super) ws_url: String,
}

#[allow(clippy::too_many_arguments)]
fn quote(
    symbol: &Symbol,
    last: &str,
    high: &str,
    low: &str,
    change: &str,
    change_percent: &str,
    base_volume: &str,
    quote_volume: &str,
) -> Result<Quote> {
    Ok(Quote {
        symbol: symbol.name.clone(),
        last: mapping::number("lastPrice", last)?,
        high: mapping::number("highPrice", high)?,
        low: mapping::number("lowPrice", low)?,
        change: mapping::number("priceChange", change)?,
        change_percent: mapping::number("priceChangePercent", change_percent)?,
        base_volume: mapping::number("volume", base_volume)?,
        quote_volume: mapping::number("quoteVolume", quote_volume)?,
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
        SHARD_LIMIT
    }

    fn endpoint(&self, _symbols: &[Symbol]) -> Option<String> {
        Some(self.ws_url.clone())
    }

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        subscribe(symbols, "ticker")
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Quote>>> {
        let names: Vec<&str> = ctx.symbols().iter().map(|s| s.original_name.as_str()).collect();
        let tickers: Vec<RestTicker> = http
            .get("/api/v3/ticker/24hr", &[("symbols", serde_json::to_string(&names)?)])
            .await?;

        let mut quotes = Vec::with_capacity(tickers.len());
        for t in &tickers {
            let Some(symbol) = by_stream_symbol(ctx, &t.symbol) else {
                continue;
            };
            match quote(
                symbol,
                &t.last_price,
                &t.high_price,
                &t.low_price,
                &t.price_change,
                &t.price_change_percent,
                &t.volume,
                &t.quote_volume,
            ) {
                Ok(q) => quotes.push(q),
                Err(e) => warn!(venue = VENUE, symbol = t.symbol, error = %e, "Dropping ticker"),
            }
        }
        Ok(keyed(quotes))
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<Quote>> {
        let Some(envelope) = envelope::<StreamTicker>(frame)? else {
            return Ok(Frame::Skip);
        };
        let t = envelope.data;
        let Some(symbol) = by_stream_symbol(ctx, &t.symbol) else {
            return Ok(Frame::Skip);
        };
        // Each ticker event is the full 24h window.
        Ok(Frame::Snapshot(keyed([quote(
            symbol,
            &t.last_price,
            &t.high_price,
            &t.low_price,
            &t.price_change,
            &t.price_change_percent,
            &t.volume,
            &t.quote_volume,
        )?])))
    }
}

/// Bars from `/api/v3/klines` and `<symbol>@kline_<interval>`.
#[derive(Debug, Clone)]
pub struct CandlesFeed {
    pub(super) ws_url: String,
    pub(super) interval: &'static str,
    pub(super) seconds: u64,
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

    fn subscribe_frames(&self, symbols: &[Symbol]) -> Vec<Value> {
        subscribe(symbols, &format!("kline_{}", self.interval))
    }

    async fn snapshot(&self, http: &HttpHelper, ctx: &FrameContext) -> Result<Vec<Keyed<Vec<Candle>>>> {
        let mut groups = Vec::with_capacity(ctx.symbols().len());
        for symbol in ctx.symbols() {
            let rows: Vec<Kline> = http
                .get(
                    "/api/v3/klines",
                    &[
                        ("symbol", symbol.original_name.clone()),
                        ("interval", self.interval.to_string()),
                    ],
                )
                .await?;
            let candles = rows
                .iter()
                .filter_map(|row| {
                    Some(Candle {
                        symbol: symbol.name.clone(),
                        timestamp: row.0,
                        discretization: self.seconds,
                        open: mapping::number("open", &row.1).ok()?,
                        high: mapping::number("high", &row.2).ok()?,
                        low: mapping::number("low", &row.3).ok()?,
                        close: mapping::number("close", &row.4).ok()?,
                        volume: mapping::number("volume", &row.5).ok()?,
                    })
                })
                .collect();
            groups.push((symbol.name.clone(), candles));
        }
        Ok(groups)
    }

    fn decode(&self, frame: &[u8], ctx: &FrameContext) -> Result<Frame<Vec<Candle>>> {
        let Some(envelope) = envelope::<StreamKline>(frame)? else {
            return Ok(Frame::Skip);
        };
        let event = envelope.data;
        let Some(symbol) = by_stream_symbol(ctx, &event.symbol) else {
            return Ok(Frame::Skip);
        };
        let k = event.kline;
        Ok(Frame::Update(vec![vec![Candle {
            symbol: symbol.name.clone(),
            timestamp: k.open_time,
            discretization: self.seconds,
            open: mapping::number("o", &k.open)?,
            high: mapping::number("h", &k.high)?,
            low: mapping::number("l", &k.low)?,
            close: mapping::number("c", &k.close)?,
            volume: mapping::number("v", &k.volume)?,
        }]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(original: &str) -> Symbol {
        Symbol::new(parser().parse(original).unwrap(), original)
    }

    fn ctx() -> FrameContext {
        FrameContext::new(vec![symbol("BTCUSDT"), symbol("ETHBTC")].into())
    }

    #[test]
    fn concatenated_names_split_on_longest_quote() {
        assert_eq!(parser().parse("BNBUSDT").unwrap().name, "BNB-USDT");
        assert_eq!(parser().parse("ETHBTC").unwrap().name, "ETH-BTC");
    }

    #[test]
    fn listed_assets_override_suffix_guess() {
        let info: SymbolInfo = serde_json::from_str(
            r#"{"symbol":"USDTDAI","status":"TRADING","baseAsset":"USDT","quoteAsset":"DAI",
                "filters":[{"filterType":"PRICE_FILTER","minPrice":"0.0001","maxPrice":"1000","tickSize":"0.00010000"},
                           {"filterType":"LOT_SIZE","minQty":"1.00","maxQty":"9000000","stepSize":"1.00000000"}]}"#,
        )
        .unwrap();
        let symbol = symbol_of(&parser(), &info).unwrap();
        assert_eq!(symbol.name, "USDT-DAI");
        assert_eq!(symbol.price_precision, 4);
        assert_eq!(symbol.amount_precision, 0);
        assert_eq!(symbol.min_amount, 1.0);
    }

    #[test]
    fn subscribe_frame_lists_lowercase_streams() {
        let feed = CandlesFeed { ws_url: String::new(), interval: "1m", seconds: 60 };
        let frames = feed.subscribe_frames(&[symbol("BTCUSDT")]);
        assert_eq!(frames[0]["method"], "SUBSCRIBE");
        assert_eq!(frames[0]["params"][0], "btcusdt@kline_1m");
    }

    #[test]
    fn depth_updates_older_than_snapshot_are_dropped() {
        let feed = BookFeed { ws_url: String::new(), depth: 100 };
        let ctx = ctx();
        ctx.state().set("BTC-USDT", 160);

        let stale = br#"{"stream":"btcusdt@depth@100ms","data":{"e":"depthUpdate","E":1,
            "s":"BTCUSDT","U":150,"u":160,"b":[["0.0024","10"]],"a":[]}}"#;
        assert!(matches!(feed.decode(stale, &ctx).unwrap(), Frame::Skip));

        let fresh = br#"{"stream":"btcusdt@depth@100ms","data":{"e":"depthUpdate","E":2,
            "s":"BTCUSDT","U":161,"u":165,"b":[["0.0024","0"]],"a":[["0.0026","100"]]}}"#;
        let Frame::Update(books) = feed.decode(fresh, &ctx).unwrap() else {
            panic!("expected update");
        };
        assert!(books[0].buy[0].remove);
        assert_eq!(books[0].sell[0].amount, 100.0);
    }

    #[test]
    fn trade_side_is_taker_side() {
        let feed = TradesFeed { ws_url: String::new() };
        let frame = br#"{"stream":"ethbtc@trade","data":{"e":"trade","E":1,"s":"ETHBTC",
            "t":12345,"p":"0.001","q":"100","T":1672515782136,"m":true,"M":true}}"#;
        let Frame::Update(trades) = feed.decode(frame, &ctx()).unwrap() else {
            panic!("expected update");
        };
        assert_eq!(trades[0][0].side, Side::Sell);
        assert_eq!(trades[0][0].symbol, "ETH-BTC");
    }

    #[test]
    fn depth_frame_normalizes_to_book() {
        let feed = BookFeed { ws_url: String::new(), depth: 100 };
        let ctx = ctx();
        ctx.state().set("BTC-USDT", 10);
        let frame = br#"{"stream":"btcusdt@depth@100ms","data":{"e":"depthUpdate","E":1,
            "s":"BTCUSDT","U":11,"u":12,"b":[["42150.5","0.25"],["42150.0","0"]],"a":[["42151.25","2"]]}}"#;
        let Frame::Update(books) = feed.decode(frame, &ctx).unwrap() else {
            panic!("expected update");
        };
        let value = serde_json::to_value(&books[0]).unwrap();
        assert_eq!(
            value,
            json!({
                "symbol": "BTC-USDT",
                "buy": [
                    {"symbol": "BTC-USDT", "side": "buy", "price": 42150.5, "amount": 0.25, "remove": false},
                    {"symbol": "BTC-USDT", "side": "buy", "price": 42150.0, "amount": 0.0, "remove": true},
                ],
                "sell": [
                    {"symbol": "BTC-USDT", "side": "sell", "price": 42151.25, "amount": 2.0, "remove": false},
                ],
            })
        );
        assert_eq!(serde_json::from_value::<OrderBook>(value).unwrap(), books[0]);
    }

    #[test]
    fn trade_frame_normalizes_to_trade() {
        let feed = TradesFeed { ws_url: String::new() };
        let frame = br#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1,"s":"BTCUSDT",
            "t":900,"p":"42150.5","q":"0.125","T":1672515782136,"m":false,"M":true}}"#;
        let Frame::Update(trades) = feed.decode(frame, &ctx()).unwrap() else {
            panic!("expected update");
        };
        let value = serde_json::to_value(&trades[0][0]).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "900",
                "symbol": "BTC-USDT",
                "side": "buy",
                "price": 42150.5,
                "amount": 0.125,
                "timestamp": 1_672_515_782_136_i64,
            })
        );
        assert_eq!(serde_json::from_value::<Trade>(value).unwrap(), trades[0][0]);
    }

    #[test]
    fn unmappable_trade_leaves_dedupe_untouched() {
        let feed = TradesFeed { ws_url: String::new() };
        let ctx = ctx();
        let bad = br#"{"stream":"ethbtc@trade","data":{"e":"trade","E":1,"s":"ETHBTC",
            "t":77,"p":"n/a","q":"1","T":1672515782136,"m":true,"M":true}}"#;
        assert!(feed.decode(bad, &ctx).is_err());

        let good = br#"{"stream":"ethbtc@trade","data":{"e":"trade","E":2,"s":"ETHBTC",
            "t":77,"p":"0.05","q":"1","T":1672515782137,"m":true,"M":true}}"#;
        assert!(matches!(feed.decode(good, &ctx).unwrap(), Frame::Update(_)));
    }

    #[test]
    fn subscription_acks_are_skipped() {
        let feed = QuotesFeed { ws_url: String::new() };
        assert!(matches!(
            feed.decode(br#"{"result":null,"id":1}"#, &ctx()).unwrap(),
            Frame::Skip
        ));
    }

    #[test]
    fn intervals_map_from_seconds() {
        assert_eq!(interval(60), Some("1m"));
        assert_eq!(interval(604_800), Some("1w"));
        assert_eq!(interval(120), None);
    }
}
