pub mod callers;
pub mod control;
pub mod decode;
pub mod dispatch;
pub mod handlers;
pub mod header_cache;
pub mod indexer;
pub mod registry;
pub mod scraper;
pub mod store;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod testing;
