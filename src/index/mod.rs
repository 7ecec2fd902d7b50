mod fetch;
mod parse;

pub use fetch::fetch_listing;
pub use parse::parse_index;
