pub mod text;
pub mod time;

pub use text::{format_change, format_price, pad_right};
pub use time::{current_human_timestamp, format_remaining};
