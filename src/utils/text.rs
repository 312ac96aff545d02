/// Price with two decimals, or `-` when unavailable.
pub fn format_price(price: Option<f64>) -> String {
    match price {
        Some(value) => format!("{value:.2}"),
        None => "-".to_string(),
    }
}

/// Signed percent change, or `-` when unavailable.
pub fn format_change(change: Option<f64>) -> String {
    match change {
        Some(value) => format!("{value:+.2}%"),
        None => "-".to_string(),
    }
}

pub fn pad_right(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        text.to_string()
    } else {
        format!("{text}{}", " ".repeat(width - len))
    }
}
