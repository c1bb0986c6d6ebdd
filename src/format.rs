#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    EnIn,
    EnGb,
    EnUs,
}

impl Locale {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "en-IN" => Some(Self::EnIn),
            "en-GB" => Some(Self::EnGb),
            "en-US" => Some(Self::EnUs),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnIn => "en-IN",
            Self::EnGb => "en-GB",
            Self::EnUs => "en-US",
        }
    }
}

/// Inserts group separators into a string of ASCII digits.
/// en-IN groups the last three digits, then pairs (12,34,567).
fn group_digits(digits: &str, locale: Locale) -> String {
    let len = digits.len();
    if len <= 3 {
        return digits.to_string();
    }
    let (head, tail) = digits.split_at(len - 3);
    let step = match locale {
        Locale::EnIn => 2,
        Locale::EnGb | Locale::EnUs => 3,
    };

    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(step);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();
    format!("{},{}", groups.join(","), tail)
}

/// Two-decimal amount with locale grouping, no currency symbol.
pub fn format_amount(value: f64, locale: Locale) -> String {
    if !value.is_finite() {
        return "-".to_string();
    }
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = group_digits(&(cents / 100).to_string(), locale);
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}{}.{:02}", sign, whole, cents % 100)
}

pub fn format_currency(value: f64, locale: Locale, symbol: &str) -> String {
    let amount = format_amount(value.abs(), locale);
    if value < 0.0 && amount != "0.00" {
        format!("-{}{}", symbol, amount)
    } else {
        format!("{}{}", symbol, amount)
    }
}

pub fn format_percent(value: f64) -> String {
    if !value.is_finite() {
        return "-".to_string();
    }
    format!("{:.2}%", value)
}
