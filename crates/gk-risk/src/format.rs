//! Money formatting for human-readable rejection reasons.

use rust_decimal::Decimal;

/// `$60,000.00`-style formatting: dollar sign, thousands separators, two
/// decimal places. Negative amounts render as `$-6,000.00`.
pub fn usd(amount: Decimal) -> String {
    format!("${}", grouped(amount, 2))
}

/// Whole-dollar variant: `$4,000`.
pub fn usd_whole(amount: Decimal) -> String {
    format!("${}", grouped(amount, 0))
}

fn grouped(amount: Decimal, dp: u32) -> String {
    let rounded = amount.round_dp(dp);
    let raw = format!("{rounded:.prec$}", prec = dp as usize);
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", raw.as_str()),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    let mut out = String::with_capacity(raw.len() + int_part.len() / 3);
    out.push_str(sign);
    let chars: Vec<char> = int_part.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(*c);
    }
    if let Some(f) = frac_part {
        out.push('.');
        out.push_str(f);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn formats_with_thousands_separators() {
        assert_eq!(usd(dec!(60000)), "$60,000.00");
        assert_eq!(usd(dec!(50000.00)), "$50,000.00");
        assert_eq!(usd(dec!(1234567.891)), "$1,234,567.89");
        assert_eq!(usd(dec!(999.5)), "$999.50");
        assert_eq!(usd(dec!(0)), "$0.00");
    }

    #[test]
    fn formats_negative_amounts() {
        assert_eq!(usd(dec!(-6000)), "$-6,000.00");
    }

    #[test]
    fn whole_dollar_variant() {
        assert_eq!(usd_whole(dec!(4000.0)), "$4,000");
        assert_eq!(usd_whole(dec!(123)), "$123");
    }
}
