use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Currencies that appear in the vacancy exports.
/// A closed set: an unknown code in the input makes the row unusable,
/// since there is nothing to convert it with.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Currency {
    #[serde(rename = "AZN")]
    Azn,
    #[serde(rename = "BYR")]
    Byr,
    #[serde(rename = "EUR")]
    Eur,
    #[serde(rename = "GEL")]
    Gel,
    #[serde(rename = "KGS")]
    Kgs,
    #[serde(rename = "KZT")]
    Kzt,
    #[serde(rename = "RUR")]
    Rur,
    #[serde(rename = "UAH")]
    Uah,
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "UZS")]
    Uzs,
}

impl Currency {
    pub const ALL: [Currency; 10] = [
        Currency::Azn,
        Currency::Byr,
        Currency::Eur,
        Currency::Gel,
        Currency::Kgs,
        Currency::Kzt,
        Currency::Rur,
        Currency::Uah,
        Currency::Usd,
        Currency::Uzs,
    ];

    pub fn from_code(code: &str) -> Option<Currency> {
        match code {
            "AZN" => Some(Currency::Azn),
            "BYR" => Some(Currency::Byr),
            "EUR" => Some(Currency::Eur),
            "GEL" => Some(Currency::Gel),
            "KGS" => Some(Currency::Kgs),
            "KZT" => Some(Currency::Kzt),
            "RUR" => Some(Currency::Rur),
            "UAH" => Some(Currency::Uah),
            "USD" => Some(Currency::Usd),
            "UZS" => Some(Currency::Uzs),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Azn => "AZN",
            Currency::Byr => "BYR",
            Currency::Eur => "EUR",
            Currency::Gel => "GEL",
            Currency::Kgs => "KGS",
            Currency::Kzt => "KZT",
            Currency::Rur => "RUR",
            Currency::Uah => "UAH",
            Currency::Usd => "USD",
            Currency::Uzs => "UZS",
        }
    }

    /// The fixed reference rate to rubles, used when no historical
    /// rate table is requested
    pub fn fixed_rub_rate(&self) -> Decimal {
        match self {
            Currency::Azn => dec!(35.68),
            Currency::Byr => dec!(23.91),
            Currency::Eur => dec!(59.90),
            Currency::Gel => dec!(21.74),
            Currency::Kgs => dec!(0.76),
            Currency::Kzt => dec!(0.13),
            Currency::Rur => dec!(1),
            Currency::Uah => dec!(1.64),
            Currency::Usd => dec!(60.66),
            Currency::Uzs => dec!(0.0055),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for currency in Currency::ALL.iter() {
            assert_eq!(Currency::from_code(currency.code()), Some(*currency));
        }
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(Currency::from_code("BTC"), None);
        assert_eq!(Currency::from_code("rur"), None);
    }

    #[test]
    fn test_ruble_rate_is_identity() {
        assert_eq!(Currency::Rur.fixed_rub_rate(), dec!(1));
    }
}
