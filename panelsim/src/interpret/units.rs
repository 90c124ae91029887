//! Quantity parsing for schematic annotations like `230V`, `16 A`,
//! `2,5mm²`, `3x1.5mm2`, `25m`, `0.4Ω`, `Cu`.

use crate::circuit::ConductorMaterial;

/// One annotated quantity, normalised to SI base units (V, A, W, m, Ω, mm²)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantity {
    Voltage(f64),
    Current(f64),
    Power(f64),
    Length(f64),
    CrossSection(f64),
    Impedance(f64),
    Material(ConductorMaterial),
}

/// Result of scanning a piece of text for quantities
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotation {
    pub quantities: Vec<Quantity>,
    /// Words that are not quantities, in order
    pub words: Vec<String>,
}

impl Annotation {
    pub fn is_pure(&self) -> bool {
        !self.quantities.is_empty() && self.words.is_empty()
    }
}

/// Scan free text for quantities. Unit-less numbers and other words end up
/// in `words`.
pub fn scan(text: &str) -> Annotation {
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == '/' || c == ';' || c == '|')
        .map(|t| t.trim_matches(|c: char| matches!(c, ',' | ':' | '(' | ')' | '[' | ']')))
        .filter(|t| !t.is_empty())
        .collect();

    let mut annotation = Annotation::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];

        // "230 V": a bare number followed by a unit-only token
        if let (Some(number), Some(next)) = (parse_number(token), tokens.get(i + 1)) {
            if let Some(q) = unit_quantity(number, &next.to_lowercase()) {
                annotation.quantities.push(q);
                i += 2;
                continue;
            }
        }

        match parse_quantity(token) {
            Some(q) => annotation.quantities.push(q),
            None => annotation.words.push(token.to_string()),
        }
        i += 1;
    }
    annotation
}

/// Parse a single token such as `16A`, `2,5mm²`, `3x2.5mm2` or `Cu`.
pub fn parse_quantity(token: &str) -> Option<Quantity> {
    let lower = token.to_lowercase();
    match lower.as_str() {
        "cu" | "copper" => return Some(Quantity::Material(ConductorMaterial::Copper)),
        "al" | "alu" | "aluminium" | "aluminum" => {
            return Some(Quantity::Material(ConductorMaterial::Aluminium))
        }
        _ => {}
    }

    let body = strip_core_count(&lower);
    let split = body
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(body.len());
    if split == 0 {
        return None;
    }
    let number = parse_number(&body[..split])?;
    unit_quantity(number, &body[split..])
}

/// `3x2.5mm2`, `5g1.5` and `4×16` carry a core count in front of the size.
fn strip_core_count(token: &str) -> &str {
    let digits = token.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return token;
    }
    let rest = &token[digits..];
    for marker in ['x', '×', 'g'] {
        if let Some(after) = rest.strip_prefix(marker) {
            if after.starts_with(|c: char| c.is_ascii_digit()) {
                return after;
            }
        }
    }
    token
}

/// Decimal number with `.` or `,` as separator
fn parse_number(s: &str) -> Option<f64> {
    if s.is_empty() || !s.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    s.replace(',', ".").parse::<f64>().ok()
}

fn unit_quantity(value: f64, unit: &str) -> Option<Quantity> {
    let q = match unit {
        "v" => Quantity::Voltage(value),
        "kv" => Quantity::Voltage(value * 1000.0),
        "a" => Quantity::Current(value),
        "ma" => Quantity::Current(value / 1000.0),
        "ka" => Quantity::Current(value * 1000.0),
        "w" | "va" => Quantity::Power(value),
        "kw" | "kva" => Quantity::Power(value * 1000.0),
        "m" => Quantity::Length(value),
        "km" => Quantity::Length(value * 1000.0),
        "mm2" | "mm²" | "qmm" => Quantity::CrossSection(value),
        "ω" | "ohm" | "ohms" => Quantity::Impedance(value),
        "mω" | "mohm" => Quantity::Impedance(value / 1000.0),
        "kω" | "kohm" => Quantity::Impedance(value * 1000.0),
        _ => return None,
    };
    Some(q)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity_units() {
        assert_eq!(parse_quantity("230V"), Some(Quantity::Voltage(230.0)));
        assert_eq!(parse_quantity("0,4kV"), Some(Quantity::Voltage(400.0)));
        assert_eq!(parse_quantity("16A"), Some(Quantity::Current(16.0)));
        assert_eq!(parse_quantity("30mA"), Some(Quantity::Current(0.03)));
        assert_eq!(parse_quantity("2.3kW"), Some(Quantity::Power(2300.0)));
        assert_eq!(parse_quantity("25m"), Some(Quantity::Length(25.0)));
        assert_eq!(parse_quantity("2,5mm²"), Some(Quantity::CrossSection(2.5)));
        assert_eq!(parse_quantity("3x1.5mm2"), Some(Quantity::CrossSection(1.5)));
        assert_eq!(parse_quantity("0.4Ω"), Some(Quantity::Impedance(0.4)));
        assert_eq!(parse_quantity("120mΩ"), Some(Quantity::Impedance(0.12)));
        assert_eq!(
            parse_quantity("Cu"),
            Some(Quantity::Material(ConductorMaterial::Copper))
        );
    }

    #[test]
    fn test_parse_quantity_rejects_words() {
        assert_eq!(parse_quantity("L1"), None);
        assert_eq!(parse_quantity("Kitchen"), None);
        assert_eq!(parse_quantity("16"), None);
        assert_eq!(parse_quantity("16Hz"), None);
    }

    #[test]
    fn test_scan_splits_words_and_quantities() {
        let annotation = scan("Kitchen 230V/16A (B curve)");
        assert_eq!(
            annotation.quantities,
            vec![Quantity::Voltage(230.0), Quantity::Current(16.0)]
        );
        assert_eq!(annotation.words, vec!["Kitchen", "B", "curve"]);
        assert!(!annotation.is_pure());
    }

    #[test]
    fn test_scan_joins_number_and_unit() {
        let annotation = scan("230 V 10 A");
        assert_eq!(
            annotation.quantities,
            vec![Quantity::Voltage(230.0), Quantity::Current(10.0)]
        );
        assert!(annotation.is_pure());
    }
}
