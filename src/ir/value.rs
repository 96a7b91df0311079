//! Numeric constants, as imported from GraphML initial-condition lists:
//! a bracketed list of numeric values, possibly complex with an `i` suffix.
//! We keep the parsed representation around rather than a raw string so
//! delay absorption and FIFO initial-condition reshaping can slice and
//! concatenate these lists directly.

use std::fmt;

/// A single real or complex numeric constant.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct NumericValue {
    /// Real component.
    pub real: f64,
    /// Imaginary component; `0.0` for a real value.
    pub imag: f64,
}

impl NumericValue {
    /// A real-valued constant.
    pub fn real(v: f64) -> Self {
        NumericValue { real: v, imag: 0.0 }
    }

    /// A complex-valued constant.
    pub fn complex(real: f64, imag: f64) -> Self {
        NumericValue { real, imag }
    }

    /// `true` if the imaginary component is non-zero.
    pub fn is_complex(&self) -> bool {
        self.imag != 0.0
    }
}

impl fmt::Display for NumericValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_complex() {
            write!(f, "{}+{}i", self.real, self.imag)
        } else {
            write!(f, "{}", self.real)
        }
    }
}

/// Parse the bracketed initial-condition list syntax imported from GraphML,
/// e.g. `[0, 1, 2.5+1i]`.
pub fn parse_initial_conditions(s: &str) -> Result<Vec<NumericValue>, String> {
    let inner = s
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| format!("malformed initial condition list: {:?}", s))?;
    let inner = inner.trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|tok| parse_one(tok.trim()))
        .collect()
}

fn parse_one(tok: &str) -> Result<NumericValue, String> {
    if let Some(body) = tok.strip_suffix('i') {
        // `<real>+<imag>i` or a pure-imaginary `<imag>i`.
        if let Some(plus_at) = body.rfind(|c| c == '+' || c == '-').filter(|&i| i > 0) {
            let (real_part, imag_part) = body.split_at(plus_at);
            let real: f64 = real_part
                .parse()
                .map_err(|_| format!("bad real component in {:?}", tok))?;
            let imag: f64 = imag_part
                .parse()
                .map_err(|_| format!("bad imaginary component in {:?}", tok))?;
            Ok(NumericValue::complex(real, imag))
        } else {
            let imag: f64 = body
                .parse()
                .map_err(|_| format!("bad imaginary component in {:?}", tok))?;
            Ok(NumericValue::complex(0.0, imag))
        }
    } else {
        let real: f64 = tok.parse().map_err(|_| format!("bad numeric value {:?}", tok))?;
        Ok(NumericValue::real(real))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_real_list() {
        let v = parse_initial_conditions("[0, 1, 2]").unwrap();
        assert_eq!(v, vec![NumericValue::real(0.0), NumericValue::real(1.0), NumericValue::real(2.0)]);
    }

    #[test]
    fn parses_complex_entries() {
        let v = parse_initial_conditions("[2.5+1i, -3i]").unwrap();
        assert_eq!(v[0], NumericValue::complex(2.5, 1.0));
        assert_eq!(v[1], NumericValue::complex(0.0, -3.0));
    }

    #[test]
    fn empty_list() {
        assert_eq!(parse_initial_conditions("[]").unwrap(), Vec::new());
    }
}
