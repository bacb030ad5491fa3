//! Compact TTL grammar: an integer followed by one of `s`/`m`/`h`/`d`.
//! Whole seconds only; see DESIGN.md on the fractional-TTL open question.

use std::time::Duration;

use crate::error::ErrorKind;

/// One week, the longest TTL the agent will hold a secret for.
pub const MAX_TTL_SECONDS: u64 = 604_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttl(u64);

impl Ttl {
    /// Build a `Ttl` from a whole-second count, validating the
    /// `1..=604800` range.
    pub fn from_secs(secs: u64) -> Result<Self, ErrorKind> {
        if secs == 0 {
            return Err(ErrorKind::ttl_invalid("ttl must be positive"));
        }
        if secs > MAX_TTL_SECONDS {
            return Err(ErrorKind::ttl_invalid("ttl exceeds one week"));
        }
        Ok(Ttl(secs))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }

    /// Parse the compact `30s` / `15m` / `2h` / `1d` form.
    pub fn parse(s: &str) -> Result<Self, ErrorKind> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ErrorKind::ttl_invalid("empty ttl"));
        }
        let (num, unit) = s.split_at(s.len() - 1);
        let n: u64 = num
            .parse()
            .map_err(|_| ErrorKind::ttl_invalid("ttl is not an integer"))?;
        let multiplier: u64 = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            other => {
                return Err(ErrorKind::ttl_invalid(format!(
                    "unsupported ttl unit '{other}'"
                )))
            }
        };
        let secs = n
            .checked_mul(multiplier)
            .ok_or_else(|| ErrorKind::ttl_invalid("ttl overflows"))?;
        Ttl::from_secs(secs)
    }
}

impl PartialOrd for Ttl {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ttl {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_units() {
        assert_eq!(Ttl::parse("30s").unwrap().as_secs(), 30);
        assert_eq!(Ttl::parse("15m").unwrap().as_secs(), 900);
        assert_eq!(Ttl::parse("2h").unwrap().as_secs(), 7_200);
        assert_eq!(Ttl::parse("1d").unwrap().as_secs(), 86_400);
    }

    #[test]
    fn rejects_zero_and_oversize() {
        assert!(Ttl::parse("0s").is_err());
        assert!(Ttl::from_secs(MAX_TTL_SECONDS + 1).is_err());
        assert!(Ttl::from_secs(MAX_TTL_SECONDS).is_ok());
    }

    #[test]
    fn rejects_fractional_and_unknown_units() {
        assert!(Ttl::parse("500ms").is_err());
        assert!(Ttl::parse("30x").is_err());
        assert!(Ttl::parse("").is_err());
    }
}
