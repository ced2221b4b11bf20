use std::fmt;
use std::str::FromStr;

pub const PPM_PER_PERCENT: f64 = 10_000.0;

#[derive(Debug)]
pub struct ParseUnitError(String);

impl fmt::Display for ParseUnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ParseUnitError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConcentrationUnit {
    Ppm, // parts per million
    #[default]
    Percent, // volume percent
}

impl ConcentrationUnit {
    /// Convert a value in this unit into volume percent.
    /// 400 ppm is 0.04 %.
    pub fn to_percent(self, value: f64) -> f64 {
        match self {
            ConcentrationUnit::Ppm => value / PPM_PER_PERCENT,
            ConcentrationUnit::Percent => value,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConcentrationUnit::Ppm => "ppm",
            ConcentrationUnit::Percent => "%",
        }
    }
}

impl fmt::Display for ConcentrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConcentrationUnit {
    type Err = ParseUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ppm" => Ok(ConcentrationUnit::Ppm),
            "percent" | "pct" | "%" => Ok(ConcentrationUnit::Percent),
            other => Err(ParseUnitError(format!("Invalid unit: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppm_to_percent() {
        assert_eq!(ConcentrationUnit::Ppm.to_percent(400.0), 0.04);
        assert_eq!(ConcentrationUnit::Percent.to_percent(0.04), 0.04);
    }

    #[test]
    fn parse_units() {
        assert_eq!("PPM".parse::<ConcentrationUnit>().unwrap(), ConcentrationUnit::Ppm);
        assert_eq!("percent".parse::<ConcentrationUnit>().unwrap(), ConcentrationUnit::Percent);
        assert!("ppb".parse::<ConcentrationUnit>().is_err());
    }
}
