use super::SensorSource;
use crate::concentrationunit::ConcentrationUnit;
use crate::error::SensorError;
use crate::reading::SensorReading;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Upper bound for one fetch of the current reading.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Reads `{co, co2, o2}` from an HTTP endpoint serving the latest sample.
pub struct HttpSensorSource {
    client: reqwest::Client,
    url: String,
    co2_unit: ConcentrationUnit,
}

impl HttpSensorSource {
    pub fn new(url: impl Into<String>, co2_unit: ConcentrationUnit) -> Result<Self, SensorError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { client, url: url.into(), co2_unit })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SensorSource for HttpSensorSource {
    async fn current_reading(&self) -> Result<SensorReading, SensorError> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        let reading = parse_reading(&body, self.co2_unit)?;
        debug!(co = reading.co, co2 = reading.co2, o2 = reading.o2, "fetched sensor reading");
        Ok(reading)
    }
}

/// Accepts the payload itself or a one-element array of it. Numbers may
/// arrive as strings; anything unparsable counts as 0.
pub fn parse_reading(body: &Value, co2_unit: ConcentrationUnit) -> Result<SensorReading, SensorError> {
    let obj = match body {
        Value::Array(rows) => rows.first(),
        other => Some(other),
    }
    .and_then(Value::as_object)
    .ok_or(SensorError::NoReading)?;

    let field = |name: &str| obj.get(name).map_or(0.0, lenient_f64);
    Ok(SensorReading {
        co: field("co"),
        co2: co2_unit.to_percent(field("co2")),
        o2: field("o2"),
    })
}

fn lenient_f64(v: &Value) -> f64 {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|x| x.is_finite()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn numbers_and_strings_are_accepted() {
        let body = json!({ "co": "12.5", "co2": 0.04, "o2": "20.9" });
        let r = parse_reading(&body, ConcentrationUnit::Percent).unwrap();
        assert_eq!(r, SensorReading::new(12.5, 0.04, 20.9));
    }

    #[test]
    fn garbage_fields_read_as_zero() {
        let body = json!({ "co": "n/a", "o2": null });
        let r = parse_reading(&body, ConcentrationUnit::Percent).unwrap();
        assert_eq!(r, SensorReading::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn ppm_co2_is_converted() {
        let body = json!([{ "co": 1, "co2": "400", "o2": 20.5 }]);
        let r = parse_reading(&body, ConcentrationUnit::Ppm).unwrap();
        assert_relative_eq!(r.co2, 0.04, epsilon = 1e-12);
        assert_eq!(r.co, 1.0);
    }

    #[test]
    fn empty_payload_is_no_reading() {
        assert!(matches!(
            parse_reading(&json!([]), ConcentrationUnit::Percent),
            Err(SensorError::NoReading)
        ));
        assert!(matches!(
            parse_reading(&json!("down"), ConcentrationUnit::Percent),
            Err(SensorError::NoReading)
        ));
    }
}
