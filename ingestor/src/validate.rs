use crate::errors::{Error, Result};
use crate::model::{NewReading, RangeFilter};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const ADC_MIN: i64 = 0;
const ADC_MAX: i64 = 255;
const VOLTAGE_MIN: f64 = 0.0;
pub const DEFAULT_PER_PAGE: u32 = 20;
const PER_PAGE_MAX: u32 = 100;

/// Validates a single candidate reading
pub fn validate(reading: &NewReading) -> Result<()> {
    if reading.adc_value < ADC_MIN || reading.adc_value > ADC_MAX {
        return Err(Error::Validation(format!(
            "adc_value {} out of range [{}, {}]",
            reading.adc_value, ADC_MIN, ADC_MAX
        )));
    }

    if !reading.voltage.is_finite() || reading.voltage < VOLTAGE_MIN {
        return Err(Error::Validation(format!(
            "voltage {} must be a finite value >= {}",
            reading.voltage, VOLTAGE_MIN
        )));
    }

    if !reading.temperature_c.is_finite() {
        return Err(Error::Validation(format!(
            "temperature_c {} must be finite",
            reading.temperature_c
        )));
    }

    Ok(())
}

/// Validates a whole batch. One bad item rejects the batch.
pub fn validate_batch(readings: &[NewReading], max_batch: usize) -> Result<()> {
    if readings.is_empty() {
        return Err(Error::Validation("batch must contain at least one reading".to_string()));
    }

    if readings.len() > max_batch {
        return Err(Error::Validation(format!(
            "batch of {} readings exceeds the limit of {}",
            readings.len(),
            max_batch
        )));
    }

    for (index, reading) in readings.iter().enumerate() {
        validate(reading).map_err(|e| match e {
            Error::Validation(msg) => Error::Validation(format!("item {}: {}", index, msg)),
            other => other,
        })?;
    }

    Ok(())
}

/// Checks pagination parameters, applying defaults.
pub fn validate_page(page: Option<i64>, per_page: Option<i64>) -> Result<(u32, u32)> {
    let page = page.unwrap_or(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE as i64);

    let page = u32::try_from(page)
        .ok()
        .filter(|p| *p >= 1)
        .ok_or_else(|| Error::Validation(format!("page {} must be >= 1", page)))?;

    let per_page = u32::try_from(per_page)
        .ok()
        .filter(|p| (1..=PER_PAGE_MAX).contains(p))
        .ok_or_else(|| {
            Error::Validation(format!(
                "per_page {} out of range [1, {}]",
                per_page, PER_PAGE_MAX
            ))
        })?;

    Ok((page, per_page))
}

/// Parses a date bound. Accepts RFC 3339, a naive date-time (taken as UTC)
/// or a bare date (midnight UTC).
pub fn parse_date_bound(name: &str, value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }

    if let Some(naive) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(naive.and_utc());
    }

    Err(Error::Validation(format!(
        "{} '{}' is not a valid ISO 8601 date",
        name, value
    )))
}

/// Builds the timestamp filter shared by listing, stats and purge.
/// Blank parameters count as absent.
pub fn range_filter(start: Option<&str>, end: Option<&str>) -> Result<RangeFilter> {
    let bound = |name: &str, value: Option<&str>| {
        value
            .filter(|v| !v.trim().is_empty())
            .map(|v| parse_date_bound(name, v))
            .transpose()
    };

    Ok(RangeFilter {
        start: bound("start_date", start)?,
        end: bound("end_date", end)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading(adc_value: i64, voltage: f64) -> NewReading {
        NewReading {
            adc_value,
            voltage,
            temperature_c: 23.5,
        }
    }

    #[test]
    fn test_valid_reading() {
        assert!(validate(&reading(128, 1.65)).is_ok());
        assert!(validate(&reading(0, 0.0)).is_ok());
        assert!(validate(&reading(255, 3.3)).is_ok());
    }

    #[test]
    fn test_adc_out_of_range() {
        assert!(matches!(validate(&reading(256, 1.0)), Err(Error::Validation(_))));
        assert!(matches!(validate(&reading(-1, 1.0)), Err(Error::Validation(_))));
    }

    #[test]
    fn test_negative_voltage() {
        assert!(validate(&reading(10, -0.01)).is_err());
        assert!(validate(&reading(10, f64::NAN)).is_err());
    }

    #[test]
    fn test_negative_temperature_is_allowed() {
        let mut r = reading(200, 2.5);
        r.temperature_c = -12.4;
        assert!(validate(&r).is_ok());
    }

    #[test]
    fn test_batch_rejected_by_single_bad_item() {
        let batch = vec![reading(1, 0.1), reading(300, 0.2), reading(3, 0.3)];
        let err = validate_batch(&batch, 100).unwrap_err();
        assert!(err.to_string().contains("item 1"));
    }

    #[test]
    fn test_batch_empty_and_oversized() {
        assert!(validate_batch(&[], 100).is_err());
        let batch = vec![reading(1, 0.1); 3];
        assert!(validate_batch(&batch, 2).is_err());
        assert!(validate_batch(&batch, 3).is_ok());
    }

    #[test]
    fn test_page_defaults_and_bounds() {
        assert_eq!(validate_page(None, None).unwrap(), (1, 20));
        assert_eq!(validate_page(Some(3), Some(100)).unwrap(), (3, 100));
        assert!(validate_page(Some(0), None).is_err());
        assert!(validate_page(None, Some(0)).is_err());
        assert!(validate_page(None, Some(101)).is_err());
        assert!(validate_page(Some(-4), None).is_err());
    }

    #[test]
    fn test_parse_date_bound_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(
            parse_date_bound("start_date", "2024-05-01T12:30:00Z").unwrap(),
            expected
        );
        assert_eq!(
            parse_date_bound("start_date", "2024-05-01T14:30:00+02:00").unwrap(),
            expected
        );
        assert_eq!(
            parse_date_bound("start_date", "2024-05-01T12:30:00").unwrap(),
            expected
        );
        assert_eq!(
            parse_date_bound("start_date", "2024-05-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_date_bound("start_date", "yesterday").is_err());
    }

    #[test]
    fn test_range_filter() {
        let filter = range_filter(Some("2024-01-01"), None).unwrap();
        assert!(filter.start.is_some());
        assert!(filter.end.is_none());
        assert!(range_filter(None, None).unwrap().is_unbounded());
        assert!(range_filter(None, Some("not-a-date")).is_err());
        assert!(range_filter(Some(""), Some("  ")).unwrap().is_unbounded());
    }
}
