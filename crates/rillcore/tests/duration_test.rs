use rillcore::parse_duration;
use std::time::Duration;

#[test]
fn single_units() {
    assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
    assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
    assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
}

#[test]
fn bare_numbers_are_seconds() {
    assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
    assert_eq!(parse_duration("0.5").unwrap(), Duration::from_millis(500));
}

#[test]
fn composite_durations() {
    assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    assert_eq!(
        parse_duration("1h15m").unwrap(),
        Duration::from_secs(3600 + 900)
    );
}

#[test]
fn surrounding_whitespace_is_trimmed() {
    assert_eq!(parse_duration("  1s ").unwrap(), Duration::from_secs(1));
}

#[test]
fn rejects_garbage() {
    assert!(parse_duration("").is_err());
    assert!(parse_duration("abc").is_err());
    assert!(parse_duration("1w").is_err());
    assert!(parse_duration("s").is_err());
}
