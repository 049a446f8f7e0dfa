use crate::sim::SimTime;

#[test]
fn sim_time_unit_conversions() {
    assert_eq!(SimTime::from_micros(1), SimTime(1_000));
    assert_eq!(SimTime::from_millis(1), SimTime(1_000_000));
    assert_eq!(SimTime::from_secs(1), SimTime(1_000_000_000));
    assert_eq!(SimTime::from_millis(2_500).as_millis(), 2_500);
}

#[test]
fn sim_time_unit_conversions_saturate_on_overflow() {
    assert_eq!(SimTime::from_micros(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime::from_millis(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime::from_secs(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime(u64::MAX).after(SimTime(1)), SimTime(u64::MAX));
    assert_eq!(SimTime(u64::MAX).times(2), SimTime(u64::MAX));
}

#[test]
fn sim_time_display_shows_millis_with_micros() {
    assert_eq!(SimTime::from_micros(1_234_567).to_string(), "1234.567ms");
    assert_eq!(SimTime::ZERO.to_string(), "0.000ms");
}
