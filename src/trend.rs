use chrono::{Duration, NaiveDate, Utc};

use crate::error::{OutbreakError, Result};
use crate::models::{Classification, TimeSeriesPoint, TrendSnapshot};

pub const WINDOW: usize = 7;
pub const REQUIRED_POINTS: usize = 2 * WINDOW;

/// Builds the snapshot from the two most recent non-overlapping seven-point
/// windows ending at or before `as_of`.
pub fn compute_snapshot(series: &[TimeSeriesPoint], as_of: NaiveDate) -> Result<TrendSnapshot> {
    validate_series(series)?;
    let eligible = eligible_points(series, as_of);

    if eligible.len() < REQUIRED_POINTS {
        return Err(OutbreakError::InsufficientData {
            needed: REQUIRED_POINTS,
            available: eligible.len(),
        });
    }

    let split = eligible.len() - WINDOW;
    let current = &eligible[split..];
    let prior = &eligible[split - WINDOW..split];
    Ok(build_snapshot(current, prior, as_of, false))
}

/// Reduced-confidence snapshot for series too short for `compute_snapshot`.
/// Uses up to seven recent points and whatever precedes them.
pub fn estimate_snapshot(series: &[TimeSeriesPoint], as_of: NaiveDate) -> Result<TrendSnapshot> {
    validate_series(series)?;
    let eligible = eligible_points(series, as_of);

    if eligible.is_empty() {
        return Err(OutbreakError::InsufficientData {
            needed: REQUIRED_POINTS,
            available: 0,
        });
    }
    if eligible.len() >= REQUIRED_POINTS {
        return compute_snapshot(series, as_of);
    }

    let split = eligible.len().saturating_sub(WINDOW);
    let current = &eligible[split..];
    let prior = if split == 0 {
        current
    } else {
        &eligible[split.saturating_sub(WINDOW)..split]
    };
    Ok(build_snapshot(current, prior, as_of, true))
}

fn build_snapshot(
    current: &[TimeSeriesPoint],
    prior: &[TimeSeriesPoint],
    as_of: NaiveDate,
    estimated: bool,
) -> TrendSnapshot {
    let seven_day_avg = mean_count(current);
    let prior_seven_day_avg = mean_count(prior);
    let growth = growth_rate(seven_day_avg, prior_seven_day_avg);
    let region_key = current
        .last()
        .map(|p| p.region_key.clone())
        .unwrap_or_default();

    TrendSnapshot {
        region_key,
        as_of_date: as_of,
        seven_day_avg,
        prior_seven_day_avg,
        growth_rate: growth,
        classification: classify_growth(growth),
        outbreak_probability: outbreak_probability(growth, seven_day_avg),
        estimated,
    }
}

/// Zero when there is no baseline: no prior cases reads as stable.
pub fn growth_rate(current_avg: f64, prior_avg: f64) -> f64 {
    if prior_avg == 0.0 {
        return 0.0;
    }
    (current_avg - prior_avg) / prior_avg
}

/// Each bucket includes its lower bound exclusively, so a value sitting on a
/// threshold lands in the less severe bucket.
pub fn classify_growth(growth_rate: f64) -> Classification {
    if growth_rate > 0.20 {
        Classification::RapidAcceleration
    } else if growth_rate > 0.10 {
        Classification::ModerateGrowth
    } else if growth_rate > -0.10 {
        Classification::Stable
    } else if growth_rate > -0.20 {
        Classification::Declining
    } else {
        Classification::RapidDecline
    }
}

/// Fixed lookup; kept as a table so every score can be traced to one row.
pub fn outbreak_probability(growth_rate: f64, seven_day_avg: f64) -> u8 {
    if growth_rate > 0.15 && seven_day_avg > 10.0 {
        85
    } else if growth_rate > 0.10 && seven_day_avg > 5.0 {
        70
    } else if growth_rate > 0.05 {
        50
    } else if growth_rate > -0.05 {
        30
    } else {
        15
    }
}

/// Trailing seven-point mean at every position that has a full window.
pub fn moving_averages(series: &[TimeSeriesPoint]) -> Vec<(NaiveDate, f64)> {
    series
        .windows(WINDOW)
        .filter_map(|window| window.last().map(|last| (last.date, mean_count(window))))
        .collect()
}

/// Week-over-week growth at every position that has two full windows.
pub fn weekly_growth_series(series: &[TimeSeriesPoint]) -> Vec<(NaiveDate, f64)> {
    let averages = moving_averages(series);
    averages
        .iter()
        .skip(WINDOW)
        .zip(averages.iter())
        .map(|((date, current), (_, prior))| (*date, growth_rate(*current, *prior)))
        .collect()
}

/// Series must be one region, strictly ascending by date.
pub fn validate_series(series: &[TimeSeriesPoint]) -> Result<()> {
    for pair in series.windows(2) {
        if pair[1].region_key != pair[0].region_key {
            return Err(OutbreakError::input(format!(
                "series mixes regions {} and {}",
                pair[0].region_key, pair[1].region_key
            )));
        }
        if pair[1].date <= pair[0].date {
            return Err(OutbreakError::input(format!(
                "series not strictly ascending at {}",
                pair[1].date
            )));
        }
    }
    Ok(())
}

pub fn cutoff_date(as_of: NaiveDate, lookback_days: i64) -> NaiveDate {
    as_of - Duration::days(lookback_days.max(REQUIRED_POINTS as i64) - 1)
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn eligible_points(series: &[TimeSeriesPoint], as_of: NaiveDate) -> &[TimeSeriesPoint] {
    let end = series.partition_point(|p| p.date <= as_of);
    &series[..end]
}

fn mean_count(points: &[TimeSeriesPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| p.raw_count as f64).sum::<f64>() / points.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn series_from(counts: &[i64]) -> Vec<TimeSeriesPoint> {
        counts
            .iter()
            .enumerate()
            .map(|(i, count)| TimeSeriesPoint {
                date: start() + Duration::days(i as i64),
                region_key: "California".to_string(),
                raw_count: *count,
                population: 39_000_000,
                hospitalized: None,
                deaths: None,
                positivity: None,
            })
            .collect()
    }

    fn last_date(series: &[TimeSeriesPoint]) -> NaiveDate {
        series.last().unwrap().date
    }

    #[test]
    fn constant_series_is_stable() {
        let series = series_from(&[10; 14]);
        let snapshot = compute_snapshot(&series, last_date(&series)).unwrap();
        assert_eq!(snapshot.growth_rate, 0.0);
        assert_eq!(snapshot.classification, Classification::Stable);
        assert_eq!(snapshot.outbreak_probability, 30);
        assert!(!snapshot.estimated);
    }

    #[test]
    fn doubling_average_is_rapid_acceleration() {
        let mut counts = vec![10; 7];
        counts.extend([20; 7]);
        let series = series_from(&counts);
        let snapshot = compute_snapshot(&series, last_date(&series)).unwrap();
        assert_eq!(snapshot.seven_day_avg, 20.0);
        assert_eq!(snapshot.prior_seven_day_avg, 10.0);
        assert_eq!(snapshot.growth_rate, 1.0);
        assert_eq!(snapshot.classification, Classification::RapidAcceleration);
        assert_eq!(snapshot.outbreak_probability, 85);
    }

    #[test]
    fn zero_baseline_means_zero_growth() {
        let mut counts = vec![0; 7];
        counts.extend([50; 7]);
        let series = series_from(&counts);
        let snapshot = compute_snapshot(&series, last_date(&series)).unwrap();
        assert_eq!(snapshot.growth_rate, 0.0);
        assert!(snapshot.growth_rate.is_finite());
        assert_eq!(snapshot.classification, Classification::Stable);
    }

    #[test]
    fn uses_only_points_up_to_as_of() {
        let mut counts = vec![10; 14];
        counts.extend([1_000; 5]);
        let series = series_from(&counts);
        let as_of = start() + Duration::days(13);
        let snapshot = compute_snapshot(&series, as_of).unwrap();
        assert_eq!(snapshot.seven_day_avg, 10.0);
        assert_eq!(snapshot.as_of_date, as_of);
    }

    #[test]
    fn windows_come_from_the_latest_fourteen_points() {
        let mut counts = vec![500; 10];
        counts.extend([10; 7]);
        counts.extend([11; 7]);
        let series = series_from(&counts);
        let snapshot = compute_snapshot(&series, last_date(&series)).unwrap();
        assert_eq!(snapshot.prior_seven_day_avg, 10.0);
        assert!((snapshot.growth_rate - 0.1).abs() < 1e-9);
    }

    #[test]
    fn short_series_is_insufficient() {
        let series = series_from(&[10; 13]);
        let err = compute_snapshot(&series, last_date(&series)).unwrap_err();
        assert!(matches!(
            err,
            OutbreakError::InsufficientData { needed: 14, available: 13 }
        ));
    }

    #[test]
    fn identical_input_gives_identical_snapshot() {
        let series = series_from(&[3, 5, 8, 2, 9, 4, 7, 6, 1, 8, 12, 4, 9, 15, 6]);
        let as_of = last_date(&series);
        let first = compute_snapshot(&series, as_of).unwrap();
        let second = compute_snapshot(&series, as_of).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn boundaries_fall_to_less_severe_bucket() {
        assert_eq!(classify_growth(0.20), Classification::ModerateGrowth);
        assert_eq!(classify_growth(0.2000001), Classification::RapidAcceleration);
        assert_eq!(classify_growth(0.10), Classification::Stable);
        assert_eq!(classify_growth(-0.10), Classification::Declining);
        assert_eq!(classify_growth(-0.20), Classification::RapidDecline);
        assert_eq!(classify_growth(-0.1999), Classification::Declining);
    }

    #[test]
    fn every_growth_rate_maps_to_one_bucket() {
        let mut seen = std::collections::HashSet::new();
        let mut g = -2.0;
        while g <= 2.0 {
            seen.insert(classify_growth(g));
            g += 0.001;
        }
        assert_eq!(seen.len(), Classification::ALL.len());
        assert_eq!(classify_growth(f64::INFINITY), Classification::RapidAcceleration);
        assert_eq!(classify_growth(f64::NEG_INFINITY), Classification::RapidDecline);
    }

    #[test]
    fn probability_is_monotonic_in_growth() {
        for avg in [0.0, 4.0, 5.0, 6.0, 10.0, 10.5, 250.0] {
            let mut previous = 0;
            let mut g = -1.0;
            while g <= 1.5 {
                let score = outbreak_probability(g, avg);
                assert!(score >= previous, "avg {avg} growth {g}");
                previous = score;
                g += 0.0025;
            }
        }
    }

    #[test]
    fn probability_table_rows() {
        assert_eq!(outbreak_probability(0.16, 11.0), 85);
        assert_eq!(outbreak_probability(0.16, 10.0), 70);
        assert_eq!(outbreak_probability(0.11, 5.0), 50);
        assert_eq!(outbreak_probability(0.06, 100.0), 50);
        assert_eq!(outbreak_probability(0.0, 100.0), 30);
        assert_eq!(outbreak_probability(-0.05, 100.0), 15);
    }

    #[test]
    fn estimate_handles_partial_windows() {
        let series = series_from(&[4, 4, 4, 8, 8, 8, 8, 8, 8, 8]);
        let snapshot = estimate_snapshot(&series, last_date(&series)).unwrap();
        assert!(snapshot.estimated);
        assert_eq!(snapshot.seven_day_avg, 8.0);
        assert_eq!(snapshot.prior_seven_day_avg, 4.0);

        let single = series_from(&[6]);
        let snapshot = estimate_snapshot(&single, last_date(&single)).unwrap();
        assert_eq!(snapshot.growth_rate, 0.0);
        assert!(estimate_snapshot(&[], start()).is_err());
    }

    #[test]
    fn estimate_defers_to_full_computation() {
        let series = series_from(&[10; 20]);
        let snapshot = estimate_snapshot(&series, last_date(&series)).unwrap();
        assert!(!snapshot.estimated);
    }

    #[test]
    fn rejects_unordered_or_duplicate_dates() {
        let mut series = series_from(&[1; 14]);
        series.swap(3, 4);
        assert!(matches!(
            compute_snapshot(&series, start() + Duration::days(20)),
            Err(OutbreakError::Input(_))
        ));

        let mut series = series_from(&[1; 14]);
        series[5].date = series[4].date;
        assert!(validate_series(&series).is_err());
    }

    #[test]
    fn derived_series_lengths() {
        let series = series_from(&[10; 20]);
        assert_eq!(moving_averages(&series).len(), 14);
        let growth = weekly_growth_series(&series);
        assert_eq!(growth.len(), 7);
        assert!(growth.iter().all(|(_, g)| *g == 0.0));
    }

    #[test]
    fn cutoff_covers_lookback_window() {
        let as_of = NaiveDate::from_ymd_opt(2026, 3, 28).unwrap();
        assert_eq!(cutoff_date(as_of, 28), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(cutoff_date(as_of, 3), as_of - Duration::days(13));
    }
}
