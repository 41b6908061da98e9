use chrono::{DateTime, Duration, Utc};

use crate::domain::{ProgressRecord, Quality, DEFAULT_EASE_FACTOR, MIN_EASE_FACTOR};

/// Ease lost on a failed review
const AGAIN_EASE_PENALTY: f64 = 0.20;

/// Interval after the second consecutive passing review
const SECOND_INTERVAL_DAYS: i64 = 6;

/// Keeps `next_review_at` inside chrono's representable range
pub const MAX_INTERVAL_DAYS: i64 = 36_500;

/// Ease adjustment applied for each rating
fn ease_delta(quality: Quality) -> f64 {
  match quality {
    Quality::Again => -AGAIN_EASE_PENALTY,
    Quality::Hard => -0.15,
    Quality::Good => 0.0,
    Quality::Easy => 0.15,
  }
}

/// Calculate the next review for an item using the current time.
///
/// `prior` is `None` on first exposure, which is treated as ease 2.5,
/// interval 0, repetitions 0.
pub fn compute_next_review(prior: Option<&ProgressRecord>, quality: Quality) -> ProgressRecord {
  compute_next_review_at(prior, quality, Utc::now())
}

/// Calculate the next review relative to `now`.
///
/// - Again: repetitions reset to 0, interval 1 day, ease reduced
/// - Hard/Good/Easy: repetitions + 1, interval 1 → 6 → round(prior * ease)
///
/// Ease never drops below 1.3 and has no upper bound.
pub fn compute_next_review_at(
  prior: Option<&ProgressRecord>,
  quality: Quality,
  now: DateTime<Utc>,
) -> ProgressRecord {
  let (ease, prior_interval, prior_reps) = prior
    .map(|p| (p.ease_factor, p.interval_days, p.repetitions))
    .unwrap_or((DEFAULT_EASE_FACTOR, 0, 0));

  let ease_factor = (ease + ease_delta(quality)).max(MIN_EASE_FACTOR);

  let (interval_days, repetitions) = if quality.is_passing() {
    let repetitions = prior_reps + 1;
    let interval = match repetitions {
      1 => 1,
      2 => SECOND_INTERVAL_DAYS,
      // interval 0 with reps >= 2 only comes from bad data; still schedule a day out
      _ => ((prior_interval as f64) * ease_factor)
        .round()
        .clamp(1.0, MAX_INTERVAL_DAYS as f64) as i64,
    };
    (interval, repetitions)
  } else {
    (1, 0)
  };

  ProgressRecord {
    ease_factor,
    interval_days,
    repetitions,
    next_review_at: now + Duration::days(interval_days),
  }
}

/// Human-readable label for an interval in days
pub fn format_interval(days: i64) -> String {
  fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
      format!("in 1 {}", unit)
    } else {
      format!("in {} {}s", n, unit)
    }
  }

  match days {
    i64::MIN..=0 => "Today".to_string(),
    1 => "Tomorrow".to_string(),
    2..=6 => format!("in {} days", days),
    7..=29 => plural((days as f64 / 7.0).round() as i64, "week"),
    30..=364 => plural((days as f64 / 30.0).round() as i64, "month"),
    _ => plural((days as f64 / 365.0).round() as i64, "year"),
  }
}
