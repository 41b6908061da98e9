//! XP arithmetic for lessons and review sessions.

/// XP for completing a lesson
pub const LESSON_XP: u64 = 10;

/// XP per reviewed word
pub const XP_PER_WORD: u64 = 1;

/// Session size that earns the review bonus
pub const REVIEW_BONUS_THRESHOLD: u64 = 10;

/// Bonus XP for reaching the threshold in one session
pub const REVIEW_BONUS_XP: u64 = 5;

pub fn lesson_xp() -> u64 {
  LESSON_XP
}

/// XP for a review session of `words_reviewed` words.
///
/// Input comes from UI counters, so it is normalized first: NaN, infinities
/// and negatives count as 0, fractions are floored.
pub fn review_xp(words_reviewed: f64) -> u64 {
  let words = normalize_count(words_reviewed);
  let bonus = if words >= REVIEW_BONUS_THRESHOLD { REVIEW_BONUS_XP } else { 0 };
  words.saturating_mul(XP_PER_WORD).saturating_add(bonus)
}

fn normalize_count(raw: f64) -> u64 {
  if !raw.is_finite() || raw <= 0.0 {
    return 0;
  }
  // `as` saturates at u64::MAX for huge finite values
  raw.floor() as u64
}

/// New total after an award. Negative amounts are ignored, so totals never go down.
pub fn apply_xp_award(current: u64, amount: i64) -> u64 {
  current.saturating_add(amount.max(0) as u64)
}
