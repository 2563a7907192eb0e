//! Per-fragment pacing: rate, pitch and the pause that follows.

use std::time::Duration;

pub const MIN_RATE: f32 = 0.5;
pub const MAX_RATE: f32 = 2.0;

const LONG_FRAGMENT_CHARS: usize = 120;
const SHORT_FRAGMENT_CHARS: usize = 30;

/// Clamp a speech rate into the range every engine accepts.
pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_RATE, MAX_RATE)
    } else {
        1.0
    }
}

/// Long fragments are read a little slower, short ones a little faster.
pub fn fragment_rate(base: f32, text: &str) -> f32 {
    let chars = text.chars().count();
    let factor = if chars > LONG_FRAGMENT_CHARS {
        0.95
    } else if chars < SHORT_FRAGMENT_CHARS {
        1.05
    } else {
        1.0
    };
    clamp_rate(clamp_rate(base) * factor)
}

pub fn fragment_pitch(text: &str) -> f32 {
    match text.trim_end().chars().last() {
        Some('?') => 1.1,
        Some('!') => 1.05,
        _ => 1.0,
    }
}

/// Silence inserted before the next fragment.
pub fn pause_after(text: &str) -> Duration {
    let millis = match text.trim_end().chars().last() {
        Some('.' | '!' | '?') => 400,
        Some(';' | ':') => 250,
        Some(',') => 150,
        _ => 100,
    };
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rate_follows_fragment_length() {
        let long = "a".repeat(121);
        let medium = "a".repeat(60);
        assert_relative_eq!(fragment_rate(1.0, &long), 0.95);
        assert_relative_eq!(fragment_rate(1.0, &medium), 1.0);
        assert_relative_eq!(fragment_rate(1.0, "Evet."), 1.05);
    }

    #[test]
    fn rate_is_always_clamped() {
        assert_relative_eq!(fragment_rate(2.0, "kısa"), MAX_RATE);
        assert_relative_eq!(fragment_rate(0.1, &"a".repeat(200)), MIN_RATE);
        assert_relative_eq!(clamp_rate(f32::NAN), 1.0);
        assert_relative_eq!(clamp_rate(7.5), 2.0);
    }

    #[test]
    fn pitch_rises_for_questions_and_exclamations() {
        assert_relative_eq!(fragment_pitch("Nasılsınız?"), 1.1);
        assert_relative_eq!(fragment_pitch("Harika! "), 1.05);
        assert_relative_eq!(fragment_pitch("Tamam."), 1.0);
        assert_relative_eq!(fragment_pitch(""), 1.0);
    }

    #[test]
    fn pauses_follow_trailing_punctuation() {
        assert_eq!(pause_after("Bitti."), Duration::from_millis(400));
        assert_eq!(pause_after("Şöyle:"), Duration::from_millis(250));
        assert_eq!(pause_after("ilk olarak,"), Duration::from_millis(150));
        assert_eq!(pause_after("ve sonra"), Duration::from_millis(100));
    }
}
