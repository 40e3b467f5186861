//! Normalized view of an external anime-DB entry.

use chrono::{DateTime, TimeZone, Utc};

/// One media entry as returned by AniList or Jikan, reduced to the fields the
/// season matcher needs.
#[derive(Debug, Clone)]
pub struct AnimeMedia {
    pub anilist_id: Option<i64>,
    pub mal_id: Option<i64>,
    /// Romaji, English, and native titles, in that order, deduplicated.
    pub titles: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub episodes: Option<i32>,
    pub season_year: Option<i32>,
    /// WINTER / SPRING / SUMMER / FALL.
    pub season: Option<String>,
    /// TV, TV_SHORT, MOVIE, SPECIAL, OVA, ONA, ...
    pub format: Option<String>,
    /// Still airing (no end date expected yet).
    pub airing: bool,
}

/// Build a UTC midnight timestamp from a fuzzy year/month/day triple.
/// Missing month or day defaults to 1; a missing year yields `None`.
pub fn fuzzy_date(year: Option<i32>, month: Option<u32>, day: Option<u32>) -> Option<DateTime<Utc>> {
    let year = year?;
    Utc.with_ymd_and_hms(year, month.unwrap_or(1), day.unwrap_or(1), 0, 0, 0)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_date_defaults_month_and_day() {
        let d = fuzzy_date(Some(2025), None, None).unwrap();
        assert_eq!(d.to_rfc3339(), "2025-01-01T00:00:00+00:00");

        let d = fuzzy_date(Some(2025), Some(4), Some(5)).unwrap();
        assert_eq!(d.to_rfc3339(), "2025-04-05T00:00:00+00:00");
    }

    #[test]
    fn fuzzy_date_requires_year() {
        assert!(fuzzy_date(None, Some(1), Some(1)).is_none());
    }
}
