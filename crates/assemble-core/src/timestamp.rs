//! UTC formatting of UNIX timestamps for package dates.

/// Broken-down UTC time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcDateTime {
    pub year: i64,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl UtcDateTime {
    /// Convert seconds since the epoch using Howard Hinnant's civil-from-days
    /// algorithm.
    pub fn from_unix(secs: i64) -> Self {
        let days = secs.div_euclid(86_400);
        let secs_of_day = secs.rem_euclid(86_400) as u32;

        let z = days + 719_468;
        let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
        let doe = (z - era * 146_097) as u32;
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = doy - (153 * mp + 2) / 5 + 1;
        let month = if mp < 10 { mp + 3 } else { mp - 9 };
        let year = yoe as i64 + era * 400 + i64::from(month <= 2);

        Self {
            year,
            month,
            day,
            hour: secs_of_day / 3600,
            minute: (secs_of_day / 60) % 60,
            second: secs_of_day % 60,
        }
    }

    /// `YYYY-MM-DD`
    pub fn short_date(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }

    /// `YYYY-MM-DDTHH:MM:SS.000000+00:00`, the `dc:date` long form.
    pub fn long_date(&self) -> String {
        format!(
            "{}T{:02}:{:02}:{:02}.000000+00:00",
            self.short_date(),
            self.hour,
            self.minute,
            self.second
        )
    }

    /// `YYYY-MM-DDTHH:MM:SSZ`, the `dcterms:modified` form.
    pub fn modified(&self) -> String {
        format!(
            "{}T{:02}:{:02}:{:02}Z",
            self.short_date(),
            self.hour,
            self.minute,
            self.second
        )
    }

    /// Time of day for diagnostic log lines.
    pub fn clock(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch() {
        let t = UtcDateTime::from_unix(0);
        assert_eq!(t.long_date(), "1970-01-01T00:00:00.000000+00:00");
        assert_eq!(t.modified(), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_known_dates() {
        // 2023-10-27T15:30:05Z
        assert_eq!(UtcDateTime::from_unix(1_698_420_605).modified(), "2023-10-27T15:30:05Z");
        // leap day
        assert_eq!(UtcDateTime::from_unix(951_782_400).short_date(), "2000-02-29");
        // before the epoch
        assert_eq!(UtcDateTime::from_unix(-86_400).short_date(), "1969-12-31");
    }
}
