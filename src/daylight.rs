use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

/// A location sun calculations can be made for. The built-in table below is a small
/// stand-in for a proper geocoder database, extend it as needed.
#[derive(Debug, Clone, Copy)]
pub struct City {
    name: &'static str,
    latitude: f64,
    longitude: f64,
    timezone: Tz,
}

#[derive(thiserror::Error, Debug)]
#[error("unknown city: {0}")]
pub struct UnknownCity(String);

macro_rules! city {
    ($name:literal, $lat:literal, $lon:literal, $tz:expr) => {
        City {
            name: $name,
            latitude: $lat,
            longitude: $lon,
            timezone: $tz,
        }
    };
}

static CITIES: &[City] = &[
    city!("Amsterdam", 52.3676, 4.9041, chrono_tz::Europe::Amsterdam),
    city!("Berlin", 52.5200, 13.4050, chrono_tz::Europe::Berlin),
    city!("Chicago", 41.8781, -87.6298, chrono_tz::America::Chicago),
    city!("Denver", 39.7392, -104.9903, chrono_tz::America::Denver),
    city!("London", 51.5074, -0.1278, chrono_tz::Europe::London),
    city!("Los Angeles", 34.0522, -118.2437, chrono_tz::America::Los_Angeles),
    city!("New York", 40.7128, -74.0060, chrono_tz::America::New_York),
    city!("Paris", 48.8566, 2.3522, chrono_tz::Europe::Paris),
    city!("San Francisco", 37.7749, -122.4194, chrono_tz::America::Los_Angeles),
    city!("Seattle", 47.6062, -122.3321, chrono_tz::America::Los_Angeles),
    city!("Stockholm", 59.3293, 18.0686, chrono_tz::Europe::Stockholm),
    city!("Sydney", -33.8688, 151.2093, chrono_tz::Australia::Sydney),
    city!("Tokyo", 35.6762, 139.6503, chrono_tz::Asia::Tokyo),
    city!("Toronto", 43.6532, -79.3832, chrono_tz::America::Toronto),
    city!("Vancouver", 49.2827, -123.1207, chrono_tz::America::Vancouver),
];

pub fn lookup(name: &str) -> Result<&'static City, UnknownCity> {
    CITIES
        .iter()
        .find(|city| city.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| UnknownCity(name.to_owned()))
}

/// Sunrise and sunset on some date, in the city's own timezone.
#[derive(Debug, Clone, Copy)]
pub struct DaylightWindow {
    pub sunrise: DateTime<Tz>,
    pub sunset: DateTime<Tz>,
}

impl City {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn daylight_window(&self, date: NaiveDate) -> DaylightWindow {
        let (rise, set) = sunrise::sunrise_sunset(
            self.latitude,
            self.longitude,
            date.year(),
            date.month(),
            date.day(),
        );
        DaylightWindow {
            sunrise: unix_in(self.timezone, rise),
            sunset: unix_in(self.timezone, set),
        }
    }

    /// Whether `now` falls within the city's daylight window, widened by `buffer` at
    /// both ends.
    pub fn sun_is_out<T: TimeZone>(&self, now: DateTime<T>, buffer: Duration) -> bool {
        let now = now.with_timezone(&self.timezone);
        let window = self.daylight_window(now.date_naive());
        let buffer =
            chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::MAX);

        match (
            window.sunrise.checked_sub_signed(buffer),
            window.sunset.checked_add_signed(buffer),
        ) {
            (Some(lower), Some(upper)) => lower <= now && now <= upper,
            // a buffer this big covers the whole day
            _ => true,
        }
    }

    /// Whether a naive timestamp, read as the city's own local time, is between
    /// sunrise and sunset. This is what the filter applies to filename timestamps.
    pub fn is_daylight(&self, stamp: NaiveDateTime) -> bool {
        let Some(stamp) = self.timezone.from_local_datetime(&stamp).earliest() else {
            return false;
        };
        let window = self.daylight_window(stamp.date_naive());
        window.sunrise <= stamp && stamp <= window.sunset
    }
}

fn unix_in(tz: Tz, secs: i64) -> DateTime<Tz> {
    DateTime::from_timestamp(secs, 0)
        .expect("sun timestamps are always in range")
        .with_timezone(&tz)
}

#[cfg(test)]
mod test {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!("Seattle", lookup("seattle").unwrap().name());
        assert_eq!("New York", lookup("NEW YORK").unwrap().name());
        assert!(lookup("Atlantis").is_err());
    }

    #[test]
    fn sunrise_is_before_sunset() {
        let seattle = lookup("Seattle").unwrap();
        let window = seattle.daylight_window(date(2024, 6, 21));
        assert!(window.sunrise < window.sunset);
    }

    #[test]
    fn noon_is_daylight_and_night_is_not() {
        let seattle = lookup("Seattle").unwrap();
        let noon = seattle
            .timezone()
            .with_ymd_and_hms(2024, 6, 21, 12, 0, 0)
            .unwrap();
        let night = seattle
            .timezone()
            .with_ymd_and_hms(2024, 6, 21, 2, 0, 0)
            .unwrap();

        assert!(seattle.sun_is_out(noon, Duration::ZERO));
        assert!(!seattle.sun_is_out(night, Duration::ZERO));
    }

    #[test]
    fn buffer_widens_the_window() {
        let seattle = lookup("Seattle").unwrap();
        let window = seattle.daylight_window(date(2024, 6, 21));
        let before_sunrise = window.sunrise - chrono::Duration::minutes(10);

        assert!(!seattle.sun_is_out(before_sunrise, Duration::ZERO));
        assert!(seattle.sun_is_out(before_sunrise, Duration::from_secs(15 * 60)));
    }

    #[test]
    fn filename_timestamps_follow_the_sun() {
        let seattle = lookup("Seattle").unwrap();
        let noon = date(2024, 5, 1).and_hms_opt(12, 0, 0).unwrap();
        let midnight = date(2024, 5, 1).and_hms_opt(0, 30, 0).unwrap();

        assert!(seattle.is_daylight(noon));
        assert!(!seattle.is_daylight(midnight));
    }
}
