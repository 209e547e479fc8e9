use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

use crate::error::{ManifestError, ManifestResult};

pub const UTC_DIRECT_SCHEMES: &[&str] = &[
    "urn:mpeg:dash:utc:direct:2014",
    "urn:mpeg:dash:utc:direct:2012",
];

#[derive(Debug, Clone, Copy)]
enum Source {
    System,
    /// A clock that only moves when told to.
    Manual(DateTime<Utc>),
}

/// Wall clock used to place the live edge.
#[derive(Debug, Clone)]
pub struct Clock {
    source: Source,
    /// How much time the local clock is behind the remote clock
    offset: TimeDelta,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            source: Source::System,
            offset: TimeDelta::zero(),
        }
    }

    pub fn manual(now: DateTime<Utc>) -> Self {
        Self {
            source: Source::Manual(now),
            offset: TimeDelta::zero(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let local = match self.source {
            Source::System => Utc::now(),
            Source::Manual(now) => now,
        };
        local + self.offset
    }

    pub fn offset(&self) -> TimeDelta {
        self.offset
    }

    /// Moves a manual clock forward. Has no effect on the system clock.
    pub fn advance(&mut self, delta: TimeDelta) {
        if let Source::Manual(now) = &mut self.source {
            *now += delta;
        }
    }

    pub fn set_time(
        &mut self,
        remote_now: DateTime<Utc>,
        before_request: DateTime<Utc>,
        after_request: DateTime<Utc>,
    ) {
        // <before_request> (inaccurate now time)
        // <remote_now> (accurate remote time)
        // <after_request>
        //
        // the response left the server half a round trip before it arrived
        let rtt = after_request - before_request;
        let server_now = remote_now + rtt / 2;
        self.offset = server_now - after_request;
        tracing::info!(offset_milliseconds = %self.offset.num_milliseconds(), "Clock time set to {}, offset calculated", remote_now);
    }

    /// Applies the first `UTCTiming` element carrying its time inline.
    ///
    /// Returns whether the clock was adjusted. Schemes that require a request are left to the
    /// caller, who can feed the response into [Clock::set_time].
    pub fn sync_direct<'a>(
        &mut self,
        timings: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) -> bool {
        for (scheme, value) in timings {
            if !UTC_DIRECT_SCHEMES.contains(&scheme) {
                tracing::debug!(scheme, "Skipping timing scheme that requires a request");
                continue;
            }
            let Some(value) = value else {
                tracing::warn!(scheme, "Missing value for direct timing scheme");
                continue;
            };
            match parse_xs_datetime(value) {
                Ok(remote_now) => {
                    let now = self.now() - self.offset;
                    self.set_time(remote_now, now, now);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(value, error = %e, "Failed to parse direct timing value");
                }
            }
        }
        false
    }
}

/// Parses an `xs:dateTime`. Values without a zone designator are taken as UTC.
pub fn parse_xs_datetime(value: &str) -> ManifestResult<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc())
        })
        .map_err(|_| ManifestError::invalid_attribute("xs:dateTime", value))
}
