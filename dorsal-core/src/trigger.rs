//! Cron triggers for backup definitions.

use time::OffsetDateTime;

/// A cron expression that can compute its next fire time. Expressions are
/// evaluated in UTC.
#[derive(Debug, PartialEq, Eq, Hash, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Cron(pub String);

fn time_to_chrono(time: OffsetDateTime) -> eyre::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp(time.unix_timestamp(), time.nanosecond())
        .ok_or_else(|| eyre::eyre!("timestamp out of range"))
}

fn chrono_to_time(chrono: chrono::DateTime<chrono::Utc>) -> eyre::Result<OffsetDateTime> {
    Ok(OffsetDateTime::from_unix_timestamp(chrono.timestamp())?)
}

impl Cron {
    /// The next fire time strictly after `after`.
    pub fn next_schedule(&self, after: OffsetDateTime) -> eyre::Result<OffsetDateTime> {
        let after = time_to_chrono(after)?;
        let next = cron_parser::parse(&self.0, &after)?;
        chrono_to_time(next)
    }
}
