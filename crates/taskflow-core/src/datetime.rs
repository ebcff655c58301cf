use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Days,
  Local,
  NaiveDate,
  Utc,
  Weekday
};

/// Calendar-date format used for due dates. Lexicographic order on this
/// format is chronological order.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[must_use]
pub fn local_today(
  now: DateTime<Utc>
) -> NaiveDate {
  now.with_timezone(&Local).date_naive()
}

#[must_use]
pub fn tomorrow(
  today: NaiveDate
) -> NaiveDate {
  today
    .checked_add_days(Days::new(1))
    .unwrap_or(today)
}

#[must_use]
pub fn format_date(
  date: NaiveDate
) -> String {
  date.format(DATE_FORMAT).to_string()
}

/// Parses a due-date expression relative to `today`.
///
/// `Ok(None)` means "no due date" (empty input or `none`).
pub fn parse_due_date(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<Option<NaiveDate>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "" | "none" => return Ok(None),
    | "today" => return Ok(Some(today)),
    | "tomorrow" => {
      return Ok(Some(tomorrow(today)));
    }
    | "yesterday" => {
      return Ok(Some(
        today
          .checked_sub_days(Days::new(
            1
          ))
          .unwrap_or(today)
      ));
    }
    | _ => {}
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(Some(next_weekday_date(
      today, weekday
    )));
  }

  if let Some(rest) =
    lower.strip_prefix('+')
    && let Some(days) =
      rest.strip_suffix('d')
  {
    let days: u64 =
      days.parse().with_context(|| {
        format!(
          "invalid relative date: \
           {token}"
        )
      })?;
    return today
      .checked_add_days(Days::new(days))
      .map(Some)
      .ok_or_else(|| {
        anyhow!(
          "relative date out of \
           range: {token}"
        )
      });
  }

  NaiveDate::parse_from_str(
    token,
    DATE_FORMAT
  )
  .map(Some)
  .with_context(|| {
    format!(
      "invalid due date '{token}'; \
       expected YYYY-MM-DD"
    )
  })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = u64::from(
    from.weekday().num_days_from_monday()
  );
  let target_idx = u64::from(
    target.num_days_from_monday()
  );
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_days(Days::new(delta))
    .unwrap_or(from)
}

/// Millisecond-precision ISO 8601
/// timestamps (`2026-10-16T09:30:00.000Z`).
pub mod iso_millis_serde {
  use chrono::{
    DateTime,
    SecondsFormat,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt.to_rfc3339_opts(
        SecondsFormat::Millis,
        true
      )
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    parse(&raw)
      .map_err(serde::de::Error::custom)
  }

  pub(crate) fn parse(
    raw: &str
  ) -> Result<DateTime<Utc>, chrono::ParseError>
  {
    DateTime::parse_from_rfc3339(
      raw.trim()
    )
    .map(|dt| dt.with_timezone(&Utc))
  }

  pub mod option {
    use chrono::{
      DateTime,
      Utc
    };
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw)
          if raw.trim().is_empty() =>
        {
          Ok(None)
        }
        | Some(raw) => {
          super::parse(&raw)
            .map(Some)
            .map_err(
              serde::de::Error::custom
            )
        }
        | None => Ok(None)
      }
    }
  }
}
