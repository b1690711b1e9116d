use std::collections::HashMap;

use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use thiserror::Error;

use crate::backend::ArticleSummary;
use crate::config::normalize_emoji;

/// A validated `/command <emoji> <date-expression>` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalQuery {
    pub emoji: String,
    pub label: String,
    pub since: NaiveDate,
}

/// User-facing errors; the `Display` text is shown back to the user.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Usage: <emoji> <date>, e.g. `bookmark 2 weeks ago` or `bookmark 2026-01-31`")]
    WrongArgumentCount,
    #[error("`{emoji}` is not a configured emoji. Try one of: {known}")]
    UnknownEmoji { emoji: String, known: String },
    #[error("Could not understand the date `{0}`")]
    UnparseableDate(String),
    #[error("{0} is in the future")]
    FutureDate(NaiveDate),
    #[error("{date} is more than {max_age_days} days ago")]
    TooOld { date: NaiveDate, max_age_days: i64 },
}

/// Parse and validate the free text of a retrieval command.
pub fn parse_command(
    text: &str,
    labels: &HashMap<String, String>,
    today: NaiveDate,
    max_age_days: i64,
) -> Result<RetrievalQuery, CommandError> {
    let mut parts = text.split_whitespace();
    let (Some(first), rest) = (parts.next(), parts.collect::<Vec<_>>()) else {
        return Err(CommandError::WrongArgumentCount);
    };
    if rest.is_empty() {
        return Err(CommandError::WrongArgumentCount);
    }

    let emoji = normalize_emoji(first);
    let Some(label) = labels.get(&emoji) else {
        let mut known: Vec<_> = labels.keys().map(|k| format!(":{k}:")).collect();
        known.sort();
        return Err(CommandError::UnknownEmoji {
            emoji: first.to_string(),
            known: known.join(", "),
        });
    };

    let expression = rest.join(" ");
    let since = parse_date_expression(&expression, today)
        .ok_or_else(|| CommandError::UnparseableDate(expression.clone()))?;

    if since > today {
        return Err(CommandError::FutureDate(since));
    }
    if (today - since).num_days() > max_age_days {
        return Err(CommandError::TooOld {
            date: since,
            max_age_days,
        });
    }

    Ok(RetrievalQuery {
        emoji,
        label: label.clone(),
        since,
    })
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

/// Interpret a loose, human-written date relative to `today`.
pub fn parse_date_expression(expression: &str, today: NaiveDate) -> Option<NaiveDate> {
    let normalized = expression.trim().to_lowercase();
    let words: Vec<&str> = normalized.split_whitespace().collect();

    match words.as_slice() {
        [] => None,
        ["today"] | ["now"] => Some(today),
        ["yesterday"] => today.checked_sub_days(Days::new(1)),
        [amount, unit, "ago"] => {
            let n = parse_amount(amount)?;
            go_back(today, n, unit)
        }
        ["last", unit] | ["past", unit] => match parse_weekday(unit) {
            Some(day) => Some(previous_weekday(today, day)),
            None => go_back(today, 1, unit),
        },
        ["this", unit] => start_of_period(today, unit),
        [day] if parse_weekday(day).is_some() => {
            parse_weekday(day).map(|d| previous_weekday(today, d))
        }
        _ => DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(&normalized, fmt).ok()),
    }
}

fn parse_amount(word: &str) -> Option<u32> {
    match word {
        "a" | "an" | "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "six" => Some(6),
        "seven" => Some(7),
        "ten" => Some(10),
        other => other.parse().ok(),
    }
}

fn go_back(today: NaiveDate, n: u32, unit: &str) -> Option<NaiveDate> {
    match unit.trim_end_matches('s') {
        "day" => today.checked_sub_days(Days::new(u64::from(n))),
        "week" => today.checked_sub_days(Days::new(u64::from(n) * 7)),
        "month" => today.checked_sub_months(Months::new(n)),
        "year" => today.checked_sub_months(Months::new(n.checked_mul(12)?)),
        _ => None,
    }
}

fn start_of_period(today: NaiveDate, unit: &str) -> Option<NaiveDate> {
    match unit {
        "week" => today.checked_sub_days(Days::new(u64::from(
            today.weekday().num_days_from_monday(),
        ))),
        "month" => today.with_day(1),
        "year" => NaiveDate::from_ymd_opt(today.year(), 1, 1),
        _ => None,
    }
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    match word {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Most recent `day` strictly before `today`.
fn previous_weekday(today: NaiveDate, day: Weekday) -> NaiveDate {
    let mut date = today.pred_opt().unwrap_or(today);
    while date.weekday() != day {
        match date.pred_opt() {
            Some(prev) => date = prev,
            None => break,
        }
    }
    date
}

/// Escape user content for Slack mrkdwn.
fn escape_mrkdwn(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render a tag query result as Slack mrkdwn, newest first.
pub fn format_articles(
    label: &str,
    since: NaiveDate,
    mut articles: Vec<ArticleSummary>,
    max_results: usize,
) -> String {
    if articles.is_empty() {
        return format!("No articles tagged '{label}' since {since}.");
    }

    articles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let total = articles.len();
    articles.truncate(max_results);

    let mut out = format!("Articles tagged '{label}' since {since}:\n");
    for article in &articles {
        out.push_str(&format!(
            "• <{}|{}> ({})\n",
            article.url,
            escape_mrkdwn(&article.title),
            article.created_at.format("%Y-%m-%d")
        ));
    }
    if total > articles.len() {
        out.push_str(&format!("…and {} more\n", total - articles.len()));
    }
    out
}
